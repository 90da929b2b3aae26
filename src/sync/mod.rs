//! Queue kinds and cross-queue fence bookkeeping.

pub mod domain;
pub mod fence;
