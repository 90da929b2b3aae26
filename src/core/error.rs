//! Exposes the deimos error type

use thiserror::Error;

/// Error type that deimos can return.
#[derive(Error, Debug)]
pub enum Error {
    /// The compositor description could not be tokenized or violates the block grammar.
    /// Unknown format and sizing tokens are *not* parse errors, they degrade to sentinels.
    #[error("Parse error at line {line}: {message}")]
    ParseError {
        /// 1-based source line of the offending token.
        line: usize,
        /// What the parser expected to see.
        message: String,
    },
    /// Named compositor block not present in the graph library.
    #[error("Compositor `{0}` not found in the graph library.")]
    GraphNotFound(String),
    /// A pass slot references a texture that was never declared and is not imported.
    #[error("Texture `{0}` is not declared in this graph.")]
    UnknownTexture(String),
    /// Pass dependency graph contains a cycle and is impossible to resolve.
    /// Usually caused by an `after` hint naming a later pass.
    #[error("Pass dependency graph contains a cycle.")]
    GraphHasCycle,
    /// A texture moves between the sync queue and the async queue without a declared
    /// signal/wait pair. This is the one fatal condition in the subsystem: an unguarded
    /// cross-queue transition cannot be made correct at execution time.
    #[error("Texture `{texture}` crosses queues between pass `{producer}` and pass `{consumer}` without a signal/wait pair.")]
    CrossQueueHazard {
        /// Name of the texture whose usages alternate queues.
        texture: String,
        /// Pass owning the last usage before the hand-off.
        producer: String,
        /// Pass owning the first usage after the hand-off.
        consumer: String,
    },
    /// A sync marker waits on a fence that is never signaled on any queue.
    #[error("Sync marker waits on fence `{0}` which is never signaled.")]
    FenceNeverSignaled(String),
    /// Uncategorized error.
    #[error("Uncategorized error: `{0}`")]
    Uncategorized(&'static str),
}
