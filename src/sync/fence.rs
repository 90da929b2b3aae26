//! Cross-queue fences.
//!
//! A fence pairs a name from the graph description with a monotonic counter and an
//! opaque device primitive. Fences are created once and live for the process: a graph
//! reload rebuilds the plan but keeps the fences, so counters never move backwards and
//! work still in flight from the old plan stays correctly ordered.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::core::device::{FencePrimitive, RenderDevice};

/// A named cross-queue fence with a monotonic counter.
#[derive(Debug)]
pub struct Fence {
    name: String,
    value: u64,
    primitive: FencePrimitive,
}

impl Fence {
    /// Name the graph description refers to this fence by.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last value handed out for signaling. Waits issued against this value complete
    /// once the matching signal executes.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// The underlying device primitive.
    pub fn primitive(&self) -> FencePrimitive {
        self.primitive
    }
}

/// Reference to a fence in a [`FencePool`] together with the counter value a batch
/// waits for or signals.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FenceRef {
    /// Index into the owning pool.
    pub fence: usize,
    /// Counter value of the wait or signal.
    pub value: u64,
}

/// Owns every fence the scheduler has ever handed out, keyed by name.
#[derive(Debug, Default)]
pub struct FencePool {
    fences: Vec<Fence>,
    by_name: HashMap<String, usize>,
}

impl FencePool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a fence by name, creating its device primitive on first use. Subsequent
    /// graph reloads resolve to the same fence.
    pub fn obtain(&mut self, name: &str, device: &Arc<dyn RenderDevice>) -> Result<usize> {
        if let Some(&index) = self.by_name.get(name) {
            return Ok(index);
        }
        let primitive = device.create_fence()?;
        let index = self.fences.len();
        self.fences.push(Fence {
            name: name.to_owned(),
            value: 0,
            primitive,
        });
        self.by_name.insert(name.to_owned(), index);
        Ok(index)
    }

    /// Advance the runtime counter of a fence to `value`. Counters never move
    /// backwards; the execution engine calls this as it issues signals.
    pub fn advance(&mut self, index: usize, value: u64) {
        let fence = &mut self.fences[index];
        fence.value = fence.value.max(value);
    }

    /// Current counter value of a fence.
    pub fn value(&self, index: usize) -> u64 {
        self.fences[index].value
    }

    /// Access a fence by index.
    pub fn get(&self, index: usize) -> &Fence {
        &self.fences[index]
    }

    /// Number of fences ever created.
    pub fn len(&self) -> usize {
        self.fences.len()
    }

    /// True if no fence was ever created.
    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }
}
