//! The shared view table.
//!
//! Resolved textures are published here under `<graphName>:<textureName>` keys so that
//! unrelated subsystems (UI, debug overlays) can look them up without knowing anything
//! about the graph that produced them. Multi-render-target groups occupy contiguous
//! slots, so a shader indexing from the base member's slot reaches every member.
//!
//! Handles in the table go stale when the owning graph reloads its textures. Consumers
//! that cache a handle must compare [`ViewTable::generation`] and re-resolve after a
//! reload; the table does not chase external copies.

use std::collections::HashMap;

use crate::core::device::TextureHandle;

/// Shared name to texture view table.
#[derive(Debug, Default)]
pub struct ViewTable {
    slots: Vec<TextureHandle>,
    names: HashMap<String, usize>,
    generation: u64,
}

impl ViewTable {
    /// Create an empty view table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a single texture under `key`. If the key is already present its slot is
    /// reused, keeping slot indices stable across reloads.
    pub fn publish(&mut self, key: impl Into<String>, handle: TextureHandle) -> usize {
        let key = key.into();
        match self.names.get(&key) {
            Some(&slot) => {
                self.slots[slot] = handle;
                slot
            }
            None => {
                let slot = self.slots.len();
                self.slots.push(handle);
                self.names.insert(key, slot);
                slot
            }
        }
    }

    /// Publish a group of textures into contiguous slots, returning the first slot.
    /// Used for MRT groups, whose members must be reachable by slot arithmetic.
    /// A group that was published before keeps its slot range.
    pub fn publish_group(&mut self, keys: &[String], handles: &[TextureHandle]) -> usize {
        debug_assert_eq!(keys.len(), handles.len());
        if let Some(&first) = keys.first().and_then(|k| self.names.get(k)) {
            for (i, (key, handle)) in keys.iter().zip(handles).enumerate() {
                debug_assert_eq!(self.names.get(key), Some(&(first + i)));
                self.slots[first + i] = *handle;
            }
            return first;
        }
        let first = self.slots.len();
        for (key, handle) in keys.iter().zip(handles) {
            self.slots.push(*handle);
            self.names.insert(key.clone(), self.slots.len() - 1);
        }
        first
    }

    /// Resolve a key to its current texture handle.
    pub fn resolve(&self, key: &str) -> Option<TextureHandle> {
        self.names.get(key).map(|&slot| self.slots[slot])
    }

    /// Slot index of a key, for consumers that index the table from shaders.
    pub fn slot(&self, key: &str) -> Option<usize> {
        self.names.get(key).copied()
    }

    /// Generation counter. Bumped whenever published handles may have been replaced;
    /// externally cached handles from an older generation are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn bump_generation(&mut self) {
        self.generation += 1;
    }
}
