//! The two hardware command submission streams the compositor schedules across.
//!
//! Every pass executes on exactly one of these. The sync queue runs graphics work and
//! compute work that must stay ordered with it; the async queue runs compute work that
//! overlaps the graphics timeline and is only ordered against it through fences.

/// Hardware queue a pass or batch is submitted to.
#[derive(Debug, Default, Copy, Clone, Hash, PartialEq, Eq)]
pub enum QueueKind {
    /// The graphics queue. Also carries compute passes whose task writes its dispatches
    /// into the graphics command stream.
    #[default]
    Sync,
    /// The async compute queue.
    Async,
}

impl QueueKind {
    /// The other queue.
    pub fn other(self) -> QueueKind {
        match self {
            QueueKind::Sync => QueueKind::Async,
            QueueKind::Async => QueueKind::Sync,
        }
    }

    /// Index for per-queue bookkeeping arrays.
    pub(crate) fn index(self) -> usize {
        match self {
            QueueKind::Sync => 0,
            QueueKind::Async => 1,
        }
    }
}
