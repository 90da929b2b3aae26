//! The command batch scheduler.
//!
//! Groups the resolved pass list into an ordered list of [`TaskBatch`]es, each an
//! uninterrupted run of command recording on one queue. A new batch starts when a pass
//! is the first to need one, when an explicit sync marker forces a flush, or when a
//! dependency check against the passes accumulated so far detects a hazard: the same
//! texture used with different flags, an explicit `after` hint, or a task that forces
//! strict ordering. Passes with no hazard between them share a batch, which keeps the
//! number of command list submissions low.
//!
//! Fence values inside the schedule are plan-relative: the first signal of a fence in
//! the frame is value 1, the second value 2, and so on. The execution engine rebases
//! them onto the fence's monotonic runtime counter each frame.

use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use anyhow::Result;

use crate::core::device::RenderDevice;
use crate::core::error::Error;
use crate::graph::builder::ResolvedPass;
use crate::graph::pass::{SlotFlags, SyncOp};
use crate::sync::domain::QueueKind;
use crate::sync::fence::{FencePool, FenceRef};

/// One unit of work inside a batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BatchItem {
    /// Commands of a pass, recorded inline when the batch is submitted.
    Pass(usize),
    /// An async subtask registered by the pass's task, possibly recorded on a worker
    /// thread and joined with a wait-any.
    Subtask {
        /// Owning pass index.
        pass: usize,
        /// Index into the built graph's subtask list.
        subtask: usize,
    },
}

/// An ordered set of command recordings submitted together, with the fences the batch
/// waits on before submission and signals after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskBatch {
    /// Queue this batch is submitted to.
    pub queue: QueueKind,
    /// Work items in submission order.
    pub items: Vec<BatchItem>,
    /// Fences to wait on before submitting, with plan-relative values.
    pub waits: Vec<FenceRef>,
    /// Fences to signal after submitting, with plan-relative values.
    pub signals: Vec<FenceRef>,
}

/// The finished batch list for one frame, replayed by the execution engine.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FrameSchedule {
    batches: Vec<TaskBatch>,
    bumps: HashMap<usize, u64>,
}

impl FrameSchedule {
    /// Batches in submission order.
    pub fn batches(&self) -> &[TaskBatch] {
        &self.batches
    }

    /// Indices of every fence the schedule touches.
    pub fn fences_used(&self) -> BTreeSet<usize> {
        self.batches
            .iter()
            .flat_map(|b| b.waits.iter().chain(&b.signals))
            .map(|f| f.fence)
            .collect()
    }

    /// How often a fence is signaled per frame; the execution engine advances the
    /// runtime counter by this much every frame.
    pub fn bumps(&self, fence: usize) -> u64 {
        self.bumps.get(&fence).copied().unwrap_or(0)
    }
}

impl Display for FrameSchedule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, batch) in self.batches.iter().enumerate() {
            writeln!(
                f,
                "batch {} [{:?}] items={:?} waits={:?} signals={:?}",
                i, batch.queue, batch.items, batch.waits, batch.signals
            )?;
        }
        Ok(())
    }
}

#[derive(Default)]
struct OpenBatch {
    items: Vec<BatchItem>,
    waits: Vec<FenceRef>,
    signals: Vec<FenceRef>,
    textures: HashMap<String, SlotFlags>,
    pass_names: Vec<String>,
}

impl OpenBatch {
    fn conflicts(&self, pass: &ResolvedPass) -> bool {
        if pass.force_order && !self.items.is_empty() {
            return true;
        }
        if let Some(after) = &pass.after {
            if self.pass_names.iter().any(|n| n == after) {
                return true;
            }
        }
        pass.inputs.iter().chain(&pass.targets).any(|slot| {
            self.textures
                .get(&slot.texture)
                .is_some_and(|&flags| flags != slot.flags)
        })
    }

    fn absorb_pass(&mut self, pass: &ResolvedPass) {
        for slot in pass.inputs.iter().chain(&pass.targets) {
            self.textures.insert(slot.texture.clone(), slot.flags);
        }
        self.pass_names.push(pass.name.clone());
    }
}

struct Scheduler<'a> {
    passes: &'a [ResolvedPass],
    fences: &'a mut FencePool,
    device: &'a Arc<dyn RenderDevice>,
    open: [Option<OpenBatch>; 2],
    pending_waits: [Vec<FenceRef>; 2],
    counters: HashMap<usize, u64>,
    out: Vec<TaskBatch>,
}

impl Scheduler<'_> {
    fn flush(&mut self, queue: QueueKind) {
        if let Some(open) = self.open[queue.index()].take() {
            self.out.push(TaskBatch {
                queue,
                items: open.items,
                waits: open.waits,
                signals: open.signals,
            });
        }
    }

    fn open_mut(&mut self, queue: QueueKind) -> &mut OpenBatch {
        let index = queue.index();
        if self.open[index].is_none() {
            self.open[index] = Some(OpenBatch {
                waits: std::mem::take(&mut self.pending_waits[index]),
                ..Default::default()
            });
        }
        self.open[index].as_mut().unwrap()
    }

    fn schedule_pass(&mut self, index: usize) -> Result<()> {
        let passes = self.passes;
        let pass = &passes[index];

        // Wait markers force the next batch on their queue to carry the wait, so an
        // open batch there has to close first.
        for marker in &pass.sync {
            if marker.op == SyncOp::Wait {
                let fence = self.fences.obtain(&marker.fence, self.device)?;
                let value = self.counters.get(&fence).copied().unwrap_or(0);
                self.flush(marker.queue);
                self.pending_waits[marker.queue.index()].push(FenceRef { fence, value });
            }
        }

        // Hazard checks. A conflict with the pass's own open batch starts a new command
        // list; a conflict with the other queue's open batch closes that batch so the
        // submission order pins down the dependency.
        let queue = pass.queue;
        if self.open[queue.index()]
            .as_ref()
            .is_some_and(|b| b.conflicts(pass))
        {
            self.flush(queue);
        }
        if self.open[queue.other().index()]
            .as_ref()
            .is_some_and(|b| b.conflicts(pass))
        {
            self.flush(queue.other());
        }

        let open = self.open_mut(queue);
        open.items.push(BatchItem::Pass(index));
        open.absorb_pass(pass);

        // Async subtasks accumulate on the async queue. A task that forces ordering
        // gets one subtask per batch instead.
        for &subtask in &pass.subtasks {
            if pass.force_order {
                self.flush(QueueKind::Async);
                let open = self.open_mut(QueueKind::Async);
                open.items.push(BatchItem::Subtask {
                    pass: index,
                    subtask,
                });
                open.absorb_pass(pass);
                self.flush(QueueKind::Async);
            } else {
                if self.open[QueueKind::Async.index()]
                    .as_ref()
                    .is_some_and(|b| b.conflicts(pass))
                {
                    self.flush(QueueKind::Async);
                }
                let open = self.open_mut(QueueKind::Async);
                open.items.push(BatchItem::Subtask {
                    pass: index,
                    subtask,
                });
                if pass.queue != QueueKind::Async {
                    open.absorb_pass(pass);
                }
            }
        }

        // A signal closes both queues: the fence attaches to the batch just closed on
        // the marker's queue, and everything scheduled afterwards stays behind it.
        for marker in &pass.sync {
            if marker.op == SyncOp::Signal {
                let fence = self.fences.obtain(&marker.fence, self.device)?;
                let counter = self.counters.entry(fence).or_insert(0);
                *counter += 1;
                let value = *counter;
                self.open_mut(marker.queue)
                    .signals
                    .push(FenceRef { fence, value });
                self.flush(marker.queue.other());
                self.flush(marker.queue);
            }
        }
        Ok(())
    }
}

/// Group `passes` into ordered batches and attach fence waits and signals from the
/// explicit sync markers. Fences resolve through `fences` and persist across rebuilds.
pub fn build_batches(
    passes: &[ResolvedPass],
    fences: &mut FencePool,
    device: &Arc<dyn RenderDevice>,
) -> Result<FrameSchedule> {
    let mut scheduler = Scheduler {
        passes,
        fences,
        device,
        open: [None, None],
        pending_waits: [Vec::new(), Vec::new()],
        counters: HashMap::new(),
        out: Vec::new(),
    };
    for index in 0..passes.len() {
        scheduler.schedule_pass(index)?;
    }
    scheduler.flush(QueueKind::Sync);
    scheduler.flush(QueueKind::Async);

    let schedule = FrameSchedule {
        batches: scheduler.out,
        bumps: scheduler.counters,
    };

    // A wait on a fence nothing ever signals would stall the queue forever.
    for batch in schedule.batches() {
        for wait in &batch.waits {
            if schedule.bumps(wait.fence) == 0 {
                return Err(
                    Error::FenceNeverSignaled(fences.get(wait.fence).name().to_owned()).into(),
                );
            }
        }
    }
    Ok(schedule)
}
