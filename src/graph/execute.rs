//! The execution engine.
//!
//! Replays a [`FrameSchedule`](crate::graph::schedule::FrameSchedule) against the live
//! queues, once per frame. No graph analysis happens here: batches are walked in order,
//! every batch first issues its queue-level fence waits, then submits its command
//! lists, then issues its fence signals. Subtasks recorded on worker threads hand their
//! finished lists back through oneshot channels; the engine joins them with a wait-any
//! and submits each as it completes, all before the batch's signals. That wait-any is
//! the only place the engine blocks.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures::channel::oneshot;
use futures::future::select_all;

use crate::core::config::CompositorConfig;
use crate::core::device::{CommandList, RenderDevice};
use crate::core::view_table::ViewTable;
use crate::graph::builder::BuiltGraph;
use crate::graph::schedule::BatchItem;
use crate::sync::domain::QueueKind;
use crate::sync::fence::FencePool;
use crate::task::{FrameContext, SubtaskCommands};

impl BuiltGraph {
    /// Execute one frame of the precomputed plan.
    pub fn execute_frame(
        &mut self,
        device: &Arc<dyn RenderDevice>,
        config: &CompositorConfig,
        views: &ViewTable,
        fences: &mut FencePool,
    ) -> Result<()> {
        let BuiltGraph {
            name,
            passes,
            tasks,
            subtasks,
            textures,
            plan,
            schedule,
            frame_index,
            ..
        } = self;
        *frame_index += 1;

        // Plan-relative fence values rebase onto the runtime counters at frame start.
        let bases: HashMap<usize, u64> = schedule
            .fences_used()
            .into_iter()
            .map(|fence| (fence, fences.value(fence)))
            .collect();

        let ctx = FrameContext {
            device,
            config,
            views,
            plan: &*plan,
            graph: name.as_str(),
            frame_index: *frame_index,
        };

        for batch in schedule.batches() {
            for wait in &batch.waits {
                let value = bases[&wait.fence] + wait.value;
                device.wait(batch.queue, fences.get(wait.fence).primitive(), value)?;
            }

            let mut lists: Vec<CommandList> = Vec::new();
            let mut current: Option<CommandList> = None;
            let mut deferred: Vec<oneshot::Receiver<CommandList>> = Vec::new();

            for item in &batch.items {
                match *item {
                    BatchItem::Pass(index) => {
                        let cmd = match current {
                            Some(cmd) => cmd,
                            None => {
                                let cmd = device.open_command_list(batch.queue)?;
                                lists.push(cmd);
                                current = Some(cmd);
                                cmd
                            }
                        };
                        let pass = &passes[index];

                        for (texture, _, state) in plan.pass_usages(index) {
                            if !state.needs_transition() {
                                continue;
                            }
                            match textures.get(texture) {
                                Some(allocated) => device.transition(
                                    cmd,
                                    allocated.handle,
                                    state.previous,
                                    state.current,
                                )?,
                                None => trace!("No texture allocated for `{}`", texture),
                            }
                        }

                        if let Some(slot) = pass.task {
                            match batch.queue {
                                QueueKind::Async => {
                                    tasks[slot].run_compute(&ctx, cmd, pass)?;
                                }
                                QueueKind::Sync if tasks[slot].writes_sync_commands() => {
                                    tasks[slot].run(&ctx, cmd, pass)?;
                                }
                                QueueKind::Sync => {}
                            }
                        }

                        // Forced barriers after the pass keep cross-queue hand-offs and
                        // present transitions starting from a known state.
                        for (texture, _, state) in plan.pass_usages(index) {
                            if !state.barrier_after || state.current == state.next {
                                continue;
                            }
                            if let Some(allocated) = textures.get(texture) {
                                device.transition(
                                    cmd,
                                    allocated.handle,
                                    state.current,
                                    state.next,
                                )?;
                            }
                        }
                    }
                    BatchItem::Subtask { subtask, .. } => {
                        match (subtasks[subtask].record)(&ctx)? {
                            SubtaskCommands::Ready(cmd) => {
                                lists.push(cmd);
                                current = None;
                            }
                            SubtaskCommands::Deferred(receiver) => {
                                deferred.push(receiver);
                                current = None;
                            }
                        }
                    }
                }
            }

            if !lists.is_empty() {
                device.submit(batch.queue, &lists)?;
            }

            // Wait-any join over worker-recorded lists: whichever finishes first is
            // submitted first. Everything lands before the batch's signals.
            if !deferred.is_empty() {
                let queue = batch.queue;
                futures::executor::block_on(async {
                    let mut pending = deferred;
                    while !pending.is_empty() {
                        let (finished, _, rest) = select_all(pending).await;
                        pending = rest;
                        match finished {
                            Ok(cmd) => device.submit(queue, &[cmd])?,
                            Err(oneshot::Canceled) => {
                                warn!("Subtask worker dropped its command list");
                            }
                        }
                    }
                    Ok::<(), anyhow::Error>(())
                })?;
            }

            for signal in &batch.signals {
                let value = bases[&signal.fence] + signal.value;
                device.signal(batch.queue, fences.get(signal.fence).primitive(), value)?;
                fences.advance(signal.fence, value);
            }
        }
        Ok(())
    }
}
