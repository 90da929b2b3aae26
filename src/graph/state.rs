//! The resource state planner.
//!
//! For every texture the planner walks the ordered usages across the frame's passes and
//! computes the merged resource state of each usage, the state it comes from and the
//! state it goes to next, and the places where a forced barrier or a cross-queue fence
//! is mandatory. The result is a read-only [`StatePlan`] the scheduler and the
//! execution engine replay; planning runs single-threaded at graph build, never per
//! frame.
//!
//! Merging follows three rules:
//! - consecutive usages whose states are all read-only collapse into one merged state
//!   group (the bit-union of the members), so no transition is recorded between them;
//! - a usage with a write state is always a group of exactly one;
//! - grouping is greedy in declaration order, so when a usage could join either of two
//!   neighboring groups the first declared one wins.
//!
//! Because the same plan replays every frame, the usage sequence is cyclic: if the
//! first and last group of a texture are mutually read-compatible they are merged once
//! more across the frame boundary.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use bitflags::bitflags;
use multimap::MultiMap;

use crate::core::error::Error;
use crate::graph::builder::ResolvedPass;
use crate::graph::pass::{PassSlot, SlotFlags, SyncOp};
use crate::sync::domain::QueueKind;

bitflags! {
    /// Hardware-visible access mode a texture is valid for.
    ///
    /// Read states can be combined; a state containing any write bit must stand alone.
    /// The empty set is the common/undefined state a texture starts its life in.
    #[derive(Debug, Default, Copy, Clone, Hash, PartialEq, Eq)]
    pub struct ResourceState: u32 {
        /// Bound as a color render target.
        const RENDER_TARGET = 1 << 0;
        /// Read-write access from a shader.
        const UNORDERED_ACCESS = 1 << 1;
        /// Bound as a writable depth-stencil buffer.
        const DEPTH_WRITE = 1 << 2;
        /// Bound as a read-only depth buffer.
        const DEPTH_READ = 1 << 3;
        /// Sampled outside the pixel shader stage (compute included).
        const NON_PIXEL_SHADER_RESOURCE = 1 << 4;
        /// Sampled in the pixel shader stage.
        const PIXEL_SHADER_RESOURCE = 1 << 5;
        /// Handed to the presentation engine.
        const PRESENT = 1 << 6;

        /// All read-class bits.
        const READ_ANY = Self::DEPTH_READ.bits()
            | Self::NON_PIXEL_SHADER_RESOURCE.bits()
            | Self::PIXEL_SHADER_RESOURCE.bits();
        /// All write-class bits.
        const WRITE_ANY = Self::RENDER_TARGET.bits()
            | Self::UNORDERED_ACCESS.bits()
            | Self::DEPTH_WRITE.bits()
            | Self::PRESENT.bits();
    }
}

impl ResourceState {
    /// The common state: no access declared yet.
    pub const COMMON: ResourceState = ResourceState::empty();

    /// True if every set bit is a read bit. The common state is not read-only.
    pub fn is_read_only(self) -> bool {
        !self.is_empty() && ResourceState::READ_ANY.contains(self)
    }

    /// True if any write bit is set.
    pub fn is_write(self) -> bool {
        self.intersects(ResourceState::WRITE_ANY)
    }

    /// Two states may share a merged group only when both are read-only.
    pub fn compatible(self, other: ResourceState) -> bool {
        self.is_read_only() && other.is_read_only()
    }
}

/// Identifies one texture usage: which pass, which slot, input or target.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct UsageRef {
    /// Index into the resolved pass list.
    pub pass: usize,
    /// Slot index within the pass's inputs or targets.
    pub slot: usize,
    /// True for a target slot, false for an input slot.
    pub is_target: bool,
}

/// The planned state triple of one usage. Owned by the planner, read-only afterwards.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UsageState {
    /// Merged state of the neighboring usage before this one (cyclic).
    pub previous: ResourceState,
    /// Merged state this usage executes in.
    pub current: ResourceState,
    /// Merged state of the neighboring usage after this one (cyclic).
    pub next: ResourceState,
    /// A barrier must be recorded immediately after the owning pass, so a cross-queue
    /// hand-off always begins from a known state.
    pub barrier_after: bool,
}

impl UsageState {
    /// True if a state transition must be recorded before the owning pass.
    pub fn needs_transition(&self) -> bool {
        self.previous != self.current
    }
}

/// The per-texture state timeline: every usage in pass order with its planned states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureTimeline {
    /// Texture this timeline belongs to.
    pub texture: String,
    /// Usages in pass order.
    pub usages: Vec<(UsageRef, UsageState)>,
}

/// The finished plan for every texture in the graph.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatePlan {
    timelines: Vec<TextureTimeline>,
    by_texture: HashMap<String, usize>,
}

impl StatePlan {
    /// Timeline of one texture.
    pub fn timeline(&self, texture: &str) -> Option<&TextureTimeline> {
        self.by_texture.get(texture).map(|&i| &self.timelines[i])
    }

    /// All timelines, sorted by texture name.
    pub fn timelines(&self) -> &[TextureTimeline] {
        &self.timelines
    }

    /// Every planned usage of one pass, for recording transitions.
    pub fn pass_usages(&self, pass: usize) -> Vec<(&str, UsageRef, &UsageState)> {
        let mut out = Vec::new();
        for timeline in &self.timelines {
            for (usage, state) in &timeline.usages {
                if usage.pass == pass {
                    out.push((timeline.texture.as_str(), *usage, state));
                }
            }
        }
        out
    }

    /// State a fresh texture should be created in: the state preceding its first
    /// usage, so the first recorded transition starts from the right place.
    pub fn creation_state(&self, texture: &str) -> Option<ResourceState> {
        self.timeline(texture)
            .and_then(|t| t.usages.first())
            .map(|(_, state)| state.previous)
    }

    /// Number of mandatory transitions in the plan, for build summaries.
    pub fn transition_count(&self) -> usize {
        self.timelines
            .iter()
            .flat_map(|t| &t.usages)
            .filter(|(_, s)| s.needs_transition())
            .count()
    }
}

struct PlannedUsage {
    usage: UsageRef,
    queue: QueueKind,
    required: ResourceState,
}

/// Fixed lookup from slot flags to the required resource state.
fn required_state(
    slot: &PassSlot,
    is_target: bool,
    is_depth: bool,
    queue: QueueKind,
) -> ResourceState {
    if is_target {
        if is_depth {
            ResourceState::DEPTH_WRITE
        } else if slot.flags.contains(SlotFlags::COMPUTE) {
            ResourceState::UNORDERED_ACCESS
        } else {
            ResourceState::RENDER_TARGET
        }
    } else if slot.flags.contains(SlotFlags::COMPUTE) {
        ResourceState::UNORDERED_ACCESS
    } else {
        let shader = if queue == QueueKind::Async {
            ResourceState::NON_PIXEL_SHADER_RESOURCE
        } else {
            ResourceState::PIXEL_SHADER_RESOURCE
        };
        if slot.flags.contains(SlotFlags::DEPTH_READ) {
            ResourceState::DEPTH_READ | shader
        } else {
            shader
        }
    }
}

/// Compute the state timeline of every texture used by `passes`.
///
/// `depth_textures` names the depth-stencil resources; `presentable` names textures
/// whose final write hands them to the presentation engine. Planning is deterministic:
/// the same pass list always yields the same plan.
pub fn plan_states(
    passes: &[ResolvedPass],
    depth_textures: &HashSet<String>,
    presentable: &HashSet<String>,
) -> Result<StatePlan> {
    // Collect usages per texture, in pass order, inputs before targets.
    let mut usages: MultiMap<String, PlannedUsage> = MultiMap::new();
    for (pass_index, pass) in passes.iter().enumerate() {
        let slots = pass
            .inputs
            .iter()
            .enumerate()
            .map(|(i, s)| (i, false, s))
            .chain(pass.targets.iter().enumerate().map(|(i, s)| (i, true, s)));
        for (slot_index, is_target, slot) in slots {
            let queue = if slot.flags.contains(SlotFlags::ASYNC) {
                QueueKind::Async
            } else {
                pass.queue
            };
            usages.insert(
                slot.texture.clone(),
                PlannedUsage {
                    usage: UsageRef {
                        pass: pass_index,
                        slot: slot_index,
                        is_target,
                    },
                    queue,
                    required: required_state(
                        slot,
                        is_target,
                        depth_textures.contains(&slot.texture),
                        queue,
                    ),
                },
            );
        }
    }

    let mut names: Vec<&String> = usages.keys().collect();
    names.sort();

    let mut plan = StatePlan::default();
    for name in names {
        let list = usages.get_vec(name).unwrap();
        let timeline = plan_texture(name, list, passes, presentable)?;
        plan.by_texture.insert(name.clone(), plan.timelines.len());
        plan.timelines.push(timeline);
    }
    Ok(plan)
}

fn plan_texture(
    texture: &str,
    list: &[PlannedUsage],
    passes: &[ResolvedPass],
    presentable: &HashSet<String>,
) -> Result<TextureTimeline> {
    // The final write of a presentable texture is planned directly in the present
    // state; the device splits the write/present transition when recording.
    let final_write = if presentable.contains(texture) {
        list.iter().rposition(|u| u.required.is_write())
    } else {
        None
    };
    let required = |i: usize| {
        if Some(i) == final_write {
            ResourceState::PRESENT
        } else {
            list[i].required
        }
    };

    // Greedy left-to-right grouping into maximal read-compatible runs.
    let mut run_of = vec![0usize; list.len()];
    let mut run_states: Vec<ResourceState> = Vec::new();
    for i in 0..list.len() {
        let state = required(i);
        match run_states.last_mut() {
            Some(last) if last.compatible(state) => {
                *last |= state;
                run_of[i] = run_states.len() - 1;
            }
            _ => {
                run_states.push(state);
                run_of[i] = run_states.len() - 1;
            }
        }
    }

    // Treat the sequence as cyclic across frames: merge the end run into the begin
    // run when the two are read-compatible.
    if run_states.len() >= 2 {
        let first = *run_states.first().unwrap();
        let last = *run_states.last().unwrap();
        if first.compatible(last) {
            let merged = first | last;
            *run_states.first_mut().unwrap() = merged;
            *run_states.last_mut().unwrap() = merged;
        }
    }

    let current = |i: usize| run_states[run_of[i]];

    // Cross-queue discipline. A queue change between two merged groups without a
    // declared signal/wait pair cannot be fixed up at execution time, so it fails the
    // build here. Queue changes inside one read-only group share the state; the last
    // sync-queue usage before async work is marked for a forced barrier instead.
    let mut barrier_after = vec![false; list.len()];
    for i in 0..list.len().saturating_sub(1) {
        let (a, b) = (&list[i], &list[i + 1]);
        if a.queue == b.queue {
            continue;
        }
        if a.queue == QueueKind::Sync {
            barrier_after[i] = true;
        }
        if run_of[i] == run_of[i + 1] {
            continue;
        }
        if !has_sync_pair(passes, a.usage.pass, a.queue, b.usage.pass, b.queue) {
            return Err(Error::CrossQueueHazard {
                texture: texture.to_owned(),
                producer: passes[a.usage.pass].name.clone(),
                consumer: passes[b.usage.pass].name.clone(),
            }
            .into());
        }
    }

    let n = list.len();
    let usages = (0..n)
        .map(|i| {
            let state = UsageState {
                previous: current((i + n - 1) % n),
                current: current(i),
                next: current((i + 1) % n),
                barrier_after: barrier_after[i],
            };
            (list[i].usage, state)
        })
        .collect();

    Ok(TextureTimeline {
        texture: texture.to_owned(),
        usages,
    })
}

/// True if a signal on `from_queue` and a wait on `to_queue` for the same fence are
/// declared between the producing and consuming pass (inclusive), with the signal not
/// after the wait.
fn has_sync_pair(
    passes: &[ResolvedPass],
    from_pass: usize,
    from_queue: QueueKind,
    to_pass: usize,
    to_queue: QueueKind,
) -> bool {
    let mut signals: Vec<(usize, &str)> = Vec::new();
    let mut waits: Vec<(usize, &str)> = Vec::new();
    for index in from_pass..=to_pass {
        for marker in &passes[index].sync {
            match marker.op {
                SyncOp::Signal if marker.queue == from_queue => {
                    signals.push((index, marker.fence.as_str()));
                }
                SyncOp::Wait if marker.queue == to_queue => {
                    waits.push((index, marker.fence.as_str()));
                }
                _ => {}
            }
        }
    }
    signals
        .iter()
        .any(|&(s, fence)| waits.iter().any(|&(w, f)| f == fence && s <= w))
}
