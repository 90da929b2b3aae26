//! The collaborator task interface.
//!
//! Anything that records actual GPU work implements [`CompositorTask`] and is registered
//! under a string name in a [`TaskRegistry`]. The graph description references task
//! types by that name; the builder creates **one instance per task type** and shares it
//! between all passes declaring the same type.
//!
//! Tasks that record work on worker threads return [`AsyncSubtask`]s from
//! [`CompositorTask::initialize`]. The scheduler places subtasks into async batches, and
//! the execution engine joins their finished command lists with a wait-any each frame.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures::channel::oneshot;

use crate::core::config::CompositorConfig;
use crate::core::device::{CommandList, RenderDevice};
use crate::core::view_table::ViewTable;
use crate::graph::builder::ResolvedPass;
use crate::graph::pass::PassDescriptor;
use crate::graph::state::StatePlan;

/// Context handed to tasks during graph build (initialize and resize).
pub struct TaskContext<'a> {
    /// The device boundary.
    pub device: &'a Arc<dyn RenderDevice>,
    /// Current configuration, including the resolutions texture sizes resolved against.
    pub config: &'a CompositorConfig,
    /// The shared view table. Textures of the graph being built are published before
    /// `resize` runs, so tasks cache their device-side handles here.
    pub views: &'a ViewTable,
    /// Name of the graph being built, for scoped view table lookups.
    pub graph: &'a str,
}

impl TaskContext<'_> {
    /// Resolve a texture of the current graph from the view table.
    pub fn view(&self, texture: &str) -> Option<crate::core::device::TextureHandle> {
        self.views.resolve(&format!("{}:{}", self.graph, texture))
    }
}

/// Context handed to tasks every frame while recording.
pub struct FrameContext<'a> {
    /// The device boundary.
    pub device: &'a Arc<dyn RenderDevice>,
    /// Current configuration.
    pub config: &'a CompositorConfig,
    /// The shared view table.
    pub views: &'a ViewTable,
    /// The precomputed state plan, read-only during execution.
    pub plan: &'a StatePlan,
    /// Name of the executing graph.
    pub graph: &'a str,
    /// Monotonic frame counter.
    pub frame_index: u64,
}

impl FrameContext<'_> {
    /// Resolve a texture of the executing graph from the view table.
    pub fn view(&self, texture: &str) -> Option<crate::core::device::TextureHandle> {
        self.views.resolve(&format!("{}:{}", self.graph, texture))
    }
}

/// Command lists produced by an async subtask for one frame.
#[derive(Derivative)]
#[derivative(Debug)]
pub enum SubtaskCommands {
    /// The list was recorded inline and is ready to submit.
    Ready(CommandList),
    /// The list is being recorded on a worker thread; the receiver completes when the
    /// worker finishes. The execution engine joins these with a wait-any.
    Deferred(#[derivative(Debug = "ignore")] oneshot::Receiver<CommandList>),
}

/// Recording entry point of an async subtask, invoked once per frame.
pub type BoxedSubtaskFn = Box<dyn FnMut(&FrameContext) -> Result<SubtaskCommands> + Send>;

/// A unit of async compute work registered by a task during `initialize`.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct AsyncSubtask {
    /// Display name, used in logs and batch dumps.
    pub name: String,
    /// Per-frame recording entry point.
    #[derivative(Debug = "ignore")]
    pub record: BoxedSubtaskFn,
}

/// Interface implemented by everything that records GPU work for the compositor.
///
/// Only [`run`](CompositorTask::run) is required. The default capability queries
/// describe a plain graphics task with no async subtasks and no ordering constraints.
pub trait CompositorTask {
    /// Called once at graph build for every pass using this task. May register async
    /// subtasks (e.g. shadow map or voxelization work recorded on worker threads).
    fn initialize(
        &mut self,
        _pass: &PassDescriptor,
        _ctx: &mut TaskContext,
    ) -> Result<Vec<AsyncSubtask>> {
        Ok(Vec::new())
    }

    /// Called after every texture (re)allocation so the task can cache device handles.
    fn resize(&mut self, _pass: &PassDescriptor, _ctx: &TaskContext) -> Result<()> {
        Ok(())
    }

    /// Record this pass into a sync-queue command list.
    fn run(&mut self, ctx: &FrameContext, cmd: CommandList, pass: &ResolvedPass) -> Result<()>;

    /// Record this pass into a compute command list. Defaults to [`run`](CompositorTask::run).
    fn run_compute(
        &mut self,
        ctx: &FrameContext,
        cmd: CommandList,
        pass: &ResolvedPass,
    ) -> Result<()> {
        self.run(ctx, cmd, pass)
    }

    /// True if the task records commands into the sync-queue list of its pass.
    fn writes_sync_commands(&self) -> bool {
        true
    }

    /// True if the task's compute dispatches must run on the sync queue even when its
    /// pass declares `compute_shader`.
    fn writes_sync_compute_commands(&self) -> bool {
        false
    }

    /// True if the task's subtasks must execute strictly ordered, one per batch.
    fn force_task_order(&self) -> bool {
        false
    }
}

/// Factory closure producing a task instance.
pub type TaskFactory = Box<dyn Fn(&mut TaskContext) -> Box<dyn CompositorTask>>;

/// Reserved task type name the builder resolves material passes against. Register a
/// factory under this name to render fixed-function material draws; without one,
/// material passes record nothing.
pub const MATERIAL_TASK: &str = "material";

/// Registry of named task factories.
///
/// Registration is explicit and happens before graph build; the builder resolves every
/// name exactly once per build instead of comparing strings per frame.
#[derive(Derivative, Default)]
#[derivative(Debug)]
pub struct TaskRegistry {
    #[derivative(Debug = "ignore")]
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for a task type. Replaces any previous registration.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&mut TaskContext) -> Box<dyn CompositorTask> + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Instantiate a task type, or `None` if no factory is registered. The caller is
    /// responsible for sharing the instance between passes of the same type.
    pub fn create(&self, name: &str, ctx: &mut TaskContext) -> Option<Box<dyn CompositorTask>> {
        self.factories.get(name).map(|factory| factory(ctx))
    }

    /// True if a factory is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}
