//! Pass declarations of a compositor graph.
//!
//! A pass is either a fixed-function draw bound to a material, or an invocation of a
//! named task type. Slots carry usage flags the resource state planner derives required
//! states from; sync markers declare the cross-queue fences the scheduler attaches to
//! batches.

use bitflags::bitflags;

use crate::sync::domain::QueueKind;

bitflags! {
    /// Usage flags of a texture slot, straight from the description's flag tokens.
    #[derive(Debug, Default, Copy, Clone, Hash, PartialEq, Eq)]
    pub struct SlotFlags: u32 {
        /// `(read)`: sampled in a pixel shader.
        const READ = 1 << 0;
        /// `(compute_shader)`: read-write access from a compute shader.
        const COMPUTE = 1 << 1;
        /// `(depth_read)`: sampled as a read-only depth buffer.
        const DEPTH_READ = 1 << 2;
        /// `(async)`: this usage belongs to the async compute timeline even if the
        /// owning pass runs on the sync queue.
        const ASYNC = 1 << 3;
    }
}

impl SlotFlags {
    /// Map a description flag token, if it is one.
    pub fn from_token(token: &str) -> Option<SlotFlags> {
        match token {
            "read" => Some(SlotFlags::READ),
            "compute_shader" => Some(SlotFlags::COMPUTE),
            "depth_read" => Some(SlotFlags::DEPTH_READ),
            "async" => Some(SlotFlags::ASYNC),
            _ => None,
        }
    }
}

/// One input or target slot of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSlot {
    /// Referenced texture name. May be an MRT base name before builder expansion.
    pub texture: String,
    /// Usage flags of this slot.
    pub flags: SlotFlags,
}

impl PassSlot {
    /// New slot with the given flags.
    pub fn new(texture: impl Into<String>, flags: SlotFlags) -> Self {
        PassSlot {
            texture: texture.into(),
            flags,
        }
    }
}

/// Direction of an explicit sync marker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncOp {
    /// Flush the current batches and signal the fence after the closed batch.
    Signal,
    /// Make the next batch on the marker's queue wait for the fence.
    Wait,
}

/// An explicit cross-queue synchronization declaration on a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMarker {
    /// Name of the fence, shared between the signaling and the waiting pass.
    pub fence: String,
    /// Signal or wait.
    pub op: SyncOp,
    /// Queue the signal or wait is issued on.
    pub queue: QueueKind,
}

/// What a pass executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassKind {
    /// Fixed-function draw bound to a material. Rendered by the task registered under
    /// [`MATERIAL_TASK`](crate::task::MATERIAL_TASK), if any.
    Material {
        /// Material name, resolved by the collaborator.
        material: String,
    },
    /// Invocation of a named task type. Passes sharing a task type share the instance.
    Task {
        /// Task type name, resolved against the task registry.
        task_type: String,
        /// Task-level flag tokens from the declaration, e.g. `(compute_shader)`.
        flags: SlotFlags,
        /// Optional entry point forwarded to the task.
        entry: Option<String>,
    },
}

/// One step of the frame graph, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassDescriptor {
    /// Pass name. `after` hints reference passes by this name.
    pub name: String,
    /// Material draw or task invocation.
    pub kind: PassKind,
    /// Ordered input slots.
    pub inputs: Vec<PassSlot>,
    /// Ordered output/target slots.
    pub targets: Vec<PassSlot>,
    /// Ordering hint: this pass must not share a batch with the named pass and must
    /// execute after it.
    pub after: Option<String>,
    /// Explicit sync markers, applied by the scheduler in declaration order.
    pub sync: Vec<SyncMarker>,
}

impl PassDescriptor {
    /// New material pass.
    pub fn material(name: impl Into<String>, material: impl Into<String>) -> Self {
        PassDescriptor {
            name: name.into(),
            kind: PassKind::Material {
                material: material.into(),
            },
            inputs: Vec::new(),
            targets: Vec::new(),
            after: None,
            sync: Vec::new(),
        }
    }

    /// New task pass. The pass name doubles as the task type name.
    pub fn task(name: impl Into<String>, flags: SlotFlags) -> Self {
        let name = name.into();
        PassDescriptor {
            kind: PassKind::Task {
                task_type: name.clone(),
                flags,
                entry: None,
            },
            name,
            inputs: Vec::new(),
            targets: Vec::new(),
            after: None,
            sync: Vec::new(),
        }
    }

    /// Task type name, or `None` for material passes.
    pub fn task_type(&self) -> Option<&str> {
        match &self.kind {
            PassKind::Task { task_type, .. } => Some(task_type),
            PassKind::Material { .. } => None,
        }
    }

    /// Queue the description asks for. Compute tasks run on the async queue; the
    /// builder overrides this back to the sync queue when the task instance reports
    /// `writes_sync_compute_commands()`.
    pub fn declared_queue(&self) -> QueueKind {
        match &self.kind {
            PassKind::Task { flags, .. } if flags.contains(SlotFlags::COMPUTE) => QueueKind::Async,
            _ => QueueKind::Sync,
        }
    }
}
