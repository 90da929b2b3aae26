pub use crate::compositor::Compositor;

pub use crate::core::config::{CompositorConfig, UpscalerMode};
pub use crate::core::device::{CommandList, FencePrimitive, RenderDevice, TextureCreateInfo, TextureHandle};
pub use crate::core::error::Error;
pub use crate::core::view_table::ViewTable;

pub use crate::sync::domain::QueueKind;
pub use crate::sync::fence::{Fence, FencePool, FenceRef};

pub use crate::graph::builder::{BuiltGraph, ResolvedPass};
pub use crate::graph::parser::{GraphLibrary, SubstitutionContext};
pub use crate::graph::pass::{PassDescriptor, PassKind, PassSlot, SlotFlags, SyncMarker, SyncOp};
pub use crate::graph::schedule::{BatchItem, FrameSchedule, TaskBatch};
pub use crate::graph::state::{ResourceState, StatePlan, UsageState};
pub use crate::graph::texture::{SizeRule, TextureDescriptor, TextureFormat};
pub use crate::graph::CompositorGraph;

pub use crate::task::{
    AsyncSubtask, CompositorTask, FrameContext, SubtaskCommands, TaskContext, TaskRegistry,
};
