//! The device boundary of the compositor.
//!
//! The compositor never talks to a graphics API directly. Everything it needs from the
//! GPU goes through [`RenderDevice`], implemented by the engine embedding it. Handles
//! returned from the device are opaque: the compositor stores and forwards them but
//! never interprets their contents, so any backend (D3D12, Vulkan, a mock recorder in
//! tests) can sit behind the trait.

use anyhow::Result;

use crate::graph::state::ResourceState;
use crate::graph::texture::TextureFormat;
use crate::sync::domain::QueueKind;

/// Opaque handle to a GPU texture.
#[derive(Debug, Default, Copy, Clone, Hash, Eq, PartialEq)]
pub struct TextureHandle(pub u64);

/// Opaque handle to a command list in recording or executable state.
#[derive(Debug, Default, Copy, Clone, Hash, Eq, PartialEq)]
pub struct CommandList(pub u64);

/// Opaque handle to a queue synchronization primitive. The monotonic counter lives in
/// [`Fence`](crate::sync::fence::Fence), not here.
#[derive(Debug, Default, Copy, Clone, Hash, Eq, PartialEq)]
pub struct FencePrimitive(pub u64);

/// Everything the device needs to create a texture for the compositor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureCreateInfo {
    /// Fully scoped texture name, useful for debug markers.
    pub name: String,
    /// Resolved width in texels.
    pub width: u32,
    /// Resolved height in texels.
    pub height: u32,
    /// Texel format. May be [`TextureFormat::Unknown`] if the description used an
    /// unrecognized token; the device is free to substitute anything visibly wrong.
    pub format: TextureFormat,
    /// Number of array slices.
    pub array_size: u32,
    /// Texture must support unordered access (declared with `rwtexture`).
    pub unordered_access: bool,
    /// Texture is a depth-stencil resource (`:Depth` suffix or depth format).
    pub depth_stencil: bool,
    /// Resource state the texture starts its life in. On a reload this is the state the
    /// previous incarnation was left in, so in-flight plans stay correct.
    pub initial_state: ResourceState,
}

/// Interface between the compositor and the GPU, implemented by the embedding engine.
///
/// All methods take `&self`; implementations are expected to handle their own interior
/// synchronization. The trait is object safe so the compositor can hold it as
/// `Arc<dyn RenderDevice>`.
pub trait RenderDevice: Send + Sync {
    /// Create a texture. Failure is logged by the builder and leaves the previously
    /// created resources in place.
    fn create_texture(&self, info: &TextureCreateInfo) -> Result<TextureHandle>;

    /// Destroy a texture previously returned from [`RenderDevice::create_texture`].
    fn destroy_texture(&self, texture: TextureHandle);

    /// Handle aliasing the swap chain back buffer. Used for the `Output` texture when
    /// the engine is configured to render directly to it.
    fn back_buffer(&self) -> TextureHandle;

    /// Create a queue synchronization primitive for a cross-queue fence.
    fn create_fence(&self) -> Result<FencePrimitive>;

    /// Open a command list for recording on the given queue.
    fn open_command_list(&self, queue: QueueKind) -> Result<CommandList>;

    /// Record a resource state transition into an open command list.
    fn transition(
        &self,
        cmd: CommandList,
        texture: TextureHandle,
        from: ResourceState,
        to: ResourceState,
    ) -> Result<()>;

    /// Close the given command lists and submit them to a queue in order.
    fn submit(&self, queue: QueueKind, lists: &[CommandList]) -> Result<()>;

    /// Signal `fence` to `value` on `queue`, after all previously submitted work.
    fn signal(&self, queue: QueueKind, fence: FencePrimitive, value: u64) -> Result<()>;

    /// Make `queue` wait until `fence` reaches `value` before executing further work.
    fn wait(&self, queue: QueueKind, fence: FencePrimitive, value: u64) -> Result<()>;
}
