//! Declarative frame graph compositor
//!
//! Deimos turns a textual description of a frame's render passes and GPU textures into
//! an executable plan: resource state transitions are computed automatically, passes are
//! batched into as few command list submissions as possible, and work is scheduled across
//! two independent hardware queues (the sync/graphics queue and the async/compute queue)
//! with fence synchronization derived from explicit sync markers in the description.
//!
//! The compositor does not talk to any graphics API directly. All device interaction goes
//! through the [`RenderDevice`] trait, which hands out opaque handles the compositor never
//! interprets. Rendering work itself is implemented by collaborators through the
//! [`CompositorTask`] trait and registered by name in a [`TaskRegistry`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use deimos::prelude::*;
//!
//! # fn example(device: Arc<dyn RenderDevice>) -> anyhow::Result<()> {
//! let config = CompositorConfig {
//!     render_width: 1920,
//!     render_height: 1080,
//!     output_width: 1920,
//!     output_height: 1080,
//!     render_to_output: true,
//!     upscaler: UpscalerMode::Off,
//! };
//! let registry = TaskRegistry::new();
//! // Register task factories for every task type the description may reference, e.g.
//! // registry.register("ssao", |ctx| Box::new(SsaoTask::new(ctx)));
//!
//! let mut compositor = Compositor::new(device, config, registry);
//! compositor.load_source(
//!     r#"
//!     compositor main {
//!         texture sceneColor target_size RGBA16F;
//!         pass opaque {
//!             target sceneColor;
//!             material scene_opaque;
//!         }
//!     }
//!     "#,
//! )?;
//! compositor.activate("main")?;
//! loop {
//!     compositor.render_frame()?;
//! }
//! # }
//! ```
//!
//! For further documentation, check out the following modules
//! - [`graph`] for the graph description format, the pass builder, the resource state
//!   planner and the batch scheduler.
//! - [`task`] for the collaborator task interface and the task registry.
//! - [`sync`] for queue kinds and cross-queue fences.
//! - [`core`] for the device boundary, configuration and the shared view table.

#[macro_use]
extern crate derivative;
#[macro_use]
extern crate log;

pub mod prelude;
pub use crate::prelude::*;

pub mod compositor;
pub mod core;
pub mod graph;
pub mod sync;
pub mod task;
