//! The compositor front end.
//!
//! [`Compositor`] ties the pipeline together: it owns the graph library, the task
//! registry, the fence pool, the shared view table and the currently active built
//! graph. Everything it holds is explicit state, with no process-wide singletons, so two
//! compositors with different devices or configurations can coexist.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;

use crate::core::config::{CompositorConfig, UpscalerMode};
use crate::core::device::RenderDevice;
use crate::core::error::Error;
use crate::core::view_table::ViewTable;
use crate::graph::builder::{build_graph, BuiltGraph};
use crate::graph::parser::{GraphLibrary, SubstitutionContext};
use crate::sync::fence::FencePool;
use crate::task::TaskRegistry;

/// Owns the full compositor pipeline for one device.
pub struct Compositor {
    device: Arc<dyn RenderDevice>,
    config: CompositorConfig,
    views: ViewTable,
    library: GraphLibrary,
    registry: TaskRegistry,
    fences: FencePool,
    built: Option<BuiltGraph>,
}

impl Compositor {
    /// Create a compositor over a device with the given configuration and task
    /// registry. No device objects are created until a graph is activated.
    pub fn new(
        device: Arc<dyn RenderDevice>,
        config: CompositorConfig,
        registry: TaskRegistry,
    ) -> Self {
        Compositor {
            device,
            config,
            views: ViewTable::new(),
            library: GraphLibrary::new(),
            registry,
            fences: FencePool::new(),
            built: None,
        }
    }

    /// Register every compositor block in `text` with the graph library. Returns the
    /// names registered. Reloading a file with a block of the same name replaces it.
    pub fn load_source(&mut self, text: &str) -> Result<Vec<String>> {
        self.library.parse_file(text)
    }

    /// Parse and build the named graph and make it the active one. Textures of a
    /// previous build of the same graph are reused when unchanged; a different graph
    /// releases them first.
    pub fn activate(&mut self, name: &str) -> Result<()> {
        let graph = self.library.build_graph(name, SubstitutionContext::root())?;
        let previous = match self.built.take() {
            Some(old) if old.name == name => old.textures,
            Some(old) => {
                release_textures(&self.device, old);
                HashMap::new()
            }
            None => HashMap::new(),
        };
        let built = build_graph(
            graph,
            &self.registry,
            &self.device,
            &self.config,
            &mut self.views,
            &mut self.fences,
            previous,
        )?;
        self.built = Some(built);
        Ok(())
    }

    /// Rebuild the active graph from its (possibly re-loaded) source. Fences and
    /// unchanged textures survive; the plan is torn down and rebuilt.
    pub fn rebuild(&mut self) -> Result<()> {
        let name = self
            .built
            .as_ref()
            .map(|b| b.name.clone())
            .ok_or(Error::Uncategorized("no active graph"))?;
        self.activate(&name)
    }

    /// Apply new render and output resolutions and reload textures sized from them.
    /// Idempotent; calling with unchanged resolutions recreates nothing.
    pub fn resize(&mut self, output_width: u32, output_height: u32) -> Result<()> {
        self.config.render_width = output_width;
        self.config.render_height = output_height;
        self.config.output_width = output_width;
        self.config.output_height = output_height;
        self.reload_textures()
    }

    /// Toggle the upscaler mode. A change reloads every texture sized from the render
    /// resolution; externally cached view handles become stale.
    pub fn set_upscaler(&mut self, mode: UpscalerMode) -> Result<()> {
        if !self.config.apply_upscaler(mode) {
            return Ok(());
        }
        self.reload_textures()
    }

    /// Reload the active graph's textures against the current configuration.
    pub fn reload_textures(&mut self) -> Result<()> {
        if let Some(built) = &mut self.built {
            built.reload_textures(&self.device, &self.config, &mut self.views)?;
        }
        Ok(())
    }

    /// Execute one frame of the active graph.
    pub fn render_frame(&mut self) -> Result<()> {
        let built = self
            .built
            .as_mut()
            .ok_or(Error::Uncategorized("no active graph"))?;
        built.execute_frame(&self.device, &self.config, &self.views, &mut self.fences)
    }

    /// The shared view table.
    pub fn views(&self) -> &ViewTable {
        &self.views
    }

    /// The active built graph, if any.
    pub fn built(&self) -> Option<&BuiltGraph> {
        self.built.as_ref()
    }

    /// Current configuration.
    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// The task registry, for registering factories before activation.
    pub fn registry_mut(&mut self) -> &mut TaskRegistry {
        &mut self.registry
    }
}

fn release_textures(device: &Arc<dyn RenderDevice>, built: BuiltGraph) {
    for (_, allocated) in built.textures {
        if !allocated.external {
            device.destroy_texture(allocated.handle);
        }
    }
}
