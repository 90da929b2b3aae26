//! Compositor configuration.
//!
//! The configuration is an explicit value passed into graph builds. There is no global
//! state: two compositors with different configurations can coexist in one process.

/// Upscaler operating mode. Toggling the mode changes the render resolution relative to
/// the output resolution and triggers a texture reload.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum UpscalerMode {
    /// Render at output resolution.
    #[default]
    Off,
    /// Render at 77% of output resolution.
    Quality,
    /// Render at 67% of output resolution.
    Balanced,
    /// Render at 50% of output resolution.
    Performance,
}

impl UpscalerMode {
    /// Render resolution scale for this mode, in percent.
    pub fn scale_percent(self) -> u32 {
        match self {
            UpscalerMode::Off => 100,
            UpscalerMode::Quality => 77,
            UpscalerMode::Balanced => 67,
            UpscalerMode::Performance => 50,
        }
    }
}

/// Resolutions and output behavior the graph build evaluates texture sizes against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositorConfig {
    /// Width textures sized `target_size` resolve against.
    pub render_width: u32,
    /// Height textures sized `target_size` resolve against.
    pub render_height: u32,
    /// Width textures sized `output_size` resolve against.
    pub output_width: u32,
    /// Height textures sized `output_size` resolve against.
    pub output_height: u32,
    /// When set, the `Output` texture aliases the swap chain back buffer instead of
    /// being allocated, and its final write is planned to end in the present state.
    pub render_to_output: bool,
    /// Active upscaler mode. Applied to the render resolution by [`CompositorConfig::apply_upscaler`].
    pub upscaler: UpscalerMode,
}

impl CompositorConfig {
    /// Effective render resolution with the upscaler scale applied.
    pub fn render_resolution(&self) -> (u32, u32) {
        let scale = self.upscaler.scale_percent();
        (
            (self.render_width * scale / 100).max(1),
            (self.render_height * scale / 100).max(1),
        )
    }

    /// Output resolution.
    pub fn output_resolution(&self) -> (u32, u32) {
        (self.output_width, self.output_height)
    }

    /// Switch upscaler modes. Returns true if the mode changed and textures sized from
    /// the render resolution must be reloaded.
    pub fn apply_upscaler(&mut self, mode: UpscalerMode) -> bool {
        if self.upscaler == mode {
            return false;
        }
        self.upscaler = mode;
        true
    }
}

impl Default for CompositorConfig {
    fn default() -> Self {
        CompositorConfig {
            render_width: 1920,
            render_height: 1080,
            output_width: 1920,
            output_height: 1080,
            render_to_output: false,
            upscaler: UpscalerMode::Off,
        }
    }
}
