//! Texture declarations of a compositor graph.

use crate::core::config::CompositorConfig;

/// How a texture's dimensions are computed at allocation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeRule {
    /// Literal width and height in texels.
    Fixed {
        /// Width in texels.
        width: u32,
        /// Height in texels.
        height: u32,
    },
    /// Scaled from the render target resolution: `size * num / div`.
    TargetScaled {
        /// Numerator of the scale.
        num: u32,
        /// Denominator of the scale.
        div: u32,
    },
    /// Scaled from the output resolution: `size * num / div`.
    OutputScaled {
        /// Numerator of the scale.
        num: u32,
        /// Denominator of the scale.
        div: u32,
    },
    /// Sentinel for an unrecognized sizing token. Resolves to 1x1 so the mistake is
    /// visible on screen instead of failing the parse.
    Invalid,
}

impl SizeRule {
    /// Resolve against the current render and output resolutions.
    pub fn resolve(&self, config: &CompositorConfig) -> (u32, u32) {
        let scale = |(w, h): (u32, u32), num: u32, div: u32| {
            ((w * num / div).max(1), (h * num / div).max(1))
        };
        match *self {
            SizeRule::Fixed { width, height } => (width.max(1), height.max(1)),
            SizeRule::TargetScaled { num, div } => scale(config.render_resolution(), num, div),
            SizeRule::OutputScaled { num, div } => scale(config.output_resolution(), num, div),
            SizeRule::Invalid => (1, 1),
        }
    }
}

/// Texel formats the description format knows by name.
///
/// The set mirrors what the description format can spell; the device maps these onto
/// its own format enumeration behind the [`RenderDevice`](crate::core::device::RenderDevice)
/// boundary.
#[derive(Debug, Default, Copy, Clone, Hash, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum TextureFormat {
    Rgba8,
    Rgba16F,
    Rgba32F,
    Rgb10A2,
    Rg8,
    Rg16F,
    R8,
    R16F,
    R32F,
    R32U,
    D32F,
    D24S8,
    /// Sentinel for an unrecognized format token. Deliberately not a parse failure:
    /// the texture shows up visibly wrong instead, and validation happens later.
    #[default]
    Unknown,
}

impl TextureFormat {
    /// Map a description token onto a format. Unknown tokens map to the sentinel.
    pub fn from_token(token: &str) -> TextureFormat {
        match token {
            "RGBA8" => TextureFormat::Rgba8,
            "RGBA16F" => TextureFormat::Rgba16F,
            "RGBA32F" => TextureFormat::Rgba32F,
            "RGB10A2" => TextureFormat::Rgb10A2,
            "RG8" => TextureFormat::Rg8,
            "RG16F" => TextureFormat::Rg16F,
            "R8" => TextureFormat::R8,
            "R16F" => TextureFormat::R16F,
            "R32F" => TextureFormat::R32F,
            "R32U" => TextureFormat::R32U,
            "D32F" => TextureFormat::D32F,
            "D24S8" => TextureFormat::D24S8,
            _ => TextureFormat::Unknown,
        }
    }

    /// True for depth-stencil formats.
    pub fn is_depth(self) -> bool {
        matches!(self, TextureFormat::D32F | TextureFormat::D24S8)
    }
}

/// One texture declaration. Identity is the (scope-prefixed) name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDescriptor {
    /// Scoped name, unique within the graph.
    pub name: String,
    /// Sizing rule, evaluated at allocation time.
    pub size: SizeRule,
    /// Texel format.
    pub format: TextureFormat,
    /// Number of array slices.
    pub array_size: u32,
    /// Declared with `rwtexture`: usable for unordered access from compute.
    pub unordered_access: bool,
    /// Depth-stencil resource, from a `:Depth` name suffix or a depth format.
    pub depth_stencil: bool,
    /// Resolved from another graph's view table instead of allocated here.
    pub imported: bool,
}

impl TextureDescriptor {
    /// New color texture with default attributes.
    pub fn new(name: impl Into<String>, size: SizeRule, format: TextureFormat) -> Self {
        let name = name.into();
        let depth_stencil = name.ends_with(":Depth") || format.is_depth();
        TextureDescriptor {
            name,
            size,
            format,
            array_size: 1,
            unordered_access: false,
            depth_stencil,
            imported: false,
        }
    }
}
