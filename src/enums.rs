use std::{fmt, str::FromStr};

use crate::error::RenderError;

/// Slice orientation, named after the display axis that is held fixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    /// Z is fixed
    Axial,
    /// Y is fixed
    Coronal,
    /// X is fixed
    Sagittal,
}

impl Orientation {
    /// Returns the (horizontal, vertical, depth) display axes.
    pub fn axes(self) -> (usize, usize, usize) {
        match self {
            Orientation::Axial => (0, 1, 2),
            Orientation::Coronal => (0, 2, 1),
            Orientation::Sagittal => (1, 2, 0),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    #[default]
    Nearest,
    Linear,
}

impl From<Interpolation> for wgpu::FilterMode {
    fn from(interp: Interpolation) -> Self {
        match interp {
            Interpolation::Nearest => wgpu::FilterMode::Nearest,
            Interpolation::Linear => wgpu::FilterMode::Linear,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Space {
    Voxel,
    Texture,
    Display,
    World,
}

impl Space {
    pub fn name(self) -> &'static str {
        match self {
            Space::Voxel => "voxel",
            Space::Texture => "texture",
            Space::Display => "display",
            Space::World => "world",
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Space {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "voxel" => Ok(Space::Voxel),
            "texture" => Ok(Space::Texture),
            "display" => Ok(Space::Display),
            "world" => Ok(Space::World),
            other => Err(RenderError::UnknownSpace(other.to_string())),
        }
    }
}

/// How the voxel grid of an overlay is placed into the display space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransformMode {
    Id,
    PixDim,
    PixDimFlip,
    #[default]
    Affine,
    /// Aligned to the display space reference overlay
    Custom,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColourMode {
    #[default]
    Direction,
    Radius,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SuppressMode {
    #[default]
    White,
    Black,
    Transparent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureKind {
    D2,
    D3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataFormat {
    Rgba8,
    R32Float,
    R16Float,
    Depth32Float,
}

impl DataFormat {
    pub fn channels(self) -> usize {
        match self {
            DataFormat::Rgba8 => 4,
            DataFormat::R32Float | DataFormat::R16Float | DataFormat::Depth32Float => 1,
        }
    }

    pub fn bytes_per_texel(self) -> u32 {
        match self {
            DataFormat::Rgba8 | DataFormat::R32Float | DataFormat::Depth32Float => 4,
            DataFormat::R16Float => 2,
        }
    }

    pub fn wgpu_format(self) -> wgpu::TextureFormat {
        match self {
            DataFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            DataFormat::R32Float => wgpu::TextureFormat::R32Float,
            DataFormat::R16Float => wgpu::TextureFormat::R16Float,
            DataFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }

    /// R32Float cannot be sampled with a filtering sampler without an
    /// optional device feature.
    pub fn filterable(self) -> bool {
        !matches!(self, DataFormat::R32Float | DataFormat::Depth32Float)
    }
}
