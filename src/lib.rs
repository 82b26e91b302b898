//! # Volume and glyph rendering library
//!
//! This crate renders neuroimaging overlays with wgpu. It provides two
//! renderers:
//!
//!  - [`GlVolume3d`] ray-casts a scalar volume. The parameters of every
//!    frame (ray step, dither, texture to clip transform, clip planes)
//!    are calculated on the CPU by [`Volume3DOpts`]
//!  - [`GlyphRenderer`] draws one spherical harmonic glyph per voxel of a
//!    slice through a 4D image of SH coefficients, using a single
//!    instanced draw call. Glyph radii are evaluated on the CPU (in
//!    parallel with rayon) and packed into a 3D texture by
//!    [`RadiusTexture`]
//!
//! Both renderers listen for changes to their display options, and only
//! redo the work a change requires before the next frame. Each overlay
//! moves between voxel, texture, world and display coordinates through a
//! [`CoordinateTransforms`] provider.
//!
//! Loading images from files is not part of this crate: images are built
//! from `ndarray` arrays.
//!
//! # Examples
//!
//! ## Ray-casting a volume
//!
//! Render a volume off-screen, at the resolution requested by the
//! rendering options, and read the result back.
//!
//! ```no_run
//! # use std::{cell::RefCell, rc::Rc};
//! # use glam::{Mat4, Vec3};
//! # use ndarray::Array3;
//! # use volume_glyph_render::*;
//! # async fn render() -> volume_glyph_render::error::Result<()> {
//! let gpu = Gpu::new().await?;
//! let image = Image::from_3d("brain", Array3::zeros((64, 64, 64)), Vec3::ONE)?;
//! let xforms = Rc::new(ImageTransforms::new(
//!     Rc::new(image),
//!     TransformMode::PixDim,
//!     DisplaySpace::world(),
//! ));
//! let opts = Rc::new(RefCell::new(Volume3DOpts::new(&gpu.capabilities)));
//! let display = Rc::new(RefCell::new(Display::default()));
//!
//! let mut volume = GlVolume3d::new("brain", xforms, opts.clone(), display, ColourMap::hot())?;
//! volume.init(&gpu).await?;
//!
//! let (width, height) = opts.borrow().render_size(512, 512);
//! let mut target = RenderTarget::new("frame", width, height)?;
//! target.refresh(&gpu)?;
//! target.clear(&gpu)?;
//! let proj = Mat4::orthographic_rh_gl(-40.0, 40.0, -40.0, 40.0, -100.0, 100.0);
//! volume.draw(&gpu, &target, Mat4::from_translation(Vec3::splat(-32.0)), proj)?;
//! let rgba = target.read_back(&gpu).await?;
//! # Ok(())
//! # }
//! ```

pub mod capabilities;
pub mod colourmap;
pub mod coords;
pub mod display;
pub mod enums;
pub mod error;
pub mod glsh;
pub mod glvolume;
pub mod glyph_packer;
pub mod gpu;
pub mod image;
pub mod listeners;
pub mod sh_basis;
pub mod sh_opts;
pub mod texture;
pub mod transform;
pub mod volume3d_opts;

pub use capabilities::Capabilities;
pub use colourmap::{ColourMap, ColourMapTexture};
pub use coords::{CoordinateTransforms, DisplaySpace, ImageTransforms};
pub use display::Display;
pub use enums::{ColourMode, Orientation, Space, SuppressMode, TransformMode};
pub use error::RenderError;
pub use glsh::{GlyphRenderer, GlyphState, ShaderUpdate};
pub use glvolume::GlVolume3d;
pub use glyph_packer::RadiusTexture;
pub use gpu::{Gpu, RenderTarget};
pub use image::Image;
pub use sh_opts::ShOpts;
pub use volume3d_opts::Volume3DOpts;
