//! Per-voxel glyph radii, packed into a 3D texture.
//!
//! The vertex stage reads one radius per (voxel, sphere vertex) pair. The
//! radii form one long 1D sequence, which has to be folded into a 3D
//! texture because any single texture dimension is limited to
//! `max_texture_3d` texels. The shape is found by repeatedly moving a small
//! prime factor from the largest dimension to the smallest; when no such
//! factor exists the largest dimension is rounded up and halved, leaving
//! unused padding at the end of the texture.
//!
//! Radii are stored voxel-major, vertex-minor. Texel `(i, j, k)` of a
//! texture of shape `[s0, s1, s2]` holds radius `i + s0 * (j + s1 * k)`,
//! which is also the order in which wgpu expects texel data, so the padded
//! sequence is uploaded as-is.

use ndarray::Array2;
use rayon::prelude::*;
use web_time::Instant;

use crate::{
    enums::{DataFormat, Interpolation, TextureKind},
    error::{RenderError, Result},
    image::Image,
    texture::{Texture, Upload},
};

/// Factors tried, in order, when redistributing texture dimensions.
pub const PACK_DIVISORS: [usize; 4] = [2, 3, 5, 7];

/// Upper bound on reshaping iterations. Some counts make the reshape cycle
/// without ever fitting, so the bound can be hit, and
/// [`RenderError::OversizedTexture`] returned, even when the count is well
/// below `max_size³`. This happens mostly with small limits, e.g. many
/// prime counts for a limit of 16.
pub const MAX_PACK_ITERATIONS: usize = 4096;

/// Removes voxels lying outside the image, keeping the order of the rest.
pub fn filter_voxels(image: &Image, voxels: &[[i32; 3]]) -> Vec<[i32; 3]> {
    voxels
        .iter()
        .filter(|&&voxel| image.contains(voxel))
        .copied()
        .collect()
}

/// One radius per sphere vertex for every voxel, voxel-major. `coefficients`
/// has shape `(vertices, coefficients)`; every voxel must lie inside the
/// image.
pub fn compute_radii(image: &Image, coefficients: &Array2<f32>, voxels: &[[i32; 3]]) -> Result<Vec<f32>> {
    let ncoefs = coefficients.ncols();
    if ncoefs != image.nvols() {
        return Err(RenderError::InvalidImage(format!(
            "{} has {} volumes but the basis expects {ncoefs} coefficients",
            image.name,
            image.nvols()
        )));
    }

    let values: Vec<f32> = voxels
        .par_iter()
        .flat_map_iter(|&[x, y, z]| image.voxel(x as usize, y as usize, z as usize).to_vec())
        .collect();
    let data = Array2::from_shape_vec((voxels.len(), ncoefs), values)
        .map_err(|e| RenderError::InvalidImage(e.to_string()))?;

    // (voxels, coefficients) x (coefficients, vertices)
    let radii = data.dot(&coefficients.t());
    Ok(radii.iter().copied().collect())
}

fn argmin(shape: &[usize; 3]) -> usize {
    (0..3).fold(0, |best, i| if shape[i] < shape[best] { i } else { best })
}

fn argmax(shape: &[usize; 3]) -> usize {
    (0..3).fold(0, |best, i| if shape[i] > shape[best] { i } else { best })
}

/// 3D texture shape, no dimension larger than `max_size`, with capacity for
/// at least `count` values. Fails if no such shape is reached within
/// [`MAX_PACK_ITERATIONS`].
pub fn pack_texture_shape(count: usize, max_size: u32) -> Result<[usize; 3]> {
    let max = max_size as usize;
    let oversized = || RenderError::OversizedTexture { count, max: max_size };

    if count == 0 {
        return Ok([1, 1, 1]);
    }
    let capacity = max.checked_mul(max).and_then(|m| m.checked_mul(max));
    if max == 0 || capacity.is_some_and(|c| count > c) {
        return Err(oversized());
    }

    let mut shape = [count, 1, 1];
    for _ in 0..MAX_PACK_ITERATIONS {
        if shape.iter().all(|&d| d <= max) {
            return Ok(shape);
        }
        let imin = argmin(&shape);
        let imax = argmax(&shape);

        match PACK_DIVISORS.iter().find(|&&d| shape[imax] % d == 0) {
            Some(&divisor) => {
                shape[imax] /= divisor;
                shape[imin] *= divisor;
            }
            None => {
                shape[imax] = shape[imax].div_ceil(2);
                shape[imin] *= 2;
            }
        }
    }
    Err(oversized())
}

/// Radii laid out for upload.
#[derive(Clone, Debug, PartialEq)]
pub struct PackedRadii {
    pub shape: [usize; 3],
    /// Number of real radii; everything after is padding.
    pub count: usize,
    pub data: Vec<f32>,
}

/// Packs radii into a texture shape and pads them to its capacity.
pub fn pack_radii(mut radii: Vec<f32>, max_size: u32) -> Result<PackedRadii> {
    let count = radii.len();
    let shape = pack_texture_shape(count, max_size)?;
    let capacity = shape.iter().product();
    if capacity != count {
        log::debug!("Padding {count} radii to texture shape {shape:?}");
    }
    radii.resize(capacity, 0.0);
    Ok(PackedRadii {
        shape,
        count,
        data: radii,
    })
}

/// Result of one radius texture update.
#[derive(Clone, Debug, PartialEq)]
pub struct RadiusUpdate {
    pub shape: [usize; 3],
    /// The voxels that were kept, in the order their radii were stored.
    pub voxels: Vec<[i32; 3]>,
    pub upload: Upload,
}

/// The 3D texture of glyph radii.
pub struct RadiusTexture {
    texture: Texture,
    max_size: u32,
    shape: Option<[usize; 3]>,
}

impl RadiusTexture {
    /// `max_size` is the device's maximum 3D texture dimension.
    pub fn new(name: impl Into<String>, max_size: u32) -> Self {
        let mut texture = Texture::new(name, TextureKind::D3, DataFormat::R32Float);
        texture.set_interpolation(Interpolation::Nearest);
        Self {
            texture,
            max_size,
            shape: None,
        }
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    pub fn shape(&self) -> Option<[usize; 3]> {
        self.shape
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    /// Computes and packs the radii for the given voxels, and stages them
    /// for upload. Voxels outside the image are dropped.
    pub fn update(&mut self, image: &Image, coefficients: &Array2<f32>, voxels: &[[i32; 3]]) -> Result<RadiusUpdate> {
        let start = Instant::now();
        let voxels = filter_voxels(image, voxels);
        let radii = compute_radii(image, coefficients, &voxels)?;
        let packed = pack_radii(radii, self.max_size)?;

        let size = packed.shape.map(|d| d as u32);
        self.texture.set_data(&size, &packed.data)?;
        let upload = self.texture.plan_upload()?;
        self.shape = Some(packed.shape);

        log::debug!(
            "{}: {} voxels, {} radii in texture {:?} ({:?}) in {:?}",
            self.texture.name(),
            voxels.len(),
            packed.count,
            packed.shape,
            upload,
            start.elapsed()
        );
        Ok(RadiusUpdate {
            shape: packed.shape,
            voxels,
            upload,
        })
    }

    pub fn refresh(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) -> Result<Upload> {
        self.texture.refresh(device, queue)
    }

    pub fn ready(&self) -> bool {
        self.texture.ready()
    }
}
