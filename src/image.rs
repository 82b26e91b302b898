use glam::{Mat3, Mat4, Vec3};
use ndarray::{Array3, Array4, ArrayView1, ArrayView3, Axis, s};

use crate::error::{RenderError, Result};

/// A decoded 3D or 4D image. Data is indexed `[x, y, z, volume]`; 3D images
/// have a single volume.
pub struct Image {
    pub name: String,
    data: Array4<f32>,
    pixdim: Vec3,
    affine: Mat4,
}

impl Image {
    pub fn new(name: impl Into<String>, data: Array4<f32>, pixdim: Vec3, affine: Mat4) -> Result<Self> {
        let name = name.into();
        if data.shape().iter().any(|&d| d == 0) {
            return Err(RenderError::InvalidImage(format!(
                "{name} has an empty dimension: {:?}",
                data.shape()
            )));
        }
        if pixdim.min_element() <= 0.0 {
            return Err(RenderError::InvalidImage(format!(
                "{name} has non-positive voxel size {pixdim}"
            )));
        }
        if affine.determinant().abs() < f32::EPSILON {
            return Err(RenderError::InvalidImage(format!("{name} has a singular affine")));
        }
        Ok(Self {
            name,
            data,
            pixdim,
            affine,
        })
    }

    /// A 3D image whose affine is a plain voxel size scaling.
    pub fn from_3d(name: impl Into<String>, data: Array3<f32>, pixdim: Vec3) -> Result<Self> {
        let data = data.insert_axis(Axis(3));
        Self::new(name, data, pixdim, Mat4::from_scale(pixdim))
    }

    /// Get the spatial dimensions of the image (x, y, z)
    pub fn shape(&self) -> [usize; 3] {
        let (x, y, z, _) = self.data.dim();
        [x, y, z]
    }

    pub fn nvols(&self) -> usize {
        self.data.dim().3
    }

    pub fn is_4d(&self) -> bool {
        self.nvols() > 1
    }

    pub fn pixdim(&self) -> Vec3 {
        self.pixdim
    }

    /// Voxel to world transform.
    pub fn affine(&self) -> Mat4 {
        self.affine
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    /// All values stored for one voxel, one per volume.
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> ArrayView1<'_, f32> {
        self.data.slice(s![x, y, z, ..])
    }

    pub fn volume(&self, vol: usize) -> Option<ArrayView3<'_, f32>> {
        (vol < self.nvols()).then(|| self.data.index_axis(Axis(3), vol))
    }

    pub fn contains(&self, voxel: [i32; 3]) -> bool {
        let shape = self.shape();
        voxel
            .iter()
            .zip(shape)
            .all(|(&v, dim)| v >= 0 && (v as usize) < dim)
    }

    /// Minimum and maximum over the whole image.
    pub fn data_range(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    /// True when the voxel axes are in neurological (left-is-left) order.
    pub fn is_neurological(&self) -> bool {
        Mat3::from_mat4(self.affine).determinant() > 0.0
    }
}
