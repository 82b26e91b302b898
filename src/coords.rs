//! Coordinate transform provider.
//!
//! Every overlay lives in four coordinate systems:
//!
//!  - `voxel`:   integer voxel indices, voxel centres at whole numbers
//!  - `texture`: the voxel grid normalised to `[0, 1]` along each axis
//!  - `world`:   the image's own voxel to world affine
//!  - `display`: the space all overlays are drawn in, chosen per overlay by
//!    its [`TransformMode`]
//!
//! Transforms between any pair are composed through voxel space.

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use glam::{Mat4, Vec3};

use crate::{
    enums::{Space, TransformMode},
    error::{RenderError, Result},
    image::Image,
    transform::{Bounds, scale_offset},
};

pub trait CoordinateTransforms {
    /// Whether this overlay has a notion of the given space.
    fn supports(&self, _space: Space) -> bool {
        true
    }

    /// Affine mapping coordinates in `from` to coordinates in `to`.
    fn get_transform(&self, from: Space, to: Space) -> Result<Mat4>;

    /// Display space bounding box of the overlay.
    fn bounds(&self) -> Bounds;

    fn get_transform_by_name(&self, from: &str, to: &str) -> Result<Mat4> {
        self.get_transform(from.parse()?, to.parse()?)
    }

    fn get_inverse_transform(&self, from: Space, to: Space) -> Result<Mat4> {
        Ok(self.get_transform(from, to)?.inverse())
    }
}

/// Shared display space configuration. Overlays using
/// [`TransformMode::Custom`] are aligned to the reference image, which is
/// only weakly held.
#[derive(Default)]
pub struct DisplaySpace {
    reference: RefCell<Weak<Image>>,
}

impl DisplaySpace {
    pub fn world() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn set_reference(&self, image: &Rc<Image>) {
        *self.reference.borrow_mut() = Rc::downgrade(image);
    }

    pub fn clear_reference(&self) {
        *self.reference.borrow_mut() = Weak::new();
    }

    pub fn reference(&self) -> Option<Rc<Image>> {
        self.reference.borrow().upgrade()
    }
}

/// Transforms for an image overlay.
pub struct ImageTransforms {
    image: Rc<Image>,
    mode: TransformMode,
    display_space: Rc<DisplaySpace>,
}

impl ImageTransforms {
    pub fn new(image: Rc<Image>, mode: TransformMode, display_space: Rc<DisplaySpace>) -> Self {
        Self {
            image,
            mode,
            display_space,
        }
    }

    pub fn image(&self) -> &Rc<Image> {
        &self.image
    }

    pub fn mode(&self) -> TransformMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: TransformMode) {
        self.mode = mode;
    }

    fn voxel_to_texture(&self) -> Mat4 {
        let shape = Vec3::from_array(self.image.shape().map(|d| d as f32));
        scale_offset(shape.recip(), 0.5 * shape.recip())
    }

    fn voxel_to_display(&self) -> Mat4 {
        let image = &self.image;
        match self.mode {
            TransformMode::Id => Mat4::IDENTITY,
            TransformMode::PixDim => Mat4::from_scale(image.pixdim()),
            TransformMode::PixDimFlip => pixdim_flip(image),
            TransformMode::Affine => image.affine(),
            TransformMode::Custom => match self.display_space.reference() {
                Some(reference) => {
                    let world_to_ref = Mat4::from_scale(reference.pixdim()) * reference.affine().inverse();
                    world_to_ref * image.affine()
                }
                None => {
                    log::warn!(
                        "{}: display space reference is gone, falling back to affine",
                        image.name
                    );
                    image.affine()
                }
            },
        }
    }

    fn from_voxel(&self, space: Space) -> Mat4 {
        match space {
            Space::Voxel => Mat4::IDENTITY,
            Space::Texture => self.voxel_to_texture(),
            Space::Display => self.voxel_to_display(),
            Space::World => self.image.affine(),
        }
    }
}

/// Scales by voxel size, and flips the X axis of neurological images so
/// that they are displayed in radiological order.
fn pixdim_flip(image: &Image) -> Mat4 {
    let pixdim = image.pixdim();
    if !image.is_neurological() {
        return Mat4::from_scale(pixdim);
    }
    let xlen = (image.shape()[0] as f32 - 1.0) * pixdim.x;
    scale_offset(Vec3::new(-pixdim.x, pixdim.y, pixdim.z), Vec3::new(xlen, 0.0, 0.0))
}

impl CoordinateTransforms for ImageTransforms {
    fn get_transform(&self, from: Space, to: Space) -> Result<Mat4> {
        for space in [from, to] {
            if !self.supports(space) {
                return Err(RenderError::UnknownSpace(space.to_string()));
            }
        }
        Ok(self.from_voxel(to) * self.from_voxel(from).inverse())
    }

    fn bounds(&self) -> Bounds {
        let shape = Vec3::from_array(self.image.shape().map(|d| d as f32));
        Bounds::new(Vec3::splat(-0.5), shape - 0.5).transformed(&self.voxel_to_display())
    }
}
