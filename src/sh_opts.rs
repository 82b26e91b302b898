use ndarray::Array2;

use crate::{
    colourmap::ColourMap,
    enums::{ColourMode, SuppressMode},
    error::{RenderError, Result},
    image::Image,
    listeners::Notifier,
    sh_basis::{self, SphereGeometry},
};

pub const MIN_SH_RESOLUTION: u32 = 3;
pub const MAX_SH_RESOLUTION: u32 = 100;

/// Display settings for an image of spherical harmonic coefficients, drawn
/// as one deformed sphere per voxel.
pub struct ShOpts {
    image_order: u32,
    sh_order: u32,
    sh_resolution: u32,
    colour_mode: ColourMode,
    x_colour: [f32; 4],
    y_colour: [f32; 4],
    z_colour: [f32; 4],
    suppress: [bool; 3],
    suppress_mode: SuppressMode,
    lighting: bool,
    neuro_flip: bool,
    size: f32,
    radius_threshold: f32,
    colour_map: ColourMap,
    pub notifier: Notifier,
}

impl ShOpts {
    /// Options for an image whose 4th dimension holds symmetric SH
    /// coefficients.
    pub fn for_image(image: &Image) -> Result<Self> {
        let image_order = sh_basis::order_for_coefficients(image.nvols()).ok_or_else(|| {
            RenderError::InvalidImage(format!(
                "{} has {} volumes, which is not a symmetric SH coefficient count",
                image.name,
                image.nvols()
            ))
        })?;
        Ok(Self::new(image_order))
    }

    pub fn new(image_order: u32) -> Self {
        Self {
            image_order,
            sh_order: image_order,
            sh_resolution: 16,
            colour_mode: ColourMode::Direction,
            x_colour: [1.0, 0.0, 0.0, 1.0],
            y_colour: [0.0, 1.0, 0.0, 1.0],
            z_colour: [0.0, 0.0, 1.0, 1.0],
            suppress: [false; 3],
            suppress_mode: SuppressMode::White,
            lighting: true,
            neuro_flip: true,
            size: 100.0,
            radius_threshold: 0.05,
            colour_map: ColourMap::hot(),
            notifier: Notifier::new(),
        }
    }

    pub fn image_order(&self) -> u32 {
        self.image_order
    }

    pub fn sh_order(&self) -> u32 {
        self.sh_order
    }

    pub fn set_sh_order(&mut self, order: u32) -> Result<()> {
        if order % 2 != 0 || order > self.image_order {
            return Err(RenderError::InvalidParameter {
                name: "shOrder",
                value: order.to_string(),
            });
        }
        self.sh_order = order;
        self.notifier.notify("shOrder");
        Ok(())
    }

    pub fn sh_resolution(&self) -> u32 {
        self.sh_resolution
    }

    pub fn set_sh_resolution(&mut self, resolution: u32) -> Result<()> {
        if !(MIN_SH_RESOLUTION..=MAX_SH_RESOLUTION).contains(&resolution) {
            return Err(RenderError::InvalidParameter {
                name: "shResolution",
                value: resolution.to_string(),
            });
        }
        self.sh_resolution = resolution;
        self.notifier.notify("shResolution");
        Ok(())
    }

    pub fn colour_mode(&self) -> ColourMode {
        self.colour_mode
    }

    pub fn set_colour_mode(&mut self, mode: ColourMode) {
        self.colour_mode = mode;
        self.notifier.notify("colourMode");
    }

    /// Colours for the X, Y and Z directions.
    pub fn direction_colours(&self) -> [[f32; 4]; 3] {
        [self.x_colour, self.y_colour, self.z_colour]
    }

    pub fn set_x_colour(&mut self, rgba: [f32; 4]) {
        self.x_colour = rgba;
        self.notifier.notify("xColour");
    }

    pub fn set_y_colour(&mut self, rgba: [f32; 4]) {
        self.y_colour = rgba;
        self.notifier.notify("yColour");
    }

    pub fn set_z_colour(&mut self, rgba: [f32; 4]) {
        self.z_colour = rgba;
        self.notifier.notify("zColour");
    }

    pub fn suppress(&self) -> [bool; 3] {
        self.suppress
    }

    pub fn set_suppress(&mut self, axis: usize, suppress: bool) -> Result<()> {
        let name = ["suppressX", "suppressY", "suppressZ"]
            .get(axis)
            .copied()
            .ok_or_else(|| RenderError::InvalidParameter {
                name: "suppress axis",
                value: axis.to_string(),
            })?;
        self.suppress[axis] = suppress;
        self.notifier.notify(name);
        Ok(())
    }

    pub fn suppress_mode(&self) -> SuppressMode {
        self.suppress_mode
    }

    pub fn set_suppress_mode(&mut self, mode: SuppressMode) {
        self.suppress_mode = mode;
        self.notifier.notify("suppressMode");
    }

    pub fn lighting(&self) -> bool {
        self.lighting
    }

    pub fn set_lighting(&mut self, lighting: bool) {
        self.lighting = lighting;
        self.notifier.notify("lighting");
    }

    pub fn neuro_flip(&self) -> bool {
        self.neuro_flip
    }

    pub fn set_neuro_flip(&mut self, flip: bool) {
        self.neuro_flip = flip;
        self.notifier.notify("neuroFlip");
    }

    /// Glyph size, as a percentage of the voxel size.
    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn set_size(&mut self, size: f32) {
        self.size = size.clamp(10.0, 500.0);
        self.notifier.notify("size");
    }

    pub fn radius_threshold(&self) -> f32 {
        self.radius_threshold
    }

    pub fn set_radius_threshold(&mut self, threshold: f32) {
        self.radius_threshold = threshold.max(0.0);
        self.notifier.notify("radiusThreshold");
    }

    pub fn colour_map(&self) -> &ColourMap {
        &self.colour_map
    }

    pub fn set_colour_map(&mut self, name: &str) -> Result<()> {
        self.colour_map = ColourMap::by_name(name)?;
        self.notifier.notify("colourMap");
        Ok(())
    }

    /// Base sphere for the current resolution.
    pub fn sphere(&self) -> SphereGeometry {
        sh_basis::unit_sphere(self.sh_resolution)
    }

    /// Matrix mapping the coefficients of one voxel to one radius per
    /// sphere vertex, shape `(vertices, coefficients)`.
    pub fn coefficients(&self) -> Array2<f32> {
        let sphere = self.sphere();
        sh_basis::sh_basis(&sphere.vertices, self.image_order, self.sh_order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use ndarray::Array4;

    fn sh_image(nvols: usize) -> Image {
        Image::new(
            "fod",
            Array4::zeros((2, 2, 2, nvols)),
            Vec3::ONE,
            glam::Mat4::IDENTITY,
        )
        .unwrap()
    }

    #[test]
    fn order_is_taken_from_image() {
        let opts = ShOpts::for_image(&sh_image(28)).unwrap();
        assert_eq!(opts.image_order(), 6);
        assert_eq!(opts.sh_order(), 6);
        assert!(ShOpts::for_image(&sh_image(10)).is_err());
    }

    #[test]
    fn coefficient_matrix_matches_sphere() {
        let mut opts = ShOpts::new(4);
        opts.set_sh_resolution(5).unwrap();
        assert_eq!(opts.coefficients().dim(), (25, 15));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut opts = ShOpts::new(4);
        assert!(opts.set_sh_resolution(2).is_err());
        assert!(opts.set_sh_order(3).is_err());
        assert!(opts.set_sh_order(6).is_err());
        assert!(opts.set_colour_map("nope").is_err());
        assert!(opts.set_suppress(3, true).is_err());
        assert_eq!(opts.sh_resolution(), 16);
    }

    #[test]
    fn size_is_clamped() {
        let mut opts = ShOpts::new(2);
        opts.set_size(1000.0);
        assert_eq!(opts.size(), 500.0);
        opts.set_radius_threshold(-1.0);
        assert_eq!(opts.radius_threshold(), 0.0);
    }
}
