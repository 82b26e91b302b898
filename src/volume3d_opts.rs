//! Display settings and per-frame parameters for ray-cast volume rendering.
//!
//! Rays are marched through the image texture in the fragment stage. Each
//! frame needs three things from the CPU, all produced by
//! [`Volume3DOpts::calculate_ray_cast_settings`]:
//!
//!  - the step to add to a texture coordinate to move one sample along the
//!    ray, scaled so that `num_steps` samples cover the longest diagonal of
//!    the texture cube
//!  - a dither vector along the ray, scaled by a random amount per pixel
//!    and added to the ray start
//!  - a texture to clip space transform, used to turn the texture
//!    coordinate of a sample into a fragment depth
//!
//! Drivers which cannot run a fragment loop with a uniform iteration count
//! run `num_outer_steps` iterations of a fixed `num_inner_steps` loop.

use glam::{Mat4, Vec3};

use crate::{
    capabilities::Capabilities,
    coords::CoordinateTransforms,
    enums::Space,
    error::{RenderError, Result},
    listeners::Notifier,
    transform::{self, Bounds},
};

pub const MAX_CLIP_PLANES: usize = 10;

pub const MIN_STEPS: u32 = 25;
pub const MAX_STEPS: u32 = 500;

/// Settings used instead of the defaults in a remote display session.
pub const REMOTE_NUM_STEPS: u32 = 40;
pub const REMOTE_RESOLUTION: u32 = 40;
pub const REMOTE_DITHERING: f32 = 0.02;
pub const REMOTE_BLEND_FACTOR: f32 = 0.4;

/// A clipping plane in the display coordinate system.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipPlane {
    pub origin: Vec3,
    pub normal: Vec3,
}

impl ClipPlane {
    /// Plane coefficients `(a, b, c, d)` with `a*x + b*y + c*z + d = 0`.
    pub fn equation(&self) -> [f32; 4] {
        let n = self.normal;
        [n.x, n.y, n.z, -n.dot(self.origin)]
    }

    /// The same plane in another coordinate system.
    pub fn transformed(&self, xform: &Mat4) -> Self {
        Self {
            origin: transform::transform_point(xform, self.origin),
            normal: transform::normalise(transform::transform_normal(xform, self.normal)),
        }
    }
}

/// Per-frame ray-casting parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayCastSettings {
    pub ray_step: Vec3,
    pub dither_direction: Vec3,
    pub texture_to_clip: Mat4,
}

pub struct Volume3DOpts {
    dithering: f32,
    blend_factor: f32,
    num_steps: u32,
    num_inner_steps: u32,
    resolution: u32,
    num_clip_planes: usize,
    show_clip_planes: bool,
    clip_position: [f32; MAX_CLIP_PLANES],
    clip_azimuth: [f32; MAX_CLIP_PLANES],
    clip_inclination: [f32; MAX_CLIP_PLANES],
    native_loops: bool,
    pub notifier: Notifier,
}

impl Default for Volume3DOpts {
    fn default() -> Self {
        Self::new(&Capabilities::default())
    }
}

impl Volume3DOpts {
    pub fn new(caps: &Capabilities) -> Self {
        let mut opts = Self {
            dithering: 0.01,
            blend_factor: 0.2,
            num_steps: 100,
            num_inner_steps: 10,
            resolution: 100,
            num_clip_planes: 0,
            show_clip_planes: false,
            clip_position: [50.0; MAX_CLIP_PLANES],
            clip_azimuth: [0.0; MAX_CLIP_PLANES],
            clip_inclination: [0.0; MAX_CLIP_PLANES],
            native_loops: caps.native_loops,
            notifier: Notifier::new(),
        };

        // Planes 1 and 2 start out orthogonal to plane 0 and each other
        opts.clip_inclination[1] = 90.0;
        opts.clip_azimuth[1] = 0.0;
        opts.clip_inclination[2] = 90.0;
        opts.clip_azimuth[2] = 90.0;

        if caps.remote_session {
            log::info!("Remote display session - reducing 3D rendering quality");
            opts.num_steps = REMOTE_NUM_STEPS;
            opts.resolution = REMOTE_RESOLUTION;
            opts.dithering = REMOTE_DITHERING;
            opts.blend_factor = REMOTE_BLEND_FACTOR;
        }
        opts
    }

    pub fn dithering(&self) -> f32 {
        self.dithering
    }

    pub fn set_dithering(&mut self, dithering: f32) {
        self.dithering = dithering.clamp(0.0, 0.05);
        self.notifier.notify("dithering");
    }

    pub fn blend_factor(&self) -> f32 {
        self.blend_factor
    }

    pub fn set_blend_factor(&mut self, blend_factor: f32) {
        self.blend_factor = blend_factor.clamp(0.001, 1.0);
        self.notifier.notify("blendFactor");
    }

    /// The requested number of steps. Use [`Volume3DOpts::get_num_steps`]
    /// for the number actually executed.
    pub fn num_steps(&self) -> u32 {
        self.num_steps
    }

    pub fn set_num_steps(&mut self, num_steps: u32) -> Result<()> {
        if !(MIN_STEPS..=MAX_STEPS).contains(&num_steps) {
            return Err(RenderError::InvalidParameter {
                name: "numSteps",
                value: num_steps.to_string(),
            });
        }
        self.num_steps = num_steps;
        self.notifier.notify("numSteps");
        Ok(())
    }

    pub fn num_inner_steps(&self) -> u32 {
        self.num_inner_steps
    }

    pub fn set_num_inner_steps(&mut self, num_inner_steps: u32) {
        self.num_inner_steps = num_inner_steps.clamp(1, 100);
        self.notifier.notify("numInnerSteps");
    }

    /// Off-screen render resolution, as a percentage of the target size.
    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn set_resolution(&mut self, resolution: u32) {
        self.resolution = resolution.clamp(10, 100);
        self.notifier.notify("resolution");
    }

    pub fn num_clip_planes(&self) -> usize {
        self.num_clip_planes
    }

    pub fn set_num_clip_planes(&mut self, n: usize) {
        self.num_clip_planes = n.min(MAX_CLIP_PLANES);
        self.notifier.notify("numClipPlanes");
    }

    pub fn show_clip_planes(&self) -> bool {
        self.show_clip_planes
    }

    pub fn set_show_clip_planes(&mut self, show: bool) {
        self.show_clip_planes = show;
        self.notifier.notify("showClipPlanes");
    }

    pub fn clip_position(&self) -> &[f32; MAX_CLIP_PLANES] {
        &self.clip_position
    }

    pub fn clip_azimuth(&self) -> &[f32; MAX_CLIP_PLANES] {
        &self.clip_azimuth
    }

    pub fn clip_inclination(&self) -> &[f32; MAX_CLIP_PLANES] {
        &self.clip_inclination
    }

    fn check_plane(idx: usize) -> Result<()> {
        if idx >= MAX_CLIP_PLANES {
            return Err(RenderError::ClipPlaneIndex(idx, MAX_CLIP_PLANES));
        }
        Ok(())
    }

    /// Sets the position (percent), azimuth and inclination (degrees) of
    /// one clip plane. Values are clamped to their ranges.
    pub fn set_clip_plane(&mut self, idx: usize, position: f32, azimuth: f32, inclination: f32) -> Result<()> {
        Self::check_plane(idx)?;
        self.clip_position[idx] = position.clamp(0.0, 100.0);
        self.clip_azimuth[idx] = azimuth.clamp(-180.0, 180.0);
        self.clip_inclination[idx] = inclination.clamp(-180.0, 180.0);
        self.notifier.notify("clipPosition");
        self.notifier.notify("clipAzimuth");
        self.notifier.notify("clipInclination");
        Ok(())
    }

    /// Number of steps executed per ray.
    pub fn get_num_steps(&self) -> u32 {
        if self.native_loops {
            return self.num_steps;
        }
        self.get_num_outer_steps() * self.num_inner_steps
    }

    /// Number of iterations of the outer ray-casting loop.
    pub fn get_num_outer_steps(&self) -> u32 {
        self.num_steps.div_ceil(self.num_inner_steps)
    }

    pub fn uses_native_loops(&self) -> bool {
        self.native_loops
    }

    /// Size of the off-screen buffer for a target of the given size.
    pub fn render_size(&self, width: u32, height: u32) -> (u32, u32) {
        let scale = |d: u32| ((d as u64 * self.resolution as u64) / 100).max(1) as u32;
        (scale(width), scale(height))
    }

    /// Calculates the ray step, dither direction, and texture to clip
    /// space transform for one frame. `view` and `proj` default to the
    /// identity.
    pub fn calculate_ray_cast_settings(
        &self,
        xforms: &dyn CoordinateTransforms,
        view: Option<Mat4>,
        proj: Option<Mat4>,
    ) -> Result<RayCastSettings> {
        let view = view.unwrap_or(Mat4::IDENTITY);
        let proj = proj.unwrap_or(Mat4::IDENTITY);

        // The GL camera looks down -Z
        let eye = Vec3::new(0.0, 0.0, -1.0);
        let target = Vec3::new(0.0, 0.0, 1.0);

        let t2d = xforms.get_transform(Space::Texture, Space::Display)?;
        let xform = transform::concat(&[view, t2d]);
        let ixform = xform.inverse();

        let eye = transform::transform_vector(&ixform, eye);
        let target = transform::transform_vector(&ixform, target);
        let cdir = transform::normalise(eye - target);

        // sqrt(3) so that get_num_steps() samples span the longest
        // diagonal of the texture cube
        let ray_step = 3f32.sqrt() * cdir / self.get_num_steps() as f32;
        let dither_direction = cdir * self.dithering;
        let texture_to_clip = transform::concat(&[transform::depth_remap(), proj, xform]);

        Ok(RayCastSettings {
            ray_step,
            dither_direction,
            texture_to_clip,
        })
    }

    /// Origin and normal of clip plane `idx`, in the display coordinate
    /// system of an overlay with the given bounds.
    pub fn get_3d_clip_plane(&self, idx: usize, bounds: &Bounds) -> Result<ClipPlane> {
        Self::check_plane(idx)?;

        let pos = self.clip_position[idx] / 100.0;
        let azimuth = self.clip_azimuth[idx].to_radians();
        let incline = self.clip_inclination[idx].to_radians();

        let centre = bounds.centre();
        let rot1 = transform::axis_angles_to_rot_mat(incline, 0.0, 0.0);
        let rot2 = transform::axis_angles_to_rot_mat(0.0, 0.0, azimuth);
        let rotation = transform::concat(&[rot2, rot1]);

        let normal = transform::normalise(transform::transform_normal(&rotation, Vec3::NEG_Z));
        let offset = (pos - 0.5) * bounds.len().max_element();

        Ok(ClipPlane {
            origin: centre + normal * offset,
            normal,
        })
    }

    /// All active clip planes.
    pub fn get_3d_clip_planes(&self, bounds: &Bounds) -> Vec<ClipPlane> {
        (0..self.num_clip_planes)
            .filter_map(|i| self.get_3d_clip_plane(i, bounds).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy() -> Capabilities {
        Capabilities {
            native_loops: false,
            ..Capabilities::default()
        }
    }

    #[test]
    fn defaults() {
        let opts = Volume3DOpts::default();
        assert_eq!(opts.num_steps(), 100);
        assert_eq!(opts.resolution(), 100);
        assert_eq!(opts.dithering(), 0.01);
        assert_eq!(opts.blend_factor(), 0.2);
        assert_eq!(opts.clip_position(), &[50.0; MAX_CLIP_PLANES]);
        assert_eq!(opts.clip_inclination()[1], 90.0);
        assert_eq!(opts.clip_azimuth()[2], 90.0);
    }

    #[test]
    fn outer_steps_round_up() {
        let mut opts = Volume3DOpts::new(&legacy());
        opts.set_num_steps(101).unwrap();
        opts.set_num_inner_steps(10);
        assert_eq!(opts.get_num_outer_steps(), 11);
        assert_eq!(opts.get_num_steps(), 110);
    }

    #[test]
    fn native_loops_use_num_steps() {
        let mut opts = Volume3DOpts::default();
        opts.set_num_steps(101).unwrap();
        assert_eq!(opts.get_num_steps(), 101);
    }

    #[test]
    fn num_steps_out_of_range_is_rejected() {
        let mut opts = Volume3DOpts::default();
        assert!(opts.set_num_steps(24).is_err());
        assert!(opts.set_num_steps(501).is_err());
        assert_eq!(opts.num_steps(), 100);
    }

    #[test]
    fn clamped_settings() {
        let mut opts = Volume3DOpts::default();
        opts.set_dithering(1.0);
        opts.set_blend_factor(0.0);
        opts.set_num_inner_steps(0);
        opts.set_resolution(5);
        opts.set_num_clip_planes(20);
        assert_eq!(opts.dithering(), 0.05);
        assert_eq!(opts.blend_factor(), 0.001);
        assert_eq!(opts.num_inner_steps(), 1);
        assert_eq!(opts.resolution(), 10);
        assert_eq!(opts.num_clip_planes(), MAX_CLIP_PLANES);
    }

    #[test]
    fn clip_plane_index_is_checked() {
        let opts = Volume3DOpts::default();
        let bounds = Bounds::new(Vec3::ZERO, Vec3::ONE);
        assert!(matches!(
            opts.get_3d_clip_plane(10, &bounds),
            Err(RenderError::ClipPlaneIndex(10, MAX_CLIP_PLANES))
        ));
    }

    #[test]
    fn clip_plane_offset_uses_longest_side() {
        let mut opts = Volume3DOpts::default();
        opts.set_clip_plane(0, 100.0, 0.0, 0.0).unwrap();
        let bounds = Bounds::new(Vec3::ZERO, Vec3::new(2.0, 4.0, 10.0));
        let plane = opts.get_3d_clip_plane(0, &bounds).unwrap();
        assert!((plane.normal - Vec3::NEG_Z).length() < 1e-6);
        assert!((plane.origin - Vec3::new(1.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn active_planes_only() {
        let mut opts = Volume3DOpts::default();
        let bounds = Bounds::new(Vec3::ZERO, Vec3::ONE);
        assert!(opts.get_3d_clip_planes(&bounds).is_empty());
        opts.set_num_clip_planes(3);
        assert_eq!(opts.get_3d_clip_planes(&bounds).len(), 3);
    }

    #[test]
    fn render_size_applies_resolution() {
        let mut opts = Volume3DOpts::default();
        opts.set_resolution(50);
        assert_eq!(opts.render_size(640, 3), (320, 1));
    }

    #[test]
    fn plane_equation_contains_origin() {
        let plane = ClipPlane {
            origin: Vec3::new(1.0, 2.0, 3.0),
            normal: Vec3::Z,
        };
        let [a, b, c, d] = plane.equation();
        assert_eq!(a * 1.0 + b * 2.0 + c * 3.0 + d, 0.0);
    }
}
