//! Affine helpers shared by the coordinate transform provider and the
//! renderers. All matrices are column-major `glam::Mat4`s acting on column
//! vectors, so `concat(&[a, b])` applies `b` first.

use glam::{Mat3, Mat4, Vec3};

/// Axis-aligned box in some coordinate system.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub lo: Vec3,
    pub hi: Vec3,
}

impl Bounds {
    pub fn new(lo: Vec3, hi: Vec3) -> Self {
        Self {
            lo: lo.min(hi),
            hi: lo.max(hi),
        }
    }

    /// Smallest box containing every point.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut lo = Vec3::splat(f32::INFINITY);
        let mut hi = Vec3::splat(f32::NEG_INFINITY);
        for p in points {
            lo = lo.min(p);
            hi = hi.max(p);
        }
        Self { lo, hi }
    }

    pub fn len(&self) -> Vec3 {
        self.hi - self.lo
    }

    pub fn centre(&self) -> Vec3 {
        self.lo + 0.5 * self.len()
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (lo, hi) = (self.lo, self.hi);
        [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ]
    }

    /// Bounds of this box after an affine transform.
    pub fn transformed(&self, xform: &Mat4) -> Self {
        Self::from_points(self.corners().map(|c| xform.transform_point3(c)))
    }
}

pub fn scale_offset(scale: Vec3, offset: Vec3) -> Mat4 {
    Mat4::from_translation(offset) * Mat4::from_scale(scale)
}

/// Product of the given matrices, in order.
pub fn concat(xforms: &[Mat4]) -> Mat4 {
    xforms.iter().fold(Mat4::IDENTITY, |acc, x| acc * *x)
}

pub fn transform_point(xform: &Mat4, p: Vec3) -> Vec3 {
    xform.transform_point3(p)
}

/// Applies the rotation/scale part only.
pub fn transform_vector(xform: &Mat4, v: Vec3) -> Vec3 {
    xform.transform_vector3(v)
}

/// Transforms a surface normal by the inverse transpose of the linear part.
pub fn transform_normal(xform: &Mat4, n: Vec3) -> Vec3 {
    normal_matrix(&Mat3::from_mat4(*xform)) * n
}

pub fn normal_matrix(linear: &Mat3) -> Mat3 {
    linear.inverse().transpose()
}

/// Rotation about X, then Y, then Z (angles in radians).
pub fn axis_angles_to_rot_mat(xrot: f32, yrot: f32, zrot: f32) -> Mat4 {
    Mat4::from_rotation_z(zrot) * Mat4::from_rotation_y(yrot) * Mat4::from_rotation_x(xrot)
}

/// Whether the linear part of a model-view transform reverses handedness,
/// which reverses the on-screen winding of every triangle.
pub fn is_mirrored(model_view: Mat4) -> bool {
    Mat3::from_mat4(model_view).determinant() < 0.0
}

pub fn normalise(v: Vec3) -> Vec3 {
    v.normalize_or_zero()
}

/// Maps projected depth from [-1, 1] to [0, 1].
pub fn depth_remap() -> Mat4 {
    scale_offset(Vec3::new(1.0, 1.0, 0.5), Vec3::new(0.0, 0.0, 0.5))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn concat_applies_last_matrix_first() {
        let scale = scale_offset(Vec3::splat(2.0), Vec3::ZERO);
        let shift = Mat4::from_translation(Vec3::X);
        let m = concat(&[scale, shift]);
        assert!(close(transform_point(&m, Vec3::ZERO), Vec3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn vectors_ignore_translation() {
        let m = scale_offset(Vec3::splat(3.0), Vec3::new(5.0, 5.0, 5.0));
        assert!(close(transform_vector(&m, Vec3::Z), Vec3::new(0.0, 0.0, 3.0)));
    }

    #[test]
    fn inclination_then_azimuth() {
        let half_pi = std::f32::consts::FRAC_PI_2;
        let rot = concat(&[
            axis_angles_to_rot_mat(0.0, 0.0, half_pi),
            axis_angles_to_rot_mat(half_pi, 0.0, 0.0),
        ]);
        let n = normalise(transform_normal(&rot, Vec3::NEG_Z));
        assert!(close(n, Vec3::new(-1.0, 0.0, 0.0)), "{n}");
    }

    #[test]
    fn depth_remap_maps_clip_range_to_unit_range() {
        let m = depth_remap();
        assert!((transform_point(&m, Vec3::NEG_Z).z - 0.0).abs() < 1e-6);
        assert!((transform_point(&m, Vec3::Z).z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mirroring() {
        assert!(!is_mirrored(Mat4::IDENTITY));
        assert!(is_mirrored(Mat4::from_scale(Vec3::new(-1.0, 1.0, 1.0))));
        assert!(!is_mirrored(Mat4::from_scale(Vec3::new(-1.0, -1.0, 1.0))));
    }

    #[test]
    fn bounds_of_transformed_box() {
        let b = Bounds::new(Vec3::ZERO, Vec3::ONE);
        let t = b.transformed(&scale_offset(Vec3::new(2.0, -1.0, 1.0), Vec3::ZERO));
        assert!(close(t.lo, Vec3::new(0.0, -1.0, 0.0)));
        assert!(close(t.hi, Vec3::new(2.0, 0.0, 1.0)));
        assert!(close(t.centre(), Vec3::new(1.0, -0.5, 0.5)));
    }
}
