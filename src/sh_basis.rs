//! Unit sphere tessellation and the real, symmetric spherical harmonic
//! basis evaluated on its vertices.

use std::f64::consts::PI;

use glam::Vec3;
use ndarray::Array2;

/// Base geometry for one glyph.
#[derive(Clone, Debug, PartialEq)]
pub struct SphereGeometry {
    pub resolution: u32,
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl SphereGeometry {
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_indices(&self) -> usize {
        self.indices.len()
    }
}

/// A `resolution` x `resolution` latitude/longitude grid of unit vectors,
/// with two counter-clockwise (seen from outside) triangles per grid cell.
pub fn unit_sphere(resolution: u32) -> SphereGeometry {
    let res = resolution.max(2) as usize;
    let step = |i: usize, span: f32| i as f32 * span / (res - 1) as f32;

    let mut vertices = Vec::with_capacity(res * res);
    for i in 0..res {
        let theta = step(i, std::f32::consts::PI);
        for j in 0..res {
            let phi = step(j, std::f32::consts::TAU);
            vertices.push(Vec3::new(
                theta.sin() * phi.cos(),
                theta.sin() * phi.sin(),
                theta.cos(),
            ));
        }
    }

    let mut indices = Vec::with_capacity(6 * (res - 1) * (res - 1));
    for i in 0..res - 1 {
        for j in 0..res - 1 {
            let a = (i * res + j) as u32;
            let b = a + 1;
            let c = a + res as u32;
            let d = c + 1;
            indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }

    SphereGeometry {
        resolution: res as u32,
        vertices,
        indices,
    }
}

/// Number of coefficients of a symmetric (even order) basis of the given
/// maximum order.
pub fn num_coefficients(order: u32) -> usize {
    ((order + 1) * (order + 2) / 2) as usize
}

/// Maximum order of a symmetric basis with `n` coefficients.
pub fn order_for_coefficients(n: usize) -> Option<u32> {
    (0..=30)
        .step_by(2)
        .find(|&order| num_coefficients(order) == n)
}

/// Associated Legendre function `P_l^m(x)`, including the Condon-Shortley
/// phase.
fn legendre(l: u32, m: u32, x: f64) -> f64 {
    let mut pmm = 1.0;
    if m > 0 {
        let somx2 = ((1.0 - x) * (1.0 + x)).sqrt();
        let mut fact = 1.0;
        for _ in 0..m {
            pmm *= -fact * somx2;
            fact += 2.0;
        }
    }
    if l == m {
        return pmm;
    }
    let mut pmmp1 = x * (2 * m + 1) as f64 * pmm;
    if l == m + 1 {
        return pmmp1;
    }
    let mut pll = 0.0;
    for ll in m + 2..=l {
        pll = ((2 * ll - 1) as f64 * x * pmmp1 - (ll + m - 1) as f64 * pmm) / (ll - m) as f64;
        pmm = pmmp1;
        pmmp1 = pll;
    }
    pll
}

fn normalisation(l: u32, m: u32) -> f64 {
    // (l - m)! / (l + m)!
    let ratio: f64 = (l - m + 1..=l + m).map(|k| 1.0 / k as f64).product();
    ((2 * l + 1) as f64 / (4.0 * PI) * ratio).sqrt()
}

/// Real spherical harmonic of even order `l` and degree `m` in the
/// direction `(theta, phi)`.
pub fn real_sh(l: u32, m: i32, theta: f64, phi: f64) -> f64 {
    let am = m.unsigned_abs();
    let k = normalisation(l, am) * legendre(l, am, theta.cos());
    match m {
        0 => k,
        m if m > 0 => std::f64::consts::SQRT_2 * k * (am as f64 * phi).cos(),
        _ => std::f64::consts::SQRT_2 * k * (am as f64 * phi).sin(),
    }
}

/// Basis matrix of shape `(vertices, num_coefficients(image_order))`
/// mapping per-voxel coefficients to per-vertex radii. Columns for orders
/// above `use_order` are zero.
pub fn sh_basis(vertices: &[Vec3], image_order: u32, use_order: u32) -> Array2<f32> {
    let ncoefs = num_coefficients(image_order);
    let mut basis = Array2::<f32>::zeros((vertices.len(), ncoefs));

    for (row, v) in vertices.iter().enumerate() {
        let v = v.normalize_or_zero().as_dvec3();
        let theta = v.z.clamp(-1.0, 1.0).acos();
        let phi = v.y.atan2(v.x);

        let mut col = 0;
        for l in (0..=image_order).step_by(2) {
            for m in -(l as i32)..=(l as i32) {
                if l <= use_order {
                    basis[[row, col]] = real_sh(l, m, theta, phi) as f32;
                }
                col += 1;
            }
        }
    }
    basis
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sphere_sizes() {
        let sphere = unit_sphere(16);
        assert_eq!(sphere.num_vertices(), 16 * 16);
        assert_eq!(sphere.num_indices(), 6 * 15 * 15);
        assert!(sphere.indices.iter().all(|&i| (i as usize) < sphere.num_vertices()));
        assert!(sphere.vertices.iter().all(|v| (v.length() - 1.0).abs() < 1e-5));
    }

    #[test]
    fn triangles_face_outwards() {
        let sphere = unit_sphere(8);
        for tri in sphere.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| sphere.vertices[i as usize]);
            let normal = (b - a).cross(c - a);
            if normal.length() > 1e-6 {
                assert!(normal.dot(a + b + c) > 0.0);
            }
        }
    }

    #[test]
    fn coefficient_counts() {
        let counts: Vec<_> = (0..=8).step_by(2).map(num_coefficients).collect();
        assert_eq!(counts, vec![1, 6, 15, 28, 45]);
        assert_eq!(order_for_coefficients(45), Some(8));
        assert_eq!(order_for_coefficients(7), None);
    }

    #[test]
    fn known_values() {
        let y00 = 1.0 / (2.0 * PI.sqrt());
        assert!((real_sh(0, 0, 0.3, 1.2) - y00).abs() < 1e-12);
        let y20_pole = (5.0 / (4.0 * PI)).sqrt();
        assert!((real_sh(2, 0, 0.0, 0.0) - y20_pole).abs() < 1e-12);
    }

    #[test]
    fn isotropic_coefficients_give_unit_radius() {
        let sphere = unit_sphere(6);
        let basis = sh_basis(&sphere.vertices, 4, 4);
        let mut coefs = ndarray::Array1::<f32>::zeros(15);
        coefs[0] = 2.0 * std::f32::consts::PI.sqrt();
        for r in basis.dot(&coefs).iter() {
            assert!((*r - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn higher_orders_can_be_dropped() {
        let sphere = unit_sphere(6);
        let basis = sh_basis(&sphere.vertices, 4, 2);
        assert_eq!(basis.dim(), (36, 15));
        assert!(basis.column(6).iter().all(|&v| v == 0.0));
        assert!(basis.column(5).iter().any(|&v| v != 0.0));
    }
}
