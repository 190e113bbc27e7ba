//! Gauss quadrature rules for the structured mesh adapter.
//!
//! Rules are given on the reference domains `[-1, 1]^d`. The mesh adapter maps
//! points to physical coordinates and folds the Jacobian measure into the
//! weights before anything downstream sees them.

use std::f64::consts::PI;

/// A quadrature rule: weights and points on the reference domain.
pub type Rule<const D: usize> = (Vec<f64>, Vec<[f64; D]>);

/// Legendre polynomial value and first derivative at `x`, by the three-term
/// recurrence. The derivative formula is undefined at `|x| == 1`, which is
/// fine here since all Gauss points are interior.
fn legendre(n: usize, x: f64) -> (f64, f64) {
    let mut p = 1.0;
    let mut p_prev = 0.0;
    for m in 1..=n {
        let m = m as f64;
        let next = ((2.0 * m - 1.0) * x * p - (m - 1.0) * p_prev) / m;
        p_prev = p;
        p = next;
    }
    let n = n as f64;
    let dp = n * (x * p - p_prev) / (x * x - 1.0);
    (p, dp)
}

/// Gauss-Legendre rule with `num_points` points on `[-1, 1]`.
///
/// Integrates polynomials of degree up to `2 * num_points - 1` exactly.
///
/// # Panics
///
/// Panics if zero points are requested.
pub fn gauss(num_points: usize) -> Rule<1> {
    let n = num_points;
    assert!(n > 0, "number of quadrature points must be positive");

    let mut weights = Vec::with_capacity(n);
    let mut points = Vec::with_capacity(n);

    // Find the first half of the roots by Newton iteration from a cosine
    // initial guess; the rest follow by symmetry.
    for i in 0..(n + 1) / 2 {
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let mut dp;
        loop {
            let (p, dp_new) = legendre(n, x);
            dp = dp_new;
            let dx = -p / dp;
            x += dx;
            if dx.abs() <= 1e-15 {
                break;
            }
        }
        weights.push(2.0 / ((1.0 - x * x) * dp * dp));
        points.push([x]);
    }
    for i in points.len()..n {
        let mirror = n - i - 1;
        weights.push(weights[mirror]);
        points.push([-points[mirror][0]]);
    }

    (weights, points)
}

/// Tensor-product Gauss rule on the reference quadrilateral.
pub fn quadrilateral_gauss(points_per_dim: usize) -> Rule<2> {
    let (w1, p1) = gauss(points_per_dim);
    let mut weights = Vec::with_capacity(w1.len() * w1.len());
    let mut points = Vec::with_capacity(w1.len() * w1.len());
    for (&wx, &[x]) in w1.iter().zip(&p1) {
        for (&wy, &[y]) in w1.iter().zip(&p1) {
            weights.push(wx * wy);
            points.push([x, y]);
        }
    }
    (weights, points)
}

/// Tensor-product Gauss rule on the reference hexahedron.
pub fn hexahedron_gauss(points_per_dim: usize) -> Rule<3> {
    let (w1, p1) = gauss(points_per_dim);
    let n = w1.len();
    let mut weights = Vec::with_capacity(n * n * n);
    let mut points = Vec::with_capacity(n * n * n);
    for (&wx, &[x]) in w1.iter().zip(&p1) {
        for (&wy, &[y]) in w1.iter().zip(&p1) {
            for (&wz, &[z]) in w1.iter().zip(&p1) {
                weights.push(wx * wy * wz);
                points.push([x, y, z]);
            }
        }
    }
    (weights, points)
}
