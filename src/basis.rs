//! Multi-index monomial bases for patch polynomials.

use crate::RecoveryError;
use nalgebra::{DVector, Point3};

/// A complete monomial basis of total degree `<= order` in `dim` variables.
///
/// The basis is defined by its exponent table: entry `k` is the multi-index
/// `(i, j, k)` of the monomial `x^i y^j z^k`. The table ordering is fixed at
/// construction and shared by everything that works with the same basis, since
/// fitted coefficients are matched to terms positionally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonomialBasis {
    dim: usize,
    order: usize,
    powers: Vec<[usize; 3]>,
}

impl MonomialBasis {
    /// Construct the basis for the given spatial dimension and total order.
    ///
    /// Points are always addressed with three coordinates; a basis of dimension
    /// `d < 3` simply ignores the trailing coordinates.
    pub fn new(dim: usize, order: usize) -> Result<Self, RecoveryError> {
        let powers = match dim {
            1 => (0..=order).map(|i| [i, 0, 0]).collect(),
            2 => {
                let mut powers = Vec::new();
                for i in 0..=order {
                    for j in 0..=(order - i) {
                        powers.push([i, j, 0]);
                    }
                }
                powers
            }
            3 => {
                let mut powers = Vec::new();
                for i in 0..=order {
                    for j in 0..=(order - i) {
                        for k in 0..=(order - i - j) {
                            powers.push([i, j, k]);
                        }
                    }
                }
                powers
            }
            d => return Err(RecoveryError::UnsupportedDimension(d)),
        };
        Ok(Self { dim, order, powers })
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of monomial terms, i.e. the size of the patch linear systems.
    pub fn num_terms(&self) -> usize {
        self.powers.len()
    }

    /// The exponent table, one `[i, j, k]` triple per term.
    pub fn powers(&self) -> &[[usize; 3]] {
        &self.powers
    }

    /// Evaluate every basis monomial at `point`.
    pub fn evaluate(&self, point: &Point3<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(self.num_terms());
        self.evaluate_into(point, &mut out);
        out
    }

    /// Evaluate every basis monomial at `point` into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer length differs from [`MonomialBasis::num_terms`].
    pub fn evaluate_into(&self, point: &Point3<f64>, out: &mut DVector<f64>) {
        assert_eq!(
            out.len(),
            self.num_terms(),
            "basis buffer must hold one entry per monomial term"
        );
        for (slot, pow) in out.iter_mut().zip(&self.powers) {
            *slot = point.x.powi(pow[0] as i32) * point.y.powi(pow[1] as i32) * point.z.powi(pow[2] as i32);
        }
    }
}
