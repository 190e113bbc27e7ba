//! Per-element normal-equations contributions and their accumulation.

use crate::basis::MonomialBasis;
use crate::ElementId;
use itertools::izip;
use nalgebra::{DMatrix, DVector, Point3};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// One element's contribution to the normal equations of every patch that
/// contains it: the pair `(A_e, b_e)` with
/// `A_e = sum_q w_q p(x_q) p(x_q)^T` and `b_e = sum_q w_q p(x_q) u_q`.
///
/// `A_e` is symmetric positive semi-definite by construction; it only becomes
/// singular when the element carries fewer independent samples than the basis
/// has terms, which surfaces as a solver error once patches are summed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementContribution {
    a: DMatrix<f64>,
    b: DVector<f64>,
}

impl ElementContribution {
    /// A zero contribution for a basis with `num_terms` monomials.
    pub fn zeros(num_terms: usize) -> Self {
        Self {
            a: DMatrix::zeros(num_terms, num_terms),
            b: DVector::zeros(num_terms),
        }
    }

    pub fn num_terms(&self) -> usize {
        self.b.len()
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.a
    }

    pub fn vector(&self) -> &DVector<f64> {
        &self.b
    }

    /// Rank-one update from a single weighted sample: `A += w p p^T`,
    /// `b += w value p`.
    pub fn add_sample(&mut self, weight: f64, basis_values: &DVector<f64>, value: f64) {
        self.a.ger(weight, basis_values, basis_values, 1.0);
        self.b.axpy(weight * value, basis_values, 1.0);
    }

    /// Element-wise sum with another contribution for the same element, as
    /// produced by a different thread of the accumulation loop.
    pub fn merge(&mut self, other: &ElementContribution) {
        assert_eq!(self.num_terms(), other.num_terms(), "cannot merge contributions of different bases");
        self.a += &other.a;
        self.b += &other.b;
    }

    /// Add this contribution into a summed patch system.
    pub fn add_to(&self, a: &mut DMatrix<f64>, b: &mut DVector<f64>) {
        *a += &self.a;
        *b += &self.b;
    }
}

/// Per-element contributions of one accumulation pass, keyed by element id.
pub type PatchMap = FxHashMap<ElementId, ElementContribution>;

/// Accumulate one element's quadrature samples into its contribution.
///
/// `weights` are the element's physical quadrature weights (Jacobian measure
/// included), `points` the physical quadrature points and `samples` the scalar
/// data being recovered, one entry per quadrature point. `basis_buffer` is
/// scratch storage for the basis values, sized to the basis.
///
/// # Panics
///
/// Panics if the element has no quadrature points or the slice lengths are
/// inconsistent; both indicate a broken caller, not recoverable input.
pub fn accumulate_element(
    basis: &MonomialBasis,
    weights: &[f64],
    points: &[Point3<f64>],
    samples: &[f64],
    basis_buffer: &mut DVector<f64>,
    contribution: &mut ElementContribution,
) {
    assert!(!weights.is_empty(), "element must carry at least one quadrature point");
    assert_eq!(weights.len(), points.len(), "one quadrature weight per quadrature point");
    assert_eq!(weights.len(), samples.len(), "one sample per quadrature point");

    for (&w, x, &u) in izip!(weights, points, samples) {
        basis.evaluate_into(x, basis_buffer);
        contribution.add_sample(w, basis_buffer, u);
    }
}

/// Merge a thread's partial map into `into`, summing contributions for
/// elements present in both.
pub fn merge_maps(into: &mut PatchMap, from: PatchMap) {
    for (element, contribution) in from {
        match into.entry(element) {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                occupied.get_mut().merge(&contribution);
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(contribution);
            }
        }
    }
}
