//! The dense patch solve and its coefficient cache.

use crate::patch::PatchMap;
use crate::{ElementId, RecoveryError};
use log::trace;
use nalgebra::{Cholesky, DMatrix, DVector};

/// Relative lower bound on the Cholesky pivots; below it the summed patch
/// matrix is treated as singular even when the factorization nominally
/// succeeded through round-off.
const PIVOT_RATIO_FLOOR: f64 = 1.49e-8;

/// Solves the summed normal equations of a patch and caches the coefficients
/// of the most recently solved patch.
///
/// The cache deliberately holds a single entry: the dominant access pattern is
/// a burst of queries against one node's patch (one per component of a vector
/// or tensor quantity) before moving on to the next node. A query for a
/// different element-id list replaces the entry. Callers that interleave
/// queries for different patches from multiple threads therefore serialize on
/// whatever lock wraps the owning engine and defeat the cache; that is a known
/// property, not something to shard away silently.
#[derive(Debug, Default)]
pub struct PatchSolver {
    cache: Option<CacheEntry>,
    solves: usize,
}

#[derive(Debug)]
struct CacheEntry {
    elements: Vec<ElementId>,
    coefficients: DVector<f64>,
}

impl PatchSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the cached coefficients, forcing the next query to re-solve.
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    /// Number of factorizations performed so far (cache hits excluded).
    pub fn num_solves(&self) -> usize {
        self.solves
    }

    /// Sum the contributions of `elements` and solve for the patch
    /// coefficients, or return them from the cache if `elements` matches the
    /// previous query exactly.
    ///
    /// # Panics
    ///
    /// Panics if `elements` is empty; an empty patch must be rejected with
    /// node context before it reaches the solver.
    pub fn solve(
        &mut self,
        elements: &[ElementId],
        contributions: &PatchMap,
        num_terms: usize,
    ) -> Result<&DVector<f64>, RecoveryError> {
        assert!(!elements.is_empty(), "patch element list must not be empty");

        let hit = matches!(&self.cache, Some(entry) if entry.elements.as_slice() == elements);
        if !hit {
            trace!("coefficient cache miss for a patch of {} element(s)", elements.len());
            let coefficients = self.solve_uncached(elements, contributions, num_terms)?;
            self.cache = Some(CacheEntry {
                elements: elements.to_vec(),
                coefficients,
            });
        } else {
            trace!("coefficient cache hit for a patch of {} element(s)", elements.len());
        }
        Ok(&self.cache.as_ref().expect("cache was just populated").coefficients)
    }

    fn solve_uncached(
        &mut self,
        elements: &[ElementId],
        contributions: &PatchMap,
        num_terms: usize,
    ) -> Result<DVector<f64>, RecoveryError> {
        let mut a = DMatrix::zeros(num_terms, num_terms);
        let mut b = DVector::zeros(num_terms);
        for &element in elements {
            contributions
                .get(&element)
                .ok_or(RecoveryError::MissingContribution { element })?
                .add_to(&mut a, &mut b);
        }

        let singular = || RecoveryError::SingularPatch {
            num_elements: elements.len(),
            num_terms,
        };
        let cholesky = Cholesky::new(a).ok_or_else(singular)?;

        // A rank-deficient patch can slip past the factorization with tiny
        // positive pivots; treat those as singular rather than returning an
        // ill-conditioned fit.
        let l = cholesky.l_dirty();
        let mut pivot_min = f64::INFINITY;
        let mut pivot_max = 0.0f64;
        for i in 0..num_terms {
            pivot_min = pivot_min.min(l[(i, i)]);
            pivot_max = pivot_max.max(l[(i, i)]);
        }
        if pivot_min <= PIVOT_RATIO_FLOOR * pivot_max {
            return Err(singular());
        }

        self.solves += 1;
        Ok(cholesky.solve(&b))
    }
}
