//! The recovery engine: accumulation, thread joining, synchronization and
//! coefficient queries.

use crate::basis::MonomialBasis;
use crate::mesh::RecoveryMesh;
use crate::patch::{accumulate_element, merge_maps, ElementContribution, PatchMap};
use crate::solver::PatchSolver;
use crate::sync::{synchronize, PatchCommunicator};
use crate::{ElementId, RecoveryError, SubdomainId};
use davenport::{define_thread_local_workspace, with_thread_local_workspace};
use nalgebra::{DVector, Point3};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use rustc_hash::FxHashSet;
use std::cell::RefCell;
use thread_local::ThreadLocal;

define_thread_local_workspace!(QUERY_WORKSPACE);

/// Supplies the scalar being recovered, one value per quadrature point.
///
/// This is the single customization point of the engine: a provider may read a
/// coupled variable, a material property table, one component of a stored
/// tensor, or anything else that is defined at the quadrature points of the
/// locally owned elements. Ready-made providers live in [`crate::recover`].
pub trait SampleProvider {
    fn produce(&self, element: ElementId, qp: usize) -> f64;
}

impl<F> SampleProvider for F
where
    F: Fn(ElementId, usize) -> f64,
{
    fn produce(&self, element: ElementId, qp: usize) -> f64 {
        self(element, qp)
    }
}

/// Pass phases of the engine. Ordering violations are programmer errors and
/// panic immediately rather than producing stale recovered values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Element contributions are being accumulated (and thread-joined).
    Accumulating,
    /// Local accumulation is finalized; queries are allowed and trigger the
    /// cross-rank exchange lazily.
    LocalComplete,
}

/// Orchestrates one patch-recovery pass over the distributed element loop.
///
/// A pass is: [`initialize`](Self::initialize) (implicit in the constructor),
/// [`execute`](Self::execute) per locally owned element (possibly from several
/// threads, merged with [`thread_join`](Self::thread_join)),
/// [`finalize`](Self::finalize), then queries. The one-time cross-rank
/// exchange runs lazily on the first query, or eagerly through
/// [`sync`](Self::sync); repeated calls within a pass perform no further
/// communication.
///
/// Queries take `&mut self` because they drive the single-slot coefficient
/// cache; an engine shared between query threads must be wrapped in a lock,
/// which is exactly the serialization point described in
/// [`PatchSolver`](crate::solver::PatchSolver).
pub struct RecoveryEngine<'a, M, C> {
    mesh: &'a M,
    comm: C,
    basis: MonomialBasis,
    blocks: Option<FxHashSet<SubdomainId>>,
    contributions: PatchMap,
    phase: Phase,
    synced: bool,
    solver: PatchSolver,
    basis_buffer: DVector<f64>,
    sample_buffer: Vec<f64>,
}

struct ThreadState {
    map: PatchMap,
    basis_buffer: DVector<f64>,
    sample_buffer: Vec<f64>,
}

#[derive(Debug)]
struct QueryBuffer {
    basis_values: DVector<f64>,
}

impl Default for QueryBuffer {
    fn default() -> Self {
        Self {
            basis_values: DVector::zeros(0),
        }
    }
}

impl<'a, M, C> RecoveryEngine<'a, M, C>
where
    M: RecoveryMesh,
    C: PatchCommunicator,
{
    /// Create an engine fitting patch polynomials of total degree `order` on
    /// the given mesh. The new engine is ready to accumulate.
    pub fn new(mesh: &'a M, comm: C, order: usize) -> Result<Self, RecoveryError> {
        let basis = MonomialBasis::new(mesh.dimension(), order)?;
        let num_terms = basis.num_terms();
        Ok(Self {
            mesh,
            comm,
            basis,
            blocks: None,
            contributions: PatchMap::default(),
            phase: Phase::Accumulating,
            synced: false,
            solver: PatchSolver::new(),
            basis_buffer: DVector::zeros(num_terms),
            sample_buffer: Vec::new(),
        })
    }

    /// Restrict the engine to elements of the given subdomains. Elements
    /// outside the restriction are not accumulated and never become part of
    /// any patch.
    pub fn with_blocks(mut self, blocks: impl IntoIterator<Item = SubdomainId>) -> Self {
        self.blocks = Some(blocks.into_iter().collect());
        self
    }

    pub fn mesh(&self) -> &'a M {
        self.mesh
    }

    pub fn communicator(&self) -> &C {
        &self.comm
    }

    pub fn basis(&self) -> &MonomialBasis {
        &self.basis
    }

    /// The shared exponent table of the patch polynomial basis.
    pub fn multi_index(&self) -> &[[usize; 3]] {
        self.basis.powers()
    }

    pub fn blocks(&self) -> Option<&FxHashSet<SubdomainId>> {
        self.blocks.as_ref()
    }

    /// Number of element contributions currently stored (local plus received).
    pub fn num_contributions(&self) -> usize {
        self.contributions.len()
    }

    pub fn contribution(&self, element: ElementId) -> Option<&ElementContribution> {
        self.contributions.get(&element)
    }

    /// Begin a new pass: drop all element contributions, reset the
    /// synchronization state and invalidate the coefficient cache.
    pub fn initialize(&mut self) {
        self.contributions.clear();
        self.synced = false;
        self.solver.invalidate();
        self.phase = Phase::Accumulating;
    }

    fn in_blocks(&self, element: ElementId) -> bool {
        self.blocks
            .as_ref()
            .map_or(true, |blocks| blocks.contains(&self.mesh.element_subdomain(element)))
    }

    /// Accumulate one element's quadrature samples.
    ///
    /// # Panics
    ///
    /// Panics if called after [`finalize`](Self::finalize); accumulating into
    /// an already synchronized pass would desynchronize the ranks.
    pub fn execute<P: SampleProvider>(&mut self, element: ElementId, provider: &P) {
        assert_eq!(
            self.phase,
            Phase::Accumulating,
            "execute() called after local accumulation was finalized"
        );
        if !self.in_blocks(element) {
            return;
        }

        let mesh = self.mesh;
        let (weights, points) = mesh.element_quadrature(element);
        self.sample_buffer.clear();
        self.sample_buffer
            .extend((0..weights.len()).map(|qp| provider.produce(element, qp)));

        let num_terms = self.basis.num_terms();
        let contribution = self
            .contributions
            .entry(element)
            .or_insert_with(|| ElementContribution::zeros(num_terms));
        accumulate_element(
            &self.basis,
            weights,
            points,
            &self.sample_buffer,
            &mut self.basis_buffer,
            contribution,
        );
    }

    /// Accumulate every locally owned element on the calling thread.
    pub fn execute_all<P: SampleProvider>(&mut self, provider: &P) {
        for &element in self.mesh.local_elements() {
            self.execute(element, provider);
        }
    }

    /// Accumulate every locally owned element using the rayon thread pool.
    ///
    /// Each worker thread accumulates into its own map; the partial maps are
    /// merged through [`thread_join`](Self::thread_join) before this returns.
    pub fn par_execute_all<P>(&mut self, provider: &P)
    where
        P: SampleProvider + Sync,
        M: Sync,
    {
        assert_eq!(
            self.phase,
            Phase::Accumulating,
            "par_execute_all() called after local accumulation was finalized"
        );

        let mesh = self.mesh;
        let basis = &self.basis;
        let blocks = self.blocks.as_ref();
        let num_terms = basis.num_terms();

        let partials: ThreadLocal<RefCell<ThreadState>> = ThreadLocal::new();
        mesh.local_elements().par_iter().for_each(|&element| {
            if let Some(blocks) = blocks {
                if !blocks.contains(&mesh.element_subdomain(element)) {
                    return;
                }
            }
            let mut state = partials
                .get_or(|| {
                    RefCell::new(ThreadState {
                        map: PatchMap::default(),
                        basis_buffer: DVector::zeros(num_terms),
                        sample_buffer: Vec::new(),
                    })
                })
                .borrow_mut();
            let ThreadState {
                map,
                basis_buffer,
                sample_buffer,
            } = &mut *state;

            let (weights, points) = mesh.element_quadrature(element);
            sample_buffer.clear();
            sample_buffer.extend((0..weights.len()).map(|qp| provider.produce(element, qp)));

            let contribution = map
                .entry(element)
                .or_insert_with(|| ElementContribution::zeros(num_terms));
            accumulate_element(basis, weights, points, sample_buffer, basis_buffer, contribution);
        });

        for state in partials.into_iter() {
            self.thread_join(state.into_inner().map);
        }
    }

    /// Merge another thread's partial contributions into this engine,
    /// summing where both accumulated the same element.
    pub fn thread_join(&mut self, partial: PatchMap) {
        assert_eq!(
            self.phase,
            Phase::Accumulating,
            "thread_join() called after local accumulation was finalized"
        );
        merge_maps(&mut self.contributions, partial);
    }

    /// Mark local accumulation as complete. The cross-rank exchange is
    /// deferred until the first query (or an explicit [`sync`](Self::sync)).
    pub fn finalize(&mut self) {
        assert_eq!(self.phase, Phase::Accumulating, "finalize() called twice in one pass");
        self.phase = Phase::LocalComplete;
    }

    /// Perform the one-time cross-rank exchange of missing contributions.
    ///
    /// Collective over the communicator's ranks. Calling it again within the
    /// same pass is a no-op.
    pub fn sync(&mut self) -> Result<(), RecoveryError> {
        assert_eq!(
            self.phase,
            Phase::LocalComplete,
            "sync() requires finalized local accumulation"
        );
        if self.synced {
            return Ok(());
        }
        synchronize(&mut self.contributions, self.mesh, &self.comm, self.blocks.as_ref(), None)?;
        self.synced = true;
        Ok(())
    }

    /// Refresh the contributions of the given elements only, regardless of the
    /// pass's synchronization state. Collective; used when only a subset of
    /// elements became newly relevant (e.g. after local mesh adaptivity).
    pub fn resync(&mut self, elements: &[ElementId]) -> Result<(), RecoveryError> {
        assert_eq!(
            self.phase,
            Phase::LocalComplete,
            "resync() requires finalized local accumulation"
        );
        synchronize(
            &mut self.contributions,
            self.mesh,
            &self.comm,
            self.blocks.as_ref(),
            Some(elements),
        )?;
        self.solver.invalidate();
        Ok(())
    }

    /// Fitted polynomial coefficients for the patch made of `elements`.
    ///
    /// Triggers the cross-rank exchange if it has not happened yet in this
    /// pass. Two consecutive calls with an identical element list return the
    /// cached coefficients without re-solving.
    ///
    /// # Panics
    ///
    /// Panics if local accumulation has not been finalized.
    pub fn get_coefficients(&mut self, elements: &[ElementId]) -> Result<&DVector<f64>, RecoveryError> {
        assert_eq!(
            self.phase,
            Phase::LocalComplete,
            "coefficients requested before local accumulation was finalized"
        );
        if !self.synced {
            self.sync()?;
        }
        self.solver.solve(elements, &self.contributions, self.basis.num_terms())
    }

    /// Evaluate the patch polynomial fitted over `elements` at `point`,
    /// typically a node position.
    pub fn nodal_patch_recovery(&mut self, point: &Point3<f64>, elements: &[ElementId]) -> Result<f64, RecoveryError> {
        with_thread_local_workspace(&QUERY_WORKSPACE, |buffer: &mut QueryBuffer| {
            buffer
                .basis_values
                .resize_vertically_mut(self.basis.num_terms(), 0.0);
            self.basis.evaluate_into(point, &mut buffer.basis_values);
            let coefficients = self.get_coefficients(elements)?;
            Ok(coefficients.dot(&buffer.basis_values))
        })
    }

    /// Number of patch factorizations performed so far; cache hits do not
    /// count. Intended for diagnostics.
    pub fn num_solves(&self) -> usize {
        self.solver.num_solves()
    }
}
