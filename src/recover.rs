//! Node-loop drivers and ready-made sample providers.
//!
//! These are the consumer-facing entry points: they run a full accumulation
//! pass, synchronize, and then fit one nodal value per locally owned node.
//! Each provider supplies a different kind of quadrature-point data; all of
//! them go through the same engine contract.

use crate::engine::{RecoveryEngine, SampleProvider};
use crate::mesh::RecoveryMesh;
use crate::sync::PatchCommunicator;
use crate::{ElementId, NodeId, RecoveryError, SubdomainId};
use nalgebra::{Matrix3, Point3};
use parking_lot::Mutex;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use rustc_hash::{FxHashMap, FxHashSet};

/// Samples a spatial functor at the element's physical quadrature points.
///
/// This is the "recover a coupled field" provider: anything that can be
/// evaluated at a physical point (an analytic field, a finite element
/// interpolant, a manufactured solution) fits here.
pub struct FieldSamples<'a, M, F> {
    mesh: &'a M,
    field: F,
}

impl<'a, M, F> FieldSamples<'a, M, F>
where
    M: RecoveryMesh,
    F: Fn(&Point3<f64>) -> f64,
{
    pub fn new(mesh: &'a M, field: F) -> Self {
        Self { mesh, field }
    }
}

impl<'a, M, F> SampleProvider for FieldSamples<'a, M, F>
where
    M: RecoveryMesh,
    F: Fn(&Point3<f64>) -> f64,
{
    fn produce(&self, element: ElementId, qp: usize) -> f64 {
        let (_, points) = self.mesh.element_quadrature(element);
        (self.field)(&points[qp])
    }
}

/// Samples a per-element table of quadrature-point scalars, as produced by a
/// material model evaluated during a previous solve.
pub struct QpTableSamples<'a> {
    table: &'a FxHashMap<ElementId, Vec<f64>>,
}

impl<'a> QpTableSamples<'a> {
    pub fn new(table: &'a FxHashMap<ElementId, Vec<f64>>) -> Self {
        Self { table }
    }
}

impl<'a> SampleProvider for QpTableSamples<'a> {
    fn produce(&self, element: ElementId, qp: usize) -> f64 {
        self.table
            .get(&element)
            .expect("sample table must cover every accumulated element")[qp]
    }
}

/// Samples one fixed component of a per-element table of quadrature-point
/// tensors (stored stresses, strains, conductivities and the like).
pub struct TensorComponentSamples<'a> {
    table: &'a FxHashMap<ElementId, Vec<Matrix3<f64>>>,
    row: usize,
    col: usize,
}

impl<'a> TensorComponentSamples<'a> {
    pub fn new(table: &'a FxHashMap<ElementId, Vec<Matrix3<f64>>>, row: usize, col: usize) -> Self {
        assert!(row < 3 && col < 3, "tensor component indices must be within 3x3");
        Self { table, row, col }
    }
}

impl<'a> SampleProvider for TensorComponentSamples<'a> {
    fn produce(&self, element: ElementId, qp: usize) -> f64 {
        self.table
            .get(&element)
            .expect("tensor table must cover every accumulated element")[qp][(self.row, self.col)]
    }
}

/// The patch used to recover at `node`: its incident elements after block
/// restriction, widened by one ring when the immediate patch is a single
/// element (a mesh corner), so that the least-squares system does not become
/// under-determined there. The result is sorted and deduplicated, which is
/// also the canonical form the coefficient cache keys on.
pub fn recovery_patch<M: RecoveryMesh>(
    mesh: &M,
    node: NodeId,
    blocks: Option<&FxHashSet<SubdomainId>>,
) -> Result<Vec<ElementId>, RecoveryError> {
    let in_blocks =
        |element: ElementId| blocks.map_or(true, |blocks| blocks.contains(&mesh.element_subdomain(element)));

    let mut patch: Vec<ElementId> = mesh.node_patch(node).iter().copied().filter(|&e| in_blocks(e)).collect();
    if patch.is_empty() {
        return Err(RecoveryError::EmptyPatch { node });
    }
    if patch.len() == 1 {
        let seed = patch[0];
        for &other in mesh.element_nodes(seed) {
            patch.extend(mesh.node_patch(other).iter().copied().filter(|&e| in_blocks(e)));
        }
    }
    patch.sort_unstable();
    patch.dedup();
    Ok(patch)
}

/// Run a full recovery pass and fit one value per locally owned node.
///
/// The returned values are ordered like
/// [`RecoveryMesh::local_nodes`]. Collective over the engine's communicator.
pub fn recover_nodal_values<M, C, P>(engine: &mut RecoveryEngine<'_, M, C>, provider: &P) -> Result<Vec<f64>, RecoveryError>
where
    M: RecoveryMesh,
    C: PatchCommunicator,
    P: SampleProvider,
{
    engine.initialize();
    engine.execute_all(provider);
    engine.finalize();
    engine.sync()?;

    let mesh = engine.mesh();
    let blocks = engine.blocks().cloned();
    let mut values = Vec::with_capacity(mesh.local_nodes().len());
    for &node in mesh.local_nodes() {
        let patch = recovery_patch(mesh, node, blocks.as_ref())?;
        let position = mesh.node_position(node);
        let value = engine
            .nodal_patch_recovery(&position, &patch)
            .map_err(|source| source.at_node(node))?;
        values.push(value);
    }
    Ok(values)
}

/// Like [`recover_nodal_values`], with both the element loop and the node
/// loop on the rayon thread pool.
///
/// The engine is shared between the query threads behind a lock: the
/// coefficient cache has a single slot, so queries serialize there by design.
/// The parallel node loop therefore pays off only when patch construction and
/// basis evaluation dominate, e.g. on high polynomial orders.
pub fn par_recover_nodal_values<M, C, P>(
    engine: &mut RecoveryEngine<'_, M, C>,
    provider: &P,
) -> Result<Vec<f64>, RecoveryError>
where
    M: RecoveryMesh + Sync,
    C: PatchCommunicator + Send,
    P: SampleProvider + Sync,
{
    engine.initialize();
    engine.par_execute_all(provider);
    engine.finalize();
    engine.sync()?;

    let mesh = engine.mesh();
    let blocks = engine.blocks().cloned();
    let shared = Mutex::new(engine);
    mesh.local_nodes()
        .par_iter()
        .map(|&node| {
            let patch = recovery_patch(mesh, node, blocks.as_ref())?;
            let position = mesh.node_position(node);
            shared
                .lock()
                .nodal_patch_recovery(&position, &patch)
                .map_err(|source| source.at_node(node))
        })
        .collect()
}

/// Recover every requested component of a stored tensor quantity, one
/// accumulation pass per component.
///
/// Returns one nodal-value vector per requested `(row, col)` component.
pub fn recover_tensor_components<M, C>(
    engine: &mut RecoveryEngine<'_, M, C>,
    table: &FxHashMap<ElementId, Vec<Matrix3<f64>>>,
    components: &[(usize, usize)],
) -> Result<Vec<Vec<f64>>, RecoveryError>
where
    M: RecoveryMesh,
    C: PatchCommunicator,
{
    components
        .iter()
        .map(|&(row, col)| {
            let provider = TensorComponentSamples::new(table, row, col);
            recover_nodal_values(engine, &provider)
        })
        .collect()
}
