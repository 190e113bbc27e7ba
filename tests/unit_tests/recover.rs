use matrixcompare::assert_scalar_eq;
use nalgebra::{Matrix3, Point3};
use recoup::engine::RecoveryEngine;
use recoup::mesh::{RecoveryMesh, StructuredQuadMesh};
use recoup::recover::{
    par_recover_nodal_values, recover_nodal_values, recover_tensor_components, recovery_patch, FieldSamples,
    QpTableSamples,
};
use recoup::sync::SerialComm;
use recoup::{ElementId, RecoveryError};
use rustc_hash::{FxHashMap, FxHashSet};

fn linear(p: &Point3<f64>) -> f64 {
    3.0 * p.x - 2.0 * p.y + 1.0
}

#[test]
fn corner_patches_are_widened_by_one_ring() {
    let mesh = StructuredQuadMesh::new(2, 2, 1.0, [0.0, 0.0], 2);
    // Node 0 touches a single element; the widened patch unions the patches
    // of that element's nodes and covers the whole 2x2 mesh.
    let patch = recovery_patch(&mesh, 0, None).unwrap();
    assert_eq!(patch, vec![0, 1, 2, 3]);

    // An interior node is left alone.
    let patch = recovery_patch(&mesh, 4, None).unwrap();
    assert_eq!(patch, vec![0, 1, 2, 3]);
    let edge_patch = recovery_patch(&mesh, 1, None).unwrap();
    assert_eq!(edge_patch, vec![0, 1]);
}

#[test]
fn linear_field_is_recovered_exactly_at_every_node() {
    let mesh = StructuredQuadMesh::new(3, 2, 0.5, [-1.0, 2.0], 2);
    let mut engine = RecoveryEngine::new(&mesh, SerialComm, 1).unwrap();
    let provider = FieldSamples::new(&mesh, linear);

    let values = recover_nodal_values(&mut engine, &provider).unwrap();
    assert_eq!(values.len(), mesh.local_nodes().len());
    for (&node, &value) in mesh.local_nodes().iter().zip(&values) {
        let expected = linear(&mesh.node_position(node));
        assert_scalar_eq!(value, expected, comp = abs, tol = 1e-11);
    }
}

#[test]
fn corner_recovery_succeeds_after_widening() {
    // With a single quadrature point per element, a one-element corner patch
    // would be underdetermined for a linear fit; widening must rescue it.
    let mesh = StructuredQuadMesh::new(2, 2, 1.0, [0.0, 0.0], 1);
    let mut engine = RecoveryEngine::new(&mesh, SerialComm, 1).unwrap();
    let provider = FieldSamples::new(&mesh, linear);

    let values = recover_nodal_values(&mut engine, &provider).unwrap();
    let corner = mesh.node_position(0);
    assert_scalar_eq!(values[0], linear(&corner), comp = abs, tol = 1e-11);
}

#[test]
fn degenerate_mesh_reports_a_singular_patch() {
    // A single element with one quadrature point: widening cannot add
    // elements, so the linear fit must fail loudly.
    let mesh = StructuredQuadMesh::new(1, 1, 1.0, [0.0, 0.0], 1);
    let mut engine = RecoveryEngine::new(&mesh, SerialComm, 1).unwrap();
    let provider = FieldSamples::new(&mesh, linear);

    let err = recover_nodal_values(&mut engine, &provider).unwrap_err();
    match err {
        RecoveryError::AtNode { node: 0, source } => {
            assert!(matches!(*source, RecoveryError::SingularPatch { num_elements: 1, .. }));
        }
        other => panic!("expected a singular patch at node 0, got {other:?}"),
    }
}

#[test]
fn block_restricted_recovery_ignores_other_subdomains() {
    let mut mesh = StructuredQuadMesh::new(2, 1, 1.0, [0.0, 0.0], 2);
    mesh.set_subdomain(1, 7);

    let blocks: FxHashSet<_> = [0].into_iter().collect();
    let patch = recovery_patch(&mesh, 1, Some(&blocks)).unwrap();
    assert_eq!(patch, vec![0], "the excluded element never enters the patch, and widening finds nothing else");

    // A node surrounded only by the excluded block has no patch at all.
    let err = recovery_patch(&mesh, 2, Some(&blocks)).unwrap_err();
    assert_eq!(err, RecoveryError::EmptyPatch { node: 2 });
}

#[test]
fn qp_tables_and_field_sampling_agree() {
    let mesh = StructuredQuadMesh::new(3, 3, 1.0 / 3.0, [0.0, 0.0], 2);

    let mut table: FxHashMap<ElementId, Vec<f64>> = FxHashMap::default();
    for &element in mesh.local_elements() {
        let (_, points) = mesh.element_quadrature(element);
        table.insert(element, points.iter().map(linear).collect());
    }

    let mut engine = RecoveryEngine::new(&mesh, SerialComm, 1).unwrap();
    let from_table = recover_nodal_values(&mut engine, &QpTableSamples::new(&table)).unwrap();
    let from_field = recover_nodal_values(&mut engine, &FieldSamples::new(&mesh, linear)).unwrap();

    for (a, b) in from_table.iter().zip(&from_field) {
        assert_scalar_eq!(*a, *b, comp = abs, tol = 1e-13);
    }
}

#[test]
fn tensor_components_are_recovered_independently() {
    let mesh = StructuredQuadMesh::new(2, 2, 0.5, [0.0, 0.0], 2);

    // A stored tensor whose (0, 0) and (1, 1) components are linear fields.
    let sigma = |p: &Point3<f64>| {
        let mut t = Matrix3::zeros();
        t[(0, 0)] = 2.0 * p.x + p.y;
        t[(1, 1)] = p.x - 4.0 * p.y + 2.0;
        t
    };
    let mut table: FxHashMap<ElementId, Vec<Matrix3<f64>>> = FxHashMap::default();
    for &element in mesh.local_elements() {
        let (_, points) = mesh.element_quadrature(element);
        table.insert(element, points.iter().map(sigma).collect());
    }

    let mut engine = RecoveryEngine::new(&mesh, SerialComm, 1).unwrap();
    let components = recover_tensor_components(&mut engine, &table, &[(0, 0), (1, 1)]).unwrap();
    assert_eq!(components.len(), 2);

    for (&node, (&v00, &v11)) in mesh
        .local_nodes()
        .iter()
        .zip(components[0].iter().zip(&components[1]))
    {
        let t = sigma(&mesh.node_position(node));
        assert_scalar_eq!(v00, t[(0, 0)], comp = abs, tol = 1e-11);
        assert_scalar_eq!(v11, t[(1, 1)], comp = abs, tol = 1e-11);
    }
}

#[test]
fn parallel_and_serial_node_loops_agree() {
    let mesh = StructuredQuadMesh::new(4, 4, 0.25, [0.0, 0.0], 2);
    let provider = FieldSamples::new(&mesh, linear);

    let mut engine = RecoveryEngine::new(&mesh, SerialComm, 1).unwrap();
    let serial = recover_nodal_values(&mut engine, &provider).unwrap();
    let parallel = par_recover_nodal_values(&mut engine, &provider).unwrap();

    for (a, b) in serial.iter().zip(&parallel) {
        assert_scalar_eq!(*a, *b, comp = abs, tol = 1e-12);
    }
}
