use matrixcompare::assert_scalar_eq;
use recoup::mesh::{Ownership, RecoveryMesh, StructuredQuadMesh};

#[test]
fn structured_mesh_counts_and_positions() {
    let mesh = StructuredQuadMesh::new(3, 2, 0.5, [1.0, 2.0], 2);
    assert_eq!(mesh.num_elements(), 6);
    assert_eq!(mesh.num_nodes(), 12);
    assert_eq!(mesh.dimension(), 2);

    // Lower-left node of element 0 and its diagonal neighbor.
    let p0 = mesh.node_position(0);
    assert_scalar_eq!(p0.x, 1.0, comp = abs, tol = 1e-15);
    assert_scalar_eq!(p0.y, 2.0, comp = abs, tol = 1e-15);
    let p5 = mesh.node_position(5);
    assert_scalar_eq!(p5.x, 1.5, comp = abs, tol = 1e-15);
    assert_scalar_eq!(p5.y, 2.5, comp = abs, tol = 1e-15);
}

#[test]
fn node_patches_have_expected_sizes() {
    let mesh = StructuredQuadMesh::new(3, 3, 1.0, [0.0, 0.0], 2);
    // Corner node: 1 element, edge node: 2, interior node: 4.
    assert_eq!(mesh.node_patch(0), &[0][..]);
    assert_eq!(mesh.node_patch(1).len(), 2);
    let interior = 5; // node (1, 1)
    assert_eq!(mesh.node_patch(interior).len(), 4);
}

#[test]
fn quadrature_weights_sum_to_element_area() {
    let mesh = StructuredQuadMesh::new(2, 2, 0.25, [0.0, 0.0], 3);
    let (weights, points) = mesh.element_quadrature(3);
    assert_eq!(weights.len(), 9);
    assert_eq!(points.len(), 9);
    let area: f64 = weights.iter().sum();
    assert_scalar_eq!(area, 0.25 * 0.25, comp = abs, tol = 1e-14);
    // All points of element 3 (upper right cell) lie inside that cell.
    for p in points {
        assert!(p.x > 0.25 && p.x < 0.5);
        assert!(p.y > 0.25 && p.y < 0.5);
    }
}

#[test]
fn stripe_partition_covers_mesh_without_overlap() {
    let mesh = StructuredQuadMesh::new(4, 3, 1.0, [0.0, 0.0], 2);
    let num_elements = mesh.num_elements();
    let num_nodes = mesh.num_nodes();
    let parts = mesh.partition_stripes(3);
    assert_eq!(parts.len(), 3);

    let mut owned_elements: Vec<_> = parts.iter().flat_map(|p| p.local_elements().to_vec()).collect();
    owned_elements.sort_unstable();
    assert_eq!(owned_elements, (0..num_elements).collect::<Vec<_>>());

    let mut owned_nodes: Vec<_> = parts.iter().flat_map(|p| p.local_nodes().to_vec()).collect();
    owned_nodes.sort_unstable();
    assert_eq!(owned_nodes, (0..num_nodes).collect::<Vec<_>>());
}

#[test]
fn stripe_partition_ownership_is_consistent() {
    let parts = StructuredQuadMesh::new(4, 4, 1.0, [0.0, 0.0], 2).partition_stripes(2);
    for part in &parts {
        for &element in part.local_elements() {
            assert_eq!(part.element_ownership(element), Ownership::Owned);
        }
        // A ghost on one rank must be owned by the rank it names.
        for &node in part.local_nodes() {
            for &element in part.node_patch(node) {
                if let Ownership::Ghost(owner) = part.element_ownership(element) {
                    assert_ne!(owner, part.rank());
                    assert_eq!(parts[owner].element_ownership(element), Ownership::Owned);
                }
            }
        }
    }
}
