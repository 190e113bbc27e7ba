//! The mesh collaborator interface and a structured test-bed implementation.
//!
//! The recovery engine does not own a mesh data structure. It works against the
//! small [`RecoveryMesh`] trait, which exposes exactly what patch recovery
//! needs: the node-to-element incidence map, element ownership and subdomain
//! metadata, node positions and the per-element physical quadrature rule.
//!
//! [`StructuredQuadMesh`] is a complete in-tree implementation used by the test
//! suite; it doubles as a template for adapting a real mesh library.

use crate::quadrature;
use crate::{ElementId, NodeId, Rank, SubdomainId};
use nalgebra::Point3;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Ownership of an element in the semilocal view of a rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ownership {
    /// The element is owned (and accumulated) by the current rank.
    Owned,
    /// The element is visible to the current rank but owned elsewhere; the
    /// value is the owning rank.
    Ghost(Rank),
}

/// Mesh facilities required by patch recovery.
///
/// The *semilocal* view of a rank comprises its owned elements plus the ghost
/// elements incident to its nodes. `node_patch` must report every semilocal
/// element incident to a node, including ghosts, so that the synchronizer can
/// determine which contributions to fetch from remote ranks.
pub trait RecoveryMesh {
    /// Spatial dimension of the mesh (1, 2 or 3).
    fn dimension(&self) -> usize;

    /// Elements owned by the current rank, i.e. those accumulated locally.
    fn local_elements(&self) -> &[ElementId];

    /// Nodes assigned to the current rank for recovery.
    fn local_nodes(&self) -> &[NodeId];

    /// All semilocal elements incident to `node`.
    fn node_patch(&self, node: NodeId) -> &[ElementId];

    /// Ownership of a semilocal element.
    fn element_ownership(&self, element: ElementId) -> Ownership;

    /// Subdomain (block) of a semilocal element.
    fn element_subdomain(&self, element: ElementId) -> SubdomainId;

    /// Nodes of a semilocal element.
    fn element_nodes(&self, element: ElementId) -> &[NodeId];

    /// Position of a node.
    fn node_position(&self, node: NodeId) -> Point3<f64>;

    /// Physical quadrature rule of an owned element: weights already include
    /// the Jacobian measure, points are in physical coordinates.
    fn element_quadrature(&self, element: ElementId) -> (&[f64], &[Point3<f64>]);
}

/// An axis-aligned uniform quadrilateral mesh with tensor-product Gauss
/// quadrature.
///
/// Nodes and elements are numbered row-major from the lower-left corner;
/// element `(i, j)` has index `j * nx + i` and its nodes are listed
/// counterclockwise starting from the lower-left one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredQuadMesh {
    nx: usize,
    ny: usize,
    cell_size: f64,
    origin: [f64; 2],
    element_nodes: Vec<[NodeId; 4]>,
    node_patches: Vec<Vec<ElementId>>,
    subdomains: Vec<SubdomainId>,
    all_elements: Vec<ElementId>,
    all_nodes: Vec<NodeId>,
    // Physical quadrature: the weights are shared by all elements of a uniform
    // mesh, the points are not.
    qweights: Vec<f64>,
    qpoints: Vec<Vec<Point3<f64>>>,
}

impl StructuredQuadMesh {
    /// Build an `nx` by `ny` uniform quad mesh with the given cell size and
    /// lower-left corner, carrying a tensor-product Gauss rule with
    /// `quadrature_points_per_dim` points per dimension on every element.
    pub fn new(nx: usize, ny: usize, cell_size: f64, origin: [f64; 2], quadrature_points_per_dim: usize) -> Self {
        assert!(nx > 0 && ny > 0, "mesh must have at least one element");
        assert!(cell_size > 0.0, "cell size must be positive");

        let num_elements = nx * ny;
        let num_nodes = (nx + 1) * (ny + 1);
        let node_index = |i: usize, j: usize| j * (nx + 1) + i;

        let mut element_nodes = Vec::with_capacity(num_elements);
        let mut node_patches = vec![Vec::new(); num_nodes];
        for j in 0..ny {
            for i in 0..nx {
                let element = element_nodes.len();
                let nodes = [
                    node_index(i, j),
                    node_index(i + 1, j),
                    node_index(i + 1, j + 1),
                    node_index(i, j + 1),
                ];
                for node in nodes {
                    node_patches[node].push(element);
                }
                element_nodes.push(nodes);
            }
        }

        let (ref_weights, ref_points) = quadrature::quadrilateral_gauss(quadrature_points_per_dim);
        // Affine map from [-1, 1]^2: the Jacobian measure is (h / 2)^2.
        let jacobian = (cell_size / 2.0) * (cell_size / 2.0);
        let qweights: Vec<_> = ref_weights.iter().map(|w| w * jacobian).collect();
        let qpoints = (0..num_elements)
            .map(|element| {
                let i = element % nx;
                let j = element / nx;
                let cx = origin[0] + (i as f64 + 0.5) * cell_size;
                let cy = origin[1] + (j as f64 + 0.5) * cell_size;
                ref_points
                    .iter()
                    .map(|&[xi, eta]| Point3::new(cx + 0.5 * cell_size * xi, cy + 0.5 * cell_size * eta, 0.0))
                    .collect()
            })
            .collect();

        Self {
            nx,
            ny,
            cell_size,
            origin,
            element_nodes,
            node_patches,
            subdomains: vec![0; num_elements],
            all_elements: (0..num_elements).collect(),
            all_nodes: (0..num_nodes).collect(),
            qweights,
            qpoints,
        }
    }

    pub fn num_elements(&self) -> usize {
        self.element_nodes.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.node_patches.len()
    }

    /// Assign an element to a subdomain (block).
    pub fn set_subdomain(&mut self, element: ElementId, subdomain: SubdomainId) {
        self.subdomains[element] = subdomain;
    }

    /// Split the mesh into `num_ranks` contiguous element stripes and return
    /// the per-rank semilocal views. Every element is owned by exactly one
    /// rank; every node is assigned to the lowest rank owning an incident
    /// element, so the per-rank node sets partition the mesh nodes.
    pub fn partition_stripes(self, num_ranks: usize) -> Vec<RankLocalMesh> {
        assert!(num_ranks > 0, "cannot partition into zero ranks");
        assert!(
            num_ranks <= self.num_elements(),
            "more ranks than elements leaves some ranks without work"
        );

        let num_elements = self.num_elements();
        let base = num_elements / num_ranks;
        let remainder = num_elements % num_ranks;
        let mut stripe_starts = Vec::with_capacity(num_ranks + 1);
        let mut start = 0;
        for rank in 0..num_ranks {
            stripe_starts.push(start);
            start += base + usize::from(rank < remainder);
        }
        stripe_starts.push(num_elements);

        let owner_of = |element: ElementId| stripe_starts.partition_point(|&s| s <= element) - 1;

        let mesh = Arc::new(self);
        (0..num_ranks)
            .map(|rank| {
                let owned: Vec<_> = (stripe_starts[rank]..stripe_starts[rank + 1]).collect();
                let local_nodes: Vec<_> = mesh
                    .all_nodes
                    .iter()
                    .copied()
                    .filter(|&node| {
                        mesh.node_patches[node]
                            .iter()
                            .map(|&e| owner_of(e))
                            .min()
                            .expect("structured mesh nodes always touch an element")
                            == rank
                    })
                    .collect();
                let ownership = mesh
                    .all_elements
                    .iter()
                    .map(|&element| {
                        let owner = owner_of(element);
                        let ownership = if owner == rank { Ownership::Owned } else { Ownership::Ghost(owner) };
                        (element, ownership)
                    })
                    .collect();
                RankLocalMesh {
                    mesh: Arc::clone(&mesh),
                    rank,
                    owned,
                    local_nodes,
                    ownership,
                }
            })
            .collect()
    }
}

impl RecoveryMesh for StructuredQuadMesh {
    fn dimension(&self) -> usize {
        2
    }

    fn local_elements(&self) -> &[ElementId] {
        &self.all_elements
    }

    fn local_nodes(&self) -> &[NodeId] {
        &self.all_nodes
    }

    fn node_patch(&self, node: NodeId) -> &[ElementId] {
        &self.node_patches[node]
    }

    fn element_ownership(&self, _element: ElementId) -> Ownership {
        Ownership::Owned
    }

    fn element_subdomain(&self, element: ElementId) -> SubdomainId {
        self.subdomains[element]
    }

    fn element_nodes(&self, element: ElementId) -> &[NodeId] {
        &self.element_nodes[element]
    }

    fn node_position(&self, node: NodeId) -> Point3<f64> {
        let i = node % (self.nx + 1);
        let j = node / (self.nx + 1);
        Point3::new(
            self.origin[0] + i as f64 * self.cell_size,
            self.origin[1] + j as f64 * self.cell_size,
            0.0,
        )
    }

    fn element_quadrature(&self, element: ElementId) -> (&[f64], &[Point3<f64>]) {
        (&self.qweights, &self.qpoints[element])
    }
}

/// The semilocal view of one rank of a stripe-partitioned
/// [`StructuredQuadMesh`].
///
/// Geometry, incidence and quadrature are those of the underlying mesh; only
/// ownership and the local element/node sets differ per rank. Because the
/// underlying mesh is fully known, every element incident to a local node is
/// semilocal, which is exactly the visibility a distributed mesh provides
/// through ghost layers.
#[derive(Debug, Clone)]
pub struct RankLocalMesh {
    mesh: Arc<StructuredQuadMesh>,
    rank: Rank,
    owned: Vec<ElementId>,
    local_nodes: Vec<NodeId>,
    ownership: FxHashMap<ElementId, Ownership>,
}

impl RankLocalMesh {
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// The underlying unpartitioned mesh.
    pub fn full_mesh(&self) -> &StructuredQuadMesh {
        &self.mesh
    }
}

impl RecoveryMesh for RankLocalMesh {
    fn dimension(&self) -> usize {
        self.mesh.dimension()
    }

    fn local_elements(&self) -> &[ElementId] {
        &self.owned
    }

    fn local_nodes(&self) -> &[NodeId] {
        &self.local_nodes
    }

    fn node_patch(&self, node: NodeId) -> &[ElementId] {
        self.mesh.node_patch(node)
    }

    fn element_ownership(&self, element: ElementId) -> Ownership {
        self.ownership[&element]
    }

    fn element_subdomain(&self, element: ElementId) -> SubdomainId {
        self.mesh.element_subdomain(element)
    }

    fn element_nodes(&self, element: ElementId) -> &[NodeId] {
        self.mesh.element_nodes(element)
    }

    fn node_position(&self, node: NodeId) -> Point3<f64> {
        self.mesh.node_position(node)
    }

    fn element_quadrature(&self, element: ElementId) -> (&[f64], &[Point3<f64>]) {
        self.mesh.element_quadrature(element)
    }
}
