//! Superconvergent nodal patch recovery on distributed finite element meshes.
//!
//! Quadrature-point data is discontinuous across element boundaries. This crate
//! recovers a continuous nodal field from such data by fitting, per node, a
//! polynomial to the quadrature samples of the elements incident to the node
//! (its *patch*) in the weighted least-squares sense. On a partitioned mesh the
//! per-element normal-equations contributions are synchronized across ranks
//! before any patch is solved, so recovered values do not depend on the
//! partitioning.
//!
//! The typical flow is:
//!
//! 1. build a [`engine::RecoveryEngine`] for a mesh, a communicator and a
//!    polynomial order,
//! 2. run an accumulation pass over the locally owned elements with a
//!    [`engine::SampleProvider`] supplying one scalar per quadrature point,
//! 3. query fitted nodal values through
//!    [`engine::RecoveryEngine::nodal_patch_recovery`], or use the node-loop
//!    drivers in [`recover`].

pub mod basis;
pub mod engine;
pub mod mesh;
pub mod patch;
pub mod quadrature;
pub mod recover;
pub mod solver;
pub mod sync;

/// Identifier of a mesh element.
pub type ElementId = usize;

/// Identifier of a mesh node.
pub type NodeId = usize;

/// One unit of distributed-memory parallelism.
pub type Rank = usize;

/// Identifier of a mesh subdomain (block).
pub type SubdomainId = usize;

/// Library-wide error type.
///
/// Every failure here is fatal for the recovery pass it occurs in: a wrong
/// fitted value would silently corrupt whatever consumes it downstream, so no
/// variant is ever substituted with a default value or retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum RecoveryError {
    /// The requested spatial dimension cannot be handled by the monomial basis.
    #[error("spatial dimension {0} is not supported (expected 1, 2 or 3)")]
    UnsupportedDimension(usize),

    /// A node has no patch elements left after block restriction.
    #[error("the patch of node {node} is empty after block restriction")]
    EmptyPatch { node: NodeId },

    /// A patch references an element whose contribution was requested from its
    /// owning rank but never arrived. This indicates a corrupted
    /// node-to-element map or partitioning, not a transient condition.
    #[error("element {element} was requested from rank {owner} but no contribution was received")]
    MissingPatchElement { element: ElementId, owner: Rank },

    /// A patch references an element for which no contribution is stored
    /// locally and none was obtained during synchronization.
    #[error("no contribution is stored for element {element}")]
    MissingContribution { element: ElementId },

    /// The summed normal-equations matrix of a patch is singular or nearly so,
    /// i.e. the patch carries fewer independent samples than basis terms.
    #[error(
        "normal equations are singular for a patch of {num_elements} element(s) \
         and {num_terms} basis term(s); widen the patch or lower the order"
    )]
    SingularPatch { num_elements: usize, num_terms: usize },

    /// Failure while recovering the value at a specific node.
    #[error("recovery failed at node {node}")]
    AtNode {
        node: NodeId,
        #[source]
        source: Box<RecoveryError>,
    },
}

impl RecoveryError {
    /// Attach the node at which the failure surfaced.
    pub fn at_node(self, node: NodeId) -> Self {
        RecoveryError::AtNode {
            node,
            source: Box::new(self),
        }
    }
}
