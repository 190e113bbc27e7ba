//! Cross-rank synchronization of per-element patch contributions.
//!
//! On a partitioned mesh, the patch of a node on a partition boundary contains
//! elements owned by other ranks. Before any such patch can be solved, the
//! owning ranks' `(A_e, b_e)` pairs must be brought to the ranks that need
//! them. The protocol is a request/reply all-to-all: each rank announces which
//! element ids it needs from which owner, and the owners answer with the
//! corresponding contributions.
//!
//! The transport is abstracted behind [`PatchCommunicator`]. Two
//! implementations ship with the crate: [`SerialComm`] for single-rank runs
//! and [`ChannelComm`], which wires a fixed set of in-process ranks together
//! with channels so the full protocol can run inside ordinary tests. Binding
//! the trait to MPI point-to-point messaging is a downstream concern; the
//! packet types are serde-serializable for exactly that purpose.

use crate::mesh::{Ownership, RecoveryMesh};
use crate::patch::PatchMap;
use crate::{ElementId, Rank, RecoveryError, SubdomainId};
use log::debug;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};

use crate::patch::ElementContribution;

/// One element's contribution, addressed for the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementPacket {
    pub element: ElementId,
    pub contribution: ElementContribution,
}

/// The message-passing collaborator of the synchronizer.
///
/// Both exchanges are collective over the communicator's ranks: every rank
/// must enter them the same number of times, in the same order. `outgoing[r]`
/// is the payload destined for rank `r` (the slot addressed to the caller
/// itself is returned unchanged); the result is indexed by source rank.
pub trait PatchCommunicator {
    fn rank(&self) -> Rank;

    fn num_ranks(&self) -> usize;

    fn all_to_all_ids(&self, outgoing: Vec<Vec<ElementId>>) -> Vec<Vec<ElementId>>;

    fn all_to_all_contributions(&self, outgoing: Vec<Vec<ElementPacket>>) -> Vec<Vec<ElementPacket>>;
}

/// The trivial communicator of an unpartitioned run: one rank, every exchange
/// returns its own payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl PatchCommunicator for SerialComm {
    fn rank(&self) -> Rank {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn all_to_all_ids(&self, outgoing: Vec<Vec<ElementId>>) -> Vec<Vec<ElementId>> {
        assert_eq!(outgoing.len(), 1, "serial communicator exchanges with exactly one rank");
        outgoing
    }

    fn all_to_all_contributions(&self, outgoing: Vec<Vec<ElementPacket>>) -> Vec<Vec<ElementPacket>> {
        assert_eq!(outgoing.len(), 1, "serial communicator exchanges with exactly one rank");
        outgoing
    }
}

#[derive(Debug)]
enum Mail {
    Ids(Vec<ElementId>),
    Contributions(Vec<ElementPacket>),
}

/// An in-process communicator: every rank lives on its own thread and the
/// ranks exchange messages over channels.
///
/// Message consumption relies on the per-sender FIFO order of the underlying
/// channels: within one collective exchange each rank consumes exactly one
/// message per peer, so a message that arrives ahead of its exchange is parked
/// until the peer's earlier messages have been consumed.
#[derive(Debug)]
pub struct ChannelComm {
    rank: Rank,
    peers: Vec<Sender<(Rank, Mail)>>,
    inbox: Receiver<(Rank, Mail)>,
    parked: RefCell<Vec<VecDeque<Mail>>>,
}

impl ChannelComm {
    /// Wire up `num_ranks` connected communicators, one per rank, to be moved
    /// onto their worker threads.
    pub fn connected(num_ranks: usize) -> Vec<ChannelComm> {
        assert!(num_ranks > 0, "a communicator needs at least one rank");
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..num_ranks).map(|_| channel()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| ChannelComm {
                rank,
                peers: senders.clone(),
                inbox,
                parked: RefCell::new((0..num_ranks).map(|_| VecDeque::new()).collect()),
            })
            .collect()
    }

    fn exchange(&self, outgoing: Vec<Mail>) -> Vec<Mail> {
        let n = self.peers.len();
        assert_eq!(outgoing.len(), n, "one outgoing payload per rank is required");

        let mut gathered: Vec<Option<Mail>> = (0..n).map(|_| None).collect();
        for (to, mail) in outgoing.into_iter().enumerate() {
            if to == self.rank {
                gathered[to] = Some(mail);
            } else {
                self.peers[to]
                    .send((self.rank, mail))
                    .expect("peer rank terminated during a collective exchange");
            }
        }

        let mut parked = self.parked.borrow_mut();
        for (from, slot) in gathered.iter_mut().enumerate() {
            if slot.is_none() {
                if let Some(mail) = parked[from].pop_front() {
                    *slot = Some(mail);
                }
            }
        }
        while gathered.iter().any(Option::is_none) {
            let (from, mail) = self
                .inbox
                .recv()
                .expect("peer rank terminated during a collective exchange");
            if gathered[from].is_none() {
                gathered[from] = Some(mail);
            } else {
                parked[from].push_back(mail);
            }
        }

        gathered
            .into_iter()
            .map(|mail| mail.expect("every slot was just filled"))
            .collect()
    }
}

impl PatchCommunicator for ChannelComm {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.peers.len()
    }

    fn all_to_all_ids(&self, outgoing: Vec<Vec<ElementId>>) -> Vec<Vec<ElementId>> {
        self.exchange(outgoing.into_iter().map(Mail::Ids).collect())
            .into_iter()
            .map(|mail| match mail {
                Mail::Ids(ids) => ids,
                Mail::Contributions(_) => panic!("communicator protocol violation: expected element ids"),
            })
            .collect()
    }

    fn all_to_all_contributions(&self, outgoing: Vec<Vec<ElementPacket>>) -> Vec<Vec<ElementPacket>> {
        self.exchange(outgoing.into_iter().map(Mail::Contributions).collect())
            .into_iter()
            .map(|mail| match mail {
                Mail::Contributions(packets) => packets,
                Mail::Ids(_) => panic!("communicator protocol violation: expected contributions"),
            })
            .collect()
    }
}

/// Determine, per owning rank, which remote element contributions this rank
/// is missing.
///
/// The list covers the one-ring closure of the local nodes' patches: for every
/// local node, the patches of all nodes of all of its patch elements. The
/// closure is what corner-patch widening may reference, so gathering it here
/// guarantees that any patch a consumer can construct is resolvable after one
/// exchange.
pub fn gather_send_list<M: RecoveryMesh>(
    mesh: &M,
    present: &PatchMap,
    blocks: Option<&FxHashSet<SubdomainId>>,
    num_ranks: usize,
) -> Vec<Vec<ElementId>> {
    let in_blocks =
        |element: ElementId| blocks.map_or(true, |blocks| blocks.contains(&mesh.element_subdomain(element)));

    let mut seen = FxHashSet::default();
    let mut requests = vec![Vec::new(); num_ranks];
    let mut consider = |element: ElementId, requests: &mut Vec<Vec<ElementId>>| {
        if !seen.insert(element) || present.contains_key(&element) || !in_blocks(element) {
            return;
        }
        if let Ownership::Ghost(owner) = mesh.element_ownership(element) {
            requests[owner].push(element);
        }
    };

    for &node in mesh.local_nodes() {
        for &element in mesh.node_patch(node) {
            consider(element, &mut requests);
            for &other in mesh.element_nodes(element) {
                for &neighbor in mesh.node_patch(other) {
                    consider(neighbor, &mut requests);
                }
            }
        }
    }

    for list in &mut requests {
        list.sort_unstable();
    }
    requests
}

/// Exchange the missing contributions so that every element id referenced by
/// any locally needed patch has an entry in `contributions`.
///
/// With `restrict` given, only the listed element ids are refreshed (used for
/// incremental resynchronization, e.g. after local adaptivity); otherwise the
/// full send list from [`gather_send_list`] is used.
///
/// This call is collective: every rank of `comm` must enter it. A requested
/// element that its owner cannot supply is a corrupted node-to-element map or
/// partitioning and surfaces as [`RecoveryError::MissingPatchElement`].
pub fn synchronize<M: RecoveryMesh, C: PatchCommunicator>(
    contributions: &mut PatchMap,
    mesh: &M,
    comm: &C,
    blocks: Option<&FxHashSet<SubdomainId>>,
    restrict: Option<&[ElementId]>,
) -> Result<(), RecoveryError> {
    let num_ranks = comm.num_ranks();
    let requests = match restrict {
        Some(elements) => {
            let mut requests = vec![Vec::new(); num_ranks];
            for &element in elements {
                if contributions.contains_key(&element) {
                    continue;
                }
                if let Ownership::Ghost(owner) = mesh.element_ownership(element) {
                    requests[owner].push(element);
                }
            }
            for list in &mut requests {
                list.sort_unstable();
                list.dedup();
            }
            requests
        }
        None => gather_send_list(mesh, contributions, blocks, num_ranks),
    };

    debug!(
        "patch sync on rank {}: requesting {} remote contribution(s)",
        comm.rank(),
        requests.iter().map(Vec::len).sum::<usize>()
    );

    let wanted_from_us = comm.all_to_all_ids(requests.clone());
    let replies = wanted_from_us
        .iter()
        .map(|wanted| {
            wanted
                .iter()
                .filter_map(|&element| {
                    contributions.get(&element).map(|contribution| ElementPacket {
                        element,
                        contribution: contribution.clone(),
                    })
                })
                .collect()
        })
        .collect();
    let received = comm.all_to_all_contributions(replies);

    for packets in received {
        for packet in packets {
            contributions.insert(packet.element, packet.contribution);
        }
    }

    for (owner, wanted) in requests.iter().enumerate() {
        for &element in wanted {
            if !contributions.contains_key(&element) {
                let error = RecoveryError::MissingPatchElement { element, owner };
                // Name a node whose patch needed the element, when one exists;
                // that is where a corrupted incidence map has to be debugged.
                let node = mesh
                    .local_nodes()
                    .iter()
                    .copied()
                    .find(|&node| mesh.node_patch(node).contains(&element));
                return Err(match node {
                    Some(node) => error.at_node(node),
                    None => error,
                });
            }
        }
    }
    Ok(())
}
