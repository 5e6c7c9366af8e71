pub mod body_sequence;

use std::collections::BTreeMap;

use wyrm_common::{
    types::{BlockHeader, BlockNumber},
    H512,
};

/// Peers are identified by their node id.
pub type PeerId = H512;

/// Labeled demerit attached to a peer, reported upward for the peer
/// management layer to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Penalty {
    None,
    /// The peer sat on a request past its deadline.
    Stale,
    /// The peer sent a block whose body does not match its header.
    BadBlock,
    /// The peer sent a reply we have no outstanding request for.
    Unexpected,
    /// The peer sent a packet that does not decode.
    MalformedPacket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerPenalization {
    pub peer_id: PeerId,
    pub penalty: Penalty,
}

impl PeerPenalization {
    pub fn new(peer_id: PeerId, penalty: Penalty) -> Self {
        Self { peer_id, penalty }
    }
}

/// Read-only view over the header stage the body downloader trails behind.
/// Backed by the node's store in production; tests use the in-memory map.
pub trait HeaderReader {
    fn header_by_number(&self, number: BlockNumber) -> Option<BlockHeader>;
}

impl HeaderReader for BTreeMap<BlockNumber, BlockHeader> {
    fn header_by_number(&self, number: BlockNumber) -> Option<BlockHeader> {
        self.get(&number).cloned()
    }
}

/// Running counters of the body download, readable by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadStatistics {
    pub requested_items: u64,
    pub received_items: u64,
    pub accepted_items: u64,
    pub rejected_items: u64,
}

impl std::fmt::Display for DownloadStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "requested={} received={} accepted={} rejected={}",
            self.requested_items, self.received_items, self.accepted_items, self.rejected_items
        )
    }
}
