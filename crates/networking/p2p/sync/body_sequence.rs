//! The body download sequencer: decides which block bodies to request from
//! peers, tracks outstanding requests against deadlines, ingests replies and
//! announcements, and hands over bodies ready for persistence.
//!
//! The sequencer performs no I/O of its own. An external driver ticks it
//! (`request_more_bodies`), ships the returned packet through the sentry,
//! and feeds replies back in; calls must not be issued concurrently.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use wyrm_common::types::{
    compute_ommers_hash, compute_transactions_root, compute_withdrawals_root, Block, BlockBody,
    BlockHash, BlockHeader, BlockNumber,
};
use wyrm_common::{H256, U256};

use crate::rlpx::eth::blocks::{BlockBodies, GetBlockBodies, NewBlock};

use super::{DownloadStatistics, HeaderReader, PeerId, PeerPenalization, Penalty};

/// After this, a response is considered lost and the request is re-issued.
pub const REQUEST_DEADLINE: Duration = Duration::from_secs(30);
/// Back-off after an outgoing request found no peer to take it.
pub const NO_PEER_DELAY: Duration = Duration::from_millis(500);
pub const PER_PEER_MAX_OUTSTANDING_REQUESTS: u64 = 4;
/// go-ethereum's acceptance limit for a single GetBlockBodies.
pub const MAX_BLOCKS_PER_MESSAGE: usize = 128;
pub const MAX_ANNOUNCED_BLOCKS: usize = 10_000;

/// One in-flight body request. Created when the height is first requested,
/// mutated on renewal and arrival, destroyed on withdrawal.
#[derive(Debug)]
struct BodyRequest {
    request_id: u64,
    block_hash: BlockHash,
    block_height: BlockNumber,
    header: BlockHeader,
    body: Option<BlockBody>,
    request_time: Instant,
    /// Peer the sentry dispatched the request to, when known.
    peer_id: Option<PeerId>,
    ready: bool,
}

/// Requests keyed by height, kept in ascending order, with the secondary
/// lookups the accept path needs.
#[derive(Debug, Default)]
struct RequestBook {
    requests: BTreeMap<BlockNumber, BodyRequest>,
}

impl RequestBook {
    fn lowest_block(&self) -> Option<BlockNumber> {
        self.requests.keys().next().copied()
    }

    fn highest_block(&self) -> Option<BlockNumber> {
        self.requests.keys().next_back().copied()
    }

    /// All heights belonging to a request batch (a batch shares one id).
    fn find_by_request_id(&self, request_id: u64) -> Vec<BlockNumber> {
        self.requests
            .iter()
            .filter(|(_, request)| request.request_id == request_id)
            .map(|(height, _)| *height)
            .collect()
    }

    /// Finds the request whose header matches the two roots recomputable
    /// from a received body. Unique per pair on any sane chain segment.
    fn find_by_hash(
        &self,
        ommers_hash: H256,
        transactions_root: H256,
    ) -> Option<BlockNumber> {
        self.requests
            .iter()
            .find(|(_, request)| {
                request.header.ommers_hash == ommers_hash
                    && request.header.transactions_root == transactions_root
            })
            .map(|(height, _)| *height)
    }

    fn clear(&mut self) {
        self.requests.clear();
    }
}

/// Multiset of request expiries bucketed by whole seconds, so a tick can
/// count everything overdue with one range scan.
#[derive(Debug)]
struct Deadlines {
    base: Instant,
    buckets: BTreeMap<u64, usize>,
}

impl Deadlines {
    fn new(base: Instant) -> Self {
        Self {
            base,
            buckets: BTreeMap::new(),
        }
    }

    // nearest-second bucket of an instant, relative to the base
    fn round(&self, tp: Instant) -> u64 {
        let millis = tp.saturating_duration_since(self.base).as_millis() as u64;
        (millis + 500) / 1000
    }

    fn add(&mut self, tp: Instant, cardinality: usize) {
        *self.buckets.entry(self.round(tp)).or_default() += cardinality;
    }

    fn remove(&mut self, tp: Instant, cardinality: usize) {
        let bucket = self.round(tp);
        if let Some(count) = self.buckets.get_mut(&bucket) {
            *count = count.saturating_sub(cardinality);
            if *count == 0 {
                self.buckets.remove(&bucket);
            }
        }
    }

    /// Total cardinality of buckets strictly before `tp`.
    fn expired(&self, tp: Instant) -> usize {
        let bucket = self.round(tp);
        self.buckets.range(..bucket).map(|(_, count)| *count).sum()
    }

    fn total(&self) -> usize {
        self.buckets.values().sum()
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }

    fn clear(&mut self) {
        self.buckets.clear();
    }
}

/// Peer-announced new blocks waiting for their headers to be reached by the
/// header stage. Bounded; the oldest announcement is evicted at the cap.
#[derive(Debug, Default)]
struct AnnouncedBlocks {
    blocks: BTreeMap<BlockNumber, Block>,
}

impl AnnouncedBlocks {
    fn add(&mut self, block: Block) {
        while self.blocks.len() >= MAX_ANNOUNCED_BLOCKS {
            self.blocks.pop_first();
        }
        self.blocks.insert(block.header.number, block);
    }

    fn remove(&mut self, block_number: BlockNumber) -> Option<Block> {
        self.blocks.remove(&block_number)
    }

    fn size(&self) -> usize {
        self.blocks.len()
    }
}

/// The sequence of block bodies being downloaded.
///
/// Responsibilities:
///   - decide what bodies to request from peers
///   - collect arriving bodies
///   - decide what bodies can be persisted to the db
pub struct BodySequence<R: HeaderReader> {
    body_requests: RequestBook,
    announced_blocks: AnnouncedBlocks,
    announcements_to_do: VecDeque<NewBlock>,
    header_reader: R,

    in_downloading: bool,
    ready_bodies: usize,
    highest_body_in_db: BlockNumber,
    headers_stage_height: BlockNumber,
    last_nack: Option<Instant>,
    request_deadlines: Deadlines,
    statistics: DownloadStatistics,
}

impl<R: HeaderReader> BodySequence<R> {
    pub fn new(header_reader: R) -> Self {
        Self {
            body_requests: RequestBook::default(),
            announced_blocks: AnnouncedBlocks::default(),
            announcements_to_do: VecDeque::new(),
            header_reader,
            in_downloading: false,
            ready_bodies: 0,
            highest_body_in_db: 0,
            headers_stage_height: 0,
            last_nack: None,
            request_deadlines: Deadlines::new(Instant::now()),
            statistics: DownloadStatistics::default(),
        }
    }

    /// Enters downloading mode; bodies are needed from
    /// `highest_body_in_db + 1` up to the header stage height.
    pub fn start_bodies_downloading(
        &mut self,
        highest_body_in_db: BlockNumber,
        highest_header_in_db: BlockNumber,
    ) {
        self.in_downloading = true;
        self.highest_body_in_db = highest_body_in_db;
        self.headers_stage_height = highest_header_in_db;
        debug!(
            "Body downloading started, target {} -> {}",
            highest_body_in_db, highest_header_in_db
        );
    }

    /// Leaves downloading mode, dropping outstanding requests and deadlines.
    pub fn stop_bodies_downloading(&mut self) {
        self.in_downloading = false;
        self.body_requests.clear();
        self.request_deadlines.clear();
        self.ready_bodies = 0;
    }

    /// One download tick: renews requests that blew their deadline (with a
    /// `Stale` penalty for the peer that owed them) and fills the packet
    /// with new heights, newest needs last. Returns the packet to send, the
    /// penalties collected, and the smallest height in the packet.
    ///
    /// The packet comes back empty when downloading is off, no peer is
    /// active, or the last request was nacked less than [`NO_PEER_DELAY`]
    /// ago.
    pub fn request_more_bodies(
        &mut self,
        tp: Instant,
        active_peers: u64,
    ) -> (GetBlockBodies, Vec<PeerPenalization>, BlockNumber) {
        let mut packet = GetBlockBodies::new(rand::random(), vec![]);
        let mut min_block: Option<BlockNumber> = None;

        if !self.in_downloading || active_peers == 0 {
            return (packet, vec![], 0);
        }
        if let Some(last_nack) = self.last_nack {
            if tp.saturating_duration_since(last_nack) < NO_PEER_DELAY {
                return (packet, vec![], 0);
            }
        }

        let penalizations =
            self.renew_stale_requests(&mut packet, &mut min_block, tp, REQUEST_DEADLINE);
        self.make_new_requests(&mut packet, &mut min_block, tp, REQUEST_DEADLINE, active_peers);

        (packet, penalizations, min_block.unwrap_or(0))
    }

    /// Records which peer the sentry dispatched a request batch to, so a
    /// later deadline miss can be attributed.
    pub fn request_sent(&mut self, request_id: u64, peer_id: PeerId) {
        for height in self.body_requests.find_by_request_id(request_id) {
            if let Some(request) = self.body_requests.requests.get_mut(&height) {
                request.peer_id = Some(peer_id);
            }
        }
    }

    /// The outgoing request could not be delivered to any peer: rewind the
    /// deadlines of its heights so the next tick re-issues them, and back
    /// off for [`NO_PEER_DELAY`].
    pub fn request_nack(&mut self, tp: Instant, packet: &GetBlockBodies) {
        let mut undelivered = 0;
        for height in self.body_requests.find_by_request_id(packet.id) {
            let Some(request) = self.body_requests.requests.get_mut(&height) else {
                continue;
            };
            if request.ready {
                continue;
            }
            self.request_deadlines
                .remove(request.request_time + REQUEST_DEADLINE, 1);
            request.request_time = tp.checked_sub(REQUEST_DEADLINE).unwrap_or(tp);
            request.peer_id = None;
            undelivered += 1;
        }
        self.last_nack = Some(tp);
        self.statistics.requested_items =
            self.statistics.requested_items.saturating_sub(undelivered);
        debug!("Request {} nacked, {} bodies rewound", packet.id, undelivered);
    }

    /// Processes a BlockBodies reply. Bodies are matched to outstanding
    /// requests through the roots recomputed from each body; a matched and
    /// valid body marks its request ready and drops its deadline. Returns
    /// the worst penalty earned by the reply.
    pub fn accept_requested_bodies(&mut self, packet: &BlockBodies, peer_id: &PeerId) -> Penalty {
        self.statistics.received_items += packet.block_bodies.len() as u64;

        if self.body_requests.find_by_request_id(packet.id).is_empty() {
            self.statistics.rejected_items += packet.block_bodies.len() as u64;
            return Penalty::Unexpected;
        }

        let mut penalty = Penalty::None;
        for body in &packet.block_bodies {
            let ommers_hash = compute_ommers_hash(&body.ommers);
            let transactions_root = compute_transactions_root(&body.transactions);

            let Some(height) = self
                .body_requests
                .find_by_hash(ommers_hash, transactions_root)
            else {
                // not an outstanding block, or garbled beyond recognition
                self.statistics.rejected_items += 1;
                penalty = Penalty::BadBlock;
                continue;
            };
            let Some(request) = self.body_requests.requests.get_mut(&height) else {
                continue;
            };
            if !withdrawals_agree(&request.header, body) {
                // the request stays in place and will be retried
                self.statistics.rejected_items += 1;
                penalty = Penalty::BadBlock;
                continue;
            }
            if request.ready {
                // duplicate delivery, nothing to do
                continue;
            }

            self.request_deadlines
                .remove(request.request_time + REQUEST_DEADLINE, 1);
            request.body = Some(body.clone());
            request.peer_id = Some(*peer_id);
            request.ready = true;
            self.ready_bodies += 1;
            self.statistics.accepted_items += 1;
        }
        penalty
    }

    /// Processes a peer's new-block announcement: structurally valid blocks
    /// are cached for the download to pick up once their height is reached,
    /// and queued for re-announcement.
    pub fn accept_new_block(
        &mut self,
        block: Block,
        total_difficulty: U256,
        peer_id: &PeerId,
    ) -> Penalty {
        if !is_valid_body(&block.header, &block.body) {
            warn!("Invalid new block {} from {}", block.header.number, peer_id);
            self.statistics.rejected_items += 1;
            return Penalty::BadBlock;
        }
        self.announcements_to_do
            .push_back(NewBlock::new(block.clone(), total_difficulty));
        self.announced_blocks.add(block);
        Penalty::None
    }

    /// Removes and returns every body that arrived, in ascending height
    /// order, advancing the database watermark.
    pub fn withdraw_ready_bodies(&mut self) -> Vec<Block> {
        let ready_heights: Vec<BlockNumber> = self
            .body_requests
            .requests
            .iter()
            .filter(|(_, request)| request.ready)
            .map(|(height, _)| *height)
            .collect();

        let mut withdrawn = Vec::with_capacity(ready_heights.len());
        for height in ready_heights {
            if let Some(request) = self.body_requests.requests.remove(&height) {
                self.highest_body_in_db = self.highest_body_in_db.max(request.block_height);
                let body = request.body.unwrap_or_default();
                withdrawn.push(Block::new(request.header, body));
            }
        }
        self.ready_bodies = self.ready_bodies.saturating_sub(withdrawn.len());
        withdrawn
    }

    /// Announcements collected from peers, for the caller to gossip on.
    pub fn announces_to_do(&mut self) -> &mut VecDeque<NewBlock> {
        &mut self.announcements_to_do
    }

    pub fn highest_block_in_db(&self) -> BlockNumber {
        self.highest_body_in_db
    }

    pub fn target_height(&self) -> BlockNumber {
        self.headers_stage_height
    }

    pub fn highest_block_in_memory(&self) -> Option<BlockNumber> {
        self.body_requests.highest_block()
    }

    pub fn lowest_block_in_memory(&self) -> Option<BlockNumber> {
        self.body_requests.lowest_block()
    }

    /// Requests still waiting for a body.
    pub fn outstanding_bodies(&self) -> usize {
        self.body_requests
            .requests
            .values()
            .filter(|request| !request.ready)
            .count()
    }

    pub fn ready_bodies(&self) -> usize {
        self.ready_bodies
    }

    pub fn has_bodies_to_request(&self, tp: Instant, active_peers: u64) -> bool {
        if !self.in_downloading || active_peers == 0 {
            return false;
        }
        self.request_deadlines.expired(tp) > 0
            || self.next_unrequested_height().is_some()
    }

    pub fn deadlines(&self) -> usize {
        self.request_deadlines.len()
    }

    pub fn statistics(&self) -> &DownloadStatistics {
        &self.statistics
    }

    fn renew_stale_requests(
        &mut self,
        packet: &mut GetBlockBodies,
        min_block: &mut Option<BlockNumber>,
        tp: Instant,
        timeout: Duration,
    ) -> Vec<PeerPenalization> {
        let mut penalizations = Vec::new();
        for (height, request) in self.body_requests.requests.iter_mut() {
            if request.ready || request.request_time + timeout >= tp {
                continue;
            }

            self.request_deadlines.remove(request.request_time + timeout, 1);
            if let Some(peer_id) = request.peer_id.take() {
                penalizations.push(PeerPenalization::new(peer_id, Penalty::Stale));
            }

            packet.block_hashes.push(request.block_hash);
            request.request_id = packet.id;
            request.request_time = tp;
            self.request_deadlines.add(tp + timeout, 1);
            self.statistics.requested_items += 1;
            *min_block = Some(min_block.map_or(*height, |min| min.min(*height)));
        }
        if !packet.block_hashes.is_empty() {
            debug!("Renewed {} stale body requests", packet.block_hashes.len());
        }
        penalizations
    }

    fn make_new_requests(
        &mut self,
        packet: &mut GetBlockBodies,
        min_block: &mut Option<BlockNumber>,
        tp: Instant,
        timeout: Duration,
        active_peers: u64,
    ) {
        // keep at most PER_PEER_MAX_OUTSTANDING_REQUESTS full packets in
        // flight per active peer
        let capacity = (PER_PEER_MAX_OUTSTANDING_REQUESTS * active_peers) as usize
            * MAX_BLOCKS_PER_MESSAGE;
        let available = capacity.saturating_sub(self.outstanding_bodies());
        let mut slots = MAX_BLOCKS_PER_MESSAGE
            .saturating_sub(packet.block_hashes.len())
            .min(available);

        let mut height = self.highest_body_in_db + 1;
        while slots > 0 && height <= self.headers_stage_height {
            if self.body_requests.requests.contains_key(&height) {
                height += 1;
                continue;
            }
            let Some(header) = self.header_reader.header_by_number(height) else {
                warn!("Header {} not found while requesting bodies", height);
                break;
            };
            let block_hash = header.compute_block_hash();
            let mut request = BodyRequest {
                request_id: packet.id,
                block_hash,
                block_height: height,
                header,
                body: None,
                request_time: tp,
                peer_id: None,
                ready: false,
            };

            // an earlier announcement can satisfy the request off the wire
            match self.announced_blocks.remove(height) {
                Some(announced) if announced.header.compute_block_hash() == block_hash => {
                    request.body = Some(announced.body);
                    request.ready = true;
                    self.ready_bodies += 1;
                    self.statistics.accepted_items += 1;
                }
                _ => {
                    packet.block_hashes.push(block_hash);
                    self.request_deadlines.add(tp + timeout, 1);
                    self.statistics.requested_items += 1;
                    *min_block = Some(min_block.map_or(height, |min| min.min(height)));
                    slots -= 1;
                }
            }

            self.body_requests.requests.insert(height, request);
            height += 1;
        }
    }

    fn next_unrequested_height(&self) -> Option<BlockNumber> {
        (self.highest_body_in_db + 1..=self.headers_stage_height)
            .find(|height| !self.body_requests.requests.contains_key(height))
    }
}

/// Standard body validity: the roots recomputed from the body must match
/// the ones committed in the header.
pub fn is_valid_body(header: &BlockHeader, body: &BlockBody) -> bool {
    header.ommers_hash == compute_ommers_hash(&body.ommers)
        && header.transactions_root == compute_transactions_root(&body.transactions)
        && withdrawals_agree(header, body)
}

fn withdrawals_agree(header: &BlockHeader, body: &BlockBody) -> bool {
    match (&header.withdrawals_root, &body.withdrawals) {
        (Some(root), Some(withdrawals)) => *root == compute_withdrawals_root(withdrawals),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wyrm_common::types::{LegacyTransaction, Transaction, TxKind};
    use wyrm_common::{Address, H512};

    fn peer(byte: u8) -> PeerId {
        H512::repeat_byte(byte)
    }

    fn body_for_height(height: BlockNumber) -> BlockBody {
        // distinct nonce per height keeps the transaction roots unique
        let tx = Transaction::LegacyTransaction(LegacyTransaction {
            nonce: height,
            gas_price: U256::from(1_000_000_000_u64),
            gas: 21_000,
            to: TxKind::Call(Address::repeat_byte(0x11)),
            value: U256::from(height),
            data: bytes::Bytes::new(),
            v: U256::from(27),
            r: U256::from(height + 1),
            s: U256::from(height + 2),
        });
        BlockBody {
            transactions: vec![tx],
            ommers: vec![],
            withdrawals: Some(vec![]),
        }
    }

    fn header_for(height: BlockNumber, body: &BlockBody) -> BlockHeader {
        BlockHeader {
            number: height,
            transactions_root: compute_transactions_root(&body.transactions),
            ommers_hash: compute_ommers_hash(&body.ommers),
            withdrawals_root: body
                .withdrawals
                .as_deref()
                .map(compute_withdrawals_root),
            ..BlockHeader::default()
        }
    }

    // headers visible to the sequencer, and the bodies peers would serve
    fn chain(
        range: std::ops::RangeInclusive<BlockNumber>,
    ) -> (BTreeMap<BlockNumber, BlockHeader>, BTreeMap<BlockNumber, BlockBody>) {
        let mut headers = BTreeMap::new();
        let mut bodies = BTreeMap::new();
        for height in range {
            let body = body_for_height(height);
            headers.insert(height, header_for(height, &body));
            bodies.insert(height, body);
        }
        (headers, bodies)
    }

    #[test]
    fn request_cycle_renews_with_fresh_id_and_stale_penalties() {
        let (headers, _) = chain(1..=300);
        let mut sequence = BodySequence::new(headers);
        sequence.start_bodies_downloading(100, 228);

        let t0 = Instant::now();
        let (packet, penalties, min_block) = sequence.request_more_bodies(t0, 2);
        assert_eq!(packet.block_hashes.len(), 128);
        assert_eq!(min_block, 101);
        assert!(penalties.is_empty());
        assert_eq!(sequence.lowest_block_in_memory(), Some(101));
        assert_eq!(sequence.highest_block_in_memory(), Some(228));

        let owing_peer = peer(0xbb);
        sequence.request_sent(packet.id, owing_peer);

        // 31s later everything is stale: same heights, fresh id, one
        // penalty per renewed request
        let t1 = t0 + Duration::from_secs(31);
        let (renewed, penalties, min_block) = sequence.request_more_bodies(t1, 2);
        assert_eq!(renewed.block_hashes.len(), 128);
        assert_eq!(min_block, 101);
        assert_ne!(renewed.id, packet.id);
        assert_eq!(penalties.len(), 128);
        assert!(penalties
            .iter()
            .all(|p| p.penalty == Penalty::Stale && p.peer_id == owing_peer));

        let mut sorted = renewed.block_hashes.clone();
        sorted.sort();
        let mut original = packet.block_hashes.clone();
        original.sort();
        assert_eq!(sorted, original);

        // deadlines track the outstanding requests
        assert_eq!(sequence.outstanding_bodies(), 128);
    }

    #[test]
    fn idle_and_peerless_ticks_return_empty_packets() {
        let (headers, _) = chain(1..=10);
        let mut sequence = BodySequence::new(headers);

        // not downloading yet
        let (packet, _, _) = sequence.request_more_bodies(Instant::now(), 2);
        assert!(packet.is_empty());

        sequence.start_bodies_downloading(0, 10);

        // no peers
        let (packet, _, _) = sequence.request_more_bodies(Instant::now(), 0);
        assert!(packet.is_empty());
    }

    #[test]
    fn nack_backs_off_then_reissues_the_same_heights() {
        let (headers, _) = chain(1..=8);
        let mut sequence = BodySequence::new(headers);
        sequence.start_bodies_downloading(0, 8);

        let t0 = Instant::now();
        let (packet, _, _) = sequence.request_more_bodies(t0, 1);
        assert_eq!(packet.block_hashes.len(), 8);

        sequence.request_nack(t0, &packet);

        // within the no-peer delay nothing goes out
        let (empty, _, _) = sequence.request_more_bodies(t0 + Duration::from_millis(100), 1);
        assert!(empty.is_empty());

        // after the delay the heights are re-issued under a new id
        let (reissued, penalties, min_block) =
            sequence.request_more_bodies(t0 + Duration::from_secs(1), 1);
        assert_eq!(reissued.block_hashes.len(), 8);
        assert_eq!(min_block, 1);
        assert_ne!(reissued.id, packet.id);
        // nacked requests were never owed by anyone
        assert!(penalties.is_empty());
    }

    #[test]
    fn accepted_bodies_are_withdrawn_in_ascending_order() {
        let (headers, bodies) = chain(1..=20);
        let mut sequence = BodySequence::new(headers);
        sequence.start_bodies_downloading(0, 20);

        let t0 = Instant::now();
        let (packet, _, _) = sequence.request_more_bodies(t0, 1);
        assert_eq!(packet.block_hashes.len(), 20);

        // peer answers a subset, out of order
        let reply = BlockBodies::new(
            packet.id,
            vec![
                bodies[&7].clone(),
                bodies[&3].clone(),
                bodies[&12].clone(),
            ],
        );
        let responder = peer(0xcc);
        let penalty = sequence.accept_requested_bodies(&reply, &responder);
        assert_eq!(penalty, Penalty::None);
        assert_eq!(sequence.ready_bodies(), 3);

        let withdrawn = sequence.withdraw_ready_bodies();
        let heights: Vec<BlockNumber> =
            withdrawn.iter().map(|block| block.header.number).collect();
        assert_eq!(heights, vec![3, 7, 12]);
        assert!(withdrawn
            .iter()
            .all(|block| is_valid_body(&block.header, &block.body)));

        // nothing ready is left behind, the watermark advanced
        assert_eq!(sequence.ready_bodies(), 0);
        assert_eq!(sequence.highest_block_in_db(), 12);
        assert_eq!(sequence.outstanding_bodies(), 17);
    }

    #[test]
    fn mismatched_body_is_penalized_and_the_request_retried() {
        let (headers, bodies) = chain(1..=5);
        let mut sequence = BodySequence::new(headers);
        sequence.start_bodies_downloading(0, 5);

        let t0 = Instant::now();
        let (packet, _, _) = sequence.request_more_bodies(t0, 1);

        // body 2 arrives with its withdrawals stripped: the committed
        // withdrawals root no longer agrees
        let mut tampered = bodies[&2].clone();
        tampered.withdrawals = None;

        let reply = BlockBodies::new(
            packet.id,
            vec![bodies[&1].clone(), tampered, bodies[&3].clone()],
        );
        let penalty = sequence.accept_requested_bodies(&reply, &peer(0xdd));
        assert_eq!(penalty, Penalty::BadBlock);

        // the good bodies still made it through
        let withdrawn = sequence.withdraw_ready_bodies();
        let heights: Vec<BlockNumber> =
            withdrawn.iter().map(|block| block.header.number).collect();
        assert_eq!(heights, vec![1, 3]);

        // height 2 is still outstanding and will be re-requested
        assert!(sequence.lowest_block_in_memory() == Some(2));
    }

    #[test]
    fn reply_with_unknown_request_id_is_unexpected() {
        let (headers, bodies) = chain(1..=5);
        let mut sequence = BodySequence::new(headers);
        sequence.start_bodies_downloading(0, 5);
        let (packet, _, _) = sequence.request_more_bodies(Instant::now(), 1);

        let reply = BlockBodies::new(packet.id.wrapping_add(1), vec![bodies[&1].clone()]);
        assert_eq!(
            sequence.accept_requested_bodies(&reply, &peer(0xee)),
            Penalty::Unexpected
        );
        assert_eq!(sequence.ready_bodies(), 0);
    }

    #[test]
    fn announced_blocks_are_capped_and_evict_the_oldest() {
        let mut sequence = BodySequence::new(BTreeMap::<BlockNumber, BlockHeader>::new());
        let announcer = peer(0x01);

        for height in 0..=MAX_ANNOUNCED_BLOCKS as u64 {
            let body = body_for_height(height);
            let header = header_for(height, &body);
            let penalty = sequence.accept_new_block(
                Block::new(header, body),
                U256::from(height),
                &announcer,
            );
            assert_eq!(penalty, Penalty::None);
        }

        assert_eq!(sequence.announced_blocks.size(), MAX_ANNOUNCED_BLOCKS);
        // the first-inserted announcement was evicted
        assert!(sequence.announced_blocks.remove(0).is_none());
        assert!(sequence.announced_blocks.remove(1).is_some());
        // every announcement was queued for gossip
        assert_eq!(
            sequence.announces_to_do().len(),
            MAX_ANNOUNCED_BLOCKS + 1
        );
    }

    #[test]
    fn invalid_announcement_is_penalized() {
        let mut sequence = BodySequence::new(BTreeMap::<BlockNumber, BlockHeader>::new());
        let body = body_for_height(9);
        let mut header = header_for(9, &body);
        header.transactions_root = H256::repeat_byte(0x66);

        let penalty =
            sequence.accept_new_block(Block::new(header, body), U256::zero(), &peer(0x02));
        assert_eq!(penalty, Penalty::BadBlock);
        assert_eq!(sequence.announced_blocks.size(), 0);
    }

    #[test]
    fn announced_block_satisfies_a_request_off_the_wire() {
        let (headers, bodies) = chain(1..=3);
        let announced_header = headers[&2].clone();
        let mut sequence = BodySequence::new(headers);

        sequence.accept_new_block(
            Block::new(announced_header, bodies[&2].clone()),
            U256::one(),
            &peer(0x03),
        );

        sequence.start_bodies_downloading(0, 3);
        let (packet, _, _) = sequence.request_more_bodies(Instant::now(), 1);

        // only 1 and 3 go on the wire, 2 was already cached
        assert_eq!(packet.block_hashes.len(), 2);
        assert_eq!(sequence.ready_bodies(), 1);

        let withdrawn = sequence.withdraw_ready_bodies();
        assert_eq!(withdrawn.len(), 1);
        assert_eq!(withdrawn[0].header.number, 2);
    }

    #[test]
    fn deadline_register_sums_expired_buckets() {
        let base = Instant::now();
        let mut deadlines = Deadlines::new(base);

        deadlines.add(base + Duration::from_secs(5), 3);
        deadlines.add(base + Duration::from_secs(7), 2);
        deadlines.add(base + Duration::from_secs(7), 1);
        assert_eq!(deadlines.len(), 2);
        assert_eq!(deadlines.total(), 6);

        assert_eq!(deadlines.expired(base + Duration::from_secs(6)), 3);
        assert_eq!(deadlines.expired(base + Duration::from_secs(10)), 6);
        assert_eq!(deadlines.expired(base), 0);

        deadlines.remove(base + Duration::from_secs(7), 3);
        assert_eq!(deadlines.len(), 1);
        assert_eq!(deadlines.total(), 3);

        // empty buckets are erased, removing from a gone bucket is a no-op
        deadlines.remove(base + Duration::from_secs(7), 1);
        assert_eq!(deadlines.total(), 3);
    }

    #[test]
    fn deadline_count_tracks_outstanding_requests() {
        let (headers, bodies) = chain(1..=10);
        let mut sequence = BodySequence::new(headers);
        sequence.start_bodies_downloading(0, 10);

        let t0 = Instant::now();
        let (packet, _, _) = sequence.request_more_bodies(t0, 1);
        assert_eq!(sequence.request_deadlines.total(), 10);

        let reply = BlockBodies::new(packet.id, vec![bodies[&4].clone(), bodies[&9].clone()]);
        sequence.accept_requested_bodies(&reply, &peer(0x04));
        assert_eq!(sequence.request_deadlines.total(), 8);
        assert_eq!(sequence.outstanding_bodies(), 8);

        sequence.stop_bodies_downloading();
        assert_eq!(sequence.request_deadlines.total(), 0);
        assert_eq!(sequence.outstanding_bodies(), 0);
    }

    #[test]
    fn capacity_is_bounded_by_active_peers() {
        let (headers, _) = chain(1..=2000);
        let mut sequence = BodySequence::new(headers);
        sequence.start_bodies_downloading(0, 2000);

        let mut tp = Instant::now();
        // with one peer, at most 4 packets of 128 can ever be in flight
        for _ in 0..10 {
            let (_packet, _, _) = sequence.request_more_bodies(tp, 1);
            tp += Duration::from_secs(1);
        }
        assert!(
            sequence.outstanding_bodies()
                <= PER_PEER_MAX_OUTSTANDING_REQUESTS as usize * MAX_BLOCKS_PER_MESSAGE
        );
    }
}
