use std::collections::{BTreeMap, HashSet};
use tokio::sync::RwLock;
use crate::{block::BlockInfo, Bitfield};

pub mod partial_piece;

use partial_piece::PartialPiece;

// At most this many requests may be in flight to a single peer.
pub const MAX_OUTSTANDING_REQUESTS: usize = 10;

// At most this many new requests are issued per pump.
pub const PICK_BATCH: usize = 5;

// Decides which blocks a session should request next. Shared by all
// sessions; the supervisor feeds piece verdicts back into it.
#[derive(Debug)]
pub struct Picker {
    state: RwLock<PickerState>,
}

#[derive(Debug)]
struct PickerState {

    // Pieces we hold on disk.
    have: Bitfield,

    // Pieces opened for download, keyed (and therefore picked) in index
    // order.
    partial: BTreeMap<usize, PartialPiece>,

    piece_len: usize,

    last_piece_len: usize,

    num_pieces: usize,

}

impl PickerState {

    fn piece_length(&self, idx: usize) -> usize {
        if idx == self.num_pieces - 1 {
            self.last_piece_len
        } else {
            self.piece_len
        }
    }

    // Lowest-index piece that is missing, unopened and available from the
    // peer.
    fn next_fresh_piece(&self, bf: &Bitfield) -> Option<usize> {
        (0..self.num_pieces).find(|&idx| {
            !self.have[idx] && bf[idx] && !self.partial.contains_key(&idx)
        })
    }
}

impl Picker {

    pub fn new(num_pieces: usize, piece_len: usize, last_piece_len: usize) -> Self {
        Self::with_have(Bitfield::repeat(false, num_pieces), piece_len, last_piece_len)
    }

    // Starts from an existing have set, e.g. a resume scan.
    pub fn with_have(have: Bitfield, piece_len: usize, last_piece_len: usize) -> Self {
        Self {
            state: RwLock::new(PickerState {
                num_pieces: have.len(),
                have,
                partial: BTreeMap::new(),
                piece_len,
                last_piece_len,
            }),
        }
    }

    // True if the peer advertises a piece we are missing.
    pub async fn peer_has_missing(&self, bf: &Bitfield) -> bool {
        let state = self.state.read().await;
        bf.iter_ones().any(|idx| idx < state.num_pieces && !state.have[idx])
    }

    // Picks up to min(PICK_BATCH, free outstanding slots) block requests for
    // a session: partially-downloaded pieces are continued before fresh
    // pieces, fresh picks take the lowest available index.
    pub async fn pick_blocks(
        &self,
        outstanding: &HashSet<BlockInfo>,
        bf: &Bitfield,
    ) -> Vec<BlockInfo> {

        let mut requests = Vec::new();
        let mut remaining = PICK_BATCH
            .min(MAX_OUTSTANDING_REQUESTS.saturating_sub(outstanding.len()));
        if remaining == 0 {
            return requests;
        }

        let mut state = self.state.write().await;

        for (idx, partial) in state.partial.iter_mut() {
            if remaining == 0 {
                break;
            }
            if !bf[*idx] {
                continue;
            }
            remaining -= partial.pick_next_blocks(remaining, &mut requests, outstanding);
        }

        while remaining > 0 {
            let Some(idx) = state.next_fresh_piece(bf) else {
                break;
            };
            tracing::trace!("opened piece {} for download", idx);
            let mut partial = PartialPiece::new(idx, state.piece_length(idx));
            remaining -= partial.pick_next_blocks(remaining, &mut requests, outstanding);
            state.partial.insert(idx, partial);
        }

        requests
    }

    // A block arrived and went to the piece store; other sessions stop
    // picking it.
    pub async fn block_received(&self, block: &BlockInfo) {
        if let Some(partial) = self.state.write().await.partial.get_mut(&block.piece_idx) {
            partial.received_block(block);
        }
    }

    // Returns in-flight claims to the pool, e.g. when a peer chokes us or a
    // session dies with requests pending.
    pub async fn free_blocks<'a>(&self, blocks: impl Iterator<Item = &'a BlockInfo>) {
        let mut state = self.state.write().await;
        for block in blocks {
            if let Some(partial) = state.partial.get_mut(&block.piece_idx) {
                partial.free_block(block);
            }
        }
    }

    // Piece verified and persisted.
    pub async fn piece_written(&self, idx: usize) {
        let mut state = self.state.write().await;
        state.partial.remove(&idx);
        state.have.set(idx, true);
    }

    // Piece failed verification; the retry starts from scratch.
    pub async fn piece_invalid(&self, idx: usize) {
        if let Some(partial) = self.state.write().await.partial.get_mut(&idx) {
            partial.free_all_blocks();
        }
    }

    pub async fn is_complete(&self) -> bool {
        self.state.read().await.have.all()
    }

    pub async fn num_complete(&self) -> usize {
        self.state.read().await.have.count_ones()
    }

    pub async fn bytes_remaining(&self) -> u64 {
        let state = self.state.read().await;
        state.have
            .iter_zeros()
            .map(|idx| state.piece_length(idx) as u64)
            .sum()
    }
}
