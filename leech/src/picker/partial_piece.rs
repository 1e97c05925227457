use std::collections::HashSet;
use crate::{block::*, BLOCK_SIZE};

#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum BlockState {

    // Not requested from any peer.
    #[default]
    Free,

    // Requested from at least one peer.
    Requested,

    // Delivered to the piece store.
    Received,

}

// Block bookkeeping for one piece that has been opened for download.
#[derive(Debug)]
pub struct PartialPiece {

    pub idx: usize,

    pub len: usize,

    pub block_states: Vec<BlockState>,

}

impl PartialPiece {

    pub fn new(idx: usize, len: usize) -> Self {
        Self {
            idx,
            len,
            block_states: vec![BlockState::default(); num_blocks(len)],
        }
    }

    // Sequentially picks free blocks, skipping any the session already has
    // in flight. Returns how many were picked.
    pub fn pick_next_blocks(
        &mut self,
        num: usize,
        buf: &mut Vec<BlockInfo>,
        outstanding: &HashSet<BlockInfo>,
    ) -> usize {

        let mut num_picked = 0;
        for (i, state) in self.block_states.iter_mut().enumerate() {
            if num_picked == num {
                break;
            }
            if *state != BlockState::Free {
                continue;
            }

            let block = BlockInfo {
                piece_idx: self.idx,
                offset: i * BLOCK_SIZE,
                len: block_len(self.len, i),
            };
            if outstanding.contains(&block) {
                continue;
            }

            *state = BlockState::Requested;
            buf.push(block);
            num_picked += 1;
        }
        num_picked
    }

    pub fn free_block(&mut self, block: &BlockInfo) {
        debug_assert_eq!(block.piece_idx, self.idx);
        let state = &mut self.block_states[block.idx_in_piece()];
        // A received block stays received; only in-flight claims are undone.
        if *state == BlockState::Requested {
            *state = BlockState::Free;
        }
    }

    pub fn free_all_blocks(&mut self) {
        self.block_states.iter_mut().for_each(|b| *b = BlockState::Free);
    }

    pub fn received_block(&mut self, block: &BlockInfo) {
        self.block_states[block.idx_in_piece()] = BlockState::Received;
    }
}
