use std::{
    collections::HashMap,
    fs,
    io::{Read, Seek, SeekFrom, Write},
    num::NonZeroUsize,
};
use sha1::{Digest, Sha1};
use crate::{
    block::{block_len, num_blocks, BlockInfo},
    storage::StoreInfo,
    Bitfield, BLOCK_SIZE, ID,
};
use super::{DiskError, Result};

// Pieces whose blocks peers re-read tend to cluster, so whole pieces are
// cached and blocks sliced out of them.
const READ_CACHE_PIECES: usize = 64;

// Outcome of feeding one block to the store.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BlockResult {

    // Buffered, piece still incomplete. Duplicates and blocks for already
    // complete pieces land here too since both are ignored.
    Accepted,

    // The block completed its piece, the hash matched and the bytes are on
    // disk.
    PieceComplete,

    // Bad geometry, or the assembled piece failed verification and its
    // buffer was dropped.
    Rejected,

}

// In-memory assembly state for one piece: a full-size buffer plus a bitmap
// of which blocks have landed. Block boundaries are fixed, so there is
// nothing to sort at completion time.
#[derive(Debug)]
struct PieceBuf {

    hash: ID,

    len: usize,

    data: Vec<u8>,

    blocks_received: Vec<bool>,

    num_blocks_received: usize,

}

impl PieceBuf {

    fn new(hash: ID, len: usize) -> Self {
        Self {
            hash,
            len,
            data: vec![0; len],
            blocks_received: vec![false; num_blocks(len)],
            num_blocks_received: 0,
        }
    }

    // First write at an offset wins; repeats are dropped.
    fn add_block(&mut self, offset: usize, data: &[u8]) {
        let block_idx = offset / BLOCK_SIZE;
        if self.blocks_received[block_idx] {
            tracing::debug!("duplicate block at offset {}", offset);
            return;
        }
        self.blocks_received[block_idx] = true;
        self.num_blocks_received += 1;
        self.data[offset..offset + data.len()].copy_from_slice(data);
    }

    fn is_complete(&self) -> bool {
        self.num_blocks_received == self.blocks_received.len()
    }

    fn verify_hash(&self) -> bool {
        let mut hasher = Sha1::new();
        hasher.update(&self.data);
        hasher.finalize().as_slice() == self.hash
    }
}

#[derive(Debug)]
struct TorrentFile {
    start: usize,
    end: usize,
    handle: fs::File,
}

// Durable block storage. Single-owner: the disk task drives it, which
// serializes all piece mutations and file access.
pub struct PieceStore {

    info: StoreInfo,

    piece_hashes: Vec<ID>,

    files: Vec<TorrentFile>,

    // In-flight pieces by index.
    write_buf: HashMap<usize, PieceBuf>,

    completed: Bitfield,

    read_cache: lru::LruCache<usize, Vec<u8>>,

}

impl PieceStore {

    // Opens (creating and sparse-allocating as needed) every file in the
    // layout. Existing files are never truncated; if any were already
    // present, a verification scan recovers the pieces they hold.
    pub fn new(info: StoreInfo, piece_hashes: Vec<ID>) -> Result<Self> {

        debug_assert_eq!(piece_hashes.len(), info.num_pieces);

        if !info.output_dir.is_dir() {
            fs::create_dir_all(&info.output_dir)?;
            tracing::info!("created output directory {:?}", info.output_dir);
        }

        let mut any_existing = false;
        let mut files = Vec::with_capacity(info.files.len());
        for file_info in info.files.iter() {
            let path = info.output_dir.join(&file_info.path);
            if let Some(parent) = path.parent() {
                if !parent.exists() {
                    fs::create_dir_all(parent)?;
                }
            }

            let exists = path.is_file();
            any_existing |= exists;
            let mut handle = fs::OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(&path)?;
            if !exists && file_info.length > 0 {
                // Allocate sparse up to the declared length.
                handle.seek(SeekFrom::Start(file_info.length as u64 - 1))?;
                handle.write_all(&[0])?;
            }
            tracing::debug!("opened {:?} ({} bytes)", path, file_info.length);

            files.push(TorrentFile {
                start: file_info.offset,
                end: file_info.offset + file_info.length,
                handle,
            });
        }

        let mut store = Self {
            completed: Bitfield::repeat(false, info.num_pieces),
            write_buf: HashMap::new(),
            read_cache: lru::LruCache::new(
                NonZeroUsize::new(READ_CACHE_PIECES).expect("nonzero cache size"),
            ),
            info,
            piece_hashes,
            files,
        };

        if any_existing {
            store.scan_existing();
        }
        Ok(store)
    }

    // Resume pass: any piece already hashing correctly on disk is counted
    // as complete.
    fn scan_existing(&mut self) {
        for idx in 0..self.info.num_pieces {
            let piece = match self.read_piece(idx) {
                Ok(piece) => piece,
                Err(_) => continue,
            };
            let mut hasher = Sha1::new();
            hasher.update(&piece);
            if hasher.finalize().as_slice() == self.piece_hashes[idx] {
                self.completed.set(idx, true);
            }
        }
        tracing::info!(
            "resume scan found {}/{} pieces intact",
            self.completed.count_ones(),
            self.info.num_pieces,
        );
    }

    // Buffers one received block. Completing a piece triggers hash
    // verification and, on success, the spanning write to disk.
    pub fn store_block(&mut self, piece_idx: usize, offset: usize, data: &[u8]) -> Result<BlockResult> {

        if piece_idx >= self.info.num_pieces {
            return Ok(BlockResult::Rejected);
        }
        let piece_len = self.info.piece_length(piece_idx);
        // Offsets sit on block boundaries; only a piece's final block may
        // be short.
        if offset % BLOCK_SIZE != 0
            || offset >= piece_len
            || data.len() != block_len(piece_len, offset / BLOCK_SIZE)
        {
            return Ok(BlockResult::Rejected);
        }

        // Late duplicate deliveries from other sessions.
        if self.completed[piece_idx] {
            return Ok(BlockResult::Accepted);
        }

        let hash = self.piece_hashes[piece_idx];
        let piece = self.write_buf
            .entry(piece_idx)
            .or_insert_with(|| PieceBuf::new(hash, piece_len));
        piece.add_block(offset, data);

        if !piece.is_complete() {
            return Ok(BlockResult::Accepted);
        }

        // All blocks present; the buffer is consumed either way.
        let piece = self.write_buf.remove(&piece_idx).expect("piece buffer exists");
        if !piece.verify_hash() {
            tracing::warn!("piece {} failed hash verification", piece_idx);
            return Ok(BlockResult::Rejected);
        }

        self.write_piece(piece_idx, &piece.data)?;
        self.completed.set(piece_idx, true);
        Ok(BlockResult::PieceComplete)
    }

    // Writes verified piece bytes across every file its range intersects.
    fn write_piece(&mut self, idx: usize, data: &[u8]) -> Result<()> {

        let piece_start = self.info.piece_offset(idx);
        let mut written = 0;

        for file in &mut self.files[self.info.piece_file_range(idx)] {
            let at = piece_start + written;
            let chunk = (data.len() - written).min(file.end - at);
            file.handle.seek(SeekFrom::Start((at - file.start) as u64))?;
            file.handle.write_all(&data[written..written + chunk])?;
            file.handle.flush()?;
            written += chunk;
        }

        if written != data.len() {
            return Err(DiskError::WriteSize { expected: data.len(), actual: written });
        }
        Ok(())
    }

    // Reads a piece back out of the file layout, the inverse of
    // write_piece.
    fn read_piece(&mut self, idx: usize) -> Result<Vec<u8>> {

        let piece_start = self.info.piece_offset(idx);
        let mut buf = vec![0; self.info.piece_length(idx)];
        let mut read = 0;

        for file in &mut self.files[self.info.piece_file_range(idx)] {
            let at = piece_start + read;
            let chunk = (buf.len() - read).min(file.end - at);
            file.handle.seek(SeekFrom::Start((at - file.start) as u64))?;
            file.handle.read_exact(&mut buf[read..read + chunk])?;
            read += chunk;
        }

        Ok(buf)
    }

    // Serves an upload request. None unless the piece is complete and the
    // range valid.
    pub fn read_block(&mut self, block: &BlockInfo) -> Result<Option<Vec<u8>>> {

        if block.piece_idx >= self.info.num_pieces || !self.is_complete(block.piece_idx) {
            return Ok(None);
        }
        let piece_len = self.info.piece_length(block.piece_idx);
        if block.len == 0 || block.offset + block.len > piece_len {
            return Ok(None);
        }

        if let Some(piece) = self.read_cache.get(&block.piece_idx) {
            return Ok(Some(piece[block.offset..block.offset + block.len].to_vec()));
        }

        let piece = self.read_piece(block.piece_idx)?;
        let data = piece[block.offset..block.offset + block.len].to_vec();
        self.read_cache.put(block.piece_idx, piece);
        Ok(Some(data))
    }

    pub fn is_complete(&self, idx: usize) -> bool {
        self.completed[idx]
    }

    pub fn missing_pieces(&self) -> Vec<usize> {
        self.completed.iter_zeros().collect()
    }

    pub fn completion_ratio(&self) -> f64 {
        self.completed.count_ones() as f64 / self.info.num_pieces as f64
    }

    pub fn bytes_remaining(&self) -> u64 {
        self.completed
            .iter_zeros()
            .map(|idx| self.info.piece_length(idx) as u64)
            .sum()
    }

    pub fn own_bitfield(&self) -> &Bitfield {
        &self.completed
    }
}

impl std::fmt::Debug for PieceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PieceStore")
            .field("output_dir", &self.info.output_dir)
            .field("num_pieces", &self.info.num_pieces)
            .field("complete", &self.completed.count_ones())
            .field("in_flight", &self.write_buf.len())
            .finish()
    }
}
