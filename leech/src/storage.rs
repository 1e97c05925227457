use std::{ops::Range, path::PathBuf};
use crate::metainfo::MetaInfo;

// A file's slot in the torrent's flat byte space: files are concatenated in
// declared order, so each carries its starting offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {

    // Path relative to the store's root directory.
    pub path: PathBuf,

    pub length: usize,

    // Offset in bytes from the start of the torrent viewed as one array.
    pub offset: usize,

}

impl FileInfo {
    pub fn byte_range(&self) -> Range<usize> {
        self.offset..(self.offset + self.length)
    }
}

// Storage geometry shared by the disk task and the supervisor.
#[derive(Debug, Clone)]
pub struct StoreInfo {

    pub total_len: u64,

    pub piece_len: usize,

    // Length of the final piece, <= piece_len.
    pub last_piece_len: usize,

    pub num_pieces: usize,

    pub files: Vec<FileInfo>,

    pub output_dir: PathBuf,

}

impl StoreInfo {

    pub fn new(metainfo: &MetaInfo, output_dir: PathBuf) -> Self {

        let total_len = metainfo.total_len();
        let num_pieces = metainfo.num_pieces();
        let piece_len = metainfo.piece_len();
        let last_piece_len =
            (total_len - (piece_len as u64 * (num_pieces as u64 - 1))) as usize;

        // Multi-file layouts nest under a directory named after the torrent.
        let output_dir = if metainfo.is_multi_file() {
            output_dir.join(metainfo.name())
        } else {
            output_dir
        };

        Self {
            total_len,
            piece_len,
            last_piece_len,
            num_pieces,
            files: metainfo.files(),
            output_dir,
        }
    }

    pub fn piece_length(&self, idx: usize) -> usize {
        debug_assert!(idx < self.num_pieces, "piece index out of bounds");
        if idx == self.num_pieces - 1 {
            self.last_piece_len
        } else {
            self.piece_len
        }
    }

    // Absolute offset of a piece in the flat byte space.
    pub fn piece_offset(&self, idx: usize) -> usize {
        idx * self.piece_len
    }

    // Indices of the files a piece's byte range intersects. Pieces may
    // straddle any number of file boundaries.
    pub fn piece_file_range(&self, idx: usize) -> Range<usize> {

        if self.files.len() == 1 {
            return 0..1;
        }

        let start = self.piece_offset(idx);
        let last = start + self.piece_length(idx) - 1;

        let first_file = self.files
            .iter()
            .position(|f| f.byte_range().contains(&start))
            .expect("piece offset exceeds file layout");

        let last_file = self.files[first_file..]
            .iter()
            .position(|f| f.byte_range().contains(&last))
            .map(|i| first_file + i)
            .expect("piece end exceeds file layout");

        first_file..(last_file + 1)
    }
}
