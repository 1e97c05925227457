use rand::seq::SliceRandom;
use serde_derive::Deserialize;
use sha1::{Digest, Sha1};
use url::Url;
use crate::{storage::FileInfo, ID};

#[derive(Debug, thiserror::Error)]
pub enum MetaInfoError {

    #[error("bencode error whilst decoding metainfo: {0}")]
    Bencode(bencode::Error),

    #[error("metainfo missing required key `{0}`")]
    MissingKey(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid pieces length, must be a non-empty multiple of 20")]
    InvalidPiecesLength,

    #[error("piece length must be positive")]
    InvalidPieceLength,

    #[error("file with negative length")]
    NegativeFileLength,

    #[error("expected exactly one of `length` and `files`")]
    InvalidFileMode,

    #[error("file with no path components")]
    FileEmptyPath,

    #[error("invalid file path component: {0:?}")]
    InvalidPathComponent(String),

    #[error("total length does not fit the piece count")]
    LengthMismatch,

}

impl From<bencode::Error> for MetaInfoError {
    fn from(e: bencode::Error) -> Self {
        match e {
            bencode::Error::MissingField(key) => MetaInfoError::MissingKey(key),
            e => MetaInfoError::Bencode(e),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct File {

    // One or more path components, joined to form the file's relative path.
    pub path: Vec<String>,

    // Length of the file in bytes. Decoded signed so a negative length is
    // reported as such rather than as malformed bencode.
    pub length: i64,

    #[serde(default)]
    pub md5sum: Option<String>,

}

#[derive(Clone, Deserialize)]
pub struct Info {

    // Name of the single file, or the directory for multi-file torrents.
    pub name: String,

    // Concatenation of all 20-byte SHA-1 piece hashes.
    #[serde(with = "serde_bytes")]
    pub pieces: Vec<u8>,

    #[serde(rename = "piece length")]
    pub piece_length: i64,

    // Present for single-file torrents only.
    #[serde(default)]
    pub length: Option<i64>,

    // Present for multi-file torrents only.
    #[serde(default)]
    pub files: Option<Vec<File>>,

    #[serde(default)]
    pub md5sum: Option<String>,

    // "1" restricts peer discovery to the listed trackers.
    #[serde(default)]
    pub private: Option<u8>,

}

#[derive(Clone, Deserialize)]
pub struct MetaInfo {

    #[serde(deserialize_with = "crate::de::url_deserialize")]
    pub announce: Url,

    pub info: Info,

    // SHA-1 over the raw `info` value bytes, filled in after decoding.
    #[serde(skip)]
    pub info_hash: ID,

    #[serde(default)]
    #[serde(rename = "announce-list")]
    #[serde(deserialize_with = "crate::de::announce_list_deserialize")]
    pub announce_list: Option<Vec<Vec<Url>>>,

    #[serde(default)]
    pub encoding: Option<String>,

    #[serde(default)]
    #[serde(rename = "creation date")]
    pub creation_date: Option<i64>,

    #[serde(default)]
    pub comment: Option<String>,

    #[serde(default)]
    #[serde(rename = "created by")]
    pub created_by: Option<String>,

}

impl MetaInfo {

    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<MetaInfo, MetaInfoError> {
        MetaInfo::from_bytes(&std::fs::read(path)?)
    }

    pub fn from_bytes(buf: &[u8]) -> Result<MetaInfo, MetaInfoError> {

        let mut metainfo: MetaInfo = bencode::from_bytes(buf)?;
        metainfo.validate()?;

        // Hash the original byte span of the info dict. Re-encoding would
        // have to reproduce the input byte-for-byte; the span never lies.
        let span = bencode::raw::dict_value_span(buf, b"info")
            .map_err(MetaInfoError::Bencode)?
            .ok_or(MetaInfoError::MissingKey("info"))?;
        let mut hasher = Sha1::new();
        hasher.update(&buf[span]);
        metainfo.info_hash = hasher.finalize().into();

        tracing::debug!("metainfo loaded: {:#?}", metainfo);
        Ok(metainfo)
    }

    fn validate(&self) -> Result<(), MetaInfoError> {

        let info = &self.info;
        if info.pieces.is_empty() || info.pieces.len() % 20 != 0 {
            return Err(MetaInfoError::InvalidPiecesLength);
        }
        if info.piece_length <= 0 {
            return Err(MetaInfoError::InvalidPieceLength);
        }

        match (&info.length, &info.files) {
            (Some(_), Some(_)) | (None, None) => return Err(MetaInfoError::InvalidFileMode),
            (Some(len), None) => {
                if *len < 0 {
                    return Err(MetaInfoError::NegativeFileLength);
                }
            }
            (None, Some(files)) => {
                if files.is_empty() {
                    return Err(MetaInfoError::InvalidFileMode);
                }
                for file in files {
                    if file.length < 0 {
                        return Err(MetaInfoError::NegativeFileLength);
                    }
                    if file.path.is_empty() {
                        return Err(MetaInfoError::FileEmptyPath);
                    }
                    for component in &file.path {
                        if component.is_empty()
                            || component == ".."
                            || component.contains('/')
                            || component.contains('\\')
                        {
                            return Err(MetaInfoError::InvalidPathComponent(component.clone()));
                        }
                    }
                }
            }
        }

        // N pieces of length L must cover the byte length exactly:
        // (N-1)*L < total <= N*L.
        let total = self.total_len();
        let num_pieces = (info.pieces.len() / 20) as u64;
        let piece_len = info.piece_length as u64;
        if total > num_pieces * piece_len || total + piece_len <= num_pieces * piece_len {
            return Err(MetaInfoError::LengthMismatch);
        }

        Ok(())
    }

    pub fn piece_hashes(&self) -> Vec<ID> {
        self.info.pieces
            .chunks_exact(20)
            // Safe, validate() checked the length is a multiple of 20.
            .map(|c| c.try_into().unwrap())
            .collect()
    }

    pub fn piece_len(&self) -> usize { self.info.piece_length as usize }

    pub fn num_pieces(&self) -> usize { self.info.pieces.len() / 20 }

    pub fn is_multi_file(&self) -> bool { self.info.files.is_some() }

    pub fn total_len(&self) -> u64 {
        if let Some(files) = &self.info.files {
            files.iter().map(|f| f.length as u64).sum()
        } else {
            self.info.length.unwrap_or(0) as u64
        }
    }

    pub fn info_hash(&self) -> ID { self.info_hash }

    pub fn info_hash_hex(&self) -> String { hex::encode(self.info_hash) }

    pub fn name(&self) -> &str { &self.info.name }

    // Tracker urls in tiers of descending priority. Each tier is shuffled
    // once, per the multitracker convention.
    pub fn trackers(&self) -> Vec<Vec<Url>> {
        if let Some(announce_list) = self.announce_list.clone() {
            let mut tiers = Vec::with_capacity(announce_list.len());
            for mut tier in announce_list {
                tier.shuffle(&mut rand::thread_rng());
                tiers.push(tier);
            }
            tiers
        } else {
            vec![vec![self.announce.clone()]]
        }
    }

    // File table with running offsets into the torrent's flat byte space.
    // Single-file torrents synthesize one entry named after the torrent.
    pub fn files(&self) -> Vec<FileInfo> {
        if let Some(files) = &self.info.files {
            let mut offset = 0;
            files.iter().map(|f| {
                let info = FileInfo {
                    path: f.path.iter().collect(),
                    length: f.length as usize,
                    offset,
                };
                offset += f.length as usize;
                info
            }).collect()
        } else {
            vec![FileInfo {
                path: self.info.name.clone().into(),
                length: self.info.length.unwrap_or(0) as usize,
                offset: 0,
            }]
        }
    }
}

impl std::fmt::Debug for MetaInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaInfo")
            .field("announce", &self.announce.as_str())
            .field("info", &self.info)
            .field("info_hash", &self.info_hash_hex())
            .field("announce_list", &self.announce_list.as_ref().map(|tiers|
                tiers.iter().map(|tier|
                    tier.iter().map(Url::as_str).collect()
                ).collect::<Vec<Vec<&str>>>()
            ))
            .field("encoding", &self.encoding)
            .field("creation_date", &self.creation_date)
            .field("comment", &self.comment)
            .field("created_by", &self.created_by)
            .finish()
    }
}

// Omits the pieces blob, which would drown the rest of the output.
impl std::fmt::Debug for Info {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Info")
            .field("name", &self.name)
            .field("num_pieces", &(self.pieces.len() / 20))
            .field("piece_length", &self.piece_length)
            .field("length", &self.length)
            .field("files", &self.files)
            .field("md5sum", &self.md5sum)
            .field("private", &self.private)
            .finish()
    }
}
