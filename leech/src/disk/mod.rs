use tokio::{sync::mpsc, task};
use crate::{
    block::{BlockData, BlockInfo},
    p2p::{PeerCommand, PeerTx},
    torrent::{CommandToTorrent, TorrentTx},
};

mod store;

pub use store::{BlockResult, PieceStore};

#[derive(thiserror::Error, Debug)]
pub enum DiskError {

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("short write: expected {expected} bytes, wrote {actual}")]
    WriteSize { expected: usize, actual: usize },

    #[error("channel error: {0}")]
    Channel(String),

}

impl<T> From<mpsc::error::SendError<T>> for DiskError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        DiskError::Channel(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DiskError>;
pub type DiskTx = mpsc::UnboundedSender<CommandToDisk>;
pub type DiskRx = mpsc::UnboundedReceiver<CommandToDisk>;

pub enum CommandToDisk {

    // Block received from a peer, to be buffered and possibly assembled.
    WriteBlock {
        block: BlockInfo,
        data: Vec<u8>,
    },

    // A peer asked for a block; the reply goes out on its channel.
    ReadBlock {
        block: BlockInfo,
        tx: PeerTx,
    },

    Shutdown,

}

// The disk actor: sole owner of the piece store. Commands arrive from peer
// sessions, piece verdicts flow to the supervisor.
pub struct Disk {

    store: PieceStore,

    disk_rx: DiskRx,

    torrent_tx: TorrentTx,

}

pub fn spawn(store: PieceStore, torrent_tx: TorrentTx) -> (task::JoinHandle<Result<()>>, DiskTx) {
    let (disk_tx, disk_rx) = mpsc::unbounded_channel();
    let mut disk = Disk { store, disk_rx, torrent_tx };
    let handle = task::spawn(async move { disk.run().await });
    (handle, disk_tx)
}

impl Disk {

    #[tracing::instrument(name = "disk", skip_all)]
    async fn run(&mut self) -> Result<()> {
        tracing::debug!("disk task running");
        loop {
            let Some(cmd) = self.disk_rx.recv().await else {
                break;
            };
            let result = match cmd {
                CommandToDisk::WriteBlock { block, data } => self.write_block(block, data),
                CommandToDisk::ReadBlock { block, tx } => self.read_block(block, tx),
                CommandToDisk::Shutdown => {
                    tracing::debug!(
                        "disk shutdown with {} pieces missing",
                        self.store.missing_pieces().len(),
                    );
                    break;
                }
            };
            // Disk failures risk data loss; surface them and stop.
            if let Err(e) = result {
                tracing::error!("disk failure: {}", e);
                self.torrent_tx
                    .send(CommandToTorrent::DiskFailure { error: e.to_string() })
                    .ok();
                return Err(e);
            }
        }
        Ok(())
    }

    fn write_block(&mut self, block: BlockInfo, data: Vec<u8>) -> Result<()> {
        match self.store.store_block(block.piece_idx, block.offset, &data)? {
            BlockResult::Accepted => {}
            BlockResult::PieceComplete => {
                tracing::debug!(
                    "piece {} persisted ({:.1}% done, {} bytes remaining)",
                    block.piece_idx,
                    self.store.completion_ratio() * 100.0,
                    self.store.bytes_remaining(),
                );
                self.torrent_tx
                    .send(CommandToTorrent::PieceWritten { idx: block.piece_idx, valid: true })?;
            }
            BlockResult::Rejected => {
                self.torrent_tx
                    .send(CommandToTorrent::PieceWritten { idx: block.piece_idx, valid: false })?;
            }
        }
        Ok(())
    }

    fn read_block(&mut self, block: BlockInfo, tx: PeerTx) -> Result<()> {
        match self.store.read_block(&block)? {
            Some(data) => {
                tx.send(PeerCommand::BlockRead(BlockData {
                    piece_idx: block.piece_idx,
                    offset: block.offset,
                    data,
                }))
                .ok();
            }
            // Request for a piece we do not hold; drop it.
            None => tracing::debug!("dropping unserveable request: {:?}", block),
        }
        Ok(())
    }
}
