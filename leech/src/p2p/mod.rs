use std::{net::SocketAddr, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::Instrument;
use crate::{
    block::BlockData,
    torrent::{CommandToTorrent, TorrentContext},
};

pub(crate) mod handshake;
pub(crate) mod message;
mod session;
pub mod state;

pub use session::PeerSession;

type Result<T> = std::result::Result<T, PeerError>;
type PeerRx = mpsc::UnboundedReceiver<PeerCommand>;
pub type PeerTx = mpsc::UnboundedSender<PeerCommand>;

#[derive(thiserror::Error, Debug)]
pub enum PeerError {

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake provided incorrect protocol")]
    IncorrectProtocol,

    #[error("handshake provided incorrect info-hash")]
    IncorrectInfoHash,

    #[error("no handshake received")]
    NoHandshake,

    #[error("peer closed the connection")]
    Disconnected,

    #[error("invalid message id: {0}")]
    InvalidMessageId(u8),

    #[error("message exceeds maximum frame size")]
    OversizedMessage,

    #[error("bitfield sent after the opening message")]
    UnexpectedBitfield,

    #[error("bitfield length does not match piece count")]
    InvalidBitfield,

    #[error("invalid message payload")]
    InvalidMessage,

    #[error("connection timeout")]
    Timeout,

    #[error("channel closed: {0}")]
    Channel(String),

}

impl<T> From<mpsc::error::SendError<T>> for PeerError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        PeerError::Channel(e.to_string())
    }
}

// Commands a session receives from the rest of the client.
pub enum PeerCommand {

    // We completed a piece; announce it to the peer.
    PieceWritten(usize),

    // Block read from disk, ready to serve.
    BlockRead(BlockData),

    Shutdown,

}

pub struct PeerHandle {

    pub peer_tx: PeerTx,

    pub session_handle: JoinHandle<()>,

}

impl PeerHandle {

    // Spawns a session task for an outbound connection. The task reports
    // its exit to the supervisor so the session map can be reaped.
    pub fn spawn(address: SocketAddr, ctx: Arc<TorrentContext>) -> Self {

        let (mut session, peer_tx) = PeerSession::new(address, ctx.clone());
        let session_handle = tokio::spawn(async move {
            if let Err(e) = session.run().await {
                tracing::debug!("session error: {}", e);
            }
            session.shutdown().await;
            ctx.torrent_tx
                .send(CommandToTorrent::PeerDisconnected { address })
                .ok();
        }.instrument(tracing::info_span!("peer", addr = %address)));

        PeerHandle { peer_tx, session_handle }
    }
}
