use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::{sync::mpsc, task::JoinHandle, time};
use crate::{
    config::Config,
    disk::{self, CommandToDisk, DiskTx, PieceStore},
    metainfo::MetaInfo,
    p2p::{PeerCommand, PeerHandle},
    picker::Picker,
    stats::PieceStats,
    storage::StoreInfo,
    tracker::{AnnounceParams, Event, Tracker},
    ID,
};

#[derive(Debug, thiserror::Error)]
pub enum TorrentError {

    #[error("disk failure: {0}")]
    Disk(String),

    #[error("channel error: {0}")]
    Channel(String),

}

impl<T> From<mpsc::error::SendError<T>> for TorrentError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        TorrentError::Channel(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TorrentError>;
pub type TorrentTx = mpsc::UnboundedSender<CommandToTorrent>;
pub type TorrentRx = mpsc::UnboundedReceiver<CommandToTorrent>;

// Events flowing back to the supervisor from sessions and the disk task.
pub enum CommandToTorrent {

    // Disk task finished assembling a piece; valid is the hash verdict.
    PieceWritten { idx: usize, valid: bool },

    // A session ended, for whatever reason.
    PeerDisconnected { address: SocketAddr },

    // Disk task hit an unrecoverable error.
    DiskFailure { error: String },

}

// Read-only state shared with every peer session.
#[derive(Debug)]
pub struct TorrentContext {

    pub info_hash: ID,

    pub client_id: ID,

    // Block scheduling, shared across sessions.
    pub picker: Picker,

    pub torrent_tx: TorrentTx,

    pub disk_tx: DiskTx,

    pub info: StoreInfo,

}

// The swarm supervisor: owns the session set, discovers peers through the
// tracker tiers, relays piece verdicts and decides when the torrent is
// done.
pub struct Torrent {

    ctx: Arc<TorrentContext>,

    peers: HashMap<SocketAddr, PeerHandle>,

    // Announce endpoints in tiers of descending priority.
    trackers: Vec<Vec<Tracker>>,

    torrent_rx: TorrentRx,

    disk_handle: Option<JoinHandle<disk::Result<()>>>,

    config: Config,

    // The `started` event goes out exactly once.
    announced_started: bool,

}

impl Torrent {

    pub fn new(metainfo: MetaInfo, config: Config) -> Result<Self> {

        let info = StoreInfo::new(&metainfo, config.output_dir.clone());
        let store = PieceStore::new(info.clone(), metainfo.piece_hashes())
            .map_err(|e| TorrentError::Disk(e.to_string()))?;

        // Resume state feeds the picker before anything is scheduled.
        let picker = Picker::with_have(
            store.own_bitfield().clone(),
            info.piece_len,
            info.last_piece_len,
        );

        let (torrent_tx, torrent_rx) = mpsc::unbounded_channel();
        let (disk_handle, disk_tx) = disk::spawn(store, torrent_tx.clone());

        let trackers = metainfo
            .trackers()
            .into_iter()
            .map(|tier| tier.into_iter().filter_map(Tracker::for_url).collect())
            .collect();

        Ok(Torrent {
            ctx: Arc::new(TorrentContext {
                info_hash: metainfo.info_hash(),
                client_id: config.client_id,
                picker,
                torrent_tx,
                disk_tx,
                info,
            }),
            peers: HashMap::new(),
            trackers,
            torrent_rx,
            disk_handle: Some(disk_handle),
            config,
            announced_started: false,
        })
    }

    // Runs the torrent to completion. Returns once every piece is verified
    // on disk and the swarm has been torn down.
    pub async fn start(&mut self) -> Result<()> {

        tracing::info!("starting torrent {}", hex::encode(self.ctx.info_hash));

        if self.ctx.picker.is_complete().await {
            tracing::info!("all pieces already present, nothing to download");
            return self.shutdown(None).await;
        }

        self.run().await
    }

    async fn run(&mut self) -> Result<()> {

        let mut ticker = time::interval(self.config.announce_interval);

        loop {
            tokio::select! {

                // Fires immediately on startup, then at the announce
                // interval: discover, admit, reap, report.
                _ = ticker.tick() => {
                    self.reap_finished_sessions();
                    self.discover_peers().await;
                    self.log_progress().await;
                }

                Some(cmd) = self.torrent_rx.recv() => match cmd {

                    CommandToTorrent::PieceWritten { idx, valid } => {
                        if self.handle_piece_write(idx, valid).await {
                            return self.shutdown(Some(Event::Completed)).await;
                        }
                    }

                    CommandToTorrent::PeerDisconnected { address } => {
                        self.peers.remove(&address);
                        tracing::debug!("reaped session {}, {} live", address, self.peers.len());
                    }

                    CommandToTorrent::DiskFailure { error } => {
                        return Err(TorrentError::Disk(error));
                    }
                },
            }
        }
    }

    // Walks the tracker tiers in priority order and admits new endpoints.
    // Per-tracker failures only log; a round ends at the first tracker
    // that produces peers.
    async fn discover_peers(&mut self) {

        let params = AnnounceParams {
            info_hash: self.ctx.info_hash,
            client_id: self.ctx.client_id,
            port: self.config.port,
            uploaded: 0,
            downloaded: self.ctx.info.total_len - self.ctx.picker.bytes_remaining().await,
            left: self.ctx.picker.bytes_remaining().await,
            event: if self.announced_started { None } else { Some(Event::Started) },
            num_want: 50,
        };

        let mut discovered = Vec::new();
        'tiers: for tier in self.trackers.iter_mut() {
            for tracker in tier.iter_mut() {
                match tracker.announce(&params).await {
                    Ok(peers) if !peers.is_empty() => {
                        tracing::debug!("{} returned {} peers", tracker.url(), peers.len());
                        discovered = peers;
                        break 'tiers;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("announce to {} failed: {}", tracker.url(), e),
                }
            }
        }

        if !discovered.is_empty() {
            self.announced_started = true;
        }
        self.admit_peers(discovered);
    }

    fn admit_peers(&mut self, endpoints: Vec<SocketAddr>) {
        for address in endpoints {
            if self.peers.len() >= self.config.max_peers {
                tracing::debug!("connection cap reached, ignoring remaining endpoints");
                break;
            }
            if self.peers.contains_key(&address) {
                continue;
            }
            tracing::debug!("admitting peer {}", address);
            self.peers.insert(address, PeerHandle::spawn(address, self.ctx.clone()));
        }
    }

    // Sessions end themselves on error; anything finished is pruned even
    // if its disconnect event got lost.
    fn reap_finished_sessions(&mut self) {
        self.peers.retain(|_, peer| !peer.session_handle.is_finished());
    }

    // Returns true when this piece completed the torrent.
    async fn handle_piece_write(&mut self, idx: usize, valid: bool) -> bool {

        if !valid {
            tracing::warn!("piece {} failed verification, rescheduling", idx);
            self.ctx.picker.piece_invalid(idx).await;
            return false;
        }

        self.ctx.picker.piece_written(idx).await;
        let missing = self.ctx.info.num_pieces - self.ctx.picker.num_complete().await;
        tracing::info!("piece {} verified and written, {} pieces remain", idx, missing);

        // Sessions announce the new piece and drop stale requests for it.
        for peer in self.peers.values() {
            peer.peer_tx.send(PeerCommand::PieceWritten(idx)).ok();
        }

        missing == 0
    }

    async fn log_progress(&self) {
        let stats = PieceStats {
            num_pieces: self.ctx.info.num_pieces,
            num_complete: self.ctx.picker.num_complete().await,
            bytes_remaining: self.ctx.picker.bytes_remaining().await,
        };
        tracing::info!(
            "progress: {:.1}% ({}/{} pieces), {} bytes remaining, {} peers",
            stats.completion_ratio() * 100.0,
            stats.num_complete,
            stats.num_pieces,
            stats.bytes_remaining,
            self.peers.len(),
        );
    }

    // Tears the swarm down: sessions first, then the disk task, then a
    // best-effort farewell announce.
    async fn shutdown(&mut self, event: Option<Event>) -> Result<()> {

        tracing::info!("shutting down, disconnecting {} peers", self.peers.len());
        for peer in self.peers.values() {
            peer.peer_tx.send(PeerCommand::Shutdown).ok();
        }
        for (_, peer) in self.peers.drain() {
            peer.session_handle.await.ok();
        }

        self.ctx.disk_tx.send(CommandToDisk::Shutdown).ok();
        if let Some(handle) = self.disk_handle.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(TorrentError::Disk(e.to_string())),
                Err(e) => return Err(TorrentError::Disk(e.to_string())),
            }
        }

        if let Some(event) = event {
            self.farewell_announce(event).await;
        }
        tracing::info!("torrent stopped");
        Ok(())
    }

    // Stopped/completed notices are courtesy; failures are ignored.
    async fn farewell_announce(&mut self, event: Event) {
        let params = AnnounceParams {
            info_hash: self.ctx.info_hash,
            client_id: self.ctx.client_id,
            port: self.config.port,
            uploaded: 0,
            downloaded: self.ctx.info.total_len - self.ctx.picker.bytes_remaining().await,
            left: self.ctx.picker.bytes_remaining().await,
            event: Some(event),
            num_want: 0,
        };
        for tier in self.trackers.iter_mut() {
            for tracker in tier.iter_mut() {
                if tracker.announce(&params).await.is_ok() {
                    return;
                }
            }
        }
    }
}
