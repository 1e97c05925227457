use std::{collections::HashSet, net::SocketAddr, sync::Arc, time::Instant};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    sync::mpsc,
    time::{self, Duration},
};
use tokio_util::codec::Framed;
use crate::{
    block::{BlockData, BlockInfo},
    disk::CommandToDisk,
    picker::MAX_OUTSTANDING_REQUESTS,
    torrent::TorrentContext,
    Bitfield, BLOCK_SIZE,
};
use super::{handshake::*, message::*, state::*, PeerCommand, PeerError, PeerRx, PeerTx, Result};

// Peers get a short window to prove themselves, then a relaxed one.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

type MessageSink = SplitSink<Framed<TcpStream, MessageCodec>, Message>;

// One state machine per remote peer, driving the socket from handshake to
// close. All piece bookkeeping goes through the shared picker and the disk
// task; errors never leave the session.
pub struct PeerSession {

    address: SocketAddr,

    // Read-only state shared across the swarm.
    ctx: Arc<TorrentContext>,

    peer_rx: PeerRx,

    // Handed to the disk task so block reads come back to us.
    peer_tx: PeerTx,

    // Requests we sent that the peer has not answered.
    outstanding: HashSet<BlockInfo>,

    // Requests from the peer waiting on a disk read.
    serving: HashSet<BlockInfo>,

    // Pieces the peer advertises; bits only ever flip on.
    peer_have: Bitfield,

    state: SessionState,

}

impl PeerSession {

    pub fn new(address: SocketAddr, ctx: Arc<TorrentContext>) -> (PeerSession, PeerTx) {

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let peer_have = Bitfield::repeat(false, ctx.info.num_pieces);

        (
            PeerSession {
                address,
                ctx,
                peer_rx,
                peer_tx: peer_tx.clone(),
                outstanding: HashSet::new(),
                serving: HashSet::new(),
                peer_have,
                state: SessionState::default(),
            },
            peer_tx,
        )
    }

    pub async fn run(&mut self) -> Result<()> {

        self.state.conn_state = ConnState::Connecting;
        let stream = time::timeout(HANDSHAKE_TIMEOUT, TcpStream::connect(self.address))
            .await
            .map_err(|_| PeerError::Timeout)??;
        tracing::trace!("outbound connection established");

        let socket = self.exchange_handshake(stream).await?;
        // Keeps any bytes the peer pipelined behind its handshake.
        let socket = socket.map_codec(|_| MessageCodec);
        self.state.conn_state = ConnState::Introducing;

        let (mut sink, mut stream) = socket.split();

        // The tick both enforces the idle deadline and re-pumps requests,
        // e.g. after another session abandons its claims.
        let mut ticker = time::interval(Duration::from_secs(1));
        let mut last_read = Instant::now();

        loop {
            tokio::select! {

                msg = stream.next() => match msg {
                    None => return Err(PeerError::Disconnected),
                    Some(msg) => {
                        last_read = Instant::now();
                        self.handle_msg(&mut sink, msg?).await?;
                    }
                },

                Some(cmd) = self.peer_rx.recv() => match cmd {

                    PeerCommand::BlockRead(block) => self.send_block(&mut sink, block).await?,

                    PeerCommand::PieceWritten(idx) => self.handle_written_piece(&mut sink, idx).await?,

                    PeerCommand::Shutdown => {
                        tracing::trace!("session asked to shut down");
                        break;
                    }
                },

                _ = ticker.tick() => {
                    if last_read.elapsed() >= READ_TIMEOUT {
                        return Err(PeerError::Timeout);
                    }
                    self.pump_requests(&mut sink).await?;
                }
            }
        }

        Ok(())
    }

    // Idempotent teardown: returns in-flight claims to the picker so other
    // sessions can pick them up.
    pub async fn shutdown(&mut self) {
        if self.state.conn_state == ConnState::Closed {
            return;
        }
        self.state.conn_state = ConnState::Closed;

        let freed: Vec<BlockInfo> = self.outstanding.drain().collect();
        self.ctx.picker.free_blocks(freed.iter()).await;

        tracing::debug!(
            down = self.state.throughput.down,
            up = self.state.throughput.up,
            am_choking = self.state.am_choking,
            peer_interested = self.state.peer_interested,
            "session closed",
        );
    }

    // Sends our handshake immediately, then expects the peer's within the
    // handshake deadline. A peer serving a different swarm is fatal; an
    // unexpected peer id is not.
    async fn exchange_handshake(&mut self, stream: TcpStream) -> Result<Framed<TcpStream, HandshakeCodec>> {

        self.state.conn_state = ConnState::Handshaking;
        let mut socket = Framed::new(stream, HandshakeCodec);
        socket.send(Handshake::new(self.ctx.info_hash, self.ctx.client_id)).await?;

        match time::timeout(HANDSHAKE_TIMEOUT, socket.next()).await {
            Err(_) => Err(PeerError::Timeout),
            Ok(None) => Err(PeerError::NoHandshake),
            Ok(Some(handshake)) => {
                let handshake = handshake?;
                if handshake.protocol != PROTOCOL {
                    return Err(PeerError::IncorrectProtocol);
                }
                if handshake.info_hash != self.ctx.info_hash {
                    return Err(PeerError::IncorrectInfoHash);
                }
                tracing::trace!("handshake complete: {:?}", handshake);
                Ok(socket)
            }
        }
    }

    async fn handle_msg(&mut self, sink: &mut MessageSink, msg: Message) -> Result<()> {
        tracing::trace!("read: {}", msg);

        // A bitfield is only valid as the very first message.
        let introducing = self.state.conn_state == ConnState::Introducing;
        if introducing {
            self.state.conn_state = ConnState::Active;
        }

        match msg {

            Message::KeepAlive => {}

            Message::Bitfield(bitfield) => {
                if !introducing {
                    return Err(PeerError::UnexpectedBitfield);
                }
                self.handle_bitfield(sink, bitfield).await?;
            }

            Message::Choke => {
                if !self.state.peer_choking {
                    self.state.peer_choking = true;
                    // The peer will not answer these; give the claims back.
                    let abandoned: Vec<BlockInfo> = self.outstanding.drain().collect();
                    tracing::trace!("choked with {} requests in flight", abandoned.len());
                    self.ctx.picker.free_blocks(abandoned.iter()).await;
                }
            }

            Message::Unchoke => {
                if self.state.peer_choking {
                    self.state.peer_choking = false;
                    self.pump_requests(sink).await?;
                }
            }

            Message::Have { idx } => self.handle_have(sink, idx).await?,

            Message::Block(block) => {
                self.handle_block(block).await?;
                self.pump_requests(sink).await?;
            }

            Message::Request(request) => self.handle_request(request)?,

            Message::Cancel(request) => {
                self.serving.remove(&request);
            }

            Message::Interested => self.state.peer_interested = true,

            Message::NotInterested => self.state.peer_interested = false,

        }

        Ok(())
    }

    // Wrong-sized bitfields and set spare bits are protocol violations.
    async fn handle_bitfield(&mut self, sink: &mut MessageSink, mut bitfield: Bitfield) -> Result<()> {

        let num_pieces = self.ctx.info.num_pieces;
        if bitfield.len() != (num_pieces + 7) / 8 * 8 {
            return Err(PeerError::InvalidBitfield);
        }
        if bitfield[num_pieces..].any() {
            return Err(PeerError::InvalidBitfield);
        }
        bitfield.truncate(num_pieces);

        tracing::debug!("peer has {}/{} pieces", bitfield.count_ones(), num_pieces);
        self.peer_have = bitfield;

        self.update_interest(sink).await?;
        if !self.state.peer_choking {
            self.pump_requests(sink).await?;
        }
        Ok(())
    }

    async fn handle_have(&mut self, sink: &mut MessageSink, idx: u32) -> Result<()> {

        let idx = idx as usize;
        if idx >= self.ctx.info.num_pieces {
            tracing::debug!("have with out-of-range index {}", idx);
            return Err(PeerError::InvalidMessage);
        }

        if !self.peer_have[idx] {
            self.peer_have.set(idx, true);
            self.update_interest(sink).await?;
        }
        if !self.state.peer_choking {
            self.pump_requests(sink).await?;
        }
        Ok(())
    }

    // An incoming block must match a request we sent, length included;
    // anything else is dropped without closing the session.
    async fn handle_block(&mut self, block: BlockData) -> Result<()> {

        let info = block.info();
        if !self.outstanding.remove(&info) {
            tracing::debug!("unexpected block: {:?}", info);
            return Ok(());
        }

        self.state.throughput.down += block.data.len() as u64;
        self.ctx.picker.block_received(&info).await;
        self.ctx.disk_tx.send(CommandToDisk::WriteBlock {
            block: info,
            data: block.data,
        })?;
        Ok(())
    }

    // Serve requests for pieces we hold; the disk task silently drops the
    // rest. We never unchoke, but a peer that asks anyway still gets data.
    fn handle_request(&mut self, request: BlockInfo) -> Result<()> {

        if request.len == 0 || request.len > BLOCK_SIZE || self.serving.contains(&request) {
            return Ok(());
        }
        self.serving.insert(request);
        self.ctx.disk_tx.send(CommandToDisk::ReadBlock {
            block: request,
            tx: self.peer_tx.clone(),
        })?;
        Ok(())
    }

    async fn send_block(&mut self, sink: &mut MessageSink, block: BlockData) -> Result<()> {

        if !self.serving.remove(&block.info()) {
            // Cancelled while the read was in flight.
            return Ok(());
        }
        self.state.throughput.up += block.data.len() as u64;
        self.send_message(sink, Message::Block(block)).await
    }

    // A piece of ours completed: tell the peer and retire any requests we
    // still had out for it.
    async fn handle_written_piece(&mut self, sink: &mut MessageSink, idx: usize) -> Result<()> {
        self.outstanding.retain(|block| block.piece_idx != idx);
        self.send_message(sink, Message::Have { idx: idx as u32 }).await
    }

    // Declare interest once the peer has a piece we lack. Interest is
    // never withdrawn; the session closes instead when it runs dry.
    async fn update_interest(&mut self, sink: &mut MessageSink) -> Result<()> {
        if !self.state.am_interested && self.ctx.picker.peer_has_missing(&self.peer_have).await {
            self.state.am_interested = true;
            self.send_message(sink, Message::Interested).await?;
        }
        Ok(())
    }

    // Tops the request queue up from the picker and writes the burst out in
    // one flush.
    async fn pump_requests(&mut self, sink: &mut MessageSink) -> Result<()> {

        if self.state.peer_choking || !self.state.am_interested {
            return Ok(());
        }
        if self.outstanding.len() >= MAX_OUTSTANDING_REQUESTS {
            return Ok(());
        }

        let requests = self.ctx.picker.pick_blocks(&self.outstanding, &self.peer_have).await;
        if requests.is_empty() {
            return Ok(());
        }

        for block in requests {
            tracing::trace!("requesting {:?}", block);
            self.outstanding.insert(block);
            sink.feed(Message::Request(block)).await?;
        }
        sink.flush().await?;
        Ok(())
    }

    async fn send_message(&mut self, sink: &mut MessageSink, msg: Message) -> Result<()> {
        tracing::trace!("send: {}", msg);
        sink.send(msg).await
    }
}
