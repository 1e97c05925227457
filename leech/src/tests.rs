// Swarm-level scenarios: the real client against scripted peers and
// trackers on localhost.

use std::{net::SocketAddr, time::Duration};
use futures::{SinkExt, StreamExt};
use sha1::{Digest, Sha1};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    task::JoinHandle,
    time,
};
use tokio_util::codec::Framed;
use url::Url;
use crate::{
    block::BlockInfo,
    config::Config,
    metainfo::{File, Info, MetaInfo},
    p2p::handshake::{Handshake, HandshakeCodec},
    p2p::message::{Message, MessageCodec},
    torrent::Torrent,
    Bitfield, ID, BLOCK_SIZE,
};

const TEST_INFO_HASH: ID = *b"leech-test-infohash!";

// Generous bound for a whole scenario; localhost swarms finish in well
// under a second.
const SCENARIO_TIMEOUT: Duration = Duration::from_secs(30);

fn test_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 + 7) as u8).collect()
}

fn test_metainfo(
    announce: &str,
    announce_list: Option<Vec<Vec<&str>>>,
    name: &str,
    payload: &[u8],
    piece_len: usize,
    files: Option<Vec<(&str, usize)>>,
) -> MetaInfo {

    let pieces: Vec<u8> = payload
        .chunks(piece_len)
        .flat_map(|chunk| {
            let mut hasher = Sha1::new();
            hasher.update(chunk);
            let digest: ID = hasher.finalize().into();
            digest
        })
        .collect();

    MetaInfo {
        announce: Url::parse(announce).unwrap(),
        info: Info {
            name: name.to_string(),
            pieces,
            piece_length: piece_len as i64,
            length: if files.is_none() { Some(payload.len() as i64) } else { None },
            files: files.map(|files| {
                files
                    .into_iter()
                    .map(|(path, length)| File {
                        path: vec![path.to_string()],
                        length: length as i64,
                        md5sum: None,
                    })
                    .collect()
            }),
            md5sum: None,
            private: None,
        },
        info_hash: TEST_INFO_HASH,
        announce_list: announce_list.map(|tiers| {
            tiers
                .into_iter()
                .map(|tier| tier.into_iter().map(|url| Url::parse(url).unwrap()).collect())
                .collect()
        }),
        encoding: None,
        creation_date: None,
        comment: None,
        created_by: None,
    }
}

fn test_config(output_dir: &std::path::Path) -> Config {
    Config {
        output_dir: output_dir.to_path_buf(),
        announce_interval: Duration::from_millis(200),
        ..Config::default()
    }
}

// ---- scripted tracker ----------------------------------------------------

fn tracker_peers_body(peers: &[SocketAddr]) -> Vec<u8> {
    let mut compact = Vec::with_capacity(peers.len() * 6);
    for addr in peers {
        match addr.ip() {
            std::net::IpAddr::V4(ip) => compact.extend_from_slice(&ip.octets()),
            std::net::IpAddr::V6(_) => panic!("test peers are ipv4"),
        }
        compact.extend_from_slice(&addr.port().to_be_bytes());
    }
    let mut body = format!("d8:intervali60e5:peers{}:", compact.len()).into_bytes();
    body.extend_from_slice(&compact);
    body.push(b'e');
    body
}

fn tracker_failure_body(reason: &str) -> Vec<u8> {
    format!("d14:failure reason{}:{}e", reason.len(), reason).into_bytes()
}

// Answers each announce with the next scripted body, repeating the last one
// forever.
async fn spawn_tracker(responses: Vec<Vec<u8>>) -> (String, JoinHandle<()>) {

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/announce", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut served = 0usize;
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let body = &responses[served.min(responses.len() - 1)];
            served += 1;

            let mut request = Vec::new();
            let mut chunk = [0u8; 1024];
            loop {
                let n = socket.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&chunk[..n]);
                if request.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }

            let header = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len(),
            );
            socket.write_all(header.as_bytes()).await.ok();
            socket.write_all(body).await.ok();
            socket.shutdown().await.ok();
        }
    });

    (url, handle)
}

// ---- scripted peer -------------------------------------------------------

struct MockSeed {

    payload: Vec<u8>,

    piece_len: usize,

    // Piece indices advertised in the opening bitfield; None means all.
    have: Option<Vec<usize>>,

    // Buffer a burst of requests and answer it newest-first.
    reverse_batch: bool,

    // Flip a byte in every block served.
    corrupt: bool,

    // After this many deliveries: discard stale requests, choke, unchoke.
    choke_after: Option<usize>,

    // Close the connection after this many deliveries.
    close_after: Option<usize>,

    // Protocol violations: a have frame with an out-of-range index, or a
    // bitfield padded to the wrong length.
    bogus_have: bool,

    oversized_bitfield: bool,

}

impl MockSeed {
    fn seeding(payload: Vec<u8>, piece_len: usize) -> Self {
        Self {
            payload,
            piece_len,
            have: None,
            reverse_batch: false,
            corrupt: false,
            choke_after: None,
            close_after: None,
            bogus_have: false,
            oversized_bitfield: false,
        }
    }
}

#[derive(Debug, Default)]
struct SeedReport {

    handshaked: bool,

    // Every request frame observed, in arrival order.
    requests: Vec<BlockInfo>,

}

async fn spawn_seed(opts: MockSeed) -> (SocketAddr, JoinHandle<SeedReport>) {

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut report = SeedReport::default();

        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = Framed::new(stream, HandshakeCodec);

        let handshake = socket.next().await.unwrap().unwrap();
        assert_eq!(handshake.info_hash, TEST_INFO_HASH, "client joined the wrong swarm");
        socket.send(Handshake::new(TEST_INFO_HASH, *b"-MK0001-000000000000")).await.unwrap();
        report.handshaked = true;

        let mut socket = socket.map_codec(|_| MessageCodec);

        let num_pieces = (opts.payload.len() + opts.piece_len - 1) / opts.piece_len;
        let mut have = Bitfield::repeat(false, num_pieces);
        match &opts.have {
            None => have = Bitfield::repeat(true, num_pieces),
            Some(indices) => {
                for &idx in indices {
                    have.set(idx, true);
                }
            }
        }
        // Wire bitfields are padded to a byte boundary.
        have.resize((num_pieces + 7) / 8 * 8, false);
        if opts.oversized_bitfield {
            have.resize(have.len() + 8, false);
        }
        socket.send(Message::Bitfield(have)).await.ok();

        if opts.bogus_have {
            socket.send(Message::Have { idx: num_pieces as u32 }).await.ok();
        }

        let mut delivered = 0usize;
        let mut choked_once = false;
        let mut pending: Vec<BlockInfo> = Vec::new();

        loop {
            let msg = tokio::select! {
                msg = socket.next() => match msg {
                    Some(Ok(msg)) => Some(msg),
                    _ => break,
                },
                // A quiet gap ends a request burst.
                _ = time::sleep(Duration::from_millis(100)), if opts.reverse_batch && !pending.is_empty() => None,
            };

            match msg {
                Some(Message::Interested) => {
                    if socket.send(Message::Unchoke).await.is_err() {
                        break;
                    }
                }
                Some(Message::Request(block)) => {
                    report.requests.push(block);
                    pending.push(block);
                    if !opts.reverse_batch {
                        serve_pending(&mut socket, &opts, &mut pending, &mut delivered, false).await;
                    }
                }
                Some(_) => {}
                // Quiet window expired: drain the burst newest-first.
                None => {
                    serve_pending(&mut socket, &opts, &mut pending, &mut delivered, true).await;
                }
            }

            if let Some(limit) = opts.close_after {
                if delivered >= limit {
                    break;
                }
            }

            if !choked_once && opts.choke_after.is_some_and(|limit| delivered >= limit) {
                choked_once = true;
                socket.send(Message::Choke).await.ok();
                // Requests already in flight go unanswered; the client is
                // expected to re-issue them.
                drain_until_quiet(&mut socket, &mut report).await;
                pending.clear();
                socket.send(Message::Unchoke).await.ok();
            }
        }

        report
    });

    (addr, handle)
}

async fn serve_pending(
    socket: &mut Framed<tokio::net::TcpStream, MessageCodec>,
    opts: &MockSeed,
    pending: &mut Vec<BlockInfo>,
    delivered: &mut usize,
    newest_first: bool,
) {
    while !pending.is_empty() {
        let block = if newest_first { pending.pop().unwrap() } else { pending.remove(0) };
        let start = block.piece_idx * opts.piece_len + block.offset;
        let mut data = opts.payload[start..start + block.len].to_vec();
        if opts.corrupt {
            data[0] ^= 0xff;
        }
        if socket
            .send(Message::Block(crate::block::BlockData {
                piece_idx: block.piece_idx,
                offset: block.offset,
                data,
            }))
            .await
            .is_err()
        {
            return;
        }
        *delivered += 1;
        if opts.choke_after == Some(*delivered) || opts.close_after == Some(*delivered) {
            break;
        }
    }
}

async fn drain_until_quiet(
    socket: &mut Framed<tokio::net::TcpStream, MessageCodec>,
    report: &mut SeedReport,
) {
    loop {
        tokio::select! {
            msg = socket.next() => match msg {
                Some(Ok(Message::Request(block))) => report.requests.push(block),
                Some(Ok(_)) => {}
                _ => return,
            },
            _ = time::sleep(Duration::from_millis(100)) => return,
        }
    }
}

async fn run_to_completion(metainfo: MetaInfo, config: Config) {
    let mut torrent = Torrent::new(metainfo, config).unwrap();
    time::timeout(SCENARIO_TIMEOUT, torrent.start())
        .await
        .expect("scenario timed out")
        .unwrap();
}

// ---- scenarios -----------------------------------------------------------

// Two peers holding disjoint piece sets, one of them answering request
// bursts in reverse order. 3-piece single-file torrent with a short tail.
#[tokio::test]
async fn swarm_download_from_two_peers() {

    let payload = test_payload(40000);
    let piece_len = 16384;

    let (addr_a, peer_a) = spawn_seed(MockSeed {
        have: Some(vec![0]),
        ..MockSeed::seeding(payload.clone(), piece_len)
    }).await;
    let (addr_b, peer_b) = spawn_seed(MockSeed {
        have: Some(vec![1, 2]),
        reverse_batch: true,
        ..MockSeed::seeding(payload.clone(), piece_len)
    }).await;

    let (tracker_url, tracker) = spawn_tracker(vec![tracker_peers_body(&[addr_a, addr_b])]).await;

    let dir = tempfile::TempDir::new().unwrap();
    let metainfo = test_metainfo(&tracker_url, None, "file.bin", &payload, piece_len, None);
    run_to_completion(metainfo, test_config(dir.path())).await;

    assert_eq!(std::fs::read(dir.path().join("file.bin")).unwrap(), payload);

    let report_a = peer_a.await.unwrap();
    let report_b = peer_b.await.unwrap();
    assert!(report_a.handshaked && report_b.handshaked);
    assert_eq!(report_a.requests.iter().map(|b| b.piece_idx).collect::<Vec<_>>(), vec![0]);
    assert_eq!(report_b.requests.iter().map(|b| b.piece_idx).collect::<Vec<_>>(), vec![1, 2]);

    tracker.abort();
}

// A peer that serves only corrupted data: its pieces fail verification,
// stay missing, and a later honest peer completes them.
#[tokio::test]
async fn swarm_recovers_from_corrupt_peer() {

    let payload = test_payload(32768);
    let piece_len = 16384;

    let (addr_bad, bad_peer) = spawn_seed(MockSeed {
        corrupt: true,
        close_after: Some(2),
        ..MockSeed::seeding(payload.clone(), piece_len)
    }).await;
    let (addr_good, good_peer) = spawn_seed(MockSeed::seeding(payload.clone(), piece_len)).await;

    let (tracker_url, tracker) = spawn_tracker(vec![
        tracker_peers_body(&[addr_bad]),
        tracker_peers_body(&[addr_good]),
    ]).await;

    let dir = tempfile::TempDir::new().unwrap();
    let metainfo = test_metainfo(&tracker_url, None, "file.bin", &payload, piece_len, None);
    run_to_completion(metainfo, test_config(dir.path())).await;

    assert_eq!(std::fs::read(dir.path().join("file.bin")).unwrap(), payload);

    // The bad peer was asked and answered; the good peer finished the job.
    assert!(!bad_peer.await.unwrap().requests.is_empty());
    assert_eq!(good_peer.await.unwrap().requests.len(), 2);

    tracker.abort();
}

// Peer chokes mid-transfer after two deliveries. Outstanding requests are
// abandoned and re-issued after the unchoke.
#[tokio::test]
async fn swarm_choke_mid_transfer() {

    // One piece of five blocks, requested in a single burst of five.
    let payload = test_payload(4 * BLOCK_SIZE + 1000);
    let piece_len = payload.len();

    let (addr, peer) = spawn_seed(MockSeed {
        choke_after: Some(2),
        ..MockSeed::seeding(payload.clone(), piece_len)
    }).await;

    let (tracker_url, tracker) = spawn_tracker(vec![tracker_peers_body(&[addr])]).await;

    let dir = tempfile::TempDir::new().unwrap();
    let metainfo = test_metainfo(&tracker_url, None, "file.bin", &payload, piece_len, None);
    run_to_completion(metainfo, test_config(dir.path())).await;

    assert_eq!(std::fs::read(dir.path().join("file.bin")).unwrap(), payload);

    // Blocks 2..5 were requested, abandoned on the choke and re-requested.
    let report = peer.await.unwrap();
    for abandoned_block in 2..5usize {
        let offset = abandoned_block * BLOCK_SIZE;
        let times = report.requests.iter().filter(|b| b.offset == offset).count();
        assert_eq!(times, 2, "block at offset {} should be requested twice", offset);
    }

    tracker.abort();
}

// Multi-file torrent whose first piece straddles the file boundary.
#[tokio::test]
async fn swarm_multi_file_straddle() {

    let payload = test_payload(20000);
    let piece_len = 16384;

    let (addr, peer) = spawn_seed(MockSeed::seeding(payload.clone(), piece_len)).await;
    let (tracker_url, tracker) = spawn_tracker(vec![tracker_peers_body(&[addr])]).await;

    let dir = tempfile::TempDir::new().unwrap();
    let metainfo = test_metainfo(
        &tracker_url,
        None,
        "demo",
        &payload,
        piece_len,
        Some(vec![("a.bin", 10000), ("b.bin", 10000)]),
    );
    run_to_completion(metainfo, test_config(dir.path())).await;

    // Multi-file layouts land under a directory named after the torrent.
    assert_eq!(std::fs::read(dir.path().join("demo/a.bin")).unwrap(), &payload[..10000]);
    assert_eq!(std::fs::read(dir.path().join("demo/b.bin")).unwrap(), &payload[10000..]);
    assert!(peer.await.unwrap().handshaked);

    tracker.abort();
}

// Primary announce fails; the second tier supplies the swarm, and the
// supervisor connects to both of its peers.
#[tokio::test]
async fn swarm_tracker_failover() {

    let payload = test_payload(40000);
    let piece_len = 16384;

    let (addr_a, peer_a) = spawn_seed(MockSeed {
        have: Some(vec![0, 1]),
        ..MockSeed::seeding(payload.clone(), piece_len)
    }).await;
    let (addr_b, peer_b) = spawn_seed(MockSeed {
        have: Some(vec![2]),
        ..MockSeed::seeding(payload.clone(), piece_len)
    }).await;

    let (bad_url, bad_tracker) = spawn_tracker(vec![tracker_failure_body("torrent unknown")]).await;
    let (good_url, good_tracker) = spawn_tracker(vec![tracker_peers_body(&[addr_a, addr_b])]).await;

    let dir = tempfile::TempDir::new().unwrap();
    let metainfo = test_metainfo(
        &bad_url,
        Some(vec![vec![bad_url.as_str()], vec![good_url.as_str()]]),
        "file.bin",
        &payload,
        piece_len,
        None,
    );
    run_to_completion(metainfo, test_config(dir.path())).await;

    assert_eq!(std::fs::read(dir.path().join("file.bin")).unwrap(), payload);
    assert!(peer_a.await.unwrap().handshaked);
    assert!(peer_b.await.unwrap().handshaked);

    bad_tracker.abort();
    good_tracker.abort();
}

// Peers violating the protocol are dropped without poisoning the swarm: a
// have index past the end and a wrong-sized bitfield both close their
// sessions, and an honest peer still completes the download.
#[tokio::test]
async fn swarm_drops_protocol_violators() {

    let payload = test_payload(40000);
    let piece_len = 16384;

    let (addr_bogus, bogus_peer) = spawn_seed(MockSeed {
        bogus_have: true,
        ..MockSeed::seeding(payload.clone(), piece_len)
    }).await;
    let (addr_padded, padded_peer) = spawn_seed(MockSeed {
        oversized_bitfield: true,
        ..MockSeed::seeding(payload.clone(), piece_len)
    }).await;
    let (addr_good, good_peer) = spawn_seed(MockSeed::seeding(payload.clone(), piece_len)).await;

    let (tracker_url, tracker) =
        spawn_tracker(vec![tracker_peers_body(&[addr_bogus, addr_padded, addr_good])]).await;

    let dir = tempfile::TempDir::new().unwrap();
    let metainfo = test_metainfo(&tracker_url, None, "file.bin", &payload, piece_len, None);
    run_to_completion(metainfo, test_config(dir.path())).await;

    assert_eq!(std::fs::read(dir.path().join("file.bin")).unwrap(), payload);

    // The violators were disconnected before any block moved.
    assert!(bogus_peer.await.unwrap().requests.is_empty());
    assert!(padded_peer.await.unwrap().requests.is_empty());
    assert_eq!(good_peer.await.unwrap().requests.len(), 3);

    tracker.abort();
}

// A download that is already on disk needs no peers at all.
#[tokio::test]
async fn swarm_already_complete_on_disk() {

    let payload = test_payload(40000);
    let piece_len = 16384;

    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(dir.path().join("file.bin"), &payload).unwrap();

    // The tracker would refuse anyway; it must never matter.
    let (tracker_url, tracker) = spawn_tracker(vec![tracker_failure_body("down")]).await;

    let metainfo = test_metainfo(&tracker_url, None, "file.bin", &payload, piece_len, None);
    run_to_completion(metainfo, test_config(dir.path())).await;

    assert_eq!(std::fs::read(dir.path().join("file.bin")).unwrap(), payload);
    tracker.abort();
}
