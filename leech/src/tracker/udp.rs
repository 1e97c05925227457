use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use bytes::{Buf, BufMut, BytesMut};
use tokio::{net::UdpSocket, time};
use url::Url;
use super::{AnnounceParams, Event, Result, TrackerError, TRACKER_TIMEOUT};

// BEP 15. Every request carries a random transaction id the response must
// echo; the connect step yields a connection id for the announce.

const PROTOCOL_MAGIC: i64 = 0x41727101980;
const ACTION_CONNECT: i32 = 0;
const ACTION_ANNOUNCE: i32 = 1;

pub struct UdpTracker {

    url: Url,

}

impl UdpTracker {

    pub fn new(url: Url) -> Self {
        Self { url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub async fn announce(&mut self, params: &AnnounceParams) -> Result<Vec<SocketAddr>> {

        let host = self.url.host_str().ok_or_else(|| TrackerError::InvalidUrl(self.url.clone()))?;
        let port = self.url.port().ok_or_else(|| TrackerError::InvalidUrl(self.url.clone()))?;
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| TrackerError::InvalidUrl(self.url.clone()))?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(addr).await?;

        let conn_id = self.connect(&socket).await?;
        self.send_announce(&socket, conn_id, params).await
    }

    // Connect request: magic, action 0, transaction id. The 16-byte reply
    // must echo both before handing us a connection id.
    async fn connect(&mut self, socket: &UdpSocket) -> Result<i64> {

        let trans_id: i32 = rand::random();

        let mut buf = BytesMut::with_capacity(16);
        buf.put_i64(PROTOCOL_MAGIC);
        buf.put_i32(ACTION_CONNECT);
        buf.put_i32(trans_id);
        socket.send(&buf).await?;

        let mut resp_buf = [0u8; 16];
        let n = time::timeout(TRACKER_TIMEOUT, socket.recv(&mut resp_buf)).await??;
        if n < 16 {
            return Err(TrackerError::Response("connect response too short".to_string()));
        }

        let mut resp = &resp_buf[..];
        if resp.get_i32() != ACTION_CONNECT {
            return Err(TrackerError::Response("connect response with wrong action".to_string()));
        }
        if resp.get_i32() != trans_id {
            return Err(TrackerError::Response("transaction id mismatch".to_string()));
        }

        tracing::trace!("udp tracker connection established");
        Ok(resp.get_i64())
    }

    // 98-byte announce; the reply is a 20-byte header followed by the
    // compact peer list.
    async fn send_announce(
        &mut self,
        socket: &UdpSocket,
        conn_id: i64,
        params: &AnnounceParams,
    ) -> Result<Vec<SocketAddr>> {

        let trans_id: i32 = rand::random();

        let mut buf = BytesMut::with_capacity(98);
        buf.put_i64(conn_id);
        buf.put_i32(ACTION_ANNOUNCE);
        buf.put_i32(trans_id);
        buf.put(&params.info_hash[..]);
        buf.put(&params.client_id[..]);
        buf.put_u64(params.downloaded);
        buf.put_u64(params.left);
        buf.put_u64(params.uploaded);
        buf.put_i32(match params.event {
            None => 0,
            Some(Event::Completed) => 1,
            Some(Event::Started) => 2,
            Some(Event::Stopped) => 3,
        });
        buf.put_i32(0); // ip: let the tracker use the packet source
        buf.put_i32(rand::random()); // key
        buf.put_i32(-1); // num_want: tracker default
        buf.put_u16(params.port);
        debug_assert_eq!(buf.len(), 98);
        socket.send(&buf).await?;

        let mut resp_buf = [0u8; 1500];
        let n = time::timeout(TRACKER_TIMEOUT, socket.recv(&mut resp_buf)).await??;
        if n < 20 {
            return Err(TrackerError::Response("announce response too short".to_string()));
        }

        let mut resp = &resp_buf[..n];
        if resp.get_i32() != ACTION_ANNOUNCE {
            return Err(TrackerError::Response("announce response with wrong action".to_string()));
        }
        if resp.get_i32() != trans_id {
            return Err(TrackerError::Response("transaction id mismatch".to_string()));
        }
        let _interval = resp.get_i32();
        let _leechers = resp.get_i32();
        let _seeders = resp.get_i32();

        let num_peers = (n - 20) / 6;
        let mut peers = Vec::with_capacity(num_peers);
        for _ in 0..num_peers {
            let ip = resp.get_u32();
            let port = resp.get_u16();
            peers.push(SocketAddr::new(Ipv4Addr::from(ip).into(), port));
        }

        tracing::debug!("udp tracker returned {} peers", peers.len());
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimal BEP 15 tracker: one connect exchange, one announce exchange.
    async fn spawn_udp_tracker(peers: Vec<SocketAddr>) -> Url {

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("udp://{}", socket.local_addr().unwrap())).unwrap();

        tokio::spawn(async move {
            let conn_id: i64 = 0x1234_5678_9abc;

            let mut buf = [0u8; 1500];
            let (n, from) = socket.recv_from(&mut buf).await.unwrap();
            let mut req = &buf[..n];
            assert_eq!(req.get_i64(), PROTOCOL_MAGIC);
            assert_eq!(req.get_i32(), ACTION_CONNECT);
            let trans_id = req.get_i32();

            let mut resp = BytesMut::with_capacity(16);
            resp.put_i32(ACTION_CONNECT);
            resp.put_i32(trans_id);
            resp.put_i64(conn_id);
            socket.send_to(&resp, from).await.unwrap();

            let (n, from) = socket.recv_from(&mut buf).await.unwrap();
            assert_eq!(n, 98);
            let mut req = &buf[..n];
            assert_eq!(req.get_i64(), conn_id);
            assert_eq!(req.get_i32(), ACTION_ANNOUNCE);
            let trans_id = req.get_i32();

            let mut resp = BytesMut::new();
            resp.put_i32(ACTION_ANNOUNCE);
            resp.put_i32(trans_id);
            resp.put_i32(1800); // interval
            resp.put_i32(1); // leechers
            resp.put_i32(2); // seeders
            for peer in peers {
                match peer {
                    SocketAddr::V4(v4) => {
                        resp.extend_from_slice(&v4.ip().octets());
                        resp.put_u16(v4.port());
                    }
                    SocketAddr::V6(_) => unreachable!("test peers are ipv4"),
                }
            }
            socket.send_to(&resp, from).await.unwrap();
        });

        url
    }

    #[tokio::test]
    async fn announce_round_trip() {

        let expected = vec![
            "10.0.0.1:6881".parse().unwrap(),
            "10.0.0.2:51413".parse().unwrap(),
        ];
        let url = spawn_udp_tracker(expected.clone()).await;

        let params = AnnounceParams {
            info_hash: [0xab; 20],
            client_id: *b"-LC0001-000000000000",
            port: 6881,
            uploaded: 0,
            downloaded: 0,
            left: 1000,
            event: Some(Event::Started),
            num_want: 50,
        };

        let mut tracker = UdpTracker::new(url);
        let peers = tracker.announce(&params).await.unwrap();
        assert_eq!(peers, expected);
    }
}
