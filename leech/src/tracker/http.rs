use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use bytes::Buf;
use serde::de;
use serde_derive::Deserialize;
use url::Url;
use super::{AnnounceParams, Result, TRACKER_TIMEOUT};

pub struct HttpTracker {

    client: reqwest::Client,

    url: Url,

}

impl HttpTracker {

    pub fn new(url: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    // GET <announce>?info_hash=..&peer_id=..&port=..&uploaded=..
    // &downloaded=..&left=..&compact=1&numwant=..[&event=..]
    // A `failure reason` in the response is logged and yields no peers.
    pub async fn announce(&mut self, params: &AnnounceParams) -> Result<Vec<SocketAddr>> {

        let mut url = format!(
            "{}?info_hash={}&peer_id={}&port={}&uploaded={}&downloaded={}&left={}&compact=1&numwant={}",
            self.url,
            urlencoding::encode_binary(&params.info_hash),
            urlencoding::encode_binary(&params.client_id),
            params.port,
            params.uploaded,
            params.downloaded,
            params.left,
            params.num_want,
        );
        if let Some(event) = params.event {
            url.push_str(&format!("&event={}", event));
        }
        tracing::debug!("announce: {}", url);

        let raw = self.client
            .get(&url)
            .timeout(TRACKER_TIMEOUT)
            .send()
            .await?
            .bytes()
            .await?;

        let resp: AnnounceResponse = bencode::from_bytes(&raw)?;
        tracing::debug!("announce response: {:?}", resp);

        if let Some(reason) = resp.failure_reason {
            tracing::warn!("tracker reported failure: {}", reason);
            return Ok(Vec::new());
        }
        if let Some(warning) = resp.warning_message {
            tracing::warn!("tracker warning: {}", warning);
        }

        Ok(resp.peers)
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct AnnounceResponse {

    // Present on errors; no other key matters then.
    #[serde(rename = "failure reason")]
    pub failure_reason: Option<String>,

    // Like failure reason, but the response still counts.
    #[serde(rename = "warning message")]
    pub warning_message: Option<String>,

    // Seconds to wait between regular announces.
    pub interval: Option<u64>,

    #[serde(rename = "min interval")]
    pub min_interval: Option<u64>,

    // Seeder / leecher counts.
    pub complete: Option<u64>,

    pub incomplete: Option<u64>,

    #[serde(default)]
    #[serde(deserialize_with = "peers_deserialize")]
    pub peers: Vec<SocketAddr>,

}

// Trackers answer with either the compact 6-bytes-per-peer string or a list
// of dictionaries, regardless of what `compact` asked for.
fn peers_deserialize<'de, D>(deserializer: D) -> std::result::Result<Vec<SocketAddr>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct PeerVisitor;

    impl<'de> de::Visitor<'de> for PeerVisitor {

        type Value = Vec<SocketAddr>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a compact peer string or a list of peer dictionaries")
        }

        // 4-byte IPv4 then 2-byte port, both network order.
        fn visit_bytes<E>(self, mut v: &[u8]) -> std::result::Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.len() % 6 != 0 {
                return Err(E::custom("compact peer string not a multiple of 6 bytes"));
            }

            let mut peers = Vec::with_capacity(v.len() / 6);
            while v.has_remaining() {
                peers.push(SocketAddr::new(
                    IpAddr::V4(Ipv4Addr::from(v.get_u32())),
                    v.get_u16(),
                ));
            }
            Ok(peers)
        }

        fn visit_seq<A>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            #[derive(Deserialize)]
            struct PeerEntry {
                ip: String,
                port: u16,
            }

            let mut peers = Vec::new();
            while let Some(peer) = seq.next_element::<PeerEntry>()? {
                // Hostname entries are skipped; resolution is not worth it
                // for the rare non-compact tracker.
                if let Ok(ip) = peer.ip.parse::<Ipv4Addr>() {
                    peers.push(SocketAddr::new(IpAddr::V4(ip), peer.port));
                }
            }
            Ok(peers)
        }
    }

    deserializer.deserialize_any(PeerVisitor)
}
