use std::net::SocketAddr;
use std::time::Duration;
use url::Url;
use crate::ID;

mod http;
mod udp;

pub use http::HttpTracker;
pub use udp::UdpTracker;

type Result<T> = std::result::Result<T, TrackerError>;

// Deadline for one tracker exchange, HTTP request or UDP round trip.
pub const TRACKER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {

    #[error("request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("error decoding response: {0}")]
    Bencode(#[from] bencode::Error),

    #[error("tracker timed out")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("malformed tracker url: {0}")]
    InvalidUrl(Url),

    #[error("bad response: {0}")]
    Response(String),

}

#[derive(Debug, Clone, Copy)]
pub struct AnnounceParams {

    pub info_hash: ID,

    pub client_id: ID,

    // Port we claim to accept peers on.
    pub port: u16,

    pub uploaded: u64,

    pub downloaded: u64,

    // Bytes still needed for a complete download.
    pub left: u64,

    pub event: Option<Event>,

    // How many peers we would like back (HTTP; UDP uses the protocol
    // default).
    pub num_want: usize,

}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {

    Started,

    Completed,

    Stopped,

}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Started => write!(f, "started"),
            Event::Completed => write!(f, "completed"),
            Event::Stopped => write!(f, "stopped"),
        }
    }
}

// One announce endpoint; the url scheme picks the wire protocol.
pub enum Tracker {
    Http(HttpTracker),
    Udp(UdpTracker),
}

impl Tracker {

    // None for schemes we do not speak.
    pub fn for_url(url: Url) -> Option<Tracker> {
        match url.scheme() {
            "http" | "https" => Some(Tracker::Http(HttpTracker::new(url))),
            "udp" => Some(Tracker::Udp(UdpTracker::new(url))),
            scheme => {
                tracing::warn!("unsupported tracker scheme {} for {}", scheme, url);
                None
            }
        }
    }

    pub fn url(&self) -> &Url {
        match self {
            Tracker::Http(t) => t.url(),
            Tracker::Udp(t) => t.url(),
        }
    }

    pub async fn announce(&mut self, params: &AnnounceParams) -> Result<Vec<SocketAddr>> {
        match self {
            Tracker::Http(t) => t.announce(params).await,
            Tracker::Udp(t) => t.announce(params).await,
        }
    }
}
