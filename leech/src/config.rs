use std::{path::PathBuf, time::Duration};
use rand::Rng;
use crate::ID;

#[derive(Debug, Clone)]
pub struct Config {

    // Directory downloads are written into.
    pub output_dir: PathBuf,

    // Port reported to trackers in announces.
    pub port: u16,

    // Cap on concurrent peer sessions.
    pub max_peers: usize,

    // How often the tracker tiers are re-queried for peers.
    pub announce_interval: Duration,

    // Unique 20-byte identifier for this client instance.
    pub client_id: ID,

}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            port: 6881,
            max_peers: 50,
            announce_interval: Duration::from_secs(30),
            client_id: generate_client_id(),
        }
    }
}

// Azureus-style id: fixed client tag followed by a random alphanumeric tail.
pub fn generate_client_id() -> ID {
    let mut id = *b"-LC0001-xxxxxxxxxxxx";
    let mut rng = rand::thread_rng();
    for b in id[8..].iter_mut() {
        *b = rng.sample(rand::distributions::Alphanumeric);
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_format() {
        let id = generate_client_id();
        assert_eq!(&id[..8], b"-LC0001-");
        assert!(id[8..].iter().all(u8::is_ascii_alphanumeric));
    }
}
