use crate::stats::ThroughputStats;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ConnState {

    Connecting,

    Handshaking,

    // Wire is up; the peer may open with a bitfield.
    Introducing,

    Active,

    Closed,

}

#[derive(Debug, Clone, Copy)]
pub struct SessionState {

    pub conn_state: ConnState,

    // Always true: a leecher never serves unchoked uploads reciprocally,
    // though it still answers requests for pieces it holds.
    pub am_choking: bool,

    // Whether we want blocks from the peer.
    pub am_interested: bool,

    // Whether the peer is answering our requests.
    pub peer_choking: bool,

    pub peer_interested: bool,

    pub throughput: ThroughputStats,

}

impl Default for SessionState {
    fn default() -> SessionState {
        SessionState {
            conn_state: ConnState::Connecting,
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
            throughput: ThroughputStats::default(),
        }
    }
}
