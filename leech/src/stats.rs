// Running transfer counters. Each session keeps its own and logs them when
// it goes down; the supervisor logs piece progress on its announce tick.

#[derive(Debug, Default, Clone, Copy)]
pub struct ThroughputStats {

    // Bytes served to the peer.
    pub up: u64,

    // Block payload bytes received from the peer.
    pub down: u64,

}

#[derive(Debug, Default, Clone, Copy)]
pub struct PieceStats {

    pub num_pieces: usize,

    pub num_complete: usize,

    pub bytes_remaining: u64,

}

impl PieceStats {

    pub fn completion_ratio(&self) -> f64 {
        if self.num_pieces == 0 {
            0.0
        } else {
            self.num_complete as f64 / self.num_pieces as f64
        }
    }
}
