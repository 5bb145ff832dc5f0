// tunables of a download job: main overrides some of the defaults from the command line

use std::time::Duration;

pub const DIAL_TIMEOUT: Duration = Duration::from_secs(15);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
pub const PIECE_TIMEOUT: Duration = Duration::from_secs(15);
pub const MAX_BACKLOG: u32 = 5;
pub const BLOCK_SIZE_B: u32 = 16384;
pub const DEFAULT_LISTENING_PORT: u16 = 6881;

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    // bound on establishing the transport connection to a peer
    pub dial_timeout: Duration,
    // bound on the handshake round trip, and separately on receiving the first bitfield
    pub handshake_timeout: Duration,
    // single deadline for all the reads and writes of one piece attempt
    pub piece_timeout: Duration,
    // max number of block requests sent to a peer and not yet answered
    pub max_backlog: u32,
    pub block_size: u32,
    // announced to the tracker, this client never accepts connections on it
    pub listening_port: u16,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        DownloadConfig {
            dial_timeout: DIAL_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            piece_timeout: PIECE_TIMEOUT,
            max_backlog: MAX_BACKLOG,
            block_size: BLOCK_SIZE_B,
            listening_port: DEFAULT_LISTENING_PORT,
        }
    }
}
