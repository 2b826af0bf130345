use std::time::Duration;

use dzrp_protocol::DEFAULT_MAX_FRAME_LEN;

/// Default port for DZRP connections
pub const DEFAULT_PORT: u16 = 11000;

/// How long to wait for the CPU to reach a requested run/stop state
pub const DEFAULT_STATE_TIMEOUT: Duration = Duration::from_secs(1);

/// Server settings chosen by the host
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Loopback port to listen on; 0 picks a free one
    pub port: u16,
    /// Largest accepted frame `len`; bigger frames drop the connection
    pub max_frame_len: usize,
    /// Upper bound for every run/stop wait
    pub state_timeout: Duration,
    /// Name reported to the client in the INIT response
    pub program_name: String,
}

impl ServerConfig {
    pub fn with_port(port: u16) -> Self {
        ServerConfig {
            port,
            ..Self::default()
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: DEFAULT_PORT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            state_timeout: DEFAULT_STATE_TIMEOUT,
            program_name: format!("next-dzrp v{}", env!("CARGO_PKG_VERSION")),
        }
    }
}
