use raftstream::codec::DEFAULT_MAX_FRAME_SIZE;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    pub tcp: TcpConfig,
    pub stream: StreamConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TcpConfig {
    pub address: String,
    pub nodelay: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Cap for a single request frame, in bytes. Oversized frames fail the connection.
    pub max_frame_size: usize,
    /// Stream endpoints of the other replicas. Every packet accepted by this
    /// server is forwarded to all of them.
    pub peers: Vec<String>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8890".to_string(),
            nodelay: true,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            peers: Vec::new(),
        }
    }
}
