use thiserror::Error;
use tokio::io;

#[derive(Debug, Error)]
pub enum RaftStreamError {
    #[error("IO error")]
    IoError(#[from] io::Error),
    #[error("Not connected")]
    NotConnected,
    #[error("Disconnected")]
    Disconnected,
    #[error("Invalid configuration")]
    InvalidConfiguration,
    #[error("Invalid packet kind: {0}")]
    InvalidPacketKind(u8),
    #[error("Invalid frame length: {0}")]
    InvalidFrameLength(u64),
    #[error("Invalid payload length: {0}")]
    InvalidPayloadLength(u64),
    #[error("Stream already closed: {0}")]
    StreamAlreadyClosed(u64),
    #[error("Stream write rejected by server: stream ID: {0}, offset: {1}")]
    WriteRejected(u64, i64),
}
