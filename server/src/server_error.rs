use raftstream::error::RaftStreamError;
use thiserror::Error;
use tokio::io;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error")]
    IoError(#[from] io::Error),
    #[error("SDK error")]
    SdkError(#[from] RaftStreamError),
    #[error("Cannot load configuration: {0}")]
    CannotLoadConfiguration(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Cannot open sink for stream ID: {0}")]
    CannotOpenSink(u64),
    #[error("Cannot write to sink for stream ID: {0}")]
    CannotWriteToSink(u64),
    #[error("Cannot close sink for stream ID: {0}")]
    CannotCloseSink(u64),
    #[error("Duplicate header for stream ID: {0}")]
    DuplicateHeader(u64),
}
