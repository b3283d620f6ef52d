use crate::server_error::ServerError;
use async_trait::async_trait;
use tracing::info;

/// The small completion marker handed to the consensus layer once a stream
/// has been fully written and closed on every replica. Committing it through
/// the regular log makes the bulk write durable in the normal consistency
/// model.
#[derive(Debug, Clone, Copy)]
pub struct StreamCompletion {
    pub stream_id: u64,
    pub total_bytes: u64,
}

/// Hand-off to the consensus layer. A single call per stream; the log
/// replication behind it is an external collaborator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConsensusLink: Send + Sync {
    /// Submits the completion marker and resolves with the replicated verdict.
    async fn submit(&self, completion: StreamCompletion) -> Result<bool, ServerError>;
}

/// Accepts every completion and only logs it. Stands in wherever no consensus
/// layer is wired up, such as the standalone binary and the test suites.
#[derive(Debug, Default)]
pub struct LogOnlyConsensus;

#[async_trait]
impl ConsensusLink for LogOnlyConsensus {
    async fn submit(&self, completion: StreamCompletion) -> Result<bool, ServerError> {
        info!(
            "Stream ID: {} completed with {} bytes.",
            completion.stream_id, completion.total_bytes
        );
        Ok(true)
    }
}
