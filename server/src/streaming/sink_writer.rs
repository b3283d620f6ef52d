use crate::server_error::ServerError;
use crate::streaming::state_machine::StreamSink;
use bytes::Bytes;
use flume::{unbounded, Receiver};
use tokio::sync::oneshot;
use tracing::{error, trace, warn};

type SinkResult = Result<u64, ServerError>;

#[derive(Debug)]
enum SinkCommand {
    /// Resolves with 0 bytes once the sink has been opened. The header
    /// packet's local write.
    Ready { done: oneshot::Sender<SinkResult> },
    Write {
        payload: Bytes,
        done: oneshot::Sender<SinkResult>,
    },
    Close { done: oneshot::Sender<SinkResult> },
    /// Releases the sink without reporting to anyone. Connection teardown.
    Abort,
}

/// A background task owning one stream's sink.
///
/// Local writes of consecutive packets must be applied to the sink strictly
/// in arrival order even though their completions are awaited elsewhere; the
/// single consumer loop is what provides that order. The sink itself arrives
/// asynchronously, so commands enqueued before the state machine has opened
/// it simply wait.
#[derive(Debug)]
pub struct SinkWriter {
    sender: flume::Sender<SinkCommand>,
    stream_id: u64,
}

impl SinkWriter {
    pub fn spawn(
        stream_id: u64,
        sink: oneshot::Receiver<Result<Box<dyn StreamSink>, ServerError>>,
    ) -> Self {
        let (sender, receiver) = unbounded();
        tokio::spawn(async move {
            Self::run(stream_id, sink, receiver).await;
        });
        Self { sender, stream_id }
    }

    /// Completion of the sink opening itself, counted as a 0-byte write.
    pub fn ready(&self) -> oneshot::Receiver<SinkResult> {
        self.command(|done| SinkCommand::Ready { done })
    }

    pub fn write(&self, payload: Bytes) -> oneshot::Receiver<SinkResult> {
        self.command(|done| SinkCommand::Write { payload, done })
    }

    pub fn close(&self) -> oneshot::Receiver<SinkResult> {
        self.command(|done| SinkCommand::Close { done })
    }

    pub fn abort(&self) {
        if self.sender.send(SinkCommand::Abort).is_err() {
            trace!(
                "Sink writer for stream ID: {} has already finished.",
                self.stream_id
            );
        }
    }

    fn command(
        &self,
        command: impl FnOnce(oneshot::Sender<SinkResult>) -> SinkCommand,
    ) -> oneshot::Receiver<SinkResult> {
        let (done, completion) = oneshot::channel();
        if self.sender.send(command(done)).is_err() {
            warn!(
                "Sink writer for stream ID: {} is gone, rejecting the command.",
                self.stream_id
            );
        }
        completion
    }

    async fn run(
        stream_id: u64,
        sink: oneshot::Receiver<Result<Box<dyn StreamSink>, ServerError>>,
        receiver: Receiver<SinkCommand>,
    ) {
        let mut sink = match sink.await {
            Ok(Ok(sink)) => Some(sink),
            Ok(Err(err)) => {
                error!("Failed to open sink for stream ID: {stream_id}: {err}");
                None
            }
            Err(_) => {
                error!("Sink opening for stream ID: {stream_id} was dropped.");
                None
            }
        };

        while let Ok(command) = receiver.recv_async().await {
            match command {
                SinkCommand::Ready { done } => {
                    let result = match sink {
                        Some(_) => Ok(0),
                        None => Err(ServerError::CannotOpenSink(stream_id)),
                    };
                    let _ = done.send(result);
                }
                SinkCommand::Write { payload, done } => {
                    let result = match sink.as_mut() {
                        Some(sink) => sink.write(payload).await,
                        None => Err(ServerError::CannotOpenSink(stream_id)),
                    };
                    if let Err(error) = &result {
                        error!("Failed to write to sink for stream ID: {stream_id}: {error}");
                    }
                    let _ = done.send(result);
                }
                SinkCommand::Close { done } => {
                    let result = match sink.take() {
                        Some(mut sink) => sink.close().await.map(|_| 0),
                        None => Err(ServerError::CannotCloseSink(stream_id)),
                    };
                    let _ = done.send(result);
                    break;
                }
                SinkCommand::Abort => {
                    if let Some(mut sink) = sink.take() {
                        if let Err(error) = sink.close().await {
                            error!(
                                "Failed to release sink for stream ID: {stream_id}: {error}"
                            );
                        }
                    }
                    break;
                }
            }
        }
        trace!("Sink writer for stream ID: {stream_id} has finished.");
    }
}
