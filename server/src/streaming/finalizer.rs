use crate::server_error::ServerError;
use crate::streaming::consensus::{ConsensusLink, StreamCompletion};
use crate::streaming::registry::StreamRegistry;
use crate::streaming::replies::{assemble, Verdict};
use flume::{unbounded, Receiver};
use raftstream::error::RaftStreamError;
use raftstream::packet::{PacketKind, StreamPacket, StreamReply};
use raftstream::tcp::client::ReplyFuture;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, trace, warn};

/// Identity of a packet being finalized; the payload itself is not needed
/// once its writes are in flight.
#[derive(Debug, Clone, Copy)]
pub struct PacketMeta {
    pub stream_id: u64,
    pub offset: i64,
    pub kind: PacketKind,
}

impl PacketMeta {
    pub fn of(packet: &StreamPacket) -> Self {
        Self {
            stream_id: packet.stream_id,
            offset: packet.offset,
            kind: packet.kind,
        }
    }
}

/// One peer's share of a packet's fan-out: either an in-flight
/// acknowledgment or a write that already failed at send time.
#[derive(Debug)]
pub enum RemoteWrite {
    Pending(ReplyFuture),
    Failed,
}

#[derive(Debug)]
enum JobOutcome {
    /// I/O already issued; the verdict is whatever it settles to.
    Pending {
        local: oneshot::Receiver<Result<u64, ServerError>>,
        remote: Vec<RemoteWrite>,
    },
    /// Verdicted at dispatch time as a protocol violation.
    Rejected,
}

/// A packet awaiting its ordering turn.
#[derive(Debug)]
pub struct FinalizeJob {
    meta: PacketMeta,
    outcome: JobOutcome,
    replies: flume::Sender<StreamReply>,
}

impl FinalizeJob {
    pub fn new(
        meta: PacketMeta,
        local: oneshot::Receiver<Result<u64, ServerError>>,
        remote: Vec<RemoteWrite>,
        replies: flume::Sender<StreamReply>,
    ) -> Self {
        Self {
            meta,
            outcome: JobOutcome::Pending { local, remote },
            replies,
        }
    }

    /// A rejection for a packet addressing a still-live stream. It takes its
    /// ordering turn like any write, so the failure reply cannot overtake the
    /// replies of packets ahead of it.
    pub fn rejected(meta: PacketMeta, replies: flume::Sender<StreamReply>) -> Self {
        Self {
            meta,
            outcome: JobOutcome::Rejected,
            replies,
        }
    }
}

/// The ordering gate of one stream.
///
/// Jobs are enqueued in packet order while their local and remote I/O is
/// already in flight; the single consumer loop settles them strictly in that
/// order, so packet k's reply is never emitted before packet k-1's no matter
/// how their network waits interleave. A failed packet settles like any
/// other and does not hold up or poison its successors. The close packet's
/// verdict additionally gates the consensus hand-off, after which the stream
/// leaves the registry.
#[derive(Debug)]
pub struct ReplyFinalizer {
    sender: flume::Sender<FinalizeJob>,
    stream_id: u64,
}

impl ReplyFinalizer {
    pub fn spawn(
        stream_id: u64,
        registry: Arc<StreamRegistry>,
        consensus: Arc<dyn ConsensusLink>,
    ) -> Self {
        let (sender, receiver) = unbounded();
        tokio::spawn(async move {
            Self::run(stream_id, receiver, registry, consensus).await;
        });
        Self { sender, stream_id }
    }

    pub fn enqueue(&self, job: FinalizeJob) {
        if self.sender.send(job).is_err() {
            warn!(
                "Reply finalizer for stream ID: {} is gone, dropping the packet verdict.",
                self.stream_id
            );
        }
    }

    async fn run(
        stream_id: u64,
        receiver: Receiver<FinalizeJob>,
        registry: Arc<StreamRegistry>,
        consensus: Arc<dyn ConsensusLink>,
    ) {
        while let Ok(job) = receiver.recv_async().await {
            let FinalizeJob {
                meta,
                outcome,
                replies,
            } = job;
            let (mut verdict, closing) = match outcome {
                JobOutcome::Pending { local, remote } => (
                    Self::settle(local, remote, meta).await,
                    meta.kind == PacketKind::Close,
                ),
                JobOutcome::Rejected => (
                    Verdict {
                        success: false,
                        bytes_written: 0,
                    },
                    false,
                ),
            };
            if closing && verdict.success {
                let completion = StreamCompletion {
                    stream_id,
                    total_bytes: meta.offset.max(0) as u64,
                };
                match consensus.submit(completion).await {
                    Ok(true) => {}
                    Ok(false) => {
                        error!("Consensus rejected completion of stream ID: {stream_id}");
                        verdict.success = false;
                    }
                    Err(error) => {
                        error!("Failed to submit completion of stream ID: {stream_id}: {error}");
                        verdict.success = false;
                    }
                }
            }

            let reply = StreamReply {
                stream_id: meta.stream_id,
                offset: meta.offset,
                success: verdict.success,
                bytes_written: verdict.bytes_written,
                kind: meta.kind,
            };
            if replies.send(reply).is_err() {
                // The connection is gone; the verdict is discarded.
                trace!(
                    "Dropping reply for stream ID: {}, offset: {}.",
                    meta.stream_id,
                    meta.offset
                );
            }

            if closing {
                // The close reply is on the channel before the stream leaves
                // the registry, so a later packet's rejection cannot overtake
                // it. Rejections enqueued behind the close drain here; the
                // loop ends once the stream state, and with it the sender,
                // is dropped.
                registry.remove(stream_id);
            }
        }
        trace!("Reply finalizer for stream ID: {stream_id} has finished.");
    }

    /// Awaits the combined completion of a packet's local and remote writes.
    /// Everything here is already in flight; this only collects the results.
    async fn settle(
        local: oneshot::Receiver<Result<u64, ServerError>>,
        remote: Vec<RemoteWrite>,
        meta: PacketMeta,
    ) -> Verdict {
        let local_result = local
            .await
            .unwrap_or(Err(ServerError::CannotWriteToSink(meta.stream_id)));

        let mut remote_results = Vec::with_capacity(remote.len());
        for write in remote {
            remote_results.push(match write {
                RemoteWrite::Pending(reply) => reply.await,
                RemoteWrite::Failed => Err(RaftStreamError::Disconnected),
            });
        }

        assemble(meta.kind, local_result, remote_results)
    }
}
