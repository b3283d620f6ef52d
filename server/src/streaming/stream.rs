use crate::streaming::finalizer::{FinalizeJob, ReplyFinalizer};
use crate::streaming::sink_writer::SinkWriter;
use raftstream::tcp::client::ReplicaClient;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Server-side state of one open stream.
///
/// `outputs` is the fan-out snapshot captured when the header arrived; peers
/// joining later never retroactively receive this stream's packets. The
/// handles themselves are shared with the fan-out set, not owned here.
#[derive(Debug)]
pub struct StreamState {
    pub stream_id: u64,
    /// The connection the header arrived on. Its teardown force-closes the stream.
    pub owner: u32,
    pub outputs: Vec<Arc<ReplicaClient>>,
    pub sink: SinkWriter,
    finalizer: ReplyFinalizer,
    closed: AtomicBool,
}

impl StreamState {
    pub fn new(
        stream_id: u64,
        owner: u32,
        outputs: Vec<Arc<ReplicaClient>>,
        sink: SinkWriter,
        finalizer: ReplyFinalizer,
    ) -> Self {
        Self {
            stream_id,
            owner,
            outputs,
            sink,
            finalizer,
            closed: AtomicBool::new(false),
        }
    }

    pub fn finalize(&self, job: FinalizeJob) {
        self.finalizer.enqueue(job);
    }

    /// Marks the stream as closing. Packets arriving afterwards are treated
    /// as addressing an unknown stream, even while the close itself is still
    /// waiting for its ordering turn.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Releases the sink without emitting any reply. Connection teardown is
    /// cleanup, not an error report.
    pub fn force_close(&self) {
        trace!("Force-closing stream ID: {}", self.stream_id);
        self.closed.store(true, Ordering::Release);
        self.sink.abort();
    }
}
