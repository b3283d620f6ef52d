use crate::error::RaftStreamError;
use crate::packet::{StreamPacket, StreamReply};
use crate::tcp::client::{ReplicaClient, ReplyFuture};
use bytes::Bytes;
use futures::future::try_join_all;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

enum HeaderState {
    Pending(ReplyFuture),
    Acknowledged(StreamReply),
    Failed,
}

/// A writable handle to one logical stream, created by [`ReplicaClient::new_stream`].
///
/// The header is already on the wire when the handle exists; writes may be
/// issued before the header acknowledgment arrives. Offsets advance by the
/// payload length of every write. A stream is written once and closed once.
pub struct DataStreamHandle {
    client: Arc<ReplicaClient>,
    stream_id: u64,
    offset: AtomicI64,
    header: Mutex<HeaderState>,
    closed: AtomicBool,
}

impl DataStreamHandle {
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// The replica's acknowledgment of this stream's header packet.
    pub async fn header_reply(&self) -> Result<StreamReply, RaftStreamError> {
        let mut header = self.header.lock().await;
        match std::mem::replace(&mut *header, HeaderState::Failed) {
            HeaderState::Pending(reply_future) => {
                let reply = reply_future.await?;
                *header = HeaderState::Acknowledged(reply);
                Ok(reply)
            }
            HeaderState::Acknowledged(reply) => {
                *header = HeaderState::Acknowledged(reply);
                Ok(reply)
            }
            HeaderState::Failed => Err(RaftStreamError::Disconnected),
        }
    }

    /// Appends `payload` at the stream's current offset and returns the verdict.
    pub async fn write(&self, payload: Bytes) -> Result<StreamReply, RaftStreamError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RaftStreamError::StreamAlreadyClosed(self.stream_id));
        }

        let offset = self.offset.fetch_add(payload.len() as i64, Ordering::AcqRel);
        self.client
            .write(StreamPacket::data(self.stream_id, offset, payload))
            .await
    }

    /// Closes the stream on every replica and returns the final verdict.
    pub async fn close(&self) -> Result<StreamReply, RaftStreamError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(RaftStreamError::StreamAlreadyClosed(self.stream_id));
        }

        let offset = self.offset.load(Ordering::Acquire);
        self.client
            .write(StreamPacket::close(self.stream_id, offset))
            .await
    }
}

impl ReplicaClient {
    /// Opens a new stream described by the opaque `control` request.
    ///
    /// The header packet is sent before this returns, which keeps it ahead of
    /// any data packet subsequently written through the handle.
    pub async fn new_stream(
        self: &Arc<Self>,
        control: Bytes,
    ) -> Result<DataStreamHandle, RaftStreamError> {
        let stream_id = self.next_stream_id();
        trace!("Opening stream ID: {stream_id} to {}", self.server_address());
        let header_future = self
            .write_nowait(StreamPacket::header(stream_id, control))
            .await?;
        Ok(DataStreamHandle {
            client: self.clone(),
            stream_id,
            offset: AtomicI64::new(0),
            header: Mutex::new(HeaderState::Pending(header_future)),
            closed: AtomicBool::new(false),
        })
    }

    /// Streams `data` in `chunk_size` chunks through a fresh stream and
    /// returns the close verdict. Packets are pipelined: every chunk is on
    /// the wire before the first acknowledgment is awaited.
    pub async fn stream_all(
        self: &Arc<Self>,
        control: Bytes,
        data: Bytes,
        chunk_size: usize,
    ) -> Result<StreamReply, RaftStreamError> {
        if chunk_size == 0 {
            return Err(RaftStreamError::InvalidConfiguration);
        }

        let stream_id = self.next_stream_id();
        let mut pending = Vec::with_capacity(data.len() / chunk_size + 2);
        pending.push(
            self.write_nowait(StreamPacket::header(stream_id, control))
                .await?,
        );

        let mut offset = 0usize;
        while offset < data.len() {
            let end = (offset + chunk_size).min(data.len());
            let chunk = data.slice(offset..end);
            pending.push(
                self.write_nowait(StreamPacket::data(stream_id, offset as i64, chunk))
                    .await?,
            );
            offset = end;
        }

        let close_reply = self
            .write_nowait(StreamPacket::close(stream_id, offset as i64))
            .await?;

        for reply in try_join_all(pending).await? {
            if !reply.success {
                return Err(RaftStreamError::WriteRejected(stream_id, reply.offset));
            }
        }

        close_reply.await
    }

    fn next_stream_id(&self) -> u64 {
        self.stream_id_seq.fetch_add(1, Ordering::Relaxed)
    }
}
