use crate::server_error::ServerError;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

/// The write destination of one stream, owned by the state machine.
/// The server never interprets the bytes it forwards here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StreamSink: Send {
    /// Appends the payload and returns the number of bytes written.
    async fn write(&mut self, payload: Bytes) -> Result<u64, ServerError>;

    /// Seals the sink. No writes may follow.
    async fn close(&mut self) -> Result<(), ServerError>;
}

/// The pluggable state machine that materializes stream bytes into storage.
/// The server consumes it only through this narrow "open a sink" contract.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateMachine: Send + Sync {
    /// Opens a sink for a new stream described by the opaque control request.
    async fn open_sink(
        &self,
        stream_id: u64,
        control: Bytes,
    ) -> Result<Box<dyn StreamSink>, ServerError>;
}

/// A state machine keeping every stream in memory. Used by the standalone
/// binary and the test suites; production deployments plug in their own.
#[derive(Debug, Default)]
pub struct InMemoryStateMachine {
    controls: Arc<DashMap<u64, Bytes>>,
    payloads: Arc<DashMap<u64, BytesMut>>,
}

impl InMemoryStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn control(&self, stream_id: u64) -> Option<Bytes> {
        self.controls
            .get(&stream_id)
            .map(|control| control.clone())
    }

    pub fn payload(&self, stream_id: u64) -> Option<Bytes> {
        self.payloads
            .get(&stream_id)
            .map(|payload| Bytes::copy_from_slice(payload.as_ref()))
    }

    pub fn stream_count(&self) -> usize {
        self.controls.len()
    }
}

#[async_trait]
impl StateMachine for InMemoryStateMachine {
    async fn open_sink(
        &self,
        stream_id: u64,
        control: Bytes,
    ) -> Result<Box<dyn StreamSink>, ServerError> {
        trace!(
            "Opening in-memory sink for stream ID: {stream_id}, control request size: {}",
            control.len()
        );
        self.controls.insert(stream_id, control);
        self.payloads.insert(stream_id, BytesMut::new());
        Ok(Box::new(InMemorySink {
            stream_id,
            payloads: self.payloads.clone(),
        }))
    }
}

#[derive(Debug)]
struct InMemorySink {
    stream_id: u64,
    payloads: Arc<DashMap<u64, BytesMut>>,
}

#[async_trait]
impl StreamSink for InMemorySink {
    async fn write(&mut self, payload: Bytes) -> Result<u64, ServerError> {
        let bytes_written = payload.len() as u64;
        match self.payloads.get_mut(&self.stream_id) {
            Some(mut bytes) => {
                bytes.extend_from_slice(&payload);
                Ok(bytes_written)
            }
            None => Err(ServerError::CannotWriteToSink(self.stream_id)),
        }
    }

    async fn close(&mut self) -> Result<(), ServerError> {
        trace!("Closing in-memory sink for stream ID: {}", self.stream_id);
        Ok(())
    }
}
