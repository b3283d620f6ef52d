use async_trait::async_trait;
use bytes::Bytes;
use server::server_error::ServerError;
use server::streaming::state_machine::{StateMachine, StreamSink};
use std::time::Duration;

/// A state machine whose sinks under-report every write by a fixed amount.
/// Used to exercise the byte-count consistency check across replicas.
#[derive(Debug)]
pub struct ShortWriteStateMachine {
    pub shortfall: u64,
}

#[async_trait]
impl StateMachine for ShortWriteStateMachine {
    async fn open_sink(
        &self,
        _stream_id: u64,
        _control: Bytes,
    ) -> Result<Box<dyn StreamSink>, ServerError> {
        Ok(Box::new(ShortWriteSink {
            shortfall: self.shortfall,
        }))
    }
}

#[derive(Debug)]
struct ShortWriteSink {
    shortfall: u64,
}

#[async_trait]
impl StreamSink for ShortWriteSink {
    async fn write(&mut self, payload: Bytes) -> Result<u64, ServerError> {
        let bytes_written = payload.len() as u64;
        Ok(bytes_written.saturating_sub(self.shortfall))
    }

    async fn close(&mut self) -> Result<(), ServerError> {
        Ok(())
    }
}

/// A state machine whose sinks take a while to close. Used to exercise the
/// per-stream reply ordering around a slow close.
#[derive(Debug)]
pub struct SlowCloseStateMachine {
    pub close_delay: Duration,
}

#[async_trait]
impl StateMachine for SlowCloseStateMachine {
    async fn open_sink(
        &self,
        _stream_id: u64,
        _control: Bytes,
    ) -> Result<Box<dyn StreamSink>, ServerError> {
        Ok(Box::new(SlowCloseSink {
            close_delay: self.close_delay,
        }))
    }
}

#[derive(Debug)]
struct SlowCloseSink {
    close_delay: Duration,
}

#[async_trait]
impl StreamSink for SlowCloseSink {
    async fn write(&mut self, payload: Bytes) -> Result<u64, ServerError> {
        Ok(payload.len() as u64)
    }

    async fn close(&mut self) -> Result<(), ServerError> {
        tokio::time::sleep(self.close_delay).await;
        Ok(())
    }
}
