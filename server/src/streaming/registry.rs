use crate::server_error::ServerError;
use crate::streaming::stream::StreamState;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Concurrent mapping from stream ID to per-stream state.
///
/// Creation on header and removal on close are single atomic map operations:
/// a concurrent packet either sees the complete state or none of it. Stream
/// IDs that hit a protocol violation are remembered as errored and never
/// accept packets again; streams do not self-heal.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: DashMap<u64, Arc<StreamState>>,
    /// Never pruned: one entry per violated stream ID, kept for the process
    /// lifetime. Violations are client bugs, so the set stays tiny in
    /// practice; a deployment drowning in them has a bigger problem than
    /// this memory.
    errored: DashSet<u64>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the state built by `create` under `stream_id`, or fails with
    /// `DuplicateHeader` without building anything when the ID is taken.
    pub fn open_with(
        &self,
        stream_id: u64,
        create: impl FnOnce() -> Arc<StreamState>,
    ) -> Result<Arc<StreamState>, ServerError> {
        match self.streams.entry(stream_id) {
            Entry::Occupied(_) => Err(ServerError::DuplicateHeader(stream_id)),
            Entry::Vacant(entry) => {
                let state = create();
                entry.insert(state.clone());
                trace!("Opened stream ID: {stream_id}");
                Ok(state)
            }
        }
    }

    pub fn get(&self, stream_id: u64) -> Option<Arc<StreamState>> {
        self.streams.get(&stream_id).map(|state| state.clone())
    }

    pub fn remove(&self, stream_id: u64) -> Option<Arc<StreamState>> {
        self.streams.remove(&stream_id).map(|(_, state)| {
            trace!("Removed stream ID: {stream_id}");
            state
        })
    }

    pub fn mark_errored(&self, stream_id: u64) {
        self.errored.insert(stream_id);
    }

    pub fn is_errored(&self, stream_id: u64) -> bool {
        self.errored.contains(&stream_id)
    }

    pub fn has_stream(&self, stream_id: u64) -> bool {
        self.streams.contains_key(&stream_id)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Force-closes and removes every stream owned by the given connection.
    pub fn force_close_owned(&self, connection_id: u32) {
        let owned: Vec<u64> = self
            .streams
            .iter()
            .filter(|entry| entry.owner == connection_id)
            .map(|entry| entry.stream_id)
            .collect();
        if owned.is_empty() {
            return;
        }

        debug!(
            "Force-closing {} stream(s) owned by connection ID: {connection_id}",
            owned.len()
        );
        for stream_id in owned {
            if let Some((_, state)) = self.streams.remove(&stream_id) {
                state.force_close();
            }
        }
    }
}
