use crate::configs::server::ServerConfig;
use crate::streaming::consensus::ConsensusLink;
use crate::streaming::fanout::PeerFanout;
use crate::streaming::finalizer::{FinalizeJob, PacketMeta, RemoteWrite, ReplyFinalizer};
use crate::streaming::registry::StreamRegistry;
use crate::streaming::sink_writer::SinkWriter;
use crate::streaming::state_machine::StateMachine;
use crate::streaming::stream::StreamState;
use flume::Sender;
use raftstream::packet::{PacketKind, StreamPacket, StreamReply};
use raftstream::tcp::client::ReplicaClient;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, trace, warn};

/// The stream-replication pipeline of one server.
///
/// Every accepted packet starts its local write and its fan-out to all peers
/// immediately and is then finalized, strictly in order, by its stream's
/// reply finalizer. Streams progress fully independently of each other.
pub struct StreamSystem {
    config: Arc<ServerConfig>,
    registry: Arc<StreamRegistry>,
    fanout: PeerFanout,
    state_machine: Arc<dyn StateMachine>,
    consensus: Arc<dyn ConsensusLink>,
    connection_id_seq: AtomicU32,
}

impl StreamSystem {
    pub fn new(
        config: Arc<ServerConfig>,
        state_machine: Arc<dyn StateMachine>,
        consensus: Arc<dyn ConsensusLink>,
    ) -> Self {
        let system = Self {
            config,
            registry: Arc::new(StreamRegistry::new()),
            fanout: PeerFanout::new(),
            state_machine,
            consensus,
            connection_id_seq: AtomicU32::new(1),
        };
        system.fanout.add_peers(&system.config.stream.peers);
        system
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn add_peers(&self, addresses: &[String]) {
        self.fanout.add_peers(addresses);
    }

    pub fn peer_count(&self) -> usize {
        self.fanout.peer_count()
    }

    pub fn has_stream(&self, stream_id: u64) -> bool {
        self.registry.has_stream(stream_id)
    }

    pub fn stream_count(&self) -> usize {
        self.registry.stream_count()
    }

    pub fn next_connection_id(&self) -> u32 {
        self.connection_id_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Dispatches one decoded packet. The send to every peer and to the local
    /// sink is issued before this returns; the reply is emitted later by the
    /// stream's finalizer, never out of order within the stream.
    pub async fn handle_packet(
        &self,
        connection_id: u32,
        packet: StreamPacket,
        replies: &Sender<StreamReply>,
    ) {
        trace!(
            "Handling {} packet, stream ID: {}, offset: {}, payload size: {}",
            packet.kind,
            packet.stream_id,
            packet.offset,
            packet.payload.len()
        );
        match packet.kind {
            PacketKind::Header => self.handle_header(connection_id, packet, replies).await,
            PacketKind::Data => self.handle_data(packet, replies).await,
            PacketKind::Close => self.handle_close(packet, replies).await,
        }
    }

    /// Force-closes every stream owned by the connection. Cleanup only, no
    /// replies are emitted.
    pub fn close_connection(&self, connection_id: u32) {
        self.registry.force_close_owned(connection_id);
    }

    pub async fn shutdown(&self) {
        info!("Shutting down the stream system...");
        self.fanout.close().await;
    }

    async fn handle_header(
        &self,
        connection_id: u32,
        packet: StreamPacket,
        replies: &Sender<StreamReply>,
    ) {
        let stream_id = packet.stream_id;
        if self.registry.is_errored(stream_id) {
            warn!("Rejecting header for errored stream ID: {stream_id}");
            Self::reject(&packet, replies);
            return;
        }

        let created = self
            .registry
            .open_with(stream_id, || self.create_stream(connection_id, &packet));
        let state = match created {
            Ok(state) => state,
            Err(error) => {
                warn!("Rejecting header: {error}");
                // The existing stream's finalizer orders the rejection behind
                // whatever is in flight for it.
                match self.registry.get(stream_id) {
                    Some(state) => state.finalize(FinalizeJob::rejected(
                        PacketMeta::of(&packet),
                        replies.clone(),
                    )),
                    None => Self::reject(&packet, replies),
                }
                return;
            }
        };

        let local = state.sink.ready();
        let remote = Self::forward(&state.outputs, &packet).await;
        state.finalize(FinalizeJob::new(
            PacketMeta::of(&packet),
            local,
            remote,
            replies.clone(),
        ));
    }

    async fn handle_data(&self, packet: StreamPacket, replies: &Sender<StreamReply>) {
        let stream_id = packet.stream_id;
        let Some(state) = self.registry.get(stream_id) else {
            warn!(
                "Rejecting data for unknown stream ID: {stream_id}, offset: {}",
                packet.offset
            );
            self.registry.mark_errored(stream_id);
            Self::reject(&packet, replies);
            return;
        };
        if state.is_closed() {
            warn!(
                "Rejecting data for closed stream ID: {stream_id}, offset: {}",
                packet.offset
            );
            self.registry.mark_errored(stream_id);
            state.finalize(FinalizeJob::rejected(PacketMeta::of(&packet), replies.clone()));
            return;
        }

        let local = state.sink.write(packet.payload.clone());
        let remote = Self::forward(&state.outputs, &packet).await;
        state.finalize(FinalizeJob::new(
            PacketMeta::of(&packet),
            local,
            remote,
            replies.clone(),
        ));
    }

    async fn handle_close(&self, packet: StreamPacket, replies: &Sender<StreamReply>) {
        let stream_id = packet.stream_id;
        let Some(state) = self.registry.get(stream_id) else {
            warn!("Rejecting close for unknown stream ID: {stream_id}");
            Self::reject(&packet, replies);
            return;
        };
        if !state.mark_closed() {
            warn!("Rejecting repeated close for stream ID: {stream_id}");
            state.finalize(FinalizeJob::rejected(PacketMeta::of(&packet), replies.clone()));
            return;
        }

        let local = state.sink.close();
        let remote = Self::forward(&state.outputs, &packet).await;
        state.finalize(FinalizeJob::new(
            PacketMeta::of(&packet),
            local,
            remote,
            replies.clone(),
        ));
    }

    fn create_stream(&self, connection_id: u32, packet: &StreamPacket) -> Arc<StreamState> {
        let stream_id = packet.stream_id;
        let (sink_sender, sink_receiver) = oneshot::channel();
        let state_machine = self.state_machine.clone();
        let control = packet.payload.clone();
        tokio::spawn(async move {
            let _ = sink_sender.send(state_machine.open_sink(stream_id, control).await);
        });

        let sink = SinkWriter::spawn(stream_id, sink_receiver);
        let finalizer =
            ReplyFinalizer::spawn(stream_id, self.registry.clone(), self.consensus.clone());
        Arc::new(StreamState::new(
            stream_id,
            connection_id,
            self.fanout.open_outputs(),
            sink,
            finalizer,
        ))
    }

    /// Forwards one packet to every peer in the stream's snapshot, in order.
    /// Each frame is on the wire when this returns; only the acknowledgments
    /// remain pending.
    async fn forward(outputs: &[Arc<ReplicaClient>], packet: &StreamPacket) -> Vec<RemoteWrite> {
        let mut writes = Vec::with_capacity(outputs.len());
        for output in outputs {
            match output.write_nowait(packet.clone()).await {
                Ok(reply) => writes.push(RemoteWrite::Pending(reply)),
                Err(error) => {
                    error!(
                        "Failed to forward {} packet, stream ID: {}, offset: {} to {}: {error}",
                        packet.kind,
                        packet.stream_id,
                        packet.offset,
                        output.server_address()
                    );
                    writes.push(RemoteWrite::Failed);
                }
            }
        }
        writes
    }

    /// Immediate rejection for a packet addressing no live stream. Packets of
    /// a still-registered stream are rejected through its finalizer instead,
    /// so their failure replies keep their place in the stream's reply order.
    fn reject(packet: &StreamPacket, replies: &Sender<StreamReply>) {
        if replies.send(StreamReply::failure(packet, 0)).is_err() {
            trace!(
                "Dropping rejection for stream ID: {}, the connection is gone.",
                packet.stream_id
            );
        }
    }
}
