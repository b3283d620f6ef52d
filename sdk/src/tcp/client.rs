use crate::codec::{PacketCodec, ReplyCodec};
use crate::error::RaftStreamError;
use crate::packet::{PacketKind, StreamPacket, StreamReply};
use crate::tcp::config::ReplicaClientConfig;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{error, trace, warn};

/// The identity of one in-flight packet. Offsets advance monotonically within
/// a stream, so the triple is unique per packet on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PendingKey {
    stream_id: u64,
    offset: i64,
    kind: PacketKind,
}

impl PendingKey {
    fn of_packet(packet: &StreamPacket) -> Self {
        Self {
            stream_id: packet.stream_id,
            offset: packet.offset,
            kind: packet.kind,
        }
    }

    fn of_reply(reply: &StreamReply) -> Self {
        Self {
            stream_id: reply.stream_id,
            offset: reply.offset,
            kind: reply.kind,
        }
    }
}

type PendingReplies = Arc<DashMap<PendingKey, oneshot::Sender<StreamReply>>>;
type SharedWriter = Arc<Mutex<Option<FramedWrite<OwnedWriteHalf, PacketCodec>>>>;

/// A pending acknowledgment for one packet. Resolves with `Disconnected`
/// when the connection is lost before the reply arrives.
#[derive(Debug)]
pub struct ReplyFuture {
    receiver: oneshot::Receiver<StreamReply>,
}

impl Future for ReplyFuture {
    type Output = Result<StreamReply, RaftStreamError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|reply| reply.map_err(|_| RaftStreamError::Disconnected))
    }
}

/// TCP client for the stream endpoint of a single replica.
///
/// One client multiplexes packets of many streams over one lazily-established
/// connection. Replies are dispatched to their callers by packet identity.
/// Losing the connection fails all in-flight writes; the next write
/// reconnects, it does not replay anything.
#[derive(Debug)]
pub struct ReplicaClient {
    pub(crate) config: Arc<ReplicaClientConfig>,
    writer: SharedWriter,
    pending: PendingReplies,
    pub(crate) stream_id_seq: AtomicU64,
}

impl ReplicaClient {
    pub fn new(server_address: &str) -> Self {
        Self::create(Arc::new(ReplicaClientConfig::new(server_address)))
    }

    pub fn create(config: Arc<ReplicaClientConfig>) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();
        Self {
            config,
            writer: Arc::new(Mutex::new(None)),
            pending: Arc::new(DashMap::new()),
            stream_id_seq: AtomicU64::new(seed),
        }
    }

    pub fn server_address(&self) -> &str {
        &self.config.server_address
    }

    /// Sends one packet and resolves with the replica's reply for it.
    pub async fn write(&self, packet: StreamPacket) -> Result<StreamReply, RaftStreamError> {
        self.write_nowait(packet).await?.await
    }

    /// Sends and flushes one packet, returning a future of the replica's reply.
    ///
    /// The frame is already on the wire when this returns, so the caller may
    /// issue the next packet while this one is still in flight. Packets of one
    /// stream must be issued in offset order; replicas apply them in arrival
    /// order.
    pub async fn write_nowait(&self, packet: StreamPacket) -> Result<ReplyFuture, RaftStreamError> {
        self.ensure_connected().await?;

        let key = PendingKey::of_packet(&packet);
        let (reply_sender, reply_receiver) = oneshot::channel();
        self.pending.insert(key, reply_sender);

        let mut writer = self.writer.lock().await;
        let Some(framed) = writer.as_mut() else {
            self.pending.remove(&key);
            return Err(RaftStreamError::NotConnected);
        };

        trace!(
            "Sending {} packet, stream ID: {}, offset: {} to {}",
            packet.kind,
            packet.stream_id,
            packet.offset,
            self.config.server_address
        );
        if let Err(error) = framed.send(packet).await {
            error!(
                "Failed to send packet to {}: {error}",
                self.config.server_address
            );
            writer.take();
            self.pending.remove(&key);
            return Err(error);
        }

        Ok(ReplyFuture {
            receiver: reply_receiver,
        })
    }

    /// Closes the connection. In-flight writes resolve with `Disconnected`
    /// instead of hanging.
    pub async fn close(&self) {
        self.writer.lock().await.take();
        self.pending.clear();
    }

    async fn ensure_connected(&self) -> Result<(), RaftStreamError> {
        let mut writer = self.writer.lock().await;
        if writer.is_some() {
            return Ok(());
        }

        let address = &self.config.server_address;
        trace!("Connecting to replica stream endpoint: {address}...");
        let stream = TcpStream::connect(address).await?;
        if self.config.nodelay {
            stream.set_nodelay(true)?;
        }

        let (read_half, write_half) = stream.into_split();
        writer.replace(FramedWrite::new(write_half, PacketCodec::default()));

        let pending = self.pending.clone();
        let shared_writer = self.writer.clone();
        let address = address.clone();
        tokio::spawn(async move {
            Self::read_replies(read_half, pending, shared_writer, address).await;
        });
        Ok(())
    }

    async fn read_replies(
        read_half: OwnedReadHalf,
        pending: PendingReplies,
        writer: SharedWriter,
        address: String,
    ) {
        let mut replies = FramedRead::new(read_half, ReplyCodec);
        while let Some(reply) = replies.next().await {
            match reply {
                Ok(reply) => {
                    let key = PendingKey::of_reply(&reply);
                    match pending.remove(&key) {
                        Some((_, reply_sender)) => {
                            // The caller may have given up already.
                            let _ = reply_sender.send(reply);
                        }
                        None => warn!(
                            "Received an unexpected reply from {address}, stream ID: {}, offset: {}",
                            reply.stream_id, reply.offset
                        ),
                    }
                }
                Err(error) => {
                    error!("Failed to read a reply from {address}: {error}");
                    break;
                }
            }
        }

        trace!("Connection to {address} has been closed.");
        writer.lock().await.take();
        // Dropping the pending senders fails the in-flight writes.
        pending.clear();
    }
}
