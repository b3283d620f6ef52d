use crate::server_error::ServerError;
use crate::streaming::system::StreamSystem;
use futures::{SinkExt, StreamExt};
use raftstream::codec::{PacketCodec, ReplyCodec};
use raftstream::error::RaftStreamError;
use raftstream::packet::StreamReply;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{error, info, trace};

pub(crate) async fn handle_connection(
    address: SocketAddr,
    stream: TcpStream,
    system: Arc<StreamSystem>,
) -> Result<(), ServerError> {
    let connection_id = system.next_connection_id();
    if system.config().tcp.nodelay {
        stream.set_nodelay(true)?;
    }

    let (read_half, write_half) = stream.into_split();
    let mut packets = FramedRead::new(
        read_half,
        PacketCodec::new(system.config().stream.max_frame_size),
    );
    let (reply_sender, reply_receiver) = flume::unbounded();
    tokio::spawn(async move {
        write_replies(write_half, reply_receiver, address).await;
    });

    let result = async {
        while let Some(packet) = packets.next().await {
            let packet = packet?;
            system
                .handle_packet(connection_id, packet, &reply_sender)
                .await;
        }
        Ok(())
    }
    .await;

    // Streams owned by this connection do not outlive it. The writer task
    // drains the outstanding replies on its own and then stops.
    system.close_connection(connection_id);
    result
}

async fn write_replies(
    write_half: OwnedWriteHalf,
    replies: flume::Receiver<StreamReply>,
    address: SocketAddr,
) {
    let mut sink = FramedWrite::new(write_half, ReplyCodec);
    while let Ok(reply) = replies.recv_async().await {
        trace!(
            "Sending {} reply, stream ID: {}, offset: {}, success: {} to {address}",
            reply.kind,
            reply.stream_id,
            reply.offset,
            reply.success
        );
        if let Err(error) = sink.send(reply).await {
            error!("Failed to send a reply to {address}: {error}");
            break;
        }
    }
    trace!("Reply writer for {address} has finished.");
}

pub(crate) fn handle_error(error: ServerError) {
    match error {
        ServerError::IoError(error) => handle_io_error(error),
        ServerError::SdkError(RaftStreamError::IoError(error)) => handle_io_error(error),
        _ => {
            error!("Connection has failed: {error}");
        }
    }
}

fn handle_io_error(error: tokio::io::Error) {
    match error.kind() {
        ErrorKind::UnexpectedEof => {
            info!("Connection has been closed.");
        }
        ErrorKind::ConnectionAborted => {
            info!("Connection has been aborted.");
        }
        ErrorKind::ConnectionRefused => {
            info!("Connection has been refused.");
        }
        ErrorKind::ConnectionReset => {
            info!("Connection has been reset.");
        }
        _ => {
            error!("Connection has failed: {error}");
        }
    }
}
