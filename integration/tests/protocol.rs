use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use integration::faulty::SlowCloseStateMachine;
use integration::test_cluster::{start_node, TestCluster};
use raftstream::codec::{PacketCodec, ReplyCodec};
use raftstream::packet::{PacketKind, StreamPacket, StreamReply};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

type Writer = FramedWrite<OwnedWriteHalf, PacketCodec>;
type Reader = FramedRead<OwnedReadHalf, ReplyCodec>;

async fn connect(address: &str) -> (Writer, Reader) {
    let stream = TcpStream::connect(address).await.unwrap();
    stream.set_nodelay(true).unwrap();
    let (read_half, write_half) = stream.into_split();
    (
        FramedWrite::new(write_half, PacketCodec::default()),
        FramedRead::new(read_half, ReplyCodec),
    )
}

async fn next_reply(reader: &mut Reader) -> StreamReply {
    tokio::time::timeout(Duration::from_secs(5), reader.next())
        .await
        .expect("Timed out waiting for a reply")
        .expect("Connection was closed")
        .expect("Failed to decode a reply")
}

#[tokio::test]
async fn should_emit_replies_in_offset_order() {
    let cluster = TestCluster::start(1).await;
    let (mut writer, mut reader) = connect(&cluster.primary.address).await;

    const PACKETS: i64 = 50;
    const CHUNK: usize = 64;
    writer
        .send(StreamPacket::header(1, Bytes::from_static(b"ctl")))
        .await
        .unwrap();
    for index in 0..PACKETS {
        let payload = Bytes::from(vec![index as u8; CHUNK]);
        writer
            .send(StreamPacket::data(1, index * CHUNK as i64, payload))
            .await
            .unwrap();
    }

    let header = next_reply(&mut reader).await;
    assert_eq!(header.kind, PacketKind::Header);
    assert!(header.success);

    for index in 0..PACKETS {
        let reply = next_reply(&mut reader).await;
        assert_eq!(reply.offset, index * CHUNK as i64);
        assert!(reply.success);
        assert_eq!(reply.bytes_written, CHUNK as i64);
    }

    writer
        .send(StreamPacket::close(1, PACKETS * CHUNK as i64))
        .await
        .unwrap();
    assert!(next_reply(&mut reader).await.success);
}

#[tokio::test]
async fn should_reject_data_without_a_prior_header() {
    let cluster = TestCluster::start(0).await;
    let (mut writer, mut reader) = connect(&cluster.primary.address).await;

    writer
        .send(StreamPacket::data(99, 0, Bytes::from_static(b"orphan")))
        .await
        .unwrap();
    let reply = next_reply(&mut reader).await;
    assert!(!reply.success);
    assert_eq!(reply.stream_id, 99);
    assert!(!cluster.primary.system.has_stream(99));
}

#[tokio::test]
async fn should_treat_data_after_close_as_unknown_stream() {
    let cluster = TestCluster::start(0).await;
    let (mut writer, mut reader) = connect(&cluster.primary.address).await;

    writer
        .send(StreamPacket::header(2, Bytes::from_static(b"ctl")))
        .await
        .unwrap();
    writer.send(StreamPacket::close(2, 0)).await.unwrap();
    writer
        .send(StreamPacket::data(2, 0, Bytes::from_static(b"late")))
        .await
        .unwrap();

    assert!(next_reply(&mut reader).await.success);
    assert!(next_reply(&mut reader).await.success);
    let late = next_reply(&mut reader).await;
    assert_eq!(late.kind, PacketKind::Data);
    assert!(!late.success);
}

#[tokio::test]
async fn should_hold_a_late_rejection_behind_a_slow_close_reply() {
    let node = start_node(
        Arc::new(SlowCloseStateMachine {
            close_delay: Duration::from_millis(100),
        }),
        Vec::new(),
    )
    .await;
    let (mut writer, mut reader) = connect(&node.address).await;

    writer
        .send(StreamPacket::header(4, Bytes::from_static(b"ctl")))
        .await
        .unwrap();
    writer.send(StreamPacket::close(4, 0)).await.unwrap();
    writer
        .send(StreamPacket::data(4, 0, Bytes::from_static(b"late")))
        .await
        .unwrap();

    // The sink close is still sleeping when the late data arrives; its
    // rejection must not overtake the close's reply.
    assert_eq!(next_reply(&mut reader).await.kind, PacketKind::Header);
    let close = next_reply(&mut reader).await;
    assert_eq!(close.kind, PacketKind::Close);
    assert!(close.success);
    let late = next_reply(&mut reader).await;
    assert_eq!(late.kind, PacketKind::Data);
    assert!(!late.success);
}

#[tokio::test]
async fn should_reject_a_duplicate_header() {
    let cluster = TestCluster::start(0).await;
    let (mut writer, mut reader) = connect(&cluster.primary.address).await;

    writer
        .send(StreamPacket::header(3, Bytes::from_static(b"first")))
        .await
        .unwrap();
    writer
        .send(StreamPacket::header(3, Bytes::from_static(b"second")))
        .await
        .unwrap();

    let first = next_reply(&mut reader).await;
    let second = next_reply(&mut reader).await;
    assert_ne!(first.success, second.success);
    assert_eq!(cluster.primary.system.stream_count(), 1);
    assert_eq!(
        cluster.primary_state.control(3),
        Some(Bytes::from_static(b"first"))
    );
}

#[tokio::test]
async fn should_close_the_connection_on_a_malformed_frame() {
    let cluster = TestCluster::start(0).await;
    let mut stream = TcpStream::connect(&cluster.primary.address).await.unwrap();

    // A frame claiming an unknown packet kind. Fatal to the connection only.
    let mut frame = BytesMut::new();
    frame.put_u8(21); // frame length as a single-byte varint
    frame.put_u64(1);
    frame.put_i64(0);
    frame.put_u8(9); // not a valid kind
    frame.put_u32(0);
    stream.write_all(&frame).await.unwrap();

    let (read_half, _write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, ReplyCodec);
    let next = tokio::time::timeout(Duration::from_secs(5), reader.next())
        .await
        .expect("Timed out waiting for the connection to close");
    assert!(next.is_none());

    // The process survives; a fresh connection still works.
    let (mut writer, mut reader) = connect(&cluster.primary.address).await;
    writer
        .send(StreamPacket::header(5, Bytes::new()))
        .await
        .unwrap();
    assert!(next_reply(&mut reader).await.success);
}

#[tokio::test]
async fn should_force_close_streams_on_unclean_disconnect() {
    let cluster = TestCluster::start(0).await;
    let (mut writer, mut reader) = connect(&cluster.primary.address).await;

    writer
        .send(StreamPacket::header(6, Bytes::new()))
        .await
        .unwrap();
    assert!(next_reply(&mut reader).await.success);
    assert!(cluster.primary.system.has_stream(6));

    drop(writer);
    drop(reader);

    let mut attempts = 0;
    while cluster.primary.system.has_stream(6) && attempts < 100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        attempts += 1;
    }
    assert!(!cluster.primary.system.has_stream(6));
}
