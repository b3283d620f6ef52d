use crate::bytes_serializable::BytesSerializable;
use crate::error::RaftStreamError;
use crate::packet::{StreamPacket, StreamReply, PACKET_HEADER_SIZE, REPLY_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Default cap for a single frame body. Oversized frames fail the connection
/// instead of buffering without bound.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024 + PACKET_HEADER_SIZE;

/// Length-delimited codec for request frames: `[frame_len: varint][frame body]`.
///
/// Decoding is a pure function of the buffered bytes: a partial frame yields
/// `None` until the remaining bytes arrive. Any malformed length or unknown
/// packet kind is fatal to the connection that produced it.
#[derive(Debug)]
pub struct PacketCodec {
    max_frame_size: usize,
}

impl PacketCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Decoder for PacketCodec {
    type Item = StreamPacket;
    type Error = RaftStreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StreamPacket>, Self::Error> {
        let (frame_length, prefix_length) = match try_decode_varint(src)? {
            Some(decoded) => decoded,
            None => return Ok(None),
        };

        if frame_length < PACKET_HEADER_SIZE as u64 || frame_length > self.max_frame_size as u64 {
            return Err(RaftStreamError::InvalidFrameLength(frame_length));
        }

        let total_length = prefix_length + frame_length as usize;
        if src.len() < total_length {
            src.reserve(total_length - src.len());
            return Ok(None);
        }

        src.advance(prefix_length);
        let frame = src.split_to(frame_length as usize).freeze();
        StreamPacket::from_bytes(frame).map(Some)
    }
}

impl Encoder<StreamPacket> for PacketCodec {
    type Error = RaftStreamError;

    fn encode(&mut self, packet: StreamPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let size = packet.size();
        if size > self.max_frame_size {
            return Err(RaftStreamError::InvalidFrameLength(size as u64));
        }

        dst.reserve(varint_size(size as u64) + size);
        put_varint(dst, size as u64);
        dst.put_slice(&packet.to_bytes());
        Ok(())
    }
}

/// Codec for reply frames. Replies are fixed-size and carry no payload,
/// so they need no outer length prefix.
#[derive(Debug, Default)]
pub struct ReplyCodec;

impl Decoder for ReplyCodec {
    type Item = StreamReply;
    type Error = RaftStreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StreamReply>, Self::Error> {
        if src.len() < REPLY_SIZE {
            return Ok(None);
        }

        let frame = src.split_to(REPLY_SIZE).freeze();
        StreamReply::from_bytes(frame).map(Some)
    }
}

impl Encoder<StreamReply> for ReplyCodec {
    type Error = RaftStreamError;

    fn encode(&mut self, reply: StreamReply, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(REPLY_SIZE);
        dst.put_slice(&reply.to_bytes());
        Ok(())
    }
}

const MAX_VARINT_BYTES: usize = 10;

fn put_varint(dst: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            dst.put_u8(byte);
            return;
        }
        dst.put_u8(byte | 0x80);
    }
}

fn varint_size(mut value: u64) -> usize {
    let mut size = 1;
    while value >= 0x80 {
        value >>= 7;
        size += 1;
    }
    size
}

/// Reads a LEB128 varint from the front of `src` without consuming it.
/// Returns the value and the number of prefix bytes, or `None` when the
/// varint is not complete yet.
fn try_decode_varint(src: &BytesMut) -> Result<Option<(u64, usize)>, RaftStreamError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (index, byte) in src.iter().enumerate() {
        if index == MAX_VARINT_BYTES {
            return Err(RaftStreamError::InvalidFrameLength(value));
        }

        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(Some((value, index + 1)));
        }
        shift += 7;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketKind;
    use bytes::Bytes;

    fn encode_packet(packet: StreamPacket) -> BytesMut {
        let mut codec = PacketCodec::default();
        let mut bytes = BytesMut::new();
        codec.encode(packet, &mut bytes).unwrap();
        bytes
    }

    #[test]
    fn should_decode_packet_from_complete_frame() {
        let packet = StreamPacket::data(1, 0, Bytes::from_static(b"hello"));
        let mut bytes = encode_packet(packet.clone());

        let decoded = PacketCodec::default().decode(&mut bytes).unwrap();
        assert_eq!(decoded, Some(packet));
        assert!(bytes.is_empty());
    }

    #[test]
    fn should_wait_for_more_bytes_on_partial_frame() {
        let packet = StreamPacket::data(1, 0, Bytes::from_static(b"hello"));
        let bytes = encode_packet(packet.clone());
        let mut codec = PacketCodec::default();

        let mut buffer = BytesMut::new();
        for chunk in bytes.chunks(3) {
            buffer.extend_from_slice(chunk);
            if buffer.len() < bytes.len() {
                assert_eq!(codec.decode(&mut buffer).unwrap(), None);
            }
        }

        assert_eq!(codec.decode(&mut buffer).unwrap(), Some(packet));
    }

    #[test]
    fn should_decode_consecutive_frames_from_one_buffer() {
        let first = StreamPacket::header(3, Bytes::from_static(b"control"));
        let second = StreamPacket::data(3, 0, Bytes::from_static(b"payload"));
        let mut bytes = encode_packet(first.clone());
        bytes.extend_from_slice(&encode_packet(second.clone()));

        let mut codec = PacketCodec::default();
        assert_eq!(codec.decode(&mut bytes).unwrap(), Some(first));
        assert_eq!(codec.decode(&mut bytes).unwrap(), Some(second));
        assert_eq!(codec.decode(&mut bytes).unwrap(), None);
    }

    #[test]
    fn should_fail_on_oversized_frame() {
        let mut codec = PacketCodec::new(64);
        let packet = StreamPacket::data(1, 0, Bytes::from(vec![0u8; 128]));
        let mut bytes = BytesMut::new();
        PacketCodec::default().encode(packet, &mut bytes).unwrap();

        let result = codec.decode(&mut bytes);
        assert!(matches!(
            result,
            Err(RaftStreamError::InvalidFrameLength(_))
        ));
    }

    #[test]
    fn should_fail_on_unknown_kind_byte() {
        let packet = StreamPacket::data(1, 0, Bytes::new());
        let mut bytes = encode_packet(packet);
        let kind_index = bytes.len() - 4 - 1;
        bytes[kind_index] = 77;

        let result = PacketCodec::default().decode(&mut bytes);
        assert!(matches!(
            result,
            Err(RaftStreamError::InvalidPacketKind(77))
        ));
    }

    #[test]
    fn should_encode_multi_byte_varint_prefix() {
        let packet = StreamPacket::data(1, 0, Bytes::from(vec![7u8; 300]));
        let mut bytes = encode_packet(packet.clone());
        // 321-byte body needs a two-byte varint.
        assert_eq!(bytes.len(), 2 + packet.size());

        let decoded = PacketCodec::default().decode(&mut bytes).unwrap();
        assert_eq!(decoded, Some(packet));
    }

    #[test]
    fn should_roundtrip_reply_through_codec() {
        let packet = StreamPacket::data(9, 100, Bytes::from_static(b"abc"));
        let reply = StreamReply::success(&packet, 3);
        let mut codec = ReplyCodec;
        let mut bytes = BytesMut::new();
        codec.encode(reply, &mut bytes).unwrap();
        assert_eq!(codec.decode(&mut bytes).unwrap(), Some(reply));
        assert_eq!(reply.kind, PacketKind::Data);
    }
}
