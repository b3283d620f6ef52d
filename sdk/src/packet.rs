use crate::bytes_serializable::BytesSerializable;
use crate::error::RaftStreamError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use strum::Display;

/// The offset carried by a header packet. A header is always the first packet of a stream
/// and carries the opaque control request instead of raw payload bytes.
pub const HEADER_OFFSET: i64 = -1;

/// Size of the fixed part of a request frame body: stream ID (8) + offset (8) + kind (1) + payload length (4).
pub const PACKET_HEADER_SIZE: usize = 21;

/// Size of a reply frame: stream ID (8) + offset (8) + success (1) + bytes written (8) + kind (1).
pub const REPLY_SIZE: usize = 26;

/// The kind of a stream packet, encoded as a single byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
#[repr(u8)]
pub enum PacketKind {
    /// First packet of a stream, carries the control request describing what is being streamed.
    Header = 0,
    /// Raw payload bytes at a given stream offset.
    Data = 1,
    /// Last packet of a stream, releases the stream on every replica.
    Close = 2,
}

impl PacketKind {
    pub fn as_code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Result<Self, RaftStreamError> {
        match code {
            0 => Ok(PacketKind::Header),
            1 => Ok(PacketKind::Data),
            2 => Ok(PacketKind::Close),
            _ => Err(RaftStreamError::InvalidPacketKind(code)),
        }
    }
}

/// A single wire unit of a stream. Packets sharing one stream ID form a logical stream
/// which is written once, in offset order, and closed once.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPacket {
    pub stream_id: u64,
    pub offset: i64,
    pub kind: PacketKind,
    pub payload: Bytes,
}

impl StreamPacket {
    pub fn header(stream_id: u64, control: Bytes) -> Self {
        Self {
            stream_id,
            offset: HEADER_OFFSET,
            kind: PacketKind::Header,
            payload: control,
        }
    }

    pub fn data(stream_id: u64, offset: i64, payload: Bytes) -> Self {
        Self {
            stream_id,
            offset,
            kind: PacketKind::Data,
            payload,
        }
    }

    pub fn close(stream_id: u64, offset: i64) -> Self {
        Self {
            stream_id,
            offset,
            kind: PacketKind::Close,
            payload: Bytes::new(),
        }
    }

    /// Total size of the frame body on the wire, excluding the varint length prefix.
    pub fn size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }
}

impl BytesSerializable for StreamPacket {
    fn to_bytes(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(self.size());
        bytes.put_u64(self.stream_id);
        bytes.put_i64(self.offset);
        bytes.put_u8(self.kind.as_code());
        bytes.put_u32(self.payload.len() as u32);
        bytes.put_slice(&self.payload);
        bytes.freeze()
    }

    fn from_bytes(mut bytes: Bytes) -> Result<Self, RaftStreamError> {
        if bytes.len() < PACKET_HEADER_SIZE {
            return Err(RaftStreamError::InvalidFrameLength(bytes.len() as u64));
        }

        let stream_id = bytes.get_u64();
        let offset = bytes.get_i64();
        let kind = PacketKind::from_code(bytes.get_u8())?;
        let payload_length = bytes.get_u32() as usize;
        if bytes.remaining() != payload_length {
            return Err(RaftStreamError::InvalidPayloadLength(payload_length as u64));
        }

        Ok(Self {
            stream_id,
            offset,
            kind,
            payload: bytes,
        })
    }
}

/// The acknowledgment for a single packet, echoing its identity fields.
/// `bytes_written` equals the packet's payload length when `success` is true.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamReply {
    pub stream_id: u64,
    pub offset: i64,
    pub success: bool,
    pub bytes_written: i64,
    pub kind: PacketKind,
}

impl StreamReply {
    pub fn success(packet: &StreamPacket, bytes_written: i64) -> Self {
        Self {
            stream_id: packet.stream_id,
            offset: packet.offset,
            success: true,
            bytes_written,
            kind: packet.kind,
        }
    }

    pub fn failure(packet: &StreamPacket, bytes_written: i64) -> Self {
        Self {
            stream_id: packet.stream_id,
            offset: packet.offset,
            success: false,
            bytes_written,
            kind: packet.kind,
        }
    }
}

impl BytesSerializable for StreamReply {
    fn to_bytes(&self) -> Bytes {
        let mut bytes = BytesMut::with_capacity(REPLY_SIZE);
        bytes.put_u64(self.stream_id);
        bytes.put_i64(self.offset);
        bytes.put_u8(self.success as u8);
        bytes.put_i64(self.bytes_written);
        bytes.put_u8(self.kind.as_code());
        bytes.freeze()
    }

    fn from_bytes(mut bytes: Bytes) -> Result<Self, RaftStreamError> {
        if bytes.len() != REPLY_SIZE {
            return Err(RaftStreamError::InvalidFrameLength(bytes.len() as u64));
        }

        let stream_id = bytes.get_u64();
        let offset = bytes.get_i64();
        let success = bytes.get_u8() != 0;
        let bytes_written = bytes.get_i64();
        let kind = PacketKind::from_code(bytes.get_u8())?;
        Ok(Self {
            stream_id,
            offset,
            success,
            bytes_written,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_serialize_and_deserialize_data_packet() {
        let packet = StreamPacket::data(42, 1024, Bytes::from_static(b"payload"));
        let bytes = packet.to_bytes();
        assert_eq!(bytes.len(), PACKET_HEADER_SIZE + 7);

        let decoded = StreamPacket::from_bytes(bytes).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn should_mark_header_packet_with_sentinel_offset() {
        let packet = StreamPacket::header(7, Bytes::from_static(b"control"));
        assert_eq!(packet.offset, HEADER_OFFSET);
        assert_eq!(packet.kind, PacketKind::Header);
    }

    #[test]
    fn should_reject_unknown_packet_kind() {
        let packet = StreamPacket::data(1, 0, Bytes::new());
        let mut bytes = BytesMut::from(packet.to_bytes().as_ref());
        bytes[16] = 9;
        let result = StreamPacket::from_bytes(bytes.freeze());
        assert!(matches!(result, Err(RaftStreamError::InvalidPacketKind(9))));
    }

    #[test]
    fn should_reject_payload_length_mismatch() {
        let packet = StreamPacket::data(1, 0, Bytes::from_static(b"abcd"));
        let mut bytes = BytesMut::from(packet.to_bytes().as_ref());
        bytes.truncate(bytes.len() - 1);
        let result = StreamPacket::from_bytes(bytes.freeze());
        assert!(matches!(
            result,
            Err(RaftStreamError::InvalidPayloadLength(4))
        ));
    }

    #[test]
    fn should_serialize_and_deserialize_reply() {
        let packet = StreamPacket::data(42, 2048, Bytes::from_static(b"xyz"));
        let reply = StreamReply::success(&packet, 3);
        let bytes = reply.to_bytes();
        assert_eq!(bytes.len(), REPLY_SIZE);

        let decoded = StreamReply::from_bytes(bytes).unwrap();
        assert_eq!(decoded, reply);
    }
}
