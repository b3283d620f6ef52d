use crate::server_error::ServerError;
use raftstream::error::RaftStreamError;
use raftstream::packet::{PacketKind, StreamReply};

/// The combined judgment for one packet, assembled from the local write
/// result and every remote write result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verdict {
    pub success: bool,
    pub bytes_written: i64,
}

/// A packet succeeds only when its local write succeeded and every peer both
/// succeeded and advanced by the same byte count. The byte-count equality is
/// the consistency check that all replicas moved in lockstep; a header has no
/// payload, so it needs only every peer's acknowledgment. The reply always
/// reports the local byte count.
pub fn assemble(
    kind: PacketKind,
    local: Result<u64, ServerError>,
    remote: Vec<Result<StreamReply, RaftStreamError>>,
) -> Verdict {
    let (mut success, bytes_written) = match local {
        Ok(bytes_written) => (true, bytes_written as i64),
        Err(_) => (false, 0),
    };

    for reply in remote {
        match reply {
            Ok(reply) if reply.success => {
                if kind != PacketKind::Header && reply.bytes_written != bytes_written {
                    success = false;
                }
            }
            _ => success = false,
        }
    }

    Verdict {
        success,
        bytes_written,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use raftstream::packet::StreamPacket;

    fn remote_reply(success: bool, bytes_written: i64) -> Result<StreamReply, RaftStreamError> {
        let packet = StreamPacket::data(1, 0, Bytes::new());
        Ok(if success {
            StreamReply::success(&packet, bytes_written)
        } else {
            StreamReply::failure(&packet, bytes_written)
        })
    }

    #[test]
    fn should_succeed_when_all_replicas_advanced_by_the_same_amount() {
        let remote = vec![remote_reply(true, 100), remote_reply(true, 100)];
        let verdict = assemble(PacketKind::Data, Ok(100), remote);
        assert_eq!(
            verdict,
            Verdict {
                success: true,
                bytes_written: 100
            }
        );
    }

    #[test]
    fn should_fail_when_one_peer_reports_a_different_byte_count() {
        let remote = vec![remote_reply(true, 100), remote_reply(true, 90)];
        let verdict = assemble(PacketKind::Data, Ok(100), remote);
        assert!(!verdict.success);
        assert_eq!(verdict.bytes_written, 100);
    }

    #[test]
    fn should_fail_when_one_peer_failed() {
        let remote = vec![remote_reply(false, 100)];
        let verdict = assemble(PacketKind::Data, Ok(100), remote);
        assert!(!verdict.success);
    }

    #[test]
    fn should_fail_when_a_peer_is_unreachable() {
        let remote = vec![Err(RaftStreamError::Disconnected)];
        let verdict = assemble(PacketKind::Data, Ok(100), remote);
        assert!(!verdict.success);
        assert_eq!(verdict.bytes_written, 100);
    }

    #[test]
    fn should_fail_with_zero_bytes_when_the_local_write_failed() {
        let remote = vec![remote_reply(true, 100)];
        let verdict = assemble(
            PacketKind::Data,
            Err(ServerError::CannotWriteToSink(1)),
            remote,
        );
        assert!(!verdict.success);
        assert_eq!(verdict.bytes_written, 0);
    }

    #[test]
    fn should_accept_header_acknowledgments_regardless_of_byte_count() {
        let remote = vec![remote_reply(true, 0)];
        let verdict = assemble(PacketKind::Header, Ok(0), remote);
        assert!(verdict.success);
        assert_eq!(verdict.bytes_written, 0);
    }

    #[test]
    fn should_succeed_without_peers_when_the_local_write_succeeded() {
        let verdict = assemble(PacketKind::Data, Ok(42), Vec::new());
        assert!(verdict.success);
        assert_eq!(verdict.bytes_written, 42);
    }
}
