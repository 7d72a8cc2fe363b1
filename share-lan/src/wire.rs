//! Message codec: bincode with an explicit size ceiling. Stream framing (a
//! 4-byte LE ciphertext length) lives with the link loops in the transport
//! module; UDP datagrams carry one encoded message each.

use crate::protocol::LanMessage;

/// Encode a message, rejecting anything over `max_len` bytes.
pub fn encode_message(msg: &LanMessage, max_len: u32) -> Result<Vec<u8>, FrameEncodeError> {
    let bytes = bincode::serialize(msg).map_err(FrameEncodeError::Encode)?;
    if bytes.len() > max_len as usize {
        return Err(FrameEncodeError::TooLarge);
    }
    Ok(bytes)
}

/// Decode one message from `bytes`, rejecting oversized input before parsing.
pub fn decode_message(bytes: &[u8], max_len: u32) -> Result<LanMessage, FrameDecodeError> {
    if bytes.len() > max_len as usize {
        return Err(FrameDecodeError::TooLarge);
    }
    bincode::deserialize(bytes).map_err(FrameDecodeError::Decode)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameEncodeError {
    #[error("encode error: {0}")]
    Encode(#[from] bincode::Error),
    #[error("message too large")]
    TooLarge,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    #[error("message too large")]
    TooLarge,
    #[error("decode error: {0}")]
    Decode(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PROTOCOL_VERSION;
    use share_core::PeerIdentity;

    #[test]
    fn probe_roundtrip() {
        let msg = LanMessage::Probe {
            protocol_version: PROTOCOL_VERSION,
            namespace: "hws-project25".into(),
            peer: PeerIdentity::new("browser"),
        };
        let bytes = encode_message(&msg, 1024).unwrap();
        match decode_message(&bytes, 1024).unwrap() {
            LanMessage::Probe {
                protocol_version,
                namespace,
                ..
            } => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(namespace, "hws-project25");
            }
            other => panic!("expected Probe, got {:?}", other),
        }
    }

    #[test]
    fn data_payload_is_byte_identical() {
        let payload: Vec<u8> = (0..200u8).collect();
        let bytes = encode_message(&LanMessage::Data { payload: payload.clone() }, 4096).unwrap();
        match decode_message(&bytes, 4096).unwrap() {
            LanMessage::Data { payload: got } => assert_eq!(got, payload),
            other => panic!("expected Data, got {:?}", other),
        }
    }

    #[test]
    fn oversize_rejected_both_ways() {
        let msg = LanMessage::Data {
            payload: vec![0u8; 1024],
        };
        assert!(matches!(
            encode_message(&msg, 16),
            Err(FrameEncodeError::TooLarge)
        ));
        let bytes = encode_message(&msg, 4096).unwrap();
        assert!(matches!(
            decode_message(&bytes, 16),
            Err(FrameDecodeError::TooLarge)
        ));
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(
            decode_message(&[0xff; 40], 1024),
            Err(FrameDecodeError::Decode(_))
        ));
    }
}
