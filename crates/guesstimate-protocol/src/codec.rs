//! Codec trait and the JSON implementation.
//!
//! Browsers talk JSON, so [`JsonCodec`] is the only codec shipped today.
//! The server is generic over [`Codec`] so a binary format can be dropped
//! in without touching the handler.

use serde::{de::DeserializeOwned, Serialize};

use crate::ProtocolError;

/// Converts protocol messages to bytes and back.
///
/// Implementations must be shareable across connection tasks, hence
/// `Send + Sync + 'static`.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a value into a frame.
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Parses a frame into an owned value.
    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError>;
}

/// A [`Codec`] backed by `serde_json`.
///
/// ```rust
/// use guesstimate_protocol::{Codec, Envelope, JsonCodec, Payload, SystemMessage};
///
/// let codec = JsonCodec;
/// let hello = Envelope {
///     seq: 0,
///     timestamp: 0,
///     payload: Payload::System(SystemMessage::Hello { version: 1 }),
/// };
///
/// let bytes = codec.encode(&hello).unwrap();
/// let decoded: Envelope = codec.decode(&bytes).unwrap();
/// assert_eq!(hello, decoded);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode<T: Serialize>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        data: &[u8],
    ) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{Action, Envelope, Payload};

    #[test]
    fn test_json_codec_decodes_browser_request() {
        // Shape a browser client produces by hand.
        let raw = br#"{
            "seq": 3,
            "timestamp": 0,
            "payload": {
                "type": "Request",
                "data": {
                    "request_id": 9,
                    "action": { "action": "submit-answer", "value": "42.5" }
                }
            }
        }"#;

        let envelope: Envelope = JsonCodec.decode(raw).unwrap();

        match envelope.payload {
            Payload::Request { request_id, action } => {
                assert_eq!(request_id, 9);
                assert_eq!(
                    action,
                    Action::SubmitAnswer {
                        value: "42.5".into()
                    }
                );
            }
            other => panic!("expected a request, got {other:?}"),
        }
    }

    #[test]
    fn test_json_codec_rejects_garbage() {
        let result: Result<Envelope, _> = JsonCodec.decode(b"not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }
}
