//! Error types for the protocol layer.

/// Errors that can occur while turning frames into messages and back.
///
/// A `ProtocolError` always means the bytes were wrong, never that the
/// game refused something. Game refusals travel inside a
/// [`Response`](crate::Response) with `success: false`.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing a message failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// The frame was not valid JSON, or did not match any known message.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame decoded fine but broke a protocol rule, e.g. a request
    /// sent before the `Hello` handshake.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
