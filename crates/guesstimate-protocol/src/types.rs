//! Identity and framing types.
//!
//! Every frame on the socket is an [`Envelope`]. Its [`Payload`] says what
//! kind of frame it is: connection plumbing ([`SystemMessage`]), a player
//! request, the reply to that request, or a room event pushed by the
//! server.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Action, Response, RoomEvent};

/// Protocol version expected in the client's `Hello`.
pub const PROTOCOL_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A player's identity, assigned by the server per connection.
///
/// A reconnecting browser gets a fresh connection and therefore a fresh
/// `PlayerId`; identities are never reused within a process.
///
/// Serialized as a bare number (`42`), displayed as `P-42`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u64);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P-{}", self.0)
    }
}

/// A room code. Players type this in to join a friend's room, so it is
/// short: five decimal digits.
///
/// Serialized as a bare number and displayed without a prefix, because the
/// displayed form is what players read out to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u32);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Recipient
// ---------------------------------------------------------------------------

/// Who a room event is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Everyone currently in the room.
    All,
    /// One player.
    Player(PlayerId),
    /// Everyone but one player, e.g. "P-3 is ready" is not echoed to P-3.
    AllExcept(PlayerId),
}

// ---------------------------------------------------------------------------
// SystemMessage
// ---------------------------------------------------------------------------

/// Connection plumbing, independent of any room.
///
/// Internally tagged: `{ "type": "Hello", "version": 1 }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SystemMessage {
    /// Client → Server, first frame on a new connection.
    Hello { version: u32 },

    /// Server → Client: the connection is accepted and this is the
    /// identity the other players will see in `peer_id` fields.
    Welcome {
        player_id: PlayerId,
        protocol_version: u32,
        server_time: u64,
    },

    /// Client → Server: keep-alive. Any frame resets the idle timer;
    /// this one also gets an answer.
    Heartbeat { client_time: u64 },

    /// Server → Client: echoes `client_time` so the client can measure
    /// round-trip time against `server_time`.
    HeartbeatAck { client_time: u64, server_time: u64 },

    /// Either direction: the sender is closing the connection.
    Goodbye { reason: String },

    /// Server → Client: a connection-level failure (bad handshake,
    /// unreadable frame). HTTP-style codes.
    Error { code: u16, message: String },
}

// ---------------------------------------------------------------------------
// Payload / Envelope
// ---------------------------------------------------------------------------

/// What an envelope carries.
///
/// Adjacently tagged: `{ "type": "Request", "data": { ... } }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    /// Connection plumbing.
    System(SystemMessage),

    /// Client → Server: a player action. `request_id` is chosen by the
    /// client and echoed back in the matching `Reply`.
    Request { request_id: u64, action: Action },

    /// Server → Client: the outcome of a request.
    Reply { request_id: u64, response: Response },

    /// Server → Client: something happened in the player's room.
    Event(RoomEvent),
}

/// The outer frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-connection, per-direction sequence number.
    pub seq: u64,
    /// Milliseconds since the server started (server frames) or since the
    /// client connected (client frames). Informational only.
    pub timestamp: u64,
    pub payload: Payload,
}
