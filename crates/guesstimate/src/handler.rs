//! Per-connection handler: handshake and request routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive Hello → validate version → send Welcome
//!   2. Loop: answer each request with exactly one Reply, and forward the
//!      events of the player's room as they arrive. Any frame, pings
//!      included, pushes back the idle deadline
//!   3. On exit, leave whatever room the player is in

use std::sync::Arc;

use guesstimate_protocol::{
    Action, Codec, Envelope, Payload, PlayerId, ProtocolError, Response,
    ResponseData, RoomEvent, RoomId, SystemMessage, PROTOCOL_VERSION,
};
use guesstimate_room::{PlayerSender, RoomError, RoomRequest};
use guesstimate_transport::{
    ConnectionReader, ConnectionWriter, Incoming, WebSocketConnection,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::server::ServerState;
use crate::GuesstimateError;

/// The per-connection record every handler call works against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Session {
    player_id: PlayerId,
    /// The room this connection sits in, kept in step with the manager.
    room_id: Option<RoomId>,
}

impl Session {
    fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            room_id: None,
        }
    }
}

/// Drop guard that takes the player out of their room when the handler
/// exits, however it exits.
///
/// Since `Drop` is synchronous, we spawn a fire-and-forget task for the
/// async lock.
struct SessionGuard<C: Codec> {
    session: Session,
    state: Arc<ServerState<C>>,
}

impl<C: Codec> Drop for SessionGuard<C> {
    fn drop(&mut self) {
        let Some(room_id) = self.session.room_id.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let player_id = self.session.player_id;
        let state = Arc::clone(&self.state);
        runtime.spawn(async move {
            let mut rooms = state.rooms.lock().await;
            match rooms.leave_room(player_id).await {
                Ok(outcome) => {
                    tracing::debug!(%player_id, %room_id, ?outcome, "left room on disconnect");
                }
                Err(RoomError::NotInRoom(_)) => {}
                Err(e) => {
                    tracing::warn!(%player_id, %room_id, error = %e, "leave on disconnect failed");
                }
            }
        });
    }
}

/// Frame writer with this connection's sequence counter.
struct Outbound<'a, C> {
    writer: ConnectionWriter,
    codec: &'a C,
    seq: u64,
    started: Instant,
}

impl<C: Codec> Outbound<'_, C> {
    fn now(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn send(&mut self, payload: Payload) -> Result<(), GuesstimateError> {
        let envelope = Envelope {
            seq: self.seq,
            timestamp: self.now(),
            payload,
        };
        self.seq += 1;
        let bytes = self.codec.encode(&envelope)?;
        self.writer.send(bytes)?;
        Ok(())
    }

    fn reply(&mut self, request_id: u64, response: Response) -> Result<(), GuesstimateError> {
        self.send(Payload::Reply {
            request_id,
            response,
        })
    }

    fn error(&mut self, code: u16, message: impl Into<String>) -> Result<(), GuesstimateError> {
        self.send(Payload::System(SystemMessage::Error {
            code,
            message: message.into(),
        }))
    }
}

/// Whether the message loop keeps going.
enum Flow {
    Continue,
    Close,
}

/// Handles a single connection from upgrade to close.
pub(crate) async fn handle_connection<C: Codec>(
    conn: WebSocketConnection,
    state: Arc<ServerState<C>>,
) -> Result<(), GuesstimateError> {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, "handling new connection");

    let (mut reader, writer) = conn.split();
    let mut out = Outbound {
        writer,
        codec: &state.codec,
        seq: 0,
        started: state.started,
    };

    // --- Step 1: Handshake ---
    let player_id = match perform_handshake(&mut reader, &mut out, &state).await {
        Ok(player_id) => player_id,
        Err(e) => {
            let _ = out.writer.close();
            return Err(e);
        }
    };
    tracing::info!(%conn_id, %player_id, "player connected");

    let mut guard = SessionGuard {
        session: Session::new(player_id),
        state: Arc::clone(&state),
    };

    // --- Step 2: Message loop ---
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<RoomEvent>();
    let idle = tokio::time::sleep(state.idle_timeout);
    tokio::pin!(idle);

    let result = loop {
        tokio::select! {
            frame = reader.next_frame() => {
                let data = match frame {
                    Ok(Some(Incoming::Data(data))) => data,
                    Ok(Some(Incoming::Control)) => {
                        idle.as_mut().reset(Instant::now() + state.idle_timeout);
                        continue;
                    }
                    Ok(None) => {
                        tracing::info!(%player_id, "connection closed cleanly");
                        break Ok(());
                    }
                    Err(e) => {
                        tracing::debug!(%player_id, error = %e, "recv error");
                        break Ok(());
                    }
                };
                idle.as_mut().reset(Instant::now() + state.idle_timeout);

                match handle_frame(&state, &mut guard.session, &events_tx, &mut out, &data).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Close) => break Ok(()),
                    Err(e) => break Err(e),
                }
            }
            Some(event) = events_rx.recv() => {
                if let Err(e) = out.send(Payload::Event(event)) {
                    break Err(e);
                }
            }
            () = &mut idle => {
                tracing::info!(%player_id, "connection idle, closing");
                break Ok(());
            }
        }
    };

    let _ = out.writer.close();
    // guard drops here → the player leaves their room.
    result
}

/// Receives `Hello`, checks the version, and answers `Welcome`.
///
/// The player's identity is the transport's connection ID.
async fn perform_handshake<C: Codec>(
    reader: &mut ConnectionReader,
    out: &mut Outbound<'_, C>,
    state: &Arc<ServerState<C>>,
) -> Result<PlayerId, GuesstimateError> {
    let data = match tokio::time::timeout(state.handshake_timeout, reader.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before handshake".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("handshake timed out".into()).into());
        }
    };

    let hello = state
        .codec
        .decode::<Envelope>(&data)
        .ok()
        .and_then(|envelope| match envelope.payload {
            Payload::System(SystemMessage::Hello { version }) => Some(version),
            _ => None,
        });
    let Some(version) = hello else {
        out.error(400, "expected Hello")?;
        return Err(ProtocolError::InvalidMessage("first message must be Hello".into()).into());
    };

    if version != PROTOCOL_VERSION {
        out.error(
            400,
            format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}"),
        )?;
        return Err(ProtocolError::InvalidMessage("protocol version mismatch".into()).into());
    }

    let player_id = PlayerId(reader.id().into_inner());
    let server_time = out.now();
    out.send(Payload::System(SystemMessage::Welcome {
        player_id,
        protocol_version: PROTOCOL_VERSION,
        server_time,
    }))?;

    Ok(player_id)
}

/// Decodes one frame and acts on it.
async fn handle_frame<C: Codec>(
    state: &Arc<ServerState<C>>,
    session: &mut Session,
    events: &PlayerSender,
    out: &mut Outbound<'_, C>,
    data: &[u8],
) -> Result<Flow, GuesstimateError> {
    let player_id = session.player_id;
    let envelope: Envelope = match state.codec.decode(data) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(%player_id, error = %e, "failed to decode envelope");
            out.reply(0, Response::failure(format!("unreadable message: {e}")))?;
            return Ok(Flow::Continue);
        }
    };

    match envelope.payload {
        Payload::Request { request_id, action } => {
            let response = handle_action(state, session, events, action).await;
            out.reply(request_id, response)?;
        }
        Payload::System(SystemMessage::Goodbye { reason }) => {
            tracing::info!(%player_id, %reason, "client said goodbye");
            return Ok(Flow::Close);
        }
        Payload::System(SystemMessage::Heartbeat { client_time }) => {
            let server_time = out.now();
            out.send(Payload::System(SystemMessage::HeartbeatAck {
                client_time,
                server_time,
            }))?;
        }
        Payload::System(SystemMessage::Hello { .. }) => {
            out.error(400, "already connected")?;
        }
        _ => {
            tracing::debug!(%player_id, "ignoring unexpected payload");
        }
    }

    Ok(Flow::Continue)
}

/// Runs one player action and builds its reply.
///
/// Room membership changes go through the manager under its lock and are
/// mirrored into the session. Every other action only looks up the room
/// handle under the lock and then talks to the room without it, so one
/// busy room never blocks the rest.
async fn handle_action<C: Codec>(
    state: &Arc<ServerState<C>>,
    session: &mut Session,
    events: &PlayerSender,
    action: Action,
) -> Response {
    let player_id = session.player_id;
    let name = action.name();

    let result: Result<Option<ResponseData>, RoomError> = match action {
        Action::CreateRoom { display_name } => state
            .rooms
            .lock()
            .await
            .create_room(player_id, &display_name, events.clone())
            .await
            .map(|room_id| {
                session.room_id = Some(room_id);
                Some(ResponseData::Room { room_id })
            }),

        Action::JoinRoom {
            room_id,
            display_name,
        } => state
            .rooms
            .lock()
            .await
            .join_room(player_id, room_id, &display_name, events.clone())
            .await
            .map(|()| {
                session.room_id = Some(room_id);
                Some(ResponseData::Room { room_id })
            }),

        Action::LeaveRoom => {
            let left = state.rooms.lock().await.leave_room(player_id).await;
            // The manager forgets the player whatever the outcome.
            session.room_id = None;
            left.map(|_| None)
        }

        in_room => match room_request(in_room) {
            Some(request) => {
                let handle = state.rooms.lock().await.handle_for(player_id);
                match handle {
                    Ok(handle) => handle.request(player_id, request).await,
                    Err(e) => Err(e),
                }
            }
            None => Ok(None),
        },
    };

    match result {
        Ok(Some(data)) => Response::with_data(data),
        Ok(None) => Response::ok(),
        Err(e) => {
            tracing::debug!(
                %player_id,
                room_id = ?session.room_id,
                action = name,
                kind = ?e.kind(),
                error = %e,
                "action rejected"
            );
            Response::failure(e.to_string())
        }
    }
}

/// Maps an in-room action onto the room actor's request type. Membership
/// actions have no room request.
fn room_request(action: Action) -> Option<RoomRequest> {
    let request = match action {
        Action::PlayerReady => RoomRequest::Ready,
        Action::GetQuestion => RoomRequest::Question,
        Action::SubmitAnswer { value } => RoomRequest::SubmitAnswer(value),
        Action::BeginVoting => RoomRequest::BeginVoting,
        Action::ConfirmWagers {
            wagers,
            declared_remaining_tokens,
        } => RoomRequest::ConfirmWagers {
            wagers,
            declared_remaining_tokens,
        },
        Action::GetVotingResults => RoomRequest::VotingResults,
        Action::GetPlayerRankings => RoomRequest::Rankings,
        Action::CreateRoom { .. } | Action::JoinRoom { .. } | Action::LeaveRoom => {
            return None;
        }
    };
    Some(request)
}

#[cfg(test)]
mod tests {
    use guesstimate_protocol::WagerRequest;

    use super::*;

    #[test]
    fn test_room_request_maps_in_room_actions() {
        assert_eq!(room_request(Action::PlayerReady), Some(RoomRequest::Ready));
        assert_eq!(
            room_request(Action::SubmitAnswer { value: "42".into() }),
            Some(RoomRequest::SubmitAnswer("42".into()))
        );
        assert_eq!(
            room_request(Action::ConfirmWagers {
                wagers: vec![WagerRequest {
                    target_id: PlayerId(2),
                    stake: 10,
                }],
                declared_remaining_tokens: 90,
            }),
            Some(RoomRequest::ConfirmWagers {
                wagers: vec![WagerRequest {
                    target_id: PlayerId(2),
                    stake: 10,
                }],
                declared_remaining_tokens: 90,
            })
        );
    }

    #[test]
    fn test_room_request_skips_membership_actions() {
        assert_eq!(room_request(Action::LeaveRoom), None);
        assert_eq!(
            room_request(Action::JoinRoom {
                room_id: RoomId(12345),
                display_name: "Ana".into(),
            }),
            None
        );
    }

    #[test]
    fn test_room_request_keeps_action_names() {
        for action in [
            Action::PlayerReady,
            Action::GetQuestion,
            Action::BeginVoting,
            Action::GetVotingResults,
            Action::GetPlayerRankings,
        ] {
            let name = action.name();
            assert_eq!(room_request(action).unwrap().name(), name);
        }
    }
}
