use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{info, trace, warn};

use parley_db::Database;
use parley_types::events::{ClientEvent, ErrorCode, ServerEvent};
use parley_types::models::{ChatId, Room, SessionId};

use crate::auth::{self, AuthError, Identity};
use crate::dispatcher::{Dispatcher, Exclude, Session};
use crate::error::GatewayError;
use crate::signaling::{self, CallKind};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Everything a gateway connection needs.
#[derive(Clone)]
pub struct GatewayContext {
    pub dispatcher: Dispatcher,
    pub db: Arc<Database>,
    pub jwt_secret: Arc<str>,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// `GET /gateway`: verify the token before upgrading, so a bad credential is
/// a plain 401 instead of a socket that closes immediately.
pub async fn ws_upgrade(
    State(ctx): State<GatewayContext>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = auth::bearer_token(&headers).or(query.token.as_deref());
    let identity = match token
        .ok_or(AuthError::Missing)
        .and_then(|token| auth::verify_token(&ctx.jwt_secret, token))
    {
        Ok(identity) => identity,
        Err(e) => {
            warn!("Gateway upgrade rejected: {}", e);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| async move {
        let session = ctx.dispatcher.register(identity).await;
        handle_connection(socket, ctx, session).await;
    })
}

/// Drive one authenticated WebSocket connection until either side goes away.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext, session: Session) {
    let (mut sender, mut receiver) = socket.split();
    let Session {
        id: session_id,
        identity,
        events: mut session_rx,
    } = session;

    info!(
        "{} ({}) connected to gateway as session {}",
        identity.username, identity.user_id, session_id
    );

    let ready = ServerEvent::Ready {
        session_id,
        user_id: identity.user_id,
    };
    if send_event(&mut sender, &ready).await.is_err() {
        signaling::drop_session(&ctx.dispatcher, session_id).await;
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Session queue -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = session_rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Client -> handlers
    let recv_ctx = ctx.clone();
    let recv_identity = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        if let Err(e) = handle_event(&recv_ctx, session_id, &recv_identity, event).await {
                            warn!("{} ({}) event rejected: {}", recv_identity.username, recv_identity.user_id, e);
                            recv_ctx.dispatcher.send_to_session(session_id, e.to_event()).await;
                        }
                    }
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!(
                            "{} ({}) bad event: {} -- raw: {}",
                            recv_identity.username, recv_identity.user_id, e, raw
                        );
                        let rejection = ServerEvent::Error {
                            code: ErrorCode::Validation,
                            message: format!("malformed event: {}", e),
                        };
                        recv_ctx.dispatcher.send_to_session(session_id, rejection).await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    signaling::drop_session(&ctx.dispatcher, session_id).await;
    info!("{} ({}) disconnected from gateway", identity.username, identity.user_id);
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode {}: {}", event.name(), e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

/// Apply one client event on behalf of an authenticated session.
///
/// Every identity field on outgoing events comes from the session, never from
/// the client payload.
pub async fn handle_event(
    ctx: &GatewayContext,
    session_id: SessionId,
    identity: &Identity,
    event: ClientEvent,
) -> Result<(), GatewayError> {
    let dispatcher = &ctx.dispatcher;
    trace!("Session {} event {:?}", session_id, event);

    match event {
        ClientEvent::Join { chat_id } => {
            join_while_member(dispatcher, session_id, chat_id, move || {
                is_member(ctx, chat_id, identity)
            })
            .await?;
        }

        ClientEvent::Leave { chat_id } => {
            dispatcher.leave(session_id, &Room::Chat(chat_id)).await;
        }

        ClientEvent::Message { chat_id, message } => {
            let room = joined_chat(dispatcher, session_id, chat_id).await?;
            let event = ServerEvent::Message {
                chat_id,
                from: identity.user_id,
                message,
            };
            dispatcher.publish(&room, event, Exclude::Nobody).await;
        }

        ClientEvent::Typing { chat_id, is_typing } => {
            let room = joined_chat(dispatcher, session_id, chat_id).await?;
            let event = ServerEvent::Typing {
                chat_id,
                user_id: identity.user_id,
                is_typing,
            };
            dispatcher.publish(&room, event, Exclude::User(identity.user_id)).await;
        }

        ClientEvent::Status {
            chat_id,
            message_id,
            status,
        } => {
            let room = joined_chat(dispatcher, session_id, chat_id).await?;
            let event = ServerEvent::Status {
                chat_id,
                message_id,
                user_id: identity.user_id,
                status,
            };
            dispatcher.publish(&room, event, Exclude::Nobody).await;
        }

        ClientEvent::CallJoin { room_id } => {
            signaling::join_call(dispatcher, session_id, CallKind::Call, &room_id).await?;
        }

        ClientEvent::CallLeave { room_id } => {
            signaling::leave_call(dispatcher, session_id, CallKind::Call, &room_id).await?;
        }

        ClientEvent::CallOffer { room_id, payload, to } => {
            let room = CallKind::Call.room(&room_id);
            let event = ServerEvent::CallOffer {
                room_id,
                payload,
                from: session_id,
                from_user_id: identity.user_id,
                to,
            };
            signaling::relay_to_target(dispatcher, session_id, &room, Some(to), event).await?;
        }

        ClientEvent::CallAnswer { room_id, payload, to } => {
            let room = CallKind::Call.room(&room_id);
            let event = ServerEvent::CallAnswer {
                room_id,
                payload,
                from: session_id,
                from_user_id: identity.user_id,
                to,
            };
            signaling::relay_to_target(dispatcher, session_id, &room, Some(to), event).await?;
        }

        ClientEvent::CallIceCandidate { room_id, payload, to } => {
            let room = CallKind::Call.room(&room_id);
            let event = ServerEvent::CallIceCandidate {
                room_id,
                payload,
                from: session_id,
                from_user_id: identity.user_id,
                to,
            };
            signaling::relay_to_target(dispatcher, session_id, &room, Some(to), event).await?;
        }

        ClientEvent::VideoJoin { room_id } => {
            signaling::join_call(dispatcher, session_id, CallKind::Video, &room_id).await?;
        }

        ClientEvent::VideoLeave { room_id } => {
            signaling::leave_call(dispatcher, session_id, CallKind::Video, &room_id).await?;
        }

        ClientEvent::ScreenShareStart { room_id } => {
            let room = joined_room(dispatcher, session_id, CallKind::Video.room(&room_id)).await?;
            let event = ServerEvent::ScreenShareStart {
                room_id,
                user_id: identity.user_id,
                session_id,
            };
            dispatcher.publish(&room, event, Exclude::Session(session_id)).await;
        }

        ClientEvent::ScreenShareStop { room_id } => {
            let room = joined_room(dispatcher, session_id, CallKind::Video.room(&room_id)).await?;
            let event = ServerEvent::ScreenShareStop {
                room_id,
                user_id: identity.user_id,
                session_id,
            };
            dispatcher.publish(&room, event, Exclude::Session(session_id)).await;
        }

        ClientEvent::VideoSignal { room_id, signal, to } => {
            let room = CallKind::Video.room(&room_id);
            let event = ServerEvent::VideoSignal {
                room_id,
                signal,
                from: session_id,
                from_user_id: identity.user_id,
                to,
            };
            signaling::relay_to_target(dispatcher, session_id, &room, to, event).await?;
        }
    }

    Ok(())
}

async fn is_member(ctx: &GatewayContext, chat_id: ChatId, identity: &Identity) -> Result<bool, GatewayError> {
    let db = ctx.db.clone();
    let user_id = identity.user_id;
    let member = tokio::task::spawn_blocking(move || db.is_member(chat_id, user_id))
        .await
        .map_err(|e| anyhow::anyhow!("membership lookup panicked: {}", e))??;
    Ok(member)
}

/// Join a chat room, checking membership before and after the join.
///
/// Eviction on removal only reaches sessions already in the room, so a
/// removal that commits between the first check and the join is caught by the
/// second one.
async fn join_while_member<F, Fut>(
    dispatcher: &Dispatcher,
    session_id: SessionId,
    chat_id: ChatId,
    mut still_member: F,
) -> Result<(), GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, GatewayError>>,
{
    if !still_member().await? {
        return Err(GatewayError::NotMember(chat_id));
    }

    let room = Room::Chat(chat_id);
    dispatcher.join(session_id, room.clone()).await;

    match still_member().await {
        Ok(true) => Ok(()),
        Ok(false) => {
            dispatcher.leave(session_id, &room).await;
            Err(GatewayError::NotMember(chat_id))
        }
        Err(e) => {
            dispatcher.leave(session_id, &room).await;
            Err(e)
        }
    }
}

async fn joined_chat(dispatcher: &Dispatcher, session_id: SessionId, chat_id: ChatId) -> Result<Room, GatewayError> {
    joined_room(dispatcher, session_id, Room::Chat(chat_id)).await
}

async fn joined_room(dispatcher: &Dispatcher, session_id: SessionId, room: Room) -> Result<Room, GatewayError> {
    if dispatcher.is_joined(session_id, &room).await {
        Ok(room)
    } else {
        Err(GatewayError::NotInRoom(room.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use chrono::Utc;
    use parley_types::models::ChatKind;
    use serde_json::json;
    use uuid::Uuid;

    struct Harness {
        ctx: GatewayContext,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                ctx: GatewayContext {
                    dispatcher: Dispatcher::new(),
                    db: Arc::new(Database::open_in_memory().unwrap()),
                    jwt_secret: Arc::from("test-secret"),
                },
            }
        }

        async fn session(&self, name: &str) -> Session {
            self.ctx
                .dispatcher
                .register(Identity {
                    user_id: Uuid::new_v4(),
                    username: name.into(),
                })
                .await
        }

        fn chat_with(&self, members: &[&Session]) -> ChatId {
            let ids: Vec<_> = members.iter().map(|s| s.identity.user_id).collect();
            self.ctx
                .db
                .create_chat(ChatKind::Group, Some("team"), ids[0], &ids[1..], Utc::now())
                .unwrap()
                .id
        }

        async fn send(&self, session: &Session, event: ClientEvent) -> Result<(), GatewayError> {
            handle_event(&self.ctx, session.id, &session.identity, event).await
        }
    }

    #[tokio::test]
    async fn join_requires_chat_membership() {
        let h = Harness::new();
        let member = h.session("member").await;
        let stranger = h.session("stranger").await;
        let chat_id = h.chat_with(&[&member]);

        h.send(&member, ClientEvent::Join { chat_id }).await.unwrap();
        assert!(h.ctx.dispatcher.is_joined(member.id, &Room::Chat(chat_id)).await);

        let err = h.send(&stranger, ClientEvent::Join { chat_id }).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotMember(id) if id == chat_id));
        assert!(!h.ctx.dispatcher.is_joined(stranger.id, &Room::Chat(chat_id)).await);
    }

    #[tokio::test]
    async fn removal_landing_mid_join_leaves_session_outside() {
        let h = Harness::new();
        let owner = h.session("owner").await;
        let leaving = h.session("leaving").await;
        let chat_id = h.chat_with(&[&owner, &leaving]);
        let room = Room::Chat(chat_id);
        let user_id = leaving.identity.user_id;
        let checks = AtomicUsize::new(0);

        let err = join_while_member(&h.ctx.dispatcher, leaving.id, chat_id, || {
            let db = h.ctx.db.clone();
            let dispatcher = h.ctx.dispatcher.clone();
            let room = room.clone();
            let first = checks.fetch_add(1, Ordering::SeqCst) == 0;
            async move {
                let member = db.is_member(chat_id, user_id)?;
                if first {
                    // the removal commits and evicts before the join lands
                    db.remove_member(chat_id, user_id)?;
                    dispatcher.leave_user(user_id, &room).await;
                }
                Ok::<_, GatewayError>(member)
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, GatewayError::NotMember(id) if id == chat_id));
        assert_eq!(checks.load(Ordering::SeqCst), 2);
        assert!(!h.ctx.dispatcher.is_joined(leaving.id, &room).await);
    }

    #[tokio::test]
    async fn message_fanout_stamps_sender_identity() {
        let h = Harness::new();
        let mut a = h.session("a").await;
        let mut b = h.session("b").await;
        let chat_id = h.chat_with(&[&a, &b]);
        h.send(&a, ClientEvent::Join { chat_id }).await.unwrap();
        h.send(&b, ClientEvent::Join { chat_id }).await.unwrap();

        h.send(
            &a,
            ClientEvent::Message {
                chat_id,
                message: json!({ "ciphertext": "..." }),
            },
        )
        .await
        .unwrap();

        let sender = a.identity.user_id;
        for session in [&mut a, &mut b] {
            match session.events.try_recv().unwrap() {
                ServerEvent::Message { from, chat_id: c, .. } => {
                    assert_eq!(c, chat_id);
                    assert_eq!(from, sender);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn typing_skips_every_session_of_the_typist() {
        let h = Harness::new();
        let typist = Identity {
            user_id: Uuid::new_v4(),
            username: "typist".into(),
        };
        let mut phone = h.ctx.dispatcher.register(typist.clone()).await;
        let mut laptop = h.ctx.dispatcher.register(typist.clone()).await;
        let mut other = h.session("other").await;
        let chat_id = h.chat_with(&[&phone, &other]);
        for s in [&phone, &laptop, &other] {
            h.send(s, ClientEvent::Join { chat_id }).await.unwrap();
        }

        h.send(&phone, ClientEvent::Typing { chat_id, is_typing: true })
            .await
            .unwrap();

        assert!(phone.events.try_recv().is_err());
        assert!(laptop.events.try_recv().is_err());
        assert!(matches!(
            other.events.try_recv().unwrap(),
            ServerEvent::Typing { user_id, is_typing: true, .. } if user_id == typist.user_id
        ));
    }

    #[tokio::test]
    async fn chat_events_require_a_joined_room() {
        let h = Harness::new();
        let a = h.session("a").await;
        let chat_id = h.chat_with(&[&a]);

        let err = h
            .send(&a, ClientEvent::Typing { chat_id, is_typing: true })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::NotInRoom(_)));
        assert_eq!(err.code(), ErrorCode::Authorization);
    }

    #[tokio::test]
    async fn call_offer_is_relayed_with_session_identity() {
        let h = Harness::new();
        let a = h.session("a").await;
        let mut b = h.session("b").await;
        let mut c = h.session("c").await;
        for s in [&a, &b, &c] {
            h.send(s, ClientEvent::CallJoin { room_id: "9".into() }).await.unwrap();
        }
        while b.events.try_recv().is_ok() {}
        while c.events.try_recv().is_ok() {}

        h.send(
            &a,
            ClientEvent::CallOffer {
                room_id: "9".into(),
                payload: json!({ "sdp": "v=0" }),
                to: b.id,
            },
        )
        .await
        .unwrap();

        match b.events.try_recv().unwrap() {
            ServerEvent::CallOffer { from, from_user_id, to, .. } => {
                assert_eq!(from, a.id);
                assert_eq!(from_user_id, a.identity.user_id);
                assert_eq!(to, b.id);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(c.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn screen_share_notifies_other_participants() {
        let h = Harness::new();
        let mut a = h.session("a").await;
        let mut b = h.session("b").await;
        h.send(&a, ClientEvent::VideoJoin { room_id: "v".into() }).await.unwrap();
        h.send(&b, ClientEvent::VideoJoin { room_id: "v".into() }).await.unwrap();
        while a.events.try_recv().is_ok() {}

        h.send(&a, ClientEvent::ScreenShareStart { room_id: "v".into() })
            .await
            .unwrap();
        assert!(a.events.try_recv().is_err());
        assert!(matches!(b.events.try_recv().unwrap(), ServerEvent::VideoUserJoined { .. }));
        assert!(matches!(
            b.events.try_recv().unwrap(),
            ServerEvent::ScreenShareStart { session_id, .. } if session_id == a.id
        ));
    }
}
