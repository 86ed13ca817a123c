/// WebSocket handler for realtime room sessions.
/// Binds connections to rooms, fans messages out and announces presence.
use crate::error::RoomError;
use crate::events::{ChatMessage, ClientEvent, ErrorReason, FileInfo, ServerEvent};
use crate::handlers::ServerConfig;
use crate::rooms::{normalize_room_code, RoomService};
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use chrono::Utc;
use rand::seq::IndexedRandom;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;

const NAME_ADJECTIVES: &[&str] = &[
    "Swift", "Quiet", "Brave", "Clever", "Gentle", "Lucky", "Mellow", "Nimble", "Sunny", "Witty",
];
const NAME_NOUNS: &[&str] = &[
    "Otter", "Falcon", "Badger", "Heron", "Lynx", "Panda", "Robin", "Tiger", "Walrus", "Fox",
];

/// Random `<Adjective><Noun><0-999>` name for sessions that bind without one
pub fn random_display_name() -> String {
    let mut rng = rand::rng();
    let adjective = NAME_ADJECTIVES.choose(&mut rng).copied().unwrap_or("Anonymous");
    let noun = NAME_NOUNS.choose(&mut rng).copied().unwrap_or("Guest");
    format!("{}{}{}", adjective, noun, rng.random_range(0..1000))
}

/// The room a session is bound to
#[derive(Debug, Clone)]
pub struct Binding {
    pub room_code: String,
    pub display_name: String,
}

struct Session {
    tx: UnboundedSender<String>,
    binding: Option<Binding>,
}

/// Session router state - tracks connections and the rooms they are bound to
pub struct SessionRouter {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    rooms: Arc<RwLock<HashMap<String, HashSet<String>>>>,
    room_service: Arc<RoomService>,
}

impl SessionRouter {
    pub fn new(room_service: Arc<RoomService>) -> Self {
        SessionRouter {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RwLock::new(HashMap::new())),
            room_service,
        }
    }

    /// Register an unbound connection
    pub async fn register(&self, session_id: String, tx: UnboundedSender<String>) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id, Session { tx, binding: None });
    }

    pub async fn binding(&self, session_id: &str) -> Option<Binding> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).and_then(|s| s.binding.clone())
    }

    /// Live connections bound to a room
    pub async fn member_count(&self, room_code: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room_code).map_or(0, HashSet::len)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn send_to(&self, session_id: &str, event: &ServerEvent) {
        let sessions = self.sessions.read().await;
        if let Some(session) = sessions.get(session_id) {
            let _ = session.tx.send(event.to_frame());
        }
    }

    /// Send an event to every session bound to a room, optionally skipping one
    pub async fn broadcast(&self, room_code: &str, event: &ServerEvent, except: Option<&str>) {
        let frame = event.to_frame();
        let sessions = self.sessions.read().await;
        let rooms = self.rooms.read().await;
        if let Some(members) = rooms.get(room_code) {
            for member in members {
                if Some(member.as_str()) == except {
                    continue;
                }
                if let Some(session) = sessions.get(member) {
                    // The recipient may already be gone
                    let _ = session.tx.send(frame.clone());
                }
            }
        }
    }

    /// Dispatch a parsed client frame. Failures are reported to the sender only.
    pub async fn handle_event(&self, session_id: &str, event: ClientEvent) {
        let result = match event {
            ClientEvent::JoinRoom {
                room_code,
                token,
                display_name,
            } => self
                .bind(session_id, &room_code, &token, &display_name)
                .await
                .map(|_| ()),
            ClientEvent::SendMessage {
                body,
                file_info,
                client_message_id,
            } => self
                .send_message(session_id, body, file_info, client_message_id)
                .await
                .map(|_| ()),
        };

        if let Err(reason) = result {
            self.send_to(session_id, &ServerEvent::error(reason)).await;
        }
    }

    /// Bind a connection to a room after authorizing its token
    pub async fn bind(
        &self,
        session_id: &str,
        room_code: &str,
        token: &str,
        display_name: &str,
    ) -> Result<Binding, ErrorReason> {
        if self.binding(session_id).await.is_some() {
            return Err(ErrorReason::AlreadyBound);
        }

        let room_code = normalize_room_code(room_code);
        let grant = self
            .room_service
            .authorize_session(&room_code, token)
            .await
            .map_err(|e| match e {
                RoomError::NotFound => ErrorReason::RoomNotFound,
                RoomError::InvalidToken => ErrorReason::InvalidToken,
                other => {
                    log::error!("Session authorization failed: {}", other);
                    ErrorReason::Internal
                }
            })?;

        let display_name = match display_name.trim() {
            "" => random_display_name(),
            name => name.to_string(),
        };
        let binding = Binding {
            room_code: grant.room_code.clone(),
            display_name: display_name.clone(),
        };

        let member_count = {
            let mut sessions = self.sessions.write().await;
            let mut rooms = self.rooms.write().await;

            let session = sessions
                .get_mut(session_id)
                .ok_or(ErrorReason::Internal)?;
            // A concurrent bind on the same connection may have won
            if session.binding.is_some() {
                return Err(ErrorReason::AlreadyBound);
            }
            session.binding = Some(binding.clone());

            let members = rooms.entry(grant.room_code.clone()).or_default();
            members.insert(session_id.to_string());
            members.len()
        };

        // The room may have been deleted and closed between authorization
        // and the insert above
        match self.room_service.auto_delete_policy(&grant.room_code).await {
            Ok(_) => {}
            Err(e) => {
                self.detach(session_id, &grant.room_code).await;
                return Err(match e {
                    RoomError::NotFound => ErrorReason::RoomNotFound,
                    other => {
                        log::error!("Failed to confirm room after bind: {}", other);
                        ErrorReason::Internal
                    }
                });
            }
        }

        log::info!(
            "{} joined room {} ({} connected{})",
            display_name,
            grant.room_code,
            member_count,
            if grant.is_owner { ", owner" } else { "" }
        );

        self.broadcast(
            &grant.room_code,
            &ServerEvent::UserJoined {
                display_name,
                member_count,
            },
            Some(session_id),
        )
        .await;

        Ok(binding)
    }

    /// Undo a bind without announcing it
    async fn detach(&self, session_id: &str, room_code: &str) {
        let mut sessions = self.sessions.write().await;
        let mut rooms = self.rooms.write().await;

        if let Some(session) = sessions.get_mut(session_id) {
            session.binding = None;
        }
        if let Some(members) = rooms.get_mut(room_code) {
            members.remove(session_id);
            if members.is_empty() {
                rooms.remove(room_code);
            }
        }
    }

    /// Stamp and fan out a message to the sender's room, sender included.
    /// Returns `None` when the session is unbound or the room vanished.
    pub async fn send_message(
        &self,
        session_id: &str,
        body: Option<String>,
        file_info: Option<FileInfo>,
        client_message_id: Option<String>,
    ) -> Result<Option<ChatMessage>, ErrorReason> {
        let Some(binding) = self.binding(session_id).await else {
            return Ok(None);
        };

        let auto_delete = match self
            .room_service
            .auto_delete_policy(&binding.room_code)
            .await
        {
            Ok(policy) => policy,
            Err(RoomError::NotFound) => {
                log::debug!("Dropping message for vanished room {}", binding.room_code);
                return Ok(None);
            }
            Err(e) => {
                log::error!("Failed to load room policy: {}", e);
                return Err(ErrorReason::Internal);
            }
        };

        let message = ChatMessage {
            id: client_message_id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            author: binding.display_name,
            body,
            file_info,
            timestamp: Utc::now().timestamp_millis(),
            auto_delete,
        };

        self.broadcast(
            &binding.room_code,
            &ServerEvent::NewMessage(message.clone()),
            None,
        )
        .await;

        Ok(Some(message))
    }

    /// Forget a connection and announce its departure. Membership is kept.
    pub async fn unregister(&self, session_id: &str) {
        let departed = {
            let mut sessions = self.sessions.write().await;
            let mut rooms = self.rooms.write().await;

            let binding = sessions.remove(session_id).and_then(|s| s.binding);
            binding.map(|binding| {
                let remaining = match rooms.get_mut(&binding.room_code) {
                    Some(members) => {
                        members.remove(session_id);
                        members.len()
                    }
                    None => 0,
                };
                if remaining == 0 {
                    rooms.remove(&binding.room_code);
                }
                (binding, remaining)
            })
        };

        if let Some((binding, member_count)) = departed {
            log::info!("{} left room {}", binding.display_name, binding.room_code);
            self.broadcast(
                &binding.room_code,
                &ServerEvent::UserLeft {
                    display_name: binding.display_name,
                    member_count,
                },
                None,
            )
            .await;
        }
    }

    /// Notify every session bound to a deleted room and unbind them.
    /// Returns how many sessions were notified.
    pub async fn close_room(&self, room_code: &str) -> usize {
        let frame = ServerEvent::RoomDeleted.to_frame();
        let mut sessions = self.sessions.write().await;
        let mut rooms = self.rooms.write().await;

        let Some(members) = rooms.remove(room_code) else {
            return 0;
        };

        for member in &members {
            if let Some(session) = sessions.get_mut(member) {
                let _ = session.tx.send(frame.clone());
                session.binding = None;
            }
        }

        log::info!("Room {} closed, {} sessions unbound", room_code, members.len());
        members.len()
    }
}

/// Handle one connection's client frames strictly in arrival order.
/// The session is unregistered once the returned sender is dropped and the
/// queue has drained.
pub fn spawn_dispatcher(
    router: web::Data<SessionRouter>,
    session_id: String,
) -> UnboundedSender<ClientEvent> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    actix::spawn(async move {
        while let Some(event) = rx.recv().await {
            router.handle_event(&session_id, event).await;
        }
        router.unregister(&session_id).await;
    });
    tx
}

/// WebSocket actor for individual client connections
pub struct WsActor {
    pub session_id: String,
    pub router: web::Data<SessionRouter>,
    outbox: Option<UnboundedReceiver<String>>,
    inbox: Option<UnboundedSender<ClientEvent>>,
}

impl Actor for WsActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        log::debug!("WebSocket connection started: {}", self.session_id);

        self.inbox = Some(spawn_dispatcher(
            self.router.clone(),
            self.session_id.clone(),
        ));

        if let Some(mut rx) = self.outbox.take() {
            let addr = ctx.address();
            tokio::spawn(async move {
                while let Some(frame) = rx.recv().await {
                    addr.do_send(OutgoingFrame(frame));
                }
            });
        }
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        log::debug!("WebSocket connection stopped: {}", self.session_id);
        // Closing the queue lets the dispatcher finish and unregister
        self.inbox = None;
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => {
                    if let Some(inbox) = &self.inbox {
                        let _ = inbox.send(event);
                    }
                }
                Err(e) => {
                    log::warn!("Failed to parse WebSocket frame: {}", e);
                    ctx.text(ServerEvent::error(ErrorReason::InvalidMessage).to_frame());
                }
            },
            Ok(ws::Message::Binary(_)) => {
                ctx.text(ServerEvent::error(ErrorReason::InvalidMessage).to_frame());
            }
            Ok(ws::Message::Ping(bytes)) => ctx.pong(&bytes),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                log::warn!("WebSocket error: {}", e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct OutgoingFrame(String);

impl Handler<OutgoingFrame> for WsActor {
    type Result = ();

    fn handle(&mut self, msg: OutgoingFrame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

/// WebSocket connection handler
/// GET /ws
pub async fn ws_connect(
    req: HttpRequest,
    stream: web::Payload,
    router: web::Data<SessionRouter>,
    config: web::Data<ServerConfig>,
) -> actix_web::Result<HttpResponse> {
    let session_id = uuid::Uuid::new_v4().to_string();

    // Registered before the actor starts so the first frame always finds it
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    router.register(session_id.clone(), tx).await;

    let actor = WsActor {
        session_id: session_id.clone(),
        router: router.clone(),
        outbox: Some(rx),
        inbox: None,
    };

    let response = ws::WsResponseBuilder::new(actor, &req, stream)
        .frame_size(config.max_frame_bytes)
        .start();

    if response.is_err() {
        // No actor will ever run for this session
        router.unregister(&session_id).await;
    }
    response
}
