/// Room session: one realtime connection bound to one room.
///
/// A single select loop consumes server events, expiry timer reports, the
/// periodic ledger sweep and user input. Leaving cancels every timer and
/// closes the socket; nothing for the room is processed afterwards.
use crate::error::Result;
use crate::expiry::{Expired, ExpiryScheduler};
use crate::ledger::{LedgerEntry, MessageLedger};
use crate::models::{CachedRoom, ClientEvent, FileInfo, ServerEvent};
use crate::storage::LocalStore;
use crate::websocket::RealtimeConnection;
use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{interval_at, Instant};

/// Backstop sweep period
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Requests from the user side of a session
#[derive(Debug, Clone)]
pub enum SessionInput {
    Send {
        body: Option<String>,
        file_info: Option<FileInfo>,
    },
    Leave,
}

/// What the session reports to the user side
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    UserJoined { display_name: String, member_count: usize },
    UserLeft { display_name: String, member_count: usize },
    Message(LedgerEntry),
    Expired { message_id: String },
    ServerError(String),
    RoomDeleted,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    Left,
    RoomDeleted,
    /// The server refused the bind, e.g. `room-not-found` or `invalid-token`
    Rejected(String),
    Disconnected,
}

fn instant_of(expires_at: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(expires_at)
        .single()
        .unwrap_or_else(Utc::now)
}

pub struct RoomSession<'a> {
    room: CachedRoom,
    connection: RealtimeConnection,
    ledger: &'a MessageLedger,
    store: &'a LocalStore,
    scheduler: ExpiryScheduler,
    expired_rx: UnboundedReceiver<Expired>,
    visible: Vec<LedgerEntry>,
    sweep_every: Duration,
}

impl<'a> RoomSession<'a> {
    /// Connect, bind to the room and restore the live part of its ledger
    pub async fn open(
        server_url: &str,
        room: CachedRoom,
        display_name: &str,
        ledger: &'a MessageLedger,
        store: &'a LocalStore,
    ) -> Result<RoomSession<'a>> {
        let connection = RealtimeConnection::connect(server_url).await?;
        connection.join_room(&room.room_code, &room.token, display_name)?;
        Self::attach(room, connection, ledger, store)
    }

    /// Take over a connection already bound to `room`
    fn attach(
        room: CachedRoom,
        connection: RealtimeConnection,
        ledger: &'a MessageLedger,
        store: &'a LocalStore,
    ) -> Result<RoomSession<'a>> {
        let (scheduler, expired_rx) = ExpiryScheduler::new();
        let mut session = RoomSession {
            room,
            connection,
            ledger,
            store,
            scheduler,
            expired_rx,
            visible: Vec::new(),
            sweep_every: SWEEP_INTERVAL,
        };

        session.visible = ledger.messages_at(&session.room.room_code, Utc::now())?;
        for entry in &session.visible {
            session.scheduler.schedule(
                &session.room.room_code,
                &entry.id,
                instant_of(entry.expires_at),
            );
        }

        log::info!(
            "Session opened for room {} ({} messages restored)",
            session.room.room_code,
            session.visible.len()
        );
        Ok(session)
    }

    /// Override the backstop sweep period
    pub fn with_sweep_interval(mut self, every: Duration) -> Self {
        self.sweep_every = every;
        self
    }

    pub fn room(&self) -> &CachedRoom {
        &self.room
    }

    /// Messages currently shown, in arrival order
    pub fn visible(&self) -> &[LedgerEntry] {
        &self.visible
    }

    /// Send a message; the server echo drives the ledger. Returns the message id.
    pub fn send(&self, body: Option<String>, file_info: Option<FileInfo>) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        self.connection.send(&ClientEvent::SendMessage {
            body,
            file_info,
            client_message_id: Some(id.clone()),
        })?;
        Ok(id)
    }

    /// Run until the user leaves, the room is deleted or the connection drops
    pub async fn run(
        &mut self,
        input: &mut UnboundedReceiver<SessionInput>,
        events: &UnboundedSender<SessionEvent>,
    ) -> Result<SessionEnd> {
        let mut sweep = interval_at(Instant::now() + self.sweep_every, self.sweep_every);

        loop {
            tokio::select! {
                event = self.connection.next_event() => match event? {
                    Some(event) => {
                        if let Some(end) = self.handle_server_event(event, events)? {
                            return Ok(end);
                        }
                    }
                    None => {
                        log::warn!("Connection to room {} closed", self.room.room_code);
                        self.scheduler.cancel_all();
                        return Ok(SessionEnd::Disconnected);
                    }
                },
                Some(expired) = self.expired_rx.recv() => {
                    self.handle_expired(expired, Utc::now(), events)?;
                }
                _ = sweep.tick() => {
                    self.handle_sweep(Utc::now(), events)?;
                }
                request = input.recv() => match request {
                    Some(SessionInput::Send { body, file_info }) => {
                        self.send(body, file_info)?;
                    }
                    Some(SessionInput::Leave) | None => {
                        self.leave();
                        return Ok(SessionEnd::Left);
                    }
                },
            }
        }
    }

    fn emit(events: &UnboundedSender<SessionEvent>, event: SessionEvent) {
        // The user side may already be gone
        let _ = events.send(event);
    }

    fn handle_server_event(
        &mut self,
        event: ServerEvent,
        events: &UnboundedSender<SessionEvent>,
    ) -> Result<Option<SessionEnd>> {
        match event {
            ServerEvent::UserJoined {
                display_name,
                member_count,
            } => Self::emit(
                events,
                SessionEvent::UserJoined {
                    display_name,
                    member_count,
                },
            ),
            ServerEvent::UserLeft {
                display_name,
                member_count,
            } => Self::emit(
                events,
                SessionEvent::UserLeft {
                    display_name,
                    member_count,
                },
            ),
            ServerEvent::NewMessage(message) => {
                let room_code = self.room.room_code.clone();
                if !self.ledger.record(&room_code, &message)? {
                    log::debug!("Duplicate message {} ignored", message.id);
                    return Ok(None);
                }

                let entry = LedgerEntry::from(&message);
                let now = Utc::now();
                if entry.is_alive_at(now) {
                    self.scheduler
                        .schedule(&room_code, &entry.id, instant_of(entry.expires_at));
                    self.visible.push(entry.clone());
                    Self::emit(events, SessionEvent::Message(entry));
                } else {
                    // Arrived already expired
                    self.ledger.expire(&room_code, &entry.id, now)?;
                }
            }
            ServerEvent::RoomDeleted => {
                log::info!("Room {} was deleted", self.room.room_code);
                self.scheduler.cancel_all();
                self.ledger.clear_room(&self.room.room_code)?;
                self.store.forget_room(&self.room.room_code)?;
                self.visible.clear();
                self.connection.close();
                Self::emit(events, SessionEvent::RoomDeleted);
                return Ok(Some(SessionEnd::RoomDeleted));
            }
            ServerEvent::Error { reason } => {
                log::warn!("Server reported: {}", reason);
                Self::emit(events, SessionEvent::ServerError(reason.clone()));
                if reason == "room-not-found" || reason == "invalid-token" {
                    self.leave();
                    return Ok(Some(SessionEnd::Rejected(reason)));
                }
            }
        }
        Ok(None)
    }

    /// Timer path: delete through the ledger, then drop the entry if still shown
    fn handle_expired(
        &mut self,
        expired: Expired,
        now: DateTime<Utc>,
        events: &UnboundedSender<SessionEvent>,
    ) -> Result<()> {
        self.scheduler.complete(&expired.message_id);
        if expired.room_code != self.room.room_code {
            return Ok(());
        }

        // Timers and the wall clock can disagree by a few milliseconds
        let now = self
            .visible
            .iter()
            .find(|e| e.id == expired.message_id)
            .map_or(now, |e| now.max(instant_of(e.expires_at)));
        self.ledger.expire(&expired.room_code, &expired.message_id, now)?;

        let before = self.visible.len();
        self.visible.retain(|e| e.id != expired.message_id);
        if self.visible.len() != before {
            Self::emit(
                events,
                SessionEvent::Expired {
                    message_id: expired.message_id,
                },
            );
        }
        Ok(())
    }

    /// Sweep path: compact the ledger and drop anything no longer alive
    fn handle_sweep(&mut self, now: DateTime<Utc>, events: &UnboundedSender<SessionEvent>) -> Result<()> {
        self.ledger.sweep_at(now)?;

        let (alive, gone): (Vec<_>, Vec<_>) =
            self.visible.drain(..).partition(|e| e.is_alive_at(now));
        self.visible = alive;
        for entry in gone {
            Self::emit(events, SessionEvent::Expired { message_id: entry.id });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.scheduler.cancel_all();
        self.connection.close();
        log::info!("Left room {}", self.room.room_code);
    }
}
