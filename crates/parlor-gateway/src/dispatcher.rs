use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use parlor_auth::{AuthError, EndpointClass, RateGuard, Session, SessionBinder};
use parlor_types::events::{ClientCommand, ServerEvent};
use parlor_types::models::Account;

/// Per-connection outbox depth. A member whose outbox is full misses events
/// rather than stalling the room.
pub const OUTBOX_CAPACITY: usize = 256;

const MAX_ROOM_NAME: usize = 64;
const MAX_MESSAGE_LEN: usize = 2000;

/// Room registry and fan-out point for the realtime gateway.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    sessions: SessionBinder,
    rate_guard: Arc<RateGuard>,
    registry: Mutex<Registry>,
}

#[derive(Default)]
struct Registry {
    /// conn_id -> connection
    connections: HashMap<Uuid, ConnectionEntry>,

    /// room name -> (conn_id -> handle at join time)
    rooms: HashMap<String, HashMap<Uuid, String>>,
}

struct ConnectionEntry {
    client: String,
    outbox: mpsc::Sender<ServerEvent>,
    rooms: HashSet<String>,
    /// Session that last joined a room over this connection.
    session: Option<Session>,
}

impl Registry {
    /// Fan out under the registry lock so every member sees a room's events in
    /// call order. `try_send` keeps one slow member from blocking the rest.
    fn broadcast(&self, room: &str, event: &ServerEvent) {
        let Some(members) = self.rooms.get(room) else {
            return;
        };
        for conn_id in members.keys() {
            if let Some(conn) = self.connections.get(conn_id) {
                deliver(*conn_id, conn, event.clone());
            }
        }
    }

    fn send_private(&self, conn_id: Uuid, event: ServerEvent) {
        if let Some(conn) = self.connections.get(&conn_id) {
            deliver(conn_id, conn, event);
        }
    }

    /// Remove `conn_id` from `rooms`, telling each room it left. Empty rooms are
    /// dropped. Returns the number of rooms vacated.
    fn vacate(&mut self, conn_id: Uuid, rooms: HashSet<String>) -> usize {
        for room in &rooms {
            let handle = self
                .rooms
                .get_mut(room)
                .and_then(|members| members.remove(&conn_id));
            if let Some(handle) = handle {
                self.broadcast(room, &ServerEvent::status(format!("{} has left the room", handle)));
            }
            if self.rooms.get(room).is_some_and(|m| m.is_empty()) {
                self.rooms.remove(room);
            }
        }
        rooms.len()
    }

    /// Pull a still-registered connection out of every room it is in.
    fn vacate_all(&mut self, conn_id: Uuid) -> usize {
        let rooms = self
            .connections
            .get_mut(&conn_id)
            .map(|conn| std::mem::take(&mut conn.rooms))
            .unwrap_or_default();
        self.vacate(conn_id, rooms)
    }
}

fn deliver(conn_id: Uuid, conn: &ConnectionEntry, event: ServerEvent) {
    match conn.outbox.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("Outbox full for connection {}, dropping event", conn_id);
        }
        // Disconnect cleanup will remove it.
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

fn validate_room(room: &str) -> Result<String, AuthError> {
    let room = room.trim();
    if room.is_empty() || room.chars().count() > MAX_ROOM_NAME {
        return Err(AuthError::Validation(format!(
            "Room names are 1-{} characters.",
            MAX_ROOM_NAME
        )));
    }
    Ok(room.to_string())
}

impl Dispatcher {
    pub fn new(sessions: SessionBinder, rate_guard: Arc<RateGuard>) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                sessions,
                rate_guard,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Register a connection. Returns (conn_id, receiver) for its outbox.
    pub async fn register(&self, client: String) -> (Uuid, mpsc::Receiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        self.inner.registry.lock().await.connections.insert(
            conn_id,
            ConnectionEntry {
                client,
                outbox: tx,
                rooms: HashSet::new(),
                session: None,
            },
        );
        (conn_id, rx)
    }

    /// Remove a connection from every room it is in, notifying the remaining
    /// members. Once this has run the conn_id is unknown and later joins for it
    /// are refused. Returns the number of rooms left.
    pub async fn disconnect(&self, conn_id: Uuid) -> usize {
        let mut registry = self.inner.registry.lock().await;
        let Some(conn) = registry.connections.remove(&conn_id) else {
            return 0;
        };
        registry.vacate(conn_id, conn.rooms)
    }

    /// Take every connection bound to `session_id` out of its rooms, e.g. on
    /// logout. Returns the number of connections evicted.
    pub async fn evict_session(&self, session_id: Uuid) -> usize {
        self.evict_where(|s| s.id == session_id, &AuthError::NotAuthenticated)
            .await
    }

    /// Same as `evict_session` for a batch, used by the idle sweep.
    pub async fn evict_sessions(&self, session_ids: &[Uuid]) -> usize {
        if session_ids.is_empty() {
            return 0;
        }
        self.evict_where(|s| session_ids.contains(&s.id), &AuthError::NotAuthenticated)
            .await
    }

    /// Take every connection of `email` out of its rooms. Called when a new
    /// credential un-verifies the account.
    pub async fn evict_account(&self, email: &str) -> usize {
        self.evict_where(|s| s.email == email, &AuthError::NotVerified)
            .await
    }

    async fn evict_where<F>(&self, matches: F, reason: &AuthError) -> usize
    where
        F: Fn(&Session) -> bool,
    {
        let mut registry = self.inner.registry.lock().await;
        let targets: Vec<Uuid> = registry
            .connections
            .iter()
            .filter(|(_, conn)| !conn.rooms.is_empty())
            .filter(|(_, conn)| conn.session.as_ref().is_some_and(|s| matches(s)))
            .map(|(conn_id, _)| *conn_id)
            .collect();

        for conn_id in &targets {
            let rooms = registry.vacate_all(*conn_id);
            info!("Evicted connection {} from {} rooms: {}", conn_id, rooms, reason);
            registry.send_private(*conn_id, ServerEvent::status(reason.client_message()));
        }
        targets.len()
    }

    /// Route one client command. Denials go back to the requester only.
    pub async fn handle_command(&self, conn_id: Uuid, session: Option<&Session>, cmd: ClientCommand) {
        match cmd {
            ClientCommand::Join { room } => self.join(conn_id, session, &room).await,
            ClientCommand::Leave { room } => self.leave(conn_id, session, &room).await,
            ClientCommand::ChatMessage { room, message } => {
                self.send_message(conn_id, session, &room, &message).await
            }
        }
    }

    pub async fn join(&self, conn_id: Uuid, session: Option<&Session>, room: &str) {
        let (account, room) = match self.authorize(session, room).await {
            Ok(ok) => ok,
            Err(e) => return self.deny(conn_id, "join", e).await,
        };
        let Some(handle) = account.handle else {
            return self.deny(conn_id, "join", AuthError::NoHandle).await;
        };

        let mut registry = self.inner.registry.lock().await;
        let Some(conn) = registry.connections.get_mut(&conn_id) else {
            debug!("Join for departed connection {} ignored", conn_id);
            return;
        };
        conn.session = session.cloned();
        if !conn.rooms.insert(room.clone()) {
            return;
        }
        registry
            .rooms
            .entry(room.clone())
            .or_default()
            .insert(conn_id, handle.clone());

        info!("{} joined {}", handle, room);
        // The joiner gets this notice too.
        registry.broadcast(&room, &ServerEvent::status(format!("{} has entered the room", handle)));
    }

    pub async fn leave(&self, conn_id: Uuid, session: Option<&Session>, room: &str) {
        let room = match self.authorize(session, room).await {
            Ok((_, room)) => room,
            Err(e) => return self.deny(conn_id, "leave", e).await,
        };

        let mut registry = self.inner.registry.lock().await;
        let was_member = registry
            .connections
            .get_mut(&conn_id)
            .is_some_and(|conn| conn.rooms.remove(&room));
        if !was_member {
            return;
        }

        let handle = registry
            .rooms
            .get_mut(&room)
            .and_then(|members| members.remove(&conn_id));
        if registry.rooms.get(&room).is_some_and(|m| m.is_empty()) {
            registry.rooms.remove(&room);
        }
        if let Some(handle) = handle {
            info!("{} left {}", handle, room);
            registry.broadcast(&room, &ServerEvent::status(format!("{} has left the room", handle)));
        }
    }

    pub async fn send_message(&self, conn_id: Uuid, session: Option<&Session>, room: &str, text: &str) {
        let (account, room) = match self.authorize(session, room).await {
            Ok(ok) => ok,
            Err(e) => return self.deny(conn_id, "chat_message", e).await,
        };
        let Some(handle) = account.handle else {
            return self.deny(conn_id, "chat_message", AuthError::NoHandle).await;
        };

        let text = text.trim();
        if text.is_empty() || text.chars().count() > MAX_MESSAGE_LEN {
            let e = AuthError::Validation(format!("Messages are 1-{} characters.", MAX_MESSAGE_LEN));
            return self.deny(conn_id, "chat_message", e).await;
        }

        let registry = self.inner.registry.lock().await;
        let Some(conn) = registry.connections.get(&conn_id) else {
            return;
        };
        if !conn.rooms.contains(&room) {
            registry.send_private(conn_id, ServerEvent::status(format!("You are not in {}.", room)));
            return;
        }
        if !self.inner.rate_guard.allow(&conn.client, EndpointClass::Message) {
            registry.send_private(conn_id, ServerEvent::status(AuthError::RateLimited.client_message()));
            return;
        }

        debug!("{} -> {} ({} chars)", handle, room, text.len());
        registry.broadcast(
            &room,
            &ServerEvent::Message {
                handle,
                text: text.to_string(),
            },
        );
    }

    /// Deliver `event` to one connection only.
    pub async fn notify(&self, conn_id: Uuid, event: ServerEvent) {
        self.inner.registry.lock().await.send_private(conn_id, event);
    }

    /// Handles of the current members of `room`, sorted.
    pub async fn room_members(&self, room: &str) -> Vec<String> {
        let registry = self.inner.registry.lock().await;
        let mut handles: Vec<String> = registry
            .rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default();
        handles.sort();
        handles
    }

    pub async fn room_count(&self) -> usize {
        self.inner.registry.lock().await.rooms.len()
    }

    async fn authorize(
        &self,
        session: Option<&Session>,
        room: &str,
    ) -> Result<(Account, String), AuthError> {
        let account = self.inner.sessions.require_room_access(session).await?;
        let room = validate_room(room)?;
        Ok((account, room))
    }

    /// Refuse a command. A caller that no longer qualifies for room access at
    /// all is also taken out of every room it still sits in.
    async fn deny(&self, conn_id: Uuid, action: &str, err: AuthError) {
        warn!("Connection {} denied {}: {}", conn_id, action, err);
        let mut registry = self.inner.registry.lock().await;
        if matches!(
            err,
            AuthError::NotAuthenticated | AuthError::NotVerified | AuthError::NoHandle
        ) {
            registry.vacate_all(conn_id);
        }
        registry.send_private(conn_id, ServerEvent::status(err.client_message()));
    }
}
