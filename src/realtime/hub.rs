//! The realtime hub: one task that owns all presence and room state.
//!
//! Socket tasks never touch shared maps directly. They send [`Command`]s
//! through a [`Hub`] handle and receive [`ServerMessage`]s on their own
//! bounded outbox. Pending document deltas are flushed to the persister after
//! a trailing debounce capped by a maximum delay, when a room empties, and on
//! shutdown. Flushed deltas stay in flight until the persister acknowledges
//! them, so a join never falls between memory and the database.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use super::persist::{spawn_persister, FlushJob, PersistJob, Persisted};
use super::protocol::{DocumentPresence, PresenceUser, ServerMessage, TypingScope};
use crate::db::Db;
use crate::models::{ChatMessage, Notification};

pub type ConnId = u64;

const COMMAND_CAPACITY: usize = 1024;
const OUTBOX_CAPACITY: usize = 256;
const IDLE_WAKEUP: Duration = Duration::from_secs(3600);

/// When pending document deltas are written
#[derive(Debug, Clone, Copy)]
pub struct FlushSettings {
    /// Quiet period after the last delta
    pub debounce: Duration,
    /// Longest time the oldest pending delta may wait
    pub max_delay: Duration,
}

/// Deltas and content held in memory for a document, not yet persisted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingSnapshot {
    pub updates: Vec<String>,
    pub content: Option<String>,
}

enum Command {
    Connect {
        conn: ConnId,
        user: PresenceUser,
        outbox: mpsc::Sender<ServerMessage>,
    },
    Disconnect {
        conn: ConnId,
    },
    Deliver {
        conn: ConnId,
        message: ServerMessage,
    },
    JoinDocument {
        conn: ConnId,
        document_id: String,
        can_edit: bool,
        reply: oneshot::Sender<PendingSnapshot>,
    },
    LeaveDocument {
        conn: ConnId,
        document_id: String,
    },
    DocumentUpdate {
        conn: ConnId,
        document_id: String,
        update: String,
        content: Option<String>,
    },
    Cursor {
        conn: ConnId,
        document_id: String,
        cursor: Value,
    },
    JoinTeam {
        conn: ConnId,
        team_id: String,
    },
    LeaveTeam {
        conn: ConnId,
        team_id: String,
    },
    Typing {
        conn: ConnId,
        scope: TypingScope,
        is_typing: bool,
    },
    /// Drop a user's connections (or everyone, for `None`) from a team room
    RemoveFromTeam {
        team_id: String,
        user_id: Option<String>,
    },
    BroadcastChat {
        message: ChatMessage,
    },
    Notify {
        notification: Notification,
    },
    Flush {
        done: oneshot::Sender<()>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the hub task
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
    next_conn: Arc<AtomicU64>,
}

impl Hub {
    /// Start the hub and its persister
    pub fn spawn(db: Db, settings: FlushSettings) -> Self {
        let (commands, rx) = mpsc::channel(COMMAND_CAPACITY);
        let (persist, acks, persister) = spawn_persister(db);
        let state = HubState::new(settings, persist);
        tokio::spawn(state.run(rx, acks, persister));

        tracing::info!(
            "Realtime hub started (debounce {:?}, max delay {:?})",
            settings.debounce,
            settings.max_delay
        );

        Self {
            commands,
            next_conn: Arc::new(AtomicU64::new(1)),
        }
    }

    async fn send(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            tracing::warn!("Realtime hub is not running");
        }
    }

    /// Register a connection; the receiver yields frames to write to the socket
    pub async fn connect(&self, user: PresenceUser) -> (ConnId, mpsc::Receiver<ServerMessage>) {
        let conn = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let (outbox, rx) = mpsc::channel(OUTBOX_CAPACITY);
        self.send(Command::Connect { conn, user, outbox }).await;
        (conn, rx)
    }

    pub async fn disconnect(&self, conn: ConnId) {
        self.send(Command::Disconnect { conn }).await;
    }

    /// Queue a frame for one connection, ordered with broadcasts
    pub async fn deliver(&self, conn: ConnId, message: ServerMessage) {
        self.send(Command::Deliver { conn, message }).await;
    }

    /// Join a document room; returns deltas still pending in memory
    ///
    /// `None` means the hub is gone or the connection is unknown.
    pub async fn join_document(
        &self,
        conn: ConnId,
        document_id: &str,
        can_edit: bool,
    ) -> Option<PendingSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::JoinDocument {
            conn,
            document_id: document_id.to_string(),
            can_edit,
            reply,
        })
        .await;
        rx.await.ok()
    }

    pub async fn leave_document(&self, conn: ConnId, document_id: &str) {
        self.send(Command::LeaveDocument {
            conn,
            document_id: document_id.to_string(),
        })
        .await;
    }

    pub async fn document_update(
        &self,
        conn: ConnId,
        document_id: &str,
        update: String,
        content: Option<String>,
    ) {
        self.send(Command::DocumentUpdate {
            conn,
            document_id: document_id.to_string(),
            update,
            content,
        })
        .await;
    }

    pub async fn cursor(&self, conn: ConnId, document_id: &str, cursor: Value) {
        self.send(Command::Cursor {
            conn,
            document_id: document_id.to_string(),
            cursor,
        })
        .await;
    }

    pub async fn join_team(&self, conn: ConnId, team_id: &str) {
        self.send(Command::JoinTeam {
            conn,
            team_id: team_id.to_string(),
        })
        .await;
    }

    pub async fn leave_team(&self, conn: ConnId, team_id: &str) {
        self.send(Command::LeaveTeam {
            conn,
            team_id: team_id.to_string(),
        })
        .await;
    }

    pub async fn typing(&self, conn: ConnId, scope: TypingScope, is_typing: bool) {
        self.send(Command::Typing {
            conn,
            scope,
            is_typing,
        })
        .await;
    }

    /// Take a removed member's live connections out of the team room
    pub async fn remove_team_member(&self, team_id: &str, user_id: &str) {
        self.send(Command::RemoveFromTeam {
            team_id: team_id.to_string(),
            user_id: Some(user_id.to_string()),
        })
        .await;
    }

    /// Empty the room of a deleted team
    pub async fn close_team(&self, team_id: &str) {
        self.send(Command::RemoveFromTeam {
            team_id: team_id.to_string(),
            user_id: None,
        })
        .await;
    }

    /// Push a persisted chat message to everyone in the team room
    pub async fn broadcast_chat(&self, message: ChatMessage) {
        self.send(Command::BroadcastChat { message }).await;
    }

    /// Push a notification to every live connection of its recipient
    pub async fn notify(&self, notification: Notification) {
        self.send(Command::Notify { notification }).await;
    }

    /// Flush every pending delta and wait until it is written
    pub async fn flush(&self) {
        let (done, rx) = oneshot::channel();
        self.send(Command::Flush { done }).await;
        let _ = rx.await;
    }

    /// Flush everything, stop the hub and wait for the persister to drain
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        self.send(Command::Shutdown { done }).await;
        let _ = rx.await;
        tracing::info!("Realtime hub stopped");
    }
}

struct Connection {
    user: PresenceUser,
    outbox: mpsc::Sender<ServerMessage>,
    documents: HashSet<String>,
    teams: HashSet<String>,
}

struct RoomMember {
    can_edit: bool,
    cursor: Option<Value>,
}

#[derive(Default)]
struct DocumentRoom {
    members: HashMap<ConnId, RoomMember>,
    pending: Vec<String>,
    content: Option<String>,
    first_pending_at: Option<Instant>,
    last_update_at: Option<Instant>,
}

impl DocumentRoom {
    fn deadline(&self, settings: &FlushSettings) -> Option<Instant> {
        match (self.first_pending_at, self.last_update_at) {
            (Some(first), Some(last)) => {
                Some((last + settings.debounce).min(first + settings.max_delay))
            }
            _ => None,
        }
    }

    fn take_pending(&mut self, document_id: &str) -> Option<FlushJob> {
        self.first_pending_at = None;
        self.last_update_at = None;
        if self.pending.is_empty() && self.content.is_none() {
            return None;
        }
        Some(FlushJob {
            id: 0,
            document_id: document_id.to_string(),
            updates: std::mem::take(&mut self.pending),
            content: self.content.take(),
        })
    }
}

struct HubState {
    settings: FlushSettings,
    persist: mpsc::UnboundedSender<PersistJob>,
    connections: HashMap<ConnId, Connection>,
    documents: HashMap<String, DocumentRoom>,
    /// Jobs handed to the persister and not yet acknowledged, oldest first
    in_flight: HashMap<String, Vec<FlushJob>>,
    next_job: u64,
    teams: HashMap<String, HashSet<ConnId>>,
    typing: HashMap<TypingScope, HashSet<ConnId>>,
    evicted: Vec<ConnId>,
}

impl HubState {
    fn new(settings: FlushSettings, persist: mpsc::UnboundedSender<PersistJob>) -> Self {
        Self {
            settings,
            persist,
            connections: HashMap::new(),
            documents: HashMap::new(),
            in_flight: HashMap::new(),
            next_job: 1,
            teams: HashMap::new(),
            typing: HashMap::new(),
            evicted: Vec::new(),
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut acks: mpsc::UnboundedReceiver<Persisted>,
        persister: JoinHandle<()>,
    ) {
        let mut shutdown_ack = None;

        loop {
            let deadline = self.next_deadline();
            let wake_at = deadline.unwrap_or_else(|| Instant::now() + IDLE_WAKEUP);

            tokio::select! {
                // Acknowledgements before commands keep in-flight state current
                biased;

                Some(ack) = acks.recv() => self.persisted(ack),
                command = commands.recv() => match command {
                    Some(Command::Shutdown { done }) => {
                        shutdown_ack = Some(done);
                        break;
                    }
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = sleep_until(wake_at), if deadline.is_some() => {
                    self.flush_due(Instant::now());
                }
            }
            self.process_evictions();
        }

        self.flush_all();
        let HubState {
            persist,
            connections,
            ..
        } = self;
        drop(connections);
        drop(persist);

        if let Err(e) = persister.await {
            tracing::error!("Document persister panicked: {:?}", e);
        }
        if let Some(done) = shutdown_ack {
            let _ = done.send(());
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect { conn, user, outbox } => {
                tracing::debug!("Realtime connection {} opened for {}", conn, user.user_id);
                self.connections.insert(
                    conn,
                    Connection {
                        user,
                        outbox,
                        documents: HashSet::new(),
                        teams: HashSet::new(),
                    },
                );
            }
            Command::Disconnect { conn } => self.remove_connection(conn),
            Command::Deliver { conn, message } => self.send(conn, message),
            Command::JoinDocument {
                conn,
                document_id,
                can_edit,
                reply,
            } => self.join_document(conn, document_id, can_edit, reply),
            Command::LeaveDocument { conn, document_id } => {
                if let Some(user) = self.detach_document(conn, &document_id) {
                    self.leave_document(conn, &document_id, &user);
                }
            }
            Command::DocumentUpdate {
                conn,
                document_id,
                update,
                content,
            } => self.document_update(conn, document_id, update, content),
            Command::Cursor {
                conn,
                document_id,
                cursor,
            } => self.cursor(conn, document_id, cursor),
            Command::JoinTeam { conn, team_id } => self.join_team(conn, team_id),
            Command::LeaveTeam { conn, team_id } => {
                if let Some(user) = self.detach_team(conn, &team_id) {
                    self.leave_team(conn, &team_id, &user);
                }
            }
            Command::Typing {
                conn,
                scope,
                is_typing,
            } => self.typing(conn, scope, is_typing),
            Command::RemoveFromTeam { team_id, user_id } => {
                self.remove_from_team(&team_id, user_id.as_deref());
            }
            Command::BroadcastChat { message } => {
                let targets = self.team_members(&message.team_id);
                for conn in targets {
                    self.send(
                        conn,
                        ServerMessage::ChatMessage {
                            message: message.clone(),
                        },
                    );
                }
            }
            Command::Notify { notification } => {
                let targets: Vec<ConnId> = self
                    .connections
                    .iter()
                    .filter(|(_, c)| c.user.user_id == notification.user_id)
                    .map(|(id, _)| *id)
                    .collect();
                for conn in targets {
                    self.send(
                        conn,
                        ServerMessage::Notification {
                            notification: notification.clone(),
                        },
                    );
                }
            }
            Command::Flush { done } => {
                self.flush_all();
                let _ = self.persist.send(PersistJob::Barrier(done));
            }
            // Intercepted by the run loop
            Command::Shutdown { .. } => {}
        }
    }

    // -------------------------------------------------------------------------
    // Delivery
    // -------------------------------------------------------------------------

    fn send(&mut self, conn: ConnId, message: ServerMessage) {
        let Some(connection) = self.connections.get(&conn) else {
            return;
        };
        match connection.outbox.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Evicting slow realtime connection {}", conn);
                self.evicted.push(conn);
            }
            Err(TrySendError::Closed(_)) => self.evicted.push(conn),
        }
    }

    fn process_evictions(&mut self) {
        while let Some(conn) = self.evicted.pop() {
            self.remove_connection(conn);
        }
    }

    fn remove_connection(&mut self, conn: ConnId) {
        let Some(connection) = self.connections.remove(&conn) else {
            return;
        };
        for document_id in &connection.documents {
            self.leave_document(conn, document_id, &connection.user);
        }
        for team_id in &connection.teams {
            self.leave_team(conn, team_id, &connection.user);
        }
        tracing::debug!(
            "Realtime connection {} closed for {}",
            conn,
            connection.user.user_id
        );
    }

    // -------------------------------------------------------------------------
    // Documents
    // -------------------------------------------------------------------------

    fn join_document(
        &mut self,
        conn: ConnId,
        document_id: String,
        can_edit: bool,
        reply: oneshot::Sender<PendingSnapshot>,
    ) {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return;
        };
        connection.documents.insert(document_id.clone());

        // In-flight jobs are older than anything still pending in the room
        let mut snapshot = PendingSnapshot::default();
        for job in self.in_flight.get(&document_id).into_iter().flatten() {
            snapshot.updates.extend(job.updates.iter().cloned());
            if job.content.is_some() {
                snapshot.content = job.content.clone();
            }
        }

        let room = self.documents.entry(document_id.clone()).or_default();
        room.members.insert(
            conn,
            RoomMember {
                can_edit,
                cursor: None,
            },
        );
        snapshot.updates.extend(room.pending.iter().cloned());
        if room.content.is_some() {
            snapshot.content = room.content.clone();
        }
        let _ = reply.send(snapshot);

        self.broadcast_presence(&document_id);
    }

    /// Forget that `conn` is in the document room; returns the user if it was
    fn detach_document(&mut self, conn: ConnId, document_id: &str) -> Option<PresenceUser> {
        let connection = self.connections.get_mut(&conn)?;
        if !connection.documents.remove(document_id) {
            return None;
        }
        Some(connection.user.clone())
    }

    fn leave_document(&mut self, conn: ConnId, document_id: &str, user: &PresenceUser) {
        let Some(room) = self.documents.get_mut(document_id) else {
            return;
        };
        if room.members.remove(&conn).is_none() {
            return;
        }
        let empty = room.members.is_empty();

        self.clear_typing(conn, TypingScope::Document(document_id.to_string()), user);

        if empty {
            if let Some(mut room) = self.documents.remove(document_id) {
                if let Some(job) = room.take_pending(document_id) {
                    self.queue_flush(job);
                }
            }
        } else {
            self.broadcast_presence(document_id);
        }
    }

    fn document_update(
        &mut self,
        conn: ConnId,
        document_id: String,
        update: String,
        content: Option<String>,
    ) {
        let Some(user_id) = self.connections.get(&conn).map(|c| c.user.user_id.clone()) else {
            return;
        };
        let can_edit = self
            .documents
            .get(&document_id)
            .and_then(|room| room.members.get(&conn))
            .map(|member| member.can_edit);

        match can_edit {
            None => {
                self.send(conn, ServerMessage::error("Join the document before editing"));
                return;
            }
            Some(false) => {
                self.send(conn, ServerMessage::error("You have view-only access to this document"));
                return;
            }
            Some(true) => {}
        }

        let Some(room) = self.documents.get_mut(&document_id) else {
            return;
        };
        let now = Instant::now();
        room.pending.push(update.clone());
        if content.is_some() {
            room.content = content;
        }
        room.first_pending_at.get_or_insert(now);
        room.last_update_at = Some(now);

        let others: Vec<ConnId> = room.members.keys().copied().filter(|c| *c != conn).collect();
        for other in others {
            self.send(
                other,
                ServerMessage::DocumentUpdate {
                    document_id: document_id.clone(),
                    user_id: user_id.clone(),
                    update: update.clone(),
                },
            );
        }
    }

    fn cursor(&mut self, conn: ConnId, document_id: String, cursor: Value) {
        let Some(user_id) = self.connections.get(&conn).map(|c| c.user.user_id.clone()) else {
            return;
        };
        let Some(member) = self
            .documents
            .get_mut(&document_id)
            .and_then(|room| room.members.get_mut(&conn))
        else {
            self.send(conn, ServerMessage::error("Join the document first"));
            return;
        };
        member.cursor = Some(cursor.clone());

        let others: Vec<ConnId> = self.documents[&document_id]
            .members
            .keys()
            .copied()
            .filter(|c| *c != conn)
            .collect();
        for other in others {
            self.send(
                other,
                ServerMessage::Cursor {
                    document_id: document_id.clone(),
                    user_id: user_id.clone(),
                    cursor: cursor.clone(),
                },
            );
        }
    }

    fn broadcast_presence(&mut self, document_id: &str) {
        let Some(room) = self.documents.get(document_id) else {
            return;
        };
        let mut users: Vec<DocumentPresence> = room
            .members
            .iter()
            .filter_map(|(conn, member)| {
                self.connections.get(conn).map(|c| DocumentPresence {
                    user_id: c.user.user_id.clone(),
                    name: c.user.name.clone(),
                    can_edit: member.can_edit,
                    cursor: member.cursor.clone(),
                })
            })
            .collect();
        users.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.user_id.cmp(&b.user_id)));

        let targets: Vec<ConnId> = room.members.keys().copied().collect();
        for conn in targets {
            self.send(
                conn,
                ServerMessage::Presence {
                    document_id: document_id.to_string(),
                    users: users.clone(),
                },
            );
        }
    }

    // -------------------------------------------------------------------------
    // Teams
    // -------------------------------------------------------------------------

    fn join_team(&mut self, conn: ConnId, team_id: String) {
        let Some(connection) = self.connections.get_mut(&conn) else {
            return;
        };
        connection.teams.insert(team_id.clone());
        self.teams.entry(team_id.clone()).or_default().insert(conn);
        self.broadcast_team_presence(&team_id);
    }

    /// Forget that `conn` is in the team room; returns the user if it was
    fn detach_team(&mut self, conn: ConnId, team_id: &str) -> Option<PresenceUser> {
        let connection = self.connections.get_mut(&conn)?;
        if !connection.teams.remove(team_id) {
            return None;
        }
        Some(connection.user.clone())
    }

    fn remove_from_team(&mut self, team_id: &str, user_id: Option<&str>) {
        let targets: Vec<ConnId> = self
            .team_members(team_id)
            .into_iter()
            .filter(|conn| match user_id {
                Some(user_id) => self
                    .connections
                    .get(conn)
                    .is_some_and(|c| c.user.user_id == user_id),
                None => true,
            })
            .collect();

        for conn in targets {
            if let Some(user) = self.detach_team(conn, team_id) {
                self.leave_team(conn, team_id, &user);
                self.send(conn, ServerMessage::error("You are no longer a member of this team"));
            }
        }
    }

    fn leave_team(&mut self, conn: ConnId, team_id: &str, user: &PresenceUser) {
        let Some(room) = self.teams.get_mut(team_id) else {
            return;
        };
        if !room.remove(&conn) {
            return;
        }
        let empty = room.is_empty();

        self.clear_typing(conn, TypingScope::Team(team_id.to_string()), user);

        if empty {
            self.teams.remove(team_id);
        } else {
            self.broadcast_team_presence(team_id);
        }
    }

    fn team_members(&self, team_id: &str) -> Vec<ConnId> {
        self.teams
            .get(team_id)
            .map(|room| room.iter().copied().collect())
            .unwrap_or_default()
    }

    fn broadcast_team_presence(&mut self, team_id: &str) {
        let targets = self.team_members(team_id);

        let mut users: Vec<PresenceUser> = Vec::new();
        for conn in &targets {
            if let Some(c) = self.connections.get(conn) {
                if !users.iter().any(|u| u.user_id == c.user.user_id) {
                    users.push(c.user.clone());
                }
            }
        }
        users.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.user_id.cmp(&b.user_id)));

        for conn in targets {
            self.send(
                conn,
                ServerMessage::TeamPresence {
                    team_id: team_id.to_string(),
                    users: users.clone(),
                },
            );
        }
    }

    // -------------------------------------------------------------------------
    // Typing indicators
    // -------------------------------------------------------------------------

    fn scope_members(&self, scope: &TypingScope) -> Vec<ConnId> {
        match scope {
            TypingScope::Document(id) => self
                .documents
                .get(id)
                .map(|room| room.members.keys().copied().collect())
                .unwrap_or_default(),
            TypingScope::Team(id) => self.team_members(id),
        }
    }

    fn typing(&mut self, conn: ConnId, scope: TypingScope, is_typing: bool) {
        let Some(user) = self.connections.get(&conn).map(|c| c.user.clone()) else {
            return;
        };
        if !self.scope_members(&scope).contains(&conn) {
            self.send(conn, ServerMessage::error("Join the room before sending typing indicators"));
            return;
        }

        let typists = self.typing.entry(scope.clone()).or_default();
        let changed = if is_typing {
            typists.insert(conn)
        } else {
            typists.remove(&conn)
        };
        if typists.is_empty() {
            self.typing.remove(&scope);
        }

        if changed {
            self.broadcast_typing(conn, &scope, &user, is_typing);
        }
    }

    fn clear_typing(&mut self, conn: ConnId, scope: TypingScope, user: &PresenceUser) {
        let Some(typists) = self.typing.get_mut(&scope) else {
            return;
        };
        if !typists.remove(&conn) {
            return;
        }
        if typists.is_empty() {
            self.typing.remove(&scope);
        }
        self.broadcast_typing(conn, &scope, user, false);
    }

    fn broadcast_typing(
        &mut self,
        conn: ConnId,
        scope: &TypingScope,
        user: &PresenceUser,
        is_typing: bool,
    ) {
        let others: Vec<ConnId> = self
            .scope_members(scope)
            .into_iter()
            .filter(|c| *c != conn)
            .collect();
        for other in others {
            self.send(
                other,
                ServerMessage::Typing {
                    scope: scope.clone(),
                    user_id: user.user_id.clone(),
                    name: user.name.clone(),
                    is_typing,
                },
            );
        }
    }

    // -------------------------------------------------------------------------
    // Flushing
    // -------------------------------------------------------------------------

    fn next_deadline(&self) -> Option<Instant> {
        self.documents
            .values()
            .filter_map(|room| room.deadline(&self.settings))
            .min()
    }

    fn flush_due(&mut self, now: Instant) {
        let settings = self.settings;
        let jobs: Vec<FlushJob> = self
            .documents
            .iter_mut()
            .filter(|(_, room)| room.deadline(&settings).is_some_and(|at| at <= now))
            .filter_map(|(id, room)| room.take_pending(id))
            .collect();
        for job in jobs {
            self.queue_flush(job);
        }
    }

    fn flush_all(&mut self) {
        let jobs: Vec<FlushJob> = self
            .documents
            .iter_mut()
            .filter_map(|(id, room)| room.take_pending(id))
            .collect();
        for job in jobs {
            self.queue_flush(job);
        }
    }

    fn queue_flush(&mut self, mut job: FlushJob) {
        job.id = self.next_job;
        self.next_job += 1;
        tracing::debug!(
            "Flushing {} pending deltas for document {}",
            job.updates.len(),
            job.document_id
        );

        self.in_flight
            .entry(job.document_id.clone())
            .or_default()
            .push(job.clone());
        if self.persist.send(PersistJob::Flush(job)).is_err() {
            tracing::error!("Document persister is gone; pending deltas lost");
        }
    }

    /// The persister is done with a job (written, or dropped for a deleted document)
    fn persisted(&mut self, ack: Persisted) {
        let Some(jobs) = self.in_flight.get_mut(&ack.document_id) else {
            return;
        };
        jobs.retain(|job| job.id != ack.job_id);
        if jobs.is_empty() {
            self.in_flight.remove(&ack.document_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::TempDir;
    use tokio::time::timeout;

    struct Fixture {
        _dir: TempDir,
        db: Db,
        document_id: String,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let db = db::open_database(dir.path().join("hub.db")).await.unwrap();
        let owner = db::users::insert(&db, "owner@example.com", "Owner", "x")
            .await
            .unwrap();
        let document = db::documents::create(&db, &owner.id, "Notes", "", None)
            .await
            .unwrap();
        Fixture {
            _dir: dir,
            db,
            document_id: document.id,
        }
    }

    fn settings(debounce_ms: u64) -> FlushSettings {
        FlushSettings {
            debounce: Duration::from_millis(debounce_ms),
            max_delay: Duration::from_millis(debounce_ms * 5),
        }
    }

    fn user(id: &str) -> PresenceUser {
        PresenceUser {
            user_id: id.to_string(),
            name: id.to_uppercase(),
        }
    }

    async fn next(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("outbox closed")
    }

    /// Receive frames until one matches, skipping presence chatter
    async fn next_matching(
        rx: &mut mpsc::Receiver<ServerMessage>,
        pred: impl Fn(&ServerMessage) -> bool,
    ) -> ServerMessage {
        loop {
            let msg = next(rx).await;
            if pred(&msg) {
                return msg;
            }
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_update_relayed_to_other_members_only() {
        let fx = fixture().await;
        let hub = Hub::spawn(fx.db.clone(), settings(10_000));

        let (a, mut rx_a) = hub.connect(user("a")).await;
        let (b, mut rx_b) = hub.connect(user("b")).await;
        hub.join_document(a, &fx.document_id, true).await.unwrap();
        hub.join_document(b, &fx.document_id, true).await.unwrap();

        hub.document_update(a, &fx.document_id, "AQID".to_string(), None)
            .await;

        let msg = next_matching(&mut rx_b, |m| matches!(m, ServerMessage::DocumentUpdate { .. })).await;
        assert_eq!(
            msg,
            ServerMessage::DocumentUpdate {
                document_id: fx.document_id.clone(),
                user_id: "a".to_string(),
                update: "AQID".to_string(),
            }
        );

        hub.flush().await;
        assert!(!drain(&mut rx_a)
            .iter()
            .any(|m| matches!(m, ServerMessage::DocumentUpdate { .. })));
    }

    #[tokio::test]
    async fn test_view_only_member_cannot_update() {
        let fx = fixture().await;
        let hub = Hub::spawn(fx.db.clone(), settings(10_000));

        let (viewer, mut rx) = hub.connect(user("viewer")).await;
        hub.join_document(viewer, &fx.document_id, false).await.unwrap();
        hub.document_update(viewer, &fx.document_id, "AQID".to_string(), None)
            .await;

        let msg = next_matching(&mut rx, |m| matches!(m, ServerMessage::Error { .. })).await;
        assert!(matches!(msg, ServerMessage::Error { message } if message.contains("view-only")));

        let pending = hub.join_document(viewer, &fx.document_id, false).await.unwrap();
        assert!(pending.updates.is_empty());
    }

    #[tokio::test]
    async fn test_update_without_join_is_rejected() {
        let fx = fixture().await;
        let hub = Hub::spawn(fx.db.clone(), settings(10_000));

        let (conn, mut rx) = hub.connect(user("a")).await;
        hub.document_update(conn, &fx.document_id, "AQID".to_string(), None)
            .await;

        assert!(matches!(next(&mut rx).await, ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn test_presence_lists_all_members() {
        let fx = fixture().await;
        let hub = Hub::spawn(fx.db.clone(), settings(10_000));

        let (a, mut rx_a) = hub.connect(user("a")).await;
        let (b, _rx_b) = hub.connect(user("b")).await;
        hub.join_document(a, &fx.document_id, true).await.unwrap();
        hub.join_document(b, &fx.document_id, false).await.unwrap();

        let msg = next_matching(&mut rx_a, |m| {
            matches!(m, ServerMessage::Presence { users, .. } if users.len() == 2)
        })
        .await;
        let ServerMessage::Presence { users, .. } = msg else {
            unreachable!()
        };
        assert_eq!(users[0].user_id, "a");
        assert!(users[0].can_edit);
        assert_eq!(users[1].user_id, "b");
        assert!(!users[1].can_edit);

        hub.disconnect(b).await;
        let msg = next_matching(&mut rx_a, |m| {
            matches!(m, ServerMessage::Presence { users, .. } if users.len() == 1)
        })
        .await;
        assert!(matches!(msg, ServerMessage::Presence { .. }));
    }

    #[tokio::test]
    async fn test_join_returns_pending_updates() {
        let fx = fixture().await;
        let hub = Hub::spawn(fx.db.clone(), settings(10_000));

        let (a, _rx_a) = hub.connect(user("a")).await;
        hub.join_document(a, &fx.document_id, true).await.unwrap();
        hub.document_update(a, &fx.document_id, "one".to_string(), Some("hello".to_string()))
            .await;
        hub.document_update(a, &fx.document_id, "two".to_string(), None)
            .await;

        let (b, _rx_b) = hub.connect(user("b")).await;
        let pending = hub.join_document(b, &fx.document_id, true).await.unwrap();
        assert_eq!(pending.updates, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(pending.content.as_deref(), Some("hello"));

        // Nothing written yet: the debounce has not elapsed
        assert!(db::documents::updates(&fx.db, &fx.document_id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_debounced_flush_persists_updates() {
        let fx = fixture().await;
        let hub = Hub::spawn(fx.db.clone(), settings(50));

        let (a, _rx) = hub.connect(user("a")).await;
        hub.join_document(a, &fx.document_id, true).await.unwrap();
        hub.document_update(a, &fx.document_id, "one".to_string(), Some("v1".to_string()))
            .await;
        hub.document_update(a, &fx.document_id, "two".to_string(), Some("v2".to_string()))
            .await;

        let mut persisted = Vec::new();
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            persisted = db::documents::updates(&fx.db, &fx.document_id).await.unwrap();
            if persisted.len() == 2 {
                break;
            }
        }
        let data: Vec<&str> = persisted.iter().map(|u| u.update_data.as_str()).collect();
        assert_eq!(data, vec!["one", "two"]);

        let document = db::documents::find(&fx.db, &fx.document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(document.content, "v2");

        // The room is still open but nothing is pending any more
        let pending = hub.join_document(a, &fx.document_id, true).await.unwrap();
        assert!(pending.updates.is_empty());
    }

    #[tokio::test]
    async fn test_last_member_leaving_flushes_immediately() {
        let fx = fixture().await;
        let hub = Hub::spawn(fx.db.clone(), settings(60_000));

        let (a, _rx) = hub.connect(user("a")).await;
        hub.join_document(a, &fx.document_id, true).await.unwrap();
        hub.document_update(a, &fx.document_id, "delta".to_string(), None)
            .await;
        hub.leave_document(a, &fx.document_id).await;
        hub.flush().await;

        let persisted = db::documents::updates(&fx.db, &fx.document_id).await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].update_data, "delta");
    }

    #[tokio::test]
    async fn test_join_sees_deltas_still_being_written() {
        let fx = fixture().await;
        let hub = Hub::spawn(fx.db.clone(), settings(60_000));

        // Hold the write lock so the persister cannot finish its job
        let mut lock = fx.db.acquire().await.unwrap();
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *lock)
            .await
            .unwrap();

        let (a, _rx_a) = hub.connect(user("a")).await;
        hub.join_document(a, &fx.document_id, true).await.unwrap();
        hub.document_update(a, &fx.document_id, "delta".to_string(), Some("text".to_string()))
            .await;
        // Last member leaves: the room is flushed and emptied
        hub.disconnect(a).await;

        let (b, _rx_b) = hub.connect(user("b")).await;
        let pending = hub.join_document(b, &fx.document_id, true).await.unwrap();
        assert_eq!(pending.updates, vec!["delta".to_string()]);
        assert_eq!(pending.content.as_deref(), Some("text"));
        assert!(db::documents::updates(&fx.db, &fx.document_id)
            .await
            .unwrap()
            .is_empty());

        sqlx::query("ROLLBACK").execute(&mut *lock).await.unwrap();
        drop(lock);
        hub.flush().await;

        let persisted = db::documents::updates(&fx.db, &fx.document_id).await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].update_data, "delta");
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_updates() {
        let fx = fixture().await;
        let hub = Hub::spawn(fx.db.clone(), settings(60_000));

        let (a, _rx) = hub.connect(user("a")).await;
        hub.join_document(a, &fx.document_id, true).await.unwrap();
        hub.document_update(a, &fx.document_id, "x".to_string(), Some("final".to_string()))
            .await;
        hub.shutdown().await;

        let persisted = db::documents::updates(&fx.db, &fx.document_id).await.unwrap();
        assert_eq!(persisted.len(), 1);
        let document = db::documents::find(&fx.db, &fx.document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(document.content, "final");
    }

    #[tokio::test]
    async fn test_typing_requires_room_membership() {
        let fx = fixture().await;
        let hub = Hub::spawn(fx.db.clone(), settings(10_000));

        let (a, mut rx_a) = hub.connect(user("a")).await;
        let (b, mut rx_b) = hub.connect(user("b")).await;

        hub.typing(a, TypingScope::Team("t1".to_string()), true).await;
        assert!(matches!(next(&mut rx_a).await, ServerMessage::Error { .. }));

        hub.join_team(a, "t1").await;
        hub.join_team(b, "t1").await;
        hub.typing(a, TypingScope::Team("t1".to_string()), true).await;

        let msg = next_matching(&mut rx_b, |m| matches!(m, ServerMessage::Typing { .. })).await;
        assert_eq!(
            msg,
            ServerMessage::Typing {
                scope: TypingScope::Team("t1".to_string()),
                user_id: "a".to_string(),
                name: "A".to_string(),
                is_typing: true,
            }
        );

        // Disconnecting clears the indicator for the others
        hub.disconnect(a).await;
        let msg = next_matching(&mut rx_b, |m| matches!(m, ServerMessage::Typing { .. })).await;
        assert!(matches!(msg, ServerMessage::Typing { is_typing: false, .. }));
    }

    fn chat(team_id: &str, content: &str) -> ChatMessage {
        ChatMessage {
            id: 1,
            team_id: team_id.to_string(),
            sender_id: "a".to_string(),
            sender_name: "A".to_string(),
            content: content.to_string(),
            created_at: chrono::Utc::now(),
        }
    }

    fn is_chat(msg: &ServerMessage) -> bool {
        matches!(msg, ServerMessage::ChatMessage { .. })
    }

    #[tokio::test]
    async fn test_removed_member_leaves_team_room() {
        let fx = fixture().await;
        let hub = Hub::spawn(fx.db.clone(), settings(10_000));

        let (a, mut rx_a) = hub.connect(user("a")).await;
        let (b, mut rx_b) = hub.connect(user("b")).await;
        hub.join_team(a, "t1").await;
        hub.join_team(b, "t1").await;
        next_matching(&mut rx_a, |m| {
            matches!(m, ServerMessage::TeamPresence { users, .. } if users.len() == 2)
        })
        .await;

        hub.remove_team_member("t1", "b").await;
        let msg = next_matching(&mut rx_a, |m| matches!(m, ServerMessage::TeamPresence { .. })).await;
        assert!(matches!(msg, ServerMessage::TeamPresence { users, .. } if users.len() == 1));
        let msg = next_matching(&mut rx_b, |m| matches!(m, ServerMessage::Error { .. })).await;
        assert!(matches!(msg, ServerMessage::Error { message } if message.contains("no longer")));

        hub.broadcast_chat(chat("t1", "after removal")).await;
        assert!(is_chat(&next_matching(&mut rx_a, is_chat).await));
        hub.flush().await;
        assert!(!drain(&mut rx_b).iter().any(is_chat));

        // Deleting the team empties the room
        hub.close_team("t1").await;
        hub.broadcast_chat(chat("t1", "after delete")).await;
        hub.flush().await;
        assert!(!drain(&mut rx_a).iter().any(is_chat));
    }

    #[tokio::test]
    async fn test_notifications_reach_every_connection_of_user() {
        let fx = fixture().await;
        let hub = Hub::spawn(fx.db.clone(), settings(10_000));

        let (_a1, mut rx_a1) = hub.connect(user("a")).await;
        let (_a2, mut rx_a2) = hub.connect(user("a")).await;
        let (_b, mut rx_b) = hub.connect(user("b")).await;

        let notification = Notification {
            id: "n1".to_string(),
            user_id: "a".to_string(),
            kind: crate::models::NotificationKind::ShareReceived,
            title: "Shared".to_string(),
            body: None,
            resource_type: None,
            resource_id: None,
            read_at: None,
            created_at: chrono::Utc::now(),
        };
        hub.notify(notification).await;

        assert!(matches!(next(&mut rx_a1).await, ServerMessage::Notification { .. }));
        assert!(matches!(next(&mut rx_a2).await, ServerMessage::Notification { .. }));
        hub.flush().await;
        assert!(drain(&mut rx_b).is_empty());
    }
}
