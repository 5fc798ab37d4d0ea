//! Manager actor: the single owner of the room registry and the
//! connection ↔ room membership graph.
//!
//! Every mutation of the graph is a `ManagerCommand` processed one at a time
//! by the actor loop. Handling a command never waits on a room or a
//! connection: rooms get commands through unbounded inboxes, connections get
//! notices through `try_send`, and membership events go to a forwarding task.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use rooms_shared::time::Clock;
use tokio::sync::{mpsc, oneshot};

use crate::{
    config::{ConfigError, EngineConfig},
    domain::{
        ConnectError, DisplayName, Envelope, EnvelopeKind, EventPublisher, Identity, LeaveReason,
        MembershipEvent, Notice, OutboundFrame, RoomId, RoomName, RouteError, SessionId, UserId,
    },
    infrastructure::dto::conversion::encode_notice,
};

use super::{
    room::{Member, RoomHandle},
    session::Session,
};

/// Identifies one membership edge.
///
/// Rooms report evictions with the edge they evicted, so the manager can
/// tell a stale report from one about the current membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EdgeId(pub(crate) u64);

#[derive(Debug)]
pub(crate) enum ManagerCommand {
    Connect {
        identity: Identity,
        reply: oneshot::Sender<Result<Session, ConnectError>>,
    },
    Route {
        session: SessionId,
        envelope: Envelope,
    },
    Disconnect {
        user_id: UserId,
        session: SessionId,
    },
    Evicted {
        room_id: RoomId,
        user_id: UserId,
        edge: EdgeId,
    },
    Snapshot {
        reply: oneshot::Sender<GraphSnapshot>,
    },
}

/// Point-in-time copy of the membership graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSnapshot {
    /// Sorted by room name
    pub rooms: Vec<RoomSnapshot>,
    /// Sorted by user id
    pub connections: Vec<ConnectionSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub name: RoomName,
    pub is_default: bool,
    /// Sorted member user ids
    pub members: Vec<UserId>,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    pub user_id: UserId,
    pub name: DisplayName,
    /// Sorted ids of the rooms this connection belongs to
    pub rooms: Vec<RoomId>,
    pub connected_at: i64,
}

impl GraphSnapshot {
    pub fn room(&self, room_id: &RoomId) -> Option<&RoomSnapshot> {
        self.rooms.iter().find(|room| &room.id == room_id)
    }

    pub fn room_by_name(&self, name: &str) -> Option<&RoomSnapshot> {
        self.rooms.iter().find(|room| room.name.as_str() == name)
    }

    pub fn connection(&self, user_id: &UserId) -> Option<&ConnectionSnapshot> {
        self.connections
            .iter()
            .find(|connection| &connection.user_id == user_id)
    }

    /// `C ∈ members(R)` if and only if `R ∈ rooms(C)`, and no side refers
    /// to a room or connection that does not exist.
    pub fn is_symmetric(&self) -> bool {
        let room_side = self.rooms.iter().all(|room| {
            room.members.iter().all(|user_id| {
                self.connection(user_id)
                    .is_some_and(|connection| connection.rooms.contains(&room.id))
            })
        });
        let connection_side = self.connections.iter().all(|connection| {
            connection.rooms.iter().all(|room_id| {
                self.room(room_id)
                    .is_some_and(|room| room.members.contains(&connection.user_id))
            })
        });
        room_side && connection_side
    }
}

/// Handle to the manager actor, cloned into every connection.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    tx: mpsc::Sender<ManagerCommand>,
}

impl ManagerHandle {
    /// Accept an authenticated identity: reject it if it already holds a
    /// live connection, otherwise register it and join the default room.
    pub async fn connect(
        &self,
        user_id: UserId,
        name: DisplayName,
    ) -> Result<Session, ConnectError> {
        let (reply, rx) = oneshot::channel();
        let identity = Identity { user_id, name };
        self.tx
            .send(ManagerCommand::Connect { identity, reply })
            .await
            .map_err(|_| ConnectError::EngineUnavailable)?;
        rx.await.map_err(|_| ConnectError::EngineUnavailable)?
    }

    /// Hand an inbound envelope to the manager.
    ///
    /// Returns `false` once the manager has stopped.
    pub async fn route(&self, session: SessionId, envelope: Envelope) -> bool {
        self.tx
            .send(ManagerCommand::Route { session, envelope })
            .await
            .is_ok()
    }

    /// Remove every membership of the connection. Repeated or stale calls
    /// are no-ops.
    pub async fn disconnect(&self, user_id: UserId, session: SessionId) {
        if self
            .tx
            .send(ManagerCommand::Disconnect { user_id, session })
            .await
            .is_err()
        {
            tracing::debug!("Manager already stopped, skipping disconnect");
        }
    }

    /// Copy of the current graph, or `None` if the manager has stopped.
    pub async fn snapshot(&self) -> Option<GraphSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(ManagerCommand::Snapshot { reply }).await.ok()?;
        rx.await.ok()
    }
}

struct RoomEntry {
    name: RoomName,
    created_at: i64,
    members: HashSet<UserId>,
    handle: RoomHandle,
}

struct ConnectionEntry {
    session: SessionId,
    identity: Identity,
    connected_at: i64,
    outbound: mpsc::Sender<OutboundFrame>,
    rooms: HashMap<RoomId, EdgeId>,
}

pub struct Manager {
    rooms: HashMap<RoomId, RoomEntry>,
    room_names: HashMap<RoomName, RoomId>,
    connections: HashMap<UserId, ConnectionEntry>,
    default_room: RoomId,
    next_edge: u64,
    outbound_capacity: usize,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<MembershipEvent>,
    inbox: mpsc::Receiver<ManagerCommand>,
    weak_tx: mpsc::WeakSender<ManagerCommand>,
}

impl Manager {
    /// Start the manager, its default room and the event forwarding task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<ManagerHandle, ConfigError> {
        config.validate()?;
        let default_name = RoomName::parse(&config.default_room_name)?;
        let default_room = RoomId::new(default_name.as_str().to_string())?;

        let (tx, inbox) = mpsc::channel(config.manager_capacity);
        let (events, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_events(event_rx, publisher));

        let mut manager = Self {
            rooms: HashMap::new(),
            room_names: HashMap::new(),
            connections: HashMap::new(),
            default_room: default_room.clone(),
            next_edge: 0,
            outbound_capacity: config.outbound_capacity,
            clock,
            events,
            inbox,
            weak_tx: tx.downgrade(),
        };
        manager.create_room(default_room, default_name);
        tokio::spawn(manager.run());

        Ok(ManagerHandle { tx })
    }

    async fn run(mut self) {
        tracing::info!("Room manager started");
        while let Some(command) = self.inbox.recv().await {
            self.handle(command);
        }
        tracing::info!("Room manager stopped");
    }

    fn handle(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Connect { identity, reply } => {
                let result = self.connect(identity);
                if let Err(Ok(session)) = reply.send(result) {
                    // the caller gave up waiting; undo the registration
                    self.disconnect(&session.identity.user_id, session.id);
                }
            }
            ManagerCommand::Route { session, envelope } => self.route(session, envelope),
            ManagerCommand::Disconnect { user_id, session } => self.disconnect(&user_id, session),
            ManagerCommand::Evicted {
                room_id,
                user_id,
                edge,
            } => self.evicted(&room_id, &user_id, edge),
            ManagerCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn connect(&mut self, identity: Identity) -> Result<Session, ConnectError> {
        if self.connections.contains_key(&identity.user_id) {
            tracing::warn!(
                "User '{}' is already connected. Rejecting connection.",
                identity.user_id
            );
            return Err(ConnectError::DuplicateUser(identity.user_id));
        }

        let (outbound, rx) = mpsc::channel(self.outbound_capacity);
        let session = SessionId::generate();
        let connected_at = self.clock.now_millis();
        let user_id = identity.user_id.clone();
        self.connections.insert(
            user_id.clone(),
            ConnectionEntry {
                session,
                identity: identity.clone(),
                connected_at,
                outbound,
                rooms: HashMap::new(),
            },
        );

        let default_room = self.default_room.clone();
        self.join(&user_id, &default_room);
        tracing::info!("User '{}' connected (session {})", user_id, session);

        Ok(Session {
            id: session,
            identity,
            connected_at,
            outbound: rx,
        })
    }

    fn disconnect(&mut self, user_id: &UserId, session: SessionId) {
        let is_current = self
            .connections
            .get(user_id)
            .is_some_and(|connection| connection.session == session);
        if !is_current {
            tracing::debug!(
                "Ignoring disconnect of '{}' for stale session {}",
                user_id,
                session
            );
            return;
        }
        let Some(connection) = self.connections.remove(user_id) else {
            return;
        };

        for (room_id, edge) in connection.rooms {
            if let Some(room) = self.rooms.get_mut(&room_id) {
                room.members.remove(user_id);
                room.handle.unregister(user_id.clone(), edge);
            }
            self.publish(MembershipEvent::MemberLeft {
                room_id: room_id.clone(),
                user_id: user_id.clone(),
            });
            self.reclaim_if_empty(&room_id);
        }
        // `connection.outbound` is dropped here; the queue closes once the
        // rooms have processed their unregisters and released their senders.
        tracing::info!("User '{}' disconnected and removed from all rooms", user_id);
    }

    fn route(&mut self, session: SessionId, envelope: Envelope) {
        let from = match self.connections.get(&envelope.from.user_id) {
            Some(connection) if connection.session == session => connection.identity.clone(),
            _ => {
                tracing::debug!(
                    "Dropping {:?} from '{}': connection is gone",
                    envelope.kind,
                    envelope.from.user_id
                );
                return;
            }
        };

        let kind = envelope.kind;
        let result = match kind {
            EnvelopeKind::Broadcast => self.broadcast(&from, envelope.room_id, envelope.body),
            EnvelopeKind::CreateRoom => self.create_and_join(&from.user_id, envelope.body),
            EnvelopeKind::JoinRoom => self.join_existing(&from.user_id, envelope.room_id),
            EnvelopeKind::LeaveRoom => self.leave_room(&from.user_id, envelope.room_id),
            EnvelopeKind::LeaveAll => {
                self.leave_all(&from.user_id);
                Ok(())
            }
        };

        if let Err(error) = result {
            tracing::warn!("Dropping {:?} from '{}': {}", kind, from.user_id, error);
            self.notify(
                &from.user_id,
                &Notice::Rejected {
                    room_id: error.room_id().cloned(),
                    reason: error.to_string(),
                },
            );
        }
    }

    fn broadcast(
        &self,
        from: &Identity,
        room_id: Option<RoomId>,
        body: Option<String>,
    ) -> Result<(), RouteError> {
        let room_id = room_id.ok_or(RouteError::MissingRoomId)?;
        let Some(room) = self.rooms.get(&room_id) else {
            return Err(RouteError::UnknownRoom(room_id));
        };
        if !room.members.contains(&from.user_id) {
            return Err(RouteError::NotAMember(room_id));
        }
        let body = body.ok_or(RouteError::MissingBody)?;

        let notice = Notice::Message {
            room_id: room_id.clone(),
            from: from.clone(),
            body,
        };
        match encode_notice(&notice) {
            Ok(frame) => {
                tracing::debug!("Broadcasting from '{}' to room '{}'", from.user_id, room_id);
                room.handle.deliver(frame);
            }
            Err(e) => tracing::error!("Failed to encode broadcast for '{}': {}", room_id, e),
        }
        Ok(())
    }

    /// Create the named room unless it exists, then join it.
    fn create_and_join(&mut self, user_id: &UserId, body: Option<String>) -> Result<(), RouteError> {
        let name = body.ok_or(RouteError::MissingRoomName)?;
        let name = RoomName::parse(&name)?;
        let room_id = match self.room_names.get(&name) {
            Some(room_id) => {
                tracing::debug!("Room '{}' already exists, reusing {}", name, room_id);
                self.ensure_not_rejoining_default(user_id, room_id)?;
                room_id.clone()
            }
            None => {
                let room_id = RoomId::generate();
                self.create_room(room_id.clone(), name);
                room_id
            }
        };
        self.join(user_id, &room_id);
        Ok(())
    }

    fn join_existing(&mut self, user_id: &UserId, room_id: Option<RoomId>) -> Result<(), RouteError> {
        let room_id = room_id.ok_or(RouteError::MissingRoomId)?;
        if !self.rooms.contains_key(&room_id) {
            return Err(RouteError::UnknownRoom(room_id));
        }
        self.ensure_not_rejoining_default(user_id, &room_id)?;
        self.join(user_id, &room_id);
        Ok(())
    }

    /// The default room is joined on connect only; once left, it stays left
    /// for the rest of the connection.
    fn ensure_not_rejoining_default(
        &self,
        user_id: &UserId,
        room_id: &RoomId,
    ) -> Result<(), RouteError> {
        if room_id != &self.default_room {
            return Ok(());
        }
        let is_member = self
            .connections
            .get(user_id)
            .is_some_and(|connection| connection.rooms.contains_key(room_id));
        if is_member {
            Ok(())
        } else {
            Err(RouteError::DefaultRoomRejoin(room_id.clone()))
        }
    }

    fn leave_room(&mut self, user_id: &UserId, room_id: Option<RoomId>) -> Result<(), RouteError> {
        let room_id = room_id.ok_or(RouteError::MissingRoomId)?;
        if !self.rooms.contains_key(&room_id) {
            return Err(RouteError::UnknownRoom(room_id));
        }
        if !self.leave(user_id, &room_id, LeaveReason::Left) {
            return Err(RouteError::NotAMember(room_id));
        }
        Ok(())
    }

    fn leave_all(&mut self, user_id: &UserId) {
        let room_ids: Vec<RoomId> = self
            .connections
            .get(user_id)
            .map(|connection| connection.rooms.keys().cloned().collect())
            .unwrap_or_default();
        for room_id in room_ids {
            self.leave(user_id, &room_id, LeaveReason::Left);
        }
    }

    fn evicted(&mut self, room_id: &RoomId, user_id: &UserId, edge: EdgeId) {
        let is_current = self
            .connections
            .get(user_id)
            .and_then(|connection| connection.rooms.get(room_id))
            .is_some_and(|current| *current == edge);
        if is_current {
            tracing::warn!("User '{}' evicted from room '{}' (slow consumer)", user_id, room_id);
            self.leave(user_id, room_id, LeaveReason::Evicted);
        }
    }

    fn create_room(&mut self, room_id: RoomId, name: RoomName) {
        let (handle, _task) = RoomHandle::spawn(room_id.clone(), self.weak_tx.clone());
        self.rooms.insert(
            room_id.clone(),
            RoomEntry {
                name: name.clone(),
                created_at: self.clock.now_millis(),
                members: HashSet::new(),
                handle,
            },
        );
        self.room_names.insert(name.clone(), room_id.clone());
        tracing::info!("Room '{}' created with id {}", name, room_id);
        self.publish(MembershipEvent::RoomCreated { room_id, name });
    }

    /// Add the edge on both sides. Joining twice is a no-op apart from the
    /// confirmation notice.
    fn join(&mut self, user_id: &UserId, room_id: &RoomId) {
        let (Some(connection), Some(room)) =
            (self.connections.get_mut(user_id), self.rooms.get_mut(room_id))
        else {
            return;
        };

        let room_name = room.name.as_str().to_string();
        let is_new = !connection.rooms.contains_key(room_id);
        if is_new {
            let edge = EdgeId(self.next_edge);
            self.next_edge += 1;
            connection.rooms.insert(room_id.clone(), edge);
            room.members.insert(user_id.clone());
            room.handle.register(Member {
                user_id: user_id.clone(),
                edge,
                outbound: connection.outbound.clone(),
            });
        }

        if is_new {
            tracing::debug!("User '{}' joined room '{}'", user_id, room_id);
            self.publish(MembershipEvent::MemberJoined {
                room_id: room_id.clone(),
                user_id: user_id.clone(),
            });
        }
        self.notify(
            user_id,
            &Notice::Joined {
                room_id: room_id.clone(),
                room_name,
            },
        );
    }

    /// Remove the edge on both sides; `false` if there was none.
    fn leave(&mut self, user_id: &UserId, room_id: &RoomId, reason: LeaveReason) -> bool {
        let Some(edge) = self
            .connections
            .get_mut(user_id)
            .and_then(|connection| connection.rooms.remove(room_id))
        else {
            return false;
        };
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.members.remove(user_id);
            room.handle.unregister(user_id.clone(), edge);
        }

        tracing::debug!("User '{}' left room '{}' ({:?})", user_id, room_id, reason);
        self.publish(MembershipEvent::MemberLeft {
            room_id: room_id.clone(),
            user_id: user_id.clone(),
        });
        self.notify(
            user_id,
            &Notice::Left {
                room_id: room_id.clone(),
                reason,
            },
        );
        self.reclaim_if_empty(room_id);
        true
    }

    /// Drop an empty room other than the default one. The actor stops once
    /// it has drained its inbox.
    fn reclaim_if_empty(&mut self, room_id: &RoomId) {
        if room_id == &self.default_room {
            return;
        }
        let is_empty = self
            .rooms
            .get(room_id)
            .is_some_and(|room| room.members.is_empty());
        if !is_empty {
            return;
        }
        if let Some(room) = self.rooms.remove(room_id) {
            self.room_names.remove(&room.name);
            tracing::info!("Room '{}' ({}) is empty, reclaimed", room.name, room_id);
        }
    }

    /// Best-effort notice to one connection; never waits.
    fn notify(&self, user_id: &UserId, notice: &Notice) {
        let Some(connection) = self.connections.get(user_id) else {
            return;
        };
        let frame = match encode_notice(notice) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to encode notice for '{}': {}", user_id, e);
                return;
            }
        };
        if let Err(e) = connection.outbound.try_send(frame) {
            tracing::debug!("Dropping notice for '{}': {}", user_id, e);
        }
    }

    fn publish(&self, event: MembershipEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Event forwarder stopped, dropping membership event");
        }
    }

    fn snapshot(&self) -> GraphSnapshot {
        let mut rooms: Vec<RoomSnapshot> = self
            .rooms
            .iter()
            .map(|(room_id, room)| {
                let mut members: Vec<UserId> = room.members.iter().cloned().collect();
                members.sort();
                RoomSnapshot {
                    id: room_id.clone(),
                    name: room.name.clone(),
                    is_default: room_id == &self.default_room,
                    members,
                    created_at: room.created_at,
                }
            })
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));

        let mut connections: Vec<ConnectionSnapshot> = self
            .connections
            .iter()
            .map(|(user_id, connection)| {
                let mut rooms: Vec<RoomId> = connection.rooms.keys().cloned().collect();
                rooms.sort();
                ConnectionSnapshot {
                    user_id: user_id.clone(),
                    name: connection.identity.name.clone(),
                    rooms,
                    connected_at: connection.connected_at,
                }
            })
            .collect();
        connections.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        GraphSnapshot { rooms, connections }
    }
}

/// Drain membership events into the publisher, in order.
async fn forward_events(
    mut events: mpsc::UnboundedReceiver<MembershipEvent>,
    publisher: Arc<dyn EventPublisher>,
) {
    while let Some(event) = events.recv().await {
        publisher.publish(event).await;
    }
}
