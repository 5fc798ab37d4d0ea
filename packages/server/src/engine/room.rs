//! Room actor: owns one room's member set and fans frames out to it.
//!
//! All mutations of the member set happen inside the actor loop, one
//! command at a time, so a member that has been unregistered never sees a
//! frame delivered after the unregister was processed.

use std::collections::HashMap;

use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
};

use crate::domain::{OutboundFrame, RoomId, UserId};

use super::manager::{EdgeId, ManagerCommand};

/// A member as seen by the room: who it is and where its frames go.
#[derive(Debug, Clone)]
pub(crate) struct Member {
    pub user_id: UserId,
    pub edge: EdgeId,
    pub outbound: mpsc::Sender<OutboundFrame>,
}

#[derive(Debug)]
pub(crate) enum RoomCommand {
    Register(Member),
    Unregister {
        user_id: UserId,
        edge: EdgeId,
    },
    Deliver(OutboundFrame),
    #[cfg(test)]
    Members(tokio::sync::oneshot::Sender<Vec<UserId>>),
}

/// Cheap handle used by the manager to talk to a room actor.
///
/// The inbox is unbounded so the manager never waits on a busy room.
/// Dropping the last handle stops the actor once its inbox is drained.
#[derive(Debug)]
pub(crate) struct RoomHandle {
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    /// Spawn the actor for `room_id`.
    ///
    /// Evictions are reported back through `manager`, a weak sender so the
    /// rooms do not keep the manager alive.
    pub fn spawn(
        room_id: RoomId,
        manager: mpsc::WeakSender<ManagerCommand>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = RoomActor {
            room_id,
            members: HashMap::new(),
            inbox: rx,
            manager,
        };
        let task = tokio::spawn(actor.run());
        (Self { tx }, task)
    }

    pub fn register(&self, member: Member) {
        self.send(RoomCommand::Register(member));
    }

    pub fn unregister(&self, user_id: UserId, edge: EdgeId) {
        self.send(RoomCommand::Unregister { user_id, edge });
    }

    pub fn deliver(&self, frame: OutboundFrame) {
        self.send(RoomCommand::Deliver(frame));
    }

    #[cfg(test)]
    pub async fn members(&self) -> Vec<UserId> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.send(RoomCommand::Members(reply));
        rx.await.unwrap_or_default()
    }

    fn send(&self, command: RoomCommand) {
        if self.tx.send(command).is_err() {
            tracing::warn!("Room actor is gone, dropping command");
        }
    }
}

struct RoomActor {
    room_id: RoomId,
    members: HashMap<UserId, Member>,
    inbox: mpsc::UnboundedReceiver<RoomCommand>,
    manager: mpsc::WeakSender<ManagerCommand>,
}

impl RoomActor {
    async fn run(mut self) {
        tracing::debug!("Room '{}' started", self.room_id);
        while let Some(command) = self.inbox.recv().await {
            match command {
                RoomCommand::Register(member) => self.register(member),
                RoomCommand::Unregister { user_id, edge } => self.unregister(&user_id, edge),
                RoomCommand::Deliver(frame) => self.deliver(frame).await,
                #[cfg(test)]
                RoomCommand::Members(reply) => {
                    let mut members: Vec<UserId> = self.members.keys().cloned().collect();
                    members.sort();
                    let _ = reply.send(members);
                }
            }
        }
        tracing::debug!("Room '{}' stopped", self.room_id);
    }

    fn register(&mut self, member: Member) {
        match self.members.get(&member.user_id) {
            Some(existing) if existing.edge == member.edge => {}
            _ => {
                tracing::debug!("Room '{}': registered '{}'", self.room_id, member.user_id);
                self.members.insert(member.user_id.clone(), member);
            }
        }
    }

    fn unregister(&mut self, user_id: &UserId, edge: EdgeId) {
        // a newer membership of the same user must survive a stale unregister
        if self
            .members
            .get(user_id)
            .is_some_and(|member| member.edge == edge)
        {
            self.members.remove(user_id);
            tracing::debug!("Room '{}': unregistered '{}'", self.room_id, user_id);
        }
    }

    async fn deliver(&mut self, frame: OutboundFrame) {
        let mut failed = Vec::new();
        for member in self.members.values() {
            match member.outbound.try_send(frame.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(
                        "Room '{}': outbound queue of '{}' is full, evicting",
                        self.room_id,
                        member.user_id
                    );
                    failed.push((member.user_id.clone(), member.edge));
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(
                        "Room '{}': outbound queue of '{}' is closed, evicting",
                        self.room_id,
                        member.user_id
                    );
                    failed.push((member.user_id.clone(), member.edge));
                }
            }
        }

        for (user_id, edge) in failed {
            self.members.remove(&user_id);
            self.report_eviction(user_id, edge).await;
        }
    }

    async fn report_eviction(&self, user_id: UserId, edge: EdgeId) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        let command = ManagerCommand::Evicted {
            room_id: self.room_id.clone(),
            user_id,
            edge,
        };
        if manager.send(command).await.is_err() {
            tracing::debug!("Manager stopped before eviction from '{}' was reported", self.room_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserId {
        UserId::new(id.to_string()).unwrap()
    }

    fn member(id: &str, edge: u64, capacity: usize) -> (Member, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Member {
                user_id: user(id),
                edge: EdgeId(edge),
                outbound: tx,
            },
            rx,
        )
    }

    struct TestRoom {
        room: RoomHandle,
        // keeps the weak sender held by the actor upgradable
        _manager_tx: mpsc::Sender<ManagerCommand>,
        manager_rx: mpsc::Receiver<ManagerCommand>,
    }

    fn spawn_room() -> TestRoom {
        let (manager_tx, manager_rx) = mpsc::channel(16);
        let (room, _task) = RoomHandle::spawn(
            RoomId::new("lobby".to_string()).unwrap(),
            manager_tx.downgrade(),
        );
        TestRoom {
            room,
            _manager_tx: manager_tx,
            manager_rx,
        }
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        // テスト項目: 同じメンバーを二度登録しても一人として扱われる
        // given (前提条件):
        let TestRoom { room, .. } = spawn_room();
        let (alice, _rx) = member("alice", 1, 4);

        // when (操作):
        room.register(alice.clone());
        room.register(alice);

        // then (期待する結果):
        assert_eq!(room.members().await, vec![user("alice")]);
    }

    #[tokio::test]
    async fn test_deliver_fans_out_to_every_member() {
        // テスト項目: 配信したフレームが全メンバーの送信キューに入る
        // given (前提条件):
        let TestRoom { room, .. } = spawn_room();
        let (alice, mut alice_rx) = member("alice", 1, 4);
        let (bob, mut bob_rx) = member("bob", 2, 4);
        room.register(alice);
        room.register(bob);

        // when (操作):
        room.deliver(OutboundFrame::from("hello"));

        // then (期待する結果):
        assert_eq!(alice_rx.recv().await.as_deref(), Some("hello"));
        assert_eq!(bob_rx.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        // テスト項目: 登録解除後に配信されたフレームは届かない
        // given (前提条件):
        let TestRoom { room, .. } = spawn_room();
        let (alice, mut alice_rx) = member("alice", 1, 4);
        let (bob, mut bob_rx) = member("bob", 2, 4);
        room.register(alice);
        room.register(bob);

        // when (操作):
        room.unregister(user("bob"), EdgeId(2));
        room.deliver(OutboundFrame::from("after"));

        // then (期待する結果):
        assert_eq!(alice_rx.recv().await.as_deref(), Some("after"));
        assert_eq!(room.members().await, vec![user("alice")]);
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_unregister_keeps_newer_membership() {
        // テスト項目: 古い edge の登録解除では新しいメンバーシップは消えない
        // given (前提条件):
        let TestRoom { room, .. } = spawn_room();
        let (alice, _rx) = member("alice", 7, 4);
        room.register(alice);

        // when (操作):
        room.unregister(user("alice"), EdgeId(3));

        // then (期待する結果):
        assert_eq!(room.members().await, vec![user("alice")]);
    }

    #[tokio::test]
    async fn test_full_queue_evicts_only_slow_member() {
        // テスト項目: 送信キューが満杯のメンバーだけが退出させられ、他のメンバーには届く
        // given (前提条件):
        let TestRoom {
            room,
            _manager_tx: _manager,
            mut manager_rx,
        } = spawn_room();
        let (alice, mut alice_rx) = member("alice", 1, 4);
        let (slow, _slow_rx) = member("slow", 2, 1);
        slow.outbound.try_send(OutboundFrame::from("backlog")).unwrap();
        room.register(alice);
        room.register(slow);

        // when (操作):
        room.deliver(OutboundFrame::from("hello"));

        // then (期待する結果):
        assert_eq!(alice_rx.recv().await.as_deref(), Some("hello"));
        match manager_rx.recv().await {
            Some(ManagerCommand::Evicted {
                room_id,
                user_id,
                edge,
            }) => {
                assert_eq!(room_id.as_str(), "lobby");
                assert_eq!(user_id, user("slow"));
                assert_eq!(edge, EdgeId(2));
            }
            other => panic!("unexpected manager command: {:?}", other),
        }
        assert_eq!(room.members().await, vec![user("alice")]);
    }

    #[tokio::test]
    async fn test_room_stops_when_handle_dropped() {
        // テスト項目: ハンドルを破棄するとアクターが終了する
        // given (前提条件):
        let (manager_tx, _manager_rx) = mpsc::channel(1);
        let (room, task) = RoomHandle::spawn(
            RoomId::new("temp".to_string()).unwrap(),
            manager_tx.downgrade(),
        );

        // when (操作):
        drop(room);

        // then (期待する結果):
        assert!(task.await.is_ok());
    }
}
