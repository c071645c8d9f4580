//! Room transport.
//!
//! The core only needs three primitives from the real-time room it runs
//! in: broadcast, targeted send and room teardown. [`RoomTransport`] is that
//! seam. [`LocalRoom`] is an in-process room used by the CLI and tests:
//! each member gets its own unbounded inbox, broadcasts fan out to every
//! member except the sender, and payloads travel JSON-encoded like they
//! would over a data channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::agent::AgentRole;
use crate::error::DebateError;
use crate::message::DebateMessage;

/// A payload as delivered to a room member.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Identity of the sending member.
    pub from: String,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn decode(&self) -> Result<DebateMessage, DebateError> {
        DebateMessage::decode(&self.payload)
    }
}

pub type Inbox = mpsc::UnboundedReceiver<Envelope>;

#[async_trait]
pub trait RoomTransport: Send + Sync {
    /// Deliver to every other member.
    async fn broadcast(&self, message: &DebateMessage) -> Result<(), DebateError>;

    /// Deliver to a single member, if present.
    async fn send(&self, message: &DebateMessage, to: AgentRole) -> Result<(), DebateError>;

    /// Tear the room down, disconnecting every member.
    async fn delete_room(&self) -> Result<(), DebateError>;
}

pub struct LocalRoom {
    name: String,
    members: Mutex<HashMap<String, mpsc::UnboundedSender<Envelope>>>,
    closed: AtomicBool,
}

impl LocalRoom {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            members: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Join under `identity`. A second join with the same identity replaces
    /// the first member's inbox.
    pub fn join(self: &Arc<Self>, identity: impl Into<String>) -> (RoomConnection, Inbox) {
        let identity = identity.into();
        let (tx, rx) = mpsc::unbounded_channel();
        if !self.is_closed() {
            self.members().insert(identity.clone(), tx);
        }
        debug!(room = %self.name, member = %identity, "Member joined");
        (
            RoomConnection {
                identity,
                room: Arc::clone(self),
            },
            rx,
        )
    }

    /// Deliver a raw payload. `to: None` broadcasts to everyone but `from`.
    pub fn deliver(&self, from: &str, to: Option<&str>, payload: Vec<u8>) -> Result<(), DebateError> {
        if self.is_closed() {
            return Err(DebateError::RoomClosed(self.name.clone()));
        }
        let mut members = self.members();
        match to {
            Some(target) => {
                let disconnected = match members.get(target) {
                    Some(tx) => tx
                        .send(Envelope {
                            from: from.to_string(),
                            payload,
                        })
                        .is_err(),
                    None => {
                        debug!(room = %self.name, member = target, "Dropping message for absent member");
                        false
                    }
                };
                if disconnected {
                    members.remove(target);
                }
            }
            None => {
                members.retain(|identity, tx| {
                    identity == from
                        || tx
                            .send(Envelope {
                                from: from.to_string(),
                                payload: payload.clone(),
                            })
                            .is_ok()
                });
            }
        }
        Ok(())
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.members().clear();
            info!(room = %self.name, "Room deleted");
        }
    }

    fn members(&self) -> MutexGuard<'_, HashMap<String, mpsc::UnboundedSender<Envelope>>> {
        self.members.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A member's handle on a [`LocalRoom`].
#[derive(Clone)]
pub struct RoomConnection {
    identity: String,
    room: Arc<LocalRoom>,
}

impl RoomConnection {
    pub fn room(&self) -> &Arc<LocalRoom> {
        &self.room
    }
}

#[async_trait]
impl RoomTransport for RoomConnection {
    async fn broadcast(&self, message: &DebateMessage) -> Result<(), DebateError> {
        self.room.deliver(&self.identity, None, message.encode()?)
    }

    async fn send(&self, message: &DebateMessage, to: AgentRole) -> Result<(), DebateError> {
        self.room
            .deliver(&self.identity, Some(&to.identity()), message.encode()?)
    }

    async fn delete_room(&self) -> Result<(), DebateError> {
        self.room.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::DebaterId;

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let room = LocalRoom::new("room-bcast");
        let (moderator, mut moderator_inbox) = room.join("moderator");
        let (_judge, mut judge_inbox) = room.join("judge");

        moderator
            .broadcast(&DebateMessage::announcement("Welcome"))
            .await
            .unwrap();

        let envelope = judge_inbox.recv().await.unwrap();
        assert_eq!(envelope.from, "moderator");
        assert_eq!(envelope.decode().unwrap(), DebateMessage::announcement("Welcome"));
        assert!(moderator_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_targeted_send() {
        let room = LocalRoom::new("room-send");
        let (moderator, _) = room.join("moderator");
        let (_c, mut c_inbox) = room.join("debater_c");
        let (_d, mut d_inbox) = room.join("debater_d");

        moderator
            .send(&DebateMessage::SetSpeaking { can_speak: true }, AgentRole::Debater(DebaterId::C))
            .await
            .unwrap();
        // Absent members are skipped silently.
        moderator
            .send(&DebateMessage::SetSpeaking { can_speak: true }, AgentRole::Debater(DebaterId::B))
            .await
            .unwrap();

        assert_eq!(
            c_inbox.recv().await.unwrap().decode().unwrap(),
            DebateMessage::SetSpeaking { can_speak: true }
        );
        assert!(d_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_delete_disconnects_members() {
        let room = LocalRoom::new("room-delete");
        let (judge, _) = room.join("judge");
        let (_audience, mut audience_inbox) = room.join("audience");

        judge.delete_room().await.unwrap();

        assert!(audience_inbox.recv().await.is_none());
        assert!(matches!(
            judge.broadcast(&DebateMessage::announcement("late")).await,
            Err(DebateError::RoomClosed(_))
        ));
    }
}
