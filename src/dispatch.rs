//! Fan-out primitive shared by the presence, chat and game subsystems.
//!
//! Two addressing modes: a topic reaches every subscribed connection, a
//! private queue reaches every live connection of one username. Delivery is
//! at most once; a subscriber whose outbound queue is full loses the event.

use std::collections::{HashMap, HashSet};

use log::{debug, error, warn};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use warp::ws::Message;

use crate::messages::ServerMessage;

pub const PRESENCE_TOPIC: &str = "presence";

/// Slow clients drop events rather than stall the publisher.
const OUTBOUND_CAPACITY: usize = 256;

pub fn room_topic(room_id: &str) -> String {
    format!("room.{room_id}")
}

struct Connection {
    username: String,
    sender: mpsc::Sender<Message>,
}

#[derive(Default)]
struct Tables {
    connections: HashMap<String, Connection>,
    users: HashMap<String, HashSet<String>>,
    topics: HashMap<String, HashSet<String>>,
}

pub struct Dispatcher {
    tables: RwLock<Tables>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Registers a connection and returns the receiving end of its
    /// outbound queue. The caller owns draining it into the socket.
    pub async fn register(&self, conn_id: &str, username: &str) -> mpsc::Receiver<Message> {
        let (sender, receiver) = mpsc::channel(OUTBOUND_CAPACITY);
        let mut tables = self.tables.write().await;
        tables.connections.insert(
            conn_id.to_string(),
            Connection {
                username: username.to_string(),
                sender,
            },
        );
        tables
            .users
            .entry(username.to_string())
            .or_default()
            .insert(conn_id.to_string());
        receiver
    }

    /// Removes a connection from every table. Returns true when it was the
    /// username's last live connection.
    pub async fn unregister(&self, conn_id: &str) -> bool {
        let mut tables = self.tables.write().await;
        let Some(connection) = tables.connections.remove(conn_id) else {
            return false;
        };

        for subscribers in tables.topics.values_mut() {
            subscribers.remove(conn_id);
        }
        tables.topics.retain(|_, subscribers| !subscribers.is_empty());

        let mut last = false;
        if let Some(conns) = tables.users.get_mut(&connection.username) {
            conns.remove(conn_id);
            if conns.is_empty() {
                tables.users.remove(&connection.username);
                last = true;
            }
        }
        last
    }

    pub async fn subscribe(&self, conn_id: &str, topic: &str) {
        let mut tables = self.tables.write().await;
        tables
            .topics
            .entry(topic.to_string())
            .or_default()
            .insert(conn_id.to_string());
    }

    pub async fn unsubscribe(&self, conn_id: &str, topic: &str) {
        let mut tables = self.tables.write().await;
        if let Some(subscribers) = tables.topics.get_mut(topic) {
            subscribers.remove(conn_id);
            if subscribers.is_empty() {
                tables.topics.remove(topic);
            }
        }
    }

    pub async fn publish(&self, topic: &str, event: &ServerMessage) {
        let Some(frame) = encode(event) else {
            return;
        };
        let tables = self.tables.read().await;
        let Some(subscribers) = tables.topics.get(topic) else {
            return;
        };
        for conn_id in subscribers {
            if let Some(connection) = tables.connections.get(conn_id) {
                deliver(connection, conn_id, frame.clone());
            }
        }
    }

    pub async fn send_to_user(&self, username: &str, event: &ServerMessage) {
        let Some(frame) = encode(event) else {
            return;
        };
        let tables = self.tables.read().await;
        let Some(conn_ids) = tables.users.get(username) else {
            return;
        };
        for conn_id in conn_ids {
            if let Some(connection) = tables.connections.get(conn_id) {
                deliver(connection, conn_id, frame.clone());
            }
        }
    }

    /// Whether the username still has at least one live connection.
    pub async fn has_user(&self, username: &str) -> bool {
        self.tables.read().await.users.contains_key(username)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(event: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(text) => Some(Message::text(text)),
        Err(err) => {
            error!("failed to encode outbound event: {err}");
            None
        }
    }
}

fn deliver(connection: &Connection, conn_id: &str, frame: Message) {
    match connection.sender.try_send(frame) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(
                "outbound queue full for {} ({conn_id}), dropping event",
                connection.username
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("connection {conn_id} already closed");
        }
    }
}
