use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;
use tokio::sync::RwLock;

use crate::clock::now_millis;
use crate::dispatch::{Dispatcher, PRESENCE_TOPIC};
use crate::messages::ServerMessage;

#[derive(Default)]
struct PresenceState {
    online: HashSet<String>,
    last_seen: HashMap<String, i64>,
}

/// Tracks who is connected right now and when everyone else was last seen.
/// A username is in at most one of the two sets.
pub struct PresenceTracker {
    dispatcher: Arc<Dispatcher>,
    state: RwLock<PresenceState>,
}

impl PresenceTracker {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        PresenceTracker {
            dispatcher,
            state: RwLock::new(PresenceState::default()),
        }
    }

    /// Adds the user to the online set, announces the transition on the
    /// presence topic and replays the full presence state to the
    /// connecting user so the client starts from a complete picture.
    pub async fn mark_online(&self, username: &str) {
        {
            let mut state = self.state.write().await;
            state.online.insert(username.to_string());
            state.last_seen.remove(username);
        }

        self.dispatcher
            .publish(PRESENCE_TOPIC, &online_event(username))
            .await;

        let snapshot: Vec<ServerMessage> = {
            let state = self.state.read().await;
            state
                .online
                .iter()
                .map(|online_username| online_event(online_username))
                .chain(state.last_seen.iter().map(|(offline_username, at)| {
                    offline_event(offline_username, *at)
                }))
                .collect()
        };
        for event in &snapshot {
            self.dispatcher.send_to_user(username, event).await;
        }
    }

    pub async fn mark_offline(&self, username: &str) {
        let last_seen_at = now_millis();
        {
            let mut state = self.state.write().await;
            state.online.remove(username);
            state.last_seen.insert(username.to_string(), last_seen_at);
        }
        self.dispatcher
            .publish(PRESENCE_TOPIC, &offline_event(username, last_seen_at))
            .await;
    }

    /// Disconnect path: only users still flagged online get a last-seen
    /// stamp and an announcement, so an explicit offline beforehand does
    /// not produce a second one.
    pub async fn handle_disconnect(&self, username: &str) {
        let last_seen_at = now_millis();
        {
            let mut state = self.state.write().await;
            if !state.online.remove(username) {
                return;
            }
            state.last_seen.insert(username.to_string(), last_seen_at);
        }
        self.dispatcher
            .publish(PRESENCE_TOPIC, &offline_event(username, last_seen_at))
            .await;
    }

    /// A user counts as online only while the dispatcher still holds a live
    /// connection for them; a stale entry is healed on the spot.
    pub async fn is_online(&self, username: &str) -> bool {
        if !self.state.read().await.online.contains(username) {
            return false;
        }
        if self.dispatcher.has_user(username).await {
            return true;
        }

        debug!("healing stale online entry for {username}");
        let mut state = self.state.write().await;
        state.online.remove(username);
        state.last_seen.insert(username.to_string(), now_millis());
        false
    }
}

fn online_event(username: &str) -> ServerMessage {
    ServerMessage::UserStatus {
        username: username.to_string(),
        status: "online".to_string(),
        last_seen_at: None,
    }
}

fn offline_event(username: &str, last_seen_at: i64) -> ServerMessage {
    ServerMessage::UserStatus {
        username: username.to_string(),
        status: "offline".to_string(),
        last_seen_at: Some(last_seen_at),
    }
}
