//! Direct-message routing: delivery, edits, reactions, read receipts and
//! typing relays between two users. Durability lives behind the
//! `MessageStore` boundary; this module owns validation and fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::clock::now_millis;
use crate::dispatch::Dispatcher;
use crate::messages::ServerMessage;
use crate::notify::Notifier;
use crate::presence::PresenceTracker;
use crate::store::{MessageKind, MessageStore, NewMessage, StoredMessage};

/// Senders may revise a message for fifteen minutes after creation.
pub const EDIT_WINDOW_MS: i64 = 15 * 60 * 1000;

/// Symbols, combining marks, punctuation, ZWJ and variation selector-16:
/// enough for emoji sequences while rejecting letters, digits and spaces.
static REACTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\p{S}\p{M}\p{P}\x{200D}\x{FE0F}]{1,16}$").expect("valid reaction pattern")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    #[error("Message not found.")]
    NotFound,
    #[error("You can only edit your own messages.")]
    NotAllowed,
    #[error("The edit window has passed.")]
    WindowExpired,
}

pub struct OutgoingMessage {
    pub to_username: String,
    pub body: String,
    pub temp_id: Option<String>,
    pub kind: MessageKind,
    pub file_name: Option<String>,
    pub media_url: Option<String>,
    pub mime_type: Option<String>,
    pub reply_text: Option<String>,
    pub reply_sender_name: Option<String>,
}

pub struct ChatRouter {
    dispatcher: Arc<Dispatcher>,
    presence: Arc<PresenceTracker>,
    store: Arc<dyn MessageStore>,
    notifier: Arc<dyn Notifier>,
    receipts: RwLock<HashMap<(String, String), i64>>,
    notify_even_if_online: bool,
}

impl ChatRouter {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        presence: Arc<PresenceTracker>,
        store: Arc<dyn MessageStore>,
        notifier: Arc<dyn Notifier>,
        notify_even_if_online: bool,
    ) -> Self {
        ChatRouter {
            dispatcher,
            presence,
            store,
            notifier,
            receipts: RwLock::new(HashMap::new()),
            notify_even_if_online,
        }
    }

    /// Persists and routes one direct message. Blank recipient or body is a
    /// protocol-level no-op: no error, no ack.
    pub async fn send(&self, from_username: &str, outgoing: OutgoingMessage) {
        let to_username = normalize_username(&outgoing.to_username);
        if to_username.is_empty() || outgoing.body.trim().is_empty() {
            debug!("dropping chat frame from {from_username} with blank recipient or body");
            return;
        }

        let saved = match self
            .store
            .save(NewMessage {
                from_username: from_username.to_string(),
                to_username: to_username.clone(),
                body: outgoing.body,
                kind: outgoing.kind,
                file_name: outgoing.file_name,
                media_url: outgoing.media_url,
                mime_type: outgoing.mime_type,
                reply_text: outgoing.reply_text,
                reply_sender_name: outgoing.reply_sender_name,
            })
            .await
        {
            Ok(saved) => saved,
            Err(err) => {
                error!("failed to persist message from {from_username}: {err}");
                return;
            }
        };

        self.dispatcher
            .send_to_user(&to_username, &incoming_event(&saved))
            .await;
        self.dispatcher
            .send_to_user(
                from_username,
                &ServerMessage::SendAck {
                    temp_id: outgoing.temp_id,
                    success: true,
                    message_id: saved.id,
                    created_at: saved.created_at,
                },
            )
            .await;

        if self.notify_even_if_online || !self.presence.is_online(&to_username).await {
            let notifier = self.notifier.clone();
            let title = from_username.to_string();
            let body = preview(saved.kind, &saved.body);
            let deep_link = format!("/chat?with={from_username}");
            tokio::spawn(async move {
                if let Err(err) = notifier.notify(&to_username, &title, &body, &deep_link).await {
                    warn!("push notification for {to_username} failed: {err}");
                }
            });
        }
    }

    pub async fn edit(&self, editor: &str, message_id: i64, new_body: &str) {
        self.edit_at(editor, message_id, new_body, now_millis()).await;
    }

    /// The window is measured from the creation time against the wall
    /// clock; earlier edits do not extend it.
    async fn edit_at(&self, editor: &str, message_id: i64, new_body: &str, now: i64) {
        if new_body.trim().is_empty() {
            debug!("dropping empty edit from {editor} for message {message_id}");
            return;
        }

        let found = match self.store.find_by_id(message_id).await {
            Ok(found) => found,
            Err(err) => {
                error!("edit lookup failed for message {message_id}: {err}");
                return;
            }
        };
        let Some(message) = found else {
            self.reject_edit(editor, message_id, &ChatError::NotFound).await;
            return;
        };
        if message.from_username != editor {
            self.reject_edit(editor, message_id, &ChatError::NotAllowed).await;
            return;
        }
        if now - message.created_at > EDIT_WINDOW_MS {
            self.reject_edit(editor, message_id, &ChatError::WindowExpired).await;
            return;
        }

        let edited_at = now.max(message.created_at);
        let updated = match self
            .store
            .update_body(message_id, new_body.to_string(), edited_at)
            .await
        {
            Ok(Some(updated)) => updated,
            Ok(None) => {
                self.reject_edit(editor, message_id, &ChatError::NotFound).await;
                return;
            }
            Err(err) => {
                error!("edit update failed for message {message_id}: {err}");
                return;
            }
        };

        let event = ServerMessage::MessageEdited {
            message_id,
            message: updated.body.clone(),
            edited_at,
        };
        self.dispatcher.send_to_user(&updated.from_username, &event).await;
        self.dispatcher.send_to_user(&updated.to_username, &event).await;
        self.dispatcher
            .send_to_user(
                editor,
                &ServerMessage::EditAck {
                    message_id,
                    success: true,
                    reason: None,
                },
            )
            .await;
    }

    async fn reject_edit(&self, editor: &str, message_id: i64, reason: &ChatError) {
        self.dispatcher
            .send_to_user(
                editor,
                &ServerMessage::EditAck {
                    message_id,
                    success: false,
                    reason: Some(reason.to_string()),
                },
            )
            .await;
    }

    /// Last-write-wins single reaction. Anything outside the accepted
    /// symbol class is ignored, leaving a prior reaction untouched.
    pub async fn react(&self, reactor: &str, message_id: i64, symbol: &str) {
        let symbol = symbol.trim();
        let next_reaction = if symbol.is_empty() {
            None
        } else if REACTION_PATTERN.is_match(symbol) {
            Some(symbol.to_string())
        } else {
            debug!("ignoring invalid reaction from {reactor} on message {message_id}");
            return;
        };

        let found = match self.store.find_by_id(message_id).await {
            Ok(found) => found,
            Err(err) => {
                error!("reaction lookup failed for message {message_id}: {err}");
                return;
            }
        };
        let Some(message) = found else {
            return;
        };
        if message.from_username != reactor && message.to_username != reactor {
            debug!("{reactor} is not a participant of message {message_id}");
            return;
        }

        match self.store.update_reaction(message_id, next_reaction.clone()).await {
            Ok(Some(_)) => {}
            Ok(None) => return,
            Err(err) => {
                error!("reaction update failed for message {message_id}: {err}");
                return;
            }
        }

        let event = ServerMessage::MessageReaction {
            message_id,
            reaction: next_reaction,
        };
        self.dispatcher.send_to_user(&message.from_username, &event).await;
        self.dispatcher.send_to_user(&message.to_username, &event).await;
    }

    pub async fn mark_read(&self, reader: &str, peer_username: &str, read_at: Option<i64>) {
        self.mark_read_at(reader, peer_username, read_at, now_millis())
            .await;
    }

    /// Receipts only move forward; a stale or invalid timestamp is dropped
    /// without a reply.
    async fn mark_read_at(
        &self,
        reader: &str,
        peer_username: &str,
        read_at: Option<i64>,
        now: i64,
    ) {
        let peer = normalize_username(peer_username);
        if peer.is_empty() {
            return;
        }
        let at = read_at.unwrap_or(now).min(now);
        if at <= 0 {
            return;
        }

        {
            let mut receipts = self.receipts.write().await;
            let key = (reader.to_string(), peer.clone());
            match receipts.get(&key) {
                Some(stored) if *stored >= at => return,
                _ => {
                    receipts.insert(key, at);
                }
            }
        }

        self.dispatcher
            .send_to_user(
                &peer,
                &ServerMessage::ReadReceipt {
                    reader_username: reader.to_string(),
                    peer_username: peer.clone(),
                    read_at: at,
                },
            )
            .await;
    }

    /// Replays every receipt naming this user as the peer, so a
    /// reconnecting client learns which of its messages were read.
    pub async fn replay_receipts(&self, username: &str) {
        let replayed: Vec<ServerMessage> = {
            let receipts = self.receipts.read().await;
            receipts
                .iter()
                .filter(|((_, peer), _)| peer == username)
                .map(|((reader, peer), at)| ServerMessage::ReadReceipt {
                    reader_username: reader.clone(),
                    peer_username: peer.clone(),
                    read_at: *at,
                })
                .collect()
        };
        for event in &replayed {
            self.dispatcher.send_to_user(username, event).await;
        }
    }

    /// Pure relay; nothing is stored.
    pub async fn typing(&self, from_username: &str, to_username: &str, typing: bool) {
        let to = normalize_username(to_username);
        if to.is_empty() {
            return;
        }
        self.dispatcher
            .send_to_user(
                &to,
                &ServerMessage::Typing {
                    from_username: from_username.to_string(),
                    typing,
                },
            )
            .await;
    }
}

pub fn normalize_username(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn incoming_event(saved: &StoredMessage) -> ServerMessage {
    ServerMessage::ChatMessage {
        message_id: saved.id,
        from_username: saved.from_username.clone(),
        message: saved.body.clone(),
        kind: saved.kind,
        file_name: saved.file_name.clone(),
        media_url: saved.media_url.clone(),
        mime_type: saved.mime_type.clone(),
        reply_text: saved.reply_text.clone(),
        reply_sender_name: saved.reply_sender_name.clone(),
        created_at: saved.created_at,
    }
}

fn preview(kind: MessageKind, body: &str) -> String {
    match kind {
        MessageKind::Text => body.to_string(),
        MessageKind::Image => "Sent an image".to_string(),
        MessageKind::Video => "Sent a video".to_string(),
        MessageKind::Voice => "Sent a voice message".to_string(),
        MessageKind::File => "Sent a file".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyError;
    use crate::store::InMemoryMessageStore;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use warp::ws::Message;

    struct ChannelNotifier {
        sender: mpsc::UnboundedSender<(String, String, String)>,
    }

    #[async_trait]
    impl Notifier for ChannelNotifier {
        async fn notify(
            &self,
            username: &str,
            title: &str,
            body: &str,
            _deep_link: &str,
        ) -> Result<(), NotifyError> {
            let _ = self
                .sender
                .send((username.to_string(), title.to_string(), body.to_string()));
            Ok(())
        }
    }

    struct Fixture {
        dispatcher: Arc<Dispatcher>,
        store: Arc<InMemoryMessageStore>,
        router: ChatRouter,
        notified: mpsc::UnboundedReceiver<(String, String, String)>,
    }

    fn fixture(notify_even_if_online: bool) -> Fixture {
        let dispatcher = Arc::new(Dispatcher::new());
        let presence = Arc::new(PresenceTracker::new(dispatcher.clone()));
        let store = Arc::new(InMemoryMessageStore::new());
        let (sender, notified) = mpsc::unbounded_channel();
        let router = ChatRouter::new(
            dispatcher.clone(),
            presence,
            store.clone(),
            Arc::new(ChannelNotifier { sender }),
            notify_even_if_online,
        );
        Fixture {
            dispatcher,
            store,
            router,
            notified,
        }
    }

    fn text(to: &str, body: &str) -> OutgoingMessage {
        OutgoingMessage {
            to_username: to.to_string(),
            body: body.to_string(),
            temp_id: Some("tmp-1".to_string()),
            kind: MessageKind::Text,
            file_name: None,
            media_url: None,
            mime_type: None,
            reply_text: None,
            reply_sender_name: None,
        }
    }

    async fn drain(receiver: &mut mpsc::Receiver<Message>) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = receiver.try_recv() {
            let text = frame.to_str().expect("text frame");
            frames.push(serde_json::from_str(text).expect("valid json"));
        }
        frames
    }

    #[tokio::test]
    async fn send_delivers_to_recipient_and_acks_sender() {
        let mut fx = fixture(false);
        let mut alice = fx.dispatcher.register("c1", "alice").await;
        let mut bob = fx.dispatcher.register("c2", "bob").await;

        fx.router.send("alice", text("bob", "hello")).await;

        let delivered = drain(&mut bob).await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0]["type"], "chat_message");
        assert_eq!(delivered[0]["from_username"], "alice");
        assert_eq!(delivered[0]["message"], "hello");

        let acks = drain(&mut alice).await;
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0]["type"], "send_ack");
        assert_eq!(acks[0]["temp_id"], "tmp-1");
        assert_eq!(acks[0]["success"], true);
    }

    #[tokio::test]
    async fn blank_recipient_or_body_is_a_silent_no_op() {
        let mut fx = fixture(false);
        let mut alice = fx.dispatcher.register("c1", "alice").await;

        fx.router.send("alice", text("", "hello")).await;
        fx.router.send("alice", text("bob", "   ")).await;

        assert!(drain(&mut alice).await.is_empty());
        assert!(fx
            .store
            .find_conversation("alice", "bob")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn offline_recipient_triggers_notification_with_preview() {
        let mut fx = fixture(false);
        let _alice = fx.dispatcher.register("c1", "alice").await;

        let mut outgoing = text("bob", "ignored-body");
        outgoing.kind = MessageKind::Image;
        fx.router.send("alice", outgoing).await;

        let (username, title, body) =
            tokio::time::timeout(Duration::from_secs(1), fx.notified.recv())
                .await
                .expect("notifier invoked")
                .expect("channel open");
        assert_eq!(username, "bob");
        assert_eq!(title, "alice");
        assert_eq!(body, "Sent an image");
    }

    #[tokio::test]
    async fn notify_even_if_online_policy_always_notifies() {
        let mut fx = fixture(true);
        let _bob = fx.dispatcher.register("c1", "bob").await;

        fx.router.send("alice", text("bob", "hello")).await;

        let (username, _, body) =
            tokio::time::timeout(Duration::from_secs(1), fx.notified.recv())
                .await
                .expect("notifier invoked")
                .expect("channel open");
        assert_eq!(username, "bob");
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn edit_succeeds_within_window_for_sender() {
        let mut fx = fixture(false);
        let mut alice = fx.dispatcher.register("c1", "alice").await;
        let mut bob = fx.dispatcher.register("c2", "bob").await;

        fx.router.send("alice", text("bob", "typo")).await;
        let saved = &fx.store.find_conversation("alice", "bob").await.unwrap()[0];
        drain(&mut alice).await;
        drain(&mut bob).await;

        let fourteen_minutes_later = saved.created_at + 14 * 60 * 1000;
        fx.router
            .edit_at("alice", saved.id, "fixed", fourteen_minutes_later)
            .await;

        let bob_frames = drain(&mut bob).await;
        assert_eq!(bob_frames.len(), 1);
        assert_eq!(bob_frames[0]["type"], "message_edited");
        assert_eq!(bob_frames[0]["message"], "fixed");

        let alice_frames = drain(&mut alice).await;
        assert_eq!(alice_frames.len(), 2);
        assert!(alice_frames
            .iter()
            .any(|frame| frame["type"] == "edit_ack" && frame["success"] == true));
    }

    #[tokio::test]
    async fn edit_fails_after_window() {
        let mut fx = fixture(false);
        let mut alice = fx.dispatcher.register("c1", "alice").await;

        fx.router.send("alice", text("bob", "typo")).await;
        let saved = &fx.store.find_conversation("alice", "bob").await.unwrap()[0];
        drain(&mut alice).await;

        let sixteen_minutes_later = saved.created_at + 16 * 60 * 1000;
        fx.router
            .edit_at("alice", saved.id, "late", sixteen_minutes_later)
            .await;

        let frames = drain(&mut alice).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "edit_ack");
        assert_eq!(frames[0]["success"], false);
        assert_eq!(frames[0]["reason"], "The edit window has passed.");

        let unchanged = fx.store.find_by_id(saved.id).await.unwrap().unwrap();
        assert_eq!(unchanged.body, "typo");
        assert!(!unchanged.edited);
    }

    #[tokio::test]
    async fn edit_by_another_user_is_rejected_regardless_of_timing() {
        let mut fx = fixture(false);
        let mut bob = fx.dispatcher.register("c1", "bob").await;

        fx.router.send("alice", text("bob", "original")).await;
        let saved = &fx.store.find_conversation("alice", "bob").await.unwrap()[0];
        drain(&mut bob).await;

        fx.router
            .edit_at("bob", saved.id, "hijacked", saved.created_at + 1_000)
            .await;

        let frames = drain(&mut bob).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["success"], false);
        assert_eq!(frames[0]["reason"], "You can only edit your own messages.");
    }

    #[tokio::test]
    async fn edit_of_missing_message_reports_not_found() {
        let mut fx = fixture(false);
        let mut alice = fx.dispatcher.register("c1", "alice").await;

        fx.router.edit("alice", 404, "anything").await;

        let frames = drain(&mut alice).await;
        assert_eq!(frames[0]["reason"], "Message not found.");
    }

    #[tokio::test]
    async fn valid_reaction_is_stored_and_broadcast() {
        let mut fx = fixture(false);
        let mut alice = fx.dispatcher.register("c1", "alice").await;
        let mut bob = fx.dispatcher.register("c2", "bob").await;

        fx.router.send("alice", text("bob", "hi")).await;
        let saved = &fx.store.find_conversation("alice", "bob").await.unwrap()[0];
        drain(&mut alice).await;
        drain(&mut bob).await;

        fx.router.react("bob", saved.id, "👍").await;

        let stored = fx.store.find_by_id(saved.id).await.unwrap().unwrap();
        assert_eq!(stored.reaction.as_deref(), Some("👍"));
        assert_eq!(drain(&mut alice).await.len(), 1);
        assert_eq!(drain(&mut bob).await.len(), 1);
    }

    #[tokio::test]
    async fn invalid_reaction_is_ignored_and_preserves_previous() {
        let mut fx = fixture(false);
        let mut alice = fx.dispatcher.register("c1", "alice").await;

        fx.router.send("alice", text("bob", "hi")).await;
        let saved = &fx.store.find_conversation("alice", "bob").await.unwrap()[0];
        fx.router.react("alice", saved.id, "❤️").await;
        drain(&mut alice).await;

        fx.router.react("alice", saved.id, "aaaaaaaaaaaaaaaaaaaa").await;

        assert!(drain(&mut alice).await.is_empty());
        let stored = fx.store.find_by_id(saved.id).await.unwrap().unwrap();
        assert_eq!(stored.reaction.as_deref(), Some("❤️"));
    }

    #[tokio::test]
    async fn empty_reaction_clears() {
        let fx = fixture(false);
        fx.router.send("alice", text("bob", "hi")).await;
        let saved = &fx.store.find_conversation("alice", "bob").await.unwrap()[0];

        fx.router.react("alice", saved.id, "👍").await;
        fx.router.react("alice", saved.id, "").await;

        let stored = fx.store.find_by_id(saved.id).await.unwrap().unwrap();
        assert!(stored.reaction.is_none());
    }

    #[tokio::test]
    async fn non_participant_reaction_is_ignored() {
        let fx = fixture(false);
        fx.router.send("alice", text("bob", "hi")).await;
        let saved = &fx.store.find_conversation("alice", "bob").await.unwrap()[0];

        fx.router.react("mallory", saved.id, "👍").await;

        let stored = fx.store.find_by_id(saved.id).await.unwrap().unwrap();
        assert!(stored.reaction.is_none());
    }

    #[tokio::test]
    async fn read_receipts_only_move_forward() {
        let mut fx = fixture(false);
        let mut bob = fx.dispatcher.register("c1", "bob").await;

        fx.router.mark_read_at("alice", "bob", Some(100), 1_000).await;
        fx.router.mark_read_at("alice", "bob", Some(50), 1_000).await;

        let frames = drain(&mut bob).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["read_at"], 100);
    }

    #[tokio::test]
    async fn read_timestamp_is_clamped_to_now() {
        let mut fx = fixture(false);
        let mut bob = fx.dispatcher.register("c1", "bob").await;

        fx.router
            .mark_read_at("alice", "bob", Some(5_000), 1_000)
            .await;

        let frames = drain(&mut bob).await;
        assert_eq!(frames[0]["read_at"], 1_000);
    }

    #[tokio::test]
    async fn receipts_replay_to_the_peer_on_reconnect() {
        let mut fx = fixture(false);
        fx.router.mark_read_at("alice", "bob", Some(100), 1_000).await;
        fx.router.mark_read_at("carol", "bob", Some(200), 1_000).await;
        fx.router.mark_read_at("bob", "alice", Some(300), 1_000).await;

        let mut bob = fx.dispatcher.register("c1", "bob").await;
        fx.router.replay_receipts("bob").await;

        let frames = drain(&mut bob).await;
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|frame| frame["peer_username"] == "bob"));
    }

    #[tokio::test]
    async fn typing_is_relayed_without_persistence() {
        let mut fx = fixture(false);
        let mut bob = fx.dispatcher.register("c1", "bob").await;

        fx.router.typing("alice", "bob", true).await;
        fx.router.typing("alice", "", true).await;

        let frames = drain(&mut bob).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "typing");
        assert_eq!(frames[0]["typing"], true);
    }
}
