use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use uuid::Uuid;
use warp::ws::WebSocket;

use crate::chat::{normalize_username, ChatRouter, OutgoingMessage};
use crate::dispatch::{Dispatcher, PRESENCE_TOPIC};
use crate::game::{GameAction, GameError, GameRegistry, VariantParams};
use crate::messages::{ClientMessage, ServerMessage};
use crate::notify::Notifier;
use crate::presence::PresenceTracker;
use crate::store::MessageStore;

/// Owns the subsystems and drives one dispatch loop per connection. Cheap
/// to clone; everything inside is shared.
#[derive(Clone)]
pub struct Server {
    dispatcher: Arc<Dispatcher>,
    presence: Arc<PresenceTracker>,
    games: Arc<GameRegistry>,
    chat: Arc<ChatRouter>,
}

impl Server {
    pub fn new(
        store: Arc<dyn MessageStore>,
        notifier: Arc<dyn Notifier>,
        notify_even_if_online: bool,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new());
        let presence = Arc::new(PresenceTracker::new(dispatcher.clone()));
        let games = Arc::new(GameRegistry::new(dispatcher.clone()));
        let chat = Arc::new(ChatRouter::new(
            dispatcher.clone(),
            presence.clone(),
            store,
            notifier,
            notify_even_if_online,
        ));
        Server {
            dispatcher,
            presence,
            games,
            chat,
        }
    }

    /// The username arrives already authenticated; this layer only
    /// normalizes it and refuses blanks.
    pub async fn handle_connection(&self, ws: WebSocket, raw_username: &str) {
        let username = normalize_username(raw_username);
        if username.is_empty() {
            warn!("rejecting websocket connection with blank username");
            let mut ws = ws;
            let _ = ws.close().await;
            return;
        }

        let conn_id = Uuid::new_v4().to_string();
        let mut outbound = self.dispatcher.register(&conn_id, &username).await;
        self.dispatcher.subscribe(&conn_id, PRESENCE_TOPIC).await;

        let (mut ws_tx, mut ws_rx) = ws.split();
        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                if let Err(err) = ws_tx.send(frame).await {
                    debug!("websocket send failed: {err}");
                    break;
                }
            }
        });

        self.presence.mark_online(&username).await;
        self.chat.replay_receipts(&username).await;
        info!("{username} connected ({conn_id})");

        let server = self.clone();
        tokio::spawn(async move {
            while let Some(result) = ws_rx.next().await {
                match result {
                    Ok(frame) => {
                        let Ok(text) = frame.to_str() else {
                            continue;
                        };
                        match serde_json::from_str::<ClientMessage>(text) {
                            Ok(event) => server.dispatch(&conn_id, &username, event).await,
                            Err(err) => {
                                debug!("unparseable frame from {username}: {err}");
                            }
                        }
                    }
                    Err(err) => {
                        debug!("websocket error for {username}: {err}");
                        break;
                    }
                }
            }
            server.handle_disconnect(&conn_id, &username).await;
        });
    }

    async fn handle_disconnect(&self, conn_id: &str, username: &str) {
        let last_connection = self.dispatcher.unregister(conn_id).await;
        if last_connection {
            self.presence.handle_disconnect(username).await;
            self.games.drop_user(username).await;
        }
        info!("{username} disconnected ({conn_id})");
    }

    async fn dispatch(&self, conn_id: &str, username: &str, event: ClientMessage) {
        match event {
            ClientMessage::CreateRoom {
                room_id,
                game,
                size,
                difficulty,
            } => {
                let result = match VariantParams::parse(&game, size, difficulty.as_deref()) {
                    Ok(params) => {
                        self.games
                            .create(conn_id, username, room_id.as_deref(), params)
                            .await
                    }
                    Err(err) => Err(err),
                };
                self.report_game_error(username, room_id, result).await;
            }
            ClientMessage::JoinRoom { room_id } => {
                let result = self.games.join(conn_id, username, &room_id).await;
                self.report_game_error(username, Some(room_id), result).await;
            }
            ClientMessage::PlaceMark { room_id, index } => {
                let result = self
                    .games
                    .make_move(username, &room_id, GameAction::Place { index })
                    .await;
                self.report_game_error(username, Some(room_id), result).await;
            }
            ClientMessage::RollDice { room_id } => {
                let result = self.games.make_move(username, &room_id, GameAction::Roll).await;
                self.report_game_error(username, Some(room_id), result).await;
            }
            ClientMessage::ReplayRoom { room_id } => {
                let result = self.games.replay(username, &room_id).await;
                self.report_game_error(username, Some(room_id), result).await;
            }
            ClientMessage::LeaveRoom { room_id } => {
                self.games.leave(conn_id, username, &room_id).await;
            }
            ClientMessage::ChatMessage {
                to_username,
                message,
                temp_id,
                kind,
                file_name,
                media_url,
                mime_type,
                reply_text,
                reply_sender_name,
            } => {
                self.chat
                    .send(
                        username,
                        OutgoingMessage {
                            to_username,
                            body: message,
                            temp_id,
                            kind,
                            file_name,
                            media_url,
                            mime_type,
                            reply_text,
                            reply_sender_name,
                        },
                    )
                    .await;
            }
            ClientMessage::EditMessage {
                message_id,
                message,
            } => {
                self.chat.edit(username, message_id, &message).await;
            }
            ClientMessage::ReactMessage {
                message_id,
                reaction,
            } => {
                self.chat.react(username, message_id, &reaction).await;
            }
            ClientMessage::MarkRead {
                peer_username,
                read_at,
            } => {
                self.chat.mark_read(username, &peer_username, read_at).await;
            }
            ClientMessage::Typing {
                to_username,
                typing,
            } => {
                self.chat.typing(username, &to_username, typing).await;
            }
            ClientMessage::UserOnline => {
                self.presence.mark_online(username).await;
            }
            ClientMessage::UserOffline => {
                self.presence.mark_offline(username).await;
            }
        }
    }

    /// Failures never mutate state; they go back to the acting user only.
    async fn report_game_error(
        &self,
        username: &str,
        room_id: Option<String>,
        result: Result<(), GameError>,
    ) {
        if let Err(err) = result {
            self.dispatcher
                .send_to_user(
                    username,
                    &ServerMessage::Error {
                        room_id,
                        message: err.to_string(),
                    },
                )
                .await;
        }
    }
}
