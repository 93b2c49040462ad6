use serde::{Deserialize, Serialize};

use crate::store::MessageKind;

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "create_room")]
    CreateRoom {
        room_id: Option<String>,
        game: String,
        size: Option<usize>,
        difficulty: Option<String>,
    },
    #[serde(rename = "join_room")]
    JoinRoom { room_id: String },
    #[serde(rename = "place_mark")]
    PlaceMark { room_id: String, index: usize },
    #[serde(rename = "roll_dice")]
    RollDice { room_id: String },
    #[serde(rename = "replay_room")]
    ReplayRoom { room_id: String },
    #[serde(rename = "leave_room")]
    LeaveRoom { room_id: String },
    #[serde(rename = "chat_message")]
    ChatMessage {
        to_username: String,
        message: String,
        temp_id: Option<String>,
        #[serde(default)]
        kind: MessageKind,
        file_name: Option<String>,
        media_url: Option<String>,
        mime_type: Option<String>,
        reply_text: Option<String>,
        reply_sender_name: Option<String>,
    },
    #[serde(rename = "edit_message")]
    EditMessage { message_id: i64, message: String },
    #[serde(rename = "react_message")]
    ReactMessage { message_id: i64, reaction: String },
    #[serde(rename = "mark_read")]
    MarkRead {
        peer_username: String,
        read_at: Option<i64>,
    },
    #[serde(rename = "typing")]
    Typing { to_username: String, typing: bool },
    #[serde(rename = "user_online")]
    UserOnline,
    #[serde(rename = "user_offline")]
    UserOffline,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "room_created")]
    RoomCreated {
        room_id: String,
        game: String,
        size: Option<usize>,
        difficulty: Option<String>,
        role: String,
        message: String,
    },
    #[serde(rename = "room_joined")]
    RoomJoined {
        room_id: String,
        game: String,
        size: Option<usize>,
        difficulty: Option<String>,
        role: String,
        message: String,
    },
    #[serde(rename = "ttt_state")]
    TttState {
        room_id: String,
        size: usize,
        board: Vec<String>,
        x_player: String,
        o_player: String,
        turn: String,
        winner: String,
        last_move_index: Option<usize>,
        status: String,
        updated_at: i64,
        message: String,
    },
    #[serde(rename = "snl_state")]
    SnlState {
        room_id: String,
        difficulty: String,
        host_username: String,
        guest_username: String,
        host_position: u8,
        guest_position: u8,
        turn_username: String,
        winner_username: String,
        last_roll: Option<u8>,
        rolled_by: String,
        status: String,
        updated_at: i64,
        message: String,
    },
    #[serde(rename = "error")]
    Error {
        room_id: Option<String>,
        message: String,
    },
    #[serde(rename = "chat_message")]
    ChatMessage {
        message_id: i64,
        from_username: String,
        message: String,
        kind: MessageKind,
        file_name: Option<String>,
        media_url: Option<String>,
        mime_type: Option<String>,
        reply_text: Option<String>,
        reply_sender_name: Option<String>,
        created_at: i64,
    },
    #[serde(rename = "send_ack")]
    SendAck {
        temp_id: Option<String>,
        success: bool,
        message_id: i64,
        created_at: i64,
    },
    #[serde(rename = "message_edited")]
    MessageEdited {
        message_id: i64,
        message: String,
        edited_at: i64,
    },
    #[serde(rename = "edit_ack")]
    EditAck {
        message_id: i64,
        success: bool,
        reason: Option<String>,
    },
    #[serde(rename = "message_reaction")]
    MessageReaction {
        message_id: i64,
        reaction: Option<String>,
    },
    #[serde(rename = "read_receipt")]
    ReadReceipt {
        reader_username: String,
        peer_username: String,
        read_at: i64,
    },
    #[serde(rename = "typing")]
    Typing { from_username: String, typing: bool },
    #[serde(rename = "user_status")]
    UserStatus {
        username: String,
        status: String,
        last_seen_at: Option<i64>,
    },
}
