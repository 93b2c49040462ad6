//! Turn-based game rooms: one registry for both variants, keyed by room
//! code. Every mutation runs under the room's own lock through to the
//! broadcast enqueue, so subscribers observe snapshots in serialization
//! order. Failures never mutate state and are reported privately.

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use rand::Rng;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::clock::now_millis;
use crate::dispatch::{room_topic, Dispatcher};
use crate::messages::ServerMessage;
use crate::snl::{self, Difficulty, RollKind};
use crate::ttt::{self, Board, Mark, Outcome};

pub const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("Invalid room code.")]
    InvalidCode,
    #[error("Room code already exists. Try another code.")]
    RoomExists,
    #[error("Room not found.")]
    RoomNotFound,
    #[error("Room is full.")]
    RoomFull,
    #[error("You are not a player in this room.")]
    NotAPlayer,
    #[error("Waiting for opponent to join.")]
    OpponentMissing,
    #[error("Game already finished. Start a new room.")]
    GameFinished,
    #[error("Not your turn.")]
    NotYourTurn,
    #[error("{0}")]
    InvalidMove(&'static str),
    #[error("Unknown game type.")]
    UnknownGame,
}

#[derive(Clone, Copy, Debug)]
pub enum VariantParams {
    TicTacToe { size: usize },
    SnakesAndLadders { difficulty: Difficulty },
}

impl VariantParams {
    pub fn parse(
        game: &str,
        size: Option<usize>,
        difficulty: Option<&str>,
    ) -> Result<Self, GameError> {
        match game.trim().to_lowercase().as_str() {
            "ttt" => Ok(VariantParams::TicTacToe {
                size: ttt::clamp_size(size),
            }),
            "snl" => Ok(VariantParams::SnakesAndLadders {
                difficulty: Difficulty::parse(difficulty),
            }),
            _ => Err(GameError::UnknownGame),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum GameAction {
    Place { index: usize },
    Roll,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Role {
    Host,
    Guest,
}

impl Role {
    fn other(self) -> Self {
        match self {
            Role::Host => Role::Guest,
            Role::Guest => Role::Host,
        }
    }
}

struct TttRoom {
    board: Board,
    x_player: Option<String>,
    o_player: Option<String>,
    turn: Option<Mark>,
    winner: Option<Outcome>,
    last_move_index: Option<usize>,
}

impl TttRoom {
    fn mark_of(&self, username: &str) -> Option<Mark> {
        if self.x_player.as_deref() == Some(username) {
            Some(Mark::X)
        } else if self.o_player.as_deref() == Some(username) {
            Some(Mark::O)
        } else {
            None
        }
    }

    fn player_of(&self, mark: Mark) -> Option<&str> {
        match mark {
            Mark::X => self.x_player.as_deref(),
            Mark::O => self.o_player.as_deref(),
        }
    }

    fn reset(&mut self) {
        self.board.reset();
        self.turn = Some(Mark::X);
        self.winner = None;
        self.last_move_index = None;
    }
}

struct SnlRoom {
    difficulty: Difficulty,
    host: Option<String>,
    guest: Option<String>,
    host_position: u8,
    guest_position: u8,
    turn: Option<Role>,
    winner: Option<Role>,
    last_roll: Option<u8>,
    rolled_by: Option<String>,
}

impl SnlRoom {
    fn role_of(&self, username: &str) -> Option<Role> {
        if self.host.as_deref() == Some(username) {
            Some(Role::Host)
        } else if self.guest.as_deref() == Some(username) {
            Some(Role::Guest)
        } else {
            None
        }
    }

    fn player_of(&self, role: Role) -> Option<&str> {
        match role {
            Role::Host => self.host.as_deref(),
            Role::Guest => self.guest.as_deref(),
        }
    }

    fn position(&self, role: Role) -> u8 {
        match role {
            Role::Host => self.host_position,
            Role::Guest => self.guest_position,
        }
    }

    fn set_position(&mut self, role: Role, position: u8) {
        match role {
            Role::Host => self.host_position = position,
            Role::Guest => self.guest_position = position,
        }
    }

    fn reset(&mut self) {
        self.host_position = snl::START_CELL;
        self.guest_position = snl::START_CELL;
        self.turn = Some(Role::Host);
        self.winner = None;
        self.last_roll = None;
        self.rolled_by = None;
    }
}

enum Variant {
    Ttt(TttRoom),
    Snl(SnlRoom),
}

struct JoinOutcome {
    role: &'static str,
    rejoined: bool,
}

enum Departure {
    NotPresent,
    Empty,
    Remaining,
}

pub struct GameRoom {
    room_id: String,
    variant: Variant,
    updated_at: i64,
}

impl GameRoom {
    fn new(room_id: String, params: VariantParams, creator: &str) -> Self {
        let variant = match params {
            VariantParams::TicTacToe { size } => Variant::Ttt(TttRoom {
                board: Board::new(size),
                x_player: Some(creator.to_string()),
                o_player: None,
                turn: Some(Mark::X),
                winner: None,
                last_move_index: None,
            }),
            VariantParams::SnakesAndLadders { difficulty } => Variant::Snl(SnlRoom {
                difficulty,
                host: Some(creator.to_string()),
                guest: None,
                host_position: snl::START_CELL,
                guest_position: snl::START_CELL,
                turn: Some(Role::Host),
                winner: None,
                last_roll: None,
                rolled_by: None,
            }),
        };
        GameRoom {
            room_id,
            variant,
            updated_at: now_millis(),
        }
    }

    fn game_kind(&self) -> &'static str {
        match self.variant {
            Variant::Ttt(_) => "ttt",
            Variant::Snl(_) => "snl",
        }
    }

    fn size(&self) -> Option<usize> {
        match &self.variant {
            Variant::Ttt(room) => Some(room.board.size()),
            Variant::Snl(_) => None,
        }
    }

    fn difficulty(&self) -> Option<String> {
        match &self.variant {
            Variant::Ttt(_) => None,
            Variant::Snl(room) => Some(room.difficulty.as_str().to_string()),
        }
    }

    fn is_full(&self) -> bool {
        match &self.variant {
            Variant::Ttt(room) => room.x_player.is_some() && room.o_player.is_some(),
            Variant::Snl(room) => room.host.is_some() && room.guest.is_some(),
        }
    }

    fn is_empty(&self) -> bool {
        match &self.variant {
            Variant::Ttt(room) => room.x_player.is_none() && room.o_player.is_none(),
            Variant::Snl(room) => room.host.is_none() && room.guest.is_none(),
        }
    }

    fn is_finished(&self) -> bool {
        match &self.variant {
            Variant::Ttt(room) => room.winner.is_some(),
            Variant::Snl(room) => room.winner.is_some(),
        }
    }

    fn status(&self) -> &'static str {
        if self.is_finished() {
            "finished"
        } else if self.is_full() {
            "in_progress"
        } else {
            "waiting_for_opponent"
        }
    }

    fn touch(&mut self) {
        self.updated_at = now_millis();
    }

    /// Rejoining an occupied slot is idempotent; a new username fills the
    /// first empty slot. Filling the room hands the turn to the first slot.
    fn join(&mut self, username: &str) -> Result<JoinOutcome, GameError> {
        match &mut self.variant {
            Variant::Ttt(room) => {
                if let Some(mark) = room.mark_of(username) {
                    return Ok(JoinOutcome {
                        role: mark.as_str(),
                        rejoined: true,
                    });
                }
                let role = if room.x_player.is_none() {
                    room.x_player = Some(username.to_string());
                    "X"
                } else if room.o_player.is_none() {
                    room.o_player = Some(username.to_string());
                    "O"
                } else {
                    return Err(GameError::RoomFull);
                };
                if room.x_player.is_some() && room.o_player.is_some() {
                    room.turn = Some(Mark::X);
                }
                self.touch();
                Ok(JoinOutcome {
                    role,
                    rejoined: false,
                })
            }
            Variant::Snl(room) => {
                if let Some(role) = room.role_of(username) {
                    return Ok(JoinOutcome {
                        role: role_name(role),
                        rejoined: true,
                    });
                }
                let role = if room.host.is_none() {
                    room.host = Some(username.to_string());
                    "host"
                } else if room.guest.is_none() {
                    room.guest = Some(username.to_string());
                    "guest"
                } else {
                    return Err(GameError::RoomFull);
                };
                if room.host.is_some() && room.guest.is_some() {
                    room.turn = Some(Role::Host);
                }
                self.touch();
                Ok(JoinOutcome {
                    role,
                    rejoined: false,
                })
            }
        }
    }

    /// Vacates the user's slot. Tic-tac-toe resets the round and never
    /// promotes; snakes-and-ladders promotes a remaining guest to host and
    /// resets the game. Returns how the room was left behind.
    fn remove_player(&mut self, username: &str) -> Departure {
        match &mut self.variant {
            Variant::Ttt(room) => {
                let mut changed = false;
                if room.x_player.as_deref() == Some(username) {
                    room.x_player = None;
                    changed = true;
                }
                if room.o_player.as_deref() == Some(username) {
                    room.o_player = None;
                    changed = true;
                }
                if !changed {
                    return Departure::NotPresent;
                }
                if room.x_player.is_none() && room.o_player.is_none() {
                    return Departure::Empty;
                }
                room.reset();
                self.touch();
                Departure::Remaining
            }
            Variant::Snl(room) => {
                if room.host.as_deref() == Some(username) {
                    room.host = room.guest.take();
                } else if room.guest.as_deref() == Some(username) {
                    room.guest = None;
                } else {
                    return Departure::NotPresent;
                }
                if room.host.is_none() && room.guest.is_none() {
                    return Departure::Empty;
                }
                room.reset();
                self.touch();
                Departure::Remaining
            }
        }
    }

    fn state_event(&self, line: &str) -> ServerMessage {
        match &self.variant {
            Variant::Ttt(room) => {
                let turn = room
                    .turn
                    .filter(|_| !self.is_finished() && self.is_full())
                    .and_then(|mark| room.player_of(mark))
                    .unwrap_or_default()
                    .to_string();
                let winner = match room.winner {
                    Some(Outcome::Win(mark)) => room
                        .player_of(mark)
                        .unwrap_or(mark.as_str())
                        .to_string(),
                    Some(Outcome::Draw) => "draw".to_string(),
                    None => String::new(),
                };
                ServerMessage::TttState {
                    room_id: self.room_id.clone(),
                    size: room.board.size(),
                    board: room.board.wire_cells(),
                    x_player: room.x_player.clone().unwrap_or_default(),
                    o_player: room.o_player.clone().unwrap_or_default(),
                    turn,
                    winner,
                    last_move_index: room.last_move_index,
                    status: self.status().to_string(),
                    updated_at: self.updated_at,
                    message: line.to_string(),
                }
            }
            Variant::Snl(room) => {
                let turn_username = room
                    .turn
                    .filter(|_| !self.is_finished() && self.is_full())
                    .and_then(|role| room.player_of(role))
                    .unwrap_or_default()
                    .to_string();
                let winner_username = room
                    .winner
                    .and_then(|role| room.player_of(role))
                    .unwrap_or_default()
                    .to_string();
                ServerMessage::SnlState {
                    room_id: self.room_id.clone(),
                    difficulty: room.difficulty.as_str().to_string(),
                    host_username: room.host.clone().unwrap_or_default(),
                    guest_username: room.guest.clone().unwrap_or_default(),
                    host_position: room.host_position,
                    guest_position: room.guest_position,
                    turn_username,
                    winner_username,
                    last_roll: room.last_roll,
                    rolled_by: room.rolled_by.clone().unwrap_or_default(),
                    status: self.status().to_string(),
                    updated_at: self.updated_at,
                    message: line.to_string(),
                }
            }
        }
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::Host => "host",
        Role::Guest => "guest",
    }
}

pub fn sanitize_room_id(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(char::is_ascii_alphanumeric)
        .collect()
}

pub struct GameRegistry {
    rooms: RwLock<HashMap<String, Arc<Mutex<GameRoom>>>>,
    dispatcher: Arc<Dispatcher>,
}

impl GameRegistry {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        GameRegistry {
            rooms: RwLock::new(HashMap::new()),
            dispatcher,
        }
    }

    pub async fn create(
        &self,
        conn_id: &str,
        username: &str,
        requested_code: Option<&str>,
        params: VariantParams,
    ) -> Result<(), GameError> {
        let requested = match requested_code {
            Some(raw) => {
                let code = sanitize_room_id(raw);
                if code.is_empty() {
                    return Err(GameError::InvalidCode);
                }
                Some(code)
            }
            None => None,
        };

        // Insert-if-absent under the registry's write lock: concurrent
        // creates of one code get exactly one winner.
        let (code, room_arc) = {
            let mut rooms = self.rooms.write().await;
            let code = match requested {
                Some(code) => {
                    if rooms.contains_key(&code) {
                        return Err(GameError::RoomExists);
                    }
                    code
                }
                None => {
                    let mut rng = rand::thread_rng();
                    let mut code = random_code(&mut rng);
                    while rooms.contains_key(&code) {
                        code = random_code(&mut rng);
                    }
                    code
                }
            };
            let room = GameRoom::new(code.clone(), params, username);
            let room_arc = Arc::new(Mutex::new(room));
            rooms.insert(code.clone(), room_arc.clone());
            (code, room_arc)
        };
        info!("room {code} created by {username}");

        self.dispatcher.subscribe(conn_id, &room_topic(&code)).await;
        let room = room_arc.lock().await;
        let role = match room.variant {
            Variant::Ttt(_) => "X",
            Variant::Snl(_) => "host",
        };
        self.dispatcher
            .send_to_user(
                username,
                &ServerMessage::RoomCreated {
                    room_id: code,
                    game: room.game_kind().to_string(),
                    size: room.size(),
                    difficulty: room.difficulty(),
                    role: role.to_string(),
                    message: "Room created.".to_string(),
                },
            )
            .await;
        self.broadcast(&room, "Waiting for opponent to join.").await;
        Ok(())
    }

    pub async fn join(
        &self,
        conn_id: &str,
        username: &str,
        raw_code: &str,
    ) -> Result<(), GameError> {
        let code = sanitize_room_id(raw_code);
        if code.is_empty() {
            return Err(GameError::InvalidCode);
        }
        let room_arc = self.lookup(&code).await?;
        let mut room = room_arc.lock().await;
        let outcome = room.join(username)?;

        self.dispatcher.subscribe(conn_id, &room_topic(&code)).await;
        let ack_line = if outcome.rejoined {
            "Rejoined room.".to_string()
        } else {
            format!("Joined as {}.", outcome.role)
        };
        self.dispatcher
            .send_to_user(
                username,
                &ServerMessage::RoomJoined {
                    room_id: code,
                    game: room.game_kind().to_string(),
                    size: room.size(),
                    difficulty: room.difficulty(),
                    role: outcome.role.to_string(),
                    message: ack_line,
                },
            )
            .await;

        let line = if room.is_full() {
            match room.variant {
                Variant::Ttt(_) => "Both players connected.",
                Variant::Snl(_) => "Both players connected. Host rolls first.",
            }
        } else {
            "Waiting for opponent to join."
        };
        self.broadcast(&room, line).await;
        Ok(())
    }

    pub async fn make_move(
        &self,
        username: &str,
        raw_code: &str,
        action: GameAction,
    ) -> Result<(), GameError> {
        let code = sanitize_room_id(raw_code);
        if code.is_empty() {
            return Err(GameError::InvalidCode);
        }
        let room_arc = self.lookup(&code).await?;
        let mut room = room_arc.lock().await;
        let line = match (&mut room.variant, action) {
            (Variant::Ttt(ttt_room), GameAction::Place { index }) => {
                place_mark(ttt_room, username, index)?
            }
            (Variant::Snl(snl_room), GameAction::Roll) => roll_dice(snl_room, username)?,
            _ => return Err(GameError::InvalidMove("Wrong move for this game.")),
        };
        room.touch();
        self.broadcast(&room, &line).await;
        Ok(())
    }

    /// Tic-tac-toe only: starts a fresh round with the same players.
    pub async fn replay(&self, username: &str, raw_code: &str) -> Result<(), GameError> {
        let code = sanitize_room_id(raw_code);
        if code.is_empty() {
            return Err(GameError::InvalidCode);
        }
        let room_arc = self.lookup(&code).await?;
        let mut room = room_arc.lock().await;
        match &mut room.variant {
            Variant::Ttt(ttt_room) => {
                if ttt_room.mark_of(username).is_none() {
                    return Err(GameError::NotAPlayer);
                }
                if ttt_room.x_player.is_none() || ttt_room.o_player.is_none() {
                    return Err(GameError::OpponentMissing);
                }
                ttt_room.reset();
            }
            Variant::Snl(_) => {
                return Err(GameError::InvalidMove("Replay is not available for this game."))
            }
        }
        room.touch();
        self.broadcast(&room, "New round started.").await;
        Ok(())
    }

    /// Explicit leave; unknown rooms are ignored rather than reported.
    pub async fn leave(&self, conn_id: &str, username: &str, raw_code: &str) {
        let code = sanitize_room_id(raw_code);
        if code.is_empty() {
            return;
        }
        let Some(room_arc) = self.rooms.read().await.get(&code).cloned() else {
            return;
        };
        self.depart(&code, room_arc, username).await;
        self.dispatcher.unsubscribe(conn_id, &room_topic(&code)).await;
    }

    /// Disconnect sweep: visits every room the user could be in without
    /// holding the registry lock while a room is locked.
    pub async fn drop_user(&self, username: &str) {
        let entries: Vec<(String, Arc<Mutex<GameRoom>>)> = {
            let rooms = self.rooms.read().await;
            rooms
                .iter()
                .map(|(code, room)| (code.clone(), room.clone()))
                .collect()
        };
        for (code, room_arc) in entries {
            self.depart(&code, room_arc, username).await;
        }
    }

    async fn depart(&self, code: &str, room_arc: Arc<Mutex<GameRoom>>, username: &str) {
        let mut room = room_arc.lock().await;
        match room.remove_player(username) {
            Departure::NotPresent => {}
            Departure::Empty => {
                drop(room);
                self.remove_if_empty(code).await;
            }
            Departure::Remaining => {
                let line = match room.variant {
                    Variant::Ttt(_) => "A player left. Board reset.",
                    Variant::Snl(_) => "A player left. Waiting for opponent.",
                };
                self.broadcast(&room, line).await;
            }
        }
    }

    /// Re-checks emptiness under the registry write lock so a join racing
    /// the removal keeps the room alive.
    async fn remove_if_empty(&self, code: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(room_arc) = rooms.get(code).cloned() {
            let room = room_arc.lock().await;
            if room.is_empty() {
                rooms.remove(code);
                info!("room {code} removed");
            }
        }
    }

    async fn lookup(&self, code: &str) -> Result<Arc<Mutex<GameRoom>>, GameError> {
        self.rooms
            .read()
            .await
            .get(code)
            .cloned()
            .ok_or(GameError::RoomNotFound)
    }

    async fn broadcast(&self, room: &GameRoom, line: &str) {
        self.dispatcher
            .publish(&room_topic(&room.room_id), &room.state_event(line))
            .await;
    }
}

fn place_mark(room: &mut TttRoom, username: &str, index: usize) -> Result<String, GameError> {
    if room.x_player.is_none() || room.o_player.is_none() {
        return Err(GameError::OpponentMissing);
    }
    let mark = room.mark_of(username).ok_or(GameError::NotAPlayer)?;
    if room.winner.is_some() {
        return Err(GameError::GameFinished);
    }
    if room.turn != Some(mark) {
        return Err(GameError::NotYourTurn);
    }
    if !room.board.in_range(index) {
        return Err(GameError::InvalidMove("Move is out of range."));
    }
    if !room.board.is_free(index) {
        return Err(GameError::InvalidMove("Cell already used."));
    }

    room.board.place(index, mark);
    room.last_move_index = Some(index);

    match room.board.outcome() {
        Some(Outcome::Draw) => {
            room.winner = Some(Outcome::Draw);
            room.turn = None;
            Ok("Round ended in a draw.".to_string())
        }
        Some(Outcome::Win(winning_mark)) => {
            room.winner = Some(Outcome::Win(winning_mark));
            room.turn = None;
            let name = room
                .player_of(winning_mark)
                .unwrap_or(winning_mark.as_str());
            Ok(format!("{name} won this round."))
        }
        None => {
            room.turn = Some(mark.other());
            Ok("Turn switched.".to_string())
        }
    }
}

fn roll_dice(room: &mut SnlRoom, username: &str) -> Result<String, GameError> {
    let role = room.role_of(username).ok_or(GameError::NotAPlayer)?;
    if room.host.is_none() || room.guest.is_none() {
        return Err(GameError::OpponentMissing);
    }
    if room.winner.is_some() {
        return Err(GameError::GameFinished);
    }
    if room.turn != Some(role) {
        return Err(GameError::NotYourTurn);
    }

    let roll: u8 = rand::thread_rng().gen_range(1..=6);
    let result = snl::apply_roll(room.position(role), roll, room.difficulty);
    room.set_position(role, result.position);
    room.last_roll = Some(roll);
    room.rolled_by = Some(username.to_string());

    if result.won {
        room.winner = Some(role);
        room.turn = None;
        return Ok(format!("{username} won the game."));
    }

    room.turn = Some(role.other());
    Ok(match result.kind {
        RollKind::Overshoot => {
            format!("{username} rolled {roll}. Need exact number for 100.")
        }
        RollKind::Jumped { from, to } => {
            format!("{username} rolled {roll}. Jumped from {from} to {to}.")
        }
        RollKind::Moved => {
            format!("{username} rolled {roll}. Moved to {}.", result.position)
        }
    })
}

fn random_code(rng: &mut impl Rng) -> String {
    (0..ROOM_CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ROOM_CODE_CHARSET.len());
            ROOM_CODE_CHARSET[idx] as char
        })
        .collect()
}
