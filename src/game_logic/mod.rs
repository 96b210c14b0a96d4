use axum::extract::ws;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, future::Future};
use tokio::sync::mpsc::Sender as TokioMpscSender;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum EventHandlingResult {
    /// Event was handled normally, no special actions needed
    Handled,
    /// Client should be disconnected (e.g., due to LeaveSession request)
    DisconnectClient,
}

pub mod messages;
pub use messages::{ClientToServerMessage, ServerToClientMessage};

pub mod emoji_pictionary;

pub use emoji_pictionary::EmojiPictionaryGame;

#[derive(Debug, Clone, PartialEq)]
pub enum GameType {
    EmojiPictionary,
}

impl GameType {
    pub fn all() -> Vec<Self> {
        vec![GameType::EmojiPictionary]
    }

    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            GameType::EmojiPictionary => &["emojipictionary", "emoji", "pictionary"],
        }
    }

    pub fn primary_id(&self) -> &'static str {
        self.aliases()[0]
    }
}

/// End-of-game result, one well-typed variant per game type. Completion
/// payloads are never open-ended JSON bags; clients match on `game`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "game", content = "result")]
pub enum GameOutcome {
    EmojiPictionary {
        winner: Option<String>,
        is_tie: bool,
    },
}

pub trait GameLogic: Send + Sync + Debug {
    fn client_connected(
        &mut self,
        client_id: Uuid,
        client_tx: TokioMpscSender<ws::Message>,
    ) -> impl Future<Output = ()> + Send;

    fn client_disconnected(&mut self, client_id: Uuid) -> impl Future<Output = ()> + Send;

    fn handle_event(
        &mut self,
        client_id: Uuid,
        message: ClientToServerMessage,
    ) -> impl Future<Output = EventHandlingResult> + Send;

    /// Driven once per second by the session actor while `clock_running()`.
    fn handle_tick(&mut self) -> impl Future<Output = ()> + Send;

    /// Whether the engine currently wants periodic ticks.
    fn clock_running(&self) -> bool;

    fn is_empty(&self) -> bool;

    fn game_type_id(&self) -> String;

    fn get_client_tx(&self, client_id: Uuid) -> Option<TokioMpscSender<ws::Message>>;
}
