use axum::extract::ws;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::{Sender as TokioMpscSender, error::TrySendError};
use uuid::Uuid;

use crate::content::EmojiPrompt;
use crate::game_logic::messages::{
    ClientToServerMessage as GenericClientToServerMessage,
    ServerToClientMessage as GenericServerToClientMessage,
};
use crate::game_logic::{EventHandlingResult, GameLogic, GameOutcome};

pub mod machine;

pub use machine::{SessionMachine, SessionRules, TeamColor};

use machine::TickOutcome;

const GAME_TYPE_ID_EMOJI_PICTIONARY: &str = "EmojiPictionary";

// Fallback deck used when no prompt content is configured.
const BUILTIN_PROMPTS: &[(&str, &str)] = &[
    ("🐝🎬", "Bee Movie"),
    ("🌧️👨", "Rain Man"),
    ("👑🦁", "The Lion King"),
    ("🕷️👨", "Spider-Man"),
    ("🧊⛵", "Titanic"),
    ("🔙➡️🔮", "Back to the Future"),
    ("🦇👨", "Batman"),
    ("💍🌋", "The Lord of the Rings"),
    ("🏠⬆️🎈", "Up"),
    ("🦈🏖️", "Jaws"),
];

// Host Commands (Client -> Server)
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "command")]
pub enum HostCommand {
    AddTeam { name: String, color: TeamColor },
    RemoveTeam { name: String },
    StartGame,
    Buzz { team_name: String },
    SubmitVerdict { team_name: String, is_correct: bool },
    SetTotalRounds { rounds: u32 },
    SetRoundSeconds { seconds: u32 },
    ResetGame,
}

// Game Events (Server -> Client)
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event_type", content = "data")]
pub enum GameEvent {
    FullStateUpdate(serde_json::Value),
    ClockTick { seconds_left: u32 },
    BuzzResult { team_name: String, accepted: bool },
    CommandRejected { reason: String },
    GameOver(GameOutcome),
}

#[derive(Debug)]
pub struct EmojiPictionaryGame {
    clients: HashMap<Uuid, TokioMpscSender<ws::Message>>,
    machine: SessionMachine,
}

impl EmojiPictionaryGame {
    pub fn new(
        session_id: Uuid,
        session_name: String,
        rules: SessionRules,
        deck: Arc<Vec<EmojiPrompt>>,
    ) -> Self {
        let prompts: Vec<EmojiPrompt> = if deck.is_empty() {
            BUILTIN_PROMPTS
                .iter()
                .map(|(emoji, answer)| EmojiPrompt {
                    emoji: emoji.to_string(),
                    answer: answer.to_string(),
                    category: None,
                })
                .collect()
        } else {
            deck.as_ref().clone()
        };

        Self {
            clients: HashMap::new(),
            machine: SessionMachine::new(session_id, session_name, rules, prompts),
        }
    }

    pub fn machine(&self) -> &SessionMachine {
        &self.machine
    }

    // Helper to send events to specific client
    async fn send_game_event_to_client(&self, client_id: &Uuid, event_payload: GameEvent) {
        match GenericServerToClientMessage::new_game_specific_event(
            GAME_TYPE_ID_EMOJI_PICTIONARY.to_string(),
            &event_payload,
        ) {
            Ok(wrapped_message) => {
                self.send_generic_message_to_client(client_id, wrapped_message)
                    .await;
            }
            Err(e) => {
                tracing::error!(
                    client.id = %client_id,
                    error = %e,
                    "Failed to serialize GameEvent for client"
                );
            }
        }
    }

    // Helper to broadcast events to all clients
    async fn broadcast_game_event_to_all(&self, event_payload: GameEvent) {
        match GenericServerToClientMessage::new_game_specific_event(
            GAME_TYPE_ID_EMOJI_PICTIONARY.to_string(),
            &event_payload,
        ) {
            Ok(wrapped_message) => {
                self.broadcast_generic_message_to_all(wrapped_message).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize GameEvent for broadcast");
            }
        }
    }

    fn snapshot_event(&self) -> Option<GameEvent> {
        match serde_json::to_value(&self.machine) {
            Ok(snapshot) => Some(GameEvent::FullStateUpdate(snapshot)),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize session snapshot");
                None
            }
        }
    }

    /// Pushes the full current snapshot to every viewer. Called after each
    /// state transition so subscribers see transitions in order.
    async fn broadcast_full_state_update(&self) {
        if let Some(event) = self.snapshot_event() {
            self.broadcast_game_event_to_all(event).await;
        }
    }

    // Delivery must never stall the session actor: a slow or dead socket
    // gets its frame dropped, and the next snapshot makes it whole again.
    fn push_to_client(client_id: &Uuid, tx: &TokioMpscSender<ws::Message>, ws_msg: ws::Message) {
        match tx.try_send(ws_msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!(client.id = %client_id, "Client buffer full, dropping frame");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(client.id = %client_id, "Client channel closed, dropping frame");
            }
        }
    }

    async fn send_generic_message_to_client(
        &self,
        client_id: &Uuid,
        message: GenericServerToClientMessage,
    ) {
        if let Some(tx) = self.clients.get(client_id)
            && let Ok(ws_msg) = message.to_ws_text()
        {
            Self::push_to_client(client_id, tx, ws_msg);
        }
    }

    async fn broadcast_generic_message_to_all(&self, message: GenericServerToClientMessage) {
        if self.clients.is_empty() {
            return;
        }
        if let Ok(ws_msg) = message.to_ws_text() {
            for (id, tx) in &self.clients {
                Self::push_to_client(id, tx, ws_msg.clone());
            }
        }
    }

    async fn reject_command(&self, client_id: &Uuid, reason: String) {
        tracing::debug!(client.id = %client_id, reason = %reason, "Rejected command");
        self.send_game_event_to_client(client_id, GameEvent::CommandRejected { reason })
            .await;
    }

    async fn finish_if_over(&self, finished: Option<GameOutcome>) {
        if let Some(outcome) = finished {
            tracing::info!(
                session.id = %self.machine.id,
                outcome = ?outcome,
                "Game over"
            );
            self.broadcast_game_event_to_all(GameEvent::GameOver(outcome))
                .await;
        }
    }

    async fn handle_buzz(&mut self, client_id: Uuid, team_name: String) {
        let outcome = self.machine.buzz(&team_name);
        let accepted = outcome.accepted();
        tracing::debug!(
            session.id = %self.machine.id,
            team.name = %team_name,
            buzz.outcome = ?outcome,
            "Buzz arbitrated"
        );

        // Rejections are silent toward everyone but the buzzing client: the
        // button just stays idle. Only a won race changes state.
        self.send_game_event_to_client(
            &client_id,
            GameEvent::BuzzResult {
                team_name,
                accepted,
            },
        )
        .await;

        if accepted {
            self.broadcast_full_state_update().await;
        }
    }

    async fn handle_verdict(&mut self, client_id: Uuid, team_name: String, is_correct: bool) {
        match self.machine.apply_verdict(&team_name, is_correct) {
            Ok(outcome) => {
                tracing::info!(
                    session.id = %self.machine.id,
                    team.name = %team_name,
                    verdict.correct = is_correct,
                    verdict.prompt_abandoned = outcome.prompt_abandoned,
                    "Verdict applied"
                );
                self.broadcast_full_state_update().await;
                self.finish_if_over(outcome.finished).await;
            }
            Err(e) => self.reject_command(&client_id, e.to_string()).await,
        }
    }

    async fn handle_command(&mut self, client_id: Uuid, cmd: HostCommand) {
        match cmd {
            HostCommand::AddTeam { name, color } => match self.machine.add_team(&name, color) {
                Ok(()) => self.broadcast_full_state_update().await,
                Err(e) => self.reject_command(&client_id, e.to_string()).await,
            },
            HostCommand::RemoveTeam { name } => match self.machine.remove_team(&name) {
                Ok(()) => self.broadcast_full_state_update().await,
                Err(e) => self.reject_command(&client_id, e.to_string()).await,
            },
            HostCommand::StartGame => match self.machine.start() {
                Ok(()) => {
                    tracing::info!(
                        session.id = %self.machine.id,
                        teams.count = self.machine.teams.len(),
                        "Game started"
                    );
                    self.broadcast_full_state_update().await;
                }
                Err(e) => self.reject_command(&client_id, e.to_string()).await,
            },
            HostCommand::Buzz { team_name } => self.handle_buzz(client_id, team_name).await,
            HostCommand::SubmitVerdict {
                team_name,
                is_correct,
            } => self.handle_verdict(client_id, team_name, is_correct).await,
            HostCommand::SetTotalRounds { rounds } => {
                self.machine.set_total_rounds(rounds);
                self.broadcast_full_state_update().await;
            }
            HostCommand::SetRoundSeconds { seconds } => {
                self.machine.set_round_seconds(seconds);
                self.broadcast_full_state_update().await;
            }
            HostCommand::ResetGame => {
                self.machine.reset();
                self.broadcast_full_state_update().await;
            }
        }
    }
}

impl GameLogic for EmojiPictionaryGame {
    async fn client_connected(&mut self, client_id: Uuid, client_tx: TokioMpscSender<ws::Message>) {
        tracing::info!(
            session.id = %self.machine.id,
            client.id = %client_id,
            "Client connected"
        );
        self.clients.insert(client_id, client_tx);

        // Reconnecting viewers get the current full snapshot, not missed
        // deltas.
        if let Some(event) = self.snapshot_event() {
            self.send_game_event_to_client(&client_id, event).await;
        }
    }

    async fn client_disconnected(&mut self, client_id: Uuid) {
        tracing::info!(
            session.id = %self.machine.id,
            client.id = %client_id,
            "Client disconnected"
        );
        self.clients.remove(&client_id);
    }

    async fn handle_event(
        &mut self,
        client_id: Uuid,
        message: GenericClientToServerMessage,
    ) -> EventHandlingResult {
        match message {
            GenericClientToServerMessage::GameSpecificCommand {
                game_type_id,
                command_data,
            } => {
                // Clients echo the id from the create-session response; the
                // comparison stays case-insensitive so casing never strands
                // a command.
                if !game_type_id.eq_ignore_ascii_case(GAME_TYPE_ID_EMOJI_PICTIONARY) {
                    tracing::warn!(
                        game.type.received = %game_type_id,
                        "Command for wrong game type"
                    );
                    return EventHandlingResult::Handled;
                }

                match serde_json::from_value::<HostCommand>(command_data) {
                    Ok(cmd) => self.handle_command(client_id, cmd).await,
                    Err(e) => {
                        tracing::error!(
                            client.id = %client_id,
                            error = %e,
                            "Failed to deserialize host command"
                        );
                        self.reject_command(&client_id, format!("Invalid command: {}", e))
                            .await;
                    }
                }
                EventHandlingResult::Handled
            }
            GenericClientToServerMessage::LeaveSession => EventHandlingResult::DisconnectClient,
            GenericClientToServerMessage::ConnectToSession { .. } => {
                // Handshake is consumed by the websocket layer.
                EventHandlingResult::Handled
            }
        }
    }

    async fn handle_tick(&mut self) {
        match self.machine.tick() {
            TickOutcome::Idle => {}
            TickOutcome::Ticked { seconds_left } => {
                self.broadcast_game_event_to_all(GameEvent::ClockTick { seconds_left })
                    .await;
            }
            TickOutcome::Expired { finished } => {
                tracing::debug!(
                    session.id = %self.machine.id,
                    session.round = self.machine.round,
                    "Round clock expired"
                );
                self.broadcast_full_state_update().await;
                self.finish_if_over(finished).await;
            }
        }
    }

    fn clock_running(&self) -> bool {
        self.machine.clock_running()
    }

    fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    fn game_type_id(&self) -> String {
        GAME_TYPE_ID_EMOJI_PICTIONARY.to_string()
    }

    fn get_client_tx(&self, client_id: Uuid) -> Option<TokioMpscSender<ws::Message>> {
        self.clients.get(&client_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_rules() -> SessionRules {
        SessionRules {
            correct_points: 1,
            incorrect_penalty: 1,
            round_seconds: 30,
            total_rounds: 10,
            min_teams: 2,
        }
    }

    fn test_engine() -> EmojiPictionaryGame {
        EmojiPictionaryGame::new(
            Uuid::new_v4(),
            "Test Session".to_string(),
            test_rules(),
            Arc::new(Vec::new()), // builtin fallback deck
        )
    }

    fn command(cmd: &HostCommand) -> GenericClientToServerMessage {
        GenericClientToServerMessage::GameSpecificCommand {
            game_type_id: GAME_TYPE_ID_EMOJI_PICTIONARY.to_string(),
            command_data: serde_json::to_value(cmd).unwrap(),
        }
    }

    fn parse_event(msg: ws::Message) -> GameEvent {
        let text = match msg {
            ws::Message::Text(text) => text.to_string(),
            other => panic!("expected text frame, got {:?}", other),
        };
        let envelope: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(envelope["messageType"], "GameSpecificEvent");
        assert_eq!(
            envelope["payload"]["game_type_id"],
            GAME_TYPE_ID_EMOJI_PICTIONARY
        );
        serde_json::from_value(envelope["payload"]["event_data"].clone()).unwrap()
    }

    #[tokio::test]
    async fn connecting_client_receives_full_snapshot() {
        let mut engine = test_engine();
        let (tx, mut rx) = mpsc::channel(8);
        let client_id = Uuid::new_v4();

        engine.client_connected(client_id, tx).await;

        match parse_event(rx.recv().await.unwrap()) {
            GameEvent::FullStateUpdate(snapshot) => {
                assert_eq!(snapshot["name"], "Test Session");
                assert_eq!(snapshot["status"]["type"], "Setup");
            }
            other => panic!("expected FullStateUpdate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn locked_out_buzz_reports_not_accepted_to_caller_only() {
        let mut engine = test_engine();
        let (tx, mut rx) = mpsc::channel(32);
        let client_id = Uuid::new_v4();
        engine.client_connected(client_id, tx).await;
        rx.recv().await.unwrap(); // initial snapshot

        for cmd in [
            HostCommand::AddTeam {
                name: "Red".to_string(),
                color: TeamColor::Red,
            },
            HostCommand::AddTeam {
                name: "Blue".to_string(),
                color: TeamColor::Blue,
            },
            HostCommand::StartGame,
            HostCommand::Buzz {
                team_name: "Blue".to_string(),
            },
            HostCommand::SubmitVerdict {
                team_name: "Blue".to_string(),
                is_correct: false,
            },
        ] {
            engine.handle_event(client_id, command(&cmd)).await;
        }
        // Drain events so far.
        while rx.try_recv().is_ok() {}

        engine
            .handle_event(
                client_id,
                command(&HostCommand::Buzz {
                    team_name: "Blue".to_string(),
                }),
            )
            .await;

        match parse_event(rx.recv().await.unwrap()) {
            GameEvent::BuzzResult {
                team_name,
                accepted,
            } => {
                assert_eq!(team_name, "Blue");
                assert!(!accepted);
            }
            other => panic!("expected BuzzResult, got {:?}", other),
        }
        // Silent rejection: no snapshot broadcast followed it.
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.machine().team("Blue").unwrap().score, -1);
    }

    #[tokio::test]
    async fn out_of_turn_verdict_rejected_with_message() {
        let mut engine = test_engine();
        let (tx, mut rx) = mpsc::channel(32);
        let client_id = Uuid::new_v4();
        engine.client_connected(client_id, tx).await;
        rx.recv().await.unwrap();

        for cmd in [
            HostCommand::AddTeam {
                name: "Red".to_string(),
                color: TeamColor::Red,
            },
            HostCommand::AddTeam {
                name: "Blue".to_string(),
                color: TeamColor::Blue,
            },
            HostCommand::StartGame,
            HostCommand::Buzz {
                team_name: "Blue".to_string(),
            },
        ] {
            engine.handle_event(client_id, command(&cmd)).await;
        }
        while rx.try_recv().is_ok() {}

        engine
            .handle_event(
                client_id,
                command(&HostCommand::SubmitVerdict {
                    team_name: "Red".to_string(),
                    is_correct: true,
                }),
            )
            .await;

        match parse_event(rx.recv().await.unwrap()) {
            GameEvent::CommandRejected { reason } => {
                assert!(reason.contains("Out-of-turn"));
            }
            other => panic!("expected CommandRejected, got {:?}", other),
        }
        assert_eq!(engine.machine().active_responder(), Some("Blue"));
    }

    #[tokio::test]
    async fn command_tagged_with_advertised_id_is_routed() {
        let mut engine = test_engine();
        let (tx, mut rx) = mpsc::channel(8);
        let client_id = Uuid::new_v4();
        engine.client_connected(client_id, tx).await;
        rx.recv().await.unwrap();

        // Clients tag commands with the id the create-session response
        // handed them; any casing of it must reach the engine.
        for id in ["EmojiPictionary", "emojipictionary"] {
            engine
                .handle_event(
                    client_id,
                    GenericClientToServerMessage::GameSpecificCommand {
                        game_type_id: id.to_string(),
                        command_data: serde_json::to_value(HostCommand::AddTeam {
                            name: format!("Team {}", id),
                            color: TeamColor::Red,
                        })
                        .unwrap(),
                    },
                )
                .await;
        }
        assert_eq!(engine.machine().teams.len(), 2);
    }

    #[tokio::test]
    async fn broadcast_never_blocks_on_full_client_buffer() {
        let mut engine = test_engine();
        // Capacity 1: the connect snapshot fills the buffer and nothing
        // drains it, like a peer that stopped reading.
        let (tx, _rx) = mpsc::channel(1);
        let client_id = Uuid::new_v4();
        engine.client_connected(client_id, tx).await;

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            engine.handle_event(
                client_id,
                command(&HostCommand::AddTeam {
                    name: "Red".to_string(),
                    color: TeamColor::Red,
                }),
            ),
        )
        .await;

        assert!(result.is_ok());
        assert_eq!(engine.machine().teams.len(), 1);
    }

    #[tokio::test]
    async fn leave_session_requests_disconnect() {
        let mut engine = test_engine();
        let client_id = Uuid::new_v4();
        let result = engine
            .handle_event(client_id, GenericClientToServerMessage::LeaveSession)
            .await;
        assert_eq!(result, EventHandlingResult::DisconnectClient);
    }
}
