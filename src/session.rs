use axum::extract::ws;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::{GamesConfig, ScoringConfig};
use crate::content::PromptCache;
use crate::game_logic::{
    EmojiPictionaryGame, GameLogic, GameType, ServerToClientMessage,
    emoji_pictionary::SessionRules, messages as game_messages,
};

#[derive(Debug, Serialize, Clone)]
pub struct SessionDetails {
    pub session_id: Uuid,
    pub host_id: Uuid,
    pub session_name: String,
    pub game_type_created: String,
}

#[derive(Debug)]
pub enum SessionManagerMessage {
    CreateSession {
        session_name: String,
        requested_game_type: Option<String>,
        respond_to: oneshot::Sender<Result<SessionDetails, String>>,
    },
    GetSessionHandle {
        session_id: Uuid,
        respond_to: oneshot::Sender<Option<SessionActorHandle>>,
    },
    SessionActorShutdown {
        session_id: Uuid,
    },
}

pub struct SessionManagerActor {
    receiver: mpsc::Receiver<SessionManagerMessage>,
    sessions: HashMap<Uuid, SessionActorHandle>,
    self_sender: mpsc::Sender<SessionManagerMessage>,
    games_config: GamesConfig,
    scoring_config: ScoringConfig,
    prompt_cache: Arc<PromptCache>,
}

impl SessionManagerActor {
    fn new(
        receiver: mpsc::Receiver<SessionManagerMessage>,
        self_sender: mpsc::Sender<SessionManagerMessage>,
        games_config: GamesConfig,
        scoring_config: ScoringConfig,
        prompt_cache: Arc<PromptCache>,
    ) -> Self {
        SessionManagerActor {
            receiver,
            sessions: HashMap::new(),
            self_sender,
            games_config,
            scoring_config,
            prompt_cache,
        }
    }

    #[tracing::instrument(skip(self, msg), fields(
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    async fn handle_message(&mut self, msg: SessionManagerMessage) {
        match msg {
            SessionManagerMessage::CreateSession {
                session_name,
                requested_game_type,
                respond_to,
            } => {
                let session_name = session_name.trim().to_string();
                if session_name.is_empty() {
                    // Rejected before any state mutation.
                    let _ = respond_to.send(Err("Session name cannot be empty.".to_string()));
                    return;
                }

                let session_id = Uuid::new_v4();
                let host_id = Uuid::new_v4();
                let requested = requested_game_type
                    .unwrap_or_else(|| GameType::EmojiPictionary.primary_id().to_string())
                    .to_lowercase();

                tracing::info!(
                    session.id = %session_id,
                    session.name = %session_name,
                    request.game_type = %requested,
                    "Received CreateSession request"
                );

                let Some(game_type) = GameType::all()
                    .into_iter()
                    .find(|g| g.aliases().contains(&requested.as_str()))
                else {
                    tracing::warn!(
                        session.id = %session_id,
                        game.type.requested = %requested,
                        "Rejected unknown game type"
                    );
                    let _ = respond_to.send(Err(format!("Unknown game type '{}'.", requested)));
                    return;
                };

                if !self
                    .games_config
                    .enabled_types
                    .contains(game_type.primary_id())
                {
                    tracing::error!(
                        session.id = %session_id,
                        game.type = %game_type.primary_id(),
                        "Game type not enabled"
                    );
                    let _ = respond_to.send(Err(format!(
                        "Game type '{}' is not enabled.",
                        game_type.primary_id()
                    )));
                    return;
                }

                let manager_handle = SessionManagerHandle {
                    sender: self.self_sender.clone(),
                };

                let (session_actor_handle, game_type_created) = match game_type {
                    GameType::EmojiPictionary => {
                        let deck = self.prompt_cache.emoji_prompts().await;
                        let rules = SessionRules {
                            correct_points: self.scoring_config.correct_points,
                            incorrect_penalty: self.scoring_config.incorrect_penalty,
                            round_seconds: self.scoring_config.round_seconds,
                            total_rounds: self.scoring_config.total_rounds,
                            min_teams: self.scoring_config.min_teams,
                        };
                        let game_engine = EmojiPictionaryGame::new(
                            session_id,
                            session_name.clone(),
                            rules,
                            deck,
                        );
                        // The response carries the engine's own id; clients
                        // echo it verbatim in every GameSpecificCommand.
                        let game_type_created = game_engine.game_type_id();
                        let handle = SessionActorHandle::spawn::<EmojiPictionaryGame>(
                            session_id,
                            32,
                            manager_handle,
                            game_engine,
                        );
                        (handle, game_type_created)
                    }
                };

                self.sessions.insert(session_id, session_actor_handle);

                tracing::info!(
                    session.id = %session_id,
                    host.id = %host_id,
                    game.type = %game_type_created,
                    "Created session successfully"
                );

                let _ = respond_to.send(Ok(SessionDetails {
                    session_id,
                    host_id,
                    session_name,
                    game_type_created,
                }));
            }
            SessionManagerMessage::GetSessionHandle {
                session_id,
                respond_to,
            } => {
                tracing::debug!(
                    session.id = %session_id,
                    "Received GetSessionHandle request"
                );
                let handle = self.sessions.get(&session_id).cloned();
                let _ = respond_to.send(handle);
            }
            SessionManagerMessage::SessionActorShutdown { session_id } => {
                if self.sessions.remove(&session_id).is_some() {
                    tracing::info!(
                        session.id = %session_id,
                        "Cleaning up session after actor shutdown"
                    );
                } else {
                    tracing::warn!(
                        session.id = %session_id,
                        "Received shutdown for unknown session"
                    );
                }
            }
        }
    }
}

#[tracing::instrument(skip(actor))]
pub async fn run_session_manager_actor(mut actor: SessionManagerActor) {
    tracing::info!("SessionManager actor started");
    while let Some(msg) = actor.receiver.recv().await {
        actor.handle_message(msg).await;
    }
    tracing::info!("SessionManager actor stopped");
}

#[derive(Clone, Debug)]
pub struct SessionManagerHandle {
    sender: mpsc::Sender<SessionManagerMessage>,
}

impl SessionManagerHandle {
    pub fn spawn(
        buffer_size: usize,
        games_config: GamesConfig,
        scoring_config: ScoringConfig,
        prompt_cache: Arc<PromptCache>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = SessionManagerActor::new(
            receiver,
            sender.clone(),
            games_config,
            scoring_config,
            prompt_cache,
        );
        let handle = Self {
            sender: sender.clone(),
        };
        tokio::spawn(run_session_manager_actor(actor));
        handle
    }

    pub async fn create_session(
        &self,
        session_name: String,
        requested_game_type: Option<String>,
    ) -> Result<SessionDetails, String> {
        let (respond_to, rx) = oneshot::channel();
        self.sender
            .send(SessionManagerMessage::CreateSession {
                session_name,
                requested_game_type,
                respond_to,
            })
            .await
            .map_err(|e| format!("Failed to send CreateSession: {}", e))?;
        rx.await
            .map_err(|e| format!("SessionManager no response: {}", e))?
    }

    pub async fn get_session_handle(&self, session_id: Uuid) -> Option<SessionActorHandle> {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(SessionManagerMessage::GetSessionHandle {
                session_id,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    pub async fn notify_session_shutdown(&self, session_id: Uuid) -> Result<(), String> {
        self.sender
            .send(SessionManagerMessage::SessionActorShutdown { session_id })
            .await
            .map_err(|e| format!("Failed to send SessionActorShutdown: {}", e))
    }
}

#[derive(Debug)]
pub enum SessionActorMessage {
    ClientEvent {
        client_id: Uuid,
        raw_payload: String,
    },
    ClientConnected {
        client_id: Uuid,
        client_tx: mpsc::Sender<ws::Message>,
    },
    ClientDisconnected {
        client_id: Uuid,
    },
}

pub struct SessionActor<G: GameLogic + Send + 'static> {
    receiver: mpsc::Receiver<SessionActorMessage>,
    session_id: Uuid,
    game_engine: G,
    manager_handle: SessionManagerHandle,
}

impl<G: GameLogic + Send + 'static> SessionActor<G> {
    fn new(
        receiver: mpsc::Receiver<SessionActorMessage>,
        session_id: Uuid,
        game_engine: G,
        manager_handle: SessionManagerHandle,
    ) -> Self {
        SessionActor {
            receiver,
            session_id,
            game_engine,
            manager_handle,
        }
    }

    async fn notify_shutdown(&self) {
        if let Err(e) = self
            .manager_handle
            .notify_session_shutdown(self.session_id)
            .await
        {
            tracing::error!(
                error = %e,
                "Failed to notify SessionManager of shutdown"
            );
        }
    }

    #[tracing::instrument(skip(self, msg), fields(
        session.id = %self.session_id,
        game.type = %self.game_engine.game_type_id(),
        msg_type = %std::any::type_name_of_val(&msg)
    ))]
    async fn handle_message(&mut self, msg: SessionActorMessage) -> bool {
        match msg {
            SessionActorMessage::ClientEvent {
                client_id,
                raw_payload,
            } => {
                match game_messages::client_message_from_ws_text(&raw_payload) {
                    Ok(parsed_message) => {
                        tracing::debug!(
                            client.id = %client_id,
                            event.type = ?parsed_message,
                            "Dispatching client event to engine"
                        );
                        let result = self
                            .game_engine
                            .handle_event(client_id, parsed_message)
                            .await;

                        match result {
                            crate::game_logic::EventHandlingResult::Handled => {}
                            crate::game_logic::EventHandlingResult::DisconnectClient => {
                                tracing::info!(
                                    client.id = %client_id,
                                    "Engine requested client disconnection"
                                );
                                self.game_engine.client_disconnected(client_id).await;

                                if self.game_engine.is_empty() {
                                    tracing::info!("Last client left, shutting session down");
                                    self.notify_shutdown().await;
                                    return true;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            client.id = %client_id,
                            error = %e,
                            event.raw = %raw_payload,
                            "Unparseable client event"
                        );
                        if let Some(client_tx) = self.game_engine.get_client_tx(client_id) {
                            let error_response = ServerToClientMessage::SystemError {
                                message: format!("Invalid message format: {}", e),
                            };
                            if let Ok(ws_msg) = error_response.to_ws_text()
                                && client_tx.send(ws_msg).await.is_err()
                            {
                                tracing::warn!(
                                    client.id = %client_id,
                                    "Failed to send error response to client"
                                );
                            }
                        }
                    }
                }
            }
            SessionActorMessage::ClientConnected {
                client_id,
                client_tx,
            } => {
                tracing::debug!(
                    client.id = %client_id,
                    "Client connected"
                );
                self.game_engine
                    .client_connected(client_id, client_tx)
                    .await;
            }
            SessionActorMessage::ClientDisconnected { client_id } => {
                tracing::debug!(
                    client.id = %client_id,
                    "Client disconnected"
                );
                self.game_engine.client_disconnected(client_id).await;

                // Shut down as soon as the last client is gone; the
                // inactivity timeout only covers sessions that still have
                // clients.
                if self.game_engine.is_empty() {
                    tracing::info!("Last client disconnected, shutting session down");
                    self.notify_shutdown().await;
                    return true;
                }
            }
        }
        false // Default: don't shut down
    }
}

#[tracing::instrument(skip(actor), fields(
    session.id = %actor.session_id,
    game.type = %actor.game_engine.game_type_id()
))]
pub async fn run_session_actor<G: GameLogic + Send + 'static>(mut actor: SessionActor<G>) {
    tracing::info!("Session actor started");

    let client_ws_inactivity_timeout_duration = StdDuration::from_secs(60 * 60);
    let mut last_client_ws_activity = Instant::now();

    // Drives the round clock. The interval is gated on the engine reporting
    // a running clock; the engine discards expiries for superseded prompts.
    let mut round_clock = tokio::time::interval(StdDuration::from_secs(1));
    round_clock.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_msg = actor.receiver.recv() => {
                match maybe_msg {
                    Some(msg) => {
                        if matches!(msg, SessionActorMessage::ClientEvent { .. }) {
                            last_client_ws_activity = Instant::now();
                        }
                        if actor.handle_message(msg).await {
                            break;
                        }
                    }
                    None => {
                        tracing::info!("Mailbox closed, session actor stopping");
                        break;
                    }
                }
            }
            _ = round_clock.tick(), if actor.game_engine.clock_running() => {
                actor.game_engine.handle_tick().await;
            }
            _ = tokio::time::sleep_until(last_client_ws_activity + client_ws_inactivity_timeout_duration), if !actor.game_engine.is_empty() => {
                tracing::info!("Session idle past timeout, shutting down");
                actor.notify_shutdown().await;
                break;
            }
        }
    }

    tracing::info!("Session actor stopping");
}

#[derive(Clone, Debug)]
pub struct SessionActorHandle {
    pub sender: mpsc::Sender<SessionActorMessage>,
    pub session_id: Uuid,
}

impl SessionActorHandle {
    pub fn spawn<G: GameLogic + Send + 'static>(
        session_id: Uuid,
        buffer_size: usize,
        session_manager_handle: SessionManagerHandle,
        game_engine_instance: G,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = SessionActor::<G>::new(
            receiver,
            session_id,
            game_engine_instance,
            session_manager_handle,
        );
        tokio::spawn(run_session_actor::<G>(actor));
        Self { sender, session_id }
    }

    pub async fn forward_client_event(
        &self,
        client_id: Uuid,
        raw_payload: String,
    ) -> Result<(), String> {
        self.sender
            .send(SessionActorMessage::ClientEvent {
                client_id,
                raw_payload,
            })
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    pub async fn client_connected(&self, client_id: Uuid, client_tx: mpsc::Sender<ws::Message>) {
        if self
            .sender
            .send(SessionActorMessage::ClientConnected {
                client_id,
                client_tx,
            })
            .await
            .is_err()
        {
            tracing::error!("Failed to send ClientConnected");
        }
    }

    pub async fn client_disconnected(&self, client_id: Uuid) {
        if self
            .sender
            .send(SessionActorMessage::ClientDisconnected { client_id })
            .await
            .is_err()
        {
            tracing::error!("Failed to send ClientDisconnected");
        }
    }
}
