use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Envelope for everything a client sends over the WebSocket.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "messageType", content = "payload")]
pub enum ClientToServerMessage {
    /// First frame after the WebSocket opens: binds the connection to a
    /// session. The transport layer consumes this before the game engine
    /// sees any traffic.
    ConnectToSession { session_id: Uuid },
    /// Deliberate leave. The session actor drops the client instead of
    /// waiting for the socket to close.
    LeaveSession,
    /// A command addressed to the game engine running in the session.
    GameSpecificCommand {
        /// Engine id the command targets, matched case-insensitively.
        game_type_id: String,
        /// Opaque to the router; the engine deserializes it into its own
        /// command enum.
        command_data: JsonValue,
    },
}

/// Envelope for everything the server pushes to a client.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "messageType", content = "payload")] // camelCase tag for JS clients
pub enum ServerToClientMessage {
    /// An event emitted by the session's game engine.
    GameSpecificEvent {
        game_type_id: String,
        event_data: JsonValue,
    },
    /// Transport-level failure: bad envelope, unknown session. Game rule
    /// rejections travel inside GameSpecificEvent instead.
    SystemError { message: String },
}

impl ServerToClientMessage {
    pub fn to_ws_text(&self) -> Result<axum::extract::ws::Message, serde_json::Error> {
        serde_json::to_string(self)
            .map(|json_string| axum::extract::ws::Message::Text(json_string.into()))
    }

    pub fn new_game_specific_event<S: Serialize>(
        game_type_id: String,
        game_specific_payload: &S,
    ) -> Result<Self, serde_json::Error> {
        let event_data = serde_json::to_value(game_specific_payload)?;
        Ok(ServerToClientMessage::GameSpecificEvent {
            game_type_id,
            event_data,
        })
    }
}

pub fn client_message_from_ws_text(text: &str) -> Result<ClientToServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect_to_session() {
        let session_id = Uuid::new_v4();
        let raw = format!(
            r#"{{"messageType":"ConnectToSession","payload":{{"session_id":"{}"}}}}"#,
            session_id
        );
        match client_message_from_ws_text(&raw).unwrap() {
            ClientToServerMessage::ConnectToSession { session_id: id } => {
                assert_eq!(id, session_id)
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_game_specific_command() {
        let raw = r#"{"messageType":"GameSpecificCommand","payload":{"game_type_id":"EmojiPictionary","command_data":{"command":"Buzz","team_name":"Blue"}}}"#;
        match client_message_from_ws_text(raw).unwrap() {
            ClientToServerMessage::GameSpecificCommand {
                game_type_id,
                command_data,
            } => {
                assert_eq!(game_type_id, "EmojiPictionary");
                assert_eq!(command_data["command"], "Buzz");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_system_error_round_trips_through_ws_text() {
        let msg = ServerToClientMessage::SystemError {
            message: "Session not found".to_string(),
        };
        let ws_msg = msg.to_ws_text().unwrap();
        match ws_msg {
            axum::extract::ws::Message::Text(text) => {
                assert!(text.contains("SystemError"));
                assert!(text.contains("Session not found"));
            }
            other => panic!("expected text frame, got {:?}", other),
        }
    }
}
