use axum::extract::{
    State,
    ws::{self, WebSocket, WebSocketUpgrade},
};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::game_logic::messages::{
    ClientToServerMessage, ServerToClientMessage, client_message_from_ws_text,
};
use crate::session::SessionActorHandle;
use crate::state::AppState;

pub async fn ws_handler(
    ws_upgrade: WebSocketUpgrade,
    State(app_state): State<AppState>,
) -> impl IntoResponse {
    ws_upgrade.on_upgrade(move |socket| handle_socket(socket, app_state))
}

type WsSink = SplitSink<WebSocket, ws::Message>;

async fn reject_handshake(sender: &mut WsSink, message: String) {
    let error_response = ServerToClientMessage::SystemError { message };
    if let Ok(ws_msg) = error_response.to_ws_text() {
        let _ = sender.send(ws_msg).await;
    }
    let _ = sender.close().await;
}

/// Resolves the first frame into a session handle. Everything before a valid
/// `ConnectToSession` is a handshake failure and closes the socket.
async fn await_handshake(
    sender: &mut WsSink,
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    app_state: &AppState,
) -> Option<SessionActorHandle> {
    let first_frame = match receiver.next().await {
        Some(Ok(ws::Message::Text(text))) => text,
        Some(Ok(other)) => {
            tracing::warn!(frame = ?other, "Non-text first frame, closing");
            reject_handshake(
                sender,
                "Initial message must be a text JSON message (ConnectToSession).".to_string(),
            )
            .await;
            return None;
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Socket error before handshake");
            let _ = sender.close().await;
            return None;
        }
        None => {
            tracing::debug!("Socket closed before handshake");
            return None;
        }
    };

    let session_id = match client_message_from_ws_text(&first_frame) {
        Ok(ClientToServerMessage::ConnectToSession { session_id }) => session_id,
        Ok(other) => {
            tracing::warn!(message = ?other, "First frame was not ConnectToSession");
            reject_handshake(
                sender,
                "Invalid initial message type. Expected ConnectToSession.".to_string(),
            )
            .await;
            return None;
        }
        Err(e) => {
            tracing::warn!(error = %e, frame.raw = %first_frame, "Unparseable handshake frame");
            reject_handshake(
                sender,
                format!("Invalid initial connection message format: {}", e),
            )
            .await;
            return None;
        }
    };

    match app_state.session_manager.get_session_handle(session_id).await {
        Some(handle) => Some(handle),
        None => {
            tracing::warn!(session.id = %session_id, "Handshake for unknown session");
            reject_handshake(sender, format!("Session {} not found.", session_id)).await;
            None
        }
    }
}

pub async fn handle_socket(socket: WebSocket, app_state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(session_handle) = await_handshake(&mut ws_sender, &mut ws_receiver, &app_state).await
    else {
        return;
    };

    let client_id = Uuid::new_v4();
    let session_id = session_handle.session_id;
    tracing::info!(
        session.id = %session_id,
        client.id = %client_id,
        "WebSocket client joined session"
    );

    let (actor_to_client_tx, mut actor_to_client_rx) = mpsc::channel::<ws::Message>(32);
    session_handle
        .client_connected(client_id, actor_to_client_tx)
        .await;

    // Pump frames from the session actor out to the socket.
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = actor_to_client_rx.recv().await {
            if ws_sender.send(message).await.is_err() {
                tracing::debug!(
                    session.id = %session_id,
                    client.id = %client_id,
                    "Send failed, peer likely gone"
                );
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Pump frames from the socket into the session actor.
    let recv_handle = session_handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            match frame {
                Ok(ws::Message::Text(text)) => {
                    if let Err(e) = recv_handle
                        .forward_client_event(client_id, text.to_string())
                        .await
                    {
                        tracing::error!(
                            session.id = %session_id,
                            client.id = %client_id,
                            error = %e,
                            "Failed to forward event to session actor"
                        );
                    }
                }
                // Axum answers pings itself; binary frames are not part of
                // the protocol.
                Ok(ws::Message::Binary(_))
                | Ok(ws::Message::Ping(_))
                | Ok(ws::Message::Pong(_)) => {}
                Ok(ws::Message::Close(_)) => {
                    tracing::debug!(
                        session.id = %session_id,
                        client.id = %client_id,
                        "Close frame from client"
                    );
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        session.id = %session_id,
                        client.id = %client_id,
                        error = %e,
                        "Socket error"
                    );
                    break;
                }
            }
        }
    });

    // Whichever pump finishes first takes the other down with it.
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    session_handle.client_disconnected(client_id).await;
    tracing::info!(
        session.id = %session_id,
        client.id = %client_id,
        "WebSocket client disconnected"
    );
}
