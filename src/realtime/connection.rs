use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};

use super::hub::ConnId;
use super::protocol::{ClientMessage, PresenceUser, ServerMessage};
use crate::constants::{
    ERR_NOT_TEAM_MEMBER, MAX_DOCUMENT_CONTENT_LEN, MAX_DOCUMENT_UPDATE_LEN,
};
use crate::db;
use crate::error::{AppError, Result};
use crate::models::{Permission, ResourceType, User};
use crate::permissions::require_access;
use crate::routes::messages::post_team_message;
use crate::AppState;

/// Drive one authenticated WebSocket until either side closes it
pub async fn serve_socket(socket: WebSocket, state: AppState, user: User) {
    let (mut sink, mut stream) = socket.split();
    let (conn, mut outbox) = state
        .hub
        .connect(PresenceUser {
            user_id: user.id.clone(),
            name: user.name.clone(),
        })
        .await;

    // Writer: the hub is the only producer, so frame order matches hub order
    let mut writer = tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode realtime frame: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = handle_frame(&state, conn, &user, text.as_str()).await {
                        state.hub.deliver(conn, ServerMessage::error(client_error(&e))).await;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Pings are answered by axum; binary frames are not part of the protocol
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("Realtime connection {} read error: {}", conn, e);
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    // Dropping the hub's outbox sender ends the writer
    state.hub.disconnect(conn).await;
}

async fn handle_frame(state: &AppState, conn: ConnId, user: &User, text: &str) -> Result<()> {
    let message: ClientMessage = serde_json::from_str(text)
        .map_err(|e| AppError::invalid(format!("Malformed message: {e}")))?;

    match message {
        ClientMessage::JoinDocument { document_id } => {
            join_document(state, conn, user, &document_id).await?;
        }
        ClientMessage::LeaveDocument { document_id } => {
            state.hub.leave_document(conn, &document_id).await;
        }
        ClientMessage::DocumentUpdate {
            document_id,
            update,
            content,
        } => {
            if update.is_empty() || update.len() > MAX_DOCUMENT_UPDATE_LEN {
                return Err(AppError::invalid("Document update is empty or too large"));
            }
            if content
                .as_ref()
                .is_some_and(|c| c.len() > MAX_DOCUMENT_CONTENT_LEN)
            {
                return Err(AppError::PayloadTooLarge);
            }
            state
                .hub
                .document_update(conn, &document_id, update, content)
                .await;
        }
        ClientMessage::Cursor {
            document_id,
            cursor,
        } => {
            state.hub.cursor(conn, &document_id, cursor).await;
        }
        ClientMessage::JoinTeam { team_id } => {
            if db::teams::member_role(&state.db, &team_id, &user.id)
                .await?
                .is_none()
            {
                return Err(AppError::forbidden(ERR_NOT_TEAM_MEMBER));
            }
            state.hub.join_team(conn, &team_id).await;
        }
        ClientMessage::LeaveTeam { team_id } => {
            state.hub.leave_team(conn, &team_id).await;
        }
        ClientMessage::Typing { scope, is_typing } => {
            state.hub.typing(conn, scope, is_typing).await;
        }
        ClientMessage::ChatMessage { team_id, content } => {
            post_team_message(state, &team_id, &user.id, &content).await?;
        }
        ClientMessage::Ping => {
            state.hub.deliver(conn, ServerMessage::Pong).await;
        }
    }

    Ok(())
}

/// Join the room first, then read the database
///
/// The hub hands back pending deltas and those still being written, so a
/// delta is never missing from the state. One written between the two steps
/// can appear twice; clients apply deltas idempotently.
async fn join_document(state: &AppState, conn: ConnId, user: &User, document_id: &str) -> Result<()> {
    let access = require_access(
        &state.db,
        &user.id,
        ResourceType::Document,
        document_id,
        Permission::View,
    )
    .await?;
    let can_edit = access.allows(Permission::Edit);

    let Some(pending) = state.hub.join_document(conn, document_id, can_edit).await else {
        return Ok(());
    };

    let Some(document) = db::documents::find(&state.db, document_id).await? else {
        state.hub.leave_document(conn, document_id).await;
        return Err(AppError::NotFound("Document"));
    };
    let persisted = db::documents::updates(&state.db, document_id).await?;

    let updates = persisted
        .into_iter()
        .map(|u| u.update_data)
        .chain(pending.updates)
        .collect();

    state
        .hub
        .deliver(
            conn,
            ServerMessage::DocumentState {
                document_id: document.id,
                title: document.title,
                content: pending.content.unwrap_or(document.content),
                updates,
                can_edit,
            },
        )
        .await;

    tracing::debug!("User {} joined document {} (edit: {})", user.id, document_id, can_edit);
    Ok(())
}

/// Message for an `error` frame; internals are logged, not sent
fn client_error(err: &AppError) -> String {
    match err {
        AppError::Unauthorized(msg)
        | AppError::Forbidden(msg)
        | AppError::Conflict(msg)
        | AppError::InvalidInput(msg) => msg.clone(),
        AppError::NotFound(_) | AppError::PayloadTooLarge => err.to_string(),
        other => {
            tracing::error!("Realtime handler failed: {}", other);
            "Internal server error".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_hides_internals() {
        assert_eq!(
            client_error(&AppError::NotFound("Document")),
            "Document not found"
        );
        assert_eq!(
            client_error(&AppError::forbidden(ERR_NOT_TEAM_MEMBER)),
            ERR_NOT_TEAM_MEMBER
        );
        assert_eq!(
            client_error(&AppError::Internal("disk on fire".to_string())),
            "Internal server error"
        );
    }
}
