use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use log::{error, warn};
use tokio::sync::mpsc::unbounded_channel;
use tonedeaf_collab::{PrimaryKey, ServerEvent};

use crate::{auth::Session, context::ServerContext, Router};

async fn gateway(session: Session, context: ServerContext, upgrade: WebSocketUpgrade) -> Response {
    let user_id = session.user_id();

    upgrade.on_upgrade(move |socket| serve_socket(socket, context, user_id))
}

/// Pumps one socket until it closes. Messages are handled one at a time, in
/// the order they arrive, while outgoing events are written by a separate task.
async fn serve_socket(socket: WebSocket, context: ServerContext, user_id: PrimaryKey) {
    let (mut sink, mut stream) = socket.split();
    let (sender, mut outgoing) = unbounded_channel::<ServerEvent>();

    let connection = context.collab.connect(user_id, sender);

    let writer = tokio::spawn(async move {
        while let Some(event) = outgoing.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    error!("Could not encode event for user {}: {}", user_id, err);
                    continue;
                }
            };

            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => context.collab.handle_message(&connection, &text).await,
            Ok(Message::Close(_)) => break,
            // Pings are answered by axum, binary frames mean nothing here
            Ok(_) => {}
            Err(err) => {
                warn!("Socket of user {} failed: {}", user_id, err);
                break;
            }
        }
    }

    drop(connection);
    writer.abort();
}

pub fn router() -> Router {
    Router::new().route("/gateway", get(gateway))
}
