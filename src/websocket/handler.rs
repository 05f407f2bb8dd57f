use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::connection_manager::{Connection, ConnectionId, Outbound};
use crate::server::AppState;

use super::session::{Frame, Session, TransportError};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct WsQuery {
    /// Display name; not validated, may be empty
    pub username: String,
}

impl WsQuery {
    /// Take the first `username` parameter; repeated parameters are ignored.
    pub fn from_params(params: Vec<(String, String)>) -> Self {
        let username = params
            .into_iter()
            .find(|(key, _)| key == "username")
            .map(|(_, value)| value)
            .unwrap_or_default();
        Self { username }
    }
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, params),
    fields(username = tracing::field::Empty)
)]
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let query = WsQuery::from_params(params);
    tracing::Span::current().record("username", query.username.as_str());

    let ws = match ws {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket upgrade failed");
            return (StatusCode::BAD_REQUEST, "Could not open websocket connection").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, query.username))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState, username: String) {
    let connection_start = std::time::Instant::now();
    let ws_config = &state.settings.websocket;

    let (tx, rx) = mpsc::channel::<Outbound>(ws_config.channel_buffer.max(1));
    let connection = Arc::new(Connection::new(username, tx));
    let connection_id = connection.id;

    let (mut ws_sender, ws_receiver) = socket.split();

    if let Err(e) = state.registry.add(connection.clone()) {
        tracing::warn!(
            connection_id = %connection_id,
            display_name = %connection.display_name,
            error = %e,
            "Connection rejected"
        );
        let frame = CloseFrame {
            code: close_code::AGAIN,
            reason: e.to_string().into(),
        };
        let _ = ws_sender.send(Message::Close(Some(frame))).await;
        return;
    }

    tracing::info!(
        connection_id = %connection_id,
        display_name = %connection.display_name,
        "WebSocket connection established"
    );

    let mut writer = tokio::spawn(write_pump(ws_sender, rx, connection_id));

    let inbound = Box::pin(ws_receiver.filter_map(|result| async move { into_frame(result) }));
    let session = Session::new(
        connection.clone(),
        state.registry.clone(),
        state.broadcaster.clone(),
    );
    let summary = session.run(inbound).await;
    drop(connection);

    // The session queued a close frame; give the writer a moment to flush it.
    if tokio::time::timeout(ws_config.close_grace(), &mut writer)
        .await
        .is_err()
    {
        tracing::debug!(connection_id = %connection_id, "Writer did not finish in time, aborting");
        writer.abort();
    }

    tracing::info!(
        connection_id = %connection_id,
        messages_relayed = summary.messages_relayed,
        malformed_frames = summary.malformed_frames,
        panicked = summary.panicked,
        duration_secs = connection_start.elapsed().as_secs_f64(),
        "WebSocket connection closed"
    );
}

/// Map a WebSocket read to a session frame. Ping/pong are answered by axum
/// and never reach the session.
fn into_frame(result: Result<Message, axum::Error>) -> Option<Result<Frame, TransportError>> {
    match result {
        Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
        Ok(Message::Binary(bytes)) => Some(Ok(Frame::Binary(bytes.to_vec()))),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
        Err(e) => Some(Err(TransportError::Read(Box::new(e)))),
    }
}

/// Drain the connection's outbound queue into the socket
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    connection_id: ConnectionId,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(frame) => {
                if let Err(e) = sink.send(Message::Text(frame.as_ref().into())).await {
                    tracing::debug!(
                        connection_id = %connection_id,
                        error = %e,
                        "WebSocket write failed"
                    );
                    return;
                }
            }
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
        }
    }

    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_frames_are_skipped() {
        assert!(into_frame(Ok(Message::Ping(Default::default()))).is_none());
        assert!(into_frame(Ok(Message::Pong(Default::default()))).is_none());
    }

    #[test]
    fn test_data_frames_are_forwarded() {
        let text = into_frame(Ok(Message::Text("hi".into()))).unwrap().unwrap();
        assert_eq!(text, Frame::Text("hi".to_string()));

        let binary = into_frame(Ok(Message::Binary(vec![1u8, 2, 3].into())))
            .unwrap()
            .unwrap();
        assert_eq!(binary, Frame::Binary(vec![1, 2, 3]));

        let close = into_frame(Ok(Message::Close(None))).unwrap().unwrap();
        assert_eq!(close, Frame::Close);
    }

    #[test]
    fn test_read_error_is_transport_error() {
        let err = axum::Error::new(std::io::Error::other("reset"));
        assert!(matches!(into_frame(Err(err)), Some(Err(TransportError::Read(_)))));
    }

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_username_defaults_to_empty() {
        assert_eq!(WsQuery::from_params(Vec::new()).username, "");
        assert_eq!(WsQuery::from_params(params(&[("room", "x")])).username, "");
    }

    #[test]
    fn test_first_username_wins() {
        let query = WsQuery::from_params(params(&[
            ("room", "x"),
            ("username", "a"),
            ("username", "b"),
        ]));
        assert_eq!(query.username, "a");
    }
}
