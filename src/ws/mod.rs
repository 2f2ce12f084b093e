//! WebSocket transport: one connection, one session.
//!
//! ## Connection lifecycle
//!
//! 1. Client connects to `GET /api/ws?session_id=<id>`. The session is
//!    attached *before* the upgrade completes, so an unknown id is rejected
//!    with a plain `404` and no socket is ever opened.
//! 2. The history snapshot goes out as the first binary frame, then every
//!    live output chunk follows as its own binary frame, in session order.
//! 3. On disconnect the attachment is dropped. The session keeps running.
//!
//! ## Frames (client → server)
//!
//! | Frame  | Content                                  | Effect              |
//! |--------|------------------------------------------|---------------------|
//! | binary | raw bytes                                | written to the PTY  |
//! | text   | `{"type":"input","data":"…"}`            | written to the PTY  |
//! | text   | `{"type":"resize","cols":C,"rows":R}`    | terminal resized    |
//! | text   | `{"type":"ping"}`                        | `pong`              |
//!
//! ## Frames (server → client)
//!
//! | Frame  | Content                                        |
//! |--------|------------------------------------------------|
//! | binary | terminal output (history first, then live)     |
//! | text   | `{"type":"exit","exit_code":N}`, then close    |
//! | text   | `{"type":"error","code":"…","message":"…"}`    |
//! | text   | `{"type":"pong"}`                              |
//!
//! A client that falls more than `subscriber_backlog` chunks behind gets a
//! `LAGGED` error and is closed; reconnecting replays history.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::error::SessionError;
use crate::sessions::Attachment;
use crate::AppState;

/// Query parameters for the WebSocket upgrade request.
#[derive(Deserialize)]
pub struct WsQuery {
    #[serde(alias = "sessionId")]
    pub session_id: String,
}

/// Control messages a client may send as text frames.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Input { data: String },
    Resize { cols: u16, rows: u16 },
    Ping,
}

type WsSink = SplitSink<WebSocket, Message>;

/// `GET /api/ws?session_id=<id>` — WebSocket upgrade handler.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let attachment = match state.sessions.attach(&query.session_id).await {
        Ok(a) => a,
        Err(e) => {
            info!("WS attach rejected: {e}");
            return e.into_response();
        }
    };
    ws.on_upgrade(move |socket| handle_ws(socket, state, attachment))
}

async fn send_json(sink: &mut WsSink, msg: Value) -> bool {
    let text = match serde_json::to_string(&msg) {
        Ok(t) => t,
        Err(e) => {
            error!("WS send: failed to serialize message: {e}");
            return true;
        }
    };
    sink.send(Message::Text(text.into())).await.is_ok()
}

async fn send_error(sink: &mut WsSink, code: &str, message: &str) -> bool {
    send_json(
        sink,
        json!({"type": "error", "code": code, "message": message}),
    )
    .await
}

/// Per-connection loop: session output out, client input in.
async fn handle_ws(socket: WebSocket, state: AppState, mut attachment: Attachment) {
    let session_id = attachment.session_id().to_string();
    info!("WS attached to session {session_id}");
    let (mut sink, mut stream) = socket.split();

    let history = attachment.take_history();
    if !history.is_empty() && sink.send(Message::Binary(history)).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            output = attachment.recv() => match output {
                Ok(chunk) => {
                    if sink.send(Message::Binary(chunk)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!("WS client of session {session_id} lagged by {n} chunk(s), disconnecting");
                    let _ = send_error(&mut sink, "LAGGED", "client fell too far behind the output stream").await;
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                Err(RecvError::Closed) => {
                    let exit_code = attachment.session().exit_code();
                    let _ = send_json(&mut sink, json!({"type": "exit", "exit_code": exit_code})).await;
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => {
                let Some(Ok(msg)) = incoming else { break };
                let keep_going = match msg {
                    Message::Binary(data) => forward_input(&state, &session_id, data, &mut sink).await,
                    Message::Text(text) => handle_text(&state, &session_id, text.as_str(), &mut sink).await,
                    Message::Close(_) => false,
                    Message::Ping(_) | Message::Pong(_) => true,
                };
                if !keep_going {
                    break;
                }
            }
        }
    }

    drop(attachment);
    info!("WS detached from session {session_id}");
}

async fn forward_input(state: &AppState, session_id: &str, data: Bytes, sink: &mut WsSink) -> bool {
    match state.sessions.send_input(session_id, data).await {
        Ok(()) => true,
        Err(e) => report(sink, &e).await,
    }
}

async fn handle_text(state: &AppState, session_id: &str, text: &str, sink: &mut WsSink) -> bool {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(m) => m,
        Err(e) => {
            debug!("WS session {session_id}: bad message: {e}");
            return send_error(sink, "INVALID_MESSAGE", &e.to_string()).await;
        }
    };
    match msg {
        ClientMessage::Input { data } => {
            forward_input(state, session_id, Bytes::from(data), sink).await
        }
        ClientMessage::Resize { cols, rows } => {
            match state.sessions.resize(session_id, cols, rows).await {
                Ok(()) => true,
                Err(e) => report(sink, &e).await,
            }
        }
        ClientMessage::Ping => send_json(sink, json!({"type": "pong"})).await,
    }
}

async fn report(sink: &mut WsSink, err: &SessionError) -> bool {
    send_error(sink, err.code(), &err.to_string()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
    use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

    use crate::sessions::tests::{test_config, wait_for_count};
    use crate::shell::scripted::ScriptedBackend;

    type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

    async fn serve(backend: &ScriptedBackend) -> (AppState, SocketAddr) {
        let state = AppState::new(test_config(8), Arc::new(backend.clone()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = crate::routes::router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (state, addr)
    }

    async fn connect(addr: SocketAddr, id: &str) -> Client {
        let (ws, _) = connect_async(format!("ws://{addr}/api/ws?session_id={id}"))
            .await
            .unwrap();
        ws
    }

    async fn next_frame(ws: &mut Client) -> WsMessage {
        tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap()
    }

    async fn next_binary(ws: &mut Client) -> Vec<u8> {
        match next_frame(ws).await {
            WsMessage::Binary(b) => b.to_vec(),
            other => panic!("expected binary frame, got {other:?}"),
        }
    }

    async fn next_json(ws: &mut Client) -> Value {
        match next_frame(ws).await {
            WsMessage::Text(t) => serde_json::from_str(t.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn test_client_message_parsing() {
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"resize","cols":100,"rows":40}"#).unwrap(),
            ClientMessage::Resize { cols: 100, rows: 40 }
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"input","data":"ls\r"}"#).unwrap(),
            ClientMessage::Input { data: "ls\r".into() }
        );
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"explode"}"#).is_err());
    }

    #[tokio::test]
    async fn test_unknown_session_rejected_before_upgrade() {
        let backend = ScriptedBackend::new();
        let (_state, addr) = serve(&backend).await;
        let err = connect_async(format!("ws://{addr}/api/ws?session_id=nope"))
            .await
            .unwrap_err();
        match err {
            tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 404),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_history_then_live_then_input() {
        let backend = ScriptedBackend::echoing();
        let (state, addr) = serve(&backend).await;
        let s = state.sessions.create(None, 80, 24).await.unwrap();
        backend.process(0).emit("$ ");
        for _ in 0..200 {
            if !s.history().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let mut ws = connect(addr, &s.id).await;
        assert_eq!(next_binary(&mut ws).await, b"$ ");

        ws.send(WsMessage::binary(Bytes::from_static(b"ls\r"))).await.unwrap();
        assert_eq!(next_binary(&mut ws).await, b"ls\r");
        ws.send(WsMessage::text(r#"{"type":"input","data":"pwd\r"}"#)).await.unwrap();
        assert_eq!(next_binary(&mut ws).await, b"pwd\r");
        assert_eq!(backend.process(0).input(), "ls\rpwd\r");
    }

    #[tokio::test]
    async fn test_two_clients_see_same_stream() {
        let backend = ScriptedBackend::new();
        let (state, addr) = serve(&backend).await;
        let s = state.sessions.create(None, 80, 24).await.unwrap();
        let mut c1 = connect(addr, &s.id).await;
        let mut c2 = connect(addr, &s.id).await;
        assert!(
            tokio::time::timeout(Duration::from_secs(2), async {
                while s.attachment_count() < 2 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .is_ok()
        );

        let p = backend.process(0);
        for i in 0..10 {
            p.emit(format!("{i},"));
        }
        let mut got1 = Vec::new();
        let mut got2 = Vec::new();
        while got1.len() < 20 {
            got1.extend(next_binary(&mut c1).await);
        }
        while got2.len() < 20 {
            got2.extend(next_binary(&mut c2).await);
        }
        assert_eq!(got1, b"0,1,2,3,4,5,6,7,8,9,");
        assert_eq!(got1, got2);
    }

    #[tokio::test]
    async fn test_resize_and_ping() {
        let backend = ScriptedBackend::new();
        let (state, addr) = serve(&backend).await;
        let s = state.sessions.create(None, 80, 24).await.unwrap();
        let mut ws = connect(addr, &s.id).await;

        ws.send(WsMessage::text(r#"{"type":"resize","cols":100,"rows":40}"#)).await.unwrap();
        ws.send(WsMessage::text(r#"{"type":"ping"}"#)).await.unwrap();
        assert_eq!(next_json(&mut ws).await["type"], "pong");
        assert_eq!(s.dimensions(), (100, 40));
        assert_eq!(backend.process(0).size(), (100, 40));

        ws.send(WsMessage::text(r#"{"type":"resize","cols":0,"rows":0}"#)).await.unwrap();
        let err = next_json(&mut ws).await;
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], "RESIZE_FAILED");
        assert_eq!(s.dimensions(), (100, 40));

        ws.send(WsMessage::text("not json")).await.unwrap();
        assert_eq!(next_json(&mut ws).await["code"], "INVALID_MESSAGE");
    }

    #[tokio::test]
    async fn test_exit_notifies_and_closes() {
        let backend = ScriptedBackend::new();
        let (state, addr) = serve(&backend).await;
        let s = state.sessions.create(None, 80, 24).await.unwrap();
        let mut ws = connect(addr, &s.id).await;
        while s.attachment_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        backend.process(0).emit("bye\r\n");
        backend.process(0).exit(3);
        assert_eq!(next_binary(&mut ws).await, b"bye\r\n");
        let exit = next_json(&mut ws).await;
        assert_eq!(exit["type"], "exit");
        assert_eq!(exit["exit_code"], 3);
        assert!(matches!(next_frame(&mut ws).await, WsMessage::Close(_)));
    }

    #[tokio::test]
    async fn test_disconnect_keeps_session() {
        let backend = ScriptedBackend::new();
        let (state, addr) = serve(&backend).await;
        let s = state.sessions.create(None, 80, 24).await.unwrap();
        let ws = connect(addr, &s.id).await;
        while s.attachment_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(ws);

        let detached = tokio::time::timeout(Duration::from_secs(2), async {
            while s.attachment_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(detached.is_ok());
        assert!(wait_for_count(&state.sessions, 1).await);
        assert!(state.sessions.get(&s.id).await.is_ok());
    }
}
