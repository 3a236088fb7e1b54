//! Mock AI medical session shared by the socket-level tests

#![allow(dead_code)]

use std::time::Duration;

use consult_session::documentation::DocumentationEvent;
use consult_session::ChannelSettings;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

pub const WAIT: Duration = Duration::from_secs(5);

pub type ServerSocket = WebSocketStream<TcpStream>;

pub struct Accepted {
    pub uri: String,
    pub socket: ServerSocket,
}

pub struct MockSession {
    pub url: String,
    accepted: mpsc::Receiver<Accepted>,
}

impl MockSession {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, accepted) = mpsc::channel(8);

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (uri_tx, uri_rx) = oneshot::channel();
                let callback = move |req: &Request, resp: Response| {
                    let _ = uri_tx.send(req.uri().to_string());
                    Ok::<_, ErrorResponse>(resp)
                };
                let Ok(socket) = accept_hdr_async(stream, callback).await else {
                    continue;
                };
                let uri = uri_rx.await.unwrap_or_default();
                if tx.send(Accepted { uri, socket }).await.is_err() {
                    break;
                }
            }
        });

        Self {
            url: format!("ws://{}/ws/medical/", addr),
            accepted,
        }
    }

    pub async fn next_connection(&mut self) -> Accepted {
        timeout(WAIT, self.accepted.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("mock server stopped")
    }

    pub fn settings(&self) -> ChannelSettings {
        ChannelSettings {
            reconnect_attempts: 3,
            reconnect_base: Duration::from_millis(300),
            ..ChannelSettings::new(self.url.clone())
        }
    }
}

pub async fn next_message(socket: &mut ServerSocket) -> Message {
    timeout(WAIT, socket.next())
        .await
        .expect("timed out waiting for a client message")
        .expect("client disconnected")
        .expect("socket error")
}

pub async fn next_json(socket: &mut ServerSocket) -> Value {
    loop {
        if let Message::Text(text) = next_message(socket).await {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

pub async fn next_binary(socket: &mut ServerSocket) -> Vec<u8> {
    loop {
        if let Message::Binary(bytes) = next_message(socket).await {
            return bytes;
        }
    }
}

pub async fn send_json(socket: &mut ServerSocket, value: Value) {
    socket.send(Message::Text(value.to_string())).await.unwrap();
}

pub async fn wait_event<F>(events: &mut broadcast::Receiver<DocumentationEvent>, pred: F) -> DocumentationEvent
where
    F: Fn(&DocumentationEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for documentation event")
}

