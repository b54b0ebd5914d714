//! Fakes for exercising the socket side without a real panel or node

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::auth::{AuthError, CredentialSource, Credentials};
use crate::config::config::Config;

pub type ServerSocket = WebSocketStream<TcpStream>;

/// Hands out `token-1`, `token-2`, ... for a fixed socket URL
pub struct StaticSource {
    url: String,
    calls: AtomicUsize,
}

impl StaticSource {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSource for StaticSource {
    async fn acquire(&self) -> Result<Credentials, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Credentials::new(
            self.url.clone(),
            format!("token-{}", n),
            Duration::from_secs(600),
        ))
    }
}

/// Small delays everywhere so reconnect paths finish quickly
pub fn fast_config() -> Config {
    Config::from_json(
        &json!({
            "panel": { "url": "http://panel.test", "api_key": "ptlc_test", "server_id": "srv" },
            "websocket": {
                "reconnect_base_ms": 10,
                "reconnect_max_ms": 50,
                "reconnect_jitter": 0.0,
                "ping_interval_secs": 1,
                "liveness_window_secs": 5,
                "auth_timeout_secs": 2,
                "max_auth_rejections": 2
            },
            "buffer": { "capacity": 50, "max_tail": 20 },
            "commands": { "response_timeout_ms": 2000 }
        })
        .to_string(),
    )
    .expect("test config")
}

/// Accept websocket clients on a random local port and run `handler` for
/// each one. Returns the `ws://` URL to connect to.
pub async fn spawn_console_server<F, Fut>(handler: F) -> String
where
    F: Fn(ServerSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test server");
    let addr = listener.local_addr().expect("local addr");
    let handler = Arc::new(handler);

    tokio::spawn(async move {
        while let Ok((tcp, _)) = listener.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Ok(ws) = tokio_tungstenite::accept_async(tcp).await {
                    handler(ws).await;
                }
            });
        }
    });

    format!("ws://{}", addr)
}

/// Wait for the client's `auth` frame and return its token
pub async fn expect_auth(ws: &mut ServerSocket) -> String {
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Text(text) = message {
            let frame: serde_json::Value = serde_json::from_str(text.as_str()).expect("client sent json");
            if frame["event"] == "auth" {
                return frame["args"][0].as_str().unwrap_or_default().to_string();
            }
        }
    }
    panic!("client went away before authenticating");
}

/// Wait for the next `send command` frame and return the command
pub async fn expect_command(ws: &mut ServerSocket) -> Option<String> {
    while let Some(Ok(message)) = ws.next().await {
        if let Message::Text(text) = message {
            let frame: serde_json::Value = serde_json::from_str(text.as_str()).expect("client sent json");
            if frame["event"] == "send command" {
                return frame["args"][0].as_str().map(String::from);
            }
        }
    }
    None
}

pub async fn send_event(ws: &mut ServerSocket, event: &str, args: &[&str]) {
    let frame = json!({ "event": event, "args": args });
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("send test frame");
}
