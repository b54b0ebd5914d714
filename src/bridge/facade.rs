//! The one object the chat layer talks to
//!
//! Queries (`status`, `tail`) never touch the network and keep working while
//! the connection is down. Commands go through the correlator and always come
//! back as a value, never as a retry.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::results::{BridgeError, Diagnostics, PlayerList, WhitelistAdd, WhitelistRemove};
use crate::auth::{AuthError, CredentialSource, PanelSessionProvider};
use crate::config::config::Config;
use crate::console::patterns::{self, ConsoleResponse, PATTERN_VERSION};
use crate::console::{Correlator, LogLine, LogRingBuffer, Outcome, SharedMatcher};
use crate::websocket::{ConnectionState, ConnectionStateMachine};

struct Supervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Bridge {
    config: Config,
    source: Arc<dyn CredentialSource>,
    buffer: Arc<LogRingBuffer>,
    correlator: Arc<Correlator>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl Bridge {
    pub fn new(config: Config) -> Result<Self, AuthError> {
        let source = Arc::new(PanelSessionProvider::new(&config)?);
        Ok(Self::with_source(config, source))
    }

    pub fn with_source(config: Config, source: Arc<dyn CredentialSource>) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let buffer = Arc::new(LogRingBuffer::new(config.buffer.capacity));
        let correlator = Arc::new(Correlator::new(state_rx.clone()));

        Self {
            config,
            source,
            buffer,
            correlator,
            state_tx: Arc::new(state_tx),
            state_rx,
            supervisor: Mutex::new(None),
        }
    }

    /// Spawn the connection task. A no-op while one is already running.
    pub async fn start(&self) {
        let mut supervisor = self.supervisor.lock().await;
        if let Some(running) = supervisor.as_ref() {
            if !running.handle.is_finished() {
                tracing::warn!("Console bridge already running");
                return;
            }
        }

        let machine = ConnectionStateMachine::new(
            self.config.websocket.clone(),
            self.config.panel_base().to_string(),
            self.source.clone(),
            self.buffer.clone(),
            self.correlator.clone(),
            self.state_tx.clone(),
        );
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(machine.run(cancel.clone()));

        tracing::info!("Console bridge started");
        *supervisor = Some(Supervisor { cancel, handle });
    }

    pub async fn stop(&self) {
        let running = self.supervisor.lock().await.take();
        if let Some(Supervisor { cancel, handle }) = running {
            tracing::info!("Stopping console bridge...");
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::error!("Console connection task ended abnormally: {}", e);
            }
        }

        // Covers a task that ended in Failed before stop was called
        if !self.status().is_live() && self.correlator.pending_count() > 0 {
            self.correlator.detach().await;
        }
        tracing::info!("Console bridge stopped");
    }

    pub fn status(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the connection is live. Returns false on timeout or when
    /// the connection has failed for good.
    pub async fn wait_until_live(&self, timeout: Duration) -> bool {
        let mut rx = self.state_rx.clone();
        let wait = rx.wait_for(|s| s.is_live() || *s == ConnectionState::Failed);
        match tokio::time::timeout(timeout, wait).await {
            Ok(Ok(state)) => state.is_live(),
            _ => false,
        }
    }

    /// Most recent console lines, `n` clamped to `1..=max_tail`
    pub async fn tail(&self, n: usize) -> Vec<LogLine> {
        let n = n.clamp(1, self.config.buffer.max_tail);
        self.buffer.tail(n).await
    }

    pub async fn last_line(&self) -> Option<LogLine> {
        self.buffer.last().await
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            state: self.status(),
            buffered_lines: self.buffer.len().await,
            pending_commands: self.correlator.pending_count(),
            ambiguous_matches: self.correlator.ambiguous_matches(),
            pattern_version: PATTERN_VERSION,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.config.commands.response_timeout()
    }

    /// Send an arbitrary console command and wait for a line `matcher` accepts
    pub async fn send_raw(
        &self,
        command: &str,
        matcher: SharedMatcher,
        timeout: Duration,
    ) -> Result<Outcome, BridgeError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(BridgeError::EmptyCommand);
        }
        // A newline would smuggle a second command into the server's stdin
        if command.contains('\n') || command.contains('\r') {
            return Err(BridgeError::MultiLineCommand);
        }
        Ok(self.correlator.send(command, matcher, timeout).await)
    }

    pub async fn player_list(&self) -> PlayerList {
        let outcome = self
            .correlator
            .send("list", patterns::list_matcher(), self.default_timeout())
            .await;

        match outcome {
            Outcome::Matched(line) => {
                let text = line.clean_text();
                match patterns::parse_player_list(&text) {
                    Some(snapshot) => PlayerList::Players(snapshot),
                    None => PlayerList::Unavailable(format!("unexpected response format: {}", text)),
                }
            }
            Outcome::TimedOut => PlayerList::Unavailable("no response from console".to_string()),
            Outcome::ConnectionLost => PlayerList::Unavailable("console not connected".to_string()),
        }
    }

    pub async fn whitelist_add(&self, name: &str) -> WhitelistAdd {
        if !patterns::is_valid_player_name(name) {
            return WhitelistAdd::Failed("invalid player name".to_string());
        }

        let command = format!("whitelist add {}", name);
        let outcome = self
            .correlator
            .send(&command, patterns::whitelist_add_matcher(name), self.default_timeout())
            .await;

        match outcome {
            Outcome::Matched(line) => {
                let text = line.clean_text();
                match patterns::classify(&text) {
                    Some(ConsoleResponse::WhitelistAdded(_)) => WhitelistAdd::Added,
                    Some(ConsoleResponse::AlreadyWhitelisted) => WhitelistAdd::AlreadyPresent,
                    Some(ConsoleResponse::UnknownPlayer) => WhitelistAdd::Failed("player does not exist".to_string()),
                    _ => WhitelistAdd::Failed(format!("unexpected response: {}", text)),
                }
            }
            Outcome::TimedOut => WhitelistAdd::Timeout,
            Outcome::ConnectionLost => WhitelistAdd::ConnectionLost,
        }
    }

    pub async fn whitelist_remove(&self, name: &str) -> WhitelistRemove {
        if !patterns::is_valid_player_name(name) {
            return WhitelistRemove::Failed("invalid player name".to_string());
        }

        let command = format!("whitelist remove {}", name);
        let outcome = self
            .correlator
            .send(&command, patterns::whitelist_remove_matcher(name), self.default_timeout())
            .await;

        match outcome {
            Outcome::Matched(line) => {
                let text = line.clean_text();
                match patterns::classify(&text) {
                    Some(ConsoleResponse::WhitelistRemoved(_)) => WhitelistRemove::Removed,
                    Some(ConsoleResponse::NotWhitelisted) => WhitelistRemove::NotPresent,
                    Some(ConsoleResponse::UnknownPlayer) => {
                        WhitelistRemove::Failed("player does not exist".to_string())
                    }
                    _ => WhitelistRemove::Failed(format!("unexpected response: {}", text)),
                }
            }
            Outcome::TimedOut => WhitelistRemove::Timeout,
            Outcome::ConnectionLost => WhitelistRemove::ConnectionLost,
        }
    }
}
