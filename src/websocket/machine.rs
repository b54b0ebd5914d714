//! Connection state machine for the console socket
//!
//! One supervised task owns the socket for the lifetime of the bridge:
//! fetch credentials, connect, authenticate, stream, and on any failure back
//! off and start over. Callers never see transport errors directly; they see
//! the published `ConnectionState` and, for in-flight commands,
//! `Outcome::ConnectionLost`.

use futures::{Sink, SinkExt, StreamExt};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::{self, Error as WsError};
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use super::protocol::{InboundFrame, OutboundFrame};
use super::state::ConnectionState;
use crate::auth::{AuthError, CredentialSource, Credentials};
use crate::config::config::WebSocketConfig;
use crate::console::{Correlator, LogLine, LogRingBuffer};

/// Delay before retrying a failed in-place token refresh
const REFRESH_RETRY: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("connection closed by remote: {0}")]
    Closed(String),
    #[error("no frames received for {0:?}")]
    LivenessTimeout(Duration),
    #[error("no auth response within {0:?}")]
    AuthTimeout(Duration),
}

/// Why a single connection attempt ended
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    /// Bad socket URL or similar; retrying cannot help
    Fatal(String),
    AuthRejected(String),
    TokenExpired,
    Transport(TransportError),
}

impl From<TransportError> for SessionEnd {
    fn from(err: TransportError) -> Self {
        SessionEnd::Transport(err)
    }
}

#[derive(Debug, Default)]
struct RetryBudget {
    attempt: u32,
    rejections: u32,
}

impl RetryBudget {
    fn reset(&mut self) {
        self.attempt = 0;
        self.rejections = 0;
    }
}

pub struct ConnectionStateMachine {
    config: WebSocketConfig,
    origin: String,
    source: Arc<dyn CredentialSource>,
    buffer: Arc<LogRingBuffer>,
    correlator: Arc<Correlator>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    backoff: Backoff,
}

impl ConnectionStateMachine {
    pub fn new(
        config: WebSocketConfig,
        origin: String,
        source: Arc<dyn CredentialSource>,
        buffer: Arc<LogRingBuffer>,
        correlator: Arc<Correlator>,
        state_tx: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        let backoff = Backoff::from_config(&config);
        Self {
            config,
            origin,
            source,
            buffer,
            correlator,
            state_tx,
            backoff,
        }
    }

    /// Drive the connection until cancelled or failed for good
    pub async fn run(self, cancel: CancellationToken) {
        let mut budget = RetryBudget::default();
        let mut credentials: Option<Credentials> = None;
        let mut rng = StdRng::from_entropy();

        // A restart after Failed begins from scratch
        self.transition(ConnectionState::Disconnected).await;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // Credentials are settled before a connect attempt is announced
            let mut creds = match credentials.take() {
                Some(c) if !c.expires_within(self.config.refresh_margin()) => c,
                _ => {
                    let acquired = tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = self.source.acquire() => result,
                    };
                    match acquired {
                        Ok(c) => c,
                        Err(e) => {
                            if self.note_auth_failure(&e, &mut budget) {
                                tracing::error!("Giving up after {} rejected credential requests", budget.rejections);
                                self.transition(ConnectionState::Failed).await;
                                return;
                            }
                            if !self.back_off(&cancel, &mut budget, &mut rng).await {
                                break;
                            }
                            continue;
                        }
                    }
                }
            };

            self.transition(ConnectionState::Connecting).await;
            let end = self.session(&mut creds, &cancel, &mut budget).await;
            match end {
                SessionEnd::Cancelled => break,
                SessionEnd::Fatal(reason) => {
                    tracing::error!("Console connection failed permanently: {}", reason);
                    self.transition(ConnectionState::Failed).await;
                    return;
                }
                SessionEnd::AuthRejected(reason) => {
                    budget.rejections += 1;
                    tracing::warn!(
                        "Websocket auth rejected ({}/{}): {}",
                        budget.rejections,
                        self.config.max_auth_rejections,
                        reason
                    );
                    if budget.rejections >= self.config.max_auth_rejections {
                        tracing::error!("Giving up after {} auth rejections", budget.rejections);
                        self.transition(ConnectionState::Failed).await;
                        return;
                    }
                }
                SessionEnd::TokenExpired => {
                    tracing::warn!("Websocket token expired, reconnecting with fresh credentials");
                }
                SessionEnd::Transport(e) => {
                    tracing::warn!("Websocket disconnected: {}", e);
                    credentials = Some(creds);
                }
            }

            if !self.back_off(&cancel, &mut budget, &mut rng).await {
                break;
            }
        }

        self.transition(ConnectionState::Disconnected).await;
        tracing::info!("Console connection stopped");
    }

    /// Returns true when the failure is terminal
    fn note_auth_failure(&self, err: &AuthError, budget: &mut RetryBudget) -> bool {
        if !err.is_rejection() {
            tracing::warn!("Could not fetch websocket details: {}", err);
            return false;
        }

        budget.rejections += 1;
        tracing::warn!(
            "Panel rejected websocket details request ({}/{}): {}",
            budget.rejections,
            self.config.max_auth_rejections,
            err
        );
        budget.rejections >= self.config.max_auth_rejections
    }

    /// Sleep out the next backoff delay. Returns false if cancelled meanwhile.
    async fn back_off(&self, cancel: &CancellationToken, budget: &mut RetryBudget, rng: &mut StdRng) -> bool {
        self.transition(ConnectionState::Reconnecting).await;

        let delay = self.backoff.delay(budget.attempt, rng);
        budget.attempt = budget.attempt.saturating_add(1);
        tracing::info!("Reconnecting in {:.1}s (attempt {})", delay.as_secs_f64(), budget.attempt);

        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Publish a new state. Leaving Live fails every pending command at once.
    async fn transition(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous == next {
            return;
        }
        tracing::debug!("Connection state {} -> {}", previous, next);

        if previous.is_live() {
            let failed = self.correlator.detach().await;
            if failed > 0 {
                tracing::warn!("{} pending command(s) resolved as connection lost", failed);
            }
        }
    }

    fn build_request(&self, socket_url: &str) -> Result<Request, String> {
        let mut request = socket_url
            .into_client_request()
            .map_err(|e| format!("invalid socket url {}: {}", socket_url, e))?;
        let origin = HeaderValue::from_str(&self.origin)
            .map_err(|e| format!("invalid origin {}: {}", self.origin, e))?;
        request.headers_mut().insert("Origin", origin);
        Ok(request)
    }

    /// One connection from handshake to disconnect
    async fn session(
        &self,
        creds: &mut Credentials,
        cancel: &CancellationToken,
        budget: &mut RetryBudget,
    ) -> SessionEnd {
        let request = match self.build_request(&creds.socket_url) {
            Ok(r) => r,
            Err(reason) => return SessionEnd::Fatal(reason),
        };

        tracing::info!("Connecting websocket: {}", creds.socket_url);
        let connected = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            result = tokio_tungstenite::connect_async(request) => result,
        };
        let ws = match connected {
            Ok((ws, _response)) => ws,
            Err(WsError::Url(e)) => return SessionEnd::Fatal(format!("invalid socket url: {}", e)),
            Err(WsError::Http(response)) if matches!(response.status().as_u16(), 401 | 403) => {
                return SessionEnd::AuthRejected(format!("handshake refused with {}", response.status()));
            }
            Err(e) => return TransportError::from(e).into(),
        };

        self.transition(ConnectionState::Authenticating).await;
        let (mut sink, mut stream) = ws.split();

        if let Err(e) = send_frame(&mut sink, &OutboundFrame::auth(&creds.token)).await {
            return e.into();
        }
        tracing::debug!("Sent auth token");

        // Wings has an explicit ack, but console output also proves we are in
        let auth_deadline = Instant::now() + self.config.auth_timeout();
        let early_output = loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.close().await;
                    return SessionEnd::Cancelled;
                }
                next = tokio::time::timeout_at(auth_deadline, stream.next()) => next,
            };

            let message = match next {
                Err(_) => return TransportError::AuthTimeout(self.config.auth_timeout()).into(),
                Ok(None) => return TransportError::Closed("stream ended during auth".to_string()).into(),
                Ok(Some(Err(e))) => return TransportError::from(e).into(),
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => match InboundFrame::parse(text.as_str()) {
                    Ok(InboundFrame::AuthSuccess) => break None,
                    Ok(InboundFrame::ConsoleOutput(output)) => break Some(output),
                    Ok(InboundFrame::JwtError(reason)) => return SessionEnd::AuthRejected(reason),
                    Ok(InboundFrame::TokenExpired) => {
                        return SessionEnd::AuthRejected("token expired during auth".to_string());
                    }
                    Ok(other) => tracing::debug!("Ignoring {:?} before auth", other),
                    Err(e) => tracing::warn!("Undecodable frame during auth: {}", e),
                },
                Message::Close(frame) => {
                    let reason = frame.map(|f| f.reason.as_str().to_string()).unwrap_or_default();
                    return TransportError::Closed(reason).into();
                }
                _ => {}
            }
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        self.correlator.attach(command_tx).await;
        self.transition(ConnectionState::Live).await;
        budget.reset();
        tracing::info!("Websocket authenticated, listening");

        let mut sequence: u64 = 0;
        if let Some(output) = early_output {
            self.ingest(&output, &mut sequence).await;
        }

        let end = self
            .stream_live(&mut sink, &mut stream, command_rx, creds, cancel, &mut sequence)
            .await;

        // Fail in-flight commands before spending any time on the close handshake
        let next = match end {
            SessionEnd::Cancelled => ConnectionState::Disconnected,
            _ => ConnectionState::Reconnecting,
        };
        self.transition(next).await;
        let _ = tokio::time::timeout(Duration::from_secs(1), sink.close()).await;
        tracing::info!("Websocket session ended after {} lines", sequence);
        end
    }

    async fn stream_live<S, R>(
        &self,
        sink: &mut S,
        stream: &mut R,
        mut command_rx: mpsc::UnboundedReceiver<String>,
        creds: &mut Credentials,
        cancel: &CancellationToken,
        sequence: &mut u64,
    ) -> SessionEnd
    where
        S: Sink<Message, Error = WsError> + Unpin,
        R: futures::Stream<Item = Result<Message, WsError>> + Unpin,
    {
        let window = self.config.liveness_window();
        let margin = self.config.refresh_margin();

        let liveness = tokio::time::sleep(window);
        tokio::pin!(liveness);
        let refresh_timer = tokio::time::sleep(creds.refresh_in(margin));
        tokio::pin!(refresh_timer);

        let period = self.config.ping_interval();
        let mut ping = tokio::time::interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let (refresh_tx, mut refresh_rx) = mpsc::channel::<Result<Credentials, AuthError>>(1);
        let mut refreshing = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Cancelled,

                _ = &mut liveness => return TransportError::LivenessTimeout(window).into(),

                message = stream.next() => {
                    let message = match message {
                        None => return TransportError::Closed("stream ended".to_string()).into(),
                        Some(Err(e)) => return TransportError::from(e).into(),
                        Some(Ok(message)) => message,
                    };
                    liveness.as_mut().reset(Instant::now() + window);

                    match message {
                        Message::Text(text) => {
                            let frame = match InboundFrame::parse(text.as_str()) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    let preview: String = text.as_str().chars().take(100).collect();
                                    tracing::error!("JSON decode error: {}. Raw: {}...", e, preview);
                                    continue;
                                }
                            };
                            match frame {
                                InboundFrame::ConsoleOutput(output) => self.ingest(&output, sequence).await,
                                InboundFrame::TokenExpiring => {
                                    tracing::info!("Token expiring, refreshing credentials");
                                    if !refreshing {
                                        refreshing = true;
                                        self.spawn_refresh(refresh_tx.clone());
                                    }
                                }
                                InboundFrame::TokenExpired => return SessionEnd::TokenExpired,
                                InboundFrame::JwtError(reason) => return SessionEnd::AuthRejected(reason),
                                InboundFrame::AuthSuccess => tracing::debug!("Re-authenticated with refreshed token"),
                                InboundFrame::Status(status) => tracing::debug!("Server status: {}", status),
                                InboundFrame::DaemonError(msg) => tracing::warn!("Daemon error: {}", msg),
                                InboundFrame::DaemonMessage(msg) => tracing::info!("Daemon message: {}", msg),
                                InboundFrame::Stats => {}
                                InboundFrame::Other(event) => tracing::trace!("Unhandled event: {}", event),
                            }
                        }
                        Message::Close(frame) => {
                            let reason = frame.map(|f| f.reason.as_str().to_string()).unwrap_or_default();
                            return TransportError::Closed(reason).into();
                        }
                        // Pings are answered by tungstenite; pongs only feed liveness
                        _ => {}
                    }
                }

                Some(command) = command_rx.recv() => {
                    if let Err(e) = send_frame(sink, &OutboundFrame::command(&command)).await {
                        return e.into();
                    }
                }

                _ = ping.tick() => {
                    if let Err(e) = sink.send(Message::Ping(Vec::new().into())).await {
                        return TransportError::from(e).into();
                    }
                }

                _ = &mut refresh_timer, if !refreshing => {
                    refreshing = true;
                    self.spawn_refresh(refresh_tx.clone());
                }

                Some(result) = refresh_rx.recv() => {
                    refreshing = false;
                    match result {
                        Ok(fresh) => {
                            if let Err(e) = send_frame(sink, &OutboundFrame::auth(&fresh.token)).await {
                                return e.into();
                            }
                            refresh_timer.as_mut().reset(Instant::now() + fresh.refresh_in(margin));
                            *creds = fresh;
                            tracing::info!("Sent refreshed token, valid until {}", creds.expires_at);
                        }
                        Err(e) => {
                            tracing::warn!("Token refresh failed: {}", e);
                            refresh_timer.as_mut().reset(Instant::now() + REFRESH_RETRY);
                        }
                    }
                }
            }
        }
    }

    fn spawn_refresh(&self, reply: mpsc::Sender<Result<Credentials, AuthError>>) {
        let source = self.source.clone();
        tokio::spawn(async move {
            let _ = reply.send(source.acquire().await).await;
        });
    }

    /// Split console output into lines, let the correlator see each one,
    /// then make it visible in the buffer.
    async fn ingest(&self, output: &str, sequence: &mut u64) {
        for raw in output.lines() {
            let raw = raw.trim_end();
            if raw.is_empty() {
                continue;
            }
            *sequence += 1;
            let line = LogLine::new(*sequence, raw.to_string());
            tracing::debug!("Console #{}: {}", line.sequence, raw);

            self.correlator.offer(&line);
            self.buffer.append(line).await;
        }
    }
}

async fn send_frame<S>(sink: &mut S, frame: &OutboundFrame) -> Result<(), TransportError>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = frame.to_json()?;
    sink.send(Message::Text(json.into())).await?;
    Ok(())
}
