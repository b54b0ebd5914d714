//! Command/response correlation over the console stream
//!
//! The console has no request ids. A command is answered by the first line,
//! after it was registered, that its matcher accepts. Every pending command
//! sees every line, so two in-flight commands with overlapping matchers can
//! both claim the same line. That case is resolved for both and reported as
//! an ambiguous match; it is never silently attributed to just one of them.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::time::Instant;
use uuid::Uuid;

use super::buffer::LogLine;
use super::matcher::{LineMatcher, SharedMatcher};
use crate::websocket::state::ConnectionState;

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Matched(LogLine),
    /// The command may or may not have run
    TimedOut,
    /// The connection left Live; the command may or may not have run
    ConnectionLost,
}

struct PendingCommand {
    issued_at: Instant,
    command_text: String,
    matcher: SharedMatcher,
    timeout_at: Instant,
    outcome_slot: oneshot::Sender<Outcome>,
}

impl PendingCommand {
    fn resolve(self, id: &Uuid, outcome: Outcome) {
        tracing::debug!(
            "Command {} '{}' resolved after {:?}: {}",
            id,
            self.command_text,
            self.issued_at.elapsed(),
            outcome_label(&outcome)
        );
        // The caller may have stopped waiting
        let _ = self.outcome_slot.send(outcome);
    }
}

/// Stand-in deadline for timeouts too long to represent, about 30 years out
fn far_future(from: Instant) -> Instant {
    from + Duration::from_secs(86400 * 365 * 30)
}

fn outcome_label(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Matched(_) => "matched",
        Outcome::TimedOut => "timed out",
        Outcome::ConnectionLost => "connection lost",
    }
}

pub struct Correlator {
    pending: DashMap<Uuid, PendingCommand>,
    /// Command channel of the current live connection
    outbound: RwLock<Option<mpsc::UnboundedSender<String>>>,
    state: watch::Receiver<ConnectionState>,
    ambiguous_matches: AtomicU64,
}

impl Correlator {
    pub fn new(state: watch::Receiver<ConnectionState>) -> Self {
        Self {
            pending: DashMap::new(),
            outbound: RwLock::new(None),
            state,
            ambiguous_matches: AtomicU64::new(0),
        }
    }

    fn is_live(&self) -> bool {
        self.state.borrow().is_live()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn ambiguous_matches(&self) -> u64 {
        self.ambiguous_matches.load(Ordering::Relaxed)
    }

    /// Hand over the command channel of a freshly authenticated connection
    pub async fn attach(&self, sender: mpsc::UnboundedSender<String>) {
        *self.outbound.write().await = Some(sender);
    }

    /// Drop the command channel and resolve everything still waiting as
    /// `ConnectionLost`. Returns how many commands were failed.
    pub async fn detach(&self) -> usize {
        self.outbound.write().await.take();

        let ids: Vec<Uuid> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((id, pending)) = self.pending.remove(&id) {
                pending.resolve(&id, Outcome::ConnectionLost);
                failed += 1;
            }
        }
        failed
    }

    /// Send a command and wait for the line that answers it.
    ///
    /// Nothing is ever re-sent. If the caller drops this future the entry is
    /// still cleaned up by the next sweep.
    pub async fn send(&self, command_text: &str, matcher: SharedMatcher, timeout: Duration) -> Outcome {
        if !self.is_live() {
            tracing::warn!("Cannot send '{}': console not live", command_text);
            return Outcome::ConnectionLost;
        }

        let id = Uuid::new_v4();
        let issued_at = Instant::now();
        let timeout_at = issued_at.checked_add(timeout).unwrap_or_else(|| far_future(issued_at));
        let (outcome_slot, mut outcome_rx) = oneshot::channel();

        self.sweep_expired(issued_at);
        tracing::debug!("Registering command {} '{}' waiting for {}", id, command_text, matcher.describe());
        self.pending.insert(
            id,
            PendingCommand {
                issued_at,
                command_text: command_text.to_string(),
                matcher,
                timeout_at,
                outcome_slot,
            },
        );

        // Checked after registering so a concurrent detach cannot miss us
        let sender = self.outbound.read().await.clone();
        let sender = match sender {
            Some(sender) if self.is_live() => sender,
            _ => {
                self.pending.remove(&id);
                tracing::warn!("Cannot send '{}': connection lost before transmit", command_text);
                return Outcome::ConnectionLost;
            }
        };

        tracing::info!("Sending command: {}", command_text);
        if sender.send(command_text.to_string()).is_err() {
            self.pending.remove(&id);
            tracing::error!("Failed to send '{}': connection closed", command_text);
            return Outcome::ConnectionLost;
        }

        match tokio::time::timeout_at(timeout_at, &mut outcome_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Outcome::ConnectionLost,
            Err(_) => {
                if self.pending.remove(&id).is_some() {
                    tracing::warn!("Timeout ({:?}) waiting for response to '{}'", timeout, command_text);
                    Outcome::TimedOut
                } else {
                    // Someone else resolved it between the deadline and now
                    outcome_rx.await.unwrap_or(Outcome::ConnectionLost)
                }
            }
        }
    }

    /// Test a freshly received line against every pending command. Called by
    /// the read loop before the line becomes visible in the buffer.
    pub fn offer(&self, line: &LogLine) -> usize {
        let now = Instant::now();
        let text = line.clean_text();

        let mut resolved = 0;
        if !text.is_empty() {
            let hits: Vec<(Uuid, String)> = self
                .pending
                .iter()
                .filter(|entry| entry.timeout_at > now && entry.matcher.matches(&text))
                .map(|entry| (*entry.key(), entry.command_text.clone()))
                .collect();

            if hits.len() > 1 {
                self.ambiguous_matches.fetch_add(1, Ordering::Relaxed);
                let commands: Vec<&str> = hits.iter().map(|(_, c)| c.as_str()).collect();
                tracing::warn!(
                    "Ambiguous match: line #{} '{}' satisfies {} pending commands {:?}",
                    line.sequence,
                    text,
                    hits.len(),
                    commands
                );
            }

            for (id, _) in hits {
                if let Some((id, pending)) = self.pending.remove(&id) {
                    pending.resolve(&id, Outcome::Matched(line.clone()));
                    resolved += 1;
                }
            }
        }

        self.sweep_expired(now);
        resolved
    }

    /// Resolve commands past their deadline whose callers went away
    fn sweep_expired(&self, now: Instant) {
        let expired: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|entry| entry.timeout_at <= now)
            .map(|entry| *entry.key())
            .collect();

        for id in expired {
            if let Some((id, pending)) = self.pending.remove(&id) {
                pending.resolve(&id, Outcome::TimedOut);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::matcher::{ContainsMatcher, FnMatcher};
    use std::sync::Arc;

    async fn live_correlator() -> (Arc<Correlator>, watch::Sender<ConnectionState>, mpsc::UnboundedReceiver<String>) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Live);
        let correlator = Arc::new(Correlator::new(state_rx));
        let (tx, rx) = mpsc::unbounded_channel();
        correlator.attach(tx).await;
        (correlator, state_tx, rx)
    }

    async fn wait_for_pending(correlator: &Correlator, n: usize) {
        while correlator.pending_count() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_not_live_rejects_without_transmitting() {
        let (correlator, state_tx, mut rx) = live_correlator().await;
        state_tx.send_replace(ConnectionState::Reconnecting);

        let outcome = correlator
            .send("list", Arc::new(ContainsMatcher::new("players online")), Duration::from_secs(1))
            .await;

        assert_eq!(outcome, Outcome::ConnectionLost);
        assert!(rx.try_recv().is_err());
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_first_match_resolves_once() {
        let (correlator, _state_tx, mut rx) = live_correlator().await;

        let c = correlator.clone();
        let task = tokio::spawn(async move {
            c.send("whitelist add Steve", Arc::new(ContainsMatcher::new("Steve")), Duration::from_secs(5))
                .await
        });

        wait_for_pending(&correlator, 1).await;
        assert_eq!(rx.recv().await.unwrap(), "whitelist add Steve");

        assert_eq!(correlator.offer(&LogLine::new(1, "Saving chunks".into())), 0);
        let hit = LogLine::new(2, "Added Steve to the whitelist".into());
        assert_eq!(correlator.offer(&hit), 1);
        assert_eq!(correlator.offer(&LogLine::new(3, "Added Steve to the whitelist".into())), 0);

        assert_eq!(task.await.unwrap(), Outcome::Matched(hit));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_never_early() {
        let (correlator, _state_tx, _rx) = live_correlator().await;
        let started = Instant::now();

        let outcome = correlator
            .send("list", Arc::new(ContainsMatcher::new("never")), Duration::from_millis(750))
            .await;

        assert_eq!(outcome, Outcome::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(750));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unbounded_timeout_still_resolves() {
        let (correlator, _state_tx, mut rx) = live_correlator().await;

        let c = correlator.clone();
        let task = tokio::spawn(async move {
            c.send("list", Arc::new(ContainsMatcher::new("players online")), Duration::MAX)
                .await
        });
        wait_for_pending(&correlator, 1).await;
        assert_eq!(rx.recv().await.unwrap(), "list");

        let hit = LogLine::new(1, "There are 0 of a max of 20 players online:".into());
        assert_eq!(correlator.offer(&hit), 1);
        assert_eq!(task.await.unwrap(), Outcome::Matched(hit));
    }

    #[tokio::test]
    async fn test_detach_fails_pending_immediately() {
        let (correlator, state_tx, _rx) = live_correlator().await;

        let c = correlator.clone();
        let task = tokio::spawn(async move {
            c.send("list", Arc::new(ContainsMatcher::new("players")), Duration::from_secs(3600))
                .await
        });
        wait_for_pending(&correlator, 1).await;

        state_tx.send_replace(ConnectionState::Reconnecting);
        assert_eq!(correlator.detach().await, 1);

        let outcome = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert_eq!(outcome, Outcome::ConnectionLost);
    }

    #[tokio::test]
    async fn test_ambiguous_line_resolves_all_and_is_counted() {
        let (correlator, _state_tx, _rx) = live_correlator().await;
        let any = || Arc::new(FnMatcher::new("any", |_: &str| true)) as SharedMatcher;

        let (c1, c2) = (correlator.clone(), correlator.clone());
        let a = tokio::spawn(async move { c1.send("say a", any(), Duration::from_secs(5)).await });
        let b = tokio::spawn(async move { c2.send("say b", any(), Duration::from_secs(5)).await });
        wait_for_pending(&correlator, 2).await;

        let line = LogLine::new(1, "[Server] a".into());
        assert_eq!(correlator.offer(&line), 2);
        assert_eq!(a.await.unwrap(), Outcome::Matched(line.clone()));
        assert_eq!(b.await.unwrap(), Outcome::Matched(line));
        assert_eq!(correlator.ambiguous_matches(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_wait_is_swept() {
        let (correlator, _state_tx, _rx) = live_correlator().await;

        let c = correlator.clone();
        let abandoned = tokio::spawn(async move {
            c.send("list", Arc::new(ContainsMatcher::new("never")), Duration::from_millis(100))
                .await
        });
        wait_for_pending(&correlator, 1).await;
        abandoned.abort();
        let _ = abandoned.await;

        tokio::time::advance(Duration::from_millis(200)).await;
        correlator.offer(&LogLine::new(1, "tick".into()));
        assert_eq!(correlator.pending_count(), 0);
    }
}
