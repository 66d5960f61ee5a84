//! The poll loop: fetch one unseen message, dispatch it, send the reply,
//! sleep to hold the cadence, repeat until stopped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::engine::EngineState;
use crate::engine::state::duration_ms;
use crate::error::EngineError;
use crate::mail::{IncomingMessage, Mailbox};

/// What one cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No message (empty mailbox, transport failure or invalid mail).
    Idle,
    /// Message from our own address, marked read and skipped.
    SelfSent,
    /// Reply sent.
    Replied,
    /// Reply built but the send failed.
    SendFailed,
}

/// Runs the poll loop against one mailbox.
pub struct Engine {
    mailbox: Arc<dyn Mailbox>,
    dispatcher: Arc<Dispatcher>,
}

impl Engine {
    pub fn new(mailbox: Arc<dyn Mailbox>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            mailbox,
            dispatcher,
        }
    }

    pub fn state(&self) -> &Arc<EngineState> {
        self.dispatcher.state()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Run until `stop()` is observed. Returns when the loop exited.
    ///
    /// Fails only if this engine is already running.
    pub async fn start(&self, scan_interval: Duration) -> Result<DateTime<Utc>, EngineError> {
        let state = self.state();
        if !state.try_start(scan_interval) {
            return Err(EngineError::AlreadyRunning {
                name: state.name().to_string(),
            });
        }
        tracing::info!(
            name = %state.name(),
            interval_ms = duration_ms(scan_interval),
            max_send_count = state.max_send_count(),
            "Engine started"
        );

        while state.is_running() {
            let started = Instant::now();
            let cycle = Uuid::new_v4();
            let outcome = self
                .run_cycle()
                .instrument(tracing::info_span!("cycle", cycle = %cycle))
                .await;
            tracing::trace!(cycle = %cycle, ?outcome, "Cycle finished");

            // read every cycle so `set <scan_interval>` takes effect
            let interval = state.scan_interval();
            if let Some(remaining) = interval.checked_sub(started.elapsed())
                && state.is_running()
            {
                tokio::time::sleep(remaining).await;
            }
        }

        let finished = Utc::now();
        tracing::info!(
            name = %state.name(),
            sent = state.sent_count(),
            received = state.received_count(),
            "Engine stopped"
        );
        Ok(finished)
    }

    /// Run `start` on a background task.
    pub fn spawn(
        self: Arc<Self>,
        scan_interval: Duration,
    ) -> JoinHandle<Result<DateTime<Utc>, EngineError>> {
        tokio::spawn(async move { self.start(scan_interval).await })
    }

    /// Ask the loop to exit after the current cycle.
    pub fn stop(&self) {
        self.state().stop();
    }

    /// Route all traffic to the management task.
    pub fn freeze(&self) {
        self.state().freeze();
    }

    /// One fetch, dispatch, send pass. Never fails.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let state = self.state();

        let Some(msg) = self.next_message().await else {
            return CycleOutcome::Idle;
        };

        if msg.sender().eq_ignore_ascii_case(self.mailbox.address()) {
            tracing::debug!(id = %msg.id(), "Skipping message from own address");
            return CycleOutcome::SelfSent;
        }
        state.record_received();
        tracing::info!(id = %msg.id(), sender = %msg.sender(), subject = %msg.subject(), "Received");

        state.enforce_send_limit();
        let reply = self.dispatcher.handle(&msg).await;
        // a management reply may have changed the limit or unfrozen us
        state.enforce_send_limit();

        match self.mailbox.send(reply).await {
            Ok(sent) => {
                state.record_sent();
                tracing::info!(to = %sent.to, subject = %sent.subject, "Reply delivered");
                CycleOutcome::Replied
            }
            Err(e) => {
                tracing::error!(to = %msg.sender(), error = %e, "Failed to send reply");
                CycleOutcome::SendFailed
            }
        }
    }

    /// Oldest unseen message, fetched and marked read. Transport and
    /// validation failures are logged and yield `None`.
    async fn next_message(&self) -> Option<IncomingMessage> {
        let ids = match self.mailbox.list_unseen().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list unseen messages");
                return None;
            }
        };
        let id = ids.into_iter().next()?;

        let raw = match self.mailbox.fetch(&id, true).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Failed to fetch message");
                return None;
            }
        };

        match IncomingMessage::from_raw(&raw) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "Dropping invalid message");
                None
            }
        }
    }
}
