//! Shared engine state: run/freeze flags, counters, limits.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::EngineConfig;

/// Flags and counters of one engine.
///
/// The poll loop reads the flags between cycles only, so plain atomics are
/// enough; control calls may come from any thread.
#[derive(Debug)]
pub struct EngineState {
    name: String,
    running: AtomicBool,
    frozen: AtomicBool,
    sent: AtomicU64,
    received: AtomicU64,
    max_send_count: AtomicI64,
    scan_interval_ms: AtomicU64,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl EngineState {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            name: config.instance_name.clone(),
            running: AtomicBool::new(false),
            frozen: AtomicBool::new(false),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            max_send_count: AtomicI64::new(config.max_send_count),
            scan_interval_ms: AtomicU64::new(duration_ms(config.scan_interval())),
            started_at: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn received_count(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }

    pub fn max_send_count(&self) -> i64 {
        self.max_send_count.load(Ordering::SeqCst)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms.load(Ordering::SeqCst))
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at.lock().ok().and_then(|g| *g)
    }

    // ── Control ─────────────────────────────────────────────────────

    /// Ask the loop to exit after the current cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Route all traffic to the management task.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }

    /// Resume normal dispatch; the send budget starts over.
    pub fn unfreeze(&self) {
        self.sent.store(0, Ordering::SeqCst);
        self.frozen.store(false, Ordering::SeqCst);
    }

    pub fn set_max_send_count(&self, max: i64) {
        self.max_send_count.store(max, Ordering::SeqCst);
    }

    pub fn set_scan_interval(&self, interval: Duration) {
        self.scan_interval_ms
            .store(duration_ms(interval), Ordering::SeqCst);
    }

    // ── Loop bookkeeping ────────────────────────────────────────────

    /// Transition Stopped -> Running. Returns false if already running.
    pub(crate) fn try_start(&self, scan_interval: Duration) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.sent.store(0, Ordering::SeqCst);
        self.received.store(0, Ordering::SeqCst);
        self.frozen.store(false, Ordering::SeqCst);
        self.set_scan_interval(scan_interval);
        if let Ok(mut started) = self.started_at.lock() {
            *started = Some(Utc::now());
        }
        true
    }

    pub(crate) fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::SeqCst);
    }

    /// Whether the send budget is used up.
    pub fn at_send_limit(&self) -> bool {
        let max = self.max_send_count();
        max >= 0 && self.sent_count() >= max.unsigned_abs()
    }

    /// Freeze when the send budget is used up. Returns whether a freeze happened now.
    pub(crate) fn enforce_send_limit(&self) -> bool {
        if self.at_send_limit() && !self.frozen.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                sent = self.sent_count(),
                max = self.max_send_count(),
                "Send limit reached, freezing"
            );
            return true;
        }
        false
    }

    /// Point-in-time copy of the state.
    pub fn snapshot(&self) -> EngineStats {
        let started_at = self.started_at();
        EngineStats {
            name: self.name.clone(),
            running: self.is_running(),
            frozen: self.is_frozen(),
            sent: self.sent_count(),
            received: self.received_count(),
            max_send_count: self.max_send_count(),
            scan_interval_secs: self.scan_interval().as_secs_f64(),
            started_at,
            uptime_secs: started_at.map(|t| (Utc::now() - t).num_seconds()),
        }
    }
}

pub(super) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Serializable snapshot of `EngineState`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub name: String,
    pub running: bool,
    pub frozen: bool,
    pub sent: u64,
    pub received: u64,
    pub max_send_count: i64,
    pub scan_interval_secs: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_secs: Option<i64>,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Name: {}", self.name)?;
        match self.started_at {
            Some(t) => writeln!(f, "Started: {}", t.format("%Y-%m-%d %H:%M:%S UTC"))?,
            None => writeln!(f, "Started: never")?,
        }
        if let Some(up) = self.uptime_secs {
            writeln!(f, "Uptime: {}h {}m {}s", up / 3600, (up % 3600) / 60, up % 60)?;
        }
        writeln!(f, "Running: {}", self.running)?;
        writeln!(f, "Frozen: {}", self.frozen)?;
        writeln!(f, "Sent: {}", self.sent)?;
        writeln!(f, "Received: {}", self.received)?;
        if self.max_send_count < 0 {
            writeln!(f, "Max send count: unlimited")?;
        } else {
            writeln!(f, "Max send count: {}", self.max_send_count)?;
        }
        write!(f, "Scan interval: {}s", self.scan_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(max: i64) -> EngineState {
        let config = EngineConfig {
            max_send_count: max,
            ..EngineConfig::default()
        };
        EngineState::new(&config)
    }

    #[test]
    fn start_once() {
        let s = state(-1);
        assert!(s.try_start(Duration::from_millis(10)));
        assert!(!s.try_start(Duration::from_millis(10)));
        assert!(s.is_running());
        assert!(s.started_at().is_some());
        s.stop();
        assert!(!s.is_running());
        assert!(s.try_start(Duration::from_millis(10)));
    }

    #[test]
    fn unbounded_never_freezes() {
        let s = state(-1);
        for _ in 0..100 {
            s.record_sent();
        }
        assert!(!s.enforce_send_limit());
        assert!(!s.is_frozen());
    }

    #[test]
    fn limit_freezes_once() {
        let s = state(2);
        s.record_sent();
        assert!(!s.enforce_send_limit());
        s.record_sent();
        assert!(s.enforce_send_limit());
        assert!(!s.enforce_send_limit());
        assert!(s.is_frozen());
    }

    #[test]
    fn zero_limit_freezes_immediately() {
        let s = state(0);
        assert!(s.enforce_send_limit());
    }

    #[test]
    fn unfreeze_resets_budget() {
        let s = state(1);
        s.record_sent();
        s.enforce_send_limit();
        s.unfreeze();
        assert!(!s.is_frozen());
        assert_eq!(s.sent_count(), 0);
        assert!(!s.at_send_limit());
    }

    #[test]
    fn snapshot_reports_counters() {
        let s = state(5);
        s.try_start(Duration::from_secs(3));
        s.record_received();
        s.record_sent();
        let stats = s.snapshot();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.received, 1);
        assert_eq!(stats.scan_interval_secs, 3.0);
        assert!(stats.to_string().contains("Max send count: 5"));

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["name"], "Emalia");
        assert_eq!(json["frozen"], false);
    }

    #[test]
    fn huge_intervals_saturate_in_millis() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }
}
