//! Timer scheduler
//!
//! Single owner of every timer in the system, keyed by (escrow, kind).
//! Handlers never share timeout maps; they ask the scheduler to schedule or
//! cancel. Fired timers are delivered over a channel to the dispatch loop,
//! so the timer callback itself can never fail anything: it logs and exits.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::TimersConfig;
use crate::types::TimerKind;

/// A timer that elapsed without being cancelled.
#[derive(Debug, Clone)]
pub struct TimerFired {
    pub escrow_id: String,
    pub kind: TimerKind,
    /// Message TTL timers carry the message they are due to delete.
    pub chat_id: Option<i64>,
    pub message_id: Option<i64>,
}

type TimerKey = (String, TimerKind, u64);

pub struct Scheduler {
    timers: TimersConfig,
    tx: mpsc::Sender<TimerFired>,
    pending: Mutex<HashMap<TimerKey, JoinHandle<()>>>,
    /// Distinguishes concurrent message-TTL timers under one (escrow, kind).
    seq: AtomicU64,
}

impl Scheduler {
    pub fn new(timers: TimersConfig) -> (Arc<Self>, mpsc::Receiver<TimerFired>) {
        let (tx, rx) = mpsc::channel(256);
        (
            Arc::new(Scheduler {
                timers,
                tx,
                pending: Mutex::new(HashMap::new()),
                seq: AtomicU64::new(0),
            }),
            rx,
        )
    }

    fn duration_for(&self, kind: TimerKind) -> Duration {
        let secs = match kind {
            TimerKind::JoinTimeout => self.timers.join_timeout_secs,
            TimerKind::MessageTtl => self.timers.message_ttl_secs,
            TimerKind::InactivityTimeout => self.timers.inactivity_timeout_secs,
            TimerKind::RecycleGrace => self.timers.recycle_grace_secs,
        };
        Duration::from_secs(secs)
    }

    /// Schedule a timer with its configured duration. Re-scheduling the same
    /// (escrow, kind) replaces the previous timer.
    pub fn schedule(self: &Arc<Self>, escrow_id: &str, kind: TimerKind) {
        let duration = self.duration_for(kind);
        self.schedule_in(escrow_id, kind, duration, None, None);
    }

    /// Schedule deletion of a specific message after the TTL.
    pub fn schedule_message_ttl(self: &Arc<Self>, escrow_id: &str, chat_id: i64, message_id: i64) {
        let duration = self.duration_for(TimerKind::MessageTtl);
        self.schedule_in(
            escrow_id,
            TimerKind::MessageTtl,
            duration,
            Some(chat_id),
            Some(message_id),
        );
    }

    pub fn schedule_in(
        self: &Arc<Self>,
        escrow_id: &str,
        kind: TimerKind,
        duration: Duration,
        chat_id: Option<i64>,
        message_id: Option<i64>,
    ) {
        // Message TTLs coexist; every other kind is singular per escrow.
        let seq = if kind == TimerKind::MessageTtl {
            self.seq.fetch_add(1, Ordering::Relaxed)
        } else {
            self.cancel(escrow_id, kind);
            0
        };

        let key: TimerKey = (escrow_id.to_string(), kind, seq);
        let fired = TimerFired {
            escrow_id: escrow_id.to_string(),
            kind,
            chat_id,
            message_id,
        };
        let tx = self.tx.clone();
        let scheduler = Arc::clone(self);
        let task_key = key.clone();

        debug!(escrow_id, kind = kind.as_str(), ?duration, "Timer scheduled");

        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            scheduler
                .pending
                .lock()
                .expect("scheduler lock poisoned")
                .remove(&task_key);
            if tx.send(fired).await.is_err() {
                warn!("Timer fired after dispatch loop shut down");
            }
        });

        let mut pending = self.pending.lock().expect("scheduler lock poisoned");
        if let Some(old) = pending.insert(key, handle) {
            old.abort();
        }
    }

    /// Cancel every pending timer of this kind for an escrow.
    pub fn cancel(&self, escrow_id: &str, kind: TimerKind) {
        let mut pending = self.pending.lock().expect("scheduler lock poisoned");
        let keys: Vec<TimerKey> = pending
            .keys()
            .filter(|(id, k, _)| id == escrow_id && *k == kind)
            .cloned()
            .collect();
        for key in keys {
            if let Some(handle) = pending.remove(&key) {
                handle.abort();
                debug!(escrow_id, kind = kind.as_str(), "Timer cancelled");
            }
        }
    }

    /// Cancel everything for an escrow (terminal transitions).
    pub fn cancel_all(&self, escrow_id: &str) {
        let mut pending = self.pending.lock().expect("scheduler lock poisoned");
        let keys: Vec<TimerKey> = pending
            .keys()
            .filter(|(id, _, _)| id == escrow_id)
            .cloned()
            .collect();
        for key in keys {
            if let Some(handle) = pending.remove(&key) {
                handle.abort();
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("scheduler lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_timers() -> TimersConfig {
        TimersConfig {
            join_timeout_secs: 300,
            message_ttl_secs: 300,
            inactivity_timeout_secs: 3600,
            recycle_grace_secs: 120,
        }
    }

    #[tokio::test]
    async fn test_timer_fires_with_payload() {
        let (scheduler, mut rx) = Scheduler::new(test_timers());
        scheduler.schedule_in(
            "P2PMMX10000001",
            TimerKind::JoinTimeout,
            Duration::from_millis(10),
            None,
            None,
        );

        let fired = rx.recv().await.expect("timer should fire");
        assert_eq!(fired.escrow_id, "P2PMMX10000001");
        assert_eq!(fired.kind, TimerKind::JoinTimeout);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_prevents_firing() {
        let (scheduler, mut rx) = Scheduler::new(test_timers());
        scheduler.schedule_in(
            "P2PMMX10000001",
            TimerKind::JoinTimeout,
            Duration::from_millis(50),
            None,
            None,
        );
        scheduler.cancel("P2PMMX10000001", TimerKind::JoinTimeout);

        let result = tokio::time::timeout(Duration::from_millis(120), rx.recv()).await;
        assert!(result.is_err(), "cancelled timer must not fire");
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_reschedule_replaces_previous() {
        let (scheduler, mut rx) = Scheduler::new(test_timers());
        scheduler.schedule_in(
            "P2PMMX10000001",
            TimerKind::InactivityTimeout,
            Duration::from_secs(600),
            None,
            None,
        );
        scheduler.schedule_in(
            "P2PMMX10000001",
            TimerKind::InactivityTimeout,
            Duration::from_millis(10),
            None,
            None,
        );
        assert_eq!(scheduler.pending_count(), 1);

        let fired = rx.recv().await.expect("replacement timer should fire");
        assert_eq!(fired.kind, TimerKind::InactivityTimeout);
    }

    #[tokio::test]
    async fn test_message_ttls_coexist() {
        let (scheduler, mut rx) = Scheduler::new(test_timers());
        scheduler.schedule_in(
            "P2PMMX10000001",
            TimerKind::MessageTtl,
            Duration::from_millis(10),
            Some(-500),
            Some(41),
        );
        scheduler.schedule_in(
            "P2PMMX10000001",
            TimerKind::MessageTtl,
            Duration::from_millis(10),
            Some(-500),
            Some(42),
        );

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let mut ids = [first.message_id.unwrap(), second.message_id.unwrap()];
        ids.sort_unstable();
        assert_eq!(ids, [41, 42]);
    }

    #[tokio::test]
    async fn test_cancel_all_clears_every_kind() {
        let (scheduler, mut rx) = Scheduler::new(test_timers());
        scheduler.schedule_in(
            "P2PMMX10000001",
            TimerKind::JoinTimeout,
            Duration::from_millis(50),
            None,
            None,
        );
        scheduler.schedule_in(
            "P2PMMX10000001",
            TimerKind::MessageTtl,
            Duration::from_millis(50),
            Some(-500),
            Some(1),
        );
        scheduler.cancel_all("P2PMMX10000001");
        assert_eq!(scheduler.pending_count(), 0);

        let result = tokio::time::timeout(Duration::from_millis(120), rx.recv()).await;
        assert!(result.is_err());
    }
}
