//! Deposit watcher
//!
//! One poll loop drives every escrow that is waiting on vault inflows. The
//! loop re-reads the awaiting set each tick, so cancelled escrows drop out
//! at the next iteration and restarts pick up exactly where the persisted
//! cursors left off. Scans are idempotent end to end; this loop only
//! decides when to scan, never what counts.

use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::WatcherConfig;
use crate::db;
use crate::escrow::deposit::DepositOutcome;
use crate::escrow::EscrowService;
use crate::metrics;
use crate::types::EscrowStatus;

/// Pause between two scans that hit the same chain within one tick.
const PER_CHAIN_SPACING: Duration = Duration::from_millis(250);

pub struct DepositWatcher {
    db: PgPool,
    service: Arc<EscrowService>,
    poll_interval: Duration,
    explorer_after_empty: u32,
    /// Consecutive scans per escrow that credited nothing.
    empty_polls: Mutex<HashMap<String, u32>>,
}

impl DepositWatcher {
    pub fn new(db: PgPool, service: Arc<EscrowService>, config: &WatcherConfig) -> Self {
        DepositWatcher {
            db,
            service,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            explorer_after_empty: config.explorer_fallback_after_empty_polls,
            empty_polls: Mutex::new(HashMap::new()),
        }
    }

    /// Run the watcher loop until shutdown.
    pub async fn run(&self, mut shutdown: mpsc::Receiver<()>) -> eyre::Result<()> {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Deposit watcher started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Deposit watcher shutting down");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.tick().await;
                }
            }
        }
    }

    /// One pass over every escrow still collecting deposits.
    async fn tick(&self) {
        let awaiting = match db::get_escrows_by_status(&self.db, EscrowStatus::AwaitingDeposit)
            .await
        {
            Ok(escrows) => escrows,
            Err(e) => {
                warn!(error = %e, "Watcher could not list awaiting escrows");
                return;
            }
        };

        if awaiting.is_empty() {
            self.empty_polls.lock().await.clear();
            return;
        }

        let mut last_chain: Option<String> = None;
        for escrow in &awaiting {
            // Crude per-chain rate limit: space out consecutive scans that
            // target the same chain.
            if escrow.chain.is_some() && escrow.chain == last_chain {
                tokio::time::sleep(PER_CHAIN_SPACING).await;
            }
            last_chain = escrow.chain.clone();

            let use_explorer = {
                let polls = self.empty_polls.lock().await;
                polls
                    .get(&escrow.escrow_id)
                    .map(|count| *count >= self.explorer_after_empty)
                    .unwrap_or(false)
            };

            if let Some(chain) = &escrow.chain {
                metrics::WATCHER_SCANS.with_label_values(&[chain.as_str()]).inc();
            }

            match self
                .service
                .check_deposits(&escrow.escrow_id, use_explorer)
                .await
            {
                Ok(DepositOutcome::None) => {
                    let mut polls = self.empty_polls.lock().await;
                    let count = polls.entry(escrow.escrow_id.clone()).or_insert(0);
                    *count += 1;
                    if *count == self.explorer_after_empty {
                        debug!(
                            escrow_id = %escrow.escrow_id,
                            "RPC scans stayed empty, enabling explorer fallback"
                        );
                    }
                }
                Ok(_) => {
                    self.empty_polls.lock().await.remove(&escrow.escrow_id);
                }
                Err(e) => {
                    // Transient RPC trouble is logged and retried next tick;
                    // no state was mutated.
                    warn!(escrow_id = %escrow.escrow_id, error = %e, "Deposit scan failed");
                    if let Some(chain) = &escrow.chain {
                        metrics::CHAIN_ERRORS
                            .with_label_values(&[chain.as_str(), e.kind()])
                            .inc();
                    }
                }
            }
        }

        // Drop counters for escrows that left the awaiting set.
        let live: Vec<String> = awaiting.iter().map(|e| e.escrow_id.clone()).collect();
        self.empty_polls
            .lock()
            .await
            .retain(|escrow_id, _| live.contains(escrow_id));
    }
}
