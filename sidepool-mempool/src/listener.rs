//! Async delivery of tip changes.
//!
//! The confirmed-chain subsystem pushes [`TipChange`]s into a channel; the
//! listener applies them one at a time, so reorg processing never overlaps.

use std::sync::Arc;

use sidepool_core::TipChange;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::eviction::EvictionReport;
use crate::pool::SidechainMempool;

/// Drives a [`SidechainMempool`] from a channel of tip changes.
pub struct TipListener {
    pool: Arc<SidechainMempool>,
    tips: mpsc::Receiver<TipChange>,
}

impl TipListener {
    /// Create a listener and the sender that feeds it.
    pub fn channel(pool: Arc<SidechainMempool>, capacity: usize) -> (mpsc::Sender<TipChange>, Self) {
        let (tx, tips) = mpsc::channel(capacity);
        (tx, Self { pool, tips })
    }

    /// Apply tip changes until shutdown or until every sender is dropped.
    ///
    /// Successful reports are forwarded to `reports` when given; a dropped
    /// report receiver is not an error.
    pub async fn run(
        mut self,
        mut shutdown: mpsc::Receiver<()>,
        reports: Option<mpsc::Sender<EvictionReport>>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Tip listener shutting down");
                    break;
                }
                change = self.tips.recv() => {
                    let Some(change) = change else {
                        debug!("Tip channel closed");
                        break;
                    };
                    match self.pool.notify_chain_tip_changed(change) {
                        Ok(report) => {
                            if let Some(tx) = &reports {
                                if tx.send(report).await.is_err() {
                                    debug!("Report receiver dropped");
                                }
                            }
                        }
                        Err(e) => {
                            warn!(tip = %change.new, "Failed to apply tip change: {}", e);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MempoolConfig;
    use crate::mock::{MockChain, MockOracle, RecordingSink};

    fn pool(chain: &MockChain) -> Arc<SidechainMempool> {
        Arc::new(SidechainMempool::new(
            MempoolConfig::for_testing(),
            Arc::new(chain.clone()),
            Arc::new(MockOracle::accepting()),
            Arc::new(RecordingSink::new()),
        ))
    }

    #[tokio::test]
    async fn test_listener_applies_in_order() {
        let chain = MockChain::new();
        chain.create_sidechain(b"sc", 10, 100);
        let pool = pool(&chain);
        let (tx, listener) = TipListener::channel(pool.clone(), 8);
        let (_shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (report_tx, mut report_rx) = mpsc::channel(8);

        let handle = tokio::spawn(listener.run(shutdown_rx, Some(report_tx)));

        let mut old = chain.tip();
        for _ in 0..3 {
            let new = chain.mine();
            tx.send(TipChange::new(old, new)).await.unwrap();
            old = new;
        }
        for _ in 0..3 {
            report_rx.recv().await.unwrap();
        }
        assert_eq!(pool.tip(), Some(chain.tip()));

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_listener_stops_on_shutdown() {
        let chain = MockChain::new();
        let (_tx, listener) = TipListener::channel(pool(&chain), 8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let handle = tokio::spawn(listener.run(shutdown_rx, None));
        shutdown_tx.send(()).await.unwrap();
        handle.await.unwrap();
    }
}
