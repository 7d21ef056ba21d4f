//! Background maintenance loop.
//!
//! Three tickers drive the orchestrator: a frequent check that commits once
//! enough inserts are queued, a periodic save, and a hard limit that commits
//! and saves regardless of queue length. A zero period disables a ticker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::IndexError;
use crate::service::IndexOrchestrator;

/// Errors buffered for the caller before new ones are dropped.
pub const ERROR_CHANNEL_CAPACITY: usize = 64;

impl IndexOrchestrator {
    /// Spawn the maintenance loop.
    ///
    /// Returns `None` without spawning when automatic indexing is disabled.
    /// Otherwise the receiver yields every error other than the
    /// nothing-to-commit no-op, and closes once the loop exits after
    /// `token` is cancelled.
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> Option<mpsc::Receiver<IndexError>> {
        if self.config.auto_index_check_duration().is_zero() || self.config.auto_index_length == 0 {
            info!("Automatic indexing disabled");
            return None;
        }

        let (tx, rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let index = Arc::clone(self);
        tokio::spawn(async move { index.run(token, tx).await });
        Some(rx)
    }

    async fn run(&self, token: CancellationToken, tx: mpsc::Sender<IndexError>) {
        let delay = self.config.initial_delay();
        if !delay.is_zero() {
            debug!(delay = ?delay, "Delaying automatic indexing");
            tokio::select! {
                _ = token.cancelled() => {
                    self.drain(&tx).await;
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let mut check = ticker(self.config.auto_index_check_duration());
        let mut save = ticker(self.config.auto_save_index_duration());
        let mut limit = ticker(self.config.auto_index_duration_limit());
        info!(
            check = ?self.config.auto_index_check_duration(),
            save = ?self.config.auto_save_index_duration(),
            limit = ?self.config.auto_index_duration_limit(),
            length = self.config.auto_index_length,
            "Automatic indexing started"
        );

        loop {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tick(&mut check) => {
                    if self.insert_vqueue_buffer_len() >= self.config.auto_index_length {
                        self.create_index(&token).await
                    } else {
                        Ok(())
                    }
                }
                _ = tick(&mut save) => self.save_index(&token).await,
                _ = tick(&mut limit) => self.create_and_save_index(&token).await,
            };
            if let Err(e) = result {
                forward(&tx, e);
            }
        }

        self.drain(&tx).await;
        info!("Automatic indexing stopped");
    }

    /// Final commit on shutdown, with its own token so it runs to completion.
    async fn drain(&self, tx: &mpsc::Sender<IndexError>) {
        if let Err(e) = self.create_index(&CancellationToken::new()).await {
            forward(tx, e);
        }
    }
}

fn ticker(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn forward(tx: &mpsc::Sender<IndexError>, error: IndexError) {
    if error.is_noop() {
        return;
    }
    match tx.try_send(error) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(error)) => {
            warn!(error = %error, "Error channel full, dropping error");
        }
        Err(mpsc::error::TrySendError::Closed(error)) => {
            debug!(error = %error, "Error receiver gone");
        }
    }
}
