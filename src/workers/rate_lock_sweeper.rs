//! Rate lock sweeper.
//!
//! Chain payments quote a rate that is only honored for a limited
//! window. The sweeper periodically expires pending chain payments
//! whose window has passed, so a later deposit is orphaned instead of
//! settled at a stale rate. The expiry UPDATE is guarded, so running
//! several instances is harmless.

use crate::database::payment_repository::PaymentRepository;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error as log_error, info};

pub struct RateLockSweeper {
    repository: Arc<PaymentRepository>,
    interval: Duration,
}

impl RateLockSweeper {
    pub fn new(repository: Arc<PaymentRepository>, interval: Duration) -> Self {
        Self {
            repository,
            interval,
        }
    }

    /// Run forever; meant to be spawned as a background task
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.repository.expire_stale_chain_payments().await {
                Ok(0) => {}
                Ok(expired) => {
                    info!(expired, "expired stale chain payments");
                }
                Err(err) => {
                    log_error!(error = %err, "rate lock sweep failed");
                }
            }
        }
    }
}
