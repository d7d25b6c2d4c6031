use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info};

use crate::engine::lifecycle::DispatchEngine;

/// Periodically expires overdue offers, then retries deliveries still waiting
/// for a driver. The only background loop besides the side-effect worker.
pub async fn run_expiry_sweeper(engine: DispatchEngine, every: Duration) {
    info!(interval_secs = every.as_secs(), "expiry sweeper started");

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        match engine.expire_pending_assignments().await {
            Ok(expired) if !expired.is_empty() => {
                info!(count = expired.len(), "expired overdue offers");
            }
            Ok(_) => {}
            Err(err) => {
                error!(error = %err, "expiry sweep failed");
            }
        }

        match engine.reoffer_stranded_deliveries().await {
            Ok(offered) if !offered.is_empty() => {
                info!(count = offered.len(), "offered stranded deliveries");
            }
            Ok(_) => {}
            Err(err) => {
                error!(error = %err, "stranded delivery pass failed");
            }
        }
    }
}
