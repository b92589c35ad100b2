use crate::{ChangeOutcome, Manager};
use anyhow::Result;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Poll the display state on an interval and re-run detection whenever the
/// fingerprint of connected outputs changes. Runs until ctrl-c.
///
/// A query or apply failure only skips the tick; outputs flapping during a
/// dock transition settle by the next one.
pub async fn run(manager: &mut Manager, interval: Duration) -> Result<()> {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = None;

    info!("Watching for output changes every {:?}", interval);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch loop");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let outputs = match manager.query() {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!("Query failed: {:#}", e);
                continue;
            }
        };
        let fingerprint = manager.fingerprint(&outputs);
        if last.as_ref() == Some(&fingerprint) {
            continue;
        }
        debug!("Fingerprint changed, re-running detection");
        last = Some(fingerprint);

        match manager.change(None) {
            Ok(ChangeOutcome::Applied { profile }) => info!("Switched to '{}'", profile),
            Ok(ChangeOutcome::AlreadyCurrent { profile }) => {
                debug!("Profile '{}' still active", profile)
            }
            Ok(ChangeOutcome::NoMatch) => {}
            Err(e) => warn!("Switching failed: {:#}", e),
        }
    }
}
