//! Background task that keeps cached `dday_label`s current as days pass.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use waitwith_core::clock::Clock;
use waitwith_core::store::{CountdownStore, StoreError};

/// Recompute every label once for the clock's today.
pub async fn refresh_once(
    store: &dyn CountdownStore,
    clock: &dyn Clock,
) -> Result<u64, StoreError> {
    let today = clock.today();
    let changed = store.refresh_labels(today).await?;
    if changed > 0 {
        tracing::info!(%today, changed, "refreshed countdown labels");
    } else {
        tracing::debug!(%today, "countdown labels already current");
    }
    Ok(changed)
}

/// Spawn the refresher. The first pass runs immediately, then every `interval`.
pub fn spawn_label_refresher(
    store: Arc<dyn CountdownStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = refresh_once(store.as_ref(), clock.as_ref()).await {
                tracing::warn!(error = %e, "label refresh failed, will retry next tick");
            }
        }
    })
}
