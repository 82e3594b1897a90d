//! # Stale-Session Reaper
//!
//! Periodic sweep that closes call sessions which outlived the configured
//! maximum duration plus a grace window. Runs on a fixed cadence,
//! independent of per-call traffic, and shares the single teardown path
//! with explicit stops — a session reaped mid-message leaves the bridge's
//! registry operations as silent no-ops.

use crate::config::CallPolicyConfig;
use crate::registry::CallRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Spawn the reaper task. The returned handle is aborted on shutdown.
pub fn spawn(registry: Arc<CallRegistry>, policy: CallPolicyConfig) -> JoinHandle<()> {
    let max_age_ms = ((policy.max_duration_secs + policy.reaper_grace_secs) * 1000) as i64;
    let cadence = Duration::from_secs(policy.reaper_interval_secs);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cadence);
        // The first tick fires immediately; skip it so a fresh process
        // never sweeps before any call could legitimately age
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let closed = registry.sweep_stale(max_age_ms);
            if closed > 0 {
                warn!(closed, max_age_ms, "reaped stale call sessions");
            } else {
                debug!(active = registry.count(), "reaper sweep found nothing stale");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_reaper_evicts_only_stale_sessions() {
        let registry = Arc::new(CallRegistry::new(5000));
        // Well past max duration + grace
        registry.insert_backdated("CA-stale", "SS-stale", 400_000);
        // Fresh call, must survive every sweep
        registry.create("CA-live", "SS-live").unwrap();

        let policy = CallPolicyConfig {
            max_duration_secs: 300,
            reaper_grace_secs: 60,
            reaper_interval_secs: 60,
        };
        let handle = spawn(registry.clone(), policy);

        // Paused time: advancing past one cadence drives a sweep
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert!(registry.get("CA-stale").is_none());
        assert!(registry.get("CA-live").is_some());
        assert_eq!(registry.count(), 1);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_does_not_sweep_before_first_cadence() {
        let registry = Arc::new(CallRegistry::new(5000));
        registry.insert_backdated("CA-stale", "SS-stale", 400_000);

        let policy = CallPolicyConfig {
            max_duration_secs: 300,
            reaper_grace_secs: 60,
            reaper_interval_secs: 60,
        };
        let handle = spawn(registry.clone(), policy);

        // Before the cadence elapses the stale session is still there
        tokio::time::sleep(Duration::from_secs(10)).await;
        tokio::task::yield_now().await;
        assert_eq!(registry.count(), 1);

        handle.abort();
    }
}
