//! Periodic health reporting to Redis (spec §4.4 "Service discovery"): a
//! background task that refreshes this element's health hash and priority
//! sorted-set membership every `health_report_interval_secs`, and
//! deregisters on graceful shutdown.

use std::sync::atomic::Ordering;

use artstore_redis::registry;
use tokio::time::{interval, Duration};
use tracing::{info, warn};

use crate::state::AppState;

/// Run forever, publishing a health report on a fixed interval, until
/// `shutdown` resolves — at which point this element deregisters itself
/// before returning.
pub async fn run(state: &AppState, mut redis: redis::aio::ConnectionManager, shutdown: impl std::future::Future<Output = ()>) {
    let mut ticker = interval(Duration::from_secs(state.config.health_report_interval_secs));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = report_once(state, &mut redis).await {
                    warn!(error = %e, "health report publish failed");
                }
            }
            _ = &mut shutdown => {
                info!(element_id = %state.config.element_id, "deregistering from service discovery");
                if let Err(e) = registry::deregister(&mut redis, &state.config.element_id).await {
                    warn!(error = %e, "failed to deregister cleanly");
                }
                break;
            }
        }
    }
}

async fn report_once(
    state: &AppState,
    redis: &mut redis::aio::ConnectionManager,
) -> Result<(), artstore_redis::RedisHelperError> {
    let mode = *state.mode.read().await;
    let status = state.capacity_status().await;
    let used = state.used_bytes.load(Ordering::SeqCst);
    let count = state.file_count.load(Ordering::SeqCst);

    let fields = [
        ("mode", mode.as_str().to_string()),
        ("capacity_status", format!("{status:?}").to_uppercase()),
        ("used_bytes", used.to_string()),
        ("capacity_bytes", state.config.capacity_bytes.to_string()),
        ("file_count", count.to_string()),
        ("priority", state.config.priority.to_string()),
        ("reported_at", chrono::Utc::now().to_rfc3339()),
    ];

    registry::write_health_report(redis, &state.config.element_id, &fields, ttl_secs(state)).await?;

    let membership = state.priority_membership().await;
    registry::update_priority_membership(redis, &state.config.element_id, membership, state.config.priority)
        .await?;

    Ok(())
}

fn ttl_secs(state: &AppState) -> u64 {
    // Generous relative to the report interval so one or two missed ticks
    // don't make a live element vanish from discovery.
    state.config.health_report_interval_secs.saturating_mul(3).max(15)
}
