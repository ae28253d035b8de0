use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::explicit_locks::ExplicitLockManager;

/// Start a background thread that periodically expires timed-out explicit
/// locks. The lock manager never schedules itself; this is the scheduler.
pub fn start_expiry_thread(
    manager: Arc<ExplicitLockManager>,
    check_interval: Duration,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("vaultfs-lock-expiry".to_string())
        .spawn(move || {
            debug!("Lock expiry thread started, interval={:?}", check_interval);
            while !shutdown.load(Ordering::Relaxed) {
                // Sleep in short ticks so we notice the shutdown flag promptly.
                let mut remaining = check_interval;
                let tick = Duration::from_millis(50);
                while remaining > Duration::ZERO {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    let sleep_time = remaining.min(tick);
                    std::thread::sleep(sleep_time);
                    remaining = remaining.saturating_sub(sleep_time);
                }
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                let expired = manager.expire();
                if !expired.is_empty() {
                    info!("Expired {} explicit lock(s)", expired.len());
                }
            }
            debug!("Lock expiry thread shutting down");
        })
}
