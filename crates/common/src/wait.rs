use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Poll `connect` until it succeeds or `exiting` is raised.
///
/// Returns `None` when the process is shutting down. The sleep between
/// attempts is sliced into short ticks so a shutdown request is observed
/// within a few milliseconds regardless of the poll interval.
pub fn wait_for_resource<F, T, E>(
    mut connect: F,
    poll_interval_ms: u64,
    resource_name: &str,
    exiting: &AtomicBool,
) -> Option<T>
where
    F: FnMut() -> Result<T, E>,
    E: std::fmt::Display,
{
    loop {
        if exiting.load(Ordering::Relaxed) {
            tracing::debug!("Gave up waiting for {} (shutting down)", resource_name);
            return None;
        }
        match connect() {
            Ok(resource) => {
                tracing::info!("{} connected", resource_name);
                return Some(resource);
            }
            Err(e) => {
                tracing::debug!("Waiting for {} ({})", resource_name, e);
                sleep_observing(Duration::from_millis(poll_interval_ms), exiting);
            }
        }
    }
}

/// Sleep for `total`, waking every few milliseconds to check `exiting`.
pub fn sleep_observing(total: Duration, exiting: &AtomicBool) {
    const TICK: Duration = Duration::from_millis(5);
    let deadline = std::time::Instant::now() + total;
    while !exiting.load(Ordering::Relaxed) {
        let now = std::time::Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(TICK.min(deadline - now));
    }
}
