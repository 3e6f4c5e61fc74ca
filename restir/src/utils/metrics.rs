#[cfg(feature = "metrics")]
use std::time::Instant;

/// Runs given closure, logging how long it took to record it.
///
/// Only the CPU-side recording time is measured - GPU timings require
/// timestamp queries, which are the dispatch engine's business.
#[cfg(feature = "metrics")]
pub fn metric<T>(label: &str, f: impl FnOnce() -> T) -> T {
    let started_at = Instant::now();
    let result = f();

    log::debug!(
        "metric: {label} = {}",
        humantime::format_duration(started_at.elapsed())
    );

    result
}

#[cfg(not(feature = "metrics"))]
pub fn metric<T>(_: &str, f: impl FnOnce() -> T) -> T {
    f()
}
