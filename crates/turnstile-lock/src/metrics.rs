// Lock metrics recorded through the `metrics` facade.
// No exporter is installed here; the embedding application chooses one.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};

pub const LOCK_ACQUIRED_TOTAL: &str = "turnstile_lock_acquired_total";
pub const LOCK_TIMEOUT_TOTAL: &str = "turnstile_lock_timeout_total";
pub const LOCK_FAILED_TOTAL: &str = "turnstile_lock_failed_total";
pub const LOCK_RELEASED_TOTAL: &str = "turnstile_lock_released_total";
pub const LOCK_WAIT_SECONDS: &str = "turnstile_lock_wait_seconds";

/// Register metric descriptions with the installed recorder.
/// Call once after installing an exporter.
pub fn describe_metrics() {
    describe_counter!(LOCK_ACQUIRED_TOTAL, "Total number of successful lock acquisitions");
    describe_counter!(
        LOCK_TIMEOUT_TOTAL,
        "Total number of lock acquisitions that timed out"
    );
    describe_counter!(
        LOCK_FAILED_TOTAL,
        "Total number of lock acquisitions that failed for reasons other than timeout"
    );
    describe_counter!(LOCK_RELEASED_TOTAL, "Total number of lock releases");
    describe_histogram!(
        LOCK_WAIT_SECONDS,
        "Time from acquisition request to lock ownership in seconds"
    );
}

pub(crate) fn record_acquired(lock_key: &str, waited: Duration) {
    counter!(LOCK_ACQUIRED_TOTAL, "key" => lock_key.to_string()).increment(1);
    histogram!(LOCK_WAIT_SECONDS, "key" => lock_key.to_string()).record(waited.as_secs_f64());
}

pub(crate) fn record_timeout(lock_key: &str) {
    counter!(LOCK_TIMEOUT_TOTAL, "key" => lock_key.to_string()).increment(1);
}

pub(crate) fn record_failed(lock_key: &str, reason: &'static str) {
    counter!(LOCK_FAILED_TOTAL, "key" => lock_key.to_string(), "reason" => reason).increment(1);
}

pub(crate) fn record_released(lock_key: &str) {
    counter!(LOCK_RELEASED_TOTAL, "key" => lock_key.to_string()).increment(1);
}
