//! Metrics recorder for upload sessions and file transfers

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    // Server side
    describe_counter!(
        "guestcap_sessions_created_total",
        "Total number of upload sessions created"
    );
    describe_counter!(
        "guestcap_sessions_rejected_total",
        "Create-session calls rejected, by reason"
    );
    describe_counter!(
        "guestcap_sessions_completed_total",
        "Total number of upload sessions reconciled"
    );
    describe_counter!(
        "guestcap_files_requested_total",
        "Files declared in created sessions"
    );
    describe_counter!(
        "guestcap_photos_created_total",
        "Photo records created at completion"
    );
    describe_counter!(
        "guestcap_stored_bytes_total",
        "Bytes added to event storage accounting"
    );
    describe_counter!(
        "guestcap_rate_limited_total",
        "Requests denied by a rate limit policy"
    );
    describe_gauge!(
        "guestcap_event_storage_used_bytes",
        "Storage used by an event after its last completion"
    );

    // Client side
    describe_counter!(
        "guestcap_files_uploaded_total",
        "Files transferred to storage"
    );
    describe_counter!(
        "guestcap_files_failed_total",
        "Files that failed after all retries"
    );
    describe_counter!(
        "guestcap_transfer_retries_total",
        "Transfer attempts retried after a transient failure"
    );
    describe_histogram!(
        "guestcap_transfer_duration_seconds",
        "Time to transfer one file, retries included"
    );
    describe_histogram!(
        "guestcap_throughput_bytes_per_second",
        "Per-file transfer throughput"
    );
}

// ============== Sessions ==============

pub fn record_session_created(file_count: usize, requested_bytes: u64) {
    counter!("guestcap_sessions_created_total").increment(1);
    counter!("guestcap_files_requested_total").increment(file_count as u64);
    histogram!("guestcap_session_requested_bytes").record(requested_bytes as f64);
}

pub fn record_session_rejected(reason: &str) {
    counter!("guestcap_sessions_rejected_total", "reason" => reason.to_string()).increment(1);
}

pub fn record_session_completed(photos_created: usize, stored_bytes: u64) {
    counter!("guestcap_sessions_completed_total").increment(1);
    counter!("guestcap_photos_created_total").increment(photos_created as u64);
    counter!("guestcap_stored_bytes_total").increment(stored_bytes);
}

pub fn record_rate_limited(policy: &str) {
    counter!("guestcap_rate_limited_total", "policy" => policy.to_string()).increment(1);
}

/// Update the storage gauge of one event
pub fn set_storage_used(event_id: &str, bytes: u64) {
    gauge!("guestcap_event_storage_used_bytes", "event_id" => event_id.to_string())
        .set(bytes as f64);
}

// ============== Transfers ==============

pub fn record_transfer_retry() {
    counter!("guestcap_transfer_retries_total").increment(1);
}

/// Times one file transfer and records its outcome
pub struct FileTransferMetrics {
    start_time: Instant,
    file_size: u64,
}

impl FileTransferMetrics {
    pub fn start(file_size: u64) -> Self {
        Self {
            start_time: Instant::now(),
            file_size,
        }
    }

    pub fn complete(self) {
        let duration = self.start_time.elapsed();
        counter!("guestcap_files_uploaded_total").increment(1);
        histogram!("guestcap_transfer_duration_seconds").record(duration.as_secs_f64());
        histogram!("guestcap_throughput_bytes_per_second").record(self.throughput());
    }

    pub fn fail(self, reason: &str) {
        counter!("guestcap_files_failed_total", "reason" => reason.to_string()).increment(1);
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Bytes per second since `start`
    pub fn throughput(&self) -> f64 {
        let secs = self.start_time.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.file_size as f64 / secs
        } else {
            0.0
        }
    }
}
