//! Metrics and observability module
//!
//! Prometheus-compatible metrics for the upload pipeline:
//! - Sessions created, rejected and completed
//! - Photos recorded and bytes accounted per event
//! - Client-side file transfers, retries and durations

pub mod exporter;
pub mod recorder;

pub use exporter::{install_recorder, metrics_route, render_metrics, start_metrics_server, MetricsConfig, MetricsError};
pub use recorder::{
    init_metrics, record_rate_limited, record_session_completed, record_session_created,
    record_session_rejected, record_transfer_retry, set_storage_used, FileTransferMetrics,
};
