// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub const EVENTS_APPENDED: &str = "tessera_events_appended_total";
pub const APPEND_DURATION: &str = "tessera_append_duration_seconds";
pub const CHUNKS_SCAVENGED: &str = "tessera_chunks_scavenged_total";
pub const SCAVENGE_BYTES_RECLAIMED: &str = "tessera_scavenge_bytes_reclaimed_total";
pub const RECOVERY_DURATION: &str = "tessera_recovery_duration_seconds";

/// Installs the `tracing` subscriber. Filter comes from `RUST_LOG`.
pub fn init_tracing() {
    let installed = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tessera_node=info,tessera_persistence=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry() {
    init_tracing();

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROM_HANDLE.set(handle).is_err() {
                tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
            }
        }
        Err(e) => tracing::warn!("Metrics recorder not installed: {}", e),
    }

    metrics::describe_counter!(EVENTS_APPENDED, "Total number of records appended to the log");
    metrics::describe_histogram!(APPEND_DURATION, "Time taken to append one batch");
    metrics::describe_counter!(CHUNKS_SCAVENGED, "Total number of chunks rewritten by the scavenger");
    metrics::describe_counter!(SCAVENGE_BYTES_RECLAIMED, "Disk space returned by scavenging");
    metrics::describe_histogram!(RECOVERY_DURATION, "Time taken to recover the store at open");
}

/// Renders metrics in the Prometheus text format, for embedding servers.
pub fn render_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}
