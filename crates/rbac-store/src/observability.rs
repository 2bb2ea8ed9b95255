//! Tracing and Prometheus wiring for processes embedding the rule store.
//!
//! # Notes
//! Initialization is guarded by `OnceLock` so repeated calls (tests, multiple
//! embedders in one process) return the same metrics handle.
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static OBS_INIT: OnceLock<()> = OnceLock::new();

/// Install the fmt subscriber (filtered by `RUST_LOG`, default `info`) and the
/// Prometheus recorder, returning the handle used to render metrics.
pub fn init_observability(service_name: &str) -> PrometheusHandle {
    OBS_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let fmt_layer = tracing_subscriber::fmt::layer();
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init();
        tracing::info!(service = service_name, "observability initialized");
    });

    install_metrics_recorder()
}

fn install_metrics_recorder() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if metrics::set_global_recorder(recorder).is_err() {
                tracing::warn!("a metrics recorder is already installed; keeping it");
            }
            describe_metrics();
            handle
        })
        .clone()
}

fn describe_metrics() {
    metrics::describe_counter!(
        "rbac_store_writes_total",
        "Rows written to or removed from the rule store, by operation."
    );
    metrics::describe_gauge!(
        "rbac_store_rules_loaded",
        "Rules loaded into the enforcer by the most recent full load."
    );
    metrics::describe_counter!(
        "rbac_sync_passes_total",
        "Grouping synchronization passes, by outcome."
    );
}
