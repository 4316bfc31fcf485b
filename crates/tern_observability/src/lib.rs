//! Observability setup: structured logging, metrics (Prometheus).

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Build the log filter: `RUST_LOG` when set, otherwise `directives`.
pub fn log_filter(directives: &str) -> Result<EnvFilter, ParseError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(directives),
    }
}

/// Install the process-wide subscriber. Fails if the directives do not parse
/// or a global subscriber is already set.
pub fn init_tracing(directives: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = log_filter(directives)?;
    let fmt_layer = fmt::layer().with_target(true).with_thread_ids(true);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

/// Install the Prometheus recorder with an HTTP listener on `listen_addr`.
pub fn init_metrics(listen_addr: &str) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let addr: SocketAddr = listen_addr.parse()?;
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "metrics endpoint listening");
    Ok(addr)
}

/// Record the outcome of one local/remote split.
pub fn record_task_split(local_tasks: usize, remote_tasks: usize) {
    metrics::counter!("tern_tasks_total", "where" => "local").increment(local_tasks as u64);
    metrics::counter!("tern_tasks_total", "where" => "remote").increment(remote_tasks as u64);
}

/// Record a batch of tasks executed in-process.
pub fn record_local_tasks(task_count: usize, rows_processed: u64) {
    metrics::counter!("tern_local_tasks_executed_total").increment(task_count as u64);
    metrics::counter!("tern_local_rows_processed_total").increment(rows_processed);
}

pub fn record_local_execution_decision(local: bool) {
    metrics::counter!(
        "tern_local_execution_decisions_total",
        "local" => local.to_string()
    )
    .increment(1);
}

/// Record one materialized intermediate result.
pub fn record_subplan_materialized(bytes: u64, remote_node_count: usize, wrote_local_file: bool) {
    metrics::counter!("tern_subplans_materialized_total").increment(1);
    metrics::histogram!("tern_intermediate_result_bytes").record(bytes as f64);
    metrics::histogram!("tern_intermediate_result_fanout").record(remote_node_count as f64);
    if wrote_local_file {
        metrics::counter!("tern_intermediate_result_local_files_total").increment(1);
    }
}
