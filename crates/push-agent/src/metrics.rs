//! Metrics collection and export for the push agent.
//!
//! Uses the `metrics` crate for instrumentation; the binary can export to
//! Prometheus format. Without an installed recorder every call is a no-op.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "simplepush_connections_total";
    pub const CONNECT_ERRORS_TOTAL: &str = "simplepush_connect_errors_total";
    pub const MESSAGES_TOTAL: &str = "simplepush_messages_total";
    pub const REGISTRATIONS_TOTAL: &str = "simplepush_registrations_total";
    pub const UNREGISTRATIONS_TOTAL: &str = "simplepush_unregistrations_total";
    pub const NOTIFICATIONS_TOTAL: &str = "simplepush_notifications_total";
    pub const DELIVERY_FAILURES_TOTAL: &str = "simplepush_delivery_failures_total";
    pub const CHANNELS_STORED: &str = "simplepush_channels_stored";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections opened"
    );
    metrics::describe_counter!(
        names::CONNECT_ERRORS_TOTAL,
        "Total number of failed or dropped connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of wire messages");
    metrics::describe_counter!(
        names::REGISTRATIONS_TOTAL,
        "Register replies by outcome"
    );
    metrics::describe_counter!(
        names::UNREGISTRATIONS_TOTAL,
        "Unregister replies by outcome"
    );
    metrics::describe_counter!(
        names::NOTIFICATIONS_TOTAL,
        "Total number of notification updates received"
    );
    metrics::describe_counter!(
        names::DELIVERY_FAILURES_TOTAL,
        "Notification handlers that failed or panicked"
    );
    metrics::describe_gauge!(names::CHANNELS_STORED, "Channel records in the store");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics endpoint.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an opened connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
}

/// Record a failed or dropped connection.
pub fn record_connect_error() {
    counter!(names::CONNECT_ERRORS_TOTAL).increment(1);
}

/// Record a wire message.
pub fn record_message(message_type: &str, direction: &'static str) {
    counter!(
        names::MESSAGES_TOTAL,
        "direction" => direction,
        "type" => message_type.to_string()
    )
    .increment(1);
}

/// Record a register reply.
pub fn record_registration(ok: bool) {
    counter!(names::REGISTRATIONS_TOTAL, "outcome" => outcome(ok)).increment(1);
}

/// Record an unregister reply.
pub fn record_unregistration(ok: bool) {
    counter!(names::UNREGISTRATIONS_TOTAL, "outcome" => outcome(ok)).increment(1);
}

/// Record delivered notification updates and their handler failures.
pub fn record_notifications(updates: usize, failures: usize) {
    counter!(names::NOTIFICATIONS_TOTAL).increment(updates as u64);
    if failures > 0 {
        counter!(names::DELIVERY_FAILURES_TOTAL).increment(failures as u64);
    }
}

/// Update the stored channel count.
pub fn set_channels_stored(count: usize) {
    gauge!(names::CHANNELS_STORED).set(count as f64);
}

fn outcome(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "rejected"
    }
}
