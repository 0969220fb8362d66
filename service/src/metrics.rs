//! Business metrics for the box office.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `bilheteria_reservations_total{outcome}` - reserve attempts by outcome
//! - `bilheteria_tickets_issued_total` - tickets minted
//! - `bilheteria_validations_total{outcome}` - gate scans by outcome
//! - `bilheteria_tickets_cancelled_total` - tickets cancelled
//! - `bilheteria_reservations_expired_total` - held reservations swept
//! - `bilheteria_code_collisions_total` - ticket code collisions retried

use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Installs the Prometheus recorder with its own HTTP listener.
///
/// # Errors
///
/// Returns an error if the address does not parse or the recorder cannot be
/// installed (for instance, a second time in one process).
pub fn install_exporter(address: &str) -> anyhow::Result<()> {
    let address: SocketAddr = address.parse()?;
    PrometheusBuilder::new().with_http_listener(address).install()?;
    register_business_metrics();
    tracing::info!(%address, "Prometheus exporter listening");
    Ok(())
}

/// Register descriptions for every business metric.
pub fn register_business_metrics() {
    describe_counter!(
        "bilheteria_reservations_total",
        "Reserve attempts by outcome (reserved, insufficient, window_closed, not_found, invalid)"
    );
    describe_counter!("bilheteria_tickets_issued_total", "Tickets minted after an approved payment");
    describe_counter!(
        "bilheteria_validations_total",
        "Gate scans by outcome (success, already_used, cancelled, not_confirmed, not_found)"
    );
    describe_counter!("bilheteria_tickets_cancelled_total", "Tickets cancelled and returned to their lot");
    describe_counter!(
        "bilheteria_reservations_expired_total",
        "Held reservations released by the expiry sweep"
    );
    describe_counter!(
        "bilheteria_code_collisions_total",
        "Ticket code collisions detected by the store and retried"
    );
}

/// Record one reserve attempt.
pub fn record_reservation(outcome: &'static str) {
    metrics::counter!("bilheteria_reservations_total", "outcome" => outcome).increment(1);
}

/// Record freshly minted tickets.
pub fn record_tickets_issued(count: usize) {
    metrics::counter!("bilheteria_tickets_issued_total").increment(count as u64);
}

/// Record one gate scan.
pub fn record_validation(outcome: &'static str) {
    metrics::counter!("bilheteria_validations_total", "outcome" => outcome).increment(1);
}

/// Record a cancelled ticket.
pub fn record_ticket_cancelled() {
    metrics::counter!("bilheteria_tickets_cancelled_total").increment(1);
}

/// Record a sweep result.
pub fn record_reservations_expired(count: usize) {
    if count > 0 {
        metrics::counter!("bilheteria_reservations_expired_total").increment(count as u64);
    }
}
