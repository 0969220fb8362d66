//! Route configuration.

use crate::api;
use crate::middleware::request_id;
use crate::server::health::{health_check, readiness_check};
use crate::server::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the application router.
///
/// # Routes
///
/// - `GET /health` - liveness
/// - `GET /ready` - readiness (store ping)
/// - `POST /api/reserve` - hold units of a lot
/// - `POST /api/payments` - open a PIX charge for a reservation
/// - `POST /api/confirm` - issue tickets once the charge is approved
/// - `POST /api/validate` - scan a ticket at the gate
/// - `POST /api/cancel` - cancel a ticket and free its unit
/// - `GET /api/lots/:id` - availability snapshot
/// - `GET /api/buyers/:id/tickets` - a buyer's tickets
/// - `GET /api/events/:id/tickets` - an event's tickets with door counters
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/reserve", post(api::reservations::reserve))
        .route("/payments", post(api::payments::request_payment))
        .route("/confirm", post(api::payments::confirm))
        .route("/validate", post(api::validation::validate))
        .route("/cancel", post(api::cancellation::cancel))
        .route("/lots/:id", get(api::lots::availability))
        .route("/buyers/:id/tickets", get(api::tickets::by_buyer))
        .route("/events/:id/tickets", get(api::tickets::by_event));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id))
        .with_state(state)
}
