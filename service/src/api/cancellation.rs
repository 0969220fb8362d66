//! Cancellation endpoint.

use crate::api::ApiJson;
use crate::error::AppError;
use crate::metrics;
use crate::server::AppState;
use axum::{Json, extract::State};
use bilheteria_core::{TicketId, TicketStatus};
use serde::{Deserialize, Serialize};

/// Ticket to cancel.
#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    /// Ticket id
    pub ticket_id: TicketId,
}

/// Cancellation result.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// The unit went back to its lot
    pub released: bool,
    /// Ticket cancelled
    pub ticket_id: TicketId,
    /// Status after the call (always `cancelado`)
    pub status: TicketStatus,
}

/// `POST /api/cancel`
///
/// # Errors
///
/// `404` for an unknown ticket, `409 INVALID_TRANSITION` unless the ticket
/// is `confirmado`.
pub async fn cancel(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CancelRequest>,
) -> Result<Json<CancelResponse>, AppError> {
    let ticket = state.cancellation.cancel(request.ticket_id).await?;
    metrics::record_ticket_cancelled();

    Ok(Json(CancelResponse {
        released: true,
        ticket_id: ticket.id,
        status: ticket.status,
    }))
}
