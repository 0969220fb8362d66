//! Payment endpoints: open a PIX charge, then confirm it.

use crate::api::ApiJson;
use crate::error::AppError;
use crate::metrics;
use crate::server::AppState;
use axum::{Json, extract::State, http::StatusCode};
use bilheteria_core::checkout::PaymentInstructions;
use bilheteria_core::{ReservationId, Ticket};
use serde::{Deserialize, Serialize};

/// Request to pay a reservation.
#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    /// Held reservation
    pub reservation_id: ReservationId,
    /// Optional payer e-mail forwarded to the processor
    #[serde(default)]
    pub payer_email: Option<String>,
}

/// `POST /api/payments`
///
/// Returns the BR Code the buyer pays and the reference to confirm with. The
/// processor's own code (and QR image) is passed through when it sends one.
///
/// # Errors
///
/// `404` for an unknown reservation, `409 RESERVATION_NOT_HELD` when it was
/// already consumed or expired, `503 GATEWAY_UNAVAILABLE` when the processor
/// cannot be reached.
pub async fn request_payment(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<PaymentRequest>,
) -> Result<Json<PaymentInstructions>, AppError> {
    let payer_email = request.payer_email.filter(|email| !email.trim().is_empty());
    let instructions = state
        .checkout
        .request_payment(request.reservation_id, payer_email)
        .await?;
    Ok(Json(instructions))
}

/// Request to turn an approved payment into tickets.
#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    /// Reservation being paid
    pub reservation_id: ReservationId,
    /// Processor reference returned by `/api/payments`
    pub payment_ref: String,
}

/// Tickets of a paid reservation.
#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    /// One ticket per reserved unit
    pub tickets: Vec<Ticket>,
    /// Set when the tickets were issued by an earlier call
    pub replayed: bool,
}

/// `POST /api/confirm`
///
/// `200` with freshly issued tickets, `409` with the same tickets when this
/// payment reference was already confirmed.
///
/// # Errors
///
/// `402 PAYMENT_NOT_APPROVED` while the charge is pending or after it failed,
/// `409 PAYMENT_MISMATCH` when the charge was opened for another reservation,
/// `503 GATEWAY_UNAVAILABLE` when the processor cannot be reached.
pub async fn confirm(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ConfirmRequest>,
) -> Result<(StatusCode, Json<ConfirmResponse>), AppError> {
    if request.payment_ref.trim().is_empty() {
        return Err(AppError::bad_request("payment_ref is required"));
    }

    let issuance = state
        .checkout
        .confirm(request.reservation_id, &request.payment_ref)
        .await?;

    let status = if issuance.replayed {
        StatusCode::CONFLICT
    } else {
        metrics::record_tickets_issued(issuance.tickets.len());
        StatusCode::OK
    };

    Ok((
        status,
        Json(ConfirmResponse {
            tickets: issuance.tickets,
            replayed: issuance.replayed,
        }),
    ))
}
