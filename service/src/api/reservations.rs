//! Reservation endpoint.

use crate::api::ApiJson;
use crate::error::AppError;
use crate::metrics;
use crate::server::AppState;
use axum::{Json, extract::State};
use bilheteria_core::ledger::ReserveError;
use bilheteria_core::{BuyerId, LotId, Money, ReservationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to hold units of a lot.
#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    /// Lot to buy from
    pub lot_id: LotId,
    /// Buyer
    pub buyer_id: BuyerId,
    /// Units wanted
    pub qty: u32,
}

/// A held reservation.
#[derive(Debug, Serialize)]
pub struct ReserveResponse {
    /// Reservation id, used to pay and confirm
    pub reservation_id: ReservationId,
    /// Amount due in centavos
    pub amount: Money,
    /// Units go back on sale after this
    pub expires_at: DateTime<Utc>,
}

/// `POST /api/reserve`
///
/// # Errors
///
/// `409 INSUFFICIENT`, `404 NOT_FOUND`, `422 WINDOW_CLOSED` or
/// `400 BAD_REQUEST` when the units cannot be held.
pub async fn reserve(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ReserveRequest>,
) -> Result<Json<ReserveResponse>, AppError> {
    let result = state
        .ledger
        .reserve(request.lot_id, request.buyer_id, request.qty)
        .await;

    metrics::record_reservation(match &result {
        Ok(_) => "reserved",
        Err(err) => outcome_label(err),
    });

    let reservation = result?;
    Ok(Json(ReserveResponse {
        reservation_id: reservation.id,
        amount: reservation.amount,
        expires_at: reservation.expires_at,
    }))
}

const fn outcome_label(err: &ReserveError) -> &'static str {
    match err {
        ReserveError::Insufficient { .. } => "insufficient",
        ReserveError::WindowClosed(_) => "window_closed",
        ReserveError::NotFound(_) => "not_found",
        ReserveError::InvalidQuantity { .. } => "invalid",
        ReserveError::Store(_) => "error",
    }
}
