//! Lot availability endpoint.

use crate::error::AppError;
use crate::server::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use bilheteria_core::LotId;
use bilheteria_core::ledger::Availability;
use uuid::Uuid;

/// `GET /api/lots/:id`
///
/// # Errors
///
/// `400` for a malformed id, `404` for an unknown lot.
pub async fn availability(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Availability>, AppError> {
    let lot_id = Uuid::parse_str(&id)
        .map(LotId::from_uuid)
        .map_err(|_| AppError::bad_request(format!("'{id}' is not a lot id")))?;

    Ok(Json(state.ledger.availability(lot_id).await?))
}
