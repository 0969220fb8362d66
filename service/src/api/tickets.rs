//! Ticket listings: the buyer's wallet and the organiser's attendance view.

use crate::error::AppError;
use crate::server::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use bilheteria_core::roster::EventRoster;
use bilheteria_core::{BuyerId, EventId, Ticket};
use serde::Serialize;
use uuid::Uuid;

/// A buyer's tickets.
#[derive(Debug, Serialize)]
pub struct BuyerTickets {
    /// Buyer
    pub buyer_id: BuyerId,
    /// Oldest first, any status
    pub tickets: Vec<Ticket>,
}

/// `GET /api/buyers/:id/tickets`
///
/// An unknown buyer gets an empty list.
///
/// # Errors
///
/// `400` for a malformed id, `503` when the store is unreachable.
pub async fn by_buyer(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<BuyerTickets>, AppError> {
    let buyer_id = parse_id(&id, "buyer").map(BuyerId::from_uuid)?;
    let tickets = state.roster.for_buyer(buyer_id).await?;
    Ok(Json(BuyerTickets { buyer_id, tickets }))
}

/// `GET /api/events/:id/tickets`
///
/// # Errors
///
/// `400` for a malformed id, `503` when the store is unreachable.
pub async fn by_event(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<EventRoster>, AppError> {
    let event_id = parse_id(&id, "event").map(EventId::from_uuid)?;
    Ok(Json(state.roster.for_event(event_id).await?))
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::bad_request(format!("'{raw}' is not a {what} id")))
}
