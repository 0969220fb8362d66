//! Buyer-initiated cancellation.
//!
//! `confirmado -> cancelado` is applied with a compare-and-set; only the
//! caller that wins it gives the unit back to the lot.

use crate::error::{ErrorKind, StoreError};
use crate::ledger::{InventoryLedger, LedgerError};
use crate::store::{Store, TransitionOutcome};
use crate::ticket::{InvalidTransition, Ticket, Transition};
use crate::types::TicketId;
use std::sync::Arc;
use thiserror::Error;

/// Why a ticket was not cancelled.
#[derive(Error, Debug)]
pub enum CancelError {
    /// Unknown ticket
    #[error("ticket {0} not found")]
    NotFound(TicketId),

    /// Ticket is not `confirmado`
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// The ticket moved to `cancelado` but its lot could not be credited
    #[error("ticket cancelled but unit not released: {0}")]
    Release(#[source] LedgerError),

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CancelError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidTransition(_) => ErrorKind::Conflict,
            Self::Release(_) => ErrorKind::InvariantViolation,
            Self::Store(err) => err.kind(),
        }
    }
}

/// Cancels tickets and returns their unit to the lot.
#[derive(Clone)]
pub struct CancellationService {
    store: Arc<dyn Store>,
    ledger: InventoryLedger,
}

impl CancellationService {
    /// Creates the service
    #[must_use]
    pub fn new(store: Arc<dyn Store>, ledger: InventoryLedger) -> Self {
        Self { store, ledger }
    }

    /// Cancels a `confirmado` ticket and releases one unit of its lot.
    ///
    /// # Errors
    ///
    /// [`CancelError::NotFound`] for an unknown ticket and
    /// [`CancelError::InvalidTransition`] for any status but `confirmado`.
    pub async fn cancel(&self, ticket_id: TicketId) -> Result<Ticket, CancelError> {
        let ticket = self
            .store
            .get_ticket(ticket_id)
            .await?
            .ok_or(CancelError::NotFound(ticket_id))?;

        let cancelled = ticket.apply(Transition::Cancel)?;

        let cancelled = match self.store.transition(ticket.status, &cancelled).await? {
            TransitionOutcome::Applied(cancelled) => cancelled,
            TransitionOutcome::Stale(current) => {
                tracing::debug!(ticket_id = %ticket_id, status = %current.status, "Ticket changed before cancel");
                return Err(CancelError::InvalidTransition(InvalidTransition {
                    from: current.status,
                    transition: Transition::Cancel.name(),
                }));
            }
            TransitionOutcome::NotFound => return Err(CancelError::NotFound(ticket_id)),
        };

        if let Err(err) = self.ledger.release(cancelled.lot_id, 1).await {
            tracing::error!(ticket_id = %ticket_id, lot_id = %cancelled.lot_id, error = %err, "Cancelled ticket left its unit sold");
            return Err(CancelError::Release(err));
        }

        tracing::info!(ticket_id = %ticket_id, lot_id = %cancelled.lot_id, "Ticket cancelled");
        Ok(cancelled)
    }
}
