//! Gate validation.
//!
//! A code is consumed exactly once: the `confirmado -> usado` step is a
//! compare-and-set on the ticket row, so of two simultaneous scans one wins
//! and the other sees the winner's stamp.

use crate::code::TicketCode;
use crate::environment::Clock;
use crate::error::{ErrorKind, StoreError};
use crate::store::{Store, TransitionOutcome};
use crate::ticket::{InvalidTransition, Ticket, TicketStatus, Transition};
use crate::types::{BuyerId, EventId, LotId, Money, TicketId, ValidatorId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// What the gate should do with a scanned code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// Let them in
    Success {
        /// Ticket consumed
        ticket_id: TicketId,
        /// Owner
        buyer_id: BuyerId,
        /// Lot it was sold from
        lot_id: LotId,
        /// Price paid
        paid_amount: Money,
        /// Stamp written on the ticket
        validated_at: DateTime<Utc>,
    },
    /// Ticket was already scanned
    AlreadyUsed {
        /// Ticket
        ticket_id: TicketId,
        /// Who scanned it first
        validated_by: Option<ValidatorId>,
        /// When
        validated_at: Option<DateTime<Utc>>,
    },
    /// Ticket was cancelled
    Cancelled {
        /// Ticket
        ticket_id: TicketId,
    },
    /// Ticket exists but was never paid for
    NotConfirmed {
        /// Ticket
        ticket_id: TicketId,
    },
    /// No such code for this event
    NotFound,
}

impl ValidationOutcome {
    /// Label used in logs and metrics
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::AlreadyUsed { .. } => "already_used",
            Self::Cancelled { .. } => "cancelled",
            Self::NotConfirmed { .. } => "not_confirmed",
            Self::NotFound => "not_found",
        }
    }
}

/// Validation could not reach a verdict.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A confirmed ticket refused to validate
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl ValidationError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(err) => err.kind(),
            Self::Transition(_) => ErrorKind::InvariantViolation,
        }
    }
}

/// Consumes ticket codes at the gate.
#[derive(Clone)]
pub struct ValidationService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl ValidationService {
    /// Creates the service
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Checks `code` for `event_id` and consumes it if it is valid.
    ///
    /// Input is trimmed and upper-cased first; anything that still is not a
    /// well-formed code is [`ValidationOutcome::NotFound`].
    ///
    /// # Errors
    ///
    /// Only on store failure. Every gate-facing result is an outcome.
    pub async fn validate(
        &self,
        code: &str,
        event_id: EventId,
        validator_id: ValidatorId,
    ) -> Result<ValidationOutcome, ValidationError> {
        let Ok(code) = TicketCode::parse(code) else {
            tracing::debug!(event_id = %event_id, "Malformed code scanned");
            return Ok(ValidationOutcome::NotFound);
        };

        let Some(mut ticket) = self.store.find_by_code(&code, event_id).await? else {
            tracing::debug!(event_id = %event_id, %code, "Unknown code scanned");
            return Ok(ValidationOutcome::NotFound);
        };

        // Status only moves forward, so this settles within two rounds.
        loop {
            if let Some(outcome) = Self::rejection(&ticket) {
                tracing::info!(
                    ticket_id = %ticket.id,
                    validator_id = %validator_id,
                    outcome = outcome.label(),
                    "Ticket refused at gate"
                );
                return Ok(outcome);
            }

            let at = self.clock.now();
            let used = ticket.apply(Transition::Validate { by: validator_id, at })?;

            match self.store.transition(TicketStatus::Confirmado, &used).await? {
                TransitionOutcome::Applied(used) => {
                    tracing::info!(ticket_id = %used.id, validator_id = %validator_id, "Ticket validated");
                    return Ok(ValidationOutcome::Success {
                        ticket_id: used.id,
                        buyer_id: used.buyer_id,
                        lot_id: used.lot_id,
                        paid_amount: used.paid_amount,
                        validated_at: at,
                    });
                }
                TransitionOutcome::Stale(current) => {
                    tracing::debug!(ticket_id = %current.id, status = %current.status, "Lost validation race");
                    ticket = current;
                }
                TransitionOutcome::NotFound => return Ok(ValidationOutcome::NotFound),
            }
        }
    }

    fn rejection(ticket: &Ticket) -> Option<ValidationOutcome> {
        match ticket.status {
            TicketStatus::Confirmado => None,
            TicketStatus::Usado => Some(ValidationOutcome::AlreadyUsed {
                ticket_id: ticket.id,
                validated_by: ticket.validated_by,
                validated_at: ticket.validated_at,
            }),
            TicketStatus::Cancelado => Some(ValidationOutcome::Cancelled { ticket_id: ticket.id }),
            TicketStatus::Pendente => Some(ValidationOutcome::NotConfirmed { ticket_id: ticket.id }),
        }
    }
}
