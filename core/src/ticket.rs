//! Ticket lifecycle.
//!
//! ```text
//! pendente --Confirm--> confirmado --Validate--> usado
//!                           |
//!                           +------Cancel-----> cancelado
//! ```
//!
//! `usado` and `cancelado` are terminal. Every other pairing of status and
//! transition is rejected with [`InvalidTransition`] and the ticket is left
//! as it was.

use crate::code::TicketCode;
use crate::error::ErrorKind;
use crate::types::{BuyerId, EventId, LotId, Money, Reservation, ReservationId, TicketId, ValidatorId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Where a ticket is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Minted, payment not yet confirmed
    Pendente,
    /// Paid and valid for entry
    Confirmado,
    /// Scanned at the gate
    Usado,
    /// Cancelled by the buyer
    Cancelado,
}

impl TicketStatus {
    /// Storage and wire representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pendente => "pendente",
            Self::Confirmado => "confirmado",
            Self::Usado => "usado",
            Self::Cancelado => "cancelado",
        }
    }

    /// No transition leaves this status
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Usado | Self::Cancelado)
    }

    /// The transition table.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for any pairing not drawn in the module
    /// diagram.
    pub const fn next(self, transition: &Transition) -> Result<Self, InvalidTransition> {
        match (self, transition) {
            (Self::Pendente, Transition::Confirm) => Ok(Self::Confirmado),
            (Self::Confirmado, Transition::Validate { .. }) => Ok(Self::Usado),
            (Self::Confirmado, Transition::Cancel) => Ok(Self::Cancelado),
            (
                Self::Pendente,
                Transition::Validate { .. } | Transition::Cancel,
            )
            | (Self::Confirmado, Transition::Confirm)
            | (Self::Usado | Self::Cancelado, _) => Err(InvalidTransition {
                from: self,
                transition: transition.name(),
            }),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pendente" => Ok(Self::Pendente),
            "confirmado" => Ok(Self::Confirmado),
            "usado" => Ok(Self::Usado),
            "cancelado" => Ok(Self::Cancelado),
            other => Err(format!("unknown ticket status '{other}'")),
        }
    }
}

/// Something that can happen to a ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Payment confirmed by the gateway
    Confirm,
    /// Accepted at the gate
    Validate {
        /// Who scanned it
        by: ValidatorId,
        /// When
        at: DateTime<Utc>,
    },
    /// Buyer gave the ticket back
    Cancel,
}

impl Transition {
    /// Short name used in errors and logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Validate { .. } => "validate",
            Self::Cancel => "cancel",
        }
    }
}

/// A transition the table does not allow.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot {transition} a ticket that is {from}")]
pub struct InvalidTransition {
    /// Status the ticket was in
    pub from: TicketStatus,
    /// Transition that was attempted
    pub transition: &'static str,
}

impl InvalidTransition {
    /// Always a conflict with current state
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Conflict
    }
}

/// An admission ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Unique ticket identifier
    pub id: TicketId,
    /// Lot the ticket was sold from
    pub lot_id: LotId,
    /// Event it admits to
    pub event_id: EventId,
    /// Reservation it was issued against
    pub reservation_id: ReservationId,
    /// Owner
    pub buyer_id: BuyerId,
    /// Gate code
    pub code: TicketCode,
    /// Lifecycle status
    pub status: TicketStatus,
    /// Unit price paid
    pub paid_amount: Money,
    /// Payment reference the ticket was issued for
    pub payment_ref: String,
    /// Mint time
    pub created_at: DateTime<Utc>,
    /// Set once, when the ticket is used
    pub validated_at: Option<DateTime<Utc>>,
    /// Set once, when the ticket is used
    pub validated_by: Option<ValidatorId>,
}

impl Ticket {
    /// Mints a `pendente` ticket for one unit of `reservation`.
    #[must_use]
    pub fn mint(
        reservation: &Reservation,
        code: TicketCode,
        paid_amount: Money,
        payment_ref: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TicketId::new(),
            lot_id: reservation.lot_id,
            event_id: reservation.event_id,
            reservation_id: reservation.id,
            buyer_id: reservation.buyer_id,
            code,
            status: TicketStatus::Pendente,
            paid_amount,
            payment_ref: payment_ref.into(),
            created_at: now,
            validated_at: None,
            validated_by: None,
        }
    }

    /// Returns the ticket as it would be after `transition`.
    ///
    /// `self` is untouched either way; callers persist the result with a
    /// compare-and-set against the old status.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] if the table forbids the move.
    pub fn apply(&self, transition: Transition) -> Result<Self, InvalidTransition> {
        let status = self.status.next(&transition)?;
        let mut next = self.clone();
        next.status = status;

        if let Transition::Validate { by, at } = transition {
            next.validated_by = Some(by);
            next.validated_at = Some(at);
        }

        Ok(next)
    }
}
