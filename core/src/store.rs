//! Persistence boundary.
//!
//! Every method that changes state is one indivisible compare-and-update in
//! the backing store. Expected conflicts come back as outcome enums; only
//! backend failures are errors.

use crate::code::TicketCode;
use crate::error::StoreError;
use crate::ticket::{Ticket, TicketStatus};
use crate::types::{BuyerId, EventId, Lot, LotId, Reservation, ReservationId, TicketId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result of an atomic reserve.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Units claimed and reservation recorded
    Reserved(Reservation),
    /// Not enough units left; nothing changed
    Insufficient {
        /// Units still available when the claim was rejected
        available: u32,
    },
    /// `now` is outside the lot's sale window; nothing changed
    WindowClosed,
    /// No such lot
    LotNotFound,
}

/// Result of an atomic issuance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IssueOutcome {
    /// Tickets inserted and the reservation is now `issued`
    Issued,
    /// One of the candidate codes already exists; nothing changed
    CodeCollision(TicketCode),
    /// The payment reference is bound to another reservation; nothing changed
    PaymentRefInUse,
    /// The reservation is not `held` any more; nothing changed
    NotHeld,
}

/// Result of a ticket compare-and-set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Row matched the expected status and was replaced
    Applied(Ticket),
    /// Row had moved on; carries what is stored now
    Stale(Ticket),
    /// No such ticket
    NotFound,
}

/// Lots and their counters.
#[async_trait]
pub trait LotStore: Send + Sync {
    /// Loads a lot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn get_lot(&self, id: LotId) -> StoreResult<Option<Lot>>;

    /// Creates a lot. Lots come from event setup, outside this crate.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn insert_lot(&self, lot: &Lot) -> StoreResult<()>;

    /// Checks window and stock, bumps `sold_qty` and records `reservation`
    /// in one step.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn reserve(&self, reservation: &Reservation, now: DateTime<Utc>) -> StoreResult<ReserveOutcome>;

    /// Lowers `sold_qty` by `qty`, never below zero. Returns the lot after
    /// the change, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn release(&self, lot_id: LotId, qty: u32) -> StoreResult<Option<Lot>>;
}

/// Reservations and their expiry.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Loads a reservation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn get_reservation(&self, id: ReservationId) -> StoreResult<Option<Reservation>>;

    /// Moves a `held` reservation to `released` and gives its units back.
    /// Returns `false` (and changes nothing) for any other status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn release_reservation(&self, id: ReservationId) -> StoreResult<bool>;

    /// Moves every `held` reservation with `expires_at <= now` to `expired`
    /// and gives its units back. Returns the expired reservations.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn expire_stale(&self, now: DateTime<Utc>) -> StoreResult<Vec<Reservation>>;
}

/// Tickets.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Tickets already issued against a payment reference.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn tickets_by_payment_ref(&self, payment_ref: &str) -> StoreResult<Vec<Ticket>>;

    /// Inserts `tickets` and flips the reservation `held -> issued`, binding
    /// `payment_ref`, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn issue_tickets(
        &self,
        reservation_id: ReservationId,
        payment_ref: &str,
        tickets: &[Ticket],
    ) -> StoreResult<IssueOutcome>;

    /// Loads a ticket by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn get_ticket(&self, id: TicketId) -> StoreResult<Option<Ticket>>;

    /// Looks a code up, scoped to one event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn find_by_code(&self, code: &TicketCode, event_id: EventId) -> StoreResult<Option<Ticket>>;

    /// Every ticket a buyer holds, any status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn tickets_by_buyer(&self, buyer_id: BuyerId) -> StoreResult<Vec<Ticket>>;

    /// Every ticket issued for an event, any status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn tickets_by_event(&self, event_id: EventId) -> StoreResult<Vec<Ticket>>;

    /// Replaces the ticket with `updated` only if its stored status is still
    /// `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    async fn transition(&self, expected: TicketStatus, updated: &Ticket) -> StoreResult<TransitionOutcome>;
}

/// Everything the services need from persistence.
#[async_trait]
pub trait Store: LotStore + ReservationStore + TicketStore {
    /// Cheap round trip used by readiness checks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend is unreachable.
    async fn ping(&self) -> StoreResult<()>;
}
