//! In-memory store for tests and local development.
//!
//! All tables sit behind one mutex so each trait method is a single critical
//! section. The guard is never held across an `.await`.

use crate::code::TicketCode;
use crate::error::StoreError;
use crate::store::{
    IssueOutcome, LotStore, ReservationStore, ReserveOutcome, Store, StoreResult, TicketStore,
    TransitionOutcome,
};
use crate::ticket::{Ticket, TicketStatus};
use crate::types::{BuyerId, EventId, Lot, LotId, Reservation, ReservationId, ReservationStatus, TicketId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    lots: HashMap<LotId, Lot>,
    reservations: HashMap<ReservationId, Reservation>,
    tickets: HashMap<TicketId, Ticket>,
    codes: HashMap<TicketCode, TicketId>,
    payment_refs: HashMap<String, ReservationId>,
}

impl Tables {
    fn give_back(&mut self, lot_id: LotId, qty: u32) -> Option<&Lot> {
        let lot = self.lots.get_mut(&lot_id)?;
        lot.sold_qty = lot.sold_qty.saturating_sub(qty);
        Some(lot)
    }
}

/// Mutex-guarded hash maps implementing [`Store`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Matching tickets ordered by `(created_at, code)`, as the SQL store does.
    fn tickets_where(&self, keep: impl Fn(&Ticket) -> bool) -> StoreResult<Vec<Ticket>> {
        let tables = self.tables()?;
        let mut tickets: Vec<Ticket> = tables.tickets.values().filter(|t| keep(t)).cloned().collect();
        tickets.sort_by(|a, b| (a.created_at, a.code.as_str()).cmp(&(b.created_at, b.code.as_str())));
        Ok(tickets)
    }

    /// Every ticket in the store (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Poisoned`] if a previous holder panicked.
    pub fn all_tickets(&self) -> StoreResult<Vec<Ticket>> {
        Ok(self.tables()?.tickets.values().cloned().collect())
    }
}

#[async_trait]
impl LotStore for InMemoryStore {
    async fn get_lot(&self, id: LotId) -> StoreResult<Option<Lot>> {
        Ok(self.tables()?.lots.get(&id).cloned())
    }

    async fn insert_lot(&self, lot: &Lot) -> StoreResult<()> {
        self.tables()?.lots.insert(lot.id, lot.clone());
        Ok(())
    }

    async fn reserve(&self, reservation: &Reservation, now: DateTime<Utc>) -> StoreResult<ReserveOutcome> {
        let mut tables = self.tables()?;

        let Some(lot) = tables.lots.get_mut(&reservation.lot_id) else {
            return Ok(ReserveOutcome::LotNotFound);
        };
        if !lot.is_on_sale(now) {
            return Ok(ReserveOutcome::WindowClosed);
        }
        let available = lot.available();
        if available < reservation.qty {
            return Ok(ReserveOutcome::Insufficient { available });
        }

        lot.sold_qty += reservation.qty;
        tables
            .reservations
            .insert(reservation.id, reservation.clone());

        Ok(ReserveOutcome::Reserved(reservation.clone()))
    }

    async fn release(&self, lot_id: LotId, qty: u32) -> StoreResult<Option<Lot>> {
        Ok(self.tables()?.give_back(lot_id, qty).cloned())
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn get_reservation(&self, id: ReservationId) -> StoreResult<Option<Reservation>> {
        Ok(self.tables()?.reservations.get(&id).cloned())
    }

    async fn release_reservation(&self, id: ReservationId) -> StoreResult<bool> {
        let mut tables = self.tables()?;

        let Some(reservation) = tables.reservations.get_mut(&id) else {
            return Ok(false);
        };
        if reservation.status != ReservationStatus::Held {
            return Ok(false);
        }
        reservation.status = ReservationStatus::Released;
        let (lot_id, qty) = (reservation.lot_id, reservation.qty);

        tables.give_back(lot_id, qty);
        Ok(true)
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> StoreResult<Vec<Reservation>> {
        let mut tables = self.tables()?;

        let mut expired = Vec::new();
        for reservation in tables.reservations.values_mut() {
            if reservation.status == ReservationStatus::Held && reservation.expires_at <= now {
                reservation.status = ReservationStatus::Expired;
                expired.push(reservation.clone());
            }
        }
        for reservation in &expired {
            tables.give_back(reservation.lot_id, reservation.qty);
        }

        Ok(expired)
    }
}

#[async_trait]
impl TicketStore for InMemoryStore {
    async fn tickets_by_payment_ref(&self, payment_ref: &str) -> StoreResult<Vec<Ticket>> {
        self.tickets_where(|t| t.payment_ref == payment_ref)
    }

    async fn issue_tickets(
        &self,
        reservation_id: ReservationId,
        payment_ref: &str,
        tickets: &[Ticket],
    ) -> StoreResult<IssueOutcome> {
        let mut tables = self.tables()?;

        let held = tables
            .reservations
            .get(&reservation_id)
            .is_some_and(|r| r.status == ReservationStatus::Held);
        if !held {
            return Ok(IssueOutcome::NotHeld);
        }
        if tables.payment_refs.contains_key(payment_ref) {
            return Ok(IssueOutcome::PaymentRefInUse);
        }

        let mut batch = HashSet::new();
        for ticket in tickets {
            if tables.codes.contains_key(&ticket.code) || !batch.insert(&ticket.code) {
                return Ok(IssueOutcome::CodeCollision(ticket.code.clone()));
            }
        }

        for ticket in tickets {
            tables.codes.insert(ticket.code.clone(), ticket.id);
            tables.tickets.insert(ticket.id, ticket.clone());
        }
        tables
            .payment_refs
            .insert(payment_ref.to_string(), reservation_id);
        if let Some(reservation) = tables.reservations.get_mut(&reservation_id) {
            reservation.status = ReservationStatus::Issued;
            reservation.payment_ref = Some(payment_ref.to_string());
        }

        Ok(IssueOutcome::Issued)
    }

    async fn get_ticket(&self, id: TicketId) -> StoreResult<Option<Ticket>> {
        Ok(self.tables()?.tickets.get(&id).cloned())
    }

    async fn find_by_code(&self, code: &TicketCode, event_id: EventId) -> StoreResult<Option<Ticket>> {
        let tables = self.tables()?;
        Ok(tables
            .codes
            .get(code)
            .and_then(|id| tables.tickets.get(id))
            .filter(|t| t.event_id == event_id)
            .cloned())
    }

    async fn tickets_by_buyer(&self, buyer_id: BuyerId) -> StoreResult<Vec<Ticket>> {
        self.tickets_where(|t| t.buyer_id == buyer_id)
    }

    async fn tickets_by_event(&self, event_id: EventId) -> StoreResult<Vec<Ticket>> {
        self.tickets_where(|t| t.event_id == event_id)
    }

    async fn transition(&self, expected: TicketStatus, updated: &Ticket) -> StoreResult<TransitionOutcome> {
        let mut tables = self.tables()?;

        let Some(current) = tables.tickets.get_mut(&updated.id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if current.status != expected {
            return Ok(TransitionOutcome::Stale(current.clone()));
        }

        *current = updated.clone();
        Ok(TransitionOutcome::Applied(updated.clone()))
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.tables().map(|_| ())
    }
}
