//! Read-only ticket listings: a buyer's wallet and an event's attendance.

use crate::error::StoreError;
use crate::store::Store;
use crate::ticket::{Ticket, TicketStatus};
use crate::types::{BuyerId, EventId};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Every ticket issued for an event plus its door counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EventRoster {
    /// Event
    pub event_id: EventId,
    /// Tickets issued, any status
    pub total: usize,
    /// Tickets already scanned at the gate
    pub used: usize,
    /// Tickets cancelled after issuance
    pub cancelled: usize,
    /// Distinct buyers holding tickets
    pub buyers: usize,
    /// The tickets, oldest first
    pub tickets: Vec<Ticket>,
}

impl EventRoster {
    /// Tallies `tickets`, all of which belong to `event_id`.
    #[must_use]
    pub fn new(event_id: EventId, tickets: Vec<Ticket>) -> Self {
        let count = |status: TicketStatus| tickets.iter().filter(|t| t.status == status).count();
        let used = count(TicketStatus::Usado);
        let cancelled = count(TicketStatus::Cancelado);
        let buyers = tickets.iter().map(|t| t.buyer_id).collect::<HashSet<_>>().len();

        Self {
            event_id,
            total: tickets.len(),
            used,
            cancelled,
            buyers,
            tickets,
        }
    }
}

/// Lists tickets without changing anything.
#[derive(Clone)]
pub struct TicketRoster {
    store: Arc<dyn Store>,
}

impl TicketRoster {
    /// Creates the service
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Tickets held by `buyer_id`, across events. An unknown buyer simply
    /// has none.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    pub async fn for_buyer(&self, buyer_id: BuyerId) -> Result<Vec<Ticket>, StoreError> {
        self.store.tickets_by_buyer(buyer_id).await
    }

    /// Attendance of `event_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend fails.
    pub async fn for_event(&self, event_id: EventId) -> Result<EventRoster, StoreError> {
        let tickets = self.store.tickets_by_event(event_id).await?;
        Ok(EventRoster::new(event_id, tickets))
    }
}
