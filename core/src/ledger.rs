//! Inventory ledger.
//!
//! Owns the per-lot counters. A reserve is one atomic store call that checks
//! the sale window and remaining stock, bumps `sold_qty` and records the
//! reservation; two concurrent reserves can never both win the last units.

use crate::environment::Clock;
use crate::error::{ErrorKind, StoreError};
use crate::store::{ReserveOutcome, Store};
use crate::types::{BuyerId, EventId, Lot, LotId, Money, Reservation, ReservationId};
use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Default cap on units per reservation
pub const DEFAULT_MAX_TICKETS_PER_ORDER: u32 = 10;

/// Default lifetime of an unpaid reservation, in minutes
pub const DEFAULT_RESERVATION_TTL_MINUTES: i64 = 15;

/// Tunables for the ledger.
#[derive(Clone, Copy, Debug)]
pub struct LedgerSettings {
    /// Largest `qty` a single reserve accepts
    pub max_tickets_per_order: u32,
    /// How long a held reservation waits for payment
    pub reservation_ttl: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            max_tickets_per_order: DEFAULT_MAX_TICKETS_PER_ORDER,
            reservation_ttl: Duration::minutes(DEFAULT_RESERVATION_TTL_MINUTES),
        }
    }
}

/// Why a reserve did not go through.
#[derive(Error, Debug)]
pub enum ReserveError {
    /// Fewer units left than requested
    #[error("only {available} units left, {requested} requested")]
    Insufficient {
        /// Units asked for
        requested: u32,
        /// Units left at the time of the attempt
        available: u32,
    },

    /// Unknown lot
    #[error("lot {0} not found")]
    NotFound(LotId),

    /// Outside `[starts_at, ends_at)`
    #[error("lot {0} is not on sale")]
    WindowClosed(LotId),

    /// Zero, or more than the per-order cap
    #[error("quantity {requested} is outside 1..={max}")]
    InvalidQuantity {
        /// Units asked for
        requested: u32,
        /// Per-order cap
        max: u32,
    },

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReserveError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Insufficient { .. } | Self::WindowClosed(_) => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidQuantity { .. } => ErrorKind::Validation,
            Self::Store(err) => err.kind(),
        }
    }
}

/// Failure of the non-reserve ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Unknown lot
    #[error("lot {0} not found")]
    NotFound(LotId),

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Store(err) => err.kind(),
        }
    }
}

/// Read-only view of a lot's counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Availability {
    /// Lot
    pub lot_id: LotId,
    /// Event
    pub event_id: EventId,
    /// Display name
    pub name: String,
    /// Unit price in centavos
    pub price: Money,
    /// Units for sale
    pub total: u32,
    /// Units claimed
    pub sold: u32,
    /// Units left
    pub available: u32,
    /// Whether the sale window is open right now
    pub on_sale: bool,
}

/// Reserve and release units of a lot.
#[derive(Clone)]
pub struct InventoryLedger {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    settings: LedgerSettings,
}

impl InventoryLedger {
    /// Creates a ledger over `store`
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, settings: LedgerSettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    /// The settings this ledger was built with
    #[must_use]
    pub const fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Claims `qty` units of `lot_id` for `buyer_id`.
    ///
    /// # Errors
    ///
    /// See [`ReserveError`]. Nothing is changed unless `Ok` is returned.
    pub async fn reserve(&self, lot_id: LotId, buyer_id: BuyerId, qty: u32) -> Result<Reservation, ReserveError> {
        let max = self.settings.max_tickets_per_order;
        if qty == 0 || qty > max {
            return Err(ReserveError::InvalidQuantity { requested: qty, max });
        }

        // Price never changes, so reading it outside the atomic step is safe.
        let lot = self
            .store
            .get_lot(lot_id)
            .await?
            .ok_or(ReserveError::NotFound(lot_id))?;
        let amount = lot
            .price
            .checked_multiply(qty)
            .ok_or(ReserveError::InvalidQuantity { requested: qty, max })?;

        let now = self.clock.now();
        let candidate = Reservation::new(&lot, buyer_id, qty, amount, now, now + self.settings.reservation_ttl);

        match self.store.reserve(&candidate, now).await? {
            ReserveOutcome::Reserved(reservation) => {
                tracing::info!(
                    lot_id = %lot_id,
                    reservation_id = %reservation.id,
                    buyer_id = %buyer_id,
                    qty,
                    amount = amount.cents(),
                    "Units reserved"
                );
                Ok(reservation)
            }
            ReserveOutcome::Insufficient { available } => {
                tracing::debug!(lot_id = %lot_id, requested = qty, available, "Reserve rejected: insufficient");
                Err(ReserveError::Insufficient {
                    requested: qty,
                    available,
                })
            }
            ReserveOutcome::WindowClosed => {
                tracing::debug!(lot_id = %lot_id, "Reserve rejected: sale window closed");
                Err(ReserveError::WindowClosed(lot_id))
            }
            ReserveOutcome::LotNotFound => Err(ReserveError::NotFound(lot_id)),
        }
    }

    /// Gives `qty` units back to `lot_id`, clamped at zero sold.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] for an unknown lot.
    pub async fn release(&self, lot_id: LotId, qty: u32) -> Result<Lot, LedgerError> {
        let lot = self
            .store
            .release(lot_id, qty)
            .await?
            .ok_or(LedgerError::NotFound(lot_id))?;

        tracing::info!(lot_id = %lot_id, qty, sold = lot.sold_qty, "Units released");
        Ok(lot)
    }

    /// Releases a `held` reservation. Returns `false` if it was not held.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] if the backend fails.
    pub async fn release_reservation(&self, reservation_id: ReservationId) -> Result<bool, LedgerError> {
        let released = self.store.release_reservation(reservation_id).await?;
        if released {
            tracing::info!(reservation_id = %reservation_id, "Reservation released");
        } else {
            tracing::debug!(reservation_id = %reservation_id, "Reservation not held, nothing to release");
        }
        Ok(released)
    }

    /// Expires every held reservation past its deadline. Returns how many.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Store`] if the backend fails.
    pub async fn expire_stale(&self) -> Result<usize, LedgerError> {
        let expired = self.store.expire_stale(self.clock.now()).await?;
        for reservation in &expired {
            tracing::info!(
                reservation_id = %reservation.id,
                lot_id = %reservation.lot_id,
                qty = reservation.qty,
                "Reservation expired"
            );
        }
        Ok(expired.len())
    }

    /// Snapshot of a lot's counters.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] for an unknown lot.
    pub async fn availability(&self, lot_id: LotId) -> Result<Availability, LedgerError> {
        let lot = self
            .store
            .get_lot(lot_id)
            .await?
            .ok_or(LedgerError::NotFound(lot_id))?;

        Ok(Availability {
            lot_id,
            event_id: lot.event_id,
            on_sale: lot.is_on_sale(self.clock.now()),
            available: lot.available(),
            total: lot.total_qty,
            sold: lot.sold_qty,
            price: lot.price,
            name: lot.name,
        })
    }
}
