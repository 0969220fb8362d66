//! `PostgreSQL` store for the bilheteria box office.
//!
//! Implements the [`Store`] traits from `bilheteria-core` on top of sqlx.
//! Every state change is a conditional `UPDATE … WHERE … RETURNING` inside a
//! transaction, so the row itself arbitrates races:
//!
//! - reserve: `sold_qty + qty <= total_qty` and the sale window are part of
//!   the `WHERE` clause; the reservation row is inserted in the same
//!   transaction
//! - issuance: the reservation flips `held -> issued` and the tickets are
//!   inserted together; unique violations on `tickets_code_key` and
//!   `reservations_payment_ref_key` come back as [`IssueOutcome`] variants
//! - ticket transitions: compare-and-set on the stored status
//!
//! # Example
//!
//! ```ignore
//! use bilheteria_postgres::{PoolSettings, PostgresStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresStore::connect("postgres://localhost/bilheteria", &PoolSettings::default()).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

mod rows;

use async_trait::async_trait;
use bilheteria_core::code::TicketCode;
use bilheteria_core::store::{
    IssueOutcome, LotStore, ReservationStore, ReserveOutcome, Store, StoreResult, TicketStore,
    TransitionOutcome,
};
use bilheteria_core::ticket::{Ticket, TicketStatus};
use bilheteria_core::types::{
    BuyerId, EventId, Lot, LotId, Reservation, ReservationId, ReservationStatus, TicketId,
};
use bilheteria_core::StoreError;
use chrono::{DateTime, Utc};
use rows::{backend, column, lot_from_row, reservation_from_row, ticket_from_row, to_i64};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use uuid::Uuid;

/// Unique constraint on `tickets.code`
pub const CODE_CONSTRAINT: &str = "tickets_code_key";

/// Unique constraint on `reservations.payment_ref`
pub const PAYMENT_REF_CONSTRAINT: &str = "reservations_payment_ref_key";

macro_rules! lot_columns {
    () => {
        "id, event_id, name, price_cents, total_qty, sold_qty, starts_at, ends_at"
    };
}

macro_rules! reservation_columns {
    () => {
        "id, lot_id, event_id, buyer_id, qty, amount_cents, status, payment_ref, created_at, expires_at"
    };
}

macro_rules! ticket_columns {
    () => {
        "id, lot_id, event_id, reservation_id, buyer_id, code, status, paid_amount_cents, \
         payment_ref, created_at, validated_at, validated_by"
    };
}

/// Connection pool sizing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections kept open
    pub min_connections: u32,
    /// How long to wait for a free connection
    pub connect_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// [`Store`] backed by `PostgreSQL`.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Opens a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the database cannot be reached.
    pub async fn connect(database_url: &str, settings: &PoolSettings) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect: {e}")))?;

        Ok(Self::from_pool(pool))
    }

    /// Wraps an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the bundled migrations (`lots`, `reservations`, `tickets`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if a migration fails.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// True if `err` is a unique violation of `constraint`.
fn violates(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation() && db.constraint() == Some(constraint),
        _ => false,
    }
}

#[async_trait]
impl LotStore for PostgresStore {
    async fn get_lot(&self, id: LotId) -> StoreResult<Option<Lot>> {
        sqlx::query(concat!("SELECT ", lot_columns!(), " FROM lots WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(lot_from_row)
            .transpose()
    }

    async fn insert_lot(&self, lot: &Lot) -> StoreResult<()> {
        sqlx::query(concat!(
            "INSERT INTO lots (",
            lot_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(*lot.id.as_uuid())
        .bind(*lot.event_id.as_uuid())
        .bind(&lot.name)
        .bind(to_i64(lot.price.cents(), "price")?)
        .bind(i64::from(lot.total_qty))
        .bind(i64::from(lot.sold_qty))
        .bind(lot.starts_at)
        .bind(lot.ends_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn reserve(&self, reservation: &Reservation, now: DateTime<Utc>) -> StoreResult<ReserveOutcome> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let claimed = sqlx::query(
            "UPDATE lots SET sold_qty = sold_qty + $2 \
             WHERE id = $1 AND sold_qty + $2 <= total_qty AND starts_at <= $3 AND $3 < ends_at",
        )
        .bind(*reservation.lot_id.as_uuid())
        .bind(i64::from(reservation.qty))
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(backend)?
        .rows_affected();

        if claimed == 0 {
            tx.rollback().await.map_err(backend)?;
            // Diagnosis only; the refusal itself was decided by the UPDATE above.
            return Ok(match self.get_lot(reservation.lot_id).await? {
                None => ReserveOutcome::LotNotFound,
                Some(lot) if !lot.is_on_sale(now) => ReserveOutcome::WindowClosed,
                Some(lot) => ReserveOutcome::Insufficient {
                    available: lot.available(),
                },
            });
        }

        sqlx::query(concat!(
            "INSERT INTO reservations (",
            reservation_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(*reservation.id.as_uuid())
        .bind(*reservation.lot_id.as_uuid())
        .bind(*reservation.event_id.as_uuid())
        .bind(*reservation.buyer_id.as_uuid())
        .bind(i64::from(reservation.qty))
        .bind(to_i64(reservation.amount.cents(), "amount")?)
        .bind(reservation.status.as_str())
        .bind(reservation.payment_ref.as_deref())
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(ReserveOutcome::Reserved(reservation.clone()))
    }

    async fn release(&self, lot_id: LotId, qty: u32) -> StoreResult<Option<Lot>> {
        sqlx::query(concat!(
            "UPDATE lots SET sold_qty = GREATEST(sold_qty - $2, 0) WHERE id = $1 RETURNING ",
            lot_columns!()
        ))
        .bind(*lot_id.as_uuid())
        .bind(i64::from(qty))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .as_ref()
        .map(lot_from_row)
        .transpose()
    }
}

#[async_trait]
impl ReservationStore for PostgresStore {
    async fn get_reservation(&self, id: ReservationId) -> StoreResult<Option<Reservation>> {
        sqlx::query(concat!("SELECT ", reservation_columns!(), " FROM reservations WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(reservation_from_row)
            .transpose()
    }

    async fn release_reservation(&self, id: ReservationId) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let row = sqlx::query("UPDATE reservations SET status = $2 WHERE id = $1 AND status = $3 RETURNING lot_id, qty")
            .bind(*id.as_uuid())
            .bind(ReservationStatus::Released.as_str())
            .bind(ReservationStatus::Held.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?;

        let Some(row) = row else {
            return Ok(false);
        };
        let lot_id: Uuid = column(&row, "lot_id")?;
        let qty: i64 = column(&row, "qty")?;

        sqlx::query("UPDATE lots SET sold_qty = GREATEST(sold_qty - $2, 0) WHERE id = $1")
            .bind(lot_id)
            .bind(qty)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(true)
    }

    async fn expire_stale(&self, now: DateTime<Utc>) -> StoreResult<Vec<Reservation>> {
        // Data-modifying CTEs run even though `released` is never selected.
        let rows = sqlx::query(concat!(
            "WITH expired AS (\
                UPDATE reservations SET status = $2 \
                WHERE status = $3 AND expires_at <= $1 \
                RETURNING ",
            reservation_columns!(),
            "), totals AS (\
                SELECT lot_id, SUM(qty)::BIGINT AS qty FROM expired GROUP BY lot_id\
             ), released AS (\
                UPDATE lots SET sold_qty = GREATEST(lots.sold_qty - totals.qty, 0) \
                FROM totals WHERE lots.id = totals.lot_id\
             ) \
             SELECT ",
            reservation_columns!(),
            " FROM expired"
        ))
        .bind(now)
        .bind(ReservationStatus::Expired.as_str())
        .bind(ReservationStatus::Held.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(reservation_from_row).collect()
    }
}

#[async_trait]
impl TicketStore for PostgresStore {
    async fn tickets_by_payment_ref(&self, payment_ref: &str) -> StoreResult<Vec<Ticket>> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            ticket_columns!(),
            " FROM tickets WHERE payment_ref = $1 ORDER BY created_at, code"
        ))
        .bind(payment_ref)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(ticket_from_row).collect()
    }

    async fn issue_tickets(
        &self,
        reservation_id: ReservationId,
        payment_ref: &str,
        tickets: &[Ticket],
    ) -> StoreResult<IssueOutcome> {
        // Every early return drops `tx`, which rolls it back.
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let flipped = sqlx::query("UPDATE reservations SET status = $2, payment_ref = $3 WHERE id = $1 AND status = $4")
            .bind(*reservation_id.as_uuid())
            .bind(ReservationStatus::Issued.as_str())
            .bind(payment_ref)
            .bind(ReservationStatus::Held.as_str())
            .execute(&mut *tx)
            .await;

        match flipped {
            Ok(done) if done.rows_affected() == 0 => return Ok(IssueOutcome::NotHeld),
            Ok(_) => {}
            Err(err) if violates(&err, PAYMENT_REF_CONSTRAINT) => {
                tracing::debug!(reservation_id = %reservation_id, payment_ref, "Payment reference already bound");
                return Ok(IssueOutcome::PaymentRefInUse);
            }
            Err(err) => return Err(backend(err)),
        }

        for ticket in tickets {
            let inserted = sqlx::query(concat!(
                "INSERT INTO tickets (",
                ticket_columns!(),
                ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
            ))
            .bind(*ticket.id.as_uuid())
            .bind(*ticket.lot_id.as_uuid())
            .bind(*ticket.event_id.as_uuid())
            .bind(*ticket.reservation_id.as_uuid())
            .bind(*ticket.buyer_id.as_uuid())
            .bind(ticket.code.as_str())
            .bind(ticket.status.as_str())
            .bind(to_i64(ticket.paid_amount.cents(), "paid amount")?)
            .bind(&ticket.payment_ref)
            .bind(ticket.created_at)
            .bind(ticket.validated_at)
            .bind(ticket.validated_by.map(|v| *v.as_uuid()))
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                Err(err) if violates(&err, CODE_CONSTRAINT) => {
                    metrics::counter!("bilheteria_code_collisions_total").increment(1);
                    return Ok(IssueOutcome::CodeCollision(ticket.code.clone()));
                }
                Err(err) => return Err(backend(err)),
            }
        }

        tx.commit().await.map_err(backend)?;
        Ok(IssueOutcome::Issued)
    }

    async fn get_ticket(&self, id: TicketId) -> StoreResult<Option<Ticket>> {
        sqlx::query(concat!("SELECT ", ticket_columns!(), " FROM tickets WHERE id = $1"))
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .as_ref()
            .map(ticket_from_row)
            .transpose()
    }

    async fn find_by_code(&self, code: &TicketCode, event_id: EventId) -> StoreResult<Option<Ticket>> {
        sqlx::query(concat!(
            "SELECT ",
            ticket_columns!(),
            " FROM tickets WHERE code = $1 AND event_id = $2"
        ))
        .bind(code.as_str())
        .bind(*event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .as_ref()
        .map(ticket_from_row)
        .transpose()
    }

    async fn tickets_by_buyer(&self, buyer_id: BuyerId) -> StoreResult<Vec<Ticket>> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            ticket_columns!(),
            " FROM tickets WHERE buyer_id = $1 ORDER BY created_at, code"
        ))
        .bind(*buyer_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(ticket_from_row).collect()
    }

    async fn tickets_by_event(&self, event_id: EventId) -> StoreResult<Vec<Ticket>> {
        let rows = sqlx::query(concat!(
            "SELECT ",
            ticket_columns!(),
            " FROM tickets WHERE event_id = $1 ORDER BY created_at, code"
        ))
        .bind(*event_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(ticket_from_row).collect()
    }

    async fn transition(&self, expected: TicketStatus, updated: &Ticket) -> StoreResult<TransitionOutcome> {
        let row = sqlx::query(concat!(
            "UPDATE tickets SET status = $3, validated_at = $4, validated_by = $5 \
             WHERE id = $1 AND status = $2 RETURNING ",
            ticket_columns!()
        ))
        .bind(*updated.id.as_uuid())
        .bind(expected.as_str())
        .bind(updated.status.as_str())
        .bind(updated.validated_at)
        .bind(updated.validated_by.map(|v| *v.as_uuid()))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        if let Some(row) = row {
            return Ok(TransitionOutcome::Applied(ticket_from_row(&row)?));
        }

        Ok(match self.get_ticket(updated.id).await? {
            Some(current) => TransitionOutcome::Stale(current),
            None => TransitionOutcome::NotFound,
        })
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.map_err(backend)?;
        Ok(())
    }
}
