//! Row <-> domain mapping.

use bilheteria_core::code::TicketCode;
use bilheteria_core::store::StoreResult;
use bilheteria_core::types::{BuyerId, EventId, LotId, Money, ReservationId, TicketId, ValidatorId};
use bilheteria_core::{Lot, Reservation, StoreError, Ticket};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row};
use uuid::Uuid;

pub(crate) fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Reads one column, reporting decode failures as corrupt rows.
pub(crate) fn column<'r, T>(row: &'r PgRow, name: &str) -> StoreResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| StoreError::Corrupt(format!("{name}: {e}")))
}

pub(crate) fn to_i64(value: u64, what: &str) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::Corrupt(format!("{what} out of range: {value}")))
}

fn count(row: &PgRow, name: &str) -> StoreResult<u32> {
    let value: i64 = column(row, name)?;
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{name} out of range: {value}")))
}

fn cents(row: &PgRow, name: &str) -> StoreResult<Money> {
    let value: i64 = column(row, name)?;
    u64::try_from(value)
        .map(Money::from_cents)
        .map_err(|_| StoreError::Corrupt(format!("{name} is negative: {value}")))
}

pub(crate) fn lot_from_row(row: &PgRow) -> StoreResult<Lot> {
    Ok(Lot {
        id: LotId::from_uuid(column(row, "id")?),
        event_id: EventId::from_uuid(column(row, "event_id")?),
        name: column(row, "name")?,
        price: cents(row, "price_cents")?,
        total_qty: count(row, "total_qty")?,
        sold_qty: count(row, "sold_qty")?,
        starts_at: column(row, "starts_at")?,
        ends_at: column(row, "ends_at")?,
    })
}

pub(crate) fn reservation_from_row(row: &PgRow) -> StoreResult<Reservation> {
    let status: String = column(row, "status")?;

    Ok(Reservation {
        id: ReservationId::from_uuid(column(row, "id")?),
        lot_id: LotId::from_uuid(column(row, "lot_id")?),
        event_id: EventId::from_uuid(column(row, "event_id")?),
        buyer_id: BuyerId::from_uuid(column(row, "buyer_id")?),
        qty: count(row, "qty")?,
        amount: cents(row, "amount_cents")?,
        status: status.parse().map_err(StoreError::Corrupt)?,
        payment_ref: column(row, "payment_ref")?,
        created_at: column(row, "created_at")?,
        expires_at: column(row, "expires_at")?,
    })
}

pub(crate) fn ticket_from_row(row: &PgRow) -> StoreResult<Ticket> {
    let code: String = column(row, "code")?;
    let status: String = column(row, "status")?;
    let validated_at: Option<DateTime<Utc>> = column(row, "validated_at")?;
    let validated_by: Option<Uuid> = column(row, "validated_by")?;

    Ok(Ticket {
        id: TicketId::from_uuid(column(row, "id")?),
        lot_id: LotId::from_uuid(column(row, "lot_id")?),
        event_id: EventId::from_uuid(column(row, "event_id")?),
        reservation_id: ReservationId::from_uuid(column(row, "reservation_id")?),
        buyer_id: BuyerId::from_uuid(column(row, "buyer_id")?),
        code: TicketCode::parse(&code).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        status: status.parse().map_err(StoreError::Corrupt)?,
        paid_amount: cents(row, "paid_amount_cents")?,
        payment_ref: column(row, "payment_ref")?,
        created_at: column(row, "created_at")?,
        validated_at,
        validated_by: validated_by.map(ValidatorId::from_uuid),
    })
}
