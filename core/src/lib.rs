//! # Bilheteria Core
//!
//! Box office domain: sells finite lots of event tickets without ever
//! overselling, mints uniquely coded tickets that can be used exactly once at
//! the gate, and renders PIX BR Code payloads for payment.
//!
//! ## Components
//!
//! - **Inventory ledger** ([`ledger`]): per-lot counters with atomic
//!   reserve / release and reservation expiry
//! - **Ticket state machine** ([`ticket`]): closed status enum and its
//!   transition table
//! - **Ticket issuer** ([`issuer`]): mints tickets for a paid reservation,
//!   idempotent per payment reference
//! - **Validation** ([`validation`]): consumes a code at the gate
//! - **Cancellation** ([`cancellation`]): gives a ticket's unit back
//! - **PIX codec** ([`pix`]): BR Code encoder / decoder with CRC16
//! - **Payment gateway** ([`payment`]): processor boundary and a mock
//! - **Checkout** ([`checkout`]): reserve -> pay -> confirm orchestration
//! - **Roster** ([`roster`]): a buyer's tickets and an event's attendance
//!
//! ## Flow
//!
//! ```text
//! buyer ──reserve──▶ Ledger ──▶ Checkout.request_payment ──▶ Gateway + BR Code
//!                                      │
//!   buyer pays ──▶ Checkout.confirm ──▶ Gateway poll ──▶ Issuer ──▶ confirmado
//!
//! gate ──scan──▶ Validation ──CAS──▶ usado (exactly once)
//! ```
//!
//! Persistence sits behind the [`store::Store`] traits; [`memory`] provides an
//! in-process implementation for tests and development.

pub mod cancellation;
pub mod checkout;
pub mod code;
pub mod environment;
pub mod error;
pub mod issuer;
pub mod ledger;
pub mod memory;
pub mod payment;
pub mod pix;
pub mod roster;
pub mod store;
pub mod ticket;
pub mod types;
pub mod validation;

pub use error::{ErrorKind, StoreError};
pub use ticket::{Ticket, TicketStatus, Transition};
pub use types::{BuyerId, EventId, Lot, LotId, Money, Reservation, ReservationId, ReservationStatus, TicketId, ValidatorId};
