//! Domain types for the box office.
//!
//! Identifiers, the `Money` value object and the `Lot` / `Reservation`
//! entities. Tickets and their lifecycle live in [`crate::ticket`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an event (concert, party, festival)
    EventId
);
uuid_id!(
    /// Unique identifier for a lot (priced batch of tickets)
    LotId
);
uuid_id!(
    /// Unique identifier for a buyer, issued by the identity provider
    BuyerId
);
uuid_id!(
    /// Unique identifier for the gate-side actor validating tickets
    ValidatorId
);
uuid_id!(
    /// Unique identifier for a reservation
    ReservationId
);
uuid_id!(
    /// Unique identifier for a ticket
    TicketId
);

// ============================================================================
// Money Value Object (centavos, to avoid floating point errors)
// ============================================================================

/// Amount of Brazilian reais, stored in centavos.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from centavos
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in centavos
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Multiplies money by a quantity with overflow checking
    #[must_use]
    pub const fn checked_multiply(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Plain decimal rendering with two fraction digits (`"40.00"`).
    ///
    /// This is the form the PIX amount field expects.
    #[must_use]
    pub fn to_decimal_string(&self) -> String {
        format!("{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R$ {}", self.to_decimal_string())
    }
}

// ============================================================================
// Lot
// ============================================================================

/// A priced, quantity-limited batch of tickets with its own sale window.
///
/// `sold_qty` counts every unit claimed by a reservation that has not been
/// released or expired, so `total_qty - sold_qty` is what a buyer can still
/// reserve.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    /// Unique lot identifier
    pub id: LotId,
    /// Event this lot sells entry to
    pub event_id: EventId,
    /// Display name (e.g., "1º Lote", "Pista VIP")
    pub name: String,
    /// Unit price
    pub price: Money,
    /// Total units for sale
    pub total_qty: u32,
    /// Units already claimed
    pub sold_qty: u32,
    /// Sales open at this instant (inclusive)
    pub starts_at: DateTime<Utc>,
    /// Sales close at this instant (exclusive)
    pub ends_at: DateTime<Utc>,
}

impl Lot {
    /// Creates a new lot with nothing sold yet
    #[must_use]
    pub fn new(
        event_id: EventId,
        name: impl Into<String>,
        price: Money,
        total_qty: u32,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: LotId::new(),
            event_id,
            name: name.into(),
            price,
            total_qty,
            sold_qty: 0,
            starts_at,
            ends_at,
        }
    }

    /// Units still available for reservation
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.total_qty.saturating_sub(self.sold_qty)
    }

    /// Whether `now` falls inside `[starts_at, ends_at)`
    #[must_use]
    pub fn is_on_sale(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now && now < self.ends_at
    }
}

// ============================================================================
// Reservation
// ============================================================================

/// Reservation lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Units are claimed, waiting for payment
    Held,
    /// Payment approved and tickets minted
    Issued,
    /// Payment failed, units returned to the lot
    Released,
    /// Nobody paid in time, units returned to the lot
    Expired,
}

impl ReservationStatus {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Held => "held",
            Self::Issued => "issued",
            Self::Released => "released",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "held" => Ok(Self::Held),
            "issued" => Ok(Self::Issued),
            "released" => Ok(Self::Released),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown reservation status '{other}'")),
        }
    }
}

/// A claim against a lot's remaining inventory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Unique reservation identifier
    pub id: ReservationId,
    /// Lot the units were taken from
    pub lot_id: LotId,
    /// Event of that lot
    pub event_id: EventId,
    /// Buyer holding the claim
    pub buyer_id: BuyerId,
    /// Number of units claimed
    pub qty: u32,
    /// Amount due (`price * qty`)
    pub amount: Money,
    /// Current status
    pub status: ReservationStatus,
    /// Payment reference the tickets were issued against
    pub payment_ref: Option<String>,
    /// When the claim was made
    pub created_at: DateTime<Utc>,
    /// When an unpaid claim lapses
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Creates a new held reservation
    #[must_use]
    pub fn new(
        lot: &Lot,
        buyer_id: BuyerId,
        qty: u32,
        amount: Money,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            lot_id: lot.id,
            event_id: lot.event_id,
            buyer_id,
            qty,
            amount,
            status: ReservationStatus::Held,
            payment_ref: None,
            created_at,
            expires_at,
        }
    }

    /// PIX transaction id for this reservation.
    ///
    /// The UUID as 32 hex digits, cut to the 25 characters a BR Code txid
    /// may carry.
    #[must_use]
    pub fn txid(&self) -> String {
        let mut simple = self.id.as_uuid().simple().to_string();
        simple.truncate(25);
        simple.to_uppercase()
    }
}
