//! Ticket issuance.
//!
//! Turns a `held` reservation plus an approved payment into `qty` confirmed
//! tickets. Ticket rows and the `held -> issued` flip are one store call.
//! Re-running with the same payment reference returns what was minted the
//! first time.

use crate::code::CodeGenerator;
use crate::environment::Clock;
use crate::error::{ErrorKind, StoreError};
use crate::payment::{PaymentIntent, PaymentStatus};
use crate::store::{IssueOutcome, Store};
use crate::ticket::{InvalidTransition, Ticket, Transition};
use crate::types::{Money, Reservation, ReservationId, ReservationStatus};
use std::sync::Arc;
use thiserror::Error;

/// Default number of code batches tried before giving up
pub const DEFAULT_CODE_ATTEMPTS: u32 = 5;

/// Tickets handed back by [`TicketIssuer::issue`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Issuance {
    /// The reservation's tickets
    pub tickets: Vec<Ticket>,
    /// `true` when they already existed for this payment reference
    pub replayed: bool,
}

/// Why tickets were not issued.
#[derive(Error, Debug)]
pub enum IssueError {
    /// Unknown reservation
    #[error("reservation {0} not found")]
    ReservationNotFound(ReservationId),

    /// Reservation already released, expired or issued under another reference
    #[error("reservation {reservation_id} is {status}, not held")]
    NotHeld {
        /// Reservation
        reservation_id: ReservationId,
        /// Its current status
        status: ReservationStatus,
    },

    /// Payment has not reached `approved`
    #[error("payment is {0:?}, not approved")]
    PaymentNotApproved(PaymentStatus),

    /// Approved amount differs from what the reservation costs
    #[error("payment of {paid} does not cover reservation amount {expected}")]
    AmountMismatch {
        /// Reservation amount
        expected: Money,
        /// Amount the processor approved
        paid: Money,
    },

    /// The charge was opened for a different reservation
    #[error("payment {payment_ref} was not opened for reservation {reservation_id}")]
    ForeignPayment {
        /// Gateway reference
        payment_ref: String,
        /// Reservation it was presented for
        reservation_id: ReservationId,
    },

    /// The payment reference already paid for a different reservation
    #[error("payment {0} is bound to another reservation")]
    PaymentRefConflict(String),

    /// Every code batch collided
    #[error("could not draw unique ticket codes in {0} attempts")]
    CodesExhausted(u32),

    /// Freshly minted ticket refused to confirm
    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IssueError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ReservationNotFound(_) => ErrorKind::NotFound,
            Self::NotHeld { .. }
            | Self::PaymentNotApproved(_)
            | Self::ForeignPayment { .. }
            | Self::PaymentRefConflict(_) => ErrorKind::Conflict,
            Self::AmountMismatch { .. } => ErrorKind::Validation,
            Self::CodesExhausted(_) | Self::Transition(_) => ErrorKind::InvariantViolation,
            Self::Store(err) => err.kind(),
        }
    }
}

/// Mints tickets for paid reservations.
#[derive(Clone)]
pub struct TicketIssuer {
    store: Arc<dyn Store>,
    codes: Arc<dyn CodeGenerator>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl TicketIssuer {
    /// Creates an issuer. `max_attempts` is clamped to at least 1.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        codes: Arc<dyn CodeGenerator>,
        clock: Arc<dyn Clock>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            codes,
            clock,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Issues the reservation's tickets against `payment`.
    ///
    /// # Errors
    ///
    /// See [`IssueError`]. Nothing is written unless `Ok` is returned with
    /// `replayed == false`.
    pub async fn issue(&self, reservation_id: ReservationId, payment: &PaymentIntent) -> Result<Issuance, IssueError> {
        let payment_ref = payment.external_ref.as_str();

        if let Some(issuance) = self.replay(reservation_id, payment_ref).await? {
            return Ok(issuance);
        }
        if payment.status != PaymentStatus::Approved {
            return Err(IssueError::PaymentNotApproved(payment.status));
        }

        let reservation = self.held_reservation(reservation_id).await?;
        if !payment.is_for(&reservation.txid()) {
            tracing::warn!(reservation_id = %reservation_id, payment_ref, "Payment opened for another reservation");
            return Err(IssueError::ForeignPayment {
                payment_ref: payment_ref.to_string(),
                reservation_id,
            });
        }
        if payment.amount != reservation.amount {
            return Err(IssueError::AmountMismatch {
                expected: reservation.amount,
                paid: payment.amount,
            });
        }

        for attempt in 1..=self.max_attempts {
            let tickets = self.mint(&reservation, payment_ref)?;

            match self
                .store
                .issue_tickets(reservation_id, payment_ref, &tickets)
                .await?
            {
                IssueOutcome::Issued => {
                    tracing::info!(
                        reservation_id = %reservation_id,
                        payment_ref,
                        count = tickets.len(),
                        attempt,
                        "Tickets issued"
                    );
                    return Ok(Issuance {
                        tickets,
                        replayed: false,
                    });
                }
                IssueOutcome::CodeCollision(code) => {
                    tracing::warn!(reservation_id = %reservation_id, %code, attempt, "Ticket code collision, redrawing");
                }
                // Lost a race against a concurrent confirm; whoever won may
                // have used this very reference.
                IssueOutcome::PaymentRefInUse => {
                    return match self.replay(reservation_id, payment_ref).await? {
                        Some(issuance) => Ok(issuance),
                        None => Err(IssueError::PaymentRefConflict(payment_ref.to_string())),
                    };
                }
                IssueOutcome::NotHeld => {
                    if let Some(issuance) = self.replay(reservation_id, payment_ref).await? {
                        return Ok(issuance);
                    }
                    // Surfaces the status it moved to; if it reads as held
                    // again, go round once more.
                    self.held_reservation(reservation_id).await?;
                }
            }
        }

        tracing::error!(
            reservation_id = %reservation_id,
            attempts = self.max_attempts,
            "Exhausted ticket code attempts"
        );
        Err(IssueError::CodesExhausted(self.max_attempts))
    }

    async fn replay(&self, reservation_id: ReservationId, payment_ref: &str) -> Result<Option<Issuance>, IssueError> {
        let existing = self.store.tickets_by_payment_ref(payment_ref).await?;
        if existing.is_empty() {
            return Ok(None);
        }
        if existing.iter().any(|t| t.reservation_id != reservation_id) {
            tracing::debug!(reservation_id = %reservation_id, payment_ref, "Payment reference bound elsewhere");
            return Err(IssueError::PaymentRefConflict(payment_ref.to_string()));
        }

        tracing::debug!(reservation_id = %reservation_id, payment_ref, "Replaying issued tickets");
        Ok(Some(Issuance {
            tickets: existing,
            replayed: true,
        }))
    }

    async fn held_reservation(&self, reservation_id: ReservationId) -> Result<Reservation, IssueError> {
        let reservation = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or(IssueError::ReservationNotFound(reservation_id))?;

        if reservation.status != ReservationStatus::Held {
            return Err(IssueError::NotHeld {
                reservation_id,
                status: reservation.status,
            });
        }
        Ok(reservation)
    }

    fn mint(&self, reservation: &Reservation, payment_ref: &str) -> Result<Vec<Ticket>, InvalidTransition> {
        let now = self.clock.now();
        let unit_price = Money::from_cents(reservation.amount.cents() / u64::from(reservation.qty.max(1)));

        (0..reservation.qty)
            .map(|_| {
                Ticket::mint(reservation, self.codes.generate(), unit_price, payment_ref, now)
                    .apply(Transition::Confirm)
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::code::{RandomCodeGenerator, ScriptedCodeGenerator, TicketCode};
    use crate::environment::FixedClock;
    use crate::memory::InMemoryStore;
    use crate::store::{LotStore, ReservationStore};
    use crate::ticket::TicketStatus;
    use crate::types::{BuyerId, EventId, Lot};
    use chrono::{Duration, Utc};

    async fn held(store: &InMemoryStore, qty: u32) -> Reservation {
        let now = Utc::now();
        let lot = Lot::new(
            EventId::new(),
            "Pista",
            Money::from_cents(4000),
            100,
            now - Duration::hours(1),
            now + Duration::hours(1),
        );
        store.insert_lot(&lot).await.unwrap();
        let reservation = Reservation::new(
            &lot,
            BuyerId::new(),
            qty,
            Money::from_cents(4000 * u64::from(qty)),
            now,
            now + Duration::minutes(15),
        );
        store.reserve(&reservation, now).await.unwrap();
        reservation
    }

    fn approved(reference: &str, reservation: &Reservation) -> PaymentIntent {
        PaymentIntent {
            external_ref: reference.to_string(),
            amount: reservation.amount,
            description: "test".to_string(),
            status: PaymentStatus::Approved,
            reference: Some(reservation.txid()),
            qr_code: None,
            qr_code_base64: None,
        }
    }

    fn issuer(store: &Arc<InMemoryStore>, codes: Arc<dyn CodeGenerator>, attempts: u32) -> TicketIssuer {
        TicketIssuer::new(store.clone(), codes, Arc::new(FixedClock::new(Utc::now())), attempts)
    }

    #[tokio::test]
    async fn test_issues_confirmed_tickets() {
        let store = Arc::new(InMemoryStore::new());
        let reservation = held(&store, 3).await;
        let issuer = issuer(&store, Arc::new(RandomCodeGenerator), DEFAULT_CODE_ATTEMPTS);

        let issuance = issuer
            .issue(reservation.id, &approved("pay_1", &reservation))
            .await
            .unwrap();

        assert!(!issuance.replayed);
        assert_eq!(issuance.tickets.len(), 3);
        for ticket in &issuance.tickets {
            assert_eq!(ticket.status, TicketStatus::Confirmado);
            assert_eq!(ticket.paid_amount, Money::from_cents(4000));
            assert_eq!(ticket.payment_ref, "pay_1");
        }
        let stored = store.get_reservation(reservation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Issued);
        assert_eq!(stored.payment_ref.as_deref(), Some("pay_1"));
    }

    #[tokio::test]
    async fn test_same_reference_replays() {
        let store = Arc::new(InMemoryStore::new());
        let reservation = held(&store, 2).await;
        let issuer = issuer(&store, Arc::new(RandomCodeGenerator), DEFAULT_CODE_ATTEMPTS);
        let payment = approved("pay_1", &reservation);

        let first = issuer.issue(reservation.id, &payment).await.unwrap();
        let second = issuer.issue(reservation.id, &payment).await.unwrap();

        assert!(second.replayed);
        let mut a: Vec<_> = first.tickets.iter().map(|t| t.id).collect();
        let mut b: Vec<_> = second.tickets.iter().map(|t| t.id).collect();
        a.sort();
        b.sort();
        assert_eq!(a, b);
        assert_eq!(store.all_tickets().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reference_of_other_reservation_conflicts() {
        let store = Arc::new(InMemoryStore::new());
        let first = held(&store, 1).await;
        let second = held(&store, 1).await;
        let issuer = issuer(&store, Arc::new(RandomCodeGenerator), DEFAULT_CODE_ATTEMPTS);

        issuer.issue(first.id, &approved("pay_1", &first)).await.unwrap();
        let err = issuer
            .issue(second.id, &approved("pay_1", &second))
            .await
            .unwrap_err();

        assert!(matches!(err, IssueError::PaymentRefConflict(_)));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_charge_opened_for_another_reservation_is_refused() {
        let store = Arc::new(InMemoryStore::new());
        let paid = held(&store, 1).await;
        let other = held(&store, 1).await;
        let issuer = issuer(&store, Arc::new(RandomCodeGenerator), DEFAULT_CODE_ATTEMPTS);

        let err = issuer
            .issue(other.id, &approved("pay_1", &paid))
            .await
            .unwrap_err();
        assert!(matches!(err, IssueError::ForeignPayment { reservation_id, .. } if reservation_id == other.id));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(store.all_tickets().unwrap().is_empty());

        let mut unbound = approved("pay_2", &other);
        unbound.reference = None;
        let err = issuer.issue(other.id, &unbound).await.unwrap_err();
        assert!(matches!(err, IssueError::ForeignPayment { .. }));

        let issuance = issuer.issue(paid.id, &approved("pay_1", &paid)).await.unwrap();
        assert_eq!(issuance.tickets.len(), 1);
        let stored = store.get_reservation(other.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Held);
    }

    #[tokio::test]
    async fn test_collision_is_retried() {
        let store = Arc::new(InMemoryStore::new());
        let taken = TicketCode::parse("TAKEN0000001").unwrap();

        let first = held(&store, 1).await;
        let scripted = Arc::new(ScriptedCodeGenerator::new([taken.clone(), taken.clone()]));
        let issuer = issuer(&store, scripted.clone(), DEFAULT_CODE_ATTEMPTS);

        let issuance = issuer.issue(first.id, &approved("pay_1", &first)).await.unwrap();
        assert_eq!(issuance.tickets[0].code, taken);

        // Second reservation draws the same code first, then a random one
        let second = held(&store, 1).await;
        let issuance = issuer.issue(second.id, &approved("pay_2", &second)).await.unwrap();
        assert_ne!(issuance.tickets[0].code, taken);
        assert_eq!(scripted.remaining(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_are_invariant_violation() {
        let store = Arc::new(InMemoryStore::new());
        let taken = TicketCode::parse("TAKEN0000001").unwrap();
        let first = held(&store, 1).await;
        issuer(&store, Arc::new(ScriptedCodeGenerator::new([taken.clone()])), 1)
            .issue(first.id, &approved("pay_1", &first))
            .await
            .unwrap();

        let second = held(&store, 1).await;
        let err = issuer(&store, Arc::new(ScriptedCodeGenerator::new(vec![taken; 3])), 3)
            .issue(second.id, &approved("pay_2", &second))
            .await
            .unwrap_err();

        assert!(matches!(err, IssueError::CodesExhausted(3)));
        assert_eq!(err.kind(), ErrorKind::InvariantViolation);
        let stored = store.get_reservation(second.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Held);
    }

    #[tokio::test]
    async fn test_unapproved_or_short_payment_mints_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let reservation = held(&store, 2).await;
        let issuer = issuer(&store, Arc::new(RandomCodeGenerator), DEFAULT_CODE_ATTEMPTS);

        let mut pending = approved("pay_1", &reservation);
        pending.status = PaymentStatus::Pending;
        let err = issuer.issue(reservation.id, &pending).await.unwrap_err();
        assert!(matches!(err, IssueError::PaymentNotApproved(PaymentStatus::Pending)));

        let mut short = approved("pay_1", &reservation);
        short.amount = Money::from_cents(4000);
        let err = issuer.issue(reservation.id, &short).await.unwrap_err();
        assert!(matches!(err, IssueError::AmountMismatch { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);

        assert!(store.all_tickets().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_released_reservation_is_not_held() {
        let store = Arc::new(InMemoryStore::new());
        let reservation = held(&store, 1).await;
        store.release_reservation(reservation.id).await.unwrap();
        let issuer = issuer(&store, Arc::new(RandomCodeGenerator), DEFAULT_CODE_ATTEMPTS);

        let err = issuer
            .issue(reservation.id, &approved("pay_1", &reservation))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IssueError::NotHeld {
                status: ReservationStatus::Released,
                ..
            }
        ));
    }
}
