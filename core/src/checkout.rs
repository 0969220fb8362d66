//! Checkout flow.
//!
//! reserve (ledger) -> [`Checkout::request_payment`] opens a PIX charge and
//! renders its BR Code -> the buyer pays -> [`Checkout::confirm`] polls the
//! gateway and, once approved, hands over to the issuer.
//!
//! Gateway calls always happen before any atomic store step; a gateway
//! outage therefore never changes inventory.

use crate::error::{ErrorKind, StoreError};
use crate::issuer::{IssueError, Issuance, TicketIssuer};
use crate::ledger::{InventoryLedger, LedgerError};
use crate::payment::{PaymentGateway, PaymentGatewayError, PaymentRequest, PaymentStatus};
use crate::pix::{PixError, PixPayload};
use crate::store::Store;
use crate::types::{Money, ReservationId, ReservationStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Receiver data printed into every BR Code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerchantAccount {
    /// PIX key receiving the money
    pub pix_key: String,
    /// Receiver name (cut to 25 bytes in the payload)
    pub name: String,
    /// Receiver city (cut to 15 bytes in the payload)
    pub city: String,
}

/// What the buyer needs to pay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaymentInstructions {
    /// Reservation being paid
    pub reservation_id: ReservationId,
    /// Gateway reference to confirm with
    pub payment_ref: String,
    /// Amount due
    pub amount: Money,
    /// BR Code ("PIX copia e cola"); the processor's own when it renders one
    pub payload: String,
    /// Processor-rendered QR image (base64 PNG), when available
    pub qr_code_base64: Option<String>,
    /// Pay before this or the units go back on sale
    pub expires_at: DateTime<Utc>,
}

/// Checkout failure.
#[derive(Error, Debug)]
pub enum CheckoutError {
    /// Unknown reservation
    #[error("reservation {0} not found")]
    ReservationNotFound(ReservationId),

    /// Reservation cannot take a payment any more
    #[error("reservation {reservation_id} is {status}, not held")]
    NotHeld {
        /// Reservation
        reservation_id: ReservationId,
        /// Its current status
        status: ReservationStatus,
    },

    /// Gateway has not approved the payment (yet)
    #[error("payment {payment_ref} is {status:?}")]
    PaymentNotApproved {
        /// Gateway reference
        payment_ref: String,
        /// Status the gateway reported
        status: PaymentStatus,
    },

    /// The charge was opened for a different reservation
    #[error("payment {payment_ref} was not opened for reservation {reservation_id}")]
    ForeignPayment {
        /// Gateway reference
        payment_ref: String,
        /// Reservation it was presented for
        reservation_id: ReservationId,
    },

    /// Gateway call failed
    #[error(transparent)]
    Gateway(#[from] PaymentGatewayError),

    /// Merchant data does not fit a BR Code
    #[error(transparent)]
    Pix(#[from] PixError),

    /// Issuance failed
    #[error(transparent)]
    Issue(#[from] IssueError),

    /// Releasing a failed payment's units failed
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CheckoutError {
    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ReservationNotFound(_) => ErrorKind::NotFound,
            Self::NotHeld { .. } | Self::PaymentNotApproved { .. } | Self::ForeignPayment { .. } => {
                ErrorKind::Conflict
            }
            Self::Gateway(err) => err.kind(),
            Self::Issue(err) => err.kind(),
            Self::Ledger(err) => err.kind(),
            Self::Store(err) => err.kind(),
            Self::Pix(_) => ErrorKind::InvariantViolation,
        }
    }
}

/// Drives a reservation through payment to issued tickets.
#[derive(Clone)]
pub struct Checkout {
    store: Arc<dyn Store>,
    ledger: InventoryLedger,
    issuer: TicketIssuer,
    gateway: Arc<dyn PaymentGateway>,
    merchant: MerchantAccount,
}

impl Checkout {
    /// Wires the flow together
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        ledger: InventoryLedger,
        issuer: TicketIssuer,
        gateway: Arc<dyn PaymentGateway>,
        merchant: MerchantAccount,
    ) -> Self {
        Self {
            store,
            ledger,
            issuer,
            gateway,
            merchant,
        }
    }

    /// Opens a PIX charge for a held reservation.
    ///
    /// # Errors
    ///
    /// [`CheckoutError::ReservationNotFound`] / [`CheckoutError::NotHeld`] for
    /// a reservation that cannot be paid, [`CheckoutError::Gateway`] when the
    /// processor fails.
    pub async fn request_payment(
        &self,
        reservation_id: ReservationId,
        payer_email: Option<String>,
    ) -> Result<PaymentInstructions, CheckoutError> {
        let reservation = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or(CheckoutError::ReservationNotFound(reservation_id))?;
        if reservation.status != ReservationStatus::Held {
            return Err(CheckoutError::NotHeld {
                reservation_id,
                status: reservation.status,
            });
        }

        let txid = reservation.txid();
        let intent = self
            .gateway
            .create_intent(PaymentRequest {
                amount: reservation.amount,
                description: format!("{} ingresso(s), reserva {}", reservation.qty, reservation.id),
                txid: txid.clone(),
                payer_email,
            })
            .await?;

        let payload = match intent.qr_code {
            Some(qr_code) if !qr_code.is_empty() => qr_code,
            _ => PixPayload::new(&self.merchant.pix_key, &self.merchant.name, &self.merchant.city)
                .with_amount(reservation.amount)
                .with_txid(txid)
                .encode()?,
        };

        tracing::info!(
            reservation_id = %reservation_id,
            payment_ref = %intent.external_ref,
            amount = reservation.amount.cents(),
            "Payment requested"
        );

        Ok(PaymentInstructions {
            reservation_id,
            payment_ref: intent.external_ref,
            amount: reservation.amount,
            payload,
            qr_code_base64: intent.qr_code_base64,
            expires_at: reservation.expires_at,
        })
    }

    /// Polls the gateway and issues tickets once the payment is approved.
    ///
    /// A payment the gateway reports as failed releases the reservation. Both
    /// outcomes require the charge to have been opened for this reservation.
    ///
    /// # Errors
    ///
    /// [`CheckoutError::ForeignPayment`] for a charge opened under another
    /// txid, [`CheckoutError::PaymentNotApproved`] while pending or after failure,
    /// [`CheckoutError::Gateway`] for processor errors (inventory untouched),
    /// [`CheckoutError::Issue`] when issuance is refused.
    pub async fn confirm(&self, reservation_id: ReservationId, payment_ref: &str) -> Result<Issuance, CheckoutError> {
        let intent = self.gateway.fetch_intent(payment_ref).await.inspect_err(|err| {
            tracing::warn!(reservation_id = %reservation_id, payment_ref, error = %err, "Payment poll failed");
        })?;

        let reservation = self
            .store
            .get_reservation(reservation_id)
            .await?
            .ok_or(CheckoutError::ReservationNotFound(reservation_id))?;
        if !intent.is_for(&reservation.txid()) {
            tracing::warn!(reservation_id = %reservation_id, payment_ref, "Payment opened for another reservation");
            return Err(CheckoutError::ForeignPayment {
                payment_ref: payment_ref.to_string(),
                reservation_id,
            });
        }

        match intent.status {
            PaymentStatus::Approved => Ok(self.issuer.issue(reservation_id, &intent).await?),
            PaymentStatus::Pending => {
                tracing::debug!(reservation_id = %reservation_id, payment_ref, "Payment still pending");
                Err(CheckoutError::PaymentNotApproved {
                    payment_ref: payment_ref.to_string(),
                    status: intent.status,
                })
            }
            PaymentStatus::Failed => {
                self.ledger.release_reservation(reservation_id).await?;
                tracing::info!(reservation_id = %reservation_id, payment_ref, "Payment failed, reservation released");
                Err(CheckoutError::PaymentNotApproved {
                    payment_ref: payment_ref.to_string(),
                    status: intent.status,
                })
            }
        }
    }
}
