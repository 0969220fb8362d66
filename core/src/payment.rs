//! Payment gateway boundary.
//!
//! The box office never talks to a payment processor directly. It asks a
//! [`PaymentGateway`] to open a PIX charge and later polls it by reference.

use crate::error::ErrorKind;
use crate::types::Money;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Payment gateway result
pub type GatewayResult<T> = Result<T, PaymentGatewayError>;

/// Payment gateway error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentGatewayError {
    /// Processor unreachable or answered with a server error
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),

    /// Processor did not answer in time
    #[error("payment gateway timeout")]
    Timeout,

    /// No intent with that reference
    #[error("payment {0} not found")]
    NotFound(String),

    /// Processor refused the request
    #[error("payment rejected: {0}")]
    Rejected(String),
}

impl PaymentGatewayError {
    /// Whether retrying the same call later may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }

    /// Error category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) | Self::Timeout => ErrorKind::Transient,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Rejected(_) => ErrorKind::Validation,
        }
    }
}

/// Status of a charge as the processor reports it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Waiting for the payer
    Pending,
    /// Money received
    Approved,
    /// Will never be paid
    Failed,
}

/// A charge opened at the processor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Processor's reference for the charge
    pub external_ref: String,
    /// Amount charged
    pub amount: Money,
    /// Free text shown to the payer
    pub description: String,
    /// Current status
    pub status: PaymentStatus,
    /// Our transaction id echoed back by the processor. Ties the charge to
    /// the reservation it was opened for.
    #[serde(default)]
    pub reference: Option<String>,
    /// BR Code issued by the processor, when it renders one
    #[serde(default)]
    pub qr_code: Option<String>,
    /// Same BR Code as a base64 PNG
    #[serde(default)]
    pub qr_code_base64: Option<String>,
}

impl PaymentIntent {
    /// Whether this charge was opened under `txid`. A charge without a
    /// reference belongs to nobody.
    #[must_use]
    pub fn is_for(&self, txid: &str) -> bool {
        self.reference.as_deref() == Some(txid)
    }
}

/// What to charge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentRequest {
    /// Amount to charge
    pub amount: Money,
    /// Free text shown to the payer
    pub description: String,
    /// PIX transaction id, also used as the idempotency key
    pub txid: String,
    /// Payer e-mail, when the processor wants one
    pub payer_email: Option<String>,
}

/// Payment gateway trait
///
/// Abstraction over PIX processors. Implementations must not touch any box
/// office state; they only talk to the processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a pending charge.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentGatewayError`] if the processor cannot be reached or
    /// refuses the charge.
    async fn create_intent(&self, request: PaymentRequest) -> GatewayResult<PaymentIntent>;

    /// Current state of a charge.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentGatewayError`] if the processor cannot be reached or
    /// does not know `external_ref`.
    async fn fetch_intent(&self, external_ref: &str) -> GatewayResult<PaymentIntent>;
}

/// In-memory gateway for development and testing.
///
/// Charges stay `pending` until a test calls [`MockPaymentGateway::approve`]
/// or [`MockPaymentGateway::fail`], unless the gateway was built with
/// [`MockPaymentGateway::auto_approving`].
#[derive(Clone, Debug, Default)]
pub struct MockPaymentGateway {
    intents: Arc<Mutex<HashMap<String, PaymentIntent>>>,
    unavailable: Arc<AtomicBool>,
    auto_approve: bool,
    qr_code: Option<String>,
}

impl MockPaymentGateway {
    /// Creates a new mock payment gateway
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A gateway whose charges are approved as soon as they are opened
    #[must_use]
    pub fn auto_approving() -> Self {
        Self {
            auto_approve: true,
            ..Self::default()
        }
    }

    /// Charges opened from now on carry `qr_code` as the processor's BR Code
    #[must_use]
    pub fn with_qr_code(mut self, qr_code: impl Into<String>) -> Self {
        self.qr_code = Some(qr_code.into());
        self
    }

    /// Marks a charge approved. Returns `false` for an unknown reference.
    pub fn approve(&self, external_ref: &str) -> bool {
        self.set_status(external_ref, PaymentStatus::Approved)
    }

    /// Marks a charge failed. Returns `false` for an unknown reference.
    pub fn fail(&self, external_ref: &str) -> bool {
        self.set_status(external_ref, PaymentStatus::Failed)
    }

    /// Makes every call fail with [`PaymentGatewayError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Registers a charge directly (for testing).
    pub fn insert(&self, intent: PaymentIntent) {
        self.intents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(intent.external_ref.clone(), intent);
    }

    fn set_status(&self, external_ref: &str, status: PaymentStatus) -> bool {
        let mut intents = self.intents.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(intent) = intents.get_mut(external_ref) else {
            return false;
        };
        intent.status = status;
        true
    }

    fn check_available(&self) -> GatewayResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PaymentGatewayError::Unavailable("mock gateway switched off".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_intent(&self, request: PaymentRequest) -> GatewayResult<PaymentIntent> {
        self.check_available()?;

        let status = if self.auto_approve {
            PaymentStatus::Approved
        } else {
            PaymentStatus::Pending
        };
        let intent = PaymentIntent {
            external_ref: format!("mock_pix_{}", uuid::Uuid::new_v4().simple()),
            amount: request.amount,
            description: request.description,
            status,
            reference: Some(request.txid.clone()),
            qr_code: self.qr_code.clone(),
            qr_code_base64: None,
        };

        tracing::info!(
            external_ref = %intent.external_ref,
            txid = %request.txid,
            amount = intent.amount.cents(),
            "Mock PIX charge opened"
        );

        self.insert(intent.clone());
        Ok(intent)
    }

    async fn fetch_intent(&self, external_ref: &str) -> GatewayResult<PaymentIntent> {
        self.check_available()?;

        self.intents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(external_ref)
            .cloned()
            .ok_or_else(|| PaymentGatewayError::NotFound(external_ref.to_string()))
    }
}
