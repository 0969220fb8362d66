//! Mercado Pago payment gateway.
//!
//! Talks to the Payments API: `POST /v1/payments` opens a PIX charge and
//! `GET /v1/payments/{id}` polls it. Network failures, timeouts and 5xx
//! answers are reported as transient so checkout leaves inventory alone.

use crate::config::{PaymentConfig, PaymentProvider};
use async_trait::async_trait;
use bilheteria_core::Money;
use bilheteria_core::payment::{
    GatewayResult, MockPaymentGateway, PaymentGateway, PaymentGatewayError, PaymentIntent, PaymentRequest,
    PaymentStatus,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Payer e-mail sent when the buyer gave none; the API requires one.
pub const FALLBACK_PAYER_EMAIL: &str = "comprador@exemplo.com";

/// Mercado Pago REST client.
#[derive(Clone, Debug)]
pub struct MercadoPagoGateway {
    http_client: Client,
    base_url: String,
    access_token: String,
}

#[derive(Debug, Serialize)]
struct CreatePayment<'a> {
    transaction_amount: f64,
    description: &'a str,
    payment_method_id: &'static str,
    external_reference: &'a str,
    payer: Payer<'a>,
}

#[derive(Debug, Serialize)]
struct Payer<'a> {
    email: &'a str,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    id: u64,
    status: String,
    transaction_amount: f64,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    point_of_interaction: Option<PointOfInteraction>,
}

#[derive(Debug, Deserialize)]
struct PointOfInteraction {
    #[serde(default)]
    transaction_data: Option<TransactionData>,
}

/// PIX rendering of the charge: the "copia e cola" string and its QR image.
#[derive(Debug, Deserialize)]
struct TransactionData {
    #[serde(default)]
    qr_code: Option<String>,
    #[serde(default)]
    qr_code_base64: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
}

impl MercadoPagoGateway {
    /// Creates a client against `base_url` (normally `https://api.mercadopago.com`).
    ///
    /// # Errors
    ///
    /// Returns [`PaymentGatewayError::Unavailable`] if the HTTP client cannot be
    /// built.
    pub fn new(access_token: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentGatewayError::Unavailable(format!("http client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoGateway {
    async fn create_intent(&self, request: PaymentRequest) -> GatewayResult<PaymentIntent> {
        let body = CreatePayment {
            transaction_amount: to_decimal(request.amount),
            description: &request.description,
            payment_method_id: "pix",
            external_reference: &request.txid,
            payer: Payer {
                email: request.payer_email.as_deref().unwrap_or(FALLBACK_PAYER_EMAIL),
            },
        };

        let response = self
            .http_client
            .post(format!("{}/v1/payments", self.base_url))
            .bearer_auth(&self.access_token)
            .header("X-Idempotency-Key", &request.txid)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;

        let intent = read_payment(response, &request.txid).await?;
        tracing::info!(payment_ref = %intent.external_ref, txid = %request.txid, "PIX charge created");
        Ok(intent)
    }

    async fn fetch_intent(&self, external_ref: &str) -> GatewayResult<PaymentIntent> {
        let response = self
            .http_client
            .get(format!("{}/v1/payments/{external_ref}", self.base_url))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(transport)?;

        read_payment(response, external_ref).await
    }
}

/// Builds the configured gateway.
///
/// The mock approves every charge it opens, so a development checkout goes
/// straight through.
///
/// # Errors
///
/// Returns an error when Mercado Pago is selected without a token, or its
/// client cannot be built.
pub fn from_config(config: &PaymentConfig) -> anyhow::Result<Arc<dyn PaymentGateway>> {
    match config.provider {
        PaymentProvider::Mock => {
            tracing::warn!("Using the mock payment gateway; every charge is approved");
            Ok(Arc::new(MockPaymentGateway::auto_approving()))
        }
        PaymentProvider::MercadoPago => {
            let token = config
                .mercado_pago_token
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("MERCADO_PAGO_TOKEN is required for PAYMENT_PROVIDER=mercadopago"))?;
            let gateway = MercadoPagoGateway::new(
                token,
                config.mercado_pago_base_url.as_str(),
                Duration::from_secs(config.timeout),
            )?;
            tracing::info!(base_url = %config.mercado_pago_base_url, "Using Mercado Pago gateway");
            Ok(Arc::new(gateway))
        }
    }
}

/// Turns an API answer into an intent or a classified error.
async fn read_payment(response: reqwest::Response, reference: &str) -> GatewayResult<PaymentIntent> {
    let status = response.status();
    if status.is_success() {
        let payment: PaymentResponse = response.json().await.map_err(transport)?;
        let (qr_code, qr_code_base64) = payment
            .point_of_interaction
            .and_then(|poi| poi.transaction_data)
            .map_or((None, None), |data| (data.qr_code, data.qr_code_base64));
        return Ok(PaymentIntent {
            external_ref: payment.id.to_string(),
            amount: from_decimal(payment.transaction_amount),
            description: payment.description.unwrap_or_default(),
            status: map_status(&payment.status),
            reference: payment.external_reference,
            qr_code,
            qr_code_base64,
        });
    }

    let message = response
        .json::<ApiError>()
        .await
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| status.to_string());

    tracing::warn!(%status, reference, message = %message, "Mercado Pago refused the request");

    Err(match status {
        StatusCode::NOT_FOUND => PaymentGatewayError::NotFound(reference.to_string()),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => PaymentGatewayError::Unavailable(message),
        s if s.is_server_error() => PaymentGatewayError::Unavailable(message),
        _ => PaymentGatewayError::Rejected(message),
    })
}

/// `approved` -> approved; `pending`, `in_process`, `authorized` -> pending;
/// anything else (rejected, cancelled, refunded, charged_back) -> failed.
fn map_status(status: &str) -> PaymentStatus {
    match status {
        "approved" => PaymentStatus::Approved,
        "pending" | "in_process" | "authorized" => PaymentStatus::Pending,
        _ => PaymentStatus::Failed,
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_decimal(amount: Money) -> f64 {
    amount.cents() as f64 / 100.0
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn from_decimal(amount: f64) -> Money {
    Money::from_cents((amount.max(0.0) * 100.0).round() as u64)
}

fn transport(err: reqwest::Error) -> PaymentGatewayError {
    if err.is_timeout() {
        PaymentGatewayError::Timeout
    } else {
        PaymentGatewayError::Unavailable(err.to_string())
    }
}
