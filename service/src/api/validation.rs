//! Gate endpoint.
//!
//! Always answers 200 for a reachable verdict; the gate app reads `outcome`
//! (`sucesso`, `usado` or `erro`) and shows `message` to the operator.

use crate::api::ApiJson;
use crate::error::AppError;
use crate::metrics;
use crate::server::AppState;
use axum::{Json, extract::State};
use bilheteria_core::validation::ValidationOutcome;
use bilheteria_core::{EventId, ValidatorId};
use serde::{Deserialize, Serialize};

/// A scanned code.
#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    /// Code as printed on the ticket
    pub code: String,
    /// Event the gate is serving
    pub event_id: EventId,
    /// Operator scanning
    pub validator_id: ValidatorId,
}

/// Gate verdict.
#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    /// `sucesso`, `usado` or `erro`
    pub outcome: &'static str,
    /// Text for the operator
    pub message: &'static str,
    /// Ticket data behind the verdict; absent when no lookup happened
    pub details: Option<ValidationOutcome>,
}

impl From<ValidationOutcome> for ValidateResponse {
    fn from(outcome: ValidationOutcome) -> Self {
        let (verdict, message) = match &outcome {
            ValidationOutcome::Success { .. } => ("sucesso", "Ingresso validado com sucesso!"),
            ValidationOutcome::AlreadyUsed { .. } => ("usado", "Este ingresso já foi utilizado"),
            ValidationOutcome::Cancelled { .. } => ("erro", "Este ingresso foi cancelado"),
            ValidationOutcome::NotConfirmed { .. } => ("erro", "Pagamento deste ingresso não foi confirmado"),
            ValidationOutcome::NotFound => ("erro", "Ingresso não encontrado ou inválido para este evento"),
        };

        Self {
            outcome: verdict,
            message,
            details: Some(outcome),
        }
    }
}

/// `POST /api/validate`
///
/// # Errors
///
/// Only store failures (500); every verdict, including unknown codes, is a
/// 200.
pub async fn validate(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ValidateRequest>,
) -> Result<Json<ValidateResponse>, AppError> {
    if request.code.trim().is_empty() {
        return Ok(Json(ValidateResponse {
            outcome: "erro",
            message: "Por favor, insira o código do ingresso",
            details: None,
        }));
    }

    let outcome = state
        .validation
        .validate(&request.code, request.event_id, request.validator_id)
        .await?;

    metrics::record_validation(outcome.label());
    Ok(Json(outcome.into()))
}
