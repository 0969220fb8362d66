//! JSON handlers under `/api`.

pub mod cancellation;
pub mod lots;
pub mod payments;
pub mod reservations;
pub mod tickets;
pub mod validation;

use crate::error::AppError;
use axum::extract::FromRequest;
use axum::extract::rejection::JsonRejection;

/// `Json` extractor whose rejections use the `{code, message}` error body.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}
