//! Bilheteria - box office HTTP service
//!
//! Sells event tickets paid by PIX and validates them at the gate.
//!
//! # Architecture
//!
//! ```text
//!   HTTP (axum)                 bilheteria-core                 storage
//! ┌──────────────┐   ┌──────────────────────────────┐   ┌──────────────────┐
//! │ /api/reserve │──▶│ InventoryLedger              │   │                  │
//! │ /api/payments│──▶│ Checkout ──▶ PaymentGateway  │──▶│ PostgresStore    │
//! │ /api/confirm │──▶│   └──▶ TicketIssuer          │   │ (or in-memory)   │
//! │ /api/validate│──▶│ ValidationService            │   │                  │
//! │ /api/cancel  │──▶│ CancellationService          │   │                  │
//! │ /api/buyers  │──▶│ TicketRoster                 │   │                  │
//! │ /api/events  │──▶│                              │   │                  │
//! └──────────────┘   └──────────────────────────────┘   └──────────────────┘
//!                          ▲
//!                    ExpirySweeper (background)
//! ```
//!
//! # Modules
//!
//! - [`config`]: environment configuration
//! - [`server`]: state, router and probes
//! - [`api`]: JSON handlers
//! - [`payment_gateway`]: Mercado Pago client
//! - [`sweeper`]: reservation expiry task
//! - [`metrics`]: Prometheus counters
//! - [`middleware`]: request id tagging
//! - [`error`]: HTTP error mapping

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod payment_gateway;
pub mod server;
pub mod sweeper;

pub use config::Config;
pub use error::AppError;
pub use server::{AppState, BoxOfficeSettings, build_router};
pub use sweeper::ExpirySweeper;
