//! Application state shared across HTTP handlers.

use crate::config::Config;
use bilheteria_core::cancellation::CancellationService;
use bilheteria_core::checkout::{Checkout, MerchantAccount};
use bilheteria_core::code::CodeGenerator;
use bilheteria_core::environment::Clock;
use bilheteria_core::issuer::TicketIssuer;
use bilheteria_core::ledger::{InventoryLedger, LedgerSettings};
use bilheteria_core::payment::PaymentGateway;
use bilheteria_core::roster::TicketRoster;
use bilheteria_core::store::Store;
use bilheteria_core::validation::ValidationService;
use std::sync::Arc;

/// Business rules the services are built with.
#[derive(Clone, Debug)]
pub struct BoxOfficeSettings {
    /// Order cap and reservation TTL
    pub ledger: LedgerSettings,
    /// Code batches tried before issuance gives up
    pub code_attempts: u32,
    /// BR Code receiver
    pub merchant: MerchantAccount,
}

impl BoxOfficeSettings {
    /// Settings taken from the loaded configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            ledger: config.ledger_settings(),
            code_attempts: config.sales.code_generation_attempts,
            merchant: config.merchant(),
        }
    }
}

/// Shared application state.
///
/// Every service is cheap to clone; they all point at the same store.
#[derive(Clone)]
pub struct AppState {
    /// Persistence, used directly by the readiness probe
    pub store: Arc<dyn Store>,
    /// Lot counters and reservations
    pub ledger: InventoryLedger,
    /// Payment and issuance
    pub checkout: Checkout,
    /// Gate scans
    pub validation: ValidationService,
    /// Ticket cancellation
    pub cancellation: CancellationService,
    /// Buyer and event ticket listings
    pub roster: TicketRoster,
}

impl AppState {
    /// Wires every service on top of one store.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
        codes: Arc<dyn CodeGenerator>,
        settings: BoxOfficeSettings,
    ) -> Self {
        let ledger = InventoryLedger::new(store.clone(), clock.clone(), settings.ledger);
        let issuer = TicketIssuer::new(store.clone(), codes, clock.clone(), settings.code_attempts);
        let checkout = Checkout::new(store.clone(), ledger.clone(), issuer, gateway, settings.merchant);
        let validation = ValidationService::new(store.clone(), clock);
        let cancellation = CancellationService::new(store.clone(), ledger.clone());
        let roster = TicketRoster::new(store.clone());

        Self {
            store,
            ledger,
            checkout,
            validation,
            cancellation,
            roster,
        }
    }
}
