//! Concurrency stress tests for last-unit, double-scan and cancel races.
//!
//! Every test fires many tasks at the same row on a multi-threaded runtime
//! and checks that the atomic store steps let exactly the right number win.
//!
//! Run with: `cargo test -p bilheteria-core --test concurrency_stress_test -- --nocapture`

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/expect

use bilheteria_core::cancellation::CancellationService;
use bilheteria_core::checkout::{Checkout, MerchantAccount};
use bilheteria_core::code::{RandomCodeGenerator, ScriptedCodeGenerator, TicketCode};
use bilheteria_core::environment::SystemClock;
use bilheteria_core::issuer::{TicketIssuer, DEFAULT_CODE_ATTEMPTS};
use bilheteria_core::ledger::{InventoryLedger, LedgerSettings, ReserveError};
use bilheteria_core::memory::InMemoryStore;
use bilheteria_core::payment::{MockPaymentGateway, PaymentIntent, PaymentStatus};
use bilheteria_core::store::{LotStore, TicketStore};
use bilheteria_core::validation::{ValidationOutcome, ValidationService};
use bilheteria_core::{BuyerId, EventId, Lot, LotId, Money, Reservation, Ticket, ValidatorId};
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;

fn ledger(store: &Arc<InMemoryStore>) -> InventoryLedger {
    InventoryLedger::new(store.clone(), Arc::new(SystemClock), LedgerSettings::default())
}

async fn open_lot(store: &InMemoryStore, total: u32) -> Lot {
    let now = Utc::now();
    let lot = Lot::new(
        EventId::new(),
        "Pista",
        Money::from_cents(4000),
        total,
        now - Duration::hours(1),
        now + Duration::hours(1),
    );
    store.insert_lot(&lot).await.unwrap();
    lot
}

fn approved(reference: String, reservation: &Reservation) -> PaymentIntent {
    PaymentIntent {
        external_ref: reference,
        amount: reservation.amount,
        description: "stress".to_string(),
        status: PaymentStatus::Approved,
        reference: Some(reservation.txid()),
        qr_code: None,
        qr_code_base64: None,
    }
}

/// Sells one unit through the whole reserve + issue path.
async fn sell_one(store: &Arc<InMemoryStore>, lot_id: LotId) -> Ticket {
    let reservation = ledger(store).reserve(lot_id, BuyerId::new(), 1).await.unwrap();
    let issuer = TicketIssuer::new(
        store.clone(),
        Arc::new(RandomCodeGenerator),
        Arc::new(SystemClock),
        DEFAULT_CODE_ATTEMPTS,
    );
    let payment = approved(format!("pay_{}", reservation.id), &reservation);
    issuer
        .issue(reservation.id, &payment)
        .await
        .unwrap()
        .tickets
        .remove(0)
}

/// Test: 100 concurrent reserve attempts for 1 unit.
///
/// Exactly one wins; the other 99 see `Insufficient`.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_last_unit_has_one_winner() {
    println!("🧪 Concurrency Stress Test: 100 concurrent reserves for 1 unit");

    let store = Arc::new(InMemoryStore::new());
    let lot_id = open_lot(&store, 1).await.id;
    let ledger = ledger(&store);

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.reserve(lot_id, BuyerId::new(), 1).await })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let insufficient = results
        .iter()
        .filter(|r| matches!(r, Err(ReserveError::Insufficient { .. })))
        .count();

    println!("    ✅ Successes: {winners}");
    println!("    ❌ Insufficient: {insufficient}");

    assert_eq!(winners, 1);
    assert_eq!(insufficient, 99);

    let lot = store.get_lot(lot_id).await.unwrap().unwrap();
    assert_eq!(lot.sold_qty, 1);
    println!("  ✅ Exactly 1 winner for the last unit");
}

/// Test: 50 concurrent reserves of 1..=4 units against 20 units.
///
/// The granted quantities never add up past the lot size and match
/// `sold_qty` exactly.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_reserves_never_oversell() {
    println!("🧪 Concurrency Stress Test: 50 mixed-size reserves for 20 units");

    let store = Arc::new(InMemoryStore::new());
    let lot_id = open_lot(&store, 20).await.id;
    let ledger = ledger(&store);

    let handles: Vec<_> = (0..50u32)
        .map(|i| {
            let ledger = ledger.clone();
            let qty = i % 4 + 1;
            tokio::spawn(async move { ledger.reserve(lot_id, BuyerId::new(), qty).await })
        })
        .collect();

    let granted: u32 = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter_map(|joined| joined.unwrap().ok())
        .map(|reservation| reservation.qty)
        .sum();

    let lot = store.get_lot(lot_id).await.unwrap().unwrap();
    println!("    📈 Granted: {granted} / {}", lot.total_qty);

    assert!(granted <= 20);
    assert_eq!(lot.sold_qty, granted);
}

/// Test: 20 gates scan the same code at once.
///
/// Exactly one `Success`; everyone else sees `AlreadyUsed` carrying the
/// winner's stamp.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_double_scan_has_one_winner() {
    println!("🧪 Concurrency Stress Test: 20 concurrent scans of one code");

    let store = Arc::new(InMemoryStore::new());
    let lot = open_lot(&store, 1).await;
    let ticket = sell_one(&store, lot.id).await;
    let service = ValidationService::new(store.clone(), Arc::new(SystemClock));

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let service = service.clone();
            let code = ticket.code.to_string();
            let event_id = ticket.event_id;
            tokio::spawn(async move {
                let validator = ValidatorId::new();
                (validator, service.validate(&code, event_id, validator).await.unwrap())
            })
        })
        .collect();

    let outcomes: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<_> = outcomes
        .iter()
        .filter(|(_, o)| matches!(o, ValidationOutcome::Success { .. }))
        .collect();
    assert_eq!(winners.len(), 1);
    let winner = winners[0].0;

    for (_, outcome) in outcomes.iter().filter(|(v, _)| *v != winner) {
        match outcome {
            ValidationOutcome::AlreadyUsed { validated_by, .. } => {
                assert_eq!(*validated_by, Some(winner));
            }
            other => panic!("expected AlreadyUsed, got {other:?}"),
        }
    }
    println!("  ✅ One sucesso, 19 usado");
}

/// Test: 30 reservations issued concurrently while the code generator keeps
/// handing out the same code.
///
/// Collisions are retried and every stored code ends up unique.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_codes_stay_unique_under_forced_collisions() {
    println!("🧪 Concurrency Stress Test: 30 issuances with forced collisions");

    let store = Arc::new(InMemoryStore::new());
    let lot = open_lot(&store, 30).await;
    let ledger = ledger(&store);

    let duplicate = TicketCode::parse("COLLIDE00000").unwrap();
    let codes = Arc::new(ScriptedCodeGenerator::new(vec![duplicate; 30]));
    let issuer = TicketIssuer::new(store.clone(), codes, Arc::new(SystemClock), 40);

    let mut reservations = Vec::new();
    for _ in 0..30 {
        reservations.push(ledger.reserve(lot.id, BuyerId::new(), 1).await.unwrap());
    }

    let handles: Vec<_> = reservations
        .into_iter()
        .map(|reservation| {
            let issuer = issuer.clone();
            tokio::spawn(async move {
                let payment = approved(format!("pay_{}", reservation.id), &reservation);
                issuer.issue(reservation.id, &payment).await
            })
        })
        .collect();

    for joined in futures::future::join_all(handles).await {
        joined.unwrap().unwrap();
    }

    let tickets = store.all_tickets().unwrap();
    let unique: HashSet<_> = tickets.iter().map(|t| t.code.clone()).collect();
    println!("    🎫 Tickets: {}, unique codes: {}", tickets.len(), unique.len());

    assert_eq!(tickets.len(), 30);
    assert_eq!(unique.len(), 30);
}

/// Test: 10 concurrent cancels of the same ticket.
///
/// One wins and exactly one unit goes back to the lot.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_cancel_releases_exactly_once() {
    println!("🧪 Concurrency Stress Test: 10 concurrent cancels of one ticket");

    let store = Arc::new(InMemoryStore::new());
    let lot = open_lot(&store, 2).await;
    let ticket = sell_one(&store, lot.id).await;
    sell_one(&store, lot.id).await;
    assert_eq!(store.get_lot(lot.id).await.unwrap().unwrap().sold_qty, 2);

    let service = CancellationService::new(store.clone(), ledger(&store));
    let ticket_id = ticket.id;
    let handles: Vec<_> = (0..10)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.cancel(ticket_id).await })
        })
        .collect();

    let cancelled = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|joined| joined.as_ref().unwrap().is_ok())
        .count();

    assert_eq!(cancelled, 1);
    assert_eq!(store.get_lot(lot.id).await.unwrap().unwrap().sold_qty, 1);
    assert_eq!(
        store.get_ticket(ticket.id).await.unwrap().unwrap().status,
        bilheteria_core::TicketStatus::Cancelado
    );
    println!("  ✅ Exactly one unit released");
}

/// Test: 20 concurrent confirms of one approved payment.
///
/// One call issues the tickets; every other call replays them.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_confirms_issue_once() {
    println!("🧪 Concurrency Stress Test: 20 concurrent confirms of one payment");

    let store = Arc::new(InMemoryStore::new());
    let lot = open_lot(&store, 5).await;
    let ledger = ledger(&store);
    let gateway = MockPaymentGateway::new();
    let issuer = TicketIssuer::new(
        store.clone(),
        Arc::new(RandomCodeGenerator),
        Arc::new(SystemClock),
        DEFAULT_CODE_ATTEMPTS,
    );
    let checkout = Checkout::new(
        store.clone(),
        ledger.clone(),
        issuer,
        Arc::new(gateway.clone()),
        MerchantAccount {
            pix_key: "abc@bank.com".to_string(),
            name: "JOAO SILVA".to_string(),
            city: "SAO PAULO".to_string(),
        },
    );

    let reservation = ledger.reserve(lot.id, BuyerId::new(), 3).await.unwrap();
    let instructions = checkout.request_payment(reservation.id, None).await.unwrap();
    gateway.approve(&instructions.payment_ref);

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let checkout = checkout.clone();
            let payment_ref = instructions.payment_ref.clone();
            let reservation_id = reservation.id;
            tokio::spawn(async move { checkout.confirm(reservation_id, &payment_ref).await })
        })
        .collect();

    let issuances: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let fresh = issuances.iter().filter(|issuance| !issuance.replayed).count();
    println!("    🎫 Fresh issuances: {fresh}, replays: {}", issuances.len() - fresh);

    assert_eq!(fresh, 1);
    let mut expected: Vec<_> = issuances[0].tickets.iter().map(|t| t.id).collect();
    expected.sort();
    for issuance in &issuances {
        assert_eq!(issuance.tickets.len(), 3);
        let mut ids: Vec<_> = issuance.tickets.iter().map(|t| t.id).collect();
        ids.sort();
        assert_eq!(ids, expected);
    }
    assert_eq!(store.all_tickets().unwrap().len(), 3);
    assert_eq!(store.get_lot(lot.id).await.unwrap().unwrap().sold_qty, 3);
    println!("  ✅ Tickets issued exactly once");
}
