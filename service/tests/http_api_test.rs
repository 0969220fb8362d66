//! HTTP API integration tests.
//!
//! Drives the real router with `tower::ServiceExt::oneshot` against the
//! in-memory store and the mock payment gateway, so the whole JSON contract
//! is exercised without Docker.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code
#![allow(clippy::too_many_lines)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use bilheteria::{AppState, BoxOfficeSettings, build_router};
use bilheteria_core::checkout::MerchantAccount;
use bilheteria_core::code::RandomCodeGenerator;
use bilheteria_core::environment::FixedClock;
use bilheteria_core::ledger::LedgerSettings;
use bilheteria_core::memory::InMemoryStore;
use bilheteria_core::payment::MockPaymentGateway;
use bilheteria_core::pix::PixPayload;
use bilheteria_core::store::LotStore;
use bilheteria_core::{BuyerId, EventId, Lot, Money, ValidatorId};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    gateway: MockPaymentGateway,
    clock: Arc<FixedClock>,
    lot: Lot,
}

async fn setup(total: u32) -> TestApp {
    let now = Utc::now();
    let store = Arc::new(InMemoryStore::new());
    let gateway = MockPaymentGateway::new();
    let clock = Arc::new(FixedClock::new(now));

    let lot = Lot::new(
        EventId::new(),
        "Pista",
        Money::from_cents(4000),
        total,
        now - Duration::hours(1),
        now + Duration::days(1),
    );
    store.insert_lot(&lot).await.expect("insert lot");

    let state = AppState::new(
        store,
        Arc::new(gateway.clone()),
        clock.clone(),
        Arc::new(RandomCodeGenerator),
        BoxOfficeSettings {
            ledger: LedgerSettings::default(),
            code_attempts: 5,
            merchant: MerchantAccount {
                pix_key: "abc@bank.com".to_string(),
                name: "BILHETERIA".to_string(),
                city: "SAO PAULO".to_string(),
            },
        },
    );

    TestApp {
        router: build_router(state),
        gateway,
        clock,
        lot,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.expect("request");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("JSON body")
        };
        (status, body)
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn reserve(&self, qty: u32) -> (StatusCode, Value) {
        self.post(
            "/api/reserve",
            json!({ "lot_id": self.lot.id, "buyer_id": BuyerId::new(), "qty": qty }),
        )
        .await
    }

    /// Reserve, pay and confirm; returns the issued tickets.
    async fn buy(&self, qty: u32) -> Vec<Value> {
        let (_, reservation) = self.reserve(qty).await;
        let reservation_id = reservation["reservation_id"].clone();

        let (status, payment) = self
            .post("/api/payments", json!({ "reservation_id": reservation_id }))
            .await;
        assert_eq!(status, StatusCode::OK, "{payment}");
        let payment_ref = payment["payment_ref"].as_str().unwrap().to_string();
        assert!(self.gateway.approve(&payment_ref));

        let (status, issued) = self
            .post(
                "/api/confirm",
                json!({ "reservation_id": reservation_id, "payment_ref": payment_ref }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{issued}");
        issued["tickets"].as_array().unwrap().clone()
    }
}

#[tokio::test]
async fn test_health_and_readiness() {
    let app = setup(1).await;

    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = app.get("/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
}

#[tokio::test]
async fn test_full_purchase_flow() {
    let app = setup(10).await;

    let (status, reservation) = app.reserve(2).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reservation["amount"], 8000);
    let reservation_id = reservation["reservation_id"].clone();

    let (status, payment) = app
        .post(
            "/api/payments",
            json!({ "reservation_id": reservation_id, "payer_email": "ana@example.com" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["amount"], 8000);
    let payload = payment["payload"].as_str().unwrap();
    assert!(payload.starts_with("000201"));
    let decoded = PixPayload::decode(payload).expect("valid BR Code");
    assert_eq!(decoded.key, "abc@bank.com");
    assert_eq!(decoded.amount, Some(Money::from_cents(8000)));
    let payment_ref = payment["payment_ref"].as_str().unwrap().to_string();

    // Still pending at the processor
    let confirm = json!({ "reservation_id": reservation_id, "payment_ref": payment_ref });
    let (status, body) = app.post("/api/confirm", confirm.clone()).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "PAYMENT_NOT_APPROVED");

    app.gateway.approve(&payment_ref);
    let (status, issued) = app.post("/api/confirm", confirm.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(issued["replayed"], false);
    let tickets = issued["tickets"].as_array().unwrap();
    assert_eq!(tickets.len(), 2);
    assert!(tickets.iter().all(|t| t["status"] == "confirmado"));
    assert_ne!(tickets[0]["code"], tickets[1]["code"]);

    // Replay returns the same tickets with 409
    let (status, replay) = app.post("/api/confirm", confirm).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(replay["replayed"], true);
    assert_eq!(replay["tickets"], issued["tickets"]);

    let (status, lot) = app.get(&format!("/api/lots/{}", app.lot.id.as_uuid())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(lot["sold"], 2);
    assert_eq!(lot["available"], 8);
}

#[tokio::test]
async fn test_reserve_error_contract() {
    let app = setup(1).await;

    let (status, _) = app.reserve(1).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.reserve(1).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INSUFFICIENT");

    let (status, body) = app.reserve(0).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, body) = app
        .post(
            "/api/reserve",
            json!({ "lot_id": EventId::new(), "buyer_id": BuyerId::new(), "qty": 1 }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    // Malformed JSON uses the same error body
    let (status, body) = app.post("/api/reserve", json!({ "qty": "two" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    app.clock.advance(Duration::days(2));
    let (status, body) = app.reserve(1).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "WINDOW_CLOSED");
}

#[tokio::test]
async fn test_failed_payment_releases_units() {
    let app = setup(3).await;

    let (_, reservation) = app.reserve(3).await;
    let reservation_id = reservation["reservation_id"].clone();
    let (_, payment) = app
        .post("/api/payments", json!({ "reservation_id": reservation_id }))
        .await;
    let payment_ref = payment["payment_ref"].as_str().unwrap().to_string();

    app.gateway.fail(&payment_ref);
    let (status, body) = app
        .post(
            "/api/confirm",
            json!({ "reservation_id": reservation_id, "payment_ref": payment_ref }),
        )
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "PAYMENT_NOT_APPROVED");

    let (_, lot) = app.get(&format!("/api/lots/{}", app.lot.id.as_uuid())).await;
    assert_eq!(lot["available"], 3);

    // The reservation is gone; paying it again is refused
    let (status, body) = app
        .post("/api/payments", json!({ "reservation_id": reservation_id }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "RESERVATION_NOT_HELD");
}

#[tokio::test]
async fn test_gateway_outage_leaves_inventory_alone() {
    let app = setup(2).await;

    let (_, reservation) = app.reserve(2).await;
    let reservation_id = reservation["reservation_id"].clone();

    app.gateway.set_unavailable(true);
    let (status, body) = app
        .post("/api/payments", json!({ "reservation_id": reservation_id }))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "GATEWAY_UNAVAILABLE");

    let (_, lot) = app.get(&format!("/api/lots/{}", app.lot.id.as_uuid())).await;
    assert_eq!(lot["sold"], 2);
}

#[tokio::test]
async fn test_gate_validation_contract() {
    let app = setup(5).await;
    let tickets = app.buy(1).await;
    let code = tickets[0]["code"].clone();
    let event_id = app.lot.event_id;

    let scan = json!({ "code": code, "event_id": event_id, "validator_id": ValidatorId::new() });

    let (status, first) = app.post("/api/validate", scan.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["outcome"], "sucesso");
    assert_eq!(first["message"], "Ingresso validado com sucesso!");
    assert_eq!(first["details"]["ticket_id"], tickets[0]["id"]);

    let (status, second) = app.post("/api/validate", scan).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["outcome"], "usado");

    // Right code, wrong event
    let (_, other_event) = app
        .post(
            "/api/validate",
            json!({ "code": code, "event_id": EventId::new(), "validator_id": ValidatorId::new() }),
        )
        .await;
    assert_eq!(other_event["outcome"], "erro");
    assert_eq!(
        other_event["message"],
        "Ingresso não encontrado ou inválido para este evento"
    );

    let (_, garbage) = app
        .post(
            "/api/validate",
            json!({ "code": "??", "event_id": event_id, "validator_id": ValidatorId::new() }),
        )
        .await;
    assert_eq!(garbage["outcome"], "erro");

    let (status, empty) = app
        .post(
            "/api/validate",
            json!({ "code": "   ", "event_id": event_id, "validator_id": ValidatorId::new() }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(empty["outcome"], "erro");
    assert_eq!(empty["message"], "Por favor, insira o código do ingresso");
    assert!(empty["details"].is_null());
}

#[tokio::test]
async fn test_cancel_frees_one_unit() {
    let app = setup(2).await;
    let tickets = app.buy(2).await;
    let ticket_id = tickets[0]["id"].clone();

    let (status, body) = app.post("/api/cancel", json!({ "ticket_id": ticket_id })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], true);
    assert_eq!(body["status"], "cancelado");

    let (_, lot) = app.get(&format!("/api/lots/{}", app.lot.id.as_uuid())).await;
    assert_eq!(lot["available"], 1);

    // Second cancel is refused and frees nothing
    let (status, body) = app.post("/api/cancel", json!({ "ticket_id": ticket_id })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_TRANSITION");
    let (_, lot) = app.get(&format!("/api/lots/{}", app.lot.id.as_uuid())).await;
    assert_eq!(lot["available"], 1);

    // A cancelled ticket does not open the gate
    let (_, scan) = app
        .post(
            "/api/validate",
            json!({ "code": tickets[0]["code"], "event_id": app.lot.event_id, "validator_id": ValidatorId::new() }),
        )
        .await;
    assert_eq!(scan["outcome"], "erro");
    assert_eq!(scan["message"], "Este ingresso foi cancelado");

    let (status, _) = app
        .post("/api/cancel", json!({ "ticket_id": uuid::Uuid::new_v4() }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_lot_lookup_errors() {
    let app = setup(1).await;

    let (status, body) = app.get("/api/lots/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");

    let (status, body) = app.get(&format!("/api/lots/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_confirm_refuses_payment_of_another_reservation() {
    let app = setup(4).await;

    let (_, paid) = app.reserve(2).await;
    let (_, other) = app.reserve(2).await;
    let (_, payment) = app
        .post("/api/payments", json!({ "reservation_id": paid["reservation_id"] }))
        .await;
    let payment_ref = payment["payment_ref"].as_str().unwrap().to_string();
    app.gateway.approve(&payment_ref);

    let (status, body) = app
        .post(
            "/api/confirm",
            json!({ "reservation_id": other["reservation_id"], "payment_ref": payment_ref }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "PAYMENT_MISMATCH");

    let (status, issued) = app
        .post(
            "/api/confirm",
            json!({ "reservation_id": paid["reservation_id"], "payment_ref": payment_ref }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(issued["tickets"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_ticket_listings() {
    let app = setup(10).await;
    let buyer = BuyerId::new();

    let (_, reservation) = app
        .post("/api/reserve", json!({ "lot_id": app.lot.id, "buyer_id": buyer, "qty": 2 }))
        .await;
    let reservation_id = reservation["reservation_id"].clone();
    let (_, payment) = app
        .post("/api/payments", json!({ "reservation_id": reservation_id }))
        .await;
    let payment_ref = payment["payment_ref"].as_str().unwrap().to_string();
    app.gateway.approve(&payment_ref);
    let (status, _) = app
        .post(
            "/api/confirm",
            json!({ "reservation_id": reservation_id, "payment_ref": payment_ref }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let someone_else = app.buy(1).await;
    let (_, scanned) = app
        .post(
            "/api/validate",
            json!({
                "code": someone_else[0]["code"],
                "event_id": app.lot.event_id,
                "validator_id": ValidatorId::new()
            }),
        )
        .await;
    assert_eq!(scanned["outcome"], "sucesso");

    let (status, wallet) = app.get(&format!("/api/buyers/{}/tickets", buyer.as_uuid())).await;
    assert_eq!(status, StatusCode::OK);
    let owned = wallet["tickets"].as_array().unwrap();
    assert_eq!(owned.len(), 2);
    assert!(owned.iter().all(|t| t["status"] == "confirmado"));

    let (status, attendance) = app
        .get(&format!("/api/events/{}/tickets", app.lot.event_id.as_uuid()))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(attendance["total"], 3);
    assert_eq!(attendance["used"], 1);
    assert_eq!(attendance["buyers"], 2);
    assert_eq!(attendance["tickets"].as_array().unwrap().len(), 3);

    let (status, nobody) = app.get(&format!("/api/buyers/{}/tickets", BuyerId::new().as_uuid())).await;
    assert_eq!(status, StatusCode::OK);
    assert!(nobody["tickets"].as_array().unwrap().is_empty());

    let (status, body) = app.get("/api/events/not-a-uuid/tickets").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}
