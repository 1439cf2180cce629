mod common;

use axum::http::StatusCode;
use common::{id_of, money, Fixture, TestApp};
use restro_api::config::{CbmsConfig, KhaltiConfig};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Five lemonades, served and billed: Rs 1243 with service charge and VAT.
async fn served_bill(app: &TestApp, fx: &Fixture) -> Value {
    let session_id = app.open_session(&fx.owner_token, &fx.table_id).await;
    let (status, order) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/orders"),
            json!({ "items": [{ "menu_item_id": fx.lemonade_id, "quantity": 5 }] }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    app.cook_and_serve(&fx.owner_token, &order["data"]).await;

    let (status, bill) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/bill"),
            json!({}),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{bill}");
    bill["data"].clone()
}

async fn khalti_app(server: &MockServer) -> TestApp {
    let base_url = server.uri();
    TestApp::with_config(move |cfg| {
        cfg.khalti = KhaltiConfig {
            base_url,
            secret_key: Some("test-secret-key".to_string()),
            return_url: Some("https://restro.test/paid".to_string()),
            website_url: None,
        };
    })
    .await
}

async fn mount_initiate(server: &MockServer, pidx: &str) {
    Mock::given(method("POST"))
        .and(path("/epayment/initiate/"))
        .and(header("Authorization", "Key test-secret-key"))
        .and(body_partial_json(json!({
            "amount": 124300,
            "return_url": "https://restro.test/paid",
            "website_url": "https://restro.test/paid"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pidx": pidx,
            "payment_url": format!("https://test-pay.khalti.com/?pidx={pidx}"),
            "expires_at": "2024-08-01T10:30:00+05:45",
            "expires_in": 1800
        })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn khalti_checkout_settles_bill_after_lookup() {
    let server = MockServer::start().await;
    mount_initiate(&server, "pidx-ok").await;
    Mock::given(method("POST"))
        .and(path("/epayment/lookup/"))
        .and(body_partial_json(json!({ "pidx": "pidx-ok" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pidx": "pidx-ok",
            "total_amount": 124300,
            "status": "Completed",
            "transaction_id": "KHT-778899",
            "fee": 0,
            "refunded": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = khalti_app(&server).await;
    let fx = app.fixture("Lakeside Grill", "owner@lakeside.test").await;
    let bill = served_bill(&app, &fx).await;
    assert_eq!(money(&bill["total"]), dec!(1243));

    let (status, checkout) = app
        .post(&format!("/api/v1/guest/{}/khalti", fx.qr_token), json!({}), None)
        .await;
    assert_eq!(status, StatusCode::CREATED, "{checkout}");
    assert_eq!(checkout["data"]["pidx"], "pidx-ok");
    assert_eq!(money(&checkout["data"]["amount"]), dec!(1243));

    let (status, result) = app
        .get("/api/v1/payments/khalti/callback?pidx=pidx-ok", None)
        .await;
    assert_eq!(status, StatusCode::OK, "{result}");
    assert_eq!(result["data"]["payment"]["status"], "Completed");
    assert_eq!(result["data"]["payment"]["gateway_txn_id"], "KHT-778899");
    assert_eq!(result["data"]["bill_status"], "Paid");

    // Repeated callbacks are answered from the stored payment
    let (status, again) = app
        .get("/api/v1/payments/khalti/callback?pidx=pidx-ok", None)
        .await;
    assert_eq!(status, StatusCode::OK, "{again}");
    assert_eq!(again["data"]["bill_status"], "Paid");

    let (status, body) = app
        .get(&format!("/api/v1/bills/{}", bill["id"].as_str().unwrap()), Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "Paid");
    assert_eq!(body["data"]["payments"][0]["method"], "Khalti");
}

#[tokio::test]
async fn khalti_amount_mismatch_fails_the_payment() {
    let server = MockServer::start().await;
    mount_initiate(&server, "pidx-short").await;
    Mock::given(method("POST"))
        .and(path("/epayment/lookup/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pidx": "pidx-short",
            "total_amount": 1000,
            "status": "Completed",
            "transaction_id": "KHT-1",
            "fee": 0,
            "refunded": false
        })))
        .mount(&server)
        .await;

    let app = khalti_app(&server).await;
    let fx = app.fixture("Lakeside Grill", "owner@lakeside.test").await;
    let bill = served_bill(&app, &fx).await;
    let bill_id = bill["id"].as_str().expect("bill id");

    let (status, checkout) = app
        .post(&format!("/api/v1/bills/{bill_id}/khalti"), json!({}), Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{checkout}");

    let (status, result) = app
        .get("/api/v1/payments/khalti/callback?pidx=pidx-short", None)
        .await;
    assert_eq!(status, StatusCode::OK, "{result}");
    assert_eq!(result["data"]["payment"]["status"], "Failed");
    assert_eq!(result["data"]["bill_status"], "Unpaid");

    let (status, _) = app
        .get("/api/v1/payments/khalti/callback?pidx=unknown", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn khalti_is_unavailable_without_credentials() {
    let app = TestApp::new().await;
    let fx = app.fixture("Lakeside Grill", "owner@lakeside.test").await;
    let bill = served_bill(&app, &fx).await;

    let (status, _) = app
        .post(
            &format!("/api/v1/bills/{}/khalti", bill["id"].as_str().unwrap()),
            json!({}),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

async fn cbms_app(server: &MockServer) -> TestApp {
    let base_url = server.uri();
    TestApp::with_config(move |cfg| {
        cfg.cbms = CbmsConfig {
            enabled: true,
            base_url,
            username: Some("ird-user".to_string()),
            password: Some("ird-pass".to_string()),
            timeout_secs: 5,
        };
    })
    .await
}

#[tokio::test]
async fn issued_and_voided_bills_reach_cbms() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/bill"))
        .and(body_partial_json(json!({
            "username": "ird-user",
            "seller_pan": "301234567"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string("200"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/billreturn"))
        .and(body_partial_json(json!({ "reason_for_return": "wrong table" })))
        .respond_with(ResponseTemplate::new(200).set_body_string("200"))
        .mount(&server)
        .await;

    let app = cbms_app(&server).await;
    let fx = app.fixture("Durbar Dining", "owner@durbar.test").await;
    let (status, body) = app
        .put(
            "/api/v1/restaurant/settings",
            json!({ "cbms_enabled": true }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let bill = served_bill(&app, &fx).await;
    let bill_id = bill["id"].as_str().expect("bill id").to_string();
    assert_ne!(bill["cbms_status"], "NotApplicable");

    let (status, synced) = app
        .post(
            &format!("/api/v1/compliance/bills/{bill_id}/sync"),
            json!({}),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{synced}");
    assert_eq!(synced["data"]["cbms_status"], "Synced");

    let (status, voided) = app
        .post(
            &format!("/api/v1/bills/{bill_id}/void"),
            json!({ "reason": "wrong table" }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{voided}");
    assert_eq!(voided["data"]["status"], "Void");

    let (status, synced) = app
        .post(
            &format!("/api/v1/compliance/bills/{bill_id}/sync"),
            json!({}),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{synced}");
    assert_eq!(synced["data"]["cbms_status"], "Synced");

    let (status, register) = app
        .get("/api/v1/compliance/sales-register", Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::OK, "{register}");
    let entry = register["data"]
        .as_array()
        .expect("register")
        .iter()
        .find(|e| e["bill_no"] == bill["invoice_number"])
        .cloned()
        .expect("bill in register");
    assert_eq!(entry["sync_with_ird"], true);
    assert_eq!(entry["is_bill_active"], false);
    assert_eq!(money(&entry["total_amount"]), dec!(1243));

    // Printing a void bill is refused
    let (status, _) = app
        .post(&format!("/api/v1/bills/{bill_id}/print"), json!({}), Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rejected_bills_are_retried_by_sync_pending() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/bill"))
        .respond_with(ResponseTemplate::new(200).set_body_string("102"))
        .up_to_n_times(2)
        .mount(&server)
        .await;

    let app = cbms_app(&server).await;
    let fx = app.fixture("Durbar Dining", "owner@durbar.test").await;
    app.put(
        "/api/v1/restaurant/settings",
        json!({ "cbms_enabled": true }),
        Some(&fx.owner_token),
    )
    .await;
    let bill = served_bill(&app, &fx).await;
    let bill_id = id_of(&json!({ "data": bill }));

    let (status, body) = app
        .post(
            &format!("/api/v1/compliance/bills/{bill_id}/sync"),
            json!({}),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["cbms_status"], "Failed");
    assert!(body["data"]["cbms_response"].is_string());

    // IRD accepts it on the next attempt
    server.reset().await;
    Mock::given(method("POST"))
        .and(path("/api/bill"))
        .respond_with(ResponseTemplate::new(200).set_body_string("200"))
        .mount(&server)
        .await;

    let (status, summary) = app
        .post("/api/v1/compliance/sync-pending", json!({}), Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::OK, "{summary}");
    assert_eq!(summary["data"]["failed"], 0);

    let (_, body) = app
        .get(&format!("/api/v1/bills/{bill_id}"), Some(&fx.owner_token))
        .await;
    assert_eq!(body["data"]["cbms_status"], "Synced");
}

#[tokio::test]
async fn restaurant_cbms_flag_is_inert_while_the_platform_is_off() {
    let app = TestApp::new().await;
    let fx = app.fixture("Durbar Dining", "owner@durbar.test").await;
    let (status, body) = app
        .put(
            "/api/v1/restaurant/settings",
            json!({ "cbms_enabled": true }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["cbms_enabled"], true);

    let bill = served_bill(&app, &fx).await;
    assert_eq!(bill["cbms_status"], "NotApplicable");

    let (status, body) = app
        .post("/api/v1/compliance/sync-pending", json!({}), Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}
