mod common;

use axum::http::StatusCode;
use common::{id_of, money, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

async fn on_hand(app: &TestApp, token: &str, stock_item_id: &str) -> Decimal {
    let (status, body) = app
        .get(&format!("/api/v1/stock-items/{stock_item_id}"), Some(token))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    money(&body["data"]["quantity"])
}

#[tokio::test]
async fn purchase_consume_waste_and_alert() {
    let app = TestApp::new().await;
    let fx = app.fixture("Momo Ghar", "owner@momoghar.test").await;
    let token = fx.owner_token.as_str();

    let (status, body) = app
        .post(
            "/api/v1/stock-items",
            json!({ "name": "Buff mince", "unit": "kg", "reorder_level": "2" }),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let mince = id_of(&body);

    let (status, body) = app
        .post(
            "/api/v1/vendors",
            json!({ "name": "Kalimati Meat Suppliers", "pan_number": "609876543" }),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let vendor = id_of(&body);

    let purchase = json!({
        "vendor_id": vendor,
        "bill_number": "KMS-0042",
        "payment_mode": "Credit",
        "vat_applicable": true,
        "lines": [{ "stock_item_id": mince, "quantity": "10", "rate": "500" }]
    });
    let (status, body) = app.post("/api/v1/purchases", purchase.clone(), Some(token)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(money(&body["data"]["subtotal"]), dec!(5000));
    assert_eq!(money(&body["data"]["vat_amount"]), dec!(650));
    assert_eq!(money(&body["data"]["total"]), dec!(5650));
    assert!(body["data"]["voucher_id"].is_string());
    let purchase_id = id_of(&body);

    let (status, _) = app.post("/api/v1/purchases", purchase, Some(token)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .get(&format!("/api/v1/purchases/{purchase_id}"), Some(token))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["lines"].as_array().map(Vec::len), Some(1));

    assert_eq!(on_hand(&app, token, &mince).await, dec!(10));

    let (status, body) = app
        .put(
            &format!("/api/v1/menu/items/{}/recipe", fx.momo_id),
            json!({ "lines": [{ "stock_item_id": mince, "quantity": "0.25" }] }),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // Staff orders are confirmed on the spot, so stock moves immediately
    let session_id = app.open_session(token, &fx.table_id).await;
    let (status, order) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/orders"),
            json!({ "items": [{ "menu_item_id": fx.momo_id, "quantity": 4 }] }),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(on_hand(&app, token, &mince).await, dec!(9));

    // Cancelling before the kitchen starts puts the stock back
    let (status, body) = app
        .post(
            &format!("/api/v1/orders/{}/cancel", id_of(&order)),
            json!({ "reason": "guest left" }),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(on_hand(&app, token, &mince).await, dec!(10));

    let (status, body) = app
        .post(
            &format!("/api/v1/stock-items/{mince}/wastage"),
            json!({ "quantity": "8", "reason": "freezer failure" }),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(money(&body["data"]["quantity"]), dec!(2));

    let (status, alerts) = app.get("/api/v1/stock-alerts", Some(token)).await;
    assert_eq!(status, StatusCode::OK, "{alerts}");
    assert!(alerts["data"]
        .as_array()
        .expect("alerts")
        .iter()
        .any(|s| s["id"] == mince.as_str()));

    let (status, movements) = app
        .get(&format!("/api/v1/stock-items/{mince}/movements"), Some(token))
        .await;
    assert_eq!(status, StatusCode::OK, "{movements}");
    let kinds: Vec<&str> = movements["data"]
        .as_array()
        .expect("movements")
        .iter()
        .filter_map(|m| m["kind"].as_str())
        .collect();
    for kind in ["Purchase", "Consumption", "ConsumptionReversal", "Wastage"] {
        assert!(kinds.contains(&kind), "missing {kind} movement in {kinds:?}");
    }

    // Purchase on credit plus wastage at 500/kg
    let tb = app.trial_balance(token).await;
    assert_eq!(tb["is_balanced"], true);
    assert_eq!(money(&tb["total_debit"]), dec!(9650));

    let (status, ledger) = app
        .get(
            &format!("/api/v1/accounts/{}/ledger", app.account_id(token, "5300").await),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{ledger}");
    assert_eq!(money(&ledger["data"]["closing_balance"]), dec!(4000));
}

#[tokio::test]
async fn guest_orders_consume_stock_only_when_confirmed() {
    let app = TestApp::new().await;
    let fx = app.fixture("Momo Ghar", "owner@momoghar.test").await;
    let token = fx.owner_token.as_str();

    let (_, body) = app
        .post(
            "/api/v1/stock-items",
            json!({ "name": "Lemon", "unit": "pcs" }),
            Some(token),
        )
        .await;
    let lemon = id_of(&body);
    let (status, body) = app
        .post(
            &format!("/api/v1/stock-items/{lemon}/adjust"),
            json!({ "delta": "20", "reason": "opening count" }),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, _) = app
        .post(
            &format!("/api/v1/stock-items/{lemon}/adjust"),
            json!({ "delta": "0", "reason": "nothing" }),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.put(
        &format!("/api/v1/menu/items/{}/recipe", fx.lemonade_id),
        json!({ "lines": [{ "stock_item_id": lemon, "quantity": "1" }] }),
        Some(token),
    )
    .await;

    let guest = format!("/api/v1/guest/{}", fx.qr_token);
    app.post(&format!("{guest}/session"), json!({ "guest_count": 1 }), None)
        .await;
    let (status, order) = app
        .post(
            &format!("{guest}/orders"),
            json!({ "items": [{ "menu_item_id": fx.lemonade_id, "quantity": 3 }] }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(on_hand(&app, token, &lemon).await, dec!(20));

    let (status, _) = app
        .post(
            &format!("/api/v1/orders/{}/confirm", id_of(&order)),
            json!({}),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(on_hand(&app, token, &lemon).await, dec!(17));

    // Confirming twice is rejected and does not consume again
    let (status, _) = app
        .post(
            &format!("/api/v1/orders/{}/confirm", id_of(&order)),
            json!({}),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(on_hand(&app, token, &lemon).await, dec!(17));
}

#[tokio::test]
async fn unavailable_items_cannot_be_ordered() {
    let app = TestApp::new().await;
    let fx = app.fixture("Momo Ghar", "owner@momoghar.test").await;
    let token = fx.owner_token.as_str();

    let (status, body) = app
        .put(
            &format!("/api/v1/menu/items/{}/availability", fx.momo_id),
            json!({ "is_available": false }),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["is_available"], false);

    let (_, menu) = app
        .get(&format!("/api/v1/guest/{}/menu", fx.qr_token), None)
        .await;
    let listed: Vec<&str> = menu["data"]
        .as_array()
        .expect("sections")
        .iter()
        .flat_map(|s| s["items"].as_array().into_iter().flatten())
        .filter_map(|i| i["id"].as_str())
        .collect();
    assert!(!listed.contains(&fx.momo_id.as_str()));

    let session_id = app.open_session(token, &fx.table_id).await;
    let (status, _) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/orders"),
            json!({ "items": [{ "menu_item_id": fx.momo_id, "quantity": 1 }] }),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancelling_an_item_returns_its_stock_and_rederives_the_order() {
    let app = TestApp::new().await;
    let fx = app.fixture("Momo Ghar", "owner@momoghar.test").await;
    let token = fx.owner_token.as_str();

    let (_, body) = app
        .post(
            "/api/v1/stock-items",
            json!({ "name": "Lemon", "unit": "pcs" }),
            Some(token),
        )
        .await;
    let lemon = id_of(&body);
    app.post(
        &format!("/api/v1/stock-items/{lemon}/adjust"),
        json!({ "delta": "20", "reason": "opening count" }),
        Some(token),
    )
    .await;
    app.put(
        &format!("/api/v1/menu/items/{}/recipe", fx.lemonade_id),
        json!({ "lines": [{ "stock_item_id": lemon, "quantity": "1" }] }),
        Some(token),
    )
    .await;

    let session_id = app.open_session(token, &fx.table_id).await;
    let (status, order) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/orders"),
            json!({ "items": [
                { "menu_item_id": fx.momo_id, "quantity": 1 },
                { "menu_item_id": fx.lemonade_id, "quantity": 2 }
            ] }),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(on_hand(&app, token, &lemon).await, dec!(18));

    let item_for = |menu_item_id: &str| {
        order["data"]["items"]
            .as_array()
            .expect("items")
            .iter()
            .find(|i| i["menu_item_id"] == menu_item_id)
            .and_then(|i| i["id"].as_str())
            .expect("order item")
            .to_string()
    };
    let lemonade_item = item_for(fx.lemonade_id.as_str());
    let momo_item = item_for(fx.momo_id.as_str());

    let (status, body) = app
        .post(
            &format!("/api/v1/order-items/{lemonade_item}/cancel"),
            json!({}),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "Confirmed");
    assert_eq!(on_hand(&app, token, &lemon).await, dec!(20));

    // Already cancelled
    let (status, _) = app
        .post(
            &format!("/api/v1/order-items/{lemonade_item}/cancel"),
            json!({}),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(on_hand(&app, token, &lemon).await, dec!(20));

    // Once the kitchen has started, the item stays
    let (status, body) = app
        .put(
            &format!("/api/v1/order-items/{momo_item}/status"),
            json!({ "status": "Preparing" }),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let (status, _) = app
        .post(
            &format!("/api/v1/order-items/{momo_item}/cancel"),
            json!({}),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Cancelling the last live item cancels the order
    let (status, second) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/orders"),
            json!({ "items": [{ "menu_item_id": fx.lemonade_id, "quantity": 3 }] }),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{second}");
    assert_eq!(on_hand(&app, token, &lemon).await, dec!(17));
    let only_item = second["data"]["items"][0]["id"]
        .as_str()
        .expect("item id")
        .to_string();
    let (status, body) = app
        .post(
            &format!("/api/v1/order-items/{only_item}/cancel"),
            json!({}),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "Cancelled");
    assert_eq!(on_hand(&app, token, &lemon).await, dec!(20));
}

#[tokio::test]
async fn purchases_from_unregistered_restaurants_carry_no_vat() {
    let app = TestApp::new().await;
    let fx = app.fixture("Momo Ghar", "owner@momoghar.test").await;
    let token = fx.owner_token.as_str();

    let (status, body) = app
        .put(
            "/api/v1/restaurant/settings",
            json!({ "vat_registered": false }),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (_, body) = app
        .post(
            "/api/v1/stock-items",
            json!({ "name": "Flour", "unit": "kg" }),
            Some(token),
        )
        .await;
    let flour = id_of(&body);
    let (_, body) = app
        .post(
            "/api/v1/vendors",
            json!({ "name": "Bhatbhateni Wholesale" }),
            Some(token),
        )
        .await;
    let vendor = id_of(&body);

    let (status, body) = app
        .post(
            "/api/v1/purchases",
            json!({
                "vendor_id": vendor,
                "bill_number": "BW-7",
                "payment_mode": "Cash",
                "vat_applicable": true,
                "lines": [{ "stock_item_id": flour, "quantity": "25", "rate": "80" }]
            }),
            Some(token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(money(&body["data"]["subtotal"]), dec!(2000));
    assert_eq!(money(&body["data"]["vat_amount"]), dec!(0));
    assert_eq!(money(&body["data"]["total"]), dec!(2000));
}
