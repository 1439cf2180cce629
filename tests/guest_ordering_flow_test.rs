mod common;

use axum::http::StatusCode;
use common::{id_of, money, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;

#[tokio::test]
async fn qr_order_to_paid_bill_and_clean_table() {
    let app = TestApp::new().await;
    let fx = app.fixture("Himalayan Kitchen", "owner@himalayan.test").await;
    let cashier = app
        .create_staff(&fx.owner_token, "cashier@himalayan.test", "cashier")
        .await;
    let guest = format!("/api/v1/guest/{}", fx.qr_token);

    // Scan before anyone sits down
    let (status, body) = app.get(&guest, None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["table_name"], "T1");
    assert!(body["data"]["session"].is_null());

    let (status, body) = app.get(&format!("{guest}/menu"), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"].as_array().map(Vec::len), Some(2));

    let (status, body) = app
        .post(&format!("{guest}/session"), json!({ "guest_count": 2 }), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "Active");
    let session_id = id_of(&body);

    // Guest orders wait for a waiter
    let (status, order) = app
        .post(
            &format!("{guest}/orders"),
            json!({
                "items": [
                    { "menu_item_id": fx.momo_id, "quantity": 2 },
                    { "menu_item_id": fx.lemonade_id, "quantity": 1, "notes": "less sugar" }
                ]
            }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(order["data"]["status"], "Pending");
    assert_eq!(order["data"]["source"], "Guest");
    let order_id = id_of(&order);

    let (status, confirmed) = app
        .post(
            &format!("/api/v1/orders/{order_id}/confirm"),
            json!({}),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{confirmed}");
    assert_eq!(confirmed["data"]["status"], "Confirmed");

    let (status, queue) = app
        .get("/api/v1/kitchen/queue?station=Kitchen", Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::OK, "{queue}");
    let tickets = queue["data"].as_array().expect("tickets");
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0]["items"][0]["name"], "Buff Momo");

    let (status, body) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/customer"),
            json!({ "phone": "+977 9841000001", "name": "Sita" }),
            Some(&cashier),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let customer_id = body["data"]["customer_id"]
        .as_str()
        .expect("customer attached")
        .to_string();

    // Nothing is billed while food is still in the kitchen
    let (status, body) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/bill"),
            json!({}),
            Some(&cashier),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    app.cook_and_serve(&fx.owner_token, &confirmed["data"]).await;

    let (status, body) = app.post(&format!("{guest}/request-bill"), json!({}), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "BillRequested");

    let (status, bill) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/bill"),
            json!({}),
            Some(&cashier),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{bill}");
    let bill = &bill["data"];
    assert_eq!(money(&bill["subtotal"]), dec!(1000));
    assert_eq!(money(&bill["service_charge"]), dec!(100));
    assert_eq!(money(&bill["taxable_amount"]), dec!(1100));
    assert_eq!(money(&bill["vat_amount"]), dec!(143));
    assert_eq!(money(&bill["total"]), dec!(1243));
    assert_eq!(bill["status"], "Unpaid");
    assert_eq!(bill["lines"].as_array().map(Vec::len), Some(2));
    let bill_id = bill["id"].as_str().expect("bill id").to_string();

    let (status, body) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/bill"),
            json!({}),
            Some(&cashier),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (status, body) = app.get(&format!("{guest}/bill"), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(money(&body["data"]["total"]), dec!(1243));

    let (status, receipt) = app
        .post(
            &format!("/api/v1/bills/{bill_id}/payments"),
            json!({ "method": "Cash", "amount": "1243", "tendered": "1300" }),
            Some(&cashier),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{receipt}");
    assert_eq!(money(&receipt["data"]["change_due"]), dec!(57));
    assert_eq!(receipt["data"]["bill"]["status"], "Paid");
    assert_eq!(receipt["data"]["points_earned"], 12);

    let (status, tables) = app.get("/api/v1/tables", Some(&fx.owner_token)).await;
    assert_eq!(status, StatusCode::OK, "{tables}");
    assert_eq!(tables["data"][0]["status"], "Cleaning");

    let (status, body) = app
        .post(
            &format!("/api/v1/tables/{}/clean", fx.table_id),
            json!({}),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "Available");

    let (status, session) = app
        .get(&format!("/api/v1/sessions/{session_id}"), Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::OK, "{session}");
    assert_eq!(session["data"]["status"], "Closed");

    let (status, customer) = app
        .get(&format!("/api/v1/customers/{customer_id}"), Some(&cashier))
        .await;
    assert_eq!(status, StatusCode::OK, "{customer}");
    assert_eq!(customer["data"]["phone"], "9841000001");
    assert_eq!(customer["data"]["points_balance"], 12);

    let tb = app.trial_balance(&fx.owner_token).await;
    assert_eq!(tb["is_balanced"], true);
    assert_eq!(money(&tb["total_debit"]), money(&tb["total_credit"]));
    assert!(money(&tb["total_debit"]) >= dec!(1243));
}

#[tokio::test]
async fn guest_cannot_order_without_joining_the_table() {
    let app = TestApp::new().await;
    let fx = app.fixture("Thakali House", "owner@thakali.test").await;

    let (status, body) = app
        .post(
            &format!("/api/v1/guest/{}/orders", fx.qr_token),
            json!({ "items": [{ "menu_item_id": fx.momo_id, "quantity": 1 }] }),
            None,
        )
        .await;
    assert!(status.is_client_error(), "{status}: {body}");

    let (status, _) = app.get("/api/v1/guest/not-a-real-token", None).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn staff_orders_skip_confirmation_and_redeem_points() {
    let app = TestApp::new().await;
    let fx = app.fixture("Newa Bhoj", "owner@newa.test").await;
    let session_id = app.open_session(&fx.owner_token, &fx.table_id).await;

    let (status, order) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/orders"),
            json!({ "items": [{ "menu_item_id": fx.momo_id, "quantity": 5 }] }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(order["data"]["status"], "Confirmed");
    assert_eq!(order["data"]["source"], "Staff");

    let (status, body) = app
        .post(
            "/api/v1/customers",
            json!({ "name": "Ram", "phone": "9801234567" }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let customer_id = id_of(&body);

    let (status, body) = app
        .post(
            &format!("/api/v1/customers/{customer_id}/points"),
            json!({ "points": 150, "note": "opening balance" }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/customer"),
            json!({ "phone": "9801234567" }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    app.cook_and_serve(&fx.owner_token, &order["data"]).await;

    // Below the redemption minimum
    let (status, body) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/bill"),
            json!({ "redeem_points": 50 }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, bill) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/bill"),
            json!({ "redeem_points": 100 }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{bill}");
    let bill = &bill["data"];
    assert_eq!(money(&bill["subtotal"]), dec!(2000));
    assert_eq!(money(&bill["loyalty_discount"]), dec!(100));
    assert_eq!(bill["loyalty_points_redeemed"], 100);
    // (2000 - 100) + 190 service charge, then 13% VAT on 2090
    assert_eq!(money(&bill["service_charge"]), dec!(190));
    assert_eq!(money(&bill["vat_amount"]), dec!(271.70));
    assert_eq!(money(&bill["total"]), dec!(2361.70));

    let (status, customer) = app
        .get(&format!("/api/v1/customers/{customer_id}"), Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::OK, "{customer}");
    assert_eq!(customer["data"]["points_balance"], 50);

    let (status, history) = app
        .get(
            &format!("/api/v1/customers/{customer_id}/loyalty"),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{history}");
    let kinds: Vec<&str> = history["data"]
        .as_array()
        .expect("history")
        .iter()
        .filter_map(|t| t["kind"].as_str())
        .collect();
    assert!(kinds.contains(&"Adjust"));
    assert!(kinds.contains(&"Redeem"));
}

#[tokio::test]
async fn split_payment_keeps_bill_open_until_settled() {
    let app = TestApp::new().await;
    let fx = app.fixture("Bhojan Griha", "owner@bhojan.test").await;
    let session_id = app.open_session(&fx.owner_token, &fx.table_id).await;

    let (_, order) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/orders"),
            json!({ "items": [{ "menu_item_id": fx.lemonade_id, "quantity": 5 }] }),
            Some(&fx.owner_token),
        )
        .await;
    app.cook_and_serve(&fx.owner_token, &order["data"]).await;

    let (status, bill) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/bill"),
            json!({}),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{bill}");
    let bill_id = id_of(&bill);
    assert_eq!(money(&bill["data"]["total"]), dec!(1243));

    let (status, body) = app
        .post(
            &format!("/api/v1/bills/{bill_id}/payments"),
            json!({ "method": "Card", "amount": "1300" }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "overpayment: {body}");

    let (status, body) = app
        .post(
            &format!("/api/v1/bills/{bill_id}/payments"),
            json!({ "method": "Card", "amount": "1000" }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["bill"]["status"], "PartiallyPaid");

    let (status, body) = app
        .post(
            &format!("/api/v1/bills/{bill_id}/payments"),
            json!({ "method": "Cash", "amount": "243" }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["bill"]["status"], "Paid");
    assert_eq!(body["data"]["points_earned"], 0);

    let (status, printed) = app
        .post(&format!("/api/v1/bills/{bill_id}/print"), json!({}), Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::OK, "{printed}");
    assert!(printed["data"]["copy_label"].is_null());
    assert_eq!(printed["data"]["payments"].as_array().map(Vec::len), Some(2));

    let (_, reprint) = app
        .post(&format!("/api/v1/bills/{bill_id}/print"), json!({}), Some(&fx.owner_token))
        .await;
    assert!(reprint["data"]["copy_label"].is_string());
}

#[tokio::test]
async fn a_table_holds_one_open_session() {
    let app = TestApp::new().await;
    let fx = app.fixture("Patan Durbar Cafe", "owner@patan.test").await;
    let session_id = app.open_session(&fx.owner_token, &fx.table_id).await;

    let (status, body) = app
        .post(
            &format!("/api/v1/tables/{}/sessions", fx.table_id),
            json!({ "guest_count": 3 }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    // A guest scanning the occupied table joins the running session
    let (status, body) = app
        .post(
            &format!("/api/v1/guest/{}/session", fx.qr_token),
            json!({ "guest_count": 1 }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(id_of(&body), session_id);
}

#[tokio::test]
async fn fully_discounted_bill_is_settled_on_issue() {
    let app = TestApp::new().await;
    let fx = app.fixture("Bhaktapur Bhoj", "owner@bhaktapur.test").await;
    let session_id = app.open_session(&fx.owner_token, &fx.table_id).await;

    let (status, order) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/orders"),
            json!({ "items": [{ "menu_item_id": fx.momo_id, "quantity": 2 }] }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    app.cook_and_serve(&fx.owner_token, &order["data"]).await;

    let (status, bill) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/bill"),
            json!({ "discount": "800" }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{bill}");
    let bill_id = id_of(&bill);
    assert_eq!(money(&bill["data"]["subtotal"]), dec!(800));
    assert_eq!(money(&bill["data"]["discount"]), dec!(800));
    assert_eq!(money(&bill["data"]["total"]), dec!(0));
    assert_eq!(bill["data"]["status"], "Paid");

    let (status, tables) = app.get("/api/v1/tables", Some(&fx.owner_token)).await;
    assert_eq!(status, StatusCode::OK, "{tables}");
    assert_eq!(tables["data"][0]["status"], "Cleaning");

    let (status, body) = app
        .post(
            &format!("/api/v1/bills/{bill_id}/payments"),
            json!({ "method": "Cash", "amount": "1" }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    // Discount allowed against food sales
    let tb = app.trial_balance(&fx.owner_token).await;
    assert_eq!(tb["is_balanced"], true);
    assert_eq!(money(&tb["total_debit"]), dec!(800));
}

#[tokio::test]
async fn simultaneous_partial_payments_both_count() {
    let app = TestApp::new().await;
    let fx = app.fixture("Boudha Stupa Kitchen", "owner@boudha.test").await;
    let session_id = app.open_session(&fx.owner_token, &fx.table_id).await;

    let (_, order) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/orders"),
            json!({ "items": [{ "menu_item_id": fx.lemonade_id, "quantity": 5 }] }),
            Some(&fx.owner_token),
        )
        .await;
    app.cook_and_serve(&fx.owner_token, &order["data"]).await;
    let (status, bill) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/bill"),
            json!({}),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{bill}");
    let bill_id = id_of(&bill);
    let uri = format!("/api/v1/bills/{bill_id}/payments");

    let (card, cash) = tokio::join!(
        app.post(
            &uri,
            json!({ "method": "Card", "amount": "600" }),
            Some(&fx.owner_token)
        ),
        app.post(
            &uri,
            json!({ "method": "Cash", "amount": "643" }),
            Some(&fx.owner_token)
        ),
    );
    assert_eq!(card.0, StatusCode::CREATED, "{}", card.1);
    assert_eq!(cash.0, StatusCode::CREATED, "{}", cash.1);

    let (status, body) = app
        .get(&format!("/api/v1/bills/{bill_id}"), Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "Paid");
    assert_eq!(money(&body["data"]["paid_amount"]), dec!(1243));
    assert_eq!(body["data"]["payments"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn customers_are_found_by_any_phone_spelling() {
    let app = TestApp::new().await;
    let fx = app.fixture("Kathmandu Kitchen", "owner@ktm.test").await;

    let (status, body) = app
        .post(
            "/api/v1/customers",
            json!({ "name": "Gita", "phone": "9812345678" }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let customer_id = id_of(&body);

    for phone in ["9812345678", "%2B977-9812345678", "977%209812345678"] {
        let (status, body) = app
            .get(
                &format!("/api/v1/customer-lookup?phone={phone}"),
                Some(&fx.owner_token),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{phone}: {body}");
        assert_eq!(id_of(&body), customer_id);
        assert_eq!(body["data"]["phone"], "9812345678");
    }

    let (status, _) = app
        .get("/api/v1/customer-lookup?phone=9800000000", Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .get("/api/v1/customer-lookup?phone=12345", Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reports_count_paid_bills_and_dashboard_hides_money_from_stations() {
    let app = TestApp::new().await;
    let fx = app.fixture("Pokhara Lakeside", "owner@pokhara.test").await;
    let kitchen = app
        .create_staff(&fx.owner_token, "kitchen@pokhara.test", "kitchen")
        .await;
    let session_id = app.open_session(&fx.owner_token, &fx.table_id).await;

    let (_, order) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/orders"),
            json!({ "items": [
                { "menu_item_id": fx.momo_id, "quantity": 2 },
                { "menu_item_id": fx.lemonade_id, "quantity": 3 }
            ] }),
            Some(&fx.owner_token),
        )
        .await;
    app.cook_and_serve(&fx.owner_token, &order["data"]).await;
    let (status, bill) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/bill"),
            json!({}),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{bill}");
    let bill_id = id_of(&bill);
    // 1400 + 140 service charge, 13% VAT on 1540
    assert_eq!(money(&bill["data"]["total"]), dec!(1740.20));

    // Unpaid bills are not sales yet
    let (status, rows) = app
        .get("/api/v1/reports/item-sales", Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::OK, "{rows}");
    assert_eq!(rows["data"].as_array().map(Vec::len), Some(0));

    let (status, dash) = app.get("/api/v1/dashboard", Some(&fx.owner_token)).await;
    assert_eq!(status, StatusCode::OK, "{dash}");
    assert_eq!(dash["data"]["unpaid_bills"], 1);
    assert_eq!(dash["data"]["tables_awaiting_bill"], 1);

    let (status, body) = app
        .post(
            &format!("/api/v1/bills/{bill_id}/payments"),
            json!({ "method": "Cash", "amount": "1740.20" }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, summary) = app
        .get("/api/v1/reports/sales-summary", Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::OK, "{summary}");
    let summary = &summary["data"];
    assert_eq!(summary["bill_count"], 1);
    assert_eq!(money(&summary["gross_sales"]), dec!(1400));
    assert_eq!(money(&summary["service_charge"]), dec!(140));
    assert_eq!(money(&summary["vat"]), dec!(200.20));
    assert_eq!(money(&summary["net_total"]), dec!(1740.20));
    assert_eq!(summary["by_method"][0]["method"], "Cash");
    assert_eq!(money(&summary["by_method"][0]["amount"]), dec!(1740.20));

    let (status, rows) = app
        .get("/api/v1/reports/item-sales", Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::OK, "{rows}");
    let rows = rows["data"].as_array().expect("rows").clone();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["name"], "Buff Momo");
    assert_eq!(rows[0]["quantity"], 2);
    assert_eq!(money(&rows[0]["amount"]), dec!(800));
    assert_eq!(rows[1]["name"], "Lemonade");
    assert_eq!(money(&rows[1]["amount"]), dec!(600));

    let (status, _) = app
        .get("/api/v1/reports/sales-summary?from=2024-02-01&to=2024-01-01", Some(&fx.owner_token))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, dash) = app.get("/api/v1/dashboard", Some(&fx.owner_token)).await;
    assert_eq!(status, StatusCode::OK, "{dash}");
    assert_eq!(dash["data"]["unpaid_bills"], 0);
    assert_eq!(dash["data"]["tables_to_clean"], 1);
    assert_eq!(money(&dash["data"]["today_sales"]), dec!(1740.20));

    // Stations get their queue counters only
    let (status, dash) = app.get("/api/v1/dashboard", Some(&kitchen)).await;
    assert_eq!(status, StatusCode::OK, "{dash}");
    assert!(dash["data"]["today_sales"].is_null());
    assert!(dash["data"]["unpaid_bills"].is_null());
    assert_eq!(dash["data"]["tables_to_clean"], 0);

    let (status, _) = app
        .get("/api/v1/reports/sales-summary", Some(&kitchen))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
