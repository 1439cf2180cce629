mod common;

use axum::http::StatusCode;
use common::{id_of, TestApp, OWNER_PASSWORD};
use rstest::rstest;
use serde_json::json;

#[tokio::test]
async fn staff_endpoints_require_a_token() {
    let app = TestApp::new().await;

    let (status, _) = app.get("/api/v1/tables", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/api/v1/tables", Some("not.a.jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.get("/api/v1/health", None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["checks"]["database"], "healthy");
}

#[tokio::test]
async fn login_rejects_bad_credentials() {
    let app = TestApp::new().await;
    app.create_restaurant("Everest Diner", "owner@everest.test").await;

    let (status, _) = app
        .post(
            "/api/v1/auth/login",
            json!({ "email": "owner@everest.test", "password": "wrong-password" }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = app.login("owner@everest.test", OWNER_PASSWORD).await;
    let (status, me) = app.get("/api/v1/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK, "{me}");
    assert_eq!(me["data"]["role"], "owner");
}

#[tokio::test]
async fn only_platform_admins_onboard_restaurants() {
    let app = TestApp::new().await;
    let (restaurant_id, owner) = app.create_restaurant("Everest Diner", "owner@everest.test").await;

    let (status, _) = app
        .post(
            "/api/v1/restaurants",
            json!({
                "name": "Sneaky",
                "owner_name": "X",
                "owner_email": "x@sneaky.test",
                "owner_password": "password-123"
            }),
            Some(&owner),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.get("/api/v1/restaurants", Some(&owner)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = app.admin_token().await;
    let (status, list) = app.get("/api/v1/restaurants", Some(&admin)).await;
    assert_eq!(status, StatusCode::OK, "{list}");
    assert!(list["data"]
        .as_array()
        .expect("restaurants")
        .iter()
        .any(|r| r["id"] == restaurant_id.as_str()));

    // New tenants start with the standard chart of accounts
    let (status, accounts) = app.get("/api/v1/accounts", Some(&owner)).await;
    assert_eq!(status, StatusCode::OK, "{accounts}");
    let codes: Vec<&str> = accounts["data"]
        .as_array()
        .expect("accounts")
        .iter()
        .filter_map(|a| a["code"].as_str())
        .collect();
    for code in ["1110", "1140", "2100", "2200", "3100", "4100", "4200", "4300", "5100", "5300"] {
        assert!(codes.contains(&code), "missing account {code}");
    }
}

#[rstest]
#[case::waiter_cannot_bill("waiter", "POST", "/bills")]
#[case::kitchen_cannot_take_payments("kitchen", "POST", "/payments")]
#[case::cashier_cannot_edit_menu("cashier", "POST", "/menu")]
#[case::accountant_cannot_order("accountant", "POST", "/orders")]
#[case::manager_cannot_touch_chart("manager", "POST", "/accounts")]
#[tokio::test]
async fn roles_are_limited_to_their_permissions(
    #[case] role: &str,
    #[case] method: &str,
    #[case] target: &str,
) {
    let app = TestApp::new().await;
    let fx = app.fixture("Everest Diner", "owner@everest.test").await;
    let token = app
        .create_staff(&fx.owner_token, &format!("{role}@everest.test"), role)
        .await;
    let session_id = app.open_session(&fx.owner_token, &fx.table_id).await;

    let (uri, body) = match target {
        "/bills" => (format!("/api/v1/sessions/{session_id}/bill"), json!({})),
        "/payments" => (
            format!("/api/v1/bills/{}/payments", uuid::Uuid::new_v4()),
            json!({ "method": "Cash", "amount": "10" }),
        ),
        "/menu" => (
            "/api/v1/menu/items".to_string(),
            json!({ "category_id": fx.kitchen_category_id, "name": "Sel Roti", "price": "50" }),
        ),
        "/orders" => (
            format!("/api/v1/sessions/{session_id}/orders"),
            json!({ "items": [{ "menu_item_id": fx.momo_id, "quantity": 1 }] }),
        ),
        "/accounts" => (
            "/api/v1/accounts".to_string(),
            json!({ "code": "1199", "name": "Petty Cash", "account_type": "Asset" }),
        ),
        other => panic!("unknown target {other}"),
    };
    assert_eq!(method, "POST");
    let (status, body) = app.post(&uri, body, Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{role} {uri}: {body}");
}

#[tokio::test]
async fn stations_only_see_their_own_queue() {
    let app = TestApp::new().await;
    let fx = app.fixture("Everest Diner", "owner@everest.test").await;
    let bar = app
        .create_staff(&fx.owner_token, "bar@everest.test", "bar")
        .await;
    let kitchen = app
        .create_staff(&fx.owner_token, "kitchen@everest.test", "kitchen")
        .await;
    let session_id = app.open_session(&fx.owner_token, &fx.table_id).await;

    let (status, order) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/orders"),
            json!({ "items": [
                { "menu_item_id": fx.momo_id, "quantity": 1 },
                { "menu_item_id": fx.lemonade_id, "quantity": 1 }
            ] }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(order["data"]["tickets"].as_array().map(Vec::len), Some(2));

    let (status, _) = app
        .get("/api/v1/kitchen/queue?station=Kitchen", Some(&bar))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, queue) = app.get("/api/v1/kitchen/queue", Some(&bar)).await;
    assert_eq!(status, StatusCode::OK, "{queue}");
    let tickets = queue["data"].as_array().expect("tickets");
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0]["station"], "Bar");

    let momo_item = order["data"]["items"]
        .as_array()
        .expect("items")
        .iter()
        .find(|i| i["station"] == "Kitchen")
        .and_then(|i| i["id"].as_str())
        .expect("kitchen item")
        .to_string();

    let (status, _) = app
        .put(
            &format!("/api/v1/order-items/{momo_item}/status"),
            json!({ "status": "Preparing" }),
            Some(&bar),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .put(
            &format!("/api/v1/order-items/{momo_item}/status"),
            json!({ "status": "Ready" }),
            Some(&kitchen),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    // Items never move backwards
    let (status, _) = app
        .put(
            &format!("/api/v1/order-items/{momo_item}/status"),
            json!({ "status": "Preparing" }),
            Some(&kitchen),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tenants_cannot_see_each_other() {
    let app = TestApp::new().await;
    let a = app.fixture("Everest Diner", "owner@everest.test").await;
    let b = app.fixture("Annapurna Cafe", "owner@annapurna.test").await;

    let (status, _) = app
        .get(&format!("/api/v1/tables/{}/qr", a.table_id), Some(&b.owner_token))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .post(
            &format!("/api/v1/tables/{}/sessions", a.table_id),
            json!({ "guest_count": 2 }),
            Some(&b.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, items) = app.get("/api/v1/menu/items", Some(&b.owner_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(items["data"]
        .as_array()
        .expect("items")
        .iter()
        .all(|i| i["id"] != a.momo_id.as_str()));

    let session_id = app.open_session(&b.owner_token, &b.table_id).await;
    let (status, _) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/orders"),
            json!({ "items": [{ "menu_item_id": a.momo_id, "quantity": 1 }] }),
            Some(&b.owner_token),
        )
        .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn deactivated_staff_cannot_log_in() {
    let app = TestApp::new().await;
    let fx = app.fixture("Everest Diner", "owner@everest.test").await;
    app.create_staff(&fx.owner_token, "waiter@everest.test", "waiter")
        .await;

    let (_, staff) = app.get("/api/v1/staff", Some(&fx.owner_token)).await;
    let waiter_id = staff["data"]
        .as_array()
        .expect("staff")
        .iter()
        .find(|s| s["email"] == "waiter@everest.test")
        .and_then(|s| s["id"].as_str())
        .expect("waiter")
        .to_string();

    let (status, body) = app
        .post(
            &format!("/api/v1/staff/{waiter_id}/deactivate"),
            json!({}),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["is_active"], false);

    let (status, _) = app
        .post(
            "/api/v1/auth/login",
            json!({ "email": "waiter@everest.test", "password": "staff-password-1" }),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn regenerating_a_qr_code_retires_the_old_one() {
    let app = TestApp::new().await;
    let fx = app.fixture("Everest Diner", "owner@everest.test").await;

    let (status, body) = app
        .post(
            &format!("/api/v1/tables/{}/qr", fx.table_id),
            json!({}),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let new_token = body["data"]["token"].as_str().expect("token").to_string();
    assert_ne!(new_token, fx.qr_token);
    assert_eq!(body["data"]["version"], 2);

    let (status, _) = app.get(&format!("/api/v1/guest/{}", fx.qr_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.get(&format!("/api/v1/guest/{new_token}"), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["table_id"], fx.table_id.as_str());
}

#[tokio::test]
async fn moving_a_session_frees_the_old_table() {
    let app = TestApp::new().await;
    let fx = app.fixture("Everest Diner", "owner@everest.test").await;
    let (t2, _) = app.create_table(&fx.owner_token, "T2").await;
    let session_id = app.open_session(&fx.owner_token, &fx.table_id).await;

    let (status, body) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/move"),
            json!({ "target_table_id": t2 }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["table_id"], t2.as_str());

    let (_, tables) = app.get("/api/v1/tables", Some(&fx.owner_token)).await;
    let status_of = |id: &str| {
        tables["data"]
            .as_array()
            .expect("tables")
            .iter()
            .find(|t| t["id"] == id)
            .map(|t| t["status"].clone())
            .expect("table")
    };
    assert_eq!(status_of(&fx.table_id), "Available");
    assert_eq!(status_of(&t2), "Occupied");

    // An occupied table cannot take a second session
    let (status, _) = app
        .post(
            &format!("/api/v1/tables/{t2}/sessions"),
            json!({ "guest_count": 1 }),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .post(
            &format!("/api/v1/sessions/{session_id}/cancel"),
            json!({}),
            Some(&fx.owner_token),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(id_of(&body), session_id);
    assert_eq!(body["data"]["status"], "Cancelled");
}
