mod common;

use axum::http::{Method, StatusCode};
use common::{id_of, money, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};

fn journal(debit_account: &str, credit_account: &str, amount: &str) -> Value {
    json!({
        "voucher_type": "Journal",
        "narration": "Owner capital introduced",
        "lines": [
            { "account_id": debit_account, "debit": amount },
            { "account_id": credit_account, "credit": amount }
        ]
    })
}

#[tokio::test]
async fn unbalanced_and_malformed_vouchers_are_rejected() {
    let app = TestApp::new().await;
    let (_, owner) = app.create_restaurant("Kathmandu Kitchen", "owner@ktm.test").await;
    let cash = app.account_id(&owner, "1110").await;
    let capital = app.account_id(&owner, "3100").await;
    let assets_group = app.account_id(&owner, "1000").await;

    let (status, body) = app
        .post(
            "/api/v1/vouchers",
            json!({
                "voucher_type": "Journal",
                "narration": "typo",
                "lines": [
                    { "account_id": cash, "debit": "1000" },
                    { "account_id": capital, "credit": "900" }
                ]
            }),
            Some(&owner),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    let (status, _) = app
        .post(
            "/api/v1/vouchers",
            json!({
                "voucher_type": "Journal",
                "narration": "one line",
                "lines": [{ "account_id": cash, "debit": "1000" }]
            }),
            Some(&owner),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            "/api/v1/vouchers",
            json!({
                "voucher_type": "Journal",
                "narration": "both sides",
                "lines": [
                    { "account_id": cash, "debit": "100", "credit": "100" },
                    { "account_id": capital, "credit": "0" }
                ]
            }),
            Some(&owner),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Group accounts never take postings
    let (status, _) = app
        .post("/api/v1/vouchers", journal(&assets_group, &capital, "100"), Some(&owner))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let tb = app.trial_balance(&owner).await;
    assert_eq!(money(&tb["total_debit"]), dec!(0));
}

#[tokio::test]
async fn draft_post_cancel_lifecycle() {
    let app = TestApp::new().await;
    let (_, owner) = app.create_restaurant("Kathmandu Kitchen", "owner@ktm.test").await;
    let cash = app.account_id(&owner, "1110").await;
    let capital = app.account_id(&owner, "3100").await;

    let (status, draft) = app
        .post("/api/v1/vouchers", journal(&cash, &capital, "50000"), Some(&owner))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{draft}");
    assert_eq!(draft["data"]["status"], "Draft");
    assert!(draft["data"]["voucher_number"]
        .as_str()
        .expect("number")
        .starts_with("JV"));
    let voucher_id = id_of(&draft);

    // Drafts stay off the books
    let tb = app.trial_balance(&owner).await;
    assert_eq!(money(&tb["total_debit"]), dec!(0));

    let (status, body) = app
        .put(
            &format!("/api/v1/vouchers/{voucher_id}"),
            json!({ "narration": "Capital from partner A" }),
            Some(&owner),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["narration"], "Capital from partner A");

    let (status, posted) = app
        .post(&format!("/api/v1/vouchers/{voucher_id}/post"), json!({}), Some(&owner))
        .await;
    assert_eq!(status, StatusCode::OK, "{posted}");
    assert_eq!(posted["data"]["status"], "Posted");

    let (status, _) = app
        .post(&format!("/api/v1/vouchers/{voucher_id}/post"), json!({}), Some(&owner))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .put(
            &format!("/api/v1/vouchers/{voucher_id}"),
            json!({ "narration": "too late" }),
            Some(&owner),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let tb = app.trial_balance(&owner).await;
    assert_eq!(tb["is_balanced"], true);
    assert_eq!(money(&tb["total_debit"]), dec!(50000));

    let (status, ledger) = app
        .get(&format!("/api/v1/accounts/{cash}/ledger"), Some(&owner))
        .await;
    assert_eq!(status, StatusCode::OK, "{ledger}");
    assert_eq!(ledger["data"]["entries"].as_array().map(Vec::len), Some(1));
    assert_eq!(money(&ledger["data"]["closing_balance"]), dec!(50000));

    let (status, _) = app
        .post(
            &format!("/api/v1/vouchers/{voucher_id}/cancel"),
            json!({ "reason": " " }),
            Some(&owner),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, cancelled) = app
        .post(
            &format!("/api/v1/vouchers/{voucher_id}/cancel"),
            json!({ "reason": "entered twice" }),
            Some(&owner),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{cancelled}");
    assert_eq!(cancelled["data"]["status"], "Cancelled");
    assert_eq!(cancelled["data"]["cancel_reason"], "entered twice");

    let tb = app.trial_balance(&owner).await;
    assert_eq!(money(&tb["total_debit"]), dec!(0));
    assert_eq!(tb["is_balanced"], true);
}

#[tokio::test]
async fn drafts_can_be_deleted_but_posted_vouchers_cannot() {
    let app = TestApp::new().await;
    let (_, owner) = app.create_restaurant("Kathmandu Kitchen", "owner@ktm.test").await;
    let cash = app.account_id(&owner, "1110").await;
    let capital = app.account_id(&owner, "3100").await;

    let (_, draft) = app
        .post("/api/v1/vouchers", journal(&cash, &capital, "10"), Some(&owner))
        .await;
    let draft_id = id_of(&draft);
    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/vouchers/{draft_id}"),
            None,
            Some(&owner),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .get(&format!("/api/v1/vouchers/{draft_id}"), Some(&owner))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut posted = journal(&cash, &capital, "10");
    posted["post_now"] = json!(true);
    let (status, body) = app.post("/api/v1/vouchers", posted, Some(&owner)).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["status"], "Posted");
    let (status, _) = app
        .request(
            Method::DELETE,
            &format!("/api/v1/vouchers/{}", id_of(&body)),
            None,
            Some(&owner),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, list) = app
        .get("/api/v1/vouchers?status=Posted", Some(&owner))
        .await;
    assert_eq!(status, StatusCode::OK, "{list}");
    assert_eq!(list["data"]["total"], 1);
}

#[tokio::test]
async fn expenses_flow_into_profit_and_loss() {
    let app = TestApp::new().await;
    let (_, owner) = app.create_restaurant("Kathmandu Kitchen", "owner@ktm.test").await;
    let accountant = app
        .create_staff(&owner, "books@ktm.test", "accountant")
        .await;
    let cash = app.account_id(&owner, "1110").await;
    let expenses_group = app.account_id(&owner, "5000").await;

    let (status, rent) = app
        .post(
            "/api/v1/accounts",
            json!({
                "code": "5400",
                "name": "Rent",
                "account_type": "Expense",
                "parent_id": expenses_group
            }),
            Some(&accountant),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{rent}");
    let rent_id = id_of(&rent);

    let (status, _) = app
        .post(
            "/api/v1/accounts",
            json!({ "code": "5400", "name": "Rent again", "account_type": "Expense" }),
            Some(&accountant),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = app
        .post(
            "/api/v1/vouchers",
            json!({
                "voucher_type": "Payment",
                "narration": "Monthly rent",
                "post_now": true,
                "lines": [
                    { "account_id": rent_id, "debit": "25000" },
                    { "account_id": cash, "credit": "25000" }
                ]
            }),
            Some(&accountant),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, pnl) = app
        .get("/api/v1/reports/profit-and-loss", Some(&accountant))
        .await;
    assert_eq!(status, StatusCode::OK, "{pnl}");
    assert_eq!(money(&pnl["data"]["total_expense"]), dec!(25000));
    assert_eq!(money(&pnl["data"]["net_profit"]), dec!(-25000));
    assert!(pnl["data"]["expenses"]
        .as_array()
        .expect("expenses")
        .iter()
        .any(|r| r["code"] == "5400"));

    // Seeding again leaves the existing chart alone
    let (status, body) = app
        .post("/api/v1/chart-of-accounts/seed", json!({}), Some(&owner))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let (_, accounts) = app.get("/api/v1/accounts", Some(&owner)).await;
    let cash_accounts = accounts["data"]
        .as_array()
        .expect("accounts")
        .iter()
        .filter(|a| a["code"] == "1110")
        .count();
    assert_eq!(cash_accounts, 1);
}
