//! Double-entry bookkeeping: chart of accounts, vouchers and the ledger.

use chrono::{NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    ModelTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::{round_money, PaginationParams},
    entities::{
        account::{self, AccountType, Entity as AccountEntity},
        bill, bill_line,
        ledger_entry::{self, Entity as LedgerEntity, LedgerEntryStatus, LedgerEntryType},
        menu_category::Station,
        payment::{self, PaymentMethod},
        voucher::{self, Entity as VoucherEntity, VoucherStatus, VoucherType},
        voucher_line::{self, Entity as VoucherLineEntity},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        compliance::{business_date, FiscalCalendar},
        sequences,
    },
};

/// Keys of the accounts the system posts to on its own.
pub mod keys {
    pub const CASH: &str = "cash";
    pub const BANK: &str = "bank";
    pub const DIGITAL_WALLET: &str = "digital_wallet";
    pub const INVENTORY: &str = "inventory";
    pub const VAT_INPUT: &str = "vat_input";
    pub const ACCOUNTS_PAYABLE: &str = "accounts_payable";
    pub const VAT_PAYABLE: &str = "vat_payable";
    pub const CAPITAL: &str = "capital";
    pub const FOOD_SALES: &str = "food_sales";
    pub const BEVERAGE_SALES: &str = "beverage_sales";
    pub const SERVICE_CHARGE_INCOME: &str = "service_charge_income";
    pub const COGS: &str = "cogs";
    pub const DISCOUNT_ALLOWED: &str = "discount_allowed";
    pub const WASTAGE: &str = "wastage";
}

struct SeedAccount {
    code: &'static str,
    name: &'static str,
    account_type: AccountType,
    parent: Option<&'static str>,
    is_group: bool,
    system_key: Option<&'static str>,
}

const fn group(code: &'static str, name: &'static str, account_type: AccountType) -> SeedAccount {
    SeedAccount {
        code,
        name,
        account_type,
        parent: None,
        is_group: true,
        system_key: None,
    }
}

const fn ledger(
    code: &'static str,
    name: &'static str,
    account_type: AccountType,
    parent: &'static str,
    system_key: &'static str,
) -> SeedAccount {
    SeedAccount {
        code,
        name,
        account_type,
        parent: Some(parent),
        is_group: false,
        system_key: Some(system_key),
    }
}

/// Parents come before their children.
const DEFAULT_CHART: &[SeedAccount] = &[
    group("1000", "Assets", AccountType::Asset),
    SeedAccount {
        code: "1100",
        name: "Current Assets",
        account_type: AccountType::Asset,
        parent: Some("1000"),
        is_group: true,
        system_key: None,
    },
    ledger("1110", "Cash in Hand", AccountType::Asset, "1100", keys::CASH),
    ledger("1120", "Bank Account", AccountType::Asset, "1100", keys::BANK),
    ledger("1130", "Digital Wallets", AccountType::Asset, "1100", keys::DIGITAL_WALLET),
    ledger("1140", "Inventory", AccountType::Asset, "1100", keys::INVENTORY),
    ledger("1150", "VAT Input Credit", AccountType::Asset, "1100", keys::VAT_INPUT),
    group("2000", "Liabilities", AccountType::Liability),
    ledger("2100", "Accounts Payable", AccountType::Liability, "2000", keys::ACCOUNTS_PAYABLE),
    ledger("2200", "VAT Payable", AccountType::Liability, "2000", keys::VAT_PAYABLE),
    group("3000", "Equity", AccountType::Equity),
    ledger("3100", "Owner's Capital", AccountType::Equity, "3000", keys::CAPITAL),
    group("4000", "Income", AccountType::Income),
    ledger("4100", "Food Sales", AccountType::Income, "4000", keys::FOOD_SALES),
    ledger("4200", "Beverage Sales", AccountType::Income, "4000", keys::BEVERAGE_SALES),
    ledger("4300", "Service Charge Income", AccountType::Income, "4000", keys::SERVICE_CHARGE_INCOME),
    group("5000", "Expenses", AccountType::Expense),
    ledger("5100", "Cost of Goods Sold", AccountType::Expense, "5000", keys::COGS),
    ledger("5200", "Discount Allowed", AccountType::Expense, "5000", keys::DISCOUNT_ALLOWED),
    ledger("5300", "Wastage", AccountType::Expense, "5000", keys::WASTAGE),
];

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateAccountRequest {
    #[validate(length(min = 1, max = 20, message = "Account code is required"))]
    pub code: String,
    #[validate(length(min = 1, max = 120, message = "Account name is required"))]
    pub name: String,
    pub account_type: AccountType,
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub is_group: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct VoucherLineInput {
    pub account_id: Uuid,
    #[serde(default)]
    pub debit: Decimal,
    #[serde(default)]
    pub credit: Decimal,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateVoucherRequest {
    pub voucher_type: VoucherType,
    /// Defaults to today's business date
    pub voucher_date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 500, message = "Narration is required"))]
    pub narration: String,
    pub lines: Vec<VoucherLineInput>,
    #[serde(default)]
    pub post_now: bool,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct UpdateDraftRequest {
    #[validate(length(min = 1, max = 500))]
    pub narration: Option<String>,
    pub voucher_date: Option<NaiveDate>,
    pub lines: Option<Vec<VoucherLineInput>>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VoucherListParams {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub voucher_type: Option<VoucherType>,
    pub status: Option<VoucherStatus>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VoucherWithLines {
    #[serde(flatten)]
    pub voucher: voucher::Model,
    pub lines: Vec<voucher_line::Model>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LedgerLine {
    pub posting_date: NaiveDate,
    pub voucher_id: Uuid,
    pub voucher_number: String,
    pub description: Option<String>,
    pub debit: Decimal,
    pub credit: Decimal,
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AccountLedger {
    pub account: account::Model,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub opening_balance: Decimal,
    pub entries: Vec<LedgerLine>,
    pub closing_balance: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrialBalanceRow {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub debit: Decimal,
    pub credit: Decimal,
    /// Balance on the account's normal side
    pub balance: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrialBalance {
    pub as_of: NaiveDate,
    pub rows: Vec<TrialBalanceRow>,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub is_balanced: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProfitAndLossRow {
    pub account_id: Uuid,
    pub code: String,
    pub name: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProfitAndLoss {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub income: Vec<ProfitAndLossRow>,
    pub expenses: Vec<ProfitAndLossRow>,
    pub total_income: Decimal,
    pub total_expense: Decimal,
    pub net_profit: Decimal,
}

/// Header of a voucher about to be written.
#[derive(Debug, Clone)]
pub struct NewVoucher {
    pub restaurant_id: Uuid,
    pub voucher_type: VoucherType,
    pub voucher_date: NaiveDate,
    pub fiscal_year: String,
    pub narration: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
}

/// Line of an automatic voucher, addressed by system key.
#[derive(Debug, Clone)]
pub struct SystemLine {
    pub key: &'static str,
    pub debit: Decimal,
    pub credit: Decimal,
    pub description: Option<String>,
}

impl SystemLine {
    pub fn debit(key: &'static str, amount: Decimal) -> Self {
        Self {
            key,
            debit: amount,
            credit: Decimal::ZERO,
            description: None,
        }
    }

    pub fn credit(key: &'static str, amount: Decimal) -> Self {
        Self {
            key,
            debit: Decimal::ZERO,
            credit: amount,
            description: None,
        }
    }
}

/// Checks the shape of voucher lines and returns the voucher total.
///
/// Account existence is checked separately against the database.
pub fn validate_lines(lines: &[VoucherLineInput]) -> Result<Decimal, ServiceError> {
    if lines.len() < 2 {
        return Err(ServiceError::ValidationError(
            "a voucher needs at least two lines".to_string(),
        ));
    }

    let mut debits = Decimal::ZERO;
    let mut credits = Decimal::ZERO;
    for (i, line) in lines.iter().enumerate() {
        if line.debit < Decimal::ZERO || line.credit < Decimal::ZERO {
            return Err(ServiceError::ValidationError(format!(
                "line {}: amounts cannot be negative",
                i + 1
            )));
        }
        if (line.debit > Decimal::ZERO) == (line.credit > Decimal::ZERO) {
            return Err(ServiceError::ValidationError(format!(
                "line {}: exactly one of debit or credit must be positive",
                i + 1
            )));
        }
        debits += line.debit;
        credits += line.credit;
    }

    if debits != credits {
        return Err(ServiceError::UnbalancedVoucher(format!(
            "debits {} do not equal credits {}",
            debits, credits
        )));
    }
    if debits.is_zero() {
        return Err(ServiceError::ValidationError(
            "voucher total must be greater than zero".to_string(),
        ));
    }
    Ok(debits)
}

/// Signed balance on the account's normal side.
pub fn normal_balance(account_type: AccountType, debit: Decimal, credit: Decimal) -> Decimal {
    if account_type.is_debit_normal() {
        debit - credit
    } else {
        credit - debit
    }
}

fn rounded(lines: &[VoucherLineInput]) -> Vec<VoucherLineInput> {
    lines
        .iter()
        .map(|l| VoucherLineInput {
            account_id: l.account_id,
            debit: round_money(l.debit),
            credit: round_money(l.credit),
            description: l.description.clone(),
        })
        .collect()
}

/// Creates whichever default groups and system accounts are missing and
/// returns the whole chart. Existing codes are left untouched.
pub async fn seed_chart_in<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
) -> Result<Vec<account::Model>, ServiceError> {
    let existing = AccountEntity::find()
        .filter(account::Column::RestaurantId.eq(restaurant_id))
        .all(conn)
        .await?;
    let mut ids: HashMap<String, Uuid> = existing.iter().map(|a| (a.code.clone(), a.id)).collect();
    let mut chart = existing;
    let now = Utc::now();

    for seed in DEFAULT_CHART {
        if ids.contains_key(seed.code) {
            continue;
        }
        let id = Uuid::new_v4();
        let parent_id = seed.parent.and_then(|code| ids.get(code).copied());
        let model = account::ActiveModel {
            id: Set(id),
            restaurant_id: Set(restaurant_id),
            code: Set(seed.code.to_string()),
            name: Set(seed.name.to_string()),
            account_type: Set(seed.account_type),
            parent_id: Set(parent_id),
            is_group: Set(seed.is_group),
            system_key: Set(seed.system_key.map(str::to_string)),
            is_active: Set(true),
            created_at: Set(now),
        }
        .insert(conn)
        .await?;
        ids.insert(seed.code.to_string(), id);
        chart.push(model);
    }

    chart.sort_by(|a, b| a.code.cmp(&b.code));
    Ok(chart)
}

async fn check_accounts<C: ConnectionTrait>(
    conn: &C,
    restaurant_id: Uuid,
    lines: &[VoucherLineInput],
) -> Result<(), ServiceError> {
    let ids: Vec<Uuid> = lines.iter().map(|l| l.account_id).collect();
    let accounts: HashMap<Uuid, account::Model> = AccountEntity::find()
        .filter(account::Column::RestaurantId.eq(restaurant_id))
        .filter(account::Column::Id.is_in(ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|a| (a.id, a))
        .collect();

    for line in lines {
        match accounts.get(&line.account_id) {
            None => return Err(ServiceError::not_found("Account", line.account_id)),
            Some(a) if a.is_group => {
                return Err(ServiceError::ValidationError(format!(
                    "account {} is a group and cannot be posted to",
                    a.code
                )))
            }
            Some(a) if !a.is_active => {
                return Err(ServiceError::ValidationError(format!(
                    "account {} is inactive",
                    a.code
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

async fn insert_lines<C: ConnectionTrait>(
    conn: &C,
    voucher_id: Uuid,
    lines: &[VoucherLineInput],
) -> Result<Vec<voucher_line::Model>, ServiceError> {
    let mut stored = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        let model = voucher_line::ActiveModel {
            id: Set(Uuid::new_v4()),
            voucher_id: Set(voucher_id),
            line_no: Set(i as i32 + 1),
            account_id: Set(line.account_id),
            debit: Set(line.debit),
            credit: Set(line.credit),
            description: Set(line.description.clone()),
        }
        .insert(conn)
        .await?;
        stored.push(model);
    }
    Ok(stored)
}

async fn write_ledger<C: ConnectionTrait>(
    conn: &C,
    voucher: &voucher::Model,
    lines: &[voucher_line::Model],
) -> Result<(), ServiceError> {
    let now = Utc::now();
    for line in lines {
        let (entry_type, amount) = if line.debit > Decimal::ZERO {
            (LedgerEntryType::Debit, line.debit)
        } else {
            (LedgerEntryType::Credit, line.credit)
        };
        ledger_entry::ActiveModel {
            id: Set(Uuid::new_v4()),
            restaurant_id: Set(voucher.restaurant_id),
            voucher_id: Set(voucher.id),
            account_id: Set(line.account_id),
            entry_type: Set(entry_type),
            amount: Set(amount),
            description: Set(line
                .description
                .clone()
                .or_else(|| Some(voucher.narration.clone()))),
            status: Set(LedgerEntryStatus::Posted),
            posting_date: Set(voucher.voucher_date),
            created_at: Set(now),
        }
        .insert(conn)
        .await?;
    }
    Ok(())
}

/// Validates, numbers and stores a voucher, posting it when asked.
pub async fn insert_voucher<C: ConnectionTrait>(
    conn: &C,
    header: NewVoucher,
    lines: &[VoucherLineInput],
    post: bool,
) -> Result<VoucherWithLines, ServiceError> {
    let lines = rounded(lines);
    let total = validate_lines(&lines)?;
    check_accounts(conn, header.restaurant_id, &lines).await?;

    let prefix = header.voucher_type.prefix();
    let n = sequences::next_value(conn, header.restaurant_id, prefix, &header.fiscal_year).await?;
    let now = Utc::now();

    let voucher = voucher::ActiveModel {
        id: Set(Uuid::new_v4()),
        restaurant_id: Set(header.restaurant_id),
        voucher_number: Set(sequences::format_voucher_number(prefix, &header.fiscal_year, n)),
        voucher_type: Set(header.voucher_type),
        voucher_date: Set(header.voucher_date),
        fiscal_year: Set(header.fiscal_year),
        narration: Set(header.narration),
        status: Set(if post {
            VoucherStatus::Posted
        } else {
            VoucherStatus::Draft
        }),
        total_amount: Set(total),
        reference_type: Set(header.reference_type),
        reference_id: Set(header.reference_id),
        created_by: Set(header.created_by),
        posted_at: Set(post.then_some(now)),
        cancelled_at: Set(None),
        cancel_reason: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    let stored = insert_lines(conn, voucher.id, &lines).await?;
    if post {
        write_ledger(conn, &voucher, &stored).await?;
    }

    Ok(VoucherWithLines {
        voucher,
        lines: stored,
    })
}

/// Posts a voucher against system accounts. Zero lines are dropped; `None`
/// when nothing is left to post.
pub async fn post_system_voucher<C: ConnectionTrait>(
    conn: &C,
    header: NewVoucher,
    lines: Vec<SystemLine>,
) -> Result<Option<voucher::Model>, ServiceError> {
    let lines: Vec<SystemLine> = lines
        .into_iter()
        .filter(|l| !l.debit.is_zero() || !l.credit.is_zero())
        .collect();
    if lines.is_empty() {
        return Ok(None);
    }

    let wanted: Vec<&str> = lines.iter().map(|l| l.key).collect();
    let accounts: HashMap<String, Uuid> = AccountEntity::find()
        .filter(account::Column::RestaurantId.eq(header.restaurant_id))
        .filter(account::Column::SystemKey.is_in(wanted))
        .all(conn)
        .await?
        .into_iter()
        .filter_map(|a| a.system_key.map(|k| (k, a.id)))
        .collect();

    let mut inputs = Vec::with_capacity(lines.len());
    for line in lines {
        let account_id = accounts.get(line.key).copied().ok_or_else(|| {
            ServiceError::InternalError(format!("system account '{}' is missing", line.key))
        })?;
        inputs.push(VoucherLineInput {
            account_id,
            debit: line.debit,
            credit: line.credit,
            description: line.description,
        });
    }

    Ok(Some(insert_voucher(conn, header, &inputs, true).await?.voucher))
}

/// System account debited when money arrives by the given method.
pub fn receiving_account(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::Cash => keys::CASH,
        PaymentMethod::Card | PaymentMethod::BankTransfer => keys::BANK,
        PaymentMethod::Khalti | PaymentMethod::Fonepay => keys::DIGITAL_WALLET,
    }
}

/// Sales voucher for a fully paid bill.
pub async fn post_sales_voucher<C: ConnectionTrait>(
    conn: &C,
    bill: &bill::Model,
    lines: &[bill_line::Model],
    payments: &[payment::Model],
    created_by: Option<Uuid>,
) -> Result<Option<voucher::Model>, ServiceError> {
    let mut received: BTreeMap<&'static str, Decimal> = BTreeMap::new();
    for p in payments {
        *received.entry(receiving_account(p.method)).or_default() += p.amount;
    }

    let (food, beverage) = lines.iter().fold((Decimal::ZERO, Decimal::ZERO), |(f, b), l| {
        match l.station {
            Station::Kitchen => (f + l.amount, b),
            Station::Bar => (f, b + l.amount),
        }
    });

    let mut entries: Vec<SystemLine> = received
        .into_iter()
        .map(|(key, amount)| SystemLine::debit(key, amount))
        .collect();
    entries.push(SystemLine::debit(keys::DISCOUNT_ALLOWED, bill.total_discount()));
    entries.push(SystemLine::credit(keys::FOOD_SALES, food));
    entries.push(SystemLine::credit(keys::BEVERAGE_SALES, beverage));
    entries.push(SystemLine::credit(keys::SERVICE_CHARGE_INCOME, bill.service_charge));
    entries.push(SystemLine::credit(keys::VAT_PAYABLE, bill.vat_amount));

    post_system_voucher(
        conn,
        NewVoucher {
            restaurant_id: bill.restaurant_id,
            voucher_type: VoucherType::Sales,
            voucher_date: bill.bill_date,
            fiscal_year: bill.fiscal_year.clone(),
            narration: format!("Sales against invoice {}", bill.invoice_number),
            reference_type: Some("bill".to_string()),
            reference_id: Some(bill.id),
            created_by,
        },
        entries,
    )
    .await
}

/// Chart of accounts, manual vouchers and financial statements.
#[derive(Clone)]
pub struct AccountingService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<Arc<EventSender>>,
    calendar: FiscalCalendar,
}

impl AccountingService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Option<Arc<EventSender>>,
        calendar: FiscalCalendar,
    ) -> Self {
        Self {
            db,
            event_sender,
            calendar,
        }
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event).await;
        }
    }

    #[instrument(skip(self))]
    pub async fn seed_default_chart(
        &self,
        restaurant_id: Uuid,
    ) -> Result<Vec<account::Model>, ServiceError> {
        let txn = self.db.begin().await?;
        let accounts = seed_chart_in(&txn, restaurant_id).await?;
        txn.commit().await?;
        Ok(accounts)
    }

    #[instrument(skip(self, request), fields(code = %request.code))]
    pub async fn create_account(
        &self,
        restaurant_id: Uuid,
        request: CreateAccountRequest,
    ) -> Result<account::Model, ServiceError> {
        request.validate()?;
        let db = &*self.db;

        let code = request.code.trim().to_string();
        let duplicate = AccountEntity::find()
            .filter(account::Column::RestaurantId.eq(restaurant_id))
            .filter(account::Column::Code.eq(code.clone()))
            .one(db)
            .await?;
        if duplicate.is_some() {
            return Err(ServiceError::Conflict(format!(
                "account code {} already exists",
                code
            )));
        }

        if let Some(parent_id) = request.parent_id {
            let parent = self.find_account(restaurant_id, parent_id).await?;
            if !parent.is_group {
                return Err(ServiceError::ValidationError(
                    "parent account must be a group".to_string(),
                ));
            }
            if parent.account_type != request.account_type {
                return Err(ServiceError::ValidationError(
                    "parent account must have the same type".to_string(),
                ));
            }
        }

        let account = account::ActiveModel {
            id: Set(Uuid::new_v4()),
            restaurant_id: Set(restaurant_id),
            code: Set(code),
            name: Set(request.name.trim().to_string()),
            account_type: Set(request.account_type),
            parent_id: Set(request.parent_id),
            is_group: Set(request.is_group),
            system_key: Set(None),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(db)
        .await?;

        info!(account_id = %account.id, "account created");
        Ok(account)
    }

    #[instrument(skip(self))]
    pub async fn list_accounts(
        &self,
        restaurant_id: Uuid,
    ) -> Result<Vec<account::Model>, ServiceError> {
        Ok(AccountEntity::find()
            .filter(account::Column::RestaurantId.eq(restaurant_id))
            .order_by_asc(account::Column::Code)
            .all(&*self.db)
            .await?)
    }

    async fn find_account(
        &self,
        restaurant_id: Uuid,
        account_id: Uuid,
    ) -> Result<account::Model, ServiceError> {
        AccountEntity::find_by_id(account_id)
            .filter(account::Column::RestaurantId.eq(restaurant_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Account", account_id))
    }

    #[instrument(skip(self, request), fields(voucher_type = ?request.voucher_type))]
    pub async fn create_voucher(
        &self,
        restaurant_id: Uuid,
        user_id: Uuid,
        request: CreateVoucherRequest,
    ) -> Result<VoucherWithLines, ServiceError> {
        request.validate()?;
        let voucher_date = request
            .voucher_date
            .unwrap_or_else(|| business_date(Utc::now()));

        let txn = self.db.begin().await?;
        let created = insert_voucher(
            &txn,
            NewVoucher {
                restaurant_id,
                voucher_type: request.voucher_type,
                voucher_date,
                fiscal_year: self.calendar.label_for(voucher_date),
                narration: request.narration.trim().to_string(),
                reference_type: None,
                reference_id: None,
                created_by: Some(user_id),
            },
            &request.lines,
            request.post_now,
        )
        .await?;
        txn.commit().await?;

        info!(
            voucher_id = %created.voucher.id,
            number = %created.voucher.voucher_number,
            posted = request.post_now,
            "voucher created"
        );
        if request.post_now {
            counter!("restro.vouchers.posted", 1);
            self.emit(Event::VoucherPosted(created.voucher.id)).await;
        }
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn get_voucher(
        &self,
        restaurant_id: Uuid,
        voucher_id: Uuid,
    ) -> Result<VoucherWithLines, ServiceError> {
        let voucher = self.find_voucher(&*self.db, restaurant_id, voucher_id).await?;
        let lines = voucher
            .find_related(VoucherLineEntity)
            .order_by_asc(voucher_line::Column::LineNo)
            .all(&*self.db)
            .await?;
        Ok(VoucherWithLines { voucher, lines })
    }

    async fn find_voucher<C: ConnectionTrait>(
        &self,
        conn: &C,
        restaurant_id: Uuid,
        voucher_id: Uuid,
    ) -> Result<voucher::Model, ServiceError> {
        VoucherEntity::find_by_id(voucher_id)
            .filter(voucher::Column::RestaurantId.eq(restaurant_id))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Voucher", voucher_id))
    }

    #[instrument(skip(self))]
    pub async fn list_vouchers(
        &self,
        restaurant_id: Uuid,
        params: VoucherListParams,
        pagination: PaginationParams,
    ) -> Result<(Vec<voucher::Model>, u64), ServiceError> {
        let mut query = VoucherEntity::find().filter(voucher::Column::RestaurantId.eq(restaurant_id));
        if let Some(from) = params.from {
            query = query.filter(voucher::Column::VoucherDate.gte(from));
        }
        if let Some(to) = params.to {
            query = query.filter(voucher::Column::VoucherDate.lte(to));
        }
        if let Some(voucher_type) = params.voucher_type {
            query = query.filter(voucher::Column::VoucherType.eq(voucher_type));
        }
        if let Some(status) = params.status {
            query = query.filter(voucher::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(voucher::Column::VoucherDate)
            .order_by_desc(voucher::Column::CreatedAt)
            .paginate(&*self.db, pagination.limit());
        let total = paginator.num_items().await?;
        let vouchers = paginator.fetch_page(pagination.page_index()).await?;
        Ok((vouchers, total))
    }

    #[instrument(skip(self, request))]
    pub async fn update_draft(
        &self,
        restaurant_id: Uuid,
        voucher_id: Uuid,
        request: UpdateDraftRequest,
    ) -> Result<VoucherWithLines, ServiceError> {
        request.validate()?;
        let txn = self.db.begin().await?;
        let voucher = self.find_voucher(&txn, restaurant_id, voucher_id).await?;
        if voucher.status != VoucherStatus::Draft {
            return Err(ServiceError::InvalidOperation(
                "only draft vouchers can be edited".to_string(),
            ));
        }

        let mut active: voucher::ActiveModel = voucher.clone().into();
        if let Some(narration) = request.narration {
            active.narration = Set(narration.trim().to_string());
        }
        if let Some(date) = request.voucher_date {
            if self.calendar.label_for(date) != voucher.fiscal_year {
                return Err(ServiceError::ValidationError(
                    "voucher date cannot move to another fiscal year".to_string(),
                ));
            }
            active.voucher_date = Set(date);
        }

        let lines = match request.lines {
            Some(lines) => {
                let lines = rounded(&lines);
                let total = validate_lines(&lines)?;
                check_accounts(&txn, restaurant_id, &lines).await?;
                voucher_line::Entity::delete_many()
                    .filter(voucher_line::Column::VoucherId.eq(voucher_id))
                    .exec(&txn)
                    .await?;
                active.total_amount = Set(total);
                insert_lines(&txn, voucher_id, &lines).await?
            }
            None => {
                voucher_line::Entity::find()
                    .filter(voucher_line::Column::VoucherId.eq(voucher_id))
                    .order_by_asc(voucher_line::Column::LineNo)
                    .all(&txn)
                    .await?
            }
        };

        active.updated_at = Set(Utc::now());
        let voucher = active.update(&txn).await?;
        txn.commit().await?;
        Ok(VoucherWithLines { voucher, lines })
    }

    #[instrument(skip(self))]
    pub async fn delete_draft(&self, restaurant_id: Uuid, voucher_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let voucher = self.find_voucher(&txn, restaurant_id, voucher_id).await?;
        if voucher.status != VoucherStatus::Draft {
            return Err(ServiceError::InvalidOperation(
                "only draft vouchers can be deleted".to_string(),
            ));
        }
        voucher_line::Entity::delete_many()
            .filter(voucher_line::Column::VoucherId.eq(voucher_id))
            .exec(&txn)
            .await?;
        voucher.delete(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn post_voucher(
        &self,
        restaurant_id: Uuid,
        voucher_id: Uuid,
    ) -> Result<VoucherWithLines, ServiceError> {
        let txn = self.db.begin().await?;
        let voucher = self.find_voucher(&txn, restaurant_id, voucher_id).await?;
        if voucher.status != VoucherStatus::Draft {
            return Err(ServiceError::InvalidOperation(format!(
                "voucher {} is not a draft",
                voucher.voucher_number
            )));
        }

        let lines = voucher_line::Entity::find()
            .filter(voucher_line::Column::VoucherId.eq(voucher_id))
            .order_by_asc(voucher_line::Column::LineNo)
            .all(&txn)
            .await?;
        let inputs: Vec<VoucherLineInput> = lines
            .iter()
            .map(|l| VoucherLineInput {
                account_id: l.account_id,
                debit: l.debit,
                credit: l.credit,
                description: l.description.clone(),
            })
            .collect();
        validate_lines(&inputs)?;
        check_accounts(&txn, restaurant_id, &inputs).await?;

        let now = Utc::now();
        let mut active: voucher::ActiveModel = voucher.into();
        active.status = Set(VoucherStatus::Posted);
        active.posted_at = Set(Some(now));
        active.updated_at = Set(now);
        let voucher = active.update(&txn).await?;
        write_ledger(&txn, &voucher, &lines).await?;
        txn.commit().await?;

        counter!("restro.vouchers.posted", 1);
        self.emit(Event::VoucherPosted(voucher.id)).await;
        Ok(VoucherWithLines { voucher, lines })
    }

    #[instrument(skip(self))]
    pub async fn cancel_voucher(
        &self,
        restaurant_id: Uuid,
        voucher_id: Uuid,
        reason: String,
    ) -> Result<voucher::Model, ServiceError> {
        if reason.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "a cancellation reason is required".to_string(),
            ));
        }
        let txn = self.db.begin().await?;
        let voucher = self.find_voucher(&txn, restaurant_id, voucher_id).await?;
        cancel_voucher_in(&txn, voucher, reason.trim()).await?;
        let voucher = self.find_voucher(&txn, restaurant_id, voucher_id).await?;
        txn.commit().await?;

        info!(%voucher_id, "voucher cancelled");
        self.emit(Event::VoucherCancelled(voucher_id)).await;
        Ok(voucher)
    }

    async fn posted_entries(
        &self,
        restaurant_id: Uuid,
        account_id: Option<Uuid>,
        from: Option<NaiveDate>,
        to: NaiveDate,
    ) -> Result<Vec<ledger_entry::Model>, ServiceError> {
        let mut query = LedgerEntity::find()
            .filter(ledger_entry::Column::RestaurantId.eq(restaurant_id))
            .filter(ledger_entry::Column::Status.eq(LedgerEntryStatus::Posted))
            .filter(ledger_entry::Column::PostingDate.lte(to));
        if let Some(account_id) = account_id {
            query = query.filter(ledger_entry::Column::AccountId.eq(account_id));
        }
        if let Some(from) = from {
            query = query.filter(ledger_entry::Column::PostingDate.gte(from));
        }
        Ok(query
            .order_by_asc(ledger_entry::Column::PostingDate)
            .order_by_asc(ledger_entry::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn account_ledger(
        &self,
        restaurant_id: Uuid,
        account_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<AccountLedger, ServiceError> {
        let account = self.find_account(restaurant_id, account_id).await?;
        let entries = self
            .posted_entries(restaurant_id, Some(account_id), None, to)
            .await?;

        let voucher_ids: Vec<Uuid> = entries.iter().map(|e| e.voucher_id).collect();
        let numbers: HashMap<Uuid, String> = VoucherEntity::find()
            .filter(voucher::Column::Id.is_in(voucher_ids))
            .all(&*self.db)
            .await?
            .into_iter()
            .map(|v| (v.id, v.voucher_number))
            .collect();

        let mut opening = Decimal::ZERO;
        let mut running = Decimal::ZERO;
        let mut lines = Vec::new();
        for entry in entries {
            let (debit, credit) = match entry.entry_type {
                LedgerEntryType::Debit => (entry.amount, Decimal::ZERO),
                LedgerEntryType::Credit => (Decimal::ZERO, entry.amount),
            };
            let delta = normal_balance(account.account_type, debit, credit);
            if entry.posting_date < from {
                opening += delta;
                running = opening;
                continue;
            }
            running += delta;
            lines.push(LedgerLine {
                posting_date: entry.posting_date,
                voucher_id: entry.voucher_id,
                voucher_number: numbers.get(&entry.voucher_id).cloned().unwrap_or_default(),
                description: entry.description,
                debit,
                credit,
                balance: running,
            });
        }

        Ok(AccountLedger {
            account,
            from,
            to,
            opening_balance: opening,
            entries: lines,
            closing_balance: running,
        })
    }

    #[instrument(skip(self))]
    pub async fn trial_balance(
        &self,
        restaurant_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<TrialBalance, ServiceError> {
        let accounts = self.list_accounts(restaurant_id).await?;
        let entries = self.posted_entries(restaurant_id, None, None, as_of).await?;
        let sums = sum_by_account(&entries);

        let mut rows = Vec::new();
        let mut total_debit = Decimal::ZERO;
        let mut total_credit = Decimal::ZERO;
        for account in accounts.into_iter().filter(|a| !a.is_group) {
            let (debit, credit) = sums.get(&account.id).copied().unwrap_or_default();
            if debit.is_zero() && credit.is_zero() {
                continue;
            }
            total_debit += debit;
            total_credit += credit;
            rows.push(TrialBalanceRow {
                account_id: account.id,
                balance: normal_balance(account.account_type, debit, credit),
                code: account.code,
                name: account.name,
                account_type: account.account_type,
                debit,
                credit,
            });
        }

        Ok(TrialBalance {
            as_of,
            rows,
            total_debit,
            total_credit,
            is_balanced: total_debit == total_credit,
        })
    }

    #[instrument(skip(self))]
    pub async fn profit_and_loss(
        &self,
        restaurant_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<ProfitAndLoss, ServiceError> {
        let accounts = self.list_accounts(restaurant_id).await?;
        let entries = self
            .posted_entries(restaurant_id, None, Some(from), to)
            .await?;
        let sums = sum_by_account(&entries);

        let mut income = Vec::new();
        let mut expenses = Vec::new();
        for account in accounts.into_iter().filter(|a| !a.is_group) {
            let Some((debit, credit)) = sums.get(&account.id).copied() else {
                continue;
            };
            let row = ProfitAndLossRow {
                account_id: account.id,
                amount: normal_balance(account.account_type, debit, credit),
                code: account.code,
                name: account.name,
            };
            match account.account_type {
                AccountType::Income => income.push(row),
                AccountType::Expense => expenses.push(row),
                _ => {}
            }
        }

        let total_income: Decimal = income.iter().map(|r| r.amount).sum();
        let total_expense: Decimal = expenses.iter().map(|r| r.amount).sum();
        Ok(ProfitAndLoss {
            from,
            to,
            income,
            expenses,
            total_income,
            total_expense,
            net_profit: total_income - total_expense,
        })
    }
}

/// Cancels a draft or posted voucher; posted entries become reversed.
pub async fn cancel_voucher_in<C: ConnectionTrait>(
    conn: &C,
    voucher: voucher::Model,
    reason: &str,
) -> Result<(), ServiceError> {
    if voucher.status == VoucherStatus::Cancelled {
        return Err(ServiceError::InvalidOperation(format!(
            "voucher {} is already cancelled",
            voucher.voucher_number
        )));
    }
    let was_posted = voucher.status == VoucherStatus::Posted;
    let voucher_id = voucher.id;
    let now = Utc::now();

    let mut active: voucher::ActiveModel = voucher.into();
    active.status = Set(VoucherStatus::Cancelled);
    active.cancelled_at = Set(Some(now));
    active.cancel_reason = Set(Some(reason.to_string()));
    active.updated_at = Set(now);
    active.update(conn).await?;

    if was_posted {
        LedgerEntity::update_many()
            .col_expr(
                ledger_entry::Column::Status,
                sea_orm::sea_query::Expr::value(LedgerEntryStatus::Reversed),
            )
            .filter(ledger_entry::Column::VoucherId.eq(voucher_id))
            .exec(conn)
            .await?;
    }
    Ok(())
}

fn sum_by_account(entries: &[ledger_entry::Model]) -> HashMap<Uuid, (Decimal, Decimal)> {
    let mut sums: HashMap<Uuid, (Decimal, Decimal)> = HashMap::new();
    for entry in entries {
        let slot = sums.entry(entry.account_id).or_default();
        match entry.entry_type {
            LedgerEntryType::Debit => slot.0 += entry.amount,
            LedgerEntryType::Credit => slot.1 += entry.amount,
        }
    }
    sums
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(debit: Decimal, credit: Decimal) -> VoucherLineInput {
        VoucherLineInput {
            account_id: Uuid::new_v4(),
            debit,
            credit,
            description: None,
        }
    }

    #[test]
    fn balanced_lines_return_the_total() {
        let lines = vec![
            line(dec!(500), dec!(0)),
            line(dec!(0), dec!(300)),
            line(dec!(0), dec!(200)),
        ];
        assert_eq!(validate_lines(&lines).unwrap(), dec!(500));
    }

    #[test]
    fn unbalanced_lines_are_rejected() {
        let lines = vec![line(dec!(500), dec!(0)), line(dec!(0), dec!(499.99))];
        assert!(matches!(
            validate_lines(&lines),
            Err(ServiceError::UnbalancedVoucher(_))
        ));
    }

    #[test]
    fn each_line_has_exactly_one_side() {
        let both = vec![line(dec!(10), dec!(10)), line(dec!(0), dec!(0))];
        assert!(matches!(
            validate_lines(&both),
            Err(ServiceError::ValidationError(_))
        ));

        let negative = vec![line(dec!(-10), dec!(0)), line(dec!(0), dec!(-10))];
        assert!(matches!(
            validate_lines(&negative),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn single_line_is_not_a_voucher() {
        assert!(validate_lines(&[line(dec!(1), dec!(0))]).is_err());
    }

    #[test]
    fn normal_side_depends_on_account_type() {
        assert_eq!(normal_balance(AccountType::Asset, dec!(100), dec!(30)), dec!(70));
        assert_eq!(normal_balance(AccountType::Income, dec!(30), dec!(100)), dec!(70));
        assert_eq!(normal_balance(AccountType::Expense, dec!(5), dec!(0)), dec!(5));
    }

    #[test]
    fn payment_methods_map_to_receiving_accounts() {
        assert_eq!(receiving_account(PaymentMethod::Cash), keys::CASH);
        assert_eq!(receiving_account(PaymentMethod::Card), keys::BANK);
        assert_eq!(receiving_account(PaymentMethod::Fonepay), keys::DIGITAL_WALLET);
    }

    #[test]
    fn default_chart_parents_precede_children() {
        let mut seen = std::collections::HashSet::new();
        for seed in DEFAULT_CHART {
            if let Some(parent) = seed.parent {
                assert!(seen.contains(parent), "{} before its parent", seed.code);
            }
            seen.insert(seed.code);
        }
    }

    #[tokio::test]
    async fn seeded_chart_supports_a_posted_voucher_and_reversal() {
        use crate::db::{establish_connection_with_config, run_migrations, DbConfig};

        let db = establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        let db = Arc::new(db);
        let rid = Uuid::new_v4();
        let service = AccountingService::new(db.clone(), None, FiscalCalendar::default());
        let chart = service.seed_default_chart(rid).await.unwrap();
        let by_key = |k: &str| {
            chart
                .iter()
                .find(|a| a.system_key.as_deref() == Some(k))
                .unwrap()
                .id
        };

        let date = NaiveDate::from_ymd_opt(2024, 8, 1).unwrap();
        let created = service
            .create_voucher(
                rid,
                Uuid::new_v4(),
                CreateVoucherRequest {
                    voucher_type: VoucherType::Journal,
                    voucher_date: Some(date),
                    narration: "Capital introduced".into(),
                    lines: vec![
                        VoucherLineInput {
                            account_id: by_key(keys::CASH),
                            debit: dec!(10000),
                            credit: Decimal::ZERO,
                            description: None,
                        },
                        VoucherLineInput {
                            account_id: by_key(keys::CAPITAL),
                            debit: Decimal::ZERO,
                            credit: dec!(10000),
                            description: None,
                        },
                    ],
                    post_now: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(created.voucher.voucher_number, "JV-2081/82-00001");

        let tb = service.trial_balance(rid, date).await.unwrap();
        assert!(tb.is_balanced);
        assert_eq!(tb.total_debit.round_dp(2), dec!(10000));

        service
            .cancel_voucher(rid, created.voucher.id, "entered twice".into())
            .await
            .unwrap();
        let tb = service.trial_balance(rid, date).await.unwrap();
        assert!(tb.rows.is_empty());
    }
}
