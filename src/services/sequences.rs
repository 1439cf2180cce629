use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, EntityTrait,
    QueryFilter,
};
use uuid::Uuid;

use crate::{
    entities::document_sequence::{self, Entity as SequenceEntity},
    errors::ServiceError,
};

/// Sequence kinds that are not voucher prefixes.
pub const INVOICE: &str = "INV";
pub const ORDER: &str = "ORD";

/// Takes the next number of a per-restaurant, per-fiscal-year counter.
///
/// Must run on the same transaction that stores the numbered document so a
/// rollback returns the number and the sequence stays gap-free.
pub async fn next_value<C>(
    conn: &C,
    restaurant_id: Uuid,
    kind: &str,
    fiscal_year: &str,
) -> Result<i64, ServiceError>
where
    C: ConnectionTrait,
{
    let scope = || {
        document_sequence::Column::RestaurantId
            .eq(restaurant_id)
            .and(document_sequence::Column::Kind.eq(kind))
            .and(document_sequence::Column::FiscalYear.eq(fiscal_year))
    };

    let updated = SequenceEntity::update_many()
        .col_expr(
            document_sequence::Column::NextValue,
            Expr::col(document_sequence::Column::NextValue).add(1),
        )
        .col_expr(document_sequence::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(scope())
        .exec(conn)
        .await?;

    if updated.rows_affected == 0 {
        document_sequence::ActiveModel {
            id: Set(Uuid::new_v4()),
            restaurant_id: Set(restaurant_id),
            kind: Set(kind.to_string()),
            fiscal_year: Set(fiscal_year.to_string()),
            next_value: Set(2),
            updated_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;
        return Ok(1);
    }

    let row = SequenceEntity::find()
        .filter(scope())
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::InternalError(format!("sequence {} vanished", kind)))?;

    Ok(row.next_value - 1)
}

pub fn format_invoice_number(fiscal_year: &str, n: i64) -> String {
    format!("{}-{:06}", fiscal_year, n)
}

pub fn format_voucher_number(prefix: &str, fiscal_year: &str, n: i64) -> String {
    format!("{}-{}-{:05}", prefix, fiscal_year, n)
}

pub fn format_ticket_number(prefix: &str, n: i64) -> String {
    format!("{}-{}", prefix, n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use sea_orm::TransactionTrait;

    #[test]
    fn document_numbers_are_zero_padded() {
        assert_eq!(format_invoice_number("2081/82", 7), "2081/82-000007");
        assert_eq!(format_voucher_number("SV", "2081/82", 12), "SV-2081/82-00012");
        assert_eq!(format_ticket_number("KOT", 3), "KOT-3");
    }

    #[tokio::test]
    async fn counters_are_scoped_and_rolled_back_with_the_transaction() {
        let db = establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .unwrap();
        run_migrations(&db).await.unwrap();
        let rid = Uuid::new_v4();

        assert_eq!(next_value(&db, rid, INVOICE, "2081/82").await.unwrap(), 1);
        assert_eq!(next_value(&db, rid, INVOICE, "2081/82").await.unwrap(), 2);
        assert_eq!(next_value(&db, rid, INVOICE, "2082/83").await.unwrap(), 1);
        assert_eq!(next_value(&db, rid, "JV", "2081/82").await.unwrap(), 1);

        let txn = db.begin().await.unwrap();
        assert_eq!(next_value(&txn, rid, INVOICE, "2081/82").await.unwrap(), 3);
        txn.rollback().await.unwrap();

        assert_eq!(next_value(&db, rid, INVOICE, "2081/82").await.unwrap(), 3);
    }
}
