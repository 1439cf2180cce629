//! Property-based tests for the pure billing, voucher, loyalty and QR helpers.

use chrono::NaiveDate;
use proptest::prelude::*;
use restro_api::services::{
    accounting::{validate_lines, VoucherLineInput},
    billing::{compute_totals, copy_label},
    compliance::fiscal_year_label,
    loyalty::{normalize_phone, points_for},
    tables::qr_token,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn debit(amount: Decimal) -> VoucherLineInput {
    VoucherLineInput {
        account_id: Uuid::new_v4(),
        debit: amount,
        credit: Decimal::ZERO,
        description: None,
    }
}

fn credit(amount: Decimal) -> VoucherLineInput {
    VoucherLineInput {
        account_id: Uuid::new_v4(),
        debit: Decimal::ZERO,
        credit: amount,
        description: None,
    }
}

/// Amounts in paisa, turned into rupees with two decimals.
fn rupees(max_paisa: i64) -> impl Strategy<Value = Decimal> {
    (0i64..max_paisa).prop_map(|p| Decimal::new(p, 2))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn bill_total_is_the_sum_of_its_parts(
        subtotal in rupees(10_000_000),
        discount_share in 0u32..=100,
    ) {
        let discount = (subtotal * Decimal::from(discount_share) / dec!(100)).round_dp(2);
        let totals = compute_totals(subtotal, discount, Decimal::ZERO, dec!(0.10), dec!(0.13))
            .expect("discount within subtotal");

        prop_assert_eq!(
            totals.taxable_amount,
            totals.subtotal - totals.discount - totals.loyalty_discount + totals.service_charge
        );
        prop_assert_eq!(totals.total, totals.taxable_amount + totals.vat_amount);
        prop_assert!(totals.total >= Decimal::ZERO);
        prop_assert!(totals.service_charge.scale() <= 2);
        prop_assert!(totals.vat_amount.scale() <= 2);
    }

    #[test]
    fn discounts_beyond_the_subtotal_are_rejected(
        subtotal in rupees(1_000_000),
        excess in 1i64..100_000,
    ) {
        let discount = subtotal + Decimal::new(excess, 2);
        prop_assert!(
            compute_totals(subtotal, discount, Decimal::ZERO, dec!(0.10), dec!(0.13)).is_err()
        );
    }

    #[test]
    fn earned_points_never_exceed_the_rate(total in rupees(100_000_000)) {
        let points = points_for(total, dec!(0.01));
        prop_assert!(points >= 0);
        prop_assert!(Decimal::from(points) <= total * dec!(0.01));
        prop_assert!(Decimal::from(points + 1) > total * dec!(0.01));
    }

    #[test]
    fn mobile_numbers_normalise_with_or_without_country_code(rest in "[0-9]{8}", prefix in "98|97") {
        let local = format!("{prefix}{rest}");
        prop_assert_eq!(normalize_phone(&local).expect("valid"), local.clone());
        prop_assert_eq!(normalize_phone(&format!("+977-{local}")).expect("valid"), local);
    }

    #[test]
    fn qr_tokens_change_with_every_version(version in 1i32..1000) {
        let table_id = Uuid::new_v4();
        let current = qr_token("restro-qr-secret", table_id, version).expect("token");
        let next = qr_token("restro-qr-secret", table_id, version + 1).expect("token");
        prop_assert_ne!(&current, &next);
        prop_assert_eq!(
            current.clone(),
            qr_token("restro-qr-secret", table_id, version).expect("token")
        );
        prop_assert!(current.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn only_reprints_are_labelled_as_copies(print_number in 1i32..50) {
        let label = copy_label(print_number);
        prop_assert_eq!(label.is_some(), print_number > 1);
    }

    #[test]
    fn vouchers_balance_exactly(amounts in prop::collection::vec(1i64..10_000_000, 1..8)) {
        let amounts: Vec<Decimal> = amounts.into_iter().map(|p| Decimal::new(p, 2)).collect();
        let total: Decimal = amounts.iter().sum();

        let mut lines: Vec<VoucherLineInput> = amounts.iter().copied().map(debit).collect();
        lines.push(credit(total));
        prop_assert_eq!(validate_lines(&lines).expect("balanced"), total);

        let last = lines.len() - 1;
        lines[last] = credit(total + dec!(0.01));
        prop_assert!(validate_lines(&lines).is_err());
    }

    #[test]
    fn fiscal_year_labels_roll_over_on_shrawan_first(year in 2000i32..2100, ordinal in 1u32..=365) {
        let date = NaiveDate::from_yo_opt(year, ordinal).expect("valid day");
        let label = fiscal_year_label(date, 7, 16);
        let (start, end) = label.split_once('/').expect("YYYY/YY");
        let start: i32 = start.parse().expect("year");
        let end: i32 = end.parse().expect("short year");

        prop_assert_eq!(end, (start + 1) % 100);
        let boundary = NaiveDate::from_ymd_opt(year, 7, 16).expect("boundary");
        let expected = if date >= boundary { year + 57 } else { year + 56 };
        prop_assert_eq!(start, expected);
    }
}
