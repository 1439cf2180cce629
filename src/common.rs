/// Common types and utilities shared across handlers and services
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::errors::ServiceError;

static PAN_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{9}$").unwrap());

/// Rounds a money amount to paisa, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Nepal PAN/VAT numbers are exactly nine digits.
pub fn validate_pan(pan: &str) -> Result<(), ServiceError> {
    if PAN_PATTERN.is_match(pan.trim()) {
        Ok(())
    } else {
        Err(ServiceError::ValidationError(format!(
            "PAN must be exactly 9 digits, got '{}'",
            pan
        )))
    }
}

/// Date range parameters for filtering queries
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DateRangeParams {
    /// Inclusive start date (YYYY-MM-DD); defaults to `to`
    pub from: Option<NaiveDate>,
    /// Inclusive end date (YYYY-MM-DD); defaults to today
    pub to: Option<NaiveDate>,
}

impl DateRangeParams {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    /// Resolves missing bounds against `today` and rejects inverted ranges.
    pub fn resolve(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), ServiceError> {
        let to = self.to.unwrap_or(today);
        let from = self.from.unwrap_or(to);
        if from > to {
            return Err(ServiceError::ValidationError(format!(
                "Invalid date range: {} is after {}",
                from, to
            )));
        }
        Ok((from, to))
    }
}

/// Page/limit query parameters
#[derive(Debug, Clone, Deserialize, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
        }
    }
}

impl PaginationParams {
    pub const MAX_LIMIT: u64 = 100;

    pub fn page(&self) -> u64 {
        self.page.max(1)
    }

    pub fn limit(&self) -> u64 {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }

    /// Zero-based page index, the form `Paginator::fetch_page` expects.
    pub fn page_index(&self) -> u64 {
        self.page() - 1
    }
}

fn default_page() -> u64 {
    1
}

fn default_limit() -> u64 {
    20
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    #[rstest]
    #[case(dec!(10.005), dec!(10.01))]
    #[case(dec!(10.004), dec!(10.00))]
    #[case(dec!(-2.345), dec!(-2.35))]
    #[case(dec!(130), dec!(130))]
    fn money_rounds_half_away_from_zero(#[case] input: Decimal, #[case] expected: Decimal) {
        assert_eq!(round_money(input), expected);
    }

    #[test]
    fn pan_must_be_nine_digits() {
        assert!(validate_pan("123456789").is_ok());
        assert!(validate_pan("12345678").is_err());
        assert!(validate_pan("12345678A").is_err());
    }

    #[test]
    fn date_range_defaults_and_inversion() {
        let today = NaiveDate::from_ymd_opt(2024, 8, 1).unwrap();
        let (from, to) = DateRangeParams::default().resolve(today).unwrap();
        assert_eq!((from, to), (today, today));

        let inverted = DateRangeParams::new(today, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        assert!(inverted.resolve(today).is_err());
    }

    #[test]
    fn pagination_is_clamped() {
        let params = PaginationParams { page: 0, limit: 500 };
        assert_eq!(params.page(), 1);
        assert_eq!(params.limit(), PaginationParams::MAX_LIMIT);
        assert_eq!(params.page_index(), 0);
    }
}
