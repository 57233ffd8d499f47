use crate::models::{CanonicalTransaction, PaymentMethod, RawRecord};
use chrono::{DateTime, NaiveDateTime};
use common::RowRejection;

const VOID_MARKER: &str = "VOID";

const NAIVE_TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Turns raw records into canonical transactions, or says why it can't.
#[derive(Debug, Clone, Default)]
pub struct RowValidator {
    amount_upper_bound: Option<f64>,
}

impl RowValidator {
    pub fn new(amount_upper_bound: Option<f64>) -> Self {
        Self { amount_upper_bound }
    }

    /// Checks run in a fixed order and the first failure wins: truck id,
    /// amount presence and shape, amount range, timestamp, payment kind.
    pub fn validate_and_coerce(
        &self,
        raw: &RawRecord,
    ) -> Result<CanonicalTransaction, RowRejection> {
        let truck_id = raw.truck_source_id.ok_or(RowRejection::MissingTruckId)?;
        let total = self.coerce_amount(raw.amount.as_deref())?;
        let occurred_at = parse_timestamp(raw.occurred_at.as_deref())?;
        let payment_method =
            PaymentMethod::parse(raw.payment_kind.as_deref().unwrap_or_default())?;

        Ok(CanonicalTransaction {
            truck_id,
            payment_method,
            total,
            occurred_at,
        })
    }

    fn coerce_amount(&self, amount: Option<&str>) -> Result<f64, RowRejection> {
        let text = amount.map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return Err(RowRejection::MissingAmount);
        }
        if text.eq_ignore_ascii_case(VOID_MARKER) {
            return Err(RowRejection::VoidAmount);
        }

        let value: f64 = text
            .parse()
            .ok()
            .filter(|v: &f64| v.is_finite())
            .ok_or_else(|| RowRejection::NonNumericAmount(text.to_string()))?;

        let cents = round_to_cents(value);
        if !cents.is_finite() {
            return Err(RowRejection::NonNumericAmount(text.to_string()));
        }
        if cents == 0.0 {
            return Err(RowRejection::ZeroAmount);
        }
        if cents < 0.0 {
            return Err(RowRejection::NonPositiveAmount(cents));
        }
        if let Some(bound) = self.amount_upper_bound {
            if value > bound {
                return Err(RowRejection::AboveUpperBound {
                    amount: value,
                    bound,
                });
            }
        }

        Ok(cents)
    }
}

pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Accepts `YYYY-MM-DD HH:MM[:SS[.fff]]` with a space or `T`, or RFC 3339 with
/// an offset (converted to UTC).
pub fn parse_timestamp(text: Option<&str>) -> Result<NaiveDateTime, RowRejection> {
    let text = text.map(str::trim).unwrap_or_default();
    if text.is_empty() {
        return Err(RowRejection::MissingTimestamp);
    }

    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.naive_utc())
        })
        .ok_or_else(|| RowRejection::UnparseableTimestamp(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn raw(amount: Option<&str>, kind: &str, at: &str) -> RawRecord {
        RawRecord {
            truck_source_id: Some(4),
            amount: amount.map(str::to_string),
            payment_kind: Some(kind.to_string()),
            occurred_at: Some(at.to_string()),
        }
    }

    #[test]
    fn test_valid_row_is_coerced() {
        let validator = RowValidator::new(Some(100.0));
        let tx = validator
            .validate_and_coerce(&raw(Some(" 12.346 "), "Card", "2024-01-01 10:00:00"))
            .unwrap();

        assert_eq!(tx.truck_id, 4);
        assert_eq!(tx.payment_method, PaymentMethod::Card);
        assert_eq!(tx.total, 12.35);
        assert_eq!(
            tx.occurred_at,
            NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_invalid_amounts_are_dropped() {
        let validator = RowValidator::default();
        let at = "2024-01-01 10:00:00";

        let cases = [
            (None, RowRejection::MissingAmount),
            (Some(""), RowRejection::MissingAmount),
            (Some("0"), RowRejection::ZeroAmount),
            (Some("0.00"), RowRejection::ZeroAmount),
            (Some("VOID"), RowRejection::VoidAmount),
            (Some("void"), RowRejection::VoidAmount),
            (Some("abc"), RowRejection::NonNumericAmount("abc".to_string())),
            (Some("NaN"), RowRejection::NonNumericAmount("NaN".to_string())),
            (Some("-3.50"), RowRejection::NonPositiveAmount(-3.5)),
            (Some("1.7e308"), RowRejection::NonNumericAmount("1.7e308".to_string())),
        ];

        for (amount, expected) in cases {
            assert_eq!(
                validator.validate_and_coerce(&raw(amount, "card", at)),
                Err(expected),
                "amount {:?}",
                amount
            );
        }
    }

    #[test]
    fn test_upper_bound_only_in_strict_mode() {
        let strict = RowValidator::new(Some(100.0));
        let lenient = RowValidator::new(None);
        let at = "2024-01-01 10:00:00";

        assert!(strict.validate_and_coerce(&raw(Some("100"), "cash", at)).is_ok());
        assert!(strict.validate_and_coerce(&raw(Some("0.01"), "cash", at)).is_ok());
        assert_eq!(
            strict.validate_and_coerce(&raw(Some("100.50"), "cash", at)),
            Err(RowRejection::AboveUpperBound {
                amount: 100.5,
                bound: 100.0
            })
        );
        assert!(lenient.validate_and_coerce(&raw(Some("250.00"), "cash", at)).is_ok());
    }

    #[test]
    fn test_timestamp_and_payment_rules_follow_amount() {
        let validator = RowValidator::default();

        assert_eq!(
            validator.validate_and_coerce(&raw(Some("5"), "card", "yesterday")),
            Err(RowRejection::UnparseableTimestamp("yesterday".to_string()))
        );
        // The amount rule fires before the timestamp rule.
        assert_eq!(
            validator.validate_and_coerce(&raw(Some("VOID"), "card", "yesterday")),
            Err(RowRejection::VoidAmount)
        );
        assert_eq!(
            validator.validate_and_coerce(&raw(Some("5"), "mobile", "2024-01-01 10:00:00")),
            Err(RowRejection::UnknownPaymentKind("mobile".to_string()))
        );
    }

    #[test]
    fn test_missing_truck_id_drops_row() {
        let validator = RowValidator::default();
        let mut record = raw(Some("5"), "card", "2024-01-01 10:00:00");
        record.truck_source_id = None;

        assert_eq!(
            validator.validate_and_coerce(&record),
            Err(RowRejection::MissingTruckId)
        );
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 11, 4)
            .unwrap()
            .and_hms_opt(12, 30, 0)
            .unwrap();

        for text in [
            "2024-11-04 12:30:00",
            "2024-11-04T12:30:00",
            "2024-11-04 12:30",
            "2024-11-04T13:30:00+01:00",
            "2024-11-04T12:30:00Z",
        ] {
            assert_eq!(parse_timestamp(Some(text)), Ok(expected), "{}", text);
        }
        assert_eq!(
            parse_timestamp(Some("2024-11-04 12:30:00.250")).unwrap(),
            expected + chrono::Duration::milliseconds(250)
        );
        assert_eq!(parse_timestamp(None), Err(RowRejection::MissingTimestamp));
    }
}
