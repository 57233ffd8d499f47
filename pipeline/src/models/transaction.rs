use chrono::NaiveDateTime;
use common::RowRejection;
use serde::Serialize;

/// One row as read from a source file, before any validation.
///
/// Every field except the truck id is untrusted text. The truck id comes from
/// the filename, never from the file body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub truck_source_id: Option<i32>,
    pub amount: Option<String>,
    pub payment_kind: Option<String>,
    pub occurred_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PaymentMethod {
    Card,
    Cash,
}

impl PaymentMethod {
    pub fn id(self) -> i32 {
        match self {
            PaymentMethod::Card => 1,
            PaymentMethod::Cash => 2,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            1 => Some(PaymentMethod::Card),
            2 => Some(PaymentMethod::Cash),
            _ => None,
        }
    }

    /// Case-insensitive lookup of the free-text payment kind.
    pub fn parse(kind: &str) -> Result<Self, RowRejection> {
        let trimmed = kind.trim();
        if trimmed.is_empty() {
            return Err(RowRejection::MissingPaymentKind);
        }
        match trimmed.to_lowercase().as_str() {
            "card" => Ok(PaymentMethod::Card),
            "cash" => Ok(PaymentMethod::Cash),
            _ => Err(RowRejection::UnknownPaymentKind(trimmed.to_string())),
        }
    }
}

/// A validated, load-ready fact row.
///
/// `total` is always strictly positive and already rounded to cents.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTransaction {
    pub truck_id: i32,
    pub payment_method: PaymentMethod,
    pub total: f64,
    pub occurred_at: NaiveDateTime,
}
