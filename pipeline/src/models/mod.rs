mod transaction;

pub use transaction::{CanonicalTransaction, PaymentMethod, RawRecord};
