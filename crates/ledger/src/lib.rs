//! Payment ledger: the durable, insert-only record of settled payments.
//!
//! One [`PaymentRecord`] exists per course per verified payment. The
//! `(order_id, payment_id, course_id)` triple is the idempotency key and is
//! enforced by every [`PaymentLedger`] implementation, so replayed
//! verifications are detected instead of re-inserted.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;

pub use error::{LedgerError, Result};
pub use memory::InMemoryPaymentLedger;
pub use postgres::PostgresPaymentLedger;
pub use record::{LedgerKey, PaymentRecord, PaymentStatus};
pub use store::{InsertOutcome, PaymentLedger};
