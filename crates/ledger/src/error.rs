use thiserror::Error;

use crate::{LedgerKey, PaymentStatus};

/// Errors that can occur when interacting with the payment ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No row exists for the given idempotency key.
    #[error("Payment record not found: {0}")]
    NotFound(LedgerKey),

    /// The requested status change would move a record backwards.
    #[error("Invalid status transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: LedgerKey,
        from: PaymentStatus,
        to: PaymentStatus,
    },

    /// A stored row could not be mapped back to a record.
    #[error("Corrupt payment record: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
