use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, UserId};

use crate::{LedgerError, LedgerKey, PaymentRecord, PaymentStatus, Result};

/// Result of a conditional insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The row did not exist and was written.
    Inserted(PaymentRecord),
    /// A row with the same idempotency key already exists; it is returned unchanged.
    AlreadyExists(PaymentRecord),
}

impl InsertOutcome {
    /// Returns the record that is now stored under the key.
    pub fn record(&self) -> &PaymentRecord {
        match self {
            InsertOutcome::Inserted(r) | InsertOutcome::AlreadyExists(r) => r,
        }
    }

    /// Returns true if this call wrote the row.
    pub fn is_new(&self) -> bool {
        matches!(self, InsertOutcome::Inserted(_))
    }
}

/// Core trait for payment ledger implementations.
///
/// Writes are insert-only and keyed by `(order_id, payment_id, course_id)`.
/// Apart from that uniqueness constraint no locking is required. All
/// implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Inserts the record unless its idempotency key is already present.
    async fn insert(&self, record: PaymentRecord) -> Result<InsertOutcome>;

    /// Fetches a single record by key.
    async fn get(&self, key: &LedgerKey) -> Result<Option<PaymentRecord>>;

    /// Moves a record forward to `status`, clearing `last_error` on completion.
    ///
    /// Fails with `InvalidTransition` if the move is not forward.
    async fn update_status(&self, key: &LedgerKey, status: PaymentStatus)
    -> Result<PaymentRecord>;

    /// Counts a failed enrollment attempt and stores its error.
    async fn record_failed_attempt(&self, key: &LedgerKey, error: &str) -> Result<PaymentRecord>;

    /// Returns every course row of one payment, in course id order.
    async fn list_for_payment(
        &self,
        order_id: &OrderId,
        payment_id: &PaymentId,
    ) -> Result<Vec<PaymentRecord>>;

    /// Returns a user's payment history, newest first.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<PaymentRecord>>;

    /// Returns `Verified` rows created before `older_than`, oldest first.
    async fn pending_enrollments(
        &self,
        limit: usize,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<PaymentRecord>>;
}

/// Validates a status change for the record under `key`.
pub fn check_transition(key: &LedgerKey, from: PaymentStatus, to: PaymentStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(LedgerError::InvalidTransition {
            key: key.clone(),
            from,
            to,
        })
    }
}
