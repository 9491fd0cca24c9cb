use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId, UserId};
use tokio::sync::RwLock;

use crate::{
    InsertOutcome, LedgerError, LedgerKey, PaymentRecord, PaymentStatus, Result,
    store::{PaymentLedger, check_transition},
};

/// In-memory payment ledger for testing and single-node development.
///
/// Enforces the same idempotency key and status rules as the PostgreSQL
/// implementation.
#[derive(Clone, Default)]
pub struct InMemoryPaymentLedger {
    records: Arc<RwLock<HashMap<LedgerKey, PaymentRecord>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryPaymentLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of rows stored.
    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    /// Makes every subsequent call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentLedger for InMemoryPaymentLedger {
    async fn insert(&self, record: PaymentRecord) -> Result<InsertOutcome> {
        self.check_available()?;
        let key = record.key();
        let mut records = self.records.write().await;

        if let Some(existing) = records.get(&key) {
            metrics::counter!("ledger_inserts_total", "outcome" => "duplicate").increment(1);
            return Ok(InsertOutcome::AlreadyExists(existing.clone()));
        }

        metrics::counter!("ledger_inserts_total", "outcome" => "inserted").increment(1);
        records.insert(key, record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    async fn get(&self, key: &LedgerKey) -> Result<Option<PaymentRecord>> {
        self.check_available()?;
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn update_status(
        &self,
        key: &LedgerKey,
        status: PaymentStatus,
    ) -> Result<PaymentRecord> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| LedgerError::NotFound(key.clone()))?;

        check_transition(key, record.status, status)?;

        record.status = status;
        if status.is_complete() {
            record.last_error = None;
        }
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn record_failed_attempt(&self, key: &LedgerKey, error: &str) -> Result<PaymentRecord> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let record = records
            .get_mut(key)
            .ok_or_else(|| LedgerError::NotFound(key.clone()))?;

        record.enrollment_attempts += 1;
        record.last_error = Some(error.to_string());
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn list_for_payment(
        &self,
        order_id: &OrderId,
        payment_id: &PaymentId,
    ) -> Result<Vec<PaymentRecord>> {
        self.check_available()?;
        let records = self.records.read().await;
        let mut rows: Vec<_> = records
            .values()
            .filter(|r| &r.order_id == order_id && &r.payment_id == payment_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.course_id.cmp(&b.course_id));
        Ok(rows)
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<PaymentRecord>> {
        self.check_available()?;
        let records = self.records.read().await;
        let mut rows: Vec<_> = records
            .values()
            .filter(|r| &r.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.course_id.cmp(&b.course_id))
        });
        Ok(rows)
    }

    async fn pending_enrollments(
        &self,
        limit: usize,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<PaymentRecord>> {
        self.check_available()?;
        let records = self.records.read().await;
        let mut rows: Vec<_> = records
            .values()
            .filter(|r| r.status == PaymentStatus::Verified && r.created_at < older_than)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.course_id.cmp(&b.course_id))
        });
        rows.truncate(limit);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use common::{CourseId, Money};

    use super::*;

    fn record(order: &str, course: &str, user: &str) -> PaymentRecord {
        PaymentRecord::verified(
            OrderId::parse(order).unwrap(),
            PaymentId::parse(format!("pay_{order}")).unwrap(),
            "sig",
            CourseId::parse(course).unwrap(),
            UserId::parse(user).unwrap(),
            Money::from_minor(500),
        )
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let ledger = InMemoryPaymentLedger::new();
        let first = ledger.insert(record("o1", "c1", "u1")).await.unwrap();
        assert!(first.is_new());

        let mut replay = record("o1", "c1", "u1");
        replay.amount = Money::from_minor(1);
        let second = ledger.insert(replay).await.unwrap();

        assert!(!second.is_new());
        assert_eq!(second.record().amount, Money::from_minor(500));
        assert_eq!(ledger.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_distinct_courses_are_distinct_rows() {
        let ledger = InMemoryPaymentLedger::new();
        ledger.insert(record("o1", "c1", "u1")).await.unwrap();
        ledger.insert(record("o1", "c2", "u1")).await.unwrap();

        let rows = ledger
            .list_for_payment(
                &OrderId::parse("o1").unwrap(),
                &PaymentId::parse("pay_o1").unwrap(),
            )
            .await
            .unwrap();
        let courses: Vec<_> = rows.iter().map(|r| r.course_id.as_str()).collect();
        assert_eq!(courses, ["c1", "c2"]);
    }

    #[tokio::test]
    async fn test_update_status_forward_only() {
        let ledger = InMemoryPaymentLedger::new();
        let key = record("o1", "c1", "u1").key();
        ledger.insert(record("o1", "c1", "u1")).await.unwrap();

        let updated = ledger
            .update_status(&key, PaymentStatus::EnrollmentComplete)
            .await
            .unwrap();
        assert_eq!(updated.status, PaymentStatus::EnrollmentComplete);

        let err = ledger
            .update_status(&key, PaymentStatus::EnrollmentPartial)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let ledger = InMemoryPaymentLedger::new();
        let key = record("o1", "c1", "u1").key();
        let err = ledger
            .update_status(&key, PaymentStatus::EnrollmentComplete)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_failed_attempts_accumulate() {
        let ledger = InMemoryPaymentLedger::new();
        let key = record("o1", "c1", "u1").key();
        ledger.insert(record("o1", "c1", "u1")).await.unwrap();

        ledger.record_failed_attempt(&key, "timeout").await.unwrap();
        let row = ledger
            .record_failed_attempt(&key, "unavailable")
            .await
            .unwrap();
        assert_eq!(row.enrollment_attempts, 2);
        assert_eq!(row.last_error.as_deref(), Some("unavailable"));

        let done = ledger
            .update_status(&key, PaymentStatus::EnrollmentComplete)
            .await
            .unwrap();
        assert_eq!(done.last_error, None);
    }

    #[tokio::test]
    async fn test_pending_enrollments_only_verified() {
        let ledger = InMemoryPaymentLedger::new();
        ledger.insert(record("o1", "c1", "u1")).await.unwrap();
        ledger.insert(record("o2", "c2", "u1")).await.unwrap();
        ledger
            .update_status(
                &record("o2", "c2", "u1").key(),
                PaymentStatus::EnrollmentComplete,
            )
            .await
            .unwrap();

        let later = Utc::now() + Duration::seconds(1);
        let pending = ledger.pending_enrollments(10, later).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].course_id.as_str(), "c1");

        let earlier = Utc::now() - Duration::hours(1);
        assert!(ledger.pending_enrollments(10, earlier).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_for_user_filters() {
        let ledger = InMemoryPaymentLedger::new();
        ledger.insert(record("o1", "c1", "u1")).await.unwrap();
        ledger.insert(record("o2", "c2", "u2")).await.unwrap();

        let rows = ledger
            .list_for_user(&UserId::parse("u1").unwrap())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].order_id.as_str(), "o1");
    }

    #[tokio::test]
    async fn test_unavailable_ledger_fails() {
        let ledger = InMemoryPaymentLedger::new();
        ledger.set_unavailable(true);
        let err = ledger.insert(record("o1", "c1", "u1")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Database(_)));
        ledger.set_unavailable(false);
        assert_eq!(ledger.record_count().await, 0);
    }
}
