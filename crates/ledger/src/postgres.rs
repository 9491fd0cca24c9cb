use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CourseId, Money, OrderId, PaymentId, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    InsertOutcome, LedgerError, LedgerKey, PaymentRecord, PaymentStatus, Result,
    store::{PaymentLedger, check_transition},
};

const COLUMNS: &str = "order_id, payment_id, course_id, user_id, signature, amount, status, \
                       enrollment_attempts, last_error, created_at, updated_at";

/// PostgreSQL-backed payment ledger.
///
/// The idempotency key is the table's primary key, so concurrent replays of
/// the same verification race on the constraint rather than on a read.
#[derive(Clone)]
pub struct PostgresPaymentLedger {
    pool: PgPool,
}

impl PostgresPaymentLedger {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<PaymentRecord> {
        let corrupt = |e: common::IdError| LedgerError::Corrupt(e.to_string());
        let status: String = row.try_get("status")?;
        let attempts: i32 = row.try_get("enrollment_attempts")?;

        Ok(PaymentRecord {
            order_id: OrderId::parse(row.try_get::<String, _>("order_id")?).map_err(corrupt)?,
            payment_id: PaymentId::parse(row.try_get::<String, _>("payment_id")?)
                .map_err(corrupt)?,
            signature: row.try_get("signature")?,
            course_id: CourseId::parse(row.try_get::<String, _>("course_id")?).map_err(corrupt)?,
            user_id: UserId::parse(row.try_get::<String, _>("user_id")?).map_err(corrupt)?,
            amount: Money::from_minor(row.try_get("amount")?),
            status: status.parse().map_err(LedgerError::Corrupt)?,
            enrollment_attempts: u32::try_from(attempts)
                .map_err(|_| LedgerError::Corrupt(format!("negative attempt count {attempts}")))?,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn fetch(
        &self,
        executor: impl sqlx::PgExecutor<'_>,
        key: &LedgerKey,
        for_update: bool,
    ) -> Result<Option<PaymentRecord>> {
        let lock = if for_update { " FOR UPDATE" } else { "" };
        let sql = format!(
            "SELECT {COLUMNS} FROM payment_records \
             WHERE order_id = $1 AND payment_id = $2 AND course_id = $3{lock}"
        );
        let row = sqlx::query(&sql)
            .bind(key.order_id.as_str())
            .bind(key.payment_id.as_str())
            .bind(key.course_id.as_str())
            .fetch_optional(executor)
            .await?;

        row.map(Self::row_to_record).transpose()
    }
}

#[async_trait]
impl PaymentLedger for PostgresPaymentLedger {
    async fn insert(&self, record: PaymentRecord) -> Result<InsertOutcome> {
        let sql = format!(
            r#"
            INSERT INTO payment_records ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT ON CONSTRAINT payment_records_idempotency_key DO NOTHING
            RETURNING {COLUMNS}
            "#
        );
        let inserted = sqlx::query(&sql)
            .bind(record.order_id.as_str())
            .bind(record.payment_id.as_str())
            .bind(record.course_id.as_str())
            .bind(record.user_id.as_str())
            .bind(&record.signature)
            .bind(record.amount.minor())
            .bind(record.status.as_str())
            .bind(record.enrollment_attempts as i32)
            .bind(&record.last_error)
            .bind(record.created_at)
            .bind(record.updated_at)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = inserted {
            metrics::counter!("ledger_inserts_total", "outcome" => "inserted").increment(1);
            return Ok(InsertOutcome::Inserted(Self::row_to_record(row)?));
        }

        let key = record.key();
        metrics::counter!("ledger_inserts_total", "outcome" => "duplicate").increment(1);
        tracing::debug!(%key, "payment record already ledgered");
        let existing = self
            .fetch(&self.pool, &key, false)
            .await?
            .ok_or(LedgerError::NotFound(key))?;
        Ok(InsertOutcome::AlreadyExists(existing))
    }

    async fn get(&self, key: &LedgerKey) -> Result<Option<PaymentRecord>> {
        self.fetch(&self.pool, key, false).await
    }

    async fn update_status(
        &self,
        key: &LedgerKey,
        status: PaymentStatus,
    ) -> Result<PaymentRecord> {
        let mut tx = self.pool.begin().await?;

        let current = self
            .fetch(&mut *tx, key, true)
            .await?
            .ok_or_else(|| LedgerError::NotFound(key.clone()))?;
        check_transition(key, current.status, status)?;

        let sql = format!(
            r#"
            UPDATE payment_records
            SET status = $4,
                last_error = CASE WHEN $4 = 'EnrollmentComplete' THEN NULL ELSE last_error END,
                updated_at = NOW()
            WHERE order_id = $1 AND payment_id = $2 AND course_id = $3
            RETURNING {COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(key.order_id.as_str())
            .bind(key.payment_id.as_str())
            .bind(key.course_id.as_str())
            .bind(status.as_str())
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Self::row_to_record(row)
    }

    async fn record_failed_attempt(&self, key: &LedgerKey, error: &str) -> Result<PaymentRecord> {
        let sql = format!(
            r#"
            UPDATE payment_records
            SET enrollment_attempts = enrollment_attempts + 1,
                last_error = $4,
                updated_at = NOW()
            WHERE order_id = $1 AND payment_id = $2 AND course_id = $3
            RETURNING {COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(key.order_id.as_str())
            .bind(key.payment_id.as_str())
            .bind(key.course_id.as_str())
            .bind(error)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::NotFound(key.clone()))?;

        Self::row_to_record(row)
    }

    async fn list_for_payment(
        &self,
        order_id: &OrderId,
        payment_id: &PaymentId,
    ) -> Result<Vec<PaymentRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM payment_records \
             WHERE order_id = $1 AND payment_id = $2 ORDER BY course_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(order_id.as_str())
            .bind(payment_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<PaymentRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM payment_records \
             WHERE user_id = $1 ORDER BY created_at DESC, course_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn pending_enrollments(
        &self,
        limit: usize,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<PaymentRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM payment_records \
             WHERE status = 'Verified' AND created_at < $1 \
             ORDER BY created_at ASC, course_id ASC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(older_than)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }
}
