//! Ledger rows and their status machine.

use chrono::{DateTime, Utc};
use common::{CourseId, Money, OrderId, PaymentId, UserId};
use serde::{Deserialize, Serialize};

/// Fulfilment status of one ledgered course.
///
/// Transitions are forward-only:
/// ```text
/// Verified ──┬──► EnrollmentComplete
///            └──► EnrollmentPartial ──► EnrollmentComplete
/// ```
/// `Verified` rows are the reconciler's work queue. `EnrollmentPartial`
/// rows exhausted their automatic retries and wait for an operator replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentStatus {
    /// Signature verified and payment ledgered; enrollment not yet confirmed.
    #[default]
    Verified,

    /// Catalog and identity both reflect the enrollment (terminal).
    EnrollmentComplete,

    /// Automatic enrollment retries were exhausted.
    EnrollmentPartial,
}

impl PaymentStatus {
    /// Returns true if a record may move from `self` to `next`.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Verified, PaymentStatus::EnrollmentComplete)
                | (PaymentStatus::Verified, PaymentStatus::EnrollmentPartial)
                | (PaymentStatus::EnrollmentPartial, PaymentStatus::EnrollmentComplete)
        )
    }

    /// Returns true if enrollment for this record is finished.
    pub fn is_complete(&self) -> bool {
        matches!(self, PaymentStatus::EnrollmentComplete)
    }

    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Verified => "Verified",
            PaymentStatus::EnrollmentComplete => "EnrollmentComplete",
            PaymentStatus::EnrollmentPartial => "EnrollmentPartial",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Verified" => Ok(PaymentStatus::Verified),
            "EnrollmentComplete" => Ok(PaymentStatus::EnrollmentComplete),
            "EnrollmentPartial" => Ok(PaymentStatus::EnrollmentPartial),
            other => Err(format!("unknown payment status {other:?}")),
        }
    }
}

/// The idempotency key of a ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub course_id: CourseId,
}

impl LedgerKey {
    pub fn new(order_id: OrderId, payment_id: PaymentId, course_id: CourseId) -> Self {
        Self {
            order_id,
            payment_id,
            course_id,
        }
    }
}

impl std::fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.order_id, self.payment_id, self.course_id)
    }
}

/// One course paid for by one verified payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub signature: String,
    pub course_id: CourseId,
    pub user_id: UserId,
    pub amount: Money,
    pub status: PaymentStatus,
    /// Failed enrollment attempts made after the initial saga run.
    pub enrollment_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    /// Builds a freshly verified record, ready for insertion.
    pub fn verified(
        order_id: OrderId,
        payment_id: PaymentId,
        signature: impl Into<String>,
        course_id: CourseId,
        user_id: UserId,
        amount: Money,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            payment_id,
            signature: signature.into(),
            course_id,
            user_id,
            amount,
            status: PaymentStatus::Verified,
            enrollment_attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the idempotency key of this record.
    pub fn key(&self) -> LedgerKey {
        LedgerKey::new(
            self.order_id.clone(),
            self.payment_id.clone(),
            self.course_id.clone(),
        )
    }
}
