//! Per-course enrollment outcomes and the verification result.

use common::{CourseId, OrderId, PaymentId};
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// Why a course was not enrolled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnrollmentErrorKind {
    /// A mandatory call exceeded its deadline.
    Timeout,
    /// A mandatory collaborator was unreachable.
    Unavailable,
    /// A collaborator refused the enrollment.
    Conflict,
    /// The payment was ledgered by an earlier call and still awaits reconciliation.
    Pending,
}

impl From<&ServiceError> for EnrollmentErrorKind {
    fn from(err: &ServiceError) -> Self {
        match err {
            ServiceError::Timeout(_) => EnrollmentErrorKind::Timeout,
            ServiceError::Unavailable(_) => EnrollmentErrorKind::Unavailable,
            ServiceError::Conflict(_) | ServiceError::NotFound(_) | ServiceError::Rejected(_) => {
                EnrollmentErrorKind::Conflict
            }
        }
    }
}

/// The mandatory step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnrollmentStep {
    Catalog,
    Identity,
    Ledger,
}

/// Classified enrollment failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentFailure {
    pub kind: EnrollmentErrorKind,
    pub step: EnrollmentStep,
    pub message: String,
}

impl std::fmt::Display for EnrollmentFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} during {:?}: {}", self.kind, self.step, self.message)
    }
}

/// Enrollment result for one course within one saga run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentOutcome {
    pub course_id: CourseId,
    pub enrolled: bool,
    pub error: Option<EnrollmentFailure>,
}

impl EnrollmentOutcome {
    pub fn enrolled(course_id: CourseId) -> Self {
        Self {
            course_id,
            enrolled: true,
            error: None,
        }
    }

    pub fn failed(course_id: CourseId, step: EnrollmentStep, err: &ServiceError) -> Self {
        Self {
            course_id,
            enrolled: false,
            error: Some(EnrollmentFailure {
                kind: err.into(),
                step,
                message: err.to_string(),
            }),
        }
    }

    /// A replayed course whose ledger row has not reached `EnrollmentComplete`.
    pub fn pending(course_id: CourseId, last_error: Option<String>) -> Self {
        Self {
            course_id,
            enrolled: false,
            error: Some(EnrollmentFailure {
                kind: EnrollmentErrorKind::Pending,
                step: EnrollmentStep::Ledger,
                message: last_error.unwrap_or_else(|| "awaiting reconciliation".to_string()),
            }),
        }
    }
}

/// Terminal status of a verified payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerifyStatus {
    /// Every course is enrolled.
    Complete,
    /// Payment captured, some enrollments pending.
    Partial,
}

impl std::fmt::Display for VerifyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyStatus::Complete => write!(f, "Complete"),
            VerifyStatus::Partial => write!(f, "Partial"),
        }
    }
}

/// Aggregated result of a verification saga.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyResponse {
    pub status: VerifyStatus,
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    /// One outcome per requested course, in request order.
    pub outcomes: Vec<EnrollmentOutcome>,
}

impl VerifyResponse {
    pub fn from_outcomes(
        order_id: OrderId,
        payment_id: PaymentId,
        outcomes: Vec<EnrollmentOutcome>,
    ) -> Self {
        let status = if outcomes.iter().all(|o| o.enrolled) {
            VerifyStatus::Complete
        } else {
            VerifyStatus::Partial
        };
        Self {
            status,
            order_id,
            payment_id,
            outcomes,
        }
    }

    /// Courses that still need enrollment.
    pub fn failed_course_ids(&self) -> Vec<CourseId> {
        self.outcomes
            .iter()
            .filter(|o| !o.enrolled)
            .map(|o| o.course_id.clone())
            .collect()
    }
}
