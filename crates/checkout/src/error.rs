//! Checkout error types.

use std::time::Duration;

use common::{CourseId, Money};
use ledger::LedgerError;
use thiserror::Error;

/// Result kind of a single collaborator call.
///
/// Collaborators never throw: every call returns one of these so the
/// orchestrator can tell transient failures from fatal ones.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The collaborator refused the change because of conflicting state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The collaborator could not be reached or failed internally.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The collaborator refused the request itself; resending it unchanged
    /// cannot succeed.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The call exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ServiceError {
    /// Returns true if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Unavailable(_) | ServiceError::Timeout(_))
    }
}

/// Errors returned by the order orchestrator.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The request is malformed; retrying without changes will not help.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A course, user or payment does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller already owns one of the requested courses.
    #[error("Student is already enrolled in course {course_id}")]
    AlreadyEnrolled { course_id: CourseId },

    /// The order total is below what the processor will charge.
    #[error("Order total {total} is below the minimum chargeable amount {minimum}")]
    InvalidAmount { total: Money, minimum: Money },

    /// The payment processor could not be reached.
    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// A collaborator service could not be reached.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The payment confirmation is not authentic or does not match the order.
    #[error("Payment rejected: {0}")]
    PaymentRejected(String),

    /// Ledger error.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The saga task ended abnormally.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckoutError {
    /// Returns true if the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckoutError::GatewayUnavailable(_)
                | CheckoutError::Unavailable(_)
                | CheckoutError::Ledger(_)
        )
    }
}

/// Convenience type alias for checkout results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
