//! Notification service trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{CourseId, Money, OrderId, PaymentId, UserId};

use crate::error::ServiceError;

/// Content of a purchase receipt email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentReceipt {
    pub email: String,
    pub name: String,
    pub amount: Money,
    pub order_id: OrderId,
    pub payment_id: PaymentId,
}

/// A notification that was delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Enrollment { user_id: UserId, course_id: CourseId },
    Receipt(PaymentReceipt),
}

/// Trait for the transactional email service.
///
/// Delivery is best-effort: the checkout flow logs failures and moves on.
#[async_trait]
pub trait NotificationClient: Send + Sync {
    async fn send_enrollment_email(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<(), ServiceError>;

    async fn send_payment_receipt(&self, receipt: &PaymentReceipt) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct InMemoryNotificationState {
    sent: Vec<Notification>,
    fail: bool,
}

/// In-memory notification service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationClient {
    state: Arc<RwLock<InMemoryNotificationState>>,
}

impl InMemoryNotificationClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures every send to fail.
    pub fn set_fail(&self, fail: bool) {
        self.state.write().unwrap().fail = fail;
    }

    /// Returns everything sent so far.
    pub fn sent(&self) -> Vec<Notification> {
        self.state.read().unwrap().sent.clone()
    }

    /// Returns the number of enrollment emails sent for the course.
    pub fn enrollment_emails_for(&self, course_id: &CourseId) -> usize {
        self.state
            .read()
            .unwrap()
            .sent
            .iter()
            .filter(|n| matches!(n, Notification::Enrollment { course_id: c, .. } if c == course_id))
            .count()
    }

    fn record(&self, notification: Notification) -> Result<(), ServiceError> {
        let mut state = self.state.write().unwrap();
        if state.fail {
            return Err(ServiceError::Unavailable("mailer offline".to_string()));
        }
        state.sent.push(notification);
        Ok(())
    }
}

#[async_trait]
impl NotificationClient for InMemoryNotificationClient {
    async fn send_enrollment_email(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<(), ServiceError> {
        self.record(Notification::Enrollment {
            user_id: user_id.clone(),
            course_id: course_id.clone(),
        })
    }

    async fn send_payment_receipt(&self, receipt: &PaymentReceipt) -> Result<(), ServiceError> {
        self.record(Notification::Receipt(receipt.clone()))
    }
}
