//! Notification service adapter.

use async_trait::async_trait;
use checkout::{NotificationClient, PaymentReceipt, ServiceError};
use common::{CourseId, UserId};
use serde_json::json;

use super::{ServiceEndpoint, send};

/// Notification client backed by the notification service.
#[derive(Debug, Clone)]
pub struct HttpNotificationClient {
    endpoint: ServiceEndpoint,
}

impl HttpNotificationClient {
    pub fn new(endpoint: ServiceEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl NotificationClient for HttpNotificationClient {
    async fn send_enrollment_email(
        &self,
        user_id: &UserId,
        course_id: &CourseId,
    ) -> Result<(), ServiceError> {
        send(
            self.endpoint
                .post("/api/v1/notification/course-enrollment")
                .json(&json!({ "userId": user_id, "courseId": course_id })),
            "enrollment email",
        )
        .await?;
        Ok(())
    }

    async fn send_payment_receipt(&self, receipt: &PaymentReceipt) -> Result<(), ServiceError> {
        send(
            self.endpoint
                .post("/api/v1/notification/payment-success")
                .json(&json!({
                    "email": receipt.email,
                    "name": receipt.name,
                    "amount": receipt.amount.minor(),
                    "orderId": receipt.order_id,
                    "paymentId": receipt.payment_id,
                })),
            "payment receipt email",
        )
        .await?;
        Ok(())
    }
}
