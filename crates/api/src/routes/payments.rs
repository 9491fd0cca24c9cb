//! Payment capture, verification, receipt and reconciliation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{FromRequestParts, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use checkout::{
    CaptureResponse, EnrollmentOutcome, EnrollmentReconciler, OrderOrchestrator, ReconcileReport,
    SendReceiptRequest, VerifyPaymentRequest, VerifyResponse, VerifyStatus,
};
use common::{CourseId, OrderId, PaymentId, UserId};
use ledger::{LedgerKey, PaymentRecord};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Header carrying the authenticated caller, set by the upstream gateway.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub orchestrator: OrderOrchestrator,
    pub reconciler: EnrollmentReconciler,
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct Caller(pub UserId);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| UserId::parse(v.trim()).ok())
            .map(Caller)
            .ok_or(ApiError::Unauthorized)
    }
}

// -- Request types --

#[derive(Deserialize)]
pub struct CapturePaymentBody {
    #[serde(default)]
    pub courses: Vec<String>,
}

#[derive(Deserialize)]
pub struct VerifyPaymentBody {
    pub razorpay_order_id: Option<String>,
    pub razorpay_payment_id: Option<String>,
    pub razorpay_signature: Option<String>,
    pub courses: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEmailBody {
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub amount: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayBody {
    pub order_id: String,
    pub payment_id: String,
    pub course_id: String,
}

// -- Response types --

#[derive(Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    fn data(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: None,
            data: Some(data),
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineResponse {
    pub course_id: String,
    pub price: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResponseBody {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub courses: Vec<OrderLineResponse>,
}

impl From<CaptureResponse> for CaptureResponseBody {
    fn from(capture: CaptureResponse) -> Self {
        Self {
            id: capture.order_id.to_string(),
            amount: capture.amount.minor(),
            currency: capture.currency,
            receipt: capture.receipt,
            courses: capture
                .per_course
                .into_iter()
                .map(|l| OrderLineResponse {
                    course_id: l.course_id.to_string(),
                    price: l.price.minor(),
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponseBody {
    pub status: String,
    pub order_id: String,
    pub payment_id: String,
    pub enrolled_course_ids: Vec<String>,
    pub failed_course_ids: Vec<String>,
    pub outcomes: Vec<EnrollmentOutcome>,
}

impl From<VerifyResponse> for VerifyResponseBody {
    fn from(response: VerifyResponse) -> Self {
        let ids = |enrolled: bool| {
            response
                .outcomes
                .iter()
                .filter(|o| o.enrolled == enrolled)
                .map(|o| o.course_id.to_string())
                .collect()
        };
        Self {
            status: response.status.to_string(),
            order_id: response.order_id.to_string(),
            payment_id: response.payment_id.to_string(),
            enrolled_course_ids: ids(true),
            failed_course_ids: ids(false),
            outcomes: response.outcomes,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentHistoryEntry {
    pub order_id: String,
    pub payment_id: String,
    pub course_id: String,
    pub amount: i64,
    pub status: String,
    pub enrollment_attempts: u32,
    pub created_at: String,
}

impl From<PaymentRecord> for PaymentHistoryEntry {
    fn from(record: PaymentRecord) -> Self {
        Self {
            order_id: record.order_id.to_string(),
            payment_id: record.payment_id.to_string(),
            course_id: record.course_id.to_string(),
            amount: record.amount.minor(),
            status: record.status.to_string(),
            enrollment_attempts: record.enrollment_attempts,
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

// -- Handlers --

/// POST /api/v1/payment/capturePayment: price the courses and open an order.
#[tracing::instrument(skip(state, body), fields(user_id = %user_id))]
pub async fn capture(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(body): Json<CapturePaymentBody>,
) -> Result<Json<Envelope<CaptureResponseBody>>, ApiError> {
    let capture = state
        .orchestrator
        .capture_payment(&user_id, &body.courses)
        .await?;
    Ok(Envelope::data(capture.into()))
}

/// POST /api/v1/payment/verifyPayment: verify, ledger and enroll.
///
/// Responds 200 when every course is enrolled and 202 when some enrollments
/// are still pending.
#[tracing::instrument(skip(state, body), fields(user_id = %user_id))]
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(body): Json<VerifyPaymentBody>,
) -> Result<(StatusCode, Json<Envelope<VerifyResponseBody>>), ApiError> {
    let request = VerifyPaymentRequest {
        order_id: body.razorpay_order_id,
        payment_id: body.razorpay_payment_id,
        signature: body.razorpay_signature,
        course_ids: body.courses,
    };
    let response = state.orchestrator.verify_payment(&user_id, request).await?;

    let (status, message) = match response.status {
        VerifyStatus::Complete => (StatusCode::OK, "Payment Verified"),
        VerifyStatus::Partial => (
            StatusCode::ACCEPTED,
            "Payment Verified, some enrollments are pending",
        ),
    };
    Ok((
        status,
        Json(Envelope {
            success: true,
            message: Some(message.to_string()),
            data: Some(response.into()),
        }),
    ))
}

/// POST /api/v1/payment/sendPaymentSuccessEmail: send the purchase receipt.
#[tracing::instrument(skip(state, body), fields(user_id = %user_id))]
pub async fn send_success_email(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
    Json(body): Json<PaymentEmailBody>,
) -> Result<Json<Envelope<()>>, ApiError> {
    state
        .orchestrator
        .send_receipt_email(
            &user_id,
            SendReceiptRequest {
                order_id: body.order_id,
                payment_id: body.payment_id,
                amount: body.amount,
            },
        )
        .await?;
    Ok(Json(Envelope {
        success: true,
        message: Some("Payment success email sent".to_string()),
        data: None,
    }))
}

/// GET /api/v1/payment/paymentHistory: the caller's payments, newest first.
#[tracing::instrument(skip(state), fields(user_id = %user_id))]
pub async fn history(
    State(state): State<Arc<AppState>>,
    Caller(user_id): Caller,
) -> Result<Json<Envelope<Vec<PaymentHistoryEntry>>>, ApiError> {
    let records = state.orchestrator.payment_history(&user_id).await?;
    Ok(Envelope::data(records.into_iter().map(Into::into).collect()))
}

/// POST /api/v1/payment/reconcile: run one reconciler pass now.
#[tracing::instrument(skip(state))]
pub async fn reconcile(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Envelope<ReconcileReport>>, ApiError> {
    let report = state.reconciler.run_once().await?;
    Ok(Envelope::data(report))
}

/// POST /api/v1/payment/replay: re-drive enrollment for one ledger row.
#[tracing::instrument(skip(state, body))]
pub async fn replay(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ReplayBody>,
) -> Result<Json<Envelope<EnrollmentOutcome>>, ApiError> {
    let bad = |e: common::IdError| ApiError::BadRequest(e.to_string());
    let key = LedgerKey::new(
        OrderId::parse(body.order_id).map_err(bad)?,
        PaymentId::parse(body.payment_id).map_err(bad)?,
        CourseId::parse(body.course_id).map_err(bad)?,
    );
    let outcome = state.reconciler.replay(&key).await?;
    Ok(Envelope::data(outcome))
}
