//! Order orchestrator: the payment capture and verification saga.

use std::sync::Arc;
use std::time::Instant;

use common::{CourseId, Money, OrderId, PaymentId, UserId};
use ledger::{InsertOutcome, PaymentLedger, PaymentRecord};

use crate::config::CheckoutConfig;
use crate::enrollment::{Enroller, call_with_timeout};
use crate::error::{CheckoutError, Result, ServiceError};
use crate::intent::{CaptureResponse, PurchaseIntent, new_receipt_id, parse_course_ids};
use crate::outcome::{EnrollmentOutcome, VerifyResponse, VerifyStatus};
use crate::reconciler::EnrollmentReconciler;
use crate::services::{
    CatalogClient, CreateOrderRequest, IdentityClient, NotificationClient, OrderLine,
    PaymentGateway, PaymentReceipt,
};
use crate::signature::SignatureVerifier;
use crate::state::VerificationState;

/// A payment confirmation relayed by the client, as received.
#[derive(Debug, Clone, Default)]
pub struct VerifyPaymentRequest {
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    pub signature: Option<String>,
    pub course_ids: Option<Vec<String>>,
}

/// A confirmation whose fields are present and well-formed.
#[derive(Debug, Clone)]
struct VerifyPayment {
    order_id: OrderId,
    payment_id: PaymentId,
    signature: String,
    course_ids: Vec<CourseId>,
}

fn required(field: &'static str, value: Option<String>) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CheckoutError::InvalidRequest(format!("missing {field}")))
}

impl VerifyPaymentRequest {
    fn validate(self) -> Result<VerifyPayment> {
        let order_id = OrderId::parse(required("order id", self.order_id)?)
            .map_err(|e| CheckoutError::InvalidRequest(e.to_string()))?;
        let payment_id = PaymentId::parse(required("payment id", self.payment_id)?)
            .map_err(|e| CheckoutError::InvalidRequest(e.to_string()))?;
        let signature = required("signature", self.signature)?;
        let course_ids = parse_course_ids(&self.course_ids.unwrap_or_default())?;

        Ok(VerifyPayment {
            order_id,
            payment_id,
            signature,
            course_ids,
        })
    }
}

/// A receipt email request, as received.
#[derive(Debug, Clone, Default)]
pub struct SendReceiptRequest {
    pub order_id: Option<String>,
    pub payment_id: Option<String>,
    /// Amount in minor units as shown to the user.
    pub amount: Option<i64>,
}

/// Coordinates capture, verification and enrollment.
///
/// Cloning is cheap; every clone shares the same collaborators.
#[derive(Clone)]
pub struct OrderOrchestrator {
    config: Arc<CheckoutConfig>,
    verifier: SignatureVerifier,
    ledger: Arc<dyn PaymentLedger>,
    catalog: Arc<dyn CatalogClient>,
    identity: Arc<dyn IdentityClient>,
    notifier: Arc<dyn NotificationClient>,
    gateway: Arc<dyn PaymentGateway>,
    enroller: Enroller,
}

impl OrderOrchestrator {
    /// Creates a new orchestrator.
    pub fn new(
        config: CheckoutConfig,
        ledger: Arc<dyn PaymentLedger>,
        catalog: Arc<dyn CatalogClient>,
        identity: Arc<dyn IdentityClient>,
        notifier: Arc<dyn NotificationClient>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let enroller = Enroller::new(
            ledger.clone(),
            catalog.clone(),
            identity.clone(),
            notifier.clone(),
            config.call_timeout,
            config.max_concurrent_enrollments,
        );
        Self {
            verifier: SignatureVerifier::new(config.signing_secret.clone()),
            config: Arc::new(config),
            ledger,
            catalog,
            identity,
            notifier,
            gateway,
            enroller,
        }
    }

    /// Returns a reconciler working off this orchestrator's ledger.
    pub fn reconciler(&self) -> EnrollmentReconciler {
        EnrollmentReconciler::new(&self.config, self.ledger.clone(), self.enroller.clone())
    }

    /// Prices the requested courses and opens a processor order.
    ///
    /// Nothing is persisted: no money has moved yet. Every call mints a new
    /// receipt id, so client retries create separate processor orders.
    #[tracing::instrument(skip(self, course_ids), fields(user_id = %user_id))]
    pub async fn capture_payment(
        &self,
        user_id: &UserId,
        course_ids: &[String],
    ) -> Result<CaptureResponse> {
        let course_ids = parse_course_ids(course_ids)?;

        let mut snapshots = Vec::with_capacity(course_ids.len());
        for course_id in &course_ids {
            let snapshot =
                call_with_timeout(self.config.call_timeout, self.catalog.get_course(course_id))
                    .await
                    .map_err(|e| match e {
                        ServiceError::NotFound(_) => {
                            CheckoutError::NotFound(format!("course {course_id}"))
                        }
                        other => CheckoutError::Unavailable(format!("catalog: {other}")),
                    })?;
            snapshots.push(snapshot);
        }

        let intent = PurchaseIntent::from_snapshots(user_id.clone(), snapshots)?;
        if intent.total() < self.config.min_charge {
            return Err(CheckoutError::InvalidAmount {
                total: intent.total(),
                minimum: self.config.min_charge,
            });
        }

        let request = CreateOrderRequest {
            amount: intent.total(),
            currency: self.config.currency.clone(),
            receipt: new_receipt_id(),
            user_id: intent.user_id().clone(),
            lines: intent.lines().to_vec(),
        };
        let order = call_with_timeout(self.config.call_timeout, self.gateway.create_order(request))
            .await
            .map_err(|e| match e {
                ServiceError::Rejected(reason) => {
                    tracing::warn!(%reason, "processor refused order");
                    CheckoutError::InvalidRequest(reason)
                }
                other => {
                    tracing::error!(error = %other, "could not create processor order");
                    CheckoutError::GatewayUnavailable(other.to_string())
                }
            })?;

        metrics::counter!("checkout_captures_total").increment(1);
        tracing::info!(order_id = %order.order_id, amount = order.amount.minor(), "order created");

        Ok(CaptureResponse {
            order_id: order.order_id,
            amount: order.amount,
            currency: order.currency,
            receipt: order.receipt,
            per_course: intent.into_lines(),
        })
    }

    /// Verifies a payment confirmation, ledgers it and enrolls the student.
    ///
    /// Once the signature checks out the rest of the saga runs on its own
    /// task: dropping the returned future (client disconnect) only loses the
    /// response, never the enrollment.
    #[tracing::instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn verify_payment(
        &self,
        user_id: &UserId,
        request: VerifyPaymentRequest,
    ) -> Result<VerifyResponse> {
        let started = Instant::now();
        let state = VerificationState::Received;
        let cmd = request.validate()?;

        if !self
            .verifier
            .verify(&cmd.order_id, &cmd.payment_id, &cmd.signature)
            .is_valid()
        {
            return Err(self.reject(state, &cmd, user_id, "signature mismatch"));
        }
        let state = state.advance(VerificationState::SignatureChecked);

        let order = match call_with_timeout(
            self.config.call_timeout,
            self.gateway.fetch_order(&cmd.order_id),
        )
        .await
        {
            Ok(order) => order,
            Err(ServiceError::NotFound(_)) => {
                return Err(self.reject(state, &cmd, user_id, "order unknown to processor"));
            }
            Err(e) => return Err(CheckoutError::GatewayUnavailable(e.to_string())),
        };

        if &order.user_id != user_id {
            return Err(self.reject(state, &cmd, user_id, "order belongs to another user"));
        }

        let mut lines = Vec::with_capacity(cmd.course_ids.len());
        for course_id in &cmd.course_ids {
            match order.price_of(course_id) {
                Some(price) => lines.push(OrderLine {
                    course_id: course_id.clone(),
                    price,
                }),
                None => {
                    return Err(self.reject(state, &cmd, user_id, "course not covered by order"));
                }
            }
        }

        let saga = self.clone();
        let user_id = user_id.clone();
        let response = tokio::spawn(async move { saga.settle(state, user_id, cmd, lines).await })
            .await
            .map_err(|e| CheckoutError::Internal(format!("verification task failed: {e}")))??;

        metrics::histogram!("checkout_verify_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(response)
    }

    fn reject(
        &self,
        state: VerificationState,
        cmd: &VerifyPayment,
        user_id: &UserId,
        reason: &'static str,
    ) -> CheckoutError {
        state.advance(VerificationState::Rejected);
        metrics::counter!("checkout_payments_rejected_total").increment(1);
        tracing::warn!(
            fraud_signal = true,
            order_id = %cmd.order_id,
            payment_id = %cmd.payment_id,
            %user_id,
            reason,
            "payment confirmation rejected"
        );
        CheckoutError::PaymentRejected(reason.to_string())
    }

    /// Ledgers each course, then enrolls the ones this call ledgered.
    async fn settle(
        &self,
        state: VerificationState,
        user_id: UserId,
        cmd: VerifyPayment,
        lines: Vec<OrderLine>,
    ) -> Result<VerifyResponse> {
        let mut outcomes: Vec<Option<EnrollmentOutcome>> = vec![None; lines.len()];
        let mut fresh_idx = Vec::new();
        let mut fresh = Vec::new();

        for (idx, line) in lines.into_iter().enumerate() {
            let record = PaymentRecord::verified(
                cmd.order_id.clone(),
                cmd.payment_id.clone(),
                cmd.signature.clone(),
                line.course_id,
                user_id.clone(),
                line.price,
            );
            match self.ledger.insert(record).await? {
                InsertOutcome::Inserted(record) => {
                    fresh_idx.push(idx);
                    fresh.push(record);
                }
                InsertOutcome::AlreadyExists(existing) => {
                    tracing::info!(
                        course_id = %existing.course_id,
                        status = %existing.status,
                        "verification replayed, course already ledgered"
                    );
                    outcomes[idx] = Some(if existing.status.is_complete() {
                        EnrollmentOutcome::enrolled(existing.course_id)
                    } else {
                        EnrollmentOutcome::pending(existing.course_id, existing.last_error)
                    });
                }
            }
        }
        let state = state
            .advance(VerificationState::Ledgered)
            .advance(VerificationState::Enrolling);

        for (idx, outcome) in fresh_idx.into_iter().zip(self.enroller.fulfil_all(fresh).await) {
            outcomes[idx] = Some(outcome);
        }

        let response = VerifyResponse::from_outcomes(
            cmd.order_id,
            cmd.payment_id,
            outcomes.into_iter().flatten().collect(),
        );

        let state = match response.status {
            VerifyStatus::Complete => state.advance(VerificationState::Complete),
            VerifyStatus::Partial => state.advance(VerificationState::Partial),
        };
        metrics::counter!("checkout_verifications_total", "status" => state.as_str()).increment(1);

        if response.status == VerifyStatus::Partial {
            let failed: Vec<String> = response
                .failed_course_ids()
                .iter()
                .map(ToString::to_string)
                .collect();
            tracing::warn!(
                order_id = %response.order_id,
                payment_id = %response.payment_id,
                failed_course_ids = ?failed,
                "payment captured, some enrollments pending"
            );
        } else {
            tracing::info!(
                order_id = %response.order_id,
                payment_id = %response.payment_id,
                "payment verified and all courses enrolled"
            );
        }

        Ok(response)
    }

    /// Sends the purchase receipt for a ledgered payment.
    ///
    /// Never changes ledger or enrollment state.
    #[tracing::instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn send_receipt_email(
        &self,
        user_id: &UserId,
        request: SendReceiptRequest,
    ) -> Result<PaymentReceipt> {
        let order_id = OrderId::parse(required("order id", request.order_id)?)
            .map_err(|e| CheckoutError::InvalidRequest(e.to_string()))?;
        let payment_id = PaymentId::parse(required("payment id", request.payment_id)?)
            .map_err(|e| CheckoutError::InvalidRequest(e.to_string()))?;
        let amount = request
            .amount
            .map(Money::from_minor)
            .ok_or_else(|| CheckoutError::InvalidRequest("missing amount".to_string()))?;

        let rows: Vec<PaymentRecord> = self
            .ledger
            .list_for_payment(&order_id, &payment_id)
            .await?
            .into_iter()
            .filter(|r| &r.user_id == user_id)
            .collect();
        if rows.is_empty() {
            return Err(CheckoutError::NotFound(format!(
                "payment {payment_id} for order {order_id}"
            )));
        }

        let ledgered: Money = rows.iter().map(|r| r.amount).sum();
        if ledgered != amount {
            return Err(CheckoutError::InvalidRequest(format!(
                "amount {amount} does not match paid total {ledgered}"
            )));
        }

        let profile = call_with_timeout(self.config.call_timeout, self.identity.get_user(user_id))
            .await
            .map_err(|e| match e {
                ServiceError::NotFound(_) => CheckoutError::NotFound(format!("user {user_id}")),
                other => CheckoutError::Unavailable(format!("identity: {other}")),
            })?;

        let receipt = PaymentReceipt {
            email: profile.email.clone(),
            name: profile.full_name(),
            amount: ledgered,
            order_id,
            payment_id,
        };

        call_with_timeout(
            self.config.call_timeout,
            self.notifier.send_payment_receipt(&receipt),
        )
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "payment receipt not sent");
            CheckoutError::Unavailable(format!("notification: {e}"))
        })?;

        Ok(receipt)
    }

    /// Returns the user's ledgered payments, newest first.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn payment_history(&self, user_id: &UserId) -> Result<Vec<PaymentRecord>> {
        Ok(self.ledger.list_for_user(user_id).await?)
    }
}
