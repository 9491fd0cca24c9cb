//! Integration tests for the checkout saga against in-memory collaborators.

use std::sync::Arc;
use std::time::Duration;

use checkout::{
    CaptureResponse, CheckoutConfig, CheckoutError, EnrollmentErrorKind, EnrollmentStep,
    InMemoryCatalogClient, InMemoryIdentityClient, InMemoryNotificationClient,
    InMemoryPaymentGateway, Notification, OrderOrchestrator, SendReceiptRequest, UserProfile,
    VerifyPaymentRequest, VerifyStatus,
};
use common::{CourseId, Money, OrderId, PaymentId, UserId};
use ledger::{InMemoryPaymentLedger, LedgerKey, PaymentLedger, PaymentStatus};

const SECRET: &str = "integration_secret";

struct TestHarness {
    orchestrator: OrderOrchestrator,
    ledger: InMemoryPaymentLedger,
    catalog: InMemoryCatalogClient,
    identity: InMemoryIdentityClient,
    notifier: InMemoryNotificationClient,
    gateway: InMemoryPaymentGateway,
    user: UserId,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_config(
            CheckoutConfig::new(SECRET)
                .with_call_timeout(Duration::from_millis(150))
                .with_reconcile_policy(2, Duration::ZERO),
        )
    }

    fn with_config(config: CheckoutConfig) -> Self {
        let ledger = InMemoryPaymentLedger::new();
        let catalog = InMemoryCatalogClient::new();
        let identity = InMemoryIdentityClient::new();
        let notifier = InMemoryNotificationClient::new();
        let gateway = InMemoryPaymentGateway::new(SECRET);

        catalog.add_course(&course("course-a"), Money::from_minor(500));
        catalog.add_course(&course("course-b"), Money::from_minor(300));

        let user = UserId::parse("student-1").unwrap();
        identity.add_user(UserProfile {
            user_id: user.clone(),
            email: "student@example.com".to_string(),
            first_name: "Meera".to_string(),
            last_name: "Iyer".to_string(),
        });

        let orchestrator = OrderOrchestrator::new(
            config,
            Arc::new(ledger.clone()),
            Arc::new(catalog.clone()),
            Arc::new(identity.clone()),
            Arc::new(notifier.clone()),
            Arc::new(gateway.clone()),
        );

        Self {
            orchestrator,
            ledger,
            catalog,
            identity,
            notifier,
            gateway,
            user,
        }
    }

    async fn capture(&self, ids: &[&str]) -> CaptureResponse {
        self.orchestrator
            .capture_payment(&self.user, &strings(ids))
            .await
            .unwrap()
    }

    /// Captures the courses and pays the resulting order.
    async fn paid(&self, ids: &[&str]) -> VerifyPaymentRequest {
        let capture = self.capture(ids).await;
        let (payment_id, signature) = self.gateway.pay(&capture.order_id).unwrap();
        VerifyPaymentRequest {
            order_id: Some(capture.order_id.to_string()),
            payment_id: Some(payment_id.to_string()),
            signature: Some(signature),
            course_ids: Some(strings(ids)),
        }
    }

    async fn status_of(&self, request: &VerifyPaymentRequest, course_id: &str) -> PaymentStatus {
        self.ledger
            .get(&key(request, course_id))
            .await
            .unwrap()
            .expect("ledger row")
            .status
    }
}

fn course(id: &str) -> CourseId {
    CourseId::parse(id).unwrap()
}

fn strings(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

fn key(request: &VerifyPaymentRequest, course_id: &str) -> LedgerKey {
    LedgerKey::new(
        OrderId::parse(request.order_id.clone().unwrap()).unwrap(),
        PaymentId::parse(request.payment_id.clone().unwrap()).unwrap(),
        course(course_id),
    )
}

#[tokio::test]
async fn test_happy_path_two_courses() {
    let h = TestHarness::new();

    let capture = h.capture(&["course-a", "course-b"]).await;
    assert_eq!(capture.amount, Money::from_minor(800));

    let (payment_id, signature) = h.gateway.pay(&capture.order_id).unwrap();
    let request = VerifyPaymentRequest {
        order_id: Some(capture.order_id.to_string()),
        payment_id: Some(payment_id.to_string()),
        signature: Some(signature),
        course_ids: Some(strings(&["course-a", "course-b"])),
    };

    let response = h
        .orchestrator
        .verify_payment(&h.user, request.clone())
        .await
        .unwrap();

    assert_eq!(response.status, VerifyStatus::Complete);
    assert!(response.failed_course_ids().is_empty());
    assert_eq!(
        h.status_of(&request, "course-a").await,
        PaymentStatus::EnrollmentComplete
    );
    assert_eq!(
        h.status_of(&request, "course-b").await,
        PaymentStatus::EnrollmentComplete
    );
    assert!(h.catalog.is_enrolled(&course("course-a"), &h.user));
    assert!(h.catalog.is_enrolled(&course("course-b"), &h.user));
    assert_eq!(h.identity.enrolled_courses(&h.user).len(), 2);
    assert_eq!(h.notifier.enrollment_emails_for(&course("course-a")), 1);
    assert_eq!(h.notifier.enrollment_emails_for(&course("course-b")), 1);
}

#[tokio::test]
async fn test_amount_reflects_catalog_at_call_time() {
    let h = TestHarness::new();
    let first = h.capture(&["course-a", "course-b"]).await;
    assert_eq!(first.amount, Money::from_minor(800));

    h.catalog
        .add_course(&course("course-a"), Money::from_minor(650));
    let second = h.capture(&["course-a", "course-b"]).await;
    assert_eq!(second.amount, Money::from_minor(950));
    assert_eq!(
        second.per_course.iter().map(|l| l.price).sum::<Money>(),
        second.amount
    );
    assert_ne!(first.order_id, second.order_id);
    assert_ne!(first.receipt, second.receipt);
}

#[tokio::test]
async fn test_already_enrolled_creates_no_order() {
    let h = TestHarness::new();
    let request = h.paid(&["course-a"]).await;
    h.orchestrator
        .verify_payment(&h.user, request)
        .await
        .unwrap();
    let orders = h.gateway.order_count();

    let err = h
        .orchestrator
        .capture_payment(&h.user, &strings(&["course-b", "course-a"]))
        .await
        .unwrap_err();

    match err {
        CheckoutError::AlreadyEnrolled { course_id } => assert_eq!(course_id, course("course-a")),
        other => panic!("expected AlreadyEnrolled, got {other:?}"),
    }
    assert_eq!(h.gateway.order_count(), orders);
}

#[tokio::test]
async fn test_tampered_signature_is_rejected() {
    let h = TestHarness::new();
    let mut request = h.paid(&["course-a", "course-b"]).await;

    let mut signature = request.signature.take().unwrap();
    let last = if signature.ends_with('0') { "1" } else { "0" };
    signature.replace_range(signature.len() - 1.., last);
    request.signature = Some(signature);

    let err = h
        .orchestrator
        .verify_payment(&h.user, request)
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::PaymentRejected(_)));
    assert_eq!(h.ledger.record_count().await, 0);
    assert_eq!(h.catalog.enroll_calls(), 0);
}

#[tokio::test]
async fn test_signature_for_other_payment_is_rejected() {
    let h = TestHarness::new();
    let first = h.paid(&["course-a"]).await;
    let mut second = h.paid(&["course-b"]).await;
    second.signature = first.signature;

    let err = h
        .orchestrator
        .verify_payment(&h.user, second)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::PaymentRejected(_)));
    assert_eq!(h.ledger.record_count().await, 0);
}

#[tokio::test]
async fn test_identity_timeout_yields_partial() {
    let h = TestHarness::new();
    h.identity.set_hang_for(&course("course-a"), true);
    let request = h.paid(&["course-a", "course-b"]).await;

    let response = h
        .orchestrator
        .verify_payment(&h.user, request.clone())
        .await
        .unwrap();

    assert_eq!(response.status, VerifyStatus::Partial);
    assert_eq!(response.failed_course_ids(), vec![course("course-a")]);
    let failure = response.outcomes[0].error.clone().unwrap();
    assert_eq!(failure.kind, EnrollmentErrorKind::Timeout);
    assert_eq!(failure.step, EnrollmentStep::Identity);

    assert_eq!(h.status_of(&request, "course-a").await, PaymentStatus::Verified);
    assert_eq!(
        h.status_of(&request, "course-b").await,
        PaymentStatus::EnrollmentComplete
    );
}

#[tokio::test]
async fn test_catalog_failure_isolated_to_one_course() {
    let h = TestHarness::new();
    h.catalog.set_fail_enroll(&course("course-a"), true);
    let request = h.paid(&["course-a", "course-b"]).await;

    let response = h
        .orchestrator
        .verify_payment(&h.user, request.clone())
        .await
        .unwrap();

    assert_eq!(response.status, VerifyStatus::Partial);
    assert_eq!(response.failed_course_ids(), vec![course("course-a")]);
    assert_eq!(h.status_of(&request, "course-a").await, PaymentStatus::Verified);
    assert_eq!(
        h.status_of(&request, "course-b").await,
        PaymentStatus::EnrollmentComplete
    );
    // Identity is never told about a course the catalog did not accept.
    assert_eq!(h.identity.enrolled_courses(&h.user), vec![course("course-b")]);
}

#[tokio::test]
async fn test_duplicate_verification_is_idempotent() {
    let h = TestHarness::new();
    let request = h.paid(&["course-a", "course-b"]).await;

    let first = h
        .orchestrator
        .verify_payment(&h.user, request.clone())
        .await
        .unwrap();
    let calls = h.catalog.enroll_calls();
    let second = h
        .orchestrator
        .verify_payment(&h.user, request)
        .await
        .unwrap();

    assert_eq!(first.status, VerifyStatus::Complete);
    assert_eq!(second.status, VerifyStatus::Complete);
    assert_eq!(h.ledger.record_count().await, 2);
    assert_eq!(h.catalog.enroll_calls(), calls);
    assert_eq!(h.identity.add_calls(), 2);
    assert_eq!(h.notifier.enrollment_emails_for(&course("course-a")), 1);
}

#[tokio::test]
async fn test_concurrent_duplicate_verification() {
    let h = TestHarness::new();
    let request = h.paid(&["course-a", "course-b"]).await;

    let (a, b) = tokio::join!(
        h.orchestrator.verify_payment(&h.user, request.clone()),
        h.orchestrator.verify_payment(&h.user, request.clone()),
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(h.ledger.record_count().await, 2);
    assert_eq!(h.catalog.enroll_calls(), 2);
    assert_eq!(h.identity.add_calls(), 2);
}

#[tokio::test]
async fn test_disconnect_does_not_abort_enrollment() {
    let h = TestHarness::new();
    h.identity.set_hang_for(&course("course-a"), true);
    let request = h.paid(&["course-a"]).await;

    // The caller gives up well before the identity call times out.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        h.orchestrator.verify_payment(&h.user, request.clone()),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;
    let record = h.ledger.get(&key(&request, "course-a")).await.unwrap().unwrap();
    assert_eq!(record.status, PaymentStatus::Verified);
    assert_eq!(record.enrollment_attempts, 1);
    assert!(record.last_error.is_some());
}

#[tokio::test]
async fn test_gateway_outage_on_capture() {
    let h = TestHarness::new();
    h.gateway.set_fail_on_create(true);

    let err = h
        .orchestrator
        .capture_payment(&h.user, &strings(&["course-a"]))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::GatewayUnavailable(_)));
    assert_eq!(h.gateway.order_count(), 0);
}

#[tokio::test]
async fn test_reconciler_completes_partial_payment() {
    let h = TestHarness::new();
    h.catalog.set_fail_enroll(&course("course-a"), true);
    let request = h.paid(&["course-a", "course-b"]).await;
    let response = h
        .orchestrator
        .verify_payment(&h.user, request.clone())
        .await
        .unwrap();
    assert_eq!(response.status, VerifyStatus::Partial);

    h.catalog.set_fail_enroll(&course("course-a"), false);
    let report = h.orchestrator.reconciler().run_once().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.completed, 1);

    assert_eq!(
        h.status_of(&request, "course-a").await,
        PaymentStatus::EnrollmentComplete
    );
    let replay = h
        .orchestrator
        .verify_payment(&h.user, request)
        .await
        .unwrap();
    assert_eq!(replay.status, VerifyStatus::Complete);
}

#[tokio::test]
async fn test_reconciler_parks_after_max_attempts() {
    let h = TestHarness::new();
    h.catalog.set_fail_enroll(&course("course-a"), true);
    let request = h.paid(&["course-a"]).await;
    h.orchestrator
        .verify_payment(&h.user, request.clone())
        .await
        .unwrap();

    // The verification itself counted as the first attempt.
    let report = h.orchestrator.reconciler().run_once().await.unwrap();
    assert_eq!(report.parked, 1);
    assert_eq!(
        h.status_of(&request, "course-a").await,
        PaymentStatus::EnrollmentPartial
    );

    h.catalog.set_fail_enroll(&course("course-a"), false);
    let outcome = h
        .orchestrator
        .reconciler()
        .replay(&key(&request, "course-a"))
        .await
        .unwrap();
    assert!(outcome.enrolled);
    assert_eq!(
        h.status_of(&request, "course-a").await,
        PaymentStatus::EnrollmentComplete
    );
}

#[tokio::test]
async fn test_receipt_email_after_payment() {
    let h = TestHarness::new();
    let request = h.paid(&["course-a", "course-b"]).await;
    h.orchestrator
        .verify_payment(&h.user, request.clone())
        .await
        .unwrap();

    let receipt = h
        .orchestrator
        .send_receipt_email(
            &h.user,
            SendReceiptRequest {
                order_id: request.order_id.clone(),
                payment_id: request.payment_id.clone(),
                amount: Some(800),
            },
        )
        .await
        .unwrap();

    assert_eq!(receipt.name, "Meera Iyer");
    assert!(
        h.notifier
            .sent()
            .iter()
            .any(|n| matches!(n, Notification::Receipt(r) if r.amount == Money::from_minor(800)))
    );

    let err = h
        .orchestrator
        .send_receipt_email(
            &h.user,
            SendReceiptRequest {
                order_id: request.order_id,
                payment_id: request.payment_id,
                amount: Some(100),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_payment_history_newest_first() {
    let h = TestHarness::new();
    let first = h.paid(&["course-a"]).await;
    h.orchestrator
        .verify_payment(&h.user, first)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = h.paid(&["course-b"]).await;
    h.orchestrator
        .verify_payment(&h.user, second)
        .await
        .unwrap();

    let history = h.orchestrator.payment_history(&h.user).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].course_id, course("course-b"));
    assert_eq!(history[1].course_id, course("course-a"));

    let stranger = UserId::parse("someone-else").unwrap();
    assert!(
        h.orchestrator
            .payment_history(&stranger)
            .await
            .unwrap()
            .is_empty()
    );
}
