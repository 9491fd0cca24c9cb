//! Course checkout: payment capture, verification and enrollment.
//!
//! This crate orchestrates the purchase saga for one or more courses:
//! 1. Capture: price the courses and open a processor order
//! 2. Verify: check the processor signature, then ledger each course
//! 3. Enroll: update the catalog and the user record for every ledgered course
//!
//! Once a payment is ledgered it is never rolled back. Enrollment failures
//! produce a partial result and are retried by the [`EnrollmentReconciler`].

pub mod config;
pub mod enrollment;
pub mod error;
pub mod intent;
pub mod orchestrator;
pub mod outcome;
pub mod reconciler;
pub mod services;
pub mod signature;
pub mod state;

pub use config::CheckoutConfig;
pub use enrollment::Enroller;
pub use error::{CheckoutError, Result, ServiceError};
pub use intent::{CaptureResponse, PurchaseIntent};
pub use orchestrator::{OrderOrchestrator, SendReceiptRequest, VerifyPaymentRequest};
pub use outcome::{
    EnrollmentErrorKind, EnrollmentFailure, EnrollmentOutcome, EnrollmentStep, VerifyResponse,
    VerifyStatus,
};
pub use reconciler::{EnrollmentReconciler, ReconcileReport};
pub use services::{
    CatalogClient, CourseSnapshot, CreateOrderRequest, IdentityClient, InMemoryCatalogClient,
    InMemoryIdentityClient, InMemoryNotificationClient, InMemoryPaymentGateway, Notification,
    NotificationClient, OrderLine, PaymentGateway, PaymentReceipt, ProcessorOrder, UserProfile,
};
pub use signature::{SignatureVerifier, Verdict};
pub use state::VerificationState;
