//! Orchestrator configuration.

use std::time::Duration;

use common::Money;
use secrecy::SecretString;

/// Configuration handed to the orchestrator at construction.
///
/// Nothing in the checkout crate reads the environment; the binary builds
/// this from its own settings.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// Shared secret the payment processor signs confirmations with.
    pub signing_secret: SecretString,
    /// ISO currency code for created orders.
    pub currency: String,
    /// Smallest total the processor accepts.
    pub min_charge: Money,
    /// Deadline for every collaborator call.
    pub call_timeout: Duration,
    /// Upper bound on concurrently enrolling courses within one payment.
    pub max_concurrent_enrollments: usize,
    /// Failed attempts after which a row is parked as `EnrollmentPartial`.
    pub reconcile_max_attempts: u32,
    /// Rows fetched per reconciler pass.
    pub reconcile_batch_size: usize,
    /// Minimum row age before the reconciler touches it.
    pub reconcile_grace: Duration,
}

impl CheckoutConfig {
    /// Creates a configuration with default limits for the given secret.
    pub fn new(signing_secret: impl Into<String>) -> Self {
        Self {
            signing_secret: SecretString::new(signing_secret.into()),
            currency: "INR".to_string(),
            min_charge: Money::from_minor(100),
            call_timeout: Duration::from_secs(30),
            max_concurrent_enrollments: 8,
            reconcile_max_attempts: 5,
            reconcile_batch_size: 50,
            reconcile_grace: Duration::from_secs(120),
        }
    }

    /// Sets the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Sets the order currency.
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Sets the minimum chargeable total.
    pub fn with_min_charge(mut self, min_charge: Money) -> Self {
        self.min_charge = min_charge;
        self
    }

    /// Sets the enrollment concurrency bound (at least one).
    pub fn with_max_concurrent_enrollments(mut self, max: usize) -> Self {
        self.max_concurrent_enrollments = max.max(1);
        self
    }

    /// Sets the reconciler's attempt limit and grace period.
    pub fn with_reconcile_policy(mut self, max_attempts: u32, grace: Duration) -> Self {
        self.reconcile_max_attempts = max_attempts.max(1);
        self.reconcile_grace = grace;
        self
    }
}
