//! Per-course enrollment fan-out.
//!
//! For each ledgered course the catalog is updated first, then the user's
//! identity record; the identity call is skipped if the catalog call failed
//! so the user record never claims an enrollment the catalog lacks. The
//! enrollment email is best-effort and never affects the outcome.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ledger::{LedgerError, PaymentLedger, PaymentRecord, PaymentStatus};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::ServiceError;
use crate::outcome::{EnrollmentOutcome, EnrollmentStep};
use crate::services::{CatalogClient, IdentityClient, NotificationClient};

/// Runs a collaborator call under a deadline.
pub async fn call_with_timeout<T, F>(limit: Duration, call: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout(limit)),
    }
}

/// Enrolls ledgered courses and records the result on the ledger row.
#[derive(Clone)]
pub struct Enroller {
    ledger: Arc<dyn PaymentLedger>,
    catalog: Arc<dyn CatalogClient>,
    identity: Arc<dyn IdentityClient>,
    notifier: Arc<dyn NotificationClient>,
    call_timeout: Duration,
    max_concurrency: usize,
}

impl Enroller {
    pub fn new(
        ledger: Arc<dyn PaymentLedger>,
        catalog: Arc<dyn CatalogClient>,
        identity: Arc<dyn IdentityClient>,
        notifier: Arc<dyn NotificationClient>,
        call_timeout: Duration,
        max_concurrency: usize,
    ) -> Self {
        Self {
            ledger,
            catalog,
            identity,
            notifier,
            call_timeout,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Enrolls the student for one ledger row.
    ///
    /// Success moves the row to `EnrollmentComplete`; failure leaves its status
    /// untouched and counts a failed attempt.
    ///
    /// If catalog and identity both succeed but the ledger cannot be updated,
    /// the course is still reported enrolled while its row stays `Verified`.
    /// The reconciler later repeats the idempotent calls and marks it complete.
    /// These are counted under `result="enrolled_unmarked"`.
    #[tracing::instrument(
        skip(self, record),
        fields(order_id = %record.order_id, course_id = %record.course_id, user_id = %record.user_id)
    )]
    pub async fn fulfil(&self, record: &PaymentRecord) -> EnrollmentOutcome {
        let course_id = &record.course_id;
        let user_id = &record.user_id;

        if let Err(e) = call_with_timeout(
            self.call_timeout,
            self.catalog.enroll_student(course_id, user_id),
        )
        .await
        {
            return self.failed(record, EnrollmentStep::Catalog, &e).await;
        }

        if let Err(e) = call_with_timeout(
            self.call_timeout,
            self.identity.add_enrolled_course(user_id, course_id),
        )
        .await
        {
            return self.failed(record, EnrollmentStep::Identity, &e).await;
        }

        let result = match self
            .ledger
            .update_status(&record.key(), PaymentStatus::EnrollmentComplete)
            .await
        {
            Ok(_) | Err(LedgerError::InvalidTransition { .. }) => "enrolled",
            Err(e) => {
                tracing::error!(error = %e, "enrolled but could not mark ledger row complete");
                "enrolled_unmarked"
            }
        };

        if let Err(e) = call_with_timeout(
            self.call_timeout,
            self.notifier.send_enrollment_email(user_id, course_id),
        )
        .await
        {
            tracing::warn!(error = %e, "enrollment email not sent");
        }

        metrics::counter!("checkout_enrollments_total", "result" => result).increment(1);
        tracing::info!("course enrolled");
        EnrollmentOutcome::enrolled(course_id.clone())
    }

    async fn failed(
        &self,
        record: &PaymentRecord,
        step: EnrollmentStep,
        err: &ServiceError,
    ) -> EnrollmentOutcome {
        tracing::warn!(?step, error = %err, "enrollment step failed");
        metrics::counter!("checkout_enrollments_total", "result" => "failed").increment(1);

        if let Err(e) = self
            .ledger
            .record_failed_attempt(&record.key(), &err.to_string())
            .await
        {
            tracing::error!(error = %e, "could not record failed enrollment attempt");
        }

        EnrollmentOutcome::failed(record.course_id.clone(), step, err)
    }

    /// Enrolls every row concurrently, at most `max_concurrency` at a time.
    ///
    /// Outcomes are returned in input order regardless of completion order.
    pub async fn fulfil_all(&self, records: Vec<PaymentRecord>) -> Vec<EnrollmentOutcome> {
        let aborted = ServiceError::Unavailable("enrollment task aborted".to_string());
        let mut outcomes: Vec<EnrollmentOutcome> = records
            .iter()
            .map(|r| EnrollmentOutcome::failed(r.course_id.clone(), EnrollmentStep::Catalog, &aborted))
            .collect();

        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        for (idx, record) in records.into_iter().enumerate() {
            let enroller = self.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                (idx, enroller.fulfil(&record).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = outcome,
                Err(e) => tracing::error!(error = %e, "enrollment task panicked"),
            }
        }

        outcomes
    }
}
