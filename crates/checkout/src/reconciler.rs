//! Background recovery of enrollments that did not finish during verification.
//!
//! Ledger rows still `Verified` after the grace period are re-enrolled. The
//! catalog and identity calls are idempotent, so repeating them for a course
//! that was enrolled but never marked complete is harmless. Rows that keep
//! failing are parked as `EnrollmentPartial` for manual follow-up.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ledger::{LedgerKey, PaymentLedger, PaymentStatus};
use serde::Serialize;

use crate::config::CheckoutConfig;
use crate::enrollment::Enroller;
use crate::error::{CheckoutError, Result};
use crate::outcome::EnrollmentOutcome;

/// Summary of a single reconciler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Rows picked up by the pass.
    pub examined: usize,
    /// Rows now `EnrollmentComplete`.
    pub completed: usize,
    /// Rows that failed again and stay queued.
    pub retried: usize,
    /// Rows moved to `EnrollmentPartial`.
    pub parked: usize,
}

/// Re-drives pending enrollments from the ledger.
#[derive(Clone)]
pub struct EnrollmentReconciler {
    ledger: Arc<dyn PaymentLedger>,
    enroller: Enroller,
    max_attempts: u32,
    batch_size: usize,
    grace: Duration,
}

impl EnrollmentReconciler {
    pub fn new(config: &CheckoutConfig, ledger: Arc<dyn PaymentLedger>, enroller: Enroller) -> Self {
        Self {
            ledger,
            enroller,
            max_attempts: config.reconcile_max_attempts.max(1),
            batch_size: config.reconcile_batch_size.max(1),
            grace: config.reconcile_grace,
        }
    }

    /// Processes one batch of pending rows, oldest first.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<ReconcileReport> {
        let grace = chrono::Duration::from_std(self.grace)
            .map_err(|e| CheckoutError::Internal(format!("invalid grace period: {e}")))?;
        let cutoff = Utc::now() - grace;
        let pending = self
            .ledger
            .pending_enrollments(self.batch_size, cutoff)
            .await?;

        let mut report = ReconcileReport {
            examined: pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }

        let attempts: Vec<(LedgerKey, u32)> = pending
            .iter()
            .map(|r| (r.key(), r.enrollment_attempts))
            .collect();
        let outcomes = self.enroller.fulfil_all(pending).await;

        for ((key, prior_attempts), outcome) in attempts.into_iter().zip(outcomes) {
            if outcome.enrolled {
                report.completed += 1;
                metrics::counter!("checkout_reconciled_total", "result" => "completed")
                    .increment(1);
                continue;
            }

            // The failed attempt just made has already been counted on the row.
            if prior_attempts + 1 >= self.max_attempts {
                match self
                    .ledger
                    .update_status(&key, PaymentStatus::EnrollmentPartial)
                    .await
                {
                    Ok(_) => {
                        report.parked += 1;
                        metrics::counter!("checkout_reconciled_total", "result" => "parked")
                            .increment(1);
                        tracing::error!(
                            %key,
                            attempts = prior_attempts + 1,
                            "enrollment retries exhausted, manual follow-up needed"
                        );
                    }
                    Err(e) => tracing::error!(%key, error = %e, "could not park ledger row"),
                }
            } else {
                report.retried += 1;
                metrics::counter!("checkout_reconciled_total", "result" => "retried").increment(1);
            }
        }

        tracing::info!(
            examined = report.examined,
            completed = report.completed,
            retried = report.retried,
            parked = report.parked,
            "reconcile pass finished"
        );
        Ok(report)
    }

    /// Re-drives one ledger row now, ignoring the grace period.
    ///
    /// Parked rows are retried too; a success moves them to complete.
    #[tracing::instrument(skip(self), fields(key = %key))]
    pub async fn replay(&self, key: &LedgerKey) -> Result<EnrollmentOutcome> {
        let record = self
            .ledger
            .get(key)
            .await?
            .ok_or_else(|| CheckoutError::NotFound(format!("payment record {key}")))?;

        if record.status.is_complete() {
            return Ok(EnrollmentOutcome::enrolled(record.course_id));
        }

        let outcome = self.enroller.fulfil(&record).await;
        let result = if outcome.enrolled { "completed" } else { "retried" };
        metrics::counter!("checkout_reconciled_total", "result" => result).increment(1);
        Ok(outcome)
    }

    /// Runs passes every `interval` until `shutdown` resolves.
    pub async fn run<F>(self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("reconciler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "reconcile pass failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use common::{CourseId, Money, OrderId, PaymentId, UserId};
    use ledger::{InMemoryPaymentLedger, PaymentRecord};

    use super::*;
    use crate::services::{
        InMemoryCatalogClient, InMemoryIdentityClient, InMemoryNotificationClient,
    };

    struct Fixture {
        reconciler: EnrollmentReconciler,
        ledger: InMemoryPaymentLedger,
        catalog: InMemoryCatalogClient,
        identity: InMemoryIdentityClient,
    }

    fn fixture(max_attempts: u32) -> Fixture {
        let ledger = InMemoryPaymentLedger::new();
        let catalog = InMemoryCatalogClient::new();
        let identity = InMemoryIdentityClient::new();
        let notifier = InMemoryNotificationClient::new();
        let config = CheckoutConfig::new("secret")
            .with_call_timeout(Duration::from_millis(100))
            .with_reconcile_policy(max_attempts, Duration::ZERO);
        let enroller = Enroller::new(
            Arc::new(ledger.clone()),
            Arc::new(catalog.clone()),
            Arc::new(identity.clone()),
            Arc::new(notifier),
            config.call_timeout,
            config.max_concurrent_enrollments,
        );
        let reconciler = EnrollmentReconciler::new(&config, Arc::new(ledger.clone()), enroller);
        Fixture {
            reconciler,
            ledger,
            catalog,
            identity,
        }
    }

    fn course() -> CourseId {
        CourseId::parse("course-a").unwrap()
    }

    fn user() -> UserId {
        UserId::parse("user-1").unwrap()
    }

    async fn ledgered(f: &Fixture) -> LedgerKey {
        f.catalog.add_course(&course(), Money::from_minor(500));
        let record = PaymentRecord::verified(
            OrderId::parse("order_1").unwrap(),
            PaymentId::parse("pay_1").unwrap(),
            "sig".to_string(),
            course(),
            user(),
            Money::from_minor(500),
        );
        let key = record.key();
        f.ledger.insert(record).await.unwrap();
        key
    }

    #[tokio::test]
    async fn test_run_once_completes_pending_row() {
        let f = fixture(3);
        let key = ledgered(&f).await;

        let report = f.reconciler.run_once().await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                examined: 1,
                completed: 1,
                ..Default::default()
            }
        );

        let record = f.ledger.get(&key).await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::EnrollmentComplete);
        assert!(f.catalog.is_enrolled(&course(), &user()));
        assert_eq!(f.identity.enrolled_courses(&user()), vec![course()]);

        let report = f.reconciler.run_once().await.unwrap();
        assert_eq!(report.examined, 0);
    }

    #[tokio::test]
    async fn test_repeated_failures_park_row() {
        let f = fixture(2);
        let key = ledgered(&f).await;
        f.catalog.set_fail_enroll(&course(), true);

        let report = f.reconciler.run_once().await.unwrap();
        assert_eq!(report.retried, 1);
        let record = f.ledger.get(&key).await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Verified);
        assert_eq!(record.enrollment_attempts, 1);

        let report = f.reconciler.run_once().await.unwrap();
        assert_eq!(report.parked, 1);
        let record = f.ledger.get(&key).await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::EnrollmentPartial);
        assert!(record.last_error.is_some());

        // Parked rows leave the queue.
        let report = f.reconciler.run_once().await.unwrap();
        assert_eq!(report.examined, 0);
    }

    #[tokio::test]
    async fn test_replay_recovers_parked_row() {
        let f = fixture(1);
        let key = ledgered(&f).await;
        f.catalog.set_fail_enroll(&course(), true);
        assert_eq!(f.reconciler.run_once().await.unwrap().parked, 1);

        f.catalog.set_fail_enroll(&course(), false);
        let outcome = f.reconciler.replay(&key).await.unwrap();
        assert!(outcome.enrolled);

        let record = f.ledger.get(&key).await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::EnrollmentComplete);
        assert!(record.last_error.is_none());
    }

    #[tokio::test]
    async fn test_replay_unknown_row() {
        let f = fixture(3);
        let key = LedgerKey::new(
            OrderId::parse("order_x").unwrap(),
            PaymentId::parse("pay_x").unwrap(),
            course(),
        );
        let err = f.reconciler.replay(&key).await.unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_replay_complete_row_is_noop() {
        let f = fixture(3);
        let key = ledgered(&f).await;
        f.reconciler.run_once().await.unwrap();
        let calls = f.catalog.enroll_calls();

        let outcome = f.reconciler.replay(&key).await.unwrap();
        assert!(outcome.enrolled);
        assert_eq!(f.catalog.enroll_calls(), calls);
    }

    #[tokio::test]
    async fn test_grace_period_holds_fresh_rows() {
        let f = fixture(3);
        let config = CheckoutConfig::new("secret")
            .with_reconcile_policy(3, Duration::from_secs(3600));
        let enroller = Enroller::new(
            Arc::new(f.ledger.clone()),
            Arc::new(f.catalog.clone()),
            Arc::new(f.identity.clone()),
            Arc::new(InMemoryNotificationClient::new()),
            config.call_timeout,
            1,
        );
        let patient = EnrollmentReconciler::new(&config, Arc::new(f.ledger.clone()), enroller);
        ledgered(&f).await;

        let report = patient.run_once().await.unwrap();
        assert_eq!(report.examined, 0);
        assert_eq!(f.catalog.enroll_calls(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(3);
        let key = ledgered(&f).await;
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let handle = tokio::spawn(f.reconciler.clone().run(Duration::from_millis(10), async move {
            let _ = rx.await;
        }));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        let record = f.ledger.get(&key).await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::EnrollmentComplete);
    }
}
