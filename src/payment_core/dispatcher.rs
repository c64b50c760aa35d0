use crate::payment_core::backend::{BackendError, FailureKind, PaymentBackend, PaymentReceipt};
use crate::payment_core::ledger::{Claim, Ledger, NewPaymentRecord, StatusUpdate};
use crate::short_id;
use std::fmt;
use std::time::Duration;
use tokio::time::timeout;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub rate_limit_hours: u32,
    /// Upper bound on a single backend call.
    pub payment_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_limit_hours: 24,
            payment_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    RateLimited,
    InFlight,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::RateLimited => "rate_limited",
            SkipReason::InFlight => "in_flight",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Skipped(SkipReason),
    /// Carries the payment reference.
    Succeeded(String),
    Failed(FailureKind),
}

/// Pays an actor at most once per rate-limit window per post.
///
/// Every call goes: atomic eligibility check + `pending` insert, backend
/// request under a deadline, terminal status write. Errors never escape;
/// they are folded into [`DispatchOutcome::Failed`].
pub struct PaymentDispatcher<B> {
    ledger: Ledger,
    backend: B,
    config: DispatchConfig,
}

impl<B: PaymentBackend> PaymentDispatcher<B> {
    pub fn new(ledger: Ledger, backend: B, config: DispatchConfig) -> Self {
        Self { ledger, backend, config }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub async fn dispatch(&self, actor_id: &str, target_post_id: &str, amount_units: u64) -> DispatchOutcome {
        let record = NewPaymentRecord::new(actor_id, target_post_id, amount_units);

        let attempt_id = match self.ledger.claim_attempt(&record, self.config.rate_limit_hours) {
            Ok(Claim::Recorded(id)) => id,
            Ok(Claim::RateLimited) => {
                log::info!(
                    "⏭️  Skipping {}: already paid for {} within {}h",
                    short_id(actor_id),
                    short_id(target_post_id),
                    self.config.rate_limit_hours
                );
                return DispatchOutcome::Skipped(SkipReason::RateLimited);
            }
            Ok(Claim::InFlight) => {
                log::info!(
                    "⏭️  Skipping {}: an earlier payment for {} is still pending",
                    short_id(actor_id),
                    short_id(target_post_id)
                );
                return DispatchOutcome::Skipped(SkipReason::InFlight);
            }
            Err(e) => {
                log::error!("❌ Ledger unavailable, not paying {}: {}", short_id(actor_id), e);
                return DispatchOutcome::Failed(FailureKind::Ledger);
            }
        };

        let memo = payment_memo(actor_id, target_post_id);
        log::debug!(
            "Requesting {} units from {} for attempt {}",
            amount_units,
            self.backend.backend_type(),
            attempt_id
        );

        match self.request_with_deadline(amount_units, &memo).await {
            Ok(receipt) => {
                let update = StatusUpdate::Paid {
                    payment_reference: receipt.payment_reference.clone(),
                };
                match self.ledger.update_status(attempt_id, update) {
                    Ok(()) => {
                        log::info!(
                            "✅ Paid {} units to {} (attempt {})",
                            amount_units,
                            short_id(actor_id),
                            attempt_id
                        );
                        DispatchOutcome::Succeeded(receipt.payment_reference)
                    }
                    Err(e) => {
                        // The row stays pending, which keeps the pair blocked for the window.
                        log::error!(
                            "❌ Payment {} for {} succeeded but could not be recorded: {} (reference {})",
                            attempt_id,
                            short_id(actor_id),
                            e,
                            receipt.payment_reference
                        );
                        DispatchOutcome::Failed(FailureKind::Ledger)
                    }
                }
            }
            Err(e) => {
                let kind = e.kind();
                log::error!(
                    "❌ Payment to {} failed ({}): {}",
                    short_id(actor_id),
                    kind,
                    e
                );
                if let Err(ledger_err) = self
                    .ledger
                    .update_status(attempt_id, StatusUpdate::Failed { reason: e.to_string() })
                {
                    log::error!("❌ Could not mark attempt {} failed: {}", attempt_id, ledger_err);
                    return DispatchOutcome::Failed(FailureKind::Ledger);
                }
                DispatchOutcome::Failed(kind)
            }
        }
    }

    async fn request_with_deadline(&self, amount_units: u64, memo: &str) -> Result<PaymentReceipt, BackendError> {
        let receipt = match timeout(self.config.payment_timeout, self.backend.request_payment(amount_units, memo)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BackendError::Connection(format!(
                    "no answer within {:?}",
                    self.config.payment_timeout
                )))
            }
        };

        if receipt.payment_reference.trim().is_empty() {
            return Err(BackendError::MalformedResponse("empty payment reference".to_string()));
        }
        Ok(receipt)
    }
}

pub fn payment_memo(actor_id: &str, target_post_id: &str) -> String {
    format!(
        "AutoZap: thanks for reposting note {} (from {})",
        short_id(target_post_id),
        short_id(actor_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment_core::ledger::PaymentStatus;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Copy)]
    enum Behavior {
        Pay,
        Hang,
        EmptyReference,
        Reject,
    }

    struct FakeBackend {
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
    }

    impl FakeBackend {
        fn new(behavior: Behavior) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    behavior,
                    calls: calls.clone(),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl PaymentBackend for FakeBackend {
        async fn request_payment(&self, amount_units: u64, _memo: &str) -> Result<PaymentReceipt, BackendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Pay => Ok(PaymentReceipt {
                    payment_reference: format!("lnbc{}n{}", amount_units, n),
                    payment_hash: None,
                }),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(BackendError::Connection("unreachable".into()))
                }
                Behavior::EmptyReference => Ok(PaymentReceipt {
                    payment_reference: String::new(),
                    payment_hash: Some("abc".into()),
                }),
                Behavior::Reject => Err(BackendError::Rejected {
                    status: 402,
                    body: "insufficient balance".into(),
                }),
            }
        }

        fn backend_type(&self) -> &'static str {
            "fake"
        }
    }

    fn dispatcher(behavior: Behavior) -> (PaymentDispatcher<FakeBackend>, Arc<AtomicUsize>) {
        let (backend, calls) = FakeBackend::new(behavior);
        let config = DispatchConfig {
            rate_limit_hours: 24,
            payment_timeout: Duration::from_millis(100),
        };
        (
            PaymentDispatcher::new(Ledger::open_in_memory().unwrap(), backend, config),
            calls,
        )
    }

    #[tokio::test]
    async fn test_pays_once_then_rate_limits() {
        let (dispatcher, calls) = dispatcher(Behavior::Pay);

        let first = dispatcher.dispatch("A1", "P1", 1000).await;
        assert!(matches!(first, DispatchOutcome::Succeeded(ref r) if r.starts_with("lnbc1000")));

        let second = dispatcher.dispatch("A1", "P1", 1000).await;
        assert_eq!(second, DispatchOutcome::Skipped(SkipReason::RateLimited));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let history = dispatcher.ledger().history(Some("A1")).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, PaymentStatus::Paid);
        assert_eq!(history[0].amount_units, 1000);
    }

    #[tokio::test]
    async fn test_other_actor_or_post_is_independent() {
        let (dispatcher, calls) = dispatcher(Behavior::Pay);

        assert!(matches!(dispatcher.dispatch("A1", "P1", 1).await, DispatchOutcome::Succeeded(_)));
        assert!(matches!(dispatcher.dispatch("A2", "P1", 1).await, DispatchOutcome::Succeeded(_)));
        assert!(matches!(dispatcher.dispatch("A1", "P2", 1).await, DispatchOutcome::Succeeded(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_marks_attempt_failed() {
        let (dispatcher, calls) = dispatcher(Behavior::Hang);

        let outcome = dispatcher.dispatch("A1", "P1", 1).await;
        assert_eq!(outcome, DispatchOutcome::Failed(FailureKind::Connection));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let history = dispatcher.ledger().history(None).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, PaymentStatus::Failed);
        assert!(history[0].failure_reason.is_some());
    }

    #[tokio::test]
    async fn test_missing_reference_is_malformed() {
        let (dispatcher, _) = dispatcher(Behavior::EmptyReference);

        let outcome = dispatcher.dispatch("A1", "P1", 1).await;
        assert_eq!(outcome, DispatchOutcome::Failed(FailureKind::MalformedResponse));
        assert_eq!(dispatcher.ledger().history(None).unwrap()[0].status, PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_failed_attempt_can_be_retried() {
        let (dispatcher, calls) = dispatcher(Behavior::Reject);

        assert_eq!(
            dispatcher.dispatch("A1", "P1", 1).await,
            DispatchOutcome::Failed(FailureKind::BackendRejected)
        );
        assert_eq!(
            dispatcher.dispatch("A1", "P1", 1).await,
            DispatchOutcome::Failed(FailureKind::BackendRejected)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_pending_attempt_blocks_new_one() {
        let (dispatcher, calls) = dispatcher(Behavior::Pay);
        dispatcher
            .ledger()
            .record_attempt(&NewPaymentRecord::new("A1", "P1", 1))
            .unwrap();

        assert_eq!(
            dispatcher.dispatch("A1", "P1", 1).await,
            DispatchOutcome::Skipped(SkipReason::InFlight)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_payment_stamped_ahead_of_clock_still_rate_limits() {
        let (dispatcher, calls) = dispatcher(Behavior::Pay);
        let ahead = NewPaymentRecord::new("A1", "P1", 1).created_at(Utc::now() + ChronoDuration::seconds(30));
        let id = dispatcher.ledger().record_attempt(&ahead).unwrap();
        dispatcher
            .ledger()
            .update_status(id, StatusUpdate::Paid { payment_reference: "lnbc".into() })
            .unwrap();

        assert_eq!(
            dispatcher.dispatch("A1", "P1", 1).await,
            DispatchOutcome::Skipped(SkipReason::RateLimited)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let paid = dispatcher
            .ledger()
            .history(Some("A1"))
            .unwrap()
            .iter()
            .filter(|r| r.status == PaymentStatus::Paid)
            .count();
        assert_eq!(paid, 1);
    }

    #[tokio::test]
    async fn test_pays_again_after_window() {
        let (dispatcher, _) = dispatcher(Behavior::Pay);
        let old = NewPaymentRecord::new("A1", "P1", 1).created_at(Utc::now() - ChronoDuration::hours(25));
        let id = dispatcher.ledger().record_attempt(&old).unwrap();
        dispatcher
            .ledger()
            .update_status(id, StatusUpdate::Paid { payment_reference: "lnbc_old".into() })
            .unwrap();

        assert!(matches!(dispatcher.dispatch("A1", "P1", 1).await, DispatchOutcome::Succeeded(_)));
        assert_eq!(dispatcher.ledger().history(Some("A1")).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_amount_is_ledger_failure() {
        let (dispatcher, calls) = dispatcher(Behavior::Pay);
        assert_eq!(
            dispatcher.dispatch("A1", "P1", 0).await,
            DispatchOutcome::Failed(FailureKind::Ledger)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_memo_names_post_and_actor() {
        let memo = payment_memo("npubactor123456", "note9876543210");
        assert!(memo.contains("note9876"));
        assert!(memo.contains("npubacto"));
    }
}
