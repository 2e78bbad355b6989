//! # Periodic Re-validation
//!
//! Every 15 minutes the sweeper re-checks up to 20 `pending`/`validated` codes
//! with the probe, and once per calendar day it deletes codes that have been
//! `invalid` for longer than the retention period.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::common::config::ValidationConfig;
use crate::common::messages::{CodeStatus, GiftCode, ValidationVerdict};
use crate::common::random_delay;
use crate::store::Stores;
use crate::validation::validator::Validator;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub checked: usize,
    pub invalidated: usize,
    pub promoted: usize,
    pub still_valid: usize,
    pub inconclusive: usize,
}

pub struct Sweeper {
    validator: Arc<Validator>,
    stores: Stores,
    config: ValidationConfig,
}

impl Sweeper {
    pub fn new(validator: Arc<Validator>, stores: Stores, config: ValidationConfig) -> Self {
        Self {
            validator,
            stores,
            config,
        }
    }

    async fn candidates(&self) -> Vec<GiftCode> {
        let mut codes = Vec::new();
        for status in [CodeStatus::Pending, CodeStatus::Validated] {
            match self.stores.registry.list_by_status(status).await {
                Ok(found) => codes.extend(found),
                Err(e) => warn!("⚠️  Could not list {} codes: {}", status, e),
            }
        }
        codes.truncate(self.config.sweep_limit);
        codes
    }

    /// Re-check up to `sweep_limit` codes, pending ones first.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let codes = self.candidates().await;
        if codes.is_empty() {
            info!("🧹 No codes need periodic validation");
            return report;
        }

        info!("🧹 Periodic validation of {} codes", codes.len());
        let batch = self.validator.batch().await;

        for (idx, code) in codes.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(random_delay(
                    self.config.sweep_pause_min_secs,
                    self.config.sweep_pause_max_secs,
                ))
                .await;
            }

            let validation = batch.validate(&code.value).await;
            report.checked += 1;

            match validation.verdict {
                ValidationVerdict::Invalid => {
                    report.invalidated += 1;
                    self.stores
                        .notifier
                        .notify_admins(&format!(
                            "Code '{}' has been invalidated during periodic validation. Status: {}",
                            code.value, validation.status
                        ))
                        .await;
                }
                ValidationVerdict::Validated if code.status == CodeStatus::Pending => {
                    report.promoted += 1;
                }
                ValidationVerdict::Validated => report.still_valid += 1,
                ValidationVerdict::Pending => {
                    info!(
                        "🧹 '{}' returned {} during periodic validation",
                        code.value, validation.status
                    );
                    report.inconclusive += 1;
                }
            }
        }

        info!(
            "🧹 Periodic validation done: checked {}, invalidated {}, promoted {}, still valid {}",
            report.checked, report.invalidated, report.promoted, report.still_valid
        );
        report
    }

    /// Delete codes invalid for longer than the retention period, with their
    /// cached outcomes.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - ChronoDuration::days(self.config.invalid_retention_days);
        let invalid = match self.stores.registry.list_by_status(CodeStatus::Invalid).await {
            Ok(codes) => codes,
            Err(e) => {
                warn!("⚠️  Could not list invalid codes: {}", e);
                return 0;
            }
        };

        let mut purged = 0;
        for code in invalid.iter().filter(|c| c.invalid_since() < cutoff) {
            match self.stores.registry.delete(&code.value).await {
                Ok(true) => {
                    purged += 1;
                    if let Err(e) = self.stores.cache.purge_code(&code.value).await {
                        warn!("⚠️  Could not purge outcomes of '{}': {}", code.value, e);
                    }
                }
                Ok(false) => {}
                Err(e) => warn!("⚠️  Could not delete '{}': {}", code.value, e),
            }
        }

        if purged > 0 {
            info!(
                "🗑️  Removed {} invalid codes older than {} days",
                purged, self.config.invalid_retention_days
            );
        }
        purged
    }

    /// Sweep forever on the configured interval, purging once per day.
    pub async fn run(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.sweep_interval_secs.max(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_purge: Option<NaiveDate> = None;

        loop {
            interval.tick().await;

            let now = Utc::now();
            if last_purge != Some(now.date_naive()) {
                self.purge_expired(now).await;
                last_purge = Some(now.date_naive());
            }

            self.sweep_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::messages::{AccountId, RedemptionOutcome, RedemptionStatus};
    use crate::redeem::protocol::Redeemer;
    use crate::store::{
        advance_code_status, CodeRegistry, LogNotifier, MemoryStore, NotifierEvent, OutcomeCache,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct CodeTable {
        answers: HashMap<&'static str, RedemptionStatus>,
        stores: Stores,
    }

    #[async_trait]
    impl Redeemer for CodeTable {
        async fn redeem(&self, account: AccountId, code: &str) -> RedemptionOutcome {
            let status = self.answers.get(code).copied().unwrap_or(RedemptionStatus::Unknown);
            let target = if status.is_success_class() {
                Some(CodeStatus::Validated)
            } else if status.invalidates_code() {
                Some(CodeStatus::Invalid)
            } else {
                None
            };
            if let Some(target) = target {
                advance_code_status(
                    self.stores.registry.as_ref(),
                    self.stores.notifier.as_ref(),
                    code,
                    target,
                )
                .await
                .unwrap();
            }
            RedemptionOutcome {
                account_id: account,
                code: code.to_string(),
                status,
            }
        }

        async fn probe_account(&self) -> AccountId {
            1
        }

        async fn verify_account(&self, _: AccountId) -> bool {
            true
        }
    }

    fn sweeper(
        store: Arc<MemoryStore>,
        notifier: Arc<LogNotifier>,
        answers: &[(&'static str, RedemptionStatus)],
    ) -> Sweeper {
        let stores = Stores::shared(store, notifier);
        let redeemer = Arc::new(CodeTable {
            answers: answers.iter().copied().collect(),
            stores: stores.clone(),
        });
        let validator = Arc::new(Validator::new(redeemer, stores.clone(), 244886619));
        Sweeper::new(validator, stores, ValidationConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_demotes_promotes_and_alerts() {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(LogNotifier::new());
        let registry: &dyn CodeRegistry = store.as_ref();
        registry.set("OLD", CodeStatus::Validated).await.unwrap();
        registry.set("NEW", CodeStatus::Pending).await.unwrap();
        registry.set("SAME", CodeStatus::Validated).await.unwrap();

        let sweeper = sweeper(
            store.clone(),
            notifier.clone(),
            &[
                ("OLD", RedemptionStatus::Expired),
                ("NEW", RedemptionStatus::AlreadyReceived),
                ("SAME", RedemptionStatus::AlreadyReceived),
            ],
        );

        let report = sweeper.sweep_once().await;
        assert_eq!(
            report,
            SweepReport {
                checked: 3,
                invalidated: 1,
                promoted: 1,
                still_valid: 1,
                inconclusive: 0,
            }
        );

        let registry: &dyn CodeRegistry = store.as_ref();
        assert_eq!(registry.get("OLD").await.unwrap().unwrap().status, CodeStatus::Invalid);
        assert_eq!(registry.get("NEW").await.unwrap().unwrap().status, CodeStatus::Validated);
        assert!(notifier
            .events()
            .await
            .iter()
            .any(|e| matches!(e, NotifierEvent::Admin { message } if message.contains("OLD"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_respects_limit() {
        let store = Arc::new(MemoryStore::new());
        let registry: &dyn CodeRegistry = store.as_ref();
        for i in 0..25 {
            registry.set(&format!("C{}", i), CodeStatus::Pending).await.unwrap();
        }

        let sweeper = sweeper(store.clone(), Arc::new(LogNotifier::new()), &[]);
        let report = sweeper.sweep_once().await;
        assert_eq!(report.checked, 20);
        assert_eq!(report.inconclusive, 20);
    }

    #[tokio::test]
    async fn test_purge_drops_only_old_invalid_codes() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        let mut stale = GiftCode::new("STALE", CodeStatus::Pending, now - ChronoDuration::days(30));
        stale.stamp(CodeStatus::Invalid, now - ChronoDuration::days(8));
        store.insert_code(stale).await;

        // created long ago but only invalid since yesterday
        let mut fresh = GiftCode::new("FRESH", CodeStatus::Pending, now - ChronoDuration::days(30));
        fresh.stamp(CodeStatus::Invalid, now - ChronoDuration::days(1));
        store.insert_code(fresh).await;

        store
            .insert_code(GiftCode::new("LIVE", CodeStatus::Validated, now - ChronoDuration::days(30)))
            .await;
        OutcomeCache::put(store.as_ref(), 9, "STALE", RedemptionStatus::Expired)
            .await
            .unwrap();

        let sweeper = sweeper(store.clone(), Arc::new(LogNotifier::new()), &[]);
        assert_eq!(sweeper.purge_expired(now).await, 1);

        let registry: &dyn CodeRegistry = store.as_ref();
        assert!(registry.get("STALE").await.unwrap().is_none());
        assert!(registry.get("FRESH").await.unwrap().is_some());
        assert!(registry.get("LIVE").await.unwrap().is_some());
        assert_eq!(OutcomeCache::get(store.as_ref(), 9, "STALE").await.unwrap(), None);
    }
}
