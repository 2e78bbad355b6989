//! # Code Validator
//!
//! Checks one code against the live service with a single probe account.
//!
//! ## Probe selection
//!
//! 1. The configured probe, if it is not the hard-coded fallback and still logs in
//! 2. A random known account
//! 3. The hard-coded fallback
//!
//! Validation is serialized system-wide by a shared lock, so the queue worker
//! and the periodic sweep never validate two codes at once.

use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::common::messages::{AccountId, RedemptionStatus, ValidationVerdict};
use crate::redeem::protocol::Redeemer;
use crate::store::Stores;

/// Where the probe for a validation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeSource {
    Configured,
    Member,
    Fallback,
}

/// Result of validating one code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validation {
    pub verdict: ValidationVerdict,
    pub status: RedemptionStatus,
    pub probe: AccountId,
    pub probe_source: ProbeSource,
}

impl Validation {
    /// Reply text for whoever submitted the code.
    pub fn message(&self) -> String {
        match self.verdict {
            ValidationVerdict::Validated => format!("Code validated successfully ({})", self.status),
            ValidationVerdict::Invalid => self
                .status
                .invalid_reason()
                .unwrap_or("Code is invalid")
                .to_string(),
            ValidationVerdict::Pending => format!("Validation inconclusive ({})", self.status),
        }
    }
}

/// Map a redemption status onto a code verdict.
pub fn verdict_for(status: RedemptionStatus) -> ValidationVerdict {
    if status.is_success_class() {
        ValidationVerdict::Validated
    } else if status.invalidates_code() {
        ValidationVerdict::Invalid
    } else {
        ValidationVerdict::Pending
    }
}

pub struct Validator {
    redeemer: Arc<dyn Redeemer>,
    stores: Stores,
    fallback_probe: AccountId,
    lock: Mutex<()>,
}

impl Validator {
    pub fn new(redeemer: Arc<dyn Redeemer>, stores: Stores, fallback_probe: AccountId) -> Self {
        Self {
            redeemer,
            stores,
            fallback_probe,
            lock: Mutex::new(()),
        }
    }

    pub async fn select_probe(&self) -> (AccountId, ProbeSource) {
        let configured = self.redeemer.probe_account().await;
        if configured != self.fallback_probe && self.redeemer.verify_account(configured).await {
            return (configured, ProbeSource::Configured);
        }

        match self.stores.accounts.random_account().await {
            Ok(Some(account)) => (account.id, ProbeSource::Member),
            Ok(None) => (self.fallback_probe, ProbeSource::Fallback),
            Err(e) => {
                warn!("⚠️  Could not pick a member probe: {}", e);
                (self.fallback_probe, ProbeSource::Fallback)
            }
        }
    }

    /// Redeem `code` with the selected probe and interpret the result.
    ///
    /// Status bookkeeping (validated / invalid) happens inside the redeemer.
    pub async fn validate(&self, code: &str) -> Validation {
        let _guard = self.lock.lock().await;
        self.check(code).await
    }

    /// Hold the validation lock across several codes.
    pub async fn batch(&self) -> ValidationBatch<'_> {
        ValidationBatch {
            validator: self,
            _guard: self.lock.lock().await,
        }
    }

    async fn check(&self, code: &str) -> Validation {
        let (probe, probe_source) = self.select_probe().await;
        info!(
            "🔎 Validating '{}' with {:?} probe {}",
            code, probe_source, probe
        );

        let outcome = self.redeemer.validate(probe, code).await;
        let validation = Validation {
            verdict: verdict_for(outcome.status),
            status: outcome.status,
            probe,
            probe_source,
        };
        info!("🔎 '{}' -> {:?} ({})", code, validation.verdict, outcome.status);
        validation
    }
}

/// Exclusive validation access for a series of codes.
pub struct ValidationBatch<'a> {
    validator: &'a Validator,
    _guard: MutexGuard<'a, ()>,
}

impl ValidationBatch<'_> {
    pub async fn validate(&self, code: &str) -> Validation {
        self.validator.check(code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_mapping() {
        use RedemptionStatus::*;
        assert_eq!(verdict_for(SameTierExchange), ValidationVerdict::Validated);
        assert_eq!(verdict_for(Expired), ValidationVerdict::Invalid);
        assert_eq!(verdict_for(ChallengeExhausted), ValidationVerdict::Pending);
        assert_eq!(verdict_for(LoginFailed), ValidationVerdict::Pending);
    }

    #[test]
    fn test_messages() {
        let validation = Validation {
            verdict: ValidationVerdict::Invalid,
            status: RedemptionStatus::Expired,
            probe: 1,
            probe_source: ProbeSource::Fallback,
        };
        assert_eq!(validation.message(), "Code has expired");

        let pending = Validation {
            verdict: ValidationVerdict::Pending,
            status: RedemptionStatus::RateLimitedRetry,
            ..validation
        };
        assert_eq!(pending.message(), "Validation inconclusive (RATE_LIMITED_RETRY)");
    }
}
