//! # Redemption Protocol
//!
//! One account's complete attempt at one gift code.
//!
//! ## Flow
//!
//! ```text
//! cache hit? ──yes──> cached status (no network)
//!     │ no
//! solver ready? ──no──> SOLVER_UNAVAILABLE
//!     │
//! reserve lookup slot -> login ──fail──> LOGIN_FAILED / RATE_LIMITED_RETRY
//!     │
//! up to 4 times: fetch challenge -> classify -> submit -> interpret
//!     │
//! record: cache the pair, advance the code status
//! ```
//!
//! `redeem` is total: every failure is expressed as a [`RedemptionStatus`].

use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::api::client::{Challenge, GameApi, Session};
use crate::api::rate_limiter::RateLimiter;
use crate::common::config::RedemptionConfig;
use crate::common::error::ApiError;
use crate::common::messages::{AccountId, CodeStatus, RedemptionOutcome, RedemptionStatus};
use crate::common::random_delay;
use crate::processing::captcha::ImageClassifier;
use crate::store::{advance_code_status, Stores};

/// Anything that can redeem a code for one account.
///
/// The orchestrator and the validation queue depend on this trait rather than
/// on [`RedemptionProtocol`] so that runs can be driven by a scripted fake.
#[async_trait]
pub trait Redeemer: Send + Sync {
    async fn redeem(&self, account: AccountId, code: &str) -> RedemptionOutcome;

    /// Check `code` live with `probe`, ignoring any cached outcome for the pair.
    ///
    /// The result is never written to the outcome cache.
    async fn validate(&self, probe: AccountId, code: &str) -> RedemptionOutcome {
        self.redeem(probe, code).await
    }

    /// The account currently used to validate codes.
    async fn probe_account(&self) -> AccountId;

    /// Whether `account` can log in right now.
    async fn verify_account(&self, account: AccountId) -> bool;
}

/// Shared, runtime-updatable identity of the validation probe account.
#[derive(Debug, Clone)]
pub struct ProbeAccount {
    current: Arc<RwLock<AccountId>>,
}

impl ProbeAccount {
    pub fn new(account: AccountId) -> Self {
        Self {
            current: Arc::new(RwLock::new(account)),
        }
    }

    pub async fn get(&self) -> AccountId {
        *self.current.read().await
    }

    async fn set(&self, account: AccountId) {
        *self.current.write().await = account;
    }
}

/// Interpretation of a gift-code submission reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitVerdict {
    /// The solved challenge was wrong; another attempt may follow
    ChallengeMismatch,
    Status(RedemptionStatus),
}

/// Map the provider's `(msg, err_code)` pair onto the outcome taxonomy.
///
/// Periods around `msg` are ignored ("RECEIVED." and "RECEIVED" are the same).
pub fn classify_submit_response(msg: &str, err_code: Option<i64>) -> SubmitVerdict {
    use RedemptionStatus::*;

    let msg = msg.trim().trim_matches('.');
    let status = match (msg, err_code) {
        ("CAPTCHA CHECK ERROR", Some(40103)) => return SubmitVerdict::ChallengeMismatch,
        ("CAPTCHA CHECK TOO FREQUENT", Some(40101)) => RateLimitedRetry,
        ("SUCCESS", _) => Success,
        ("RECEIVED", Some(40008)) => AlreadyReceived,
        ("SAME TYPE EXCHANGE", Some(40011)) => SameTierExchange,
        ("TIME ERROR", Some(40007)) => Expired,
        ("CDK NOT FOUND", Some(40014)) => NotFound,
        ("USED", Some(40005)) => UsageLimitReached,
        ("TIMEOUT RETRY", Some(40004)) => RateLimitedRetry,
        ("NOT LOGIN", _) => SessionExpired,
        _ if msg.to_lowercase().contains("sign error") => ConfigSignError,
        _ => Unknown,
    };
    SubmitVerdict::Status(status)
}

/// The production [`Redeemer`].
pub struct RedemptionProtocol {
    api: Arc<dyn GameApi>,
    limiter: Arc<RateLimiter>,
    classifier: Arc<ImageClassifier>,
    stores: Stores,
    probe: ProbeAccount,
    config: RedemptionConfig,
}

impl RedemptionProtocol {
    pub fn new(
        api: Arc<dyn GameApi>,
        limiter: Arc<RateLimiter>,
        classifier: Arc<ImageClassifier>,
        stores: Stores,
        probe: ProbeAccount,
        config: RedemptionConfig,
    ) -> Self {
        Self {
            api,
            limiter,
            classifier,
            stores,
            probe,
            config,
        }
    }

    /// Replace the probe account after checking that it can log in.
    ///
    /// # Returns
    /// - `Ok(())`: the new probe is active
    /// - `Err`: the login failed; the previous probe stays active
    pub async fn set_probe(&self, account: AccountId) -> Result<(), ApiError> {
        let session = self.login(account).await?;
        self.probe.set(account).await;
        info!(
            "🔑 Probe account is now {} ({})",
            account, session.nickname
        );
        Ok(())
    }

    async fn login(&self, account: AccountId) -> Result<Session, ApiError> {
        let endpoint = self.limiter.reserve().await;
        debug!("Login {} via {} endpoint", account, endpoint);
        self.api.login(endpoint, account).await
    }

    async fn attempt(&self, account: AccountId, code: &str) -> RedemptionStatus {
        if !self.classifier.is_available() {
            warn!("⚠️  Solver unavailable, cannot redeem '{}' for {}", code, account);
            return RedemptionStatus::SolverUnavailable;
        }

        let session = match self.login(account).await {
            Ok(session) => session,
            Err(ApiError::RateLimited) => {
                warn!("⏳ Login for {} rate limited", account);
                return RedemptionStatus::RateLimitedRetry;
            }
            Err(e) => {
                warn!("⚠️  Login failed for {}: {}", account, e);
                return RedemptionStatus::LoginFailed;
            }
        };

        let max_attempts = self.config.max_challenge_attempts.max(1);
        for attempt in 1..=max_attempts {
            let image = match self.api.fetch_challenge(&session).await {
                Ok(Challenge::Image(bytes)) => bytes,
                Ok(Challenge::TooFrequent) | Err(ApiError::RateLimited) => {
                    info!("⏳ Challenge requests too frequent for {}", account);
                    return RedemptionStatus::RateLimitedRetry;
                }
                Err(e) => {
                    error!("❌ Challenge fetch failed for {}: {}", account, e);
                    return RedemptionStatus::ChallengeFetchFailed;
                }
            };

            let classification = self.classifier.classify(image).await;
            let answer = match classification.code {
                Some(answer) if classification.ok => answer,
                _ => {
                    info!(
                        "🔁 Solver rejected challenge for {} (attempt {}/{})",
                        account, attempt, max_attempts
                    );
                    continue;
                }
            };

            let reply = match self.api.submit_code(&session, code, &answer).await {
                Ok(reply) => reply,
                Err(ApiError::RateLimited) => return RedemptionStatus::RateLimitedRetry,
                Err(e) => {
                    warn!("⚠️  Submitting '{}' for {} failed: {}", code, account, e);
                    return RedemptionStatus::TransportError;
                }
            };

            match classify_submit_response(&reply.msg, reply.err_code) {
                SubmitVerdict::ChallengeMismatch if attempt < max_attempts => {
                    info!(
                        "🔁 Challenge answer '{}' rejected for {} (attempt {}/{}), retrying",
                        answer, account, attempt, max_attempts
                    );
                    tokio::time::sleep(random_delay(
                        self.config.mismatch_delay_min_secs,
                        self.config.mismatch_delay_max_secs,
                    ))
                    .await;
                }
                SubmitVerdict::ChallengeMismatch => return RedemptionStatus::ChallengeInvalid,
                SubmitVerdict::Status(RedemptionStatus::Unknown) => {
                    info!(
                        "❓ Unknown response for {}: msg='{}', err_code={:?}",
                        account, reply.msg, reply.err_code
                    );
                    return RedemptionStatus::Unknown;
                }
                SubmitVerdict::Status(status) => return status,
            }
        }

        RedemptionStatus::ChallengeExhausted
    }

    async fn redeem_live(&self, account: AccountId, code: &str, cache: bool) -> RedemptionOutcome {
        let status = self.attempt(account, code).await;
        info!("🎁 '{}' for {}: {}", code, account, status);
        self.record(account, code, status, cache).await;

        RedemptionOutcome {
            account_id: account,
            code: code.to_string(),
            status,
        }
    }

    /// Persist what the outcome says about the pair and the code.
    ///
    /// Store failures are logged; they never change the outcome.
    async fn record(&self, account: AccountId, code: &str, status: RedemptionStatus, cache: bool) {
        let stores = &self.stores;

        if status.is_terminal() && cache {
            if let Err(e) = stores.cache.put(account, code, status).await {
                warn!("⚠️  Could not cache {} for ({}, '{}'): {}", status, account, code, e);
            }
        }

        let target = if status.is_success_class() {
            Some(CodeStatus::Validated)
        } else if status.invalidates_code() {
            Some(CodeStatus::Invalid)
        } else {
            None
        };

        if let Some(target) = target {
            if let Err(e) =
                advance_code_status(stores.registry.as_ref(), stores.notifier.as_ref(), code, target)
                    .await
            {
                warn!("⚠️  Could not mark '{}' {}: {}", code, target, e);
            }
        }

        if status.invalidates_code() {
            let probe = self.probe.get().await;
            if let Err(e) = stores.cache.delete(probe, code).await {
                warn!("⚠️  Could not clear probe cache for '{}': {}", code, e);
            }
        }

        if status == RedemptionStatus::ConfigSignError {
            error!(
                "🔐 Sign error redeeming '{}' for {}: the API secret is misconfigured",
                code, account
            );
            stores
                .notifier
                .notify_admins(&format!(
                    "Sign error while redeeming '{}' for account {}. Check the API secret.",
                    code, account
                ))
                .await;
        }
    }
}

#[async_trait]
impl Redeemer for RedemptionProtocol {
    async fn redeem(&self, account: AccountId, code: &str) -> RedemptionOutcome {
        let use_cache = self.probe.get().await != account;

        if use_cache {
            match self.stores.cache.get(account, code).await {
                Ok(Some(status)) if status.is_terminal() => {
                    debug!("Cached {} for ({}, '{}')", status, account, code);
                    return RedemptionOutcome {
                        account_id: account,
                        code: code.to_string(),
                        status,
                    };
                }
                Ok(_) => {}
                Err(e) => warn!("⚠️  Outcome cache unavailable: {}", e),
            }
        }

        self.redeem_live(account, code, use_cache).await
    }

    async fn validate(&self, probe: AccountId, code: &str) -> RedemptionOutcome {
        self.redeem_live(probe, code, false).await
    }

    async fn probe_account(&self) -> AccountId {
        self.probe.get().await
    }

    async fn verify_account(&self, account: AccountId) -> bool {
        match self.login(account).await {
            Ok(_) => true,
            Err(e) => {
                info!("🔑 Account {} failed verification: {}", account, e);
                false
            }
        }
    }
}
