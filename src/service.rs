//! # Service Wiring
//!
//! Builds every component exactly once and hands out shared references:
//!
//! ```text
//! HttpGameApi ──┐
//! RateLimiter ──┼──► RedemptionProtocol ──► GroupOrchestrator ──┐
//! Classifier ───┘            │                                   │
//!                            └──► Validator ──► ValidationQueue ◄┘
//!                                     └──────► Sweeper
//! ```
//!
//! The single [`RateLimiter`] is shared by every orchestrator run, the
//! validation queue and the periodic sweep.

use anyhow::Result;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::api::{GameApi, HttpGameApi, RateLimiter};
use crate::common::config::AppConfig;
use crate::processing::ImageClassifier;
use crate::redeem::{GroupOrchestrator, ProbeAccount, RedemptionProtocol};
use crate::store::{AccountStore, CodeRegistry, JsonFileStore, LogNotifier, OutcomeCache, Stores};
use crate::validation::{Sweeper, ValidationQueue, Validator};

pub struct Service {
    pub config: AppConfig,
    pub stores: Stores,
    /// Event history for the submission surface
    pub notifier: Arc<LogNotifier>,
    pub limiter: Arc<RateLimiter>,
    pub classifier: Arc<ImageClassifier>,
    pub protocol: Arc<RedemptionProtocol>,
    pub orchestrator: Arc<GroupOrchestrator>,
    pub validator: Arc<Validator>,
    pub queue: Arc<ValidationQueue>,
    pub sweeper: Arc<Sweeper>,
}

impl Service {
    /// Production wiring: JSON file store, HTTP game API, ONNX classifier.
    ///
    /// # Example
    /// ```ignore
    /// let config: AppConfig = load_config("config/redeemer.toml")?;
    /// let service = Service::open(config).await?;
    /// ```
    pub async fn open(config: AppConfig) -> Result<Self> {
        let store = Arc::new(JsonFileStore::open(&config.storage.path).await?);
        let api: Arc<dyn GameApi> = Arc::new(HttpGameApi::new(config.api.clone())?);

        // tract optimizes the graph on load, keep it off the runtime threads
        let classifier_config = config.classifier.clone();
        let classifier =
            tokio::task::spawn_blocking(move || ImageClassifier::load(&classifier_config)).await?;

        Ok(Self::assemble(config, store, Arc::new(LogNotifier::new()), api, classifier).await)
    }

    /// Wire the components over any backing store and game API.
    pub async fn assemble<S>(
        config: AppConfig,
        store: Arc<S>,
        notifier: Arc<LogNotifier>,
        api: Arc<dyn GameApi>,
        classifier: ImageClassifier,
    ) -> Self
    where
        S: CodeRegistry + OutcomeCache + AccountStore + 'static,
    {
        let stores = Stores::shared(store, notifier.clone());

        let limiter = Arc::new(RateLimiter::new(&config.rate_limit));
        limiter
            .probe_endpoints(api.as_ref(), config.rate_limit.probe_account)
            .await;

        if !classifier.is_available() {
            warn!("⚠️  CAPTCHA solver unavailable, redemptions will report SOLVER_UNAVAILABLE");
        }
        let classifier = Arc::new(classifier);

        let fallback = config.validation.fallback_probe_account;
        let probe = ProbeAccount::new(config.validation.probe_account.unwrap_or(fallback));

        let protocol = Arc::new(RedemptionProtocol::new(
            api,
            limiter.clone(),
            classifier.clone(),
            stores.clone(),
            probe,
            config.redemption.clone(),
        ));

        let orchestrator = Arc::new(GroupOrchestrator::new(
            protocol.clone(),
            limiter.clone(),
            stores.clone(),
            config.orchestrator.clone(),
        ));

        let validator = Arc::new(Validator::new(protocol.clone(), stores.clone(), fallback));

        let queue = Arc::new(ValidationQueue::new(
            validator.clone(),
            orchestrator.clone(),
            stores.clone(),
            Duration::from_millis(config.validation.queue_pause_ms),
        ));

        let sweeper = Arc::new(Sweeper::new(
            validator.clone(),
            stores.clone(),
            config.validation.clone(),
        ));

        info!("✅ Redemption service assembled");

        Self {
            config,
            stores,
            notifier,
            limiter,
            classifier,
            protocol,
            orchestrator,
            validator,
            queue,
            sweeper,
        }
    }

    /// Run the periodic sweep until Ctrl+C.
    pub async fn run(&self) {
        let mut sweep_task = tokio::spawn(Arc::clone(&self.sweeper).run());

        tokio::select! {
            _ = &mut sweep_task => error!("❌ Periodic validation task terminated"),
            _ = tokio::signal::ctrl_c() => info!("🛑 Shutdown requested"),
        }

        sweep_task.abort();
    }
}
