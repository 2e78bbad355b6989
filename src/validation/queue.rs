//! # Validation Queue
//!
//! Single-consumer FIFO that validates newly sighted codes exactly once.
//!
//! ## Worker lifecycle
//!
//! ```text
//! enqueue ──> [lock] push item; no worker? mark running + spawn
//! worker  ──> [lock] pop item, or mark stopped and exit if empty
//!             validate, reply, auto-redeem, pause 0.5 s, repeat
//! ```
//!
//! Both decisions are taken under the queue lock, so there is never more than
//! one worker.

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::common::messages::{
    clean_code, CodeSource, CodeStatus, SubmissionReply, ValidationVerdict,
};
use crate::redeem::orchestrator::GroupOrchestrator;
use crate::store::{advance_code_status, Stores};
use crate::validation::validator::Validator;

/// A code waiting for validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItem {
    pub code: String,
    pub source: CodeSource,
    /// Opaque handle used to route the reply back to the submitter
    pub reply_to: Option<String>,
    pub queued_at: DateTime<Utc>,
}

/// Immediate answer to an enqueue request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EnqueueResponse {
    /// 1-based position in the queue
    Queued { position: usize },
    AlreadyQueued,
    AlreadyKnown { status: CodeStatus },
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStatus {
    pub queue_length: usize,
    pub in_progress: Option<String>,
    pub items: Vec<QueueItem>,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<QueueItem>,
    worker_running: bool,
    current: Option<String>,
}

pub struct ValidationQueue {
    state: Mutex<QueueState>,
    validator: Arc<Validator>,
    orchestrator: Arc<GroupOrchestrator>,
    stores: Stores,
    pause: Duration,
}

impl ValidationQueue {
    pub fn new(
        validator: Arc<Validator>,
        orchestrator: Arc<GroupOrchestrator>,
        stores: Stores,
        pause: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            validator,
            orchestrator,
            stores,
            pause,
        }
    }

    /// Queue `raw_code` for validation.
    ///
    /// # Returns
    /// - `Queued`: accepted; the verdict arrives later through the notifier
    /// - `AlreadyQueued`: the code is waiting or being validated right now
    /// - `AlreadyKnown`: the code is already `validated` or `invalid`
    /// - `Rejected`: nothing left after cleaning
    pub async fn enqueue(
        self: &Arc<Self>,
        raw_code: &str,
        source: CodeSource,
        reply_to: Option<String>,
    ) -> EnqueueResponse {
        let code = clean_code(raw_code);
        if code.is_empty() {
            return EnqueueResponse::Rejected {
                reason: "empty code".to_string(),
            };
        }

        let mut state = self.state.lock().await;
        if state.current.as_deref() == Some(code.as_str())
            || state.items.iter().any(|item| item.code == code)
        {
            return EnqueueResponse::AlreadyQueued;
        }

        match self.stores.registry.get(&code).await {
            Ok(Some(existing)) if existing.status != CodeStatus::Pending => {
                info!("ℹ️  '{}' is already {}", code, existing.status);
                return EnqueueResponse::AlreadyKnown {
                    status: existing.status,
                };
            }
            Ok(_) => {}
            Err(e) => warn!("⚠️  Registry lookup failed for '{}': {}", code, e),
        }

        state.items.push_back(QueueItem {
            code: code.clone(),
            source,
            reply_to,
            queued_at: Utc::now(),
        });
        let position = state.items.len();
        info!(
            "📥 Queued '{}' for validation (source {:?}, position {})",
            code, source, position
        );

        if !state.worker_running {
            state.worker_running = true;
            let queue = Arc::clone(self);
            tokio::spawn(async move { queue.work().await });
        }

        EnqueueResponse::Queued { position }
    }

    pub async fn status(&self) -> QueueStatus {
        let state = self.state.lock().await;
        QueueStatus {
            queue_length: state.items.len(),
            in_progress: state.current.clone(),
            items: state.items.iter().cloned().collect(),
        }
    }

    /// No worker is running and nothing is waiting.
    pub async fn is_idle(&self) -> bool {
        let state = self.state.lock().await;
        !state.worker_running && state.items.is_empty()
    }

    async fn work(self: Arc<Self>) {
        info!("▶️  Validation worker started");
        loop {
            let item = {
                let mut state = self.state.lock().await;
                match state.items.pop_front() {
                    Some(item) => {
                        state.current = Some(item.code.clone());
                        item
                    }
                    None => {
                        state.worker_running = false;
                        state.current = None;
                        break;
                    }
                }
            };

            self.process(item).await;
            self.state.lock().await.current = None;
            tokio::time::sleep(self.pause).await;
        }
        info!("⏹️  Validation queue drained, worker stopped");
    }

    async fn process(&self, item: QueueItem) {
        let code = item.code;
        let stores = &self.stores;

        if let Err(e) = advance_code_status(
            stores.registry.as_ref(),
            stores.notifier.as_ref(),
            &code,
            CodeStatus::Pending,
        )
        .await
        {
            warn!("⚠️  Could not register '{}': {}", code, e);
        }

        let validation = self.validator.validate(&code).await;
        stores
            .notifier
            .post_submission_reply(&SubmissionReply {
                reply_to: item.reply_to,
                code: code.clone(),
                verdict: validation.verdict,
                message: validation.message(),
            })
            .await;

        if validation.verdict == ValidationVerdict::Validated {
            self.auto_redeem(&code).await;
        }
    }

    /// Start one orchestrator run per auto-redeem group.
    async fn auto_redeem(&self, code: &str) {
        let groups = match self.stores.accounts.auto_redeem_groups().await {
            Ok(groups) => groups,
            Err(e) => {
                error!("❌ Could not list auto-redeem groups: {}", e);
                return;
            }
        };
        if groups.is_empty() {
            return;
        }

        info!("🤖 Auto-redeeming '{}' for {} groups", code, groups.len());
        for group in groups {
            let orchestrator = Arc::clone(&self.orchestrator);
            let code = code.to_string();
            tokio::spawn(async move {
                if let Err(e) = orchestrator.run(group, &code).await {
                    warn!("⚠️  Auto-redeem of '{}' for group {} skipped: {}", code, group, e);
                }
            });
        }
    }
}
