//! Log-backed notifier.
//!
//! Every call becomes one log line and one entry in a bounded in-memory
//! history, which the web surface exposes and tests inspect.

use async_trait::async_trait;
use log::{info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::Mutex;

use crate::common::messages::{CodeEvent, RunCounts, SubmissionReply};
use crate::store::{Notifier, RunId};

const DEFAULT_HISTORY: usize = 500;

/// One notifier call as recorded in the history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotifierEvent {
    Progress { run: RunId, counts: RunCounts },
    Summary { run: RunId, counts: RunCounts },
    Code { code: String, event: CodeEvent },
    Reply(SubmissionReply),
    Admin { message: String },
}

pub struct LogNotifier {
    history: Mutex<VecDeque<NotifierEvent>>,
    capacity: usize,
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY))),
            capacity: capacity.max(1),
        }
    }

    /// Recorded events, oldest first.
    pub async fn events(&self) -> Vec<NotifierEvent> {
        self.history.lock().await.iter().cloned().collect()
    }

    async fn record(&self, event: NotifierEvent) {
        let mut history = self.history.lock().await;
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(event);
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn post_progress(&self, run: &RunId, counts: &RunCounts) {
        info!(
            "📊 [{}] {}/{} processed, {} success, {} already received, {} retrying, {} failed",
            run,
            counts.processed,
            counts.total,
            counts.success,
            counts.already_received,
            counts.retrying,
            counts.failed
        );
        self.record(NotifierEvent::Progress {
            run: run.clone(),
            counts: *counts,
        })
        .await;
    }

    async fn post_summary(&self, run: &RunId, counts: &RunCounts) {
        info!(
            "🏁 [{}] finished: {} success, {} already received, {} failed, {} halted",
            run, counts.success, counts.already_received, counts.failed, counts.halted
        );
        self.record(NotifierEvent::Summary {
            run: run.clone(),
            counts: *counts,
        })
        .await;
    }

    async fn post_code_event(&self, code: &str, event: CodeEvent) {
        let icon = match event {
            CodeEvent::Discovered => "🆕",
            CodeEvent::Validated => "✅",
            CodeEvent::Invalidated => "🚫",
        };
        info!("{} Gift code '{}' {:?}", icon, code, event);
        self.record(NotifierEvent::Code {
            code: code.to_string(),
            event,
        })
        .await;
    }

    async fn post_submission_reply(&self, reply: &SubmissionReply) {
        info!(
            "💬 Reply to {}: '{}' is {:?}: {}",
            reply.reply_to.as_deref().unwrap_or("-"),
            reply.code,
            reply.verdict,
            reply.message
        );
        self.record(NotifierEvent::Reply(reply.clone())).await;
    }

    async fn notify_admins(&self, message: &str) {
        warn!("📣 ADMIN: {}", message);
        self.record(NotifierEvent::Admin {
            message: message.to_string(),
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_is_bounded() {
        let notifier = LogNotifier::with_capacity(2);
        notifier.notify_admins("one").await;
        notifier.notify_admins("two").await;
        notifier.notify_admins("three").await;

        let events = notifier.events().await;
        assert_eq!(
            events,
            vec![
                NotifierEvent::Admin { message: "two".to_string() },
                NotifierEvent::Admin { message: "three".to_string() },
            ]
        );
    }

    #[tokio::test]
    async fn test_events_serialize_with_kind_tag() {
        let notifier = LogNotifier::new();
        notifier.post_code_event("WINTER", CodeEvent::Invalidated).await;

        let json = serde_json::to_value(notifier.events().await).unwrap();
        assert_eq!(json[0]["kind"], "code");
        assert_eq!(json[0]["event"], "invalidated");
    }
}
