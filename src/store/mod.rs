//! # Record Store and Notifier Seams
//!
//! The redemption core never inspects how records are kept or how messages
//! reach people. It talks to four traits:
//!
//! - [`CodeRegistry`]: code -> lifecycle status, monotone toward `invalid`
//! - [`OutcomeCache`]: (account, code) -> last redemption status
//! - [`AccountStore`]: group membership, read-only
//! - [`Notifier`]: progress, summaries, code events, replies, admin alerts
//!
//! Implementations shipped with the crate:
//!
//! - [`memory::MemoryStore`]: in-process maps, used by tests
//! - [`file::JsonFileStore`]: the memory store persisted as a JSON snapshot
//! - [`notifier::LogNotifier`]: structured log lines plus a bounded history

pub mod file;
pub mod memory;
pub mod notifier;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::common::error::StoreError;
use crate::common::messages::{
    Account, AccountId, CodeEvent, CodeStatus, GiftCode, GroupId, Member, RedemptionStatus,
    RunCounts, SubmissionReply,
};

pub use file::JsonFileStore;
pub use memory::MemoryStore;
pub use notifier::{LogNotifier, NotifierEvent};

/// Lifecycle registry of gift codes.
#[async_trait]
pub trait CodeRegistry: Send + Sync {
    async fn get(&self, code: &str) -> Result<Option<GiftCode>, StoreError>;

    /// Create the code with `status`, or move it to `status`.
    ///
    /// # Returns
    /// - `Ok(true)`: the code was created or changed
    /// - `Ok(false)`: it already had `status`
    /// - `Err(StoreError::IllegalTransition)`: the move would go backwards
    async fn set(&self, code: &str, status: CodeStatus) -> Result<bool, StoreError>;

    async fn delete(&self, code: &str) -> Result<bool, StoreError>;

    async fn list_by_status(&self, status: CodeStatus) -> Result<Vec<GiftCode>, StoreError>;
}

/// Per (account, code) memory of redemption results.
#[async_trait]
pub trait OutcomeCache: Send + Sync {
    async fn get(
        &self,
        account: AccountId,
        code: &str,
    ) -> Result<Option<RedemptionStatus>, StoreError>;

    async fn put(
        &self,
        account: AccountId,
        code: &str,
        status: RedemptionStatus,
    ) -> Result<(), StoreError>;

    async fn delete(&self, account: AccountId, code: &str) -> Result<(), StoreError>;

    /// Drop every cached outcome for `code`, returning how many were removed.
    async fn purge_code(&self, code: &str) -> Result<usize, StoreError>;
}

/// Read-only view of accounts and groups.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn list_members(&self, group: GroupId) -> Result<Vec<Member>, StoreError>;

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn random_account(&self) -> Result<Option<Account>, StoreError>;

    /// Groups that redeem every newly validated code automatically.
    async fn auto_redeem_groups(&self) -> Result<Vec<GroupId>, StoreError>;
}

/// Identity of one group run, carried by every progress and summary post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunId {
    pub id: Uuid,
    pub group: GroupId,
    pub code: String,
}

impl RunId {
    pub fn new(group: GroupId, code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            group,
            code: code.into(),
        }
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.id.simple().to_string();
        write!(f, "{}:{}#{}", self.group, self.code, &id[..8])
    }
}

/// Outbound messages. Delivery failures stay inside the implementation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn post_progress(&self, run: &RunId, counts: &RunCounts);

    async fn post_summary(&self, run: &RunId, counts: &RunCounts);

    async fn post_code_event(&self, code: &str, event: CodeEvent);

    async fn post_submission_reply(&self, reply: &SubmissionReply);

    async fn notify_admins(&self, message: &str);
}

/// The record seams every component shares, bundled for construction.
#[derive(Clone)]
pub struct Stores {
    pub registry: Arc<dyn CodeRegistry>,
    pub cache: Arc<dyn OutcomeCache>,
    pub accounts: Arc<dyn AccountStore>,
    pub notifier: Arc<dyn Notifier>,
}

impl Stores {
    /// Use one backing store for all three record concerns.
    pub fn shared<S>(store: Arc<S>, notifier: Arc<dyn Notifier>) -> Self
    where
        S: CodeRegistry + OutcomeCache + AccountStore + 'static,
    {
        Self {
            registry: store.clone(),
            cache: store.clone(),
            accounts: store,
            notifier,
        }
    }
}

/// Move `code` forward to `status` and publish the matching code event.
///
/// Backward moves are ignored rather than reported: a late `validated`
/// confirmation for a code that already went `invalid` is not an error.
///
/// # Returns
/// - `Ok(true)`: the status changed and an event was posted
/// - `Ok(false)`: nothing to do
pub async fn advance_code_status(
    registry: &dyn CodeRegistry,
    notifier: &dyn Notifier,
    code: &str,
    status: CodeStatus,
) -> Result<bool, StoreError> {
    match registry.set(code, status).await {
        Ok(true) => {
            let event = match status {
                CodeStatus::Pending => CodeEvent::Discovered,
                CodeStatus::Validated => CodeEvent::Validated,
                CodeStatus::Invalid => CodeEvent::Invalidated,
            };
            notifier.post_code_event(code, event).await;
            Ok(true)
        }
        Ok(false) => Ok(false),
        Err(StoreError::IllegalTransition { from, to, .. }) => {
            debug!("Ignoring {} -> {} for '{}'", from, to, code);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_advance_posts_each_event_once() {
        let store = MemoryStore::new();
        let notifier = LogNotifier::new();

        assert!(advance_code_status(&store, &notifier, "SPRING24", CodeStatus::Pending).await.unwrap());
        assert!(!advance_code_status(&store, &notifier, "SPRING24", CodeStatus::Pending).await.unwrap());
        assert!(advance_code_status(&store, &notifier, "SPRING24", CodeStatus::Validated).await.unwrap());
        assert!(!advance_code_status(&store, &notifier, "SPRING24", CodeStatus::Validated).await.unwrap());
        assert!(advance_code_status(&store, &notifier, "SPRING24", CodeStatus::Invalid).await.unwrap());
        // invalid is final
        assert!(!advance_code_status(&store, &notifier, "SPRING24", CodeStatus::Validated).await.unwrap());
        assert!(!advance_code_status(&store, &notifier, "SPRING24", CodeStatus::Pending).await.unwrap());

        let events: Vec<CodeEvent> = notifier
            .events()
            .await
            .into_iter()
            .filter_map(|e| match e {
                NotifierEvent::Code { event, .. } => Some(event),
                _ => None,
            })
            .collect();
        assert_eq!(
            events,
            vec![CodeEvent::Discovered, CodeEvent::Validated, CodeEvent::Invalidated]
        );
    }

    #[test]
    fn test_run_id_display() {
        let run = RunId::new(12, "WINTER");
        let shown = run.to_string();
        assert!(shown.starts_with("12:WINTER#"));
        assert_eq!(shown.len(), "12:WINTER#".len() + 8);
    }
}
