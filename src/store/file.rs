//! # JSON Snapshot Store
//!
//! A [`MemoryStore`] that rewrites a JSON snapshot of itself after every
//! mutation. Writes go to a sibling temp file first and are renamed into
//! place, so a crash never leaves a half-written snapshot behind.

use async_trait::async_trait;
use log::info;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::common::error::StoreError;
use crate::common::messages::{
    Account, AccountId, CodeStatus, GiftCode, GroupId, Member, RedemptionStatus,
};
use crate::store::memory::{MemoryStore, Snapshot};
use crate::store::{AccountStore, CodeRegistry, OutcomeCache};

pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
    /// Serializes snapshot writes
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open the snapshot at `path`, starting empty if it does not exist yet.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let snapshot = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<Snapshot>(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };

        info!(
            "💾 Store opened at {} ({} codes, {} accounts)",
            path.display(),
            snapshot.codes.len(),
            snapshot.accounts.len()
        );

        Ok(Self {
            path,
            inner: MemoryStore::from_snapshot(snapshot),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.inner.snapshot().await;
        let content = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn add_account(&self, account: Account) -> Result<(), StoreError> {
        self.inner.add_account(account).await;
        self.persist().await
    }

    pub async fn set_auto_redeem(&self, group: GroupId, enabled: bool) -> Result<(), StoreError> {
        self.inner.set_auto_redeem(group, enabled).await;
        self.persist().await
    }
}

#[async_trait]
impl CodeRegistry for JsonFileStore {
    async fn get(&self, code: &str) -> Result<Option<GiftCode>, StoreError> {
        CodeRegistry::get(&self.inner, code).await
    }

    async fn set(&self, code: &str, status: CodeStatus) -> Result<bool, StoreError> {
        let changed = self.inner.set(code, status).await?;
        if changed {
            self.persist().await?;
        }
        Ok(changed)
    }

    async fn delete(&self, code: &str) -> Result<bool, StoreError> {
        let removed = CodeRegistry::delete(&self.inner, code).await?;
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    async fn list_by_status(&self, status: CodeStatus) -> Result<Vec<GiftCode>, StoreError> {
        self.inner.list_by_status(status).await
    }
}

#[async_trait]
impl OutcomeCache for JsonFileStore {
    async fn get(
        &self,
        account: AccountId,
        code: &str,
    ) -> Result<Option<RedemptionStatus>, StoreError> {
        OutcomeCache::get(&self.inner, account, code).await
    }

    async fn put(
        &self,
        account: AccountId,
        code: &str,
        status: RedemptionStatus,
    ) -> Result<(), StoreError> {
        self.inner.put(account, code, status).await?;
        self.persist().await
    }

    async fn delete(&self, account: AccountId, code: &str) -> Result<(), StoreError> {
        OutcomeCache::delete(&self.inner, account, code).await?;
        self.persist().await
    }

    async fn purge_code(&self, code: &str) -> Result<usize, StoreError> {
        let removed = self.inner.purge_code(code).await?;
        if removed > 0 {
            self.persist().await?;
        }
        Ok(removed)
    }
}

#[async_trait]
impl AccountStore for JsonFileStore {
    async fn list_members(&self, group: GroupId) -> Result<Vec<Member>, StoreError> {
        self.inner.list_members(group).await
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.inner.get_account(id).await
    }

    async fn random_account(&self) -> Result<Option<Account>, StoreError> {
        self.inner.random_account().await
    }

    async fn auto_redeem_groups(&self) -> Result<Vec<GroupId>, StoreError> {
        self.inner.auto_redeem_groups().await
    }
}
