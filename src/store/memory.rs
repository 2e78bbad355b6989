//! In-process record store.

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

use crate::common::error::StoreError;
use crate::common::messages::{
    Account, AccountId, CodeStatus, GiftCode, GroupId, Member, RedemptionStatus,
};
use crate::store::{AccountStore, CodeRegistry, OutcomeCache};

/// One cached (account, code) outcome as written to a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub account: AccountId,
    pub code: String,
    pub status: RedemptionStatus,
}

/// Full serializable content of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub codes: Vec<GiftCode>,
    pub outcomes: Vec<OutcomeRecord>,
    pub accounts: Vec<Account>,
    pub auto_redeem_groups: Vec<GroupId>,
}

/// All four record concerns in `tokio::sync::RwLock`-guarded maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    codes: RwLock<HashMap<String, GiftCode>>,
    outcomes: RwLock<HashMap<(AccountId, String), RedemptionStatus>>,
    accounts: RwLock<HashMap<AccountId, Account>>,
    auto_redeem: RwLock<BTreeSet<GroupId>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            codes: RwLock::new(
                snapshot
                    .codes
                    .into_iter()
                    .map(|c| (c.value.clone(), c))
                    .collect(),
            ),
            outcomes: RwLock::new(
                snapshot
                    .outcomes
                    .into_iter()
                    .map(|o| ((o.account, o.code), o.status))
                    .collect(),
            ),
            accounts: RwLock::new(snapshot.accounts.into_iter().map(|a| (a.id, a)).collect()),
            auto_redeem: RwLock::new(snapshot.auto_redeem_groups.into_iter().collect()),
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        let mut codes: Vec<GiftCode> = self.codes.read().await.values().cloned().collect();
        codes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.value.cmp(&b.value)));

        let mut outcomes: Vec<OutcomeRecord> = self
            .outcomes
            .read()
            .await
            .iter()
            .map(|((account, code), status)| OutcomeRecord {
                account: *account,
                code: code.clone(),
                status: *status,
            })
            .collect();
        outcomes.sort_by(|a, b| a.code.cmp(&b.code).then(a.account.cmp(&b.account)));

        let mut accounts: Vec<Account> = self.accounts.read().await.values().cloned().collect();
        accounts.sort_by_key(|a| a.id);

        Snapshot {
            codes,
            outcomes,
            accounts,
            auto_redeem_groups: self.auto_redeem.read().await.iter().copied().collect(),
        }
    }

    pub async fn add_account(&self, account: Account) {
        self.accounts.write().await.insert(account.id, account);
    }

    pub async fn set_auto_redeem(&self, group: GroupId, enabled: bool) {
        let mut groups = self.auto_redeem.write().await;
        if enabled {
            groups.insert(group);
        } else {
            groups.remove(&group);
        }
    }

    /// Insert a code record as-is, bypassing the transition check.
    pub async fn insert_code(&self, code: GiftCode) {
        self.codes.write().await.insert(code.value.clone(), code);
    }
}

#[async_trait]
impl CodeRegistry for MemoryStore {
    async fn get(&self, code: &str) -> Result<Option<GiftCode>, StoreError> {
        Ok(self.codes.read().await.get(code).cloned())
    }

    async fn set(&self, code: &str, status: CodeStatus) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut codes = self.codes.write().await;

        match codes.get_mut(code) {
            None => {
                codes.insert(code.to_string(), GiftCode::new(code, status, now));
                Ok(true)
            }
            Some(existing) if existing.status == status => Ok(false),
            Some(existing) if existing.status.can_transition_to(status) => {
                existing.stamp(status, now);
                Ok(true)
            }
            Some(existing) => Err(StoreError::IllegalTransition {
                code: code.to_string(),
                from: existing.status,
                to: status,
            }),
        }
    }

    async fn delete(&self, code: &str) -> Result<bool, StoreError> {
        Ok(self.codes.write().await.remove(code).is_some())
    }

    async fn list_by_status(&self, status: CodeStatus) -> Result<Vec<GiftCode>, StoreError> {
        let mut codes: Vec<GiftCode> = self
            .codes
            .read()
            .await
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect();
        codes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(codes)
    }
}

#[async_trait]
impl OutcomeCache for MemoryStore {
    async fn get(
        &self,
        account: AccountId,
        code: &str,
    ) -> Result<Option<RedemptionStatus>, StoreError> {
        Ok(self
            .outcomes
            .read()
            .await
            .get(&(account, code.to_string()))
            .copied())
    }

    async fn put(
        &self,
        account: AccountId,
        code: &str,
        status: RedemptionStatus,
    ) -> Result<(), StoreError> {
        self.outcomes
            .write()
            .await
            .insert((account, code.to_string()), status);
        Ok(())
    }

    async fn delete(&self, account: AccountId, code: &str) -> Result<(), StoreError> {
        self.outcomes
            .write()
            .await
            .remove(&(account, code.to_string()));
        Ok(())
    }

    async fn purge_code(&self, code: &str) -> Result<usize, StoreError> {
        let mut outcomes = self.outcomes.write().await;
        let before = outcomes.len();
        outcomes.retain(|(_, c), _| c != code);
        Ok(before - outcomes.len())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn list_members(&self, group: GroupId) -> Result<Vec<Member>, StoreError> {
        let mut members: Vec<Member> = self
            .accounts
            .read()
            .await
            .values()
            .filter(|a| a.group_id == group)
            .map(Member::from)
            .collect();
        members.sort_by_key(|m| m.id);
        Ok(members)
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn random_account(&self) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.read().await;
        Ok(accounts.values().choose(&mut rand::thread_rng()).cloned())
    }

    async fn auto_redeem_groups(&self) -> Result<Vec<GroupId>, StoreError> {
        Ok(self.auto_redeem.read().await.iter().copied().collect())
    }
}
