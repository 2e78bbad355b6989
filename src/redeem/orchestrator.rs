//! # Group Orchestrator
//!
//! Drives [`Redeemer::redeem`] across every member of a group for one code.
//!
//! ## Queues
//!
//! - **Active**: members ready to be attempted now, in order
//! - **Retry**: members waiting for a cooldown, each with its own `eligible_at`
//!
//! ```text
//! loop:
//!   promote retry entries whose eligible_at has passed
//!   active empty, retry not  -> sleep until the earliest eligible_at
//!   both empty               -> done
//!   pop one, jittered pause, redeem, classify outcome
//! ```
//!
//! ## Outcome handling
//!
//! | Outcome                                | Effect                                         |
//! |----------------------------------------|------------------------------------------------|
//! | SUCCESS                                | success                                        |
//! | ALREADY_RECEIVED, SAME_TIER_EXCHANGE   | already received                               |
//! | EXPIRED, NOT_FOUND, USAGE_LIMIT_REACHED| member failed, everyone left is halted         |
//! | CONFIG_SIGN_ERROR                      | member failed, everyone left is halted         |
//! | RATE_LIMITED_RETRY                     | retry after cooldown, same cycle               |
//! | CHALLENGE_INVALID, CHALLENGE_EXHAUSTED | retry after cooldown, next cycle, until limit  |
//! | anything else                          | member failed                                  |

use log::{error, info, warn};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::api::rate_limiter::RateLimiter;
use crate::common::config::OrchestratorConfig;
use crate::common::error::OrchestratorError;
use crate::common::messages::{CodeStatus, GroupId, Member, RedemptionStatus};
use crate::common::random_delay;
use crate::redeem::protocol::Redeemer;
use crate::redeem::summary::{RunReport, RunTally};
use crate::store::{RunId, Stores};

#[derive(Debug, Clone)]
struct QueueEntry {
    member: Member,
    cycle: u32,
}

#[derive(Debug, Clone)]
struct RetryEntry {
    entry: QueueEntry,
    eligible_at: Instant,
}

/// Removes the group from the active set when the run ends, however it ends.
struct ActiveRun<'a> {
    runs: &'a Mutex<HashSet<GroupId>>,
    group: GroupId,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.remove(&self.group);
    }
}

pub struct GroupOrchestrator {
    redeemer: Arc<dyn Redeemer>,
    limiter: Arc<RateLimiter>,
    stores: Stores,
    config: OrchestratorConfig,
    active_runs: Mutex<HashSet<GroupId>>,
}

impl GroupOrchestrator {
    pub fn new(
        redeemer: Arc<dyn Redeemer>,
        limiter: Arc<RateLimiter>,
        stores: Stores,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            redeemer,
            limiter,
            stores,
            config,
            active_runs: Mutex::new(HashSet::new()),
        }
    }

    fn claim(&self, group: GroupId) -> Result<ActiveRun<'_>, OrchestratorError> {
        let mut runs = self.active_runs.lock().unwrap_or_else(|e| e.into_inner());
        if !runs.insert(group) {
            return Err(OrchestratorError::RunInProgress(group));
        }
        Ok(ActiveRun {
            runs: &self.active_runs,
            group,
        })
    }

    pub fn is_running(&self, group: GroupId) -> bool {
        self.active_runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&group)
    }

    async fn member_pause(&self) -> Duration {
        let base = self
            .limiter
            .pacing()
            .await
            .as_secs_f64()
            .max(self.config.member_delay_secs);
        random_delay(base * self.config.jitter_low, base * self.config.jitter_high)
    }

    /// Redeem `code` for every member of `group`.
    ///
    /// # Returns
    /// - `Ok(RunReport)`: the run finished (possibly halted early)
    /// - `Err(RunInProgress)`: another run for this group is active
    /// - `Err(Store)`: members or the code status could not be read
    pub async fn run(&self, group: GroupId, code: &str) -> Result<RunReport, OrchestratorError> {
        let _active = self.claim(group)?;
        let run = RunId::new(group, code);
        let members = self.stores.accounts.list_members(group).await?;
        let mut tally = RunTally::new(run.clone(), members.len());

        info!("🚀 [{}] Redeeming '{}' for {} members", run, code, members.len());

        if let Some(existing) = self.stores.registry.get(code).await? {
            if existing.status == CodeStatus::Invalid {
                warn!("🚫 [{}] '{}' is already invalid, nothing to do", run, code);
                tally.halt(RedemptionStatus::NotFound, members);
                return Ok(self.finish(tally).await);
            }
        }

        let mut active: VecDeque<QueueEntry> = VecDeque::new();
        for member in members {
            match self.stores.cache.get(member.id, code).await {
                Ok(Some(status)) if status.is_success_class() => {
                    tally.record_already_received(&member);
                }
                Ok(Some(status)) if status.is_terminal() => {
                    tally.record_failure(&member, status.as_str(), 0);
                }
                Ok(_) => active.push_back(QueueEntry { member, cycle: 0 }),
                Err(e) => {
                    warn!("⚠️  Outcome cache unavailable for {}: {}", member.id, e);
                    active.push_back(QueueEntry { member, cycle: 0 });
                }
            }
        }

        let cooldown_rate = Duration::from_secs(self.config.rate_limit_cooldown_secs);
        let cooldown_challenge = Duration::from_secs(self.config.challenge_cooldown_secs);
        let progress_interval = Duration::from_secs(self.config.progress_interval_secs);
        let mut retry: Vec<RetryEntry> = Vec::new();
        let mut last_progress: Option<Instant> = None;

        loop {
            let now = Instant::now();
            let (ready, waiting): (Vec<RetryEntry>, Vec<RetryEntry>) =
                retry.drain(..).partition(|r| r.eligible_at <= now);
            retry = waiting;
            active.extend(ready.into_iter().map(|r| r.entry));

            let Some(entry) = active.pop_front() else {
                match retry.iter().map(|r| r.eligible_at).min() {
                    Some(next) => {
                        info!(
                            "⏸️  [{}] {} members cooling down, next in {:.0}s",
                            run,
                            retry.len(),
                            next.saturating_duration_since(now).as_secs_f64()
                        );
                        tokio::time::sleep_until(next).await;
                        continue;
                    }
                    None => break,
                }
            };

            tokio::time::sleep(self.member_pause().await).await;

            // Other runs and the validators may have killed the code meanwhile
            if self.code_invalidated(code).await {
                warn!("🚫 [{}] '{}' was invalidated elsewhere, stopping the run", run, code);
                let remaining = std::iter::once(entry)
                    .chain(active.drain(..))
                    .chain(retry.drain(..).map(|r| r.entry))
                    .map(|e| e.member);
                tally.halt(RedemptionStatus::NotFound, remaining);
                break;
            }

            let outcome = self.redeemer.redeem(entry.member.id, code).await;
            let status = outcome.status;

            match status {
                RedemptionStatus::Success => tally.record_success(&entry.member),
                RedemptionStatus::AlreadyReceived | RedemptionStatus::SameTierExchange => {
                    tally.record_already_received(&entry.member)
                }
                _ if status.invalidates_code() || status == RedemptionStatus::ConfigSignError => {
                    tally.record_failure(&entry.member, status.as_str(), entry.cycle);
                    if status == RedemptionStatus::ConfigSignError {
                        error!("🔐 [{}] Sign error, stopping the run", run);
                    } else {
                        warn!(
                            "🚫 [{}] '{}' reported {} by {}, stopping the run",
                            run, code, status, entry.member.id
                        );
                    }
                    let remaining = active
                        .drain(..)
                        .chain(retry.drain(..).map(|r| r.entry))
                        .map(|e| e.member);
                    tally.halt(status, remaining);
                    break;
                }
                RedemptionStatus::RateLimitedRetry => {
                    retry.push(RetryEntry {
                        entry,
                        eligible_at: Instant::now() + cooldown_rate,
                    });
                }
                _ if status.is_challenge_failure() => {
                    let next_cycle = entry.cycle + 1;
                    if next_cycle < self.config.max_retry_cycles {
                        retry.push(RetryEntry {
                            entry: QueueEntry {
                                member: entry.member,
                                cycle: next_cycle,
                            },
                            eligible_at: Instant::now() + cooldown_challenge,
                        });
                    } else {
                        warn!(
                            "⛔ [{}] {} exhausted {} retry cycles",
                            run, entry.member.id, next_cycle
                        );
                        tally.record_failure(
                            &entry.member,
                            format!("{} (exhausted retry cycles)", status),
                            next_cycle,
                        );
                    }
                }
                _ => tally.record_failure(&entry.member, status.as_str(), entry.cycle),
            }

            if last_progress.map_or(true, |at| at.elapsed() >= progress_interval) {
                self.stores
                    .notifier
                    .post_progress(&run, &tally.counts(retry.len()))
                    .await;
                last_progress = Some(Instant::now());
            }
        }

        Ok(self.finish(tally).await)
    }

    async fn code_invalidated(&self, code: &str) -> bool {
        match self.stores.registry.get(code).await {
            Ok(Some(existing)) => existing.status == CodeStatus::Invalid,
            Ok(None) => false,
            Err(e) => {
                warn!("⚠️  Could not re-read the status of '{}': {}", code, e);
                false
            }
        }
    }

    async fn finish(&self, tally: RunTally) -> RunReport {
        let report = tally.finish();
        self.stores
            .notifier
            .post_summary(&report.run, &report.counts)
            .await;

        match report.to_json() {
            Ok(json) => info!("📋 Run summary:\n{}", json),
            Err(e) => warn!("⚠️  Could not serialize run summary: {}", e),
        }
        report
    }
}
