use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

use crate::common::messages::{Member, RedemptionStatus, RunCounts};
use crate::store::RunId;

/// A member that will not be retried in this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedMember {
    pub id: u64,
    pub nickname: String,
    pub reason: String,
    /// Challenge retry cycles spent before giving up
    pub cycles: u32,
}

/// Final account of one group run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run: RunId,
    pub counts: RunCounts,
    pub successful: Vec<String>,
    pub already_received: Vec<String>,
    pub failed: Vec<FailedMember>,
    pub halted: Vec<Member>,
    /// Outcome that stopped the run early, if any
    pub halted_by: Option<RedemptionStatus>,
    pub duration_secs: f64,
}

impl RunReport {
    /// Failure reasons with their occurrence counts.
    pub fn failure_reasons(&self) -> HashMap<String, usize> {
        let mut reasons = HashMap::new();
        for member in &self.failed {
            *reasons.entry(member.reason.clone()).or_insert(0) += 1;
        }
        reasons
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        let output = serde_json::json!({
            "run": self.run.to_string(),
            "group": self.run.group,
            "code": self.run.code,
            "duration_secs": self.duration_secs,
            "counts": self.counts,
            "halted_by": self.halted_by,
            "failure_reasons": self.failure_reasons(),
            "successful": self.successful,
            "already_received": self.already_received,
            "failed": self.failed,
            "halted": self.halted.iter().map(|m| &m.nickname).collect::<Vec<_>>(),
        });
        serde_json::to_string_pretty(&output)
    }
}

/// Accumulates member results while a run is in progress.
#[derive(Debug)]
pub struct RunTally {
    run: RunId,
    started: Instant,
    total: usize,
    successful: Vec<String>,
    already_received: Vec<String>,
    failed: Vec<FailedMember>,
    halted: Vec<Member>,
    halted_by: Option<RedemptionStatus>,
}

impl RunTally {
    pub fn new(run: RunId, total: usize) -> Self {
        Self {
            run,
            started: Instant::now(),
            total,
            successful: Vec::new(),
            already_received: Vec::new(),
            failed: Vec::new(),
            halted: Vec::new(),
            halted_by: None,
        }
    }

    pub fn run(&self) -> &RunId {
        &self.run
    }

    pub fn record_success(&mut self, member: &Member) {
        self.successful.push(member.nickname.clone());
    }

    pub fn record_already_received(&mut self, member: &Member) {
        self.already_received.push(member.nickname.clone());
    }

    pub fn record_failure(&mut self, member: &Member, reason: impl Into<String>, cycles: u32) {
        self.failed.push(FailedMember {
            id: member.id,
            nickname: member.nickname.clone(),
            reason: reason.into(),
            cycles,
        });
    }

    pub fn halt(&mut self, cause: RedemptionStatus, remaining: impl IntoIterator<Item = Member>) {
        self.halted_by = Some(cause);
        self.halted.extend(remaining);
    }

    pub fn counts(&self, retrying: usize) -> RunCounts {
        let processed = self.successful.len() + self.already_received.len() + self.failed.len();
        RunCounts {
            total: self.total,
            processed,
            success: self.successful.len(),
            already_received: self.already_received.len(),
            retrying,
            failed: self.failed.len(),
            halted: self.halted.len(),
        }
    }

    pub fn finish(self) -> RunReport {
        let counts = self.counts(0);
        RunReport {
            run: self.run,
            counts,
            successful: self.successful,
            already_received: self.already_received,
            failed: self.failed,
            halted: self.halted,
            halted_by: self.halted_by,
            duration_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u64) -> Member {
        Member {
            id,
            nickname: format!("p{}", id),
        }
    }

    #[test]
    fn test_tally_counts_and_report() {
        let mut tally = RunTally::new(RunId::new(3, "WINTER"), 5);
        tally.record_success(&member(1));
        tally.record_already_received(&member(2));
        tally.record_failure(&member(3), "NOT_FOUND", 0);
        assert_eq!(tally.counts(1).retrying, 1);
        tally.halt(RedemptionStatus::NotFound, vec![member(4), member(5)]);

        let report = tally.finish();
        assert_eq!(
            report.counts,
            RunCounts {
                total: 5,
                processed: 3,
                success: 1,
                already_received: 1,
                retrying: 0,
                failed: 1,
                halted: 2,
            }
        );
        assert_eq!(report.failure_reasons().get("NOT_FOUND"), Some(&1));

        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["halted_by"], "NOT_FOUND");
        assert_eq!(json["halted"][1], "p5");
        assert_eq!(json["counts"]["halted"], 2);
    }
}
