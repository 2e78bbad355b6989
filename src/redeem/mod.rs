//! # Redemption
//!
//! - [`protocol`]: one account, one code, one complete attempt
//! - [`orchestrator`]: a whole group with active/retry queues and early halts
//! - [`summary`]: per-run tally and the final report

pub mod orchestrator;
pub mod protocol;
pub mod summary;

pub use orchestrator::GroupOrchestrator;
pub use protocol::{ProbeAccount, RedemptionProtocol, Redeemer};
pub use summary::{FailedMember, RunReport};
