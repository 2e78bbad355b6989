//! # Code Validation
//!
//! - [`queue`]: single-consumer FIFO for newly sighted codes
//! - [`validator`]: probe selection and the shared validation lock
//! - [`sweep`]: periodic re-validation and the daily purge
//! - [`scan`]: picks candidate codes out of chat messages

pub mod queue;
pub mod scan;
pub mod sweep;
pub mod validator;

pub use queue::{EnqueueResponse, QueueStatus, ValidationQueue};
pub use scan::extract_code;
pub use sweep::{SweepReport, Sweeper};
pub use validator::{ProbeSource, Validation, Validator};
