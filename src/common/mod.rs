//! # Common Components
//!
//! Shared utilities and data structures used by every other module.
//!
//! ## Modules
//!
//! - [`messages`]: Domain types (codes, accounts, outcome taxonomy, notifier payloads)
//! - [`config`]: TOML configuration with production defaults
//! - [`signing`]: Game API request signing
//! - [`error`]: Typed errors for the library seams
//! - [`logging`]: Logger setup for the binaries

pub mod config;
pub mod error;
pub mod logging;
pub mod messages;
pub mod signing;

use rand::Rng;
use std::time::Duration;

/// Uniformly random duration between `min_secs` and `max_secs`.
pub fn random_delay(min_secs: f64, max_secs: f64) -> Duration {
    if max_secs <= min_secs {
        return Duration::from_secs_f64(min_secs.max(0.0));
    }
    let secs = rand::thread_rng().gen_range(min_secs..max_secs);
    Duration::from_secs_f64(secs.max(0.0))
}
