//! # Gift Code Redeemer
//!
//! Redeems promotional gift codes for every member of a group against the
//! game's web API, solving the image challenge on each submission.
//!
//! ## Modules
//!
//! - [`api`]: signed game API client and the dual-endpoint rate limiter
//! - [`processing`]: CAPTCHA classifier
//! - [`redeem`]: per-account protocol and group runs
//! - [`validation`]: validation queue, periodic sweep, message scanning
//! - [`store`]: record store and notifier seams with their implementations
//! - [`service`]: component wiring for the binaries

pub mod api;
pub mod common;
pub mod processing;
pub mod redeem;
pub mod service;
pub mod store;
pub mod validation;

pub use common::config::AppConfig;
pub use service::Service;
