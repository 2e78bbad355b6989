//! # Game API Access
//!
//! - [`client`]: signed HTTP transport behind the [`GameApi`] trait
//! - [`rate_limiter`]: shared budget for the two player lookup endpoints

pub mod client;
pub mod rate_limiter;

pub use client::{Challenge, Endpoint, GameApi, HttpGameApi, Session, SubmitReply};
pub use rate_limiter::{Acquisition, LimiterMode, RateLimiter, RateUsage};
