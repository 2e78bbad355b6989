//! # Configuration Utilities
//!
//! Every tunable of the redemption engine lives in one TOML file. Each section
//! carries serde defaults that match the production constants, so a config
//! file only has to name what it changes.
//!
//! ## Example
//!
//! ```toml
//! [api]
//! secret = "..."
//!
//! [validation]
//! probe_account = 123456789
//!
//! [storage]
//! path = "data/redeemer.json"
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::common::messages::AccountId;

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Arguments
/// - `path`: Path to the TOML configuration file
///
/// # Returns
/// - `Ok(T)`: Successfully loaded and parsed configuration
/// - `Err`: File I/O or parsing error
///
/// # Example
/// ```ignore
/// let config: AppConfig = load_config("config/redeemer.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Complete configuration for the redemption engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub rate_limit: RateLimitConfig,
    pub classifier: ClassifierConfig,
    pub redemption: RedemptionConfig,
    pub orchestrator: OrchestratorConfig,
    pub validation: ValidationConfig,
    pub storage: StorageConfig,
    pub web: WebConfig,
}

/// Remote game API endpoints and the request-signing secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Player lookup on the gift-code API host (the primary endpoint)
    pub primary_player_url: String,
    /// Player lookup on the report API host (the secondary endpoint)
    pub secondary_player_url: String,
    pub captcha_url: String,
    pub gift_code_url: String,
    /// Sent as the `origin` header on every request
    pub origin: String,
    /// Key appended to the sorted form before hashing
    pub secret: String,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            primary_player_url: "https://wos-giftcode-api.centurygame.com/api/player".to_string(),
            secondary_player_url: "https://gof-report-api-formal.centurygame.com/api/player"
                .to_string(),
            captcha_url: "https://wos-giftcode-api.centurygame.com/api/captcha".to_string(),
            gift_code_url: "https://wos-giftcode-api.centurygame.com/api/gift_code".to_string(),
            origin: "https://wos-giftcode.centurygame.com".to_string(),
            secret: String::new(),
            request_timeout_secs: 15,
        }
    }
}

/// Sliding-window budget shared by all account lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per endpoint inside one window
    pub capacity: usize,
    pub window_secs: u64,
    /// Caller-side pacing when only one endpoint answers
    pub single_endpoint_pacing_secs: f64,
    /// Caller-side pacing when both endpoints answer
    pub dual_endpoint_pacing_secs: f64,
    /// Account used for the startup reachability probe
    pub probe_account: AccountId,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 30,
            window_secs: 60,
            single_endpoint_pacing_secs: 2.0,
            dual_endpoint_pacing_secs: 1.0,
            probe_account: 46765089,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Location of the CAPTCHA model artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub model_dir: PathBuf,
    pub model_file: String,
    pub metadata_file: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            model_file: "captcha_model.onnx".to_string(),
            metadata_file: "captcha_model_metadata.json".to_string(),
        }
    }
}

impl ClassifierConfig {
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_file)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.model_dir.join(&self.metadata_file)
    }
}

/// Bounds for a single account's redemption attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedemptionConfig {
    /// Challenge fetch/solve/submit rounds per redeem call
    pub max_challenge_attempts: u32,
    pub mismatch_delay_min_secs: f64,
    pub mismatch_delay_max_secs: f64,
}

impl Default for RedemptionConfig {
    fn default() -> Self {
        Self {
            max_challenge_attempts: 4,
            mismatch_delay_min_secs: 1.5,
            mismatch_delay_max_secs: 2.5,
        }
    }
}

/// Pacing and retry policy for a group run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub member_delay_secs: f64,
    pub jitter_low: f64,
    pub jitter_high: f64,
    pub rate_limit_cooldown_secs: u64,
    pub challenge_cooldown_secs: u64,
    pub max_retry_cycles: u32,
    pub progress_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            member_delay_secs: 1.0,
            jitter_low: 0.7,
            jitter_high: 1.3,
            rate_limit_cooldown_secs: 60,
            challenge_cooldown_secs: 60,
            max_retry_cycles: 10,
            progress_interval_secs: 5,
        }
    }
}

/// Probe account selection, periodic re-validation and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Explicitly configured probe; used only if it verifies as a live account
    pub probe_account: Option<AccountId>,
    /// Last-resort probe when no configured probe or member is available
    pub fallback_probe_account: AccountId,
    pub queue_pause_ms: u64,
    pub sweep_interval_secs: u64,
    pub sweep_limit: usize,
    pub sweep_pause_min_secs: f64,
    pub sweep_pause_max_secs: f64,
    pub invalid_retention_days: i64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            probe_account: None,
            fallback_probe_account: 244886619,
            queue_pause_ms: 500,
            sweep_interval_secs: 900,
            sweep_limit: 20,
            sweep_pause_min_secs: 2.0,
            sweep_pause_max_secs: 4.0,
            invalid_retention_days: 7,
        }
    }
}

/// JSON snapshot used by the binaries as their record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/redeemer.json"),
        }
    }
}

/// Listen address of the submission surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub address: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8080".to_string(),
        }
    }
}
