//! # Domain Types
//!
//! Defines the values that flow between the redemption components:
//! - Gift code lifecycle status and records
//! - Account and group identities
//! - The closed redemption outcome taxonomy
//! - Events and counters handed to the notifier

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Player identity (the game's FID).
pub type AccountId = u64;

/// Alliance identity.
pub type GroupId = u64;

// ============================================================================
// GIFT CODES
// ============================================================================

/// Lifecycle status of a gift code.
///
/// Status only ever moves toward a terminal state:
/// `Pending -> Validated`, `Pending -> Invalid`, `Validated -> Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeStatus {
    Pending,
    Validated,
    Invalid,
}

impl CodeStatus {
    /// Whether moving from `self` to `next` respects the monotone lifecycle.
    ///
    /// Staying in the same status is not a transition and returns `false`.
    pub fn can_transition_to(self, next: CodeStatus) -> bool {
        matches!(
            (self, next),
            (CodeStatus::Pending, CodeStatus::Validated)
                | (CodeStatus::Pending, CodeStatus::Invalid)
                | (CodeStatus::Validated, CodeStatus::Invalid)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CodeStatus::Pending => "pending",
            CodeStatus::Validated => "validated",
            CodeStatus::Invalid => "invalid",
        }
    }
}

impl fmt::Display for CodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A gift code as held by the code registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftCode {
    pub value: String,
    pub status: CodeStatus,
    pub created_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
    pub invalidated_at: Option<DateTime<Utc>>,
}

impl GiftCode {
    /// A freshly sighted code.
    pub fn new(value: impl Into<String>, status: CodeStatus, now: DateTime<Utc>) -> Self {
        let mut code = Self {
            value: value.into(),
            status: CodeStatus::Pending,
            created_at: now,
            validated_at: None,
            invalidated_at: None,
        };
        code.stamp(status, now);
        code
    }

    /// Set `status` and record when it was reached.
    pub fn stamp(&mut self, status: CodeStatus, now: DateTime<Utc>) {
        self.status = status;
        match status {
            CodeStatus::Pending => {}
            CodeStatus::Validated => self.validated_at = Some(now),
            CodeStatus::Invalid => self.invalidated_at = Some(now),
        }
    }

    /// Instant from which the retention window of an invalid code is measured.
    pub fn invalid_since(&self) -> DateTime<Utc> {
        self.invalidated_at
            .or(self.validated_at)
            .unwrap_or(self.created_at)
    }
}

/// Strip invisible control/format characters (e.g. right-to-left marks pasted
/// from chat clients) and surrounding whitespace from a code.
pub fn clean_code(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() && !is_format_char(*c))
        .collect::<String>()
        .trim()
        .to_string()
}

fn is_format_char(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{061C}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{206F}'
            | '\u{FEFF}'
    )
}

// ============================================================================
// ACCOUNTS
// ============================================================================

/// A player account as seen by the redemption core (read-only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub nickname: String,
    pub group_id: GroupId,
}

/// A member entry of a group listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: AccountId,
    pub nickname: String,
}

impl From<&Account> for Member {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            nickname: account.nickname.clone(),
        }
    }
}

// ============================================================================
// REDEMPTION OUTCOMES
// ============================================================================

/// Every result a redemption attempt can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedemptionStatus {
    /// **Redeemed now.**
    Success,
    /// The account had already redeemed this code.
    AlreadyReceived,
    /// The account already redeemed a code of the same reward tier.
    SameTierExchange,
    /// The code is past its validity period.
    Expired,
    /// The provider does not know the code.
    NotFound,
    /// The code's global usage cap has been reached.
    UsageLimitReached,
    /// The provider asked us to slow down; retry after a cooldown.
    RateLimitedRetry,
    LoginFailed,
    /// The provider reported the session as not logged in mid-process.
    SessionExpired,
    /// Request signing is misconfigured. Fatal for a whole run.
    ConfigSignError,
    /// The provider rejected the solved challenge on the last attempt.
    ChallengeInvalid,
    /// The classifier could not produce a usable answer within the attempt bound.
    ChallengeExhausted,
    ChallengeFetchFailed,
    /// The classifier failed closed at startup.
    SolverUnavailable,
    /// Network failure, timeout or undecodable response.
    TransportError,
    /// A response outside the known taxonomy.
    Unknown,
}

impl RedemptionStatus {
    /// Statuses that settle an (account, code) pair for good.
    ///
    /// A cached terminal status short-circuits every later redeem call.
    pub fn is_terminal(self) -> bool {
        self.is_success_class() || self.invalidates_code()
    }

    /// The code is redeemable (whether or not this call redeemed it).
    pub fn is_success_class(self) -> bool {
        matches!(
            self,
            RedemptionStatus::Success
                | RedemptionStatus::AlreadyReceived
                | RedemptionStatus::SameTierExchange
        )
    }

    /// The answer is authoritative for the code itself, not just this account.
    pub fn invalidates_code(self) -> bool {
        matches!(
            self,
            RedemptionStatus::Expired
                | RedemptionStatus::NotFound
                | RedemptionStatus::UsageLimitReached
        )
    }

    /// A challenge round failed; worth another cycle after a cooldown.
    pub fn is_challenge_failure(self) -> bool {
        matches!(
            self,
            RedemptionStatus::ChallengeInvalid | RedemptionStatus::ChallengeExhausted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RedemptionStatus::Success => "SUCCESS",
            RedemptionStatus::AlreadyReceived => "ALREADY_RECEIVED",
            RedemptionStatus::SameTierExchange => "SAME_TIER_EXCHANGE",
            RedemptionStatus::Expired => "EXPIRED",
            RedemptionStatus::NotFound => "NOT_FOUND",
            RedemptionStatus::UsageLimitReached => "USAGE_LIMIT_REACHED",
            RedemptionStatus::RateLimitedRetry => "RATE_LIMITED_RETRY",
            RedemptionStatus::LoginFailed => "LOGIN_FAILED",
            RedemptionStatus::SessionExpired => "SESSION_EXPIRED",
            RedemptionStatus::ConfigSignError => "CONFIG_SIGN_ERROR",
            RedemptionStatus::ChallengeInvalid => "CHALLENGE_INVALID",
            RedemptionStatus::ChallengeExhausted => "CHALLENGE_EXHAUSTED",
            RedemptionStatus::ChallengeFetchFailed => "CHALLENGE_FETCH_FAILED",
            RedemptionStatus::SolverUnavailable => "SOLVER_UNAVAILABLE",
            RedemptionStatus::TransportError => "TRANSPORT_ERROR",
            RedemptionStatus::Unknown => "UNKNOWN",
        }
    }

    /// Human readable reason for code-terminal statuses.
    pub fn invalid_reason(self) -> Option<&'static str> {
        match self {
            RedemptionStatus::Expired => Some("Code has expired"),
            RedemptionStatus::NotFound => Some("Code not found or incorrect"),
            RedemptionStatus::UsageLimitReached => Some("Usage limit reached"),
            _ => None,
        }
    }
}

impl fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one redeem call for one (account, code) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionOutcome {
    pub account_id: AccountId,
    pub code: String,
    pub status: RedemptionStatus,
}

// ============================================================================
// NOTIFIER PAYLOADS
// ============================================================================

/// Lifecycle events published for a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeEvent {
    Discovered,
    Validated,
    Invalidated,
}

/// Where a candidate code came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeSource {
    /// Typed in by a user
    Submission,
    /// Picked out of a chat message
    Scan,
}

/// Counters of a group run, posted as progress and as the final tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    pub already_received: usize,
    pub retrying: usize,
    pub failed: usize,
    /// Members left unprocessed because the run halted
    pub halted: usize,
}

/// Verdict of validating one code with the probe account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationVerdict {
    Validated,
    Invalid,
    /// Inconclusive; the code stays pending for the periodic sweep
    Pending,
}

/// Answer sent back to whoever submitted a code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReply {
    /// Opaque handle of the originating message/user in the presentation layer
    pub reply_to: Option<String>,
    pub code: String,
    pub verdict: ValidationVerdict,
    pub message: String,
}
