use crate::domain::phone_number::{digits_only, MatchPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallOrigin {
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Unreachable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallSession {
    pub origin: CallOrigin,
    pub number: String,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
}

impl CallSession {
    pub fn new(origin: CallOrigin, number: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            origin,
            number: number.into(),
            started_at,
            connected_at: None,
            end_reason: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveLead {
    pub id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeadDirectoryEntry {
    pub id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub normalized_digits: String,
}

impl LeadDirectoryEntry {
    pub fn new(id: impl Into<String>, name: Option<String>, phone: Option<String>) -> Self {
        let normalized_digits = phone.as_deref().map(digits_only).unwrap_or_default();
        Self {
            id: id.into(),
            name,
            phone,
            normalized_digits,
        }
    }

    pub fn to_active_lead(&self) -> ActiveLead {
        ActiveLead {
            id: self.id.clone(),
            name: self.name.clone(),
            phone: self.phone.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Connected,
    Missed,
    NoAnswer,
    Unreachable,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Missed => "missed",
            Self::NoAnswer => "no-answer",
            Self::Unreachable => "unreachable",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallOutcome {
    pub status: CallStatus,
    pub duration_seconds: u64,
    pub lead: Option<ActiveLead>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FollowUpPrompt {
    pub lead: ActiveLead,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

impl From<CallOrigin> for CallDirection {
    fn from(origin: CallOrigin) -> Self {
        match origin {
            CallOrigin::Incoming => Self::Incoming,
            CallOrigin::Outgoing => Self::Outgoing,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissedCallReason {
    Busy,
    NoAnswer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MissedCallRecord {
    pub lead_id: String,
    pub phone_number: String,
    pub direction: CallDirection,
    pub fail_reason: MissedCallReason,
    pub occurred_at: DateTime<Utc>,
}

impl MissedCallRecord {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.lead_id, "missed_call.lead_id")?;
        validate_non_empty(&self.phone_number, "missed_call.phone_number")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallLogType {
    Incoming,
    Outgoing,
    Missed,
    Rejected,
    Unknown,
}

impl CallLogType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "incoming" | "1" => Self::Incoming,
            "outgoing" | "2" => Self::Outgoing,
            "missed" | "3" => Self::Missed,
            "rejected" | "5" => Self::Rejected,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallLogEntry {
    pub duration_seconds: u64,
    pub log_type: CallLogType,
}

impl CallLogEntry {
    pub fn indicates_connection(&self) -> bool {
        self.duration_seconds > 0 && self.log_type != CallLogType::Missed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSession {
    pub id_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub user_id: Option<String>,
}

impl AuthSession {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.id_token.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPolicy {
    pub settle_delay: Duration,
    pub call_log_lookback: Duration,
    pub matching: MatchPolicy,
    pub return_deep_link: Option<String>,
    pub directory_retry: RetryPolicy,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(1_200),
            call_log_lookback: Duration::from_secs(20),
            matching: MatchPolicy::default(),
            return_deep_link: None,
            directory_retry: RetryPolicy::default(),
        }
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
