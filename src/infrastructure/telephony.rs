use crate::domain::call_session::CallStateSignal;
use crate::domain::models::CallLogEntry;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub const INCOMING_CALL_EVENT: &str = "incomingCall";
pub const CALL_STATE_CHANGED_EVENT: &str = "callStateChanged";
pub const CALL_ANSWERED_EVENT: &str = "callAnswered";
pub const CALL_ENDED_EVENT: &str = "callEnded";
pub const CALL_MISSED_EVENT: &str = "callMissed";

/// Event emitted by the native telephony listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeCallEvent {
    Incoming { number: String },
    StateChanged { state: String },
    Answered,
    Ended,
    Missed,
}

impl NativeCallEvent {
    /// Decodes an event as delivered by the host bridge: an event name plus a JSON payload.
    pub fn from_bridge(name: &str, payload: &serde_json::Value) -> Result<Self, InfraError> {
        match name.trim() {
            INCOMING_CALL_EVENT => {
                let number = string_field(payload, &["number", "phoneNumber", "phone"]).unwrap_or_default();
                Ok(Self::Incoming { number })
            }
            CALL_STATE_CHANGED_EVENT => {
                let state = string_field(payload, &["state", "callState"]).ok_or_else(|| {
                    InfraError::InvalidInput(format!("{CALL_STATE_CHANGED_EVENT} requires a state"))
                })?;
                Ok(Self::StateChanged { state })
            }
            CALL_ANSWERED_EVENT => Ok(Self::Answered),
            CALL_ENDED_EVENT => Ok(Self::Ended),
            CALL_MISSED_EVENT => Ok(Self::Missed),
            other => Err(InfraError::InvalidInput(format!(
                "unknown call event: {other}"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Incoming { .. } => INCOMING_CALL_EVENT,
            Self::StateChanged { .. } => CALL_STATE_CHANGED_EVENT,
            Self::Answered => CALL_ANSWERED_EVENT,
            Self::Ended => CALL_ENDED_EVENT,
            Self::Missed => CALL_MISSED_EVENT,
        }
    }
}

pub fn classify_state(state: &str) -> CallStateSignal {
    match state.trim().to_ascii_lowercase().as_str() {
        "active" | "connected" | "offhook" => CallStateSignal::Active,
        "disconnected" | "idle" | "busy" => CallStateSignal::Disconnected,
        _ => CallStateSignal::Informational,
    }
}

fn string_field(payload: &serde_json::Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| payload.get(*key).and_then(serde_json::Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

pub type CallEventListener = Arc<dyn Fn(NativeCallEvent) + Send + Sync>;

pub trait CallEventSource: Send + Sync {
    fn subscribe(&self, listener: CallEventListener) -> Result<u64, InfraError>;
    fn unsubscribe(&self, subscription_id: u64) -> Result<(), InfraError>;
}

#[async_trait]
pub trait CallLogReader: Send + Sync {
    /// Most recent log entry for `number` at or after `since`, if any.
    async fn most_recent(
        &self,
        number: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<CallLogEntry>, InfraError>;
}

#[async_trait]
pub trait DialerLauncher: Send + Sync {
    async fn can_dial(&self, number: &str) -> Result<bool, InfraError>;
    async fn launch(&self, number: &str) -> Result<bool, InfraError>;
}

#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn ensure_call_permissions(&self) -> Result<bool, InfraError>;
}

#[async_trait]
pub trait DeepLinkOpener: Send + Sync {
    async fn open(&self, url: &str) -> Result<(), InfraError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformCapabilities {
    pub supports_call_log: bool,
    pub is_default_dialer: bool,
}

impl Default for PlatformCapabilities {
    fn default() -> Self {
        Self {
            supports_call_log: true,
            is_default_dialer: false,
        }
    }
}

/// Native collaborators supplied by the host application.
#[derive(Clone)]
pub struct TelephonyBridge {
    pub events: Arc<dyn CallEventSource>,
    pub call_log: Arc<dyn CallLogReader>,
    pub dialer: Arc<dyn DialerLauncher>,
    pub permissions: Arc<dyn PermissionGate>,
    pub deep_links: Arc<dyn DeepLinkOpener>,
    pub capabilities: PlatformCapabilities,
}
