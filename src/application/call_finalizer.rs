use crate::domain::lead_directory::LeadDirectory;
use crate::domain::models::{
    ActiveLead, CallDirection, CallLogEntry, CallOrigin, CallOutcome, CallPolicy, CallSession,
    CallStatus, EndReason, FollowUpPrompt, MissedCallReason, MissedCallRecord,
};
use crate::domain::phone_number::{normalize, MatchPolicy};
use crate::infrastructure::activity_log::ActivityLog;
use crate::infrastructure::telephony::{
    CallLogReader, DeepLinkOpener, PlatformCapabilities, TelephonyBridge,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

const COMPONENT: &str = "call_finalizer";

/// Everything a finished session turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conclusion {
    pub outcome: CallOutcome,
    pub follow_up: Option<FollowUpPrompt>,
    pub missed_call: Option<MissedCallRecord>,
    pub retained_lead: Option<ActiveLead>,
}

/// How connection was established for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Evidence {
    connected: bool,
    duration_seconds: u64,
}

pub struct CallFinalizer {
    call_log: Arc<dyn CallLogReader>,
    deep_links: Arc<dyn DeepLinkOpener>,
    capabilities: PlatformCapabilities,
    policy: CallPolicy,
    log: Arc<ActivityLog>,
}

impl CallFinalizer {
    pub fn new(telephony: &TelephonyBridge, policy: CallPolicy, log: Arc<ActivityLog>) -> Self {
        Self {
            call_log: Arc::clone(&telephony.call_log),
            deep_links: Arc::clone(&telephony.deep_links),
            capabilities: telephony.capabilities,
            policy,
            log,
        }
    }

    pub fn policy(&self) -> &CallPolicy {
        &self.policy
    }

    /// True while an outgoing call is too fresh for the native call log to hold it.
    pub fn needs_settle(&self, session: &CallSession, now: DateTime<Utc>) -> bool {
        if session.origin != CallOrigin::Outgoing || !self.capabilities.supports_call_log {
            return false;
        }
        let elapsed = now.signed_duration_since(session.started_at);
        match chrono::Duration::from_std(self.policy.settle_delay) {
            Ok(settle) => elapsed < settle,
            Err(_) => false,
        }
    }

    /// Most recent native log entry for the session; lookup failures read as "no entry".
    pub async fn find_call_log(&self, session: &CallSession) -> Option<CallLogEntry> {
        if !self.capabilities.supports_call_log || session.number.is_empty() {
            return None;
        }
        let lookback = chrono::Duration::from_std(self.policy.call_log_lookback)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let since = session.started_at - lookback;

        match self.call_log.most_recent(&session.number, since).await {
            Ok(entry) => entry,
            Err(error) => {
                self.log.warn(
                    COMPONENT,
                    &format!("call log lookup failed; using timers: {error}"),
                );
                None
            }
        }
    }

    /// Best-effort return to the host app after an outgoing call placed through the system dialer.
    pub async fn return_to_app(&self, session: &CallSession) {
        if session.origin != CallOrigin::Outgoing || self.capabilities.is_default_dialer {
            return;
        }
        let Some(link) = self.policy.return_deep_link.as_deref() else {
            return;
        };
        if let Err(error) = self.deep_links.open(link).await {
            self.log
                .warn(COMPONENT, &format!("return deep link failed: {error}"));
        }
    }
}

/// Resolves the outcome of a session that has ended.
///
/// A native call log entry, when present, decides connection and duration.
/// Otherwise the session's own timestamps do.
pub fn conclude(
    session: &CallSession,
    lead: Option<ActiveLead>,
    call_log: Option<&CallLogEntry>,
    directory: &LeadDirectory,
    matching: &MatchPolicy,
    now: DateTime<Utc>,
) -> Conclusion {
    let evidence = match call_log {
        Some(entry) => Evidence {
            connected: entry.indicates_connection(),
            duration_seconds: entry.duration_seconds,
        },
        None => timer_evidence(session, now),
    };

    let status = if evidence.connected {
        CallStatus::Connected
    } else if session.end_reason == Some(EndReason::Unreachable) {
        CallStatus::Unreachable
    } else if session.origin == CallOrigin::Incoming {
        CallStatus::Missed
    } else {
        CallStatus::NoAnswer
    };

    let lead = lead.or_else(|| directory.find_match(&session.number, matching));

    let missed_call = if status == CallStatus::Connected {
        None
    } else {
        lead.as_ref().and_then(|lead| {
            let phone_number = target_number(session, lead)?;
            if lead.id.trim().is_empty() {
                return None;
            }
            Some(MissedCallRecord {
                lead_id: lead.id.clone(),
                phone_number,
                direction: CallDirection::from(session.origin),
                fail_reason: if status == CallStatus::Unreachable {
                    MissedCallReason::Busy
                } else {
                    MissedCallReason::NoAnswer
                },
                occurred_at: session.started_at,
            })
        })
    };

    let follow_up = match (&lead, status) {
        (Some(lead), CallStatus::Connected) => Some(FollowUpPrompt {
            lead: lead.clone(),
            duration_seconds: evidence.duration_seconds,
        }),
        _ => None,
    };

    Conclusion {
        retained_lead: follow_up.as_ref().map(|prompt| prompt.lead.clone()),
        outcome: CallOutcome {
            status,
            duration_seconds: evidence.duration_seconds,
            lead,
        },
        follow_up,
        missed_call,
    }
}

fn timer_evidence(session: &CallSession, now: DateTime<Utc>) -> Evidence {
    match session.connected_at {
        Some(connected_at) => Evidence {
            connected: true,
            duration_seconds: rounded_seconds(connected_at, now),
        },
        None => Evidence {
            connected: false,
            duration_seconds: rounded_seconds(session.started_at, now),
        },
    }
}

fn rounded_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    let millis = to.signed_duration_since(from).num_milliseconds().max(0) as u64;
    (millis + 500) / 1_000
}

fn target_number(session: &CallSession, lead: &ActiveLead) -> Option<String> {
    let number = normalize(&session.number);
    if !number.is_empty() {
        return Some(number);
    }
    lead.phone
        .as_deref()
        .map(normalize)
        .filter(|value| !value.is_empty())
}
