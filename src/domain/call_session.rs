use crate::domain::models::{ActiveLead, CallOrigin, CallSession, EndReason};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Idle,
    Dialing,
    Connected,
}

impl CallPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Dialing => "dialing",
            Self::Connected => "connected",
        }
    }
}

/// Normalized meaning of a native `call-state-changed` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStateSignal {
    Active,
    Disconnected,
    Informational,
}

/// Timer instruction for the owner of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDirective {
    Nothing,
    ScheduleFinalize(Duration),
    CancelScheduledFinalize,
    FinalizeNow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingFinalize {
    /// Settle window after a disconnect signal; an active signal revokes it.
    Disconnected,
    /// Waiting for the platform call log to be written.
    AwaitingCallLog,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeStart {
    AlreadyRunning,
    NothingToFinalize,
    Ready {
        session: CallSession,
        lead: Option<ActiveLead>,
    },
}

/// Owns the single in-flight call session.
///
/// The machine never reads a clock or a timer: callers pass `now` and act on
/// the returned [`SessionDirective`].
#[derive(Debug, Clone)]
pub struct CallSessionMachine {
    session: Option<CallSession>,
    active_lead: Option<ActiveLead>,
    pending: Option<PendingFinalize>,
    finalizing: bool,
    settle_delay: Duration,
}

impl CallSessionMachine {
    pub fn new(settle_delay: Duration) -> Self {
        Self {
            session: None,
            active_lead: None,
            pending: None,
            finalizing: false,
            settle_delay,
        }
    }

    pub fn phase(&self) -> CallPhase {
        match &self.session {
            None => CallPhase::Idle,
            Some(session) if session.connected_at.is_some() => CallPhase::Connected,
            Some(_) => CallPhase::Dialing,
        }
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    pub fn active_lead(&self) -> Option<&ActiveLead> {
        self.active_lead.as_ref()
    }

    pub fn is_finalize_scheduled(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_finalizing(&self) -> bool {
        self.finalizing
    }

    pub fn begin_outgoing(
        &mut self,
        number: String,
        lead: Option<ActiveLead>,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        if number.trim().is_empty() {
            return Err(InfraError::InvalidInput(
                "phone number must not be empty".to_string(),
            ));
        }
        if self.session.is_some() || self.finalizing {
            return Err(InfraError::CallInProgress);
        }

        self.session = Some(CallSession::new(CallOrigin::Outgoing, number, now));
        self.active_lead = lead;
        self.pending = None;
        Ok(())
    }

    /// Rolls back a dial attempt that never reached the platform dialer.
    pub fn abort_outgoing(&mut self) {
        if self
            .session
            .as_ref()
            .is_some_and(|session| session.origin == CallOrigin::Outgoing)
        {
            self.session = None;
            self.active_lead = None;
            self.pending = None;
        }
    }

    pub fn on_incoming(
        &mut self,
        number: String,
        matched: Option<ActiveLead>,
        now: DateTime<Utc>,
    ) -> SessionDirective {
        // Withheld callers arrive with an empty number and still open a session.
        if self.session.is_none() && !self.finalizing {
            self.session = Some(CallSession::new(CallOrigin::Incoming, number, now));
            self.active_lead = None;
        }
        if self.session.is_some() && self.active_lead.is_none() {
            self.active_lead = matched;
        }
        SessionDirective::Nothing
    }

    pub fn on_state_signal(&mut self, signal: CallStateSignal, now: DateTime<Utc>) -> SessionDirective {
        match signal {
            CallStateSignal::Active => self.on_connected(now),
            CallStateSignal::Disconnected => {
                if self.finalizing || self.pending == Some(PendingFinalize::AwaitingCallLog) {
                    return SessionDirective::Nothing;
                }
                let Some(session) = self.session.as_mut() else {
                    return SessionDirective::Nothing;
                };
                session.end_reason = Some(EndReason::Unreachable);
                self.pending = Some(PendingFinalize::Disconnected);
                SessionDirective::ScheduleFinalize(self.settle_delay)
            }
            CallStateSignal::Informational => SessionDirective::Nothing,
        }
    }

    pub fn on_answered(&mut self, now: DateTime<Utc>) -> SessionDirective {
        self.on_connected(now)
    }

    pub fn on_call_ended(&mut self) -> SessionDirective {
        self.on_terminal()
    }

    pub fn on_call_missed(&mut self) -> SessionDirective {
        self.on_terminal()
    }

    /// Called when a scheduled finalize timer fires.
    pub fn on_finalize_timer(&mut self) -> SessionDirective {
        self.pending = None;
        SessionDirective::FinalizeNow
    }

    pub fn begin_finalize(&mut self) -> FinalizeStart {
        if self.finalizing {
            return FinalizeStart::AlreadyRunning;
        }
        self.pending = None;
        let Some(session) = self.session.clone() else {
            self.reset_session();
            return FinalizeStart::NothingToFinalize;
        };
        self.finalizing = true;
        FinalizeStart::Ready {
            session,
            lead: self.active_lead.clone(),
        }
    }

    /// Releases the finalize guard and waits for the call log before trying again.
    pub fn defer_finalize(&mut self) -> SessionDirective {
        self.finalizing = false;
        if self.session.is_none() {
            return SessionDirective::Nothing;
        }
        self.pending = Some(PendingFinalize::AwaitingCallLog);
        SessionDirective::ScheduleFinalize(self.settle_delay)
    }

    /// Releases the finalize guard and returns to idle, keeping `retained_lead`
    /// as the active lead when a follow-up is shown.
    pub fn finish_finalize(&mut self, retained_lead: Option<ActiveLead>) {
        self.finalizing = false;
        self.reset_session();
        self.active_lead = retained_lead;
    }

    pub fn cancel_pending(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn clear_active_lead(&mut self) {
        if self.session.is_none() {
            self.active_lead = None;
        }
    }

    fn on_connected(&mut self, now: DateTime<Utc>) -> SessionDirective {
        if self.finalizing {
            return SessionDirective::Nothing;
        }
        let Some(session) = self.session.as_mut() else {
            return SessionDirective::Nothing;
        };
        if session.connected_at.is_none() {
            session.connected_at = Some(now.max(session.started_at));
        }
        if self.pending == Some(PendingFinalize::Disconnected) {
            session.end_reason = None;
            self.pending = None;
            return SessionDirective::CancelScheduledFinalize;
        }
        SessionDirective::Nothing
    }

    fn on_terminal(&mut self) -> SessionDirective {
        if self.finalizing || self.pending == Some(PendingFinalize::AwaitingCallLog) {
            return SessionDirective::Nothing;
        }
        self.pending = None;
        SessionDirective::FinalizeNow
    }

    fn reset_session(&mut self) {
        self.session = None;
        self.pending = None;
    }
}
