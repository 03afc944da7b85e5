use crate::application::auth::IdTokenProvider;
use crate::domain::models::{CallLogEntry, MissedCallRecord};
use crate::infrastructure::crm_graphql_client::{AssignedLead, CrmBackendClient};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::telephony::{
    CallEventListener, CallEventSource, CallLogReader, DeepLinkOpener, DialerLauncher,
    NativeCallEvent, PermissionGate, PlatformCapabilities, TelephonyBridge,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn fixed_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("valid datetime")
        .with_timezone(&Utc)
}

pub fn assigned_lead(id: &str, name: &str, phone: &str) -> AssignedLead {
    AssignedLead {
        id: id.to_string(),
        name: Some(name.to_string()),
        phone: Some(phone.to_string()),
    }
}

#[derive(Debug, Clone)]
pub enum FakeLeadsResponse {
    Success(Vec<AssignedLead>),
    NetworkError,
    GraphQlError,
}

/// Backend fake. Queued lead responses are served first, then `default_leads` forever.
#[derive(Debug, Default)]
pub struct FakeBackend {
    leads_responses: Mutex<VecDeque<FakeLeadsResponse>>,
    default_leads: Vec<AssignedLead>,
    pub leads_calls: AtomicUsize,
    pub recorded: Mutex<Vec<MissedCallRecord>>,
    pub fail_reports: AtomicBool,
    pub report_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn with_leads(leads: Vec<AssignedLead>) -> Self {
        Self {
            default_leads: leads,
            ..Self::default()
        }
    }

    pub fn with_leads_responses(responses: Vec<FakeLeadsResponse>) -> Self {
        Self {
            leads_responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    pub fn push_leads_response(&self, response: FakeLeadsResponse) {
        self.leads_responses
            .lock()
            .expect("leads lock poisoned")
            .push_back(response);
    }

    pub fn recorded(&self) -> Vec<MissedCallRecord> {
        self.recorded.lock().expect("recorded lock poisoned").clone()
    }
}

#[async_trait]
impl CrmBackendClient for FakeBackend {
    async fn my_assigned_leads(&self, _id_token: &str) -> Result<Vec<AssignedLead>, InfraError> {
        self.leads_calls.fetch_add(1, Ordering::SeqCst);
        let response = self
            .leads_responses
            .lock()
            .expect("leads lock poisoned")
            .pop_front()
            .unwrap_or_else(|| FakeLeadsResponse::Success(self.default_leads.clone()));
        match response {
            FakeLeadsResponse::Success(leads) => Ok(leads),
            FakeLeadsResponse::NetworkError => Err(InfraError::Network(
                "MyAssignedLeads: connection reset".to_string(),
            )),
            FakeLeadsResponse::GraphQlError => Err(InfraError::GraphQl(
                "MyAssignedLeads failed: Unauthorized".to_string(),
            )),
        }
    }

    async fn record_missed_call(
        &self,
        _id_token: &str,
        record: &MissedCallRecord,
    ) -> Result<(), InfraError> {
        self.report_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reports.load(Ordering::SeqCst) {
            return Err(InfraError::GraphQl("CreateCallLog failed: internal".to_string()));
        }
        self.recorded
            .lock()
            .expect("recorded lock poisoned")
            .push(record.clone());
        Ok(())
    }
}

#[derive(Debug)]
pub struct FakeTokens {
    token: Option<String>,
}

impl FakeTokens {
    pub fn signed_in() -> Self {
        Self {
            token: Some("test-id-token".to_string()),
        }
    }

    pub fn signed_out() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl IdTokenProvider for FakeTokens {
    async fn id_token(&self) -> Result<Option<String>, InfraError> {
        Ok(self.token.clone())
    }
}

#[derive(Default)]
pub struct FakeEventSource {
    listeners: Mutex<HashMap<u64, CallEventListener>>,
    next_id: AtomicU64,
    pub unsubscribed: Mutex<Vec<u64>>,
}

impl FakeEventSource {
    pub fn emit(&self, event: NativeCallEvent) {
        let listeners = self
            .listeners
            .lock()
            .expect("listeners lock poisoned")
            .values()
            .cloned()
            .collect::<Vec<_>>();
        for listener in listeners {
            listener(event.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().expect("listeners lock poisoned").len()
    }
}

impl CallEventSource for FakeEventSource {
    fn subscribe(&self, listener: CallEventListener) -> Result<u64, InfraError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.listeners
            .lock()
            .expect("listeners lock poisoned")
            .insert(id, listener);
        Ok(id)
    }

    fn unsubscribe(&self, subscription_id: u64) -> Result<(), InfraError> {
        self.listeners
            .lock()
            .expect("listeners lock poisoned")
            .remove(&subscription_id);
        self.unsubscribed
            .lock()
            .expect("unsubscribed lock poisoned")
            .push(subscription_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeCallLog {
    pub entry: Mutex<Option<CallLogEntry>>,
    pub fail: AtomicBool,
    pub queries: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl FakeCallLog {
    pub fn set_entry(&self, entry: Option<CallLogEntry>) {
        *self.entry.lock().expect("entry lock poisoned") = entry;
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().expect("queries lock poisoned").len()
    }
}

#[async_trait]
impl CallLogReader for FakeCallLog {
    async fn most_recent(
        &self,
        number: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<CallLogEntry>, InfraError> {
        self.queries
            .lock()
            .expect("queries lock poisoned")
            .push((number.to_string(), since));
        if self.fail.load(Ordering::SeqCst) {
            return Err(InfraError::Telephony("call log unavailable".to_string()));
        }
        Ok(self.entry.lock().expect("entry lock poisoned").clone())
    }
}

#[derive(Debug)]
pub struct FakeDialer {
    pub available: AtomicBool,
    pub launch_succeeds: AtomicBool,
    pub launches: Mutex<Vec<String>>,
}

impl Default for FakeDialer {
    fn default() -> Self {
        Self {
            available: AtomicBool::new(true),
            launch_succeeds: AtomicBool::new(true),
            launches: Mutex::new(Vec::new()),
        }
    }
}

impl FakeDialer {
    pub fn launches(&self) -> Vec<String> {
        self.launches.lock().expect("launches lock poisoned").clone()
    }
}

#[async_trait]
impl DialerLauncher for FakeDialer {
    async fn can_dial(&self, _number: &str) -> Result<bool, InfraError> {
        Ok(self.available.load(Ordering::SeqCst))
    }

    async fn launch(&self, number: &str) -> Result<bool, InfraError> {
        self.launches
            .lock()
            .expect("launches lock poisoned")
            .push(number.to_string());
        Ok(self.launch_succeeds.load(Ordering::SeqCst))
    }
}

#[derive(Debug)]
pub struct FakePermissions {
    pub granted: AtomicBool,
}

impl Default for FakePermissions {
    fn default() -> Self {
        Self {
            granted: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl PermissionGate for FakePermissions {
    async fn ensure_call_permissions(&self) -> Result<bool, InfraError> {
        Ok(self.granted.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Default)]
pub struct FakeDeepLinks {
    pub opened: Mutex<Vec<String>>,
    pub fail: AtomicBool,
}

impl FakeDeepLinks {
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().expect("opened lock poisoned").clone()
    }
}

#[async_trait]
impl DeepLinkOpener for FakeDeepLinks {
    async fn open(&self, url: &str) -> Result<(), InfraError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(InfraError::Telephony(format!("cannot open {url}")));
        }
        self.opened
            .lock()
            .expect("opened lock poisoned")
            .push(url.to_string());
        Ok(())
    }
}

/// Every native collaborator as a fake, plus the bridge assembled from them.
pub struct FakeTelephony {
    pub events: Arc<FakeEventSource>,
    pub call_log: Arc<FakeCallLog>,
    pub dialer: Arc<FakeDialer>,
    pub permissions: Arc<FakePermissions>,
    pub deep_links: Arc<FakeDeepLinks>,
}

impl FakeTelephony {
    pub fn new() -> Self {
        Self {
            events: Arc::new(FakeEventSource::default()),
            call_log: Arc::new(FakeCallLog::default()),
            dialer: Arc::new(FakeDialer::default()),
            permissions: Arc::new(FakePermissions::default()),
            deep_links: Arc::new(FakeDeepLinks::default()),
        }
    }

    pub fn bridge(&self, capabilities: PlatformCapabilities) -> TelephonyBridge {
        TelephonyBridge {
            events: self.events.clone(),
            call_log: self.call_log.clone(),
            dialer: self.dialer.clone(),
            permissions: self.permissions.clone(),
            deep_links: self.deep_links.clone(),
            capabilities,
        }
    }
}
