use crate::application::auth::IdTokenProvider;
use crate::application::call_finalizer::{conclude, CallFinalizer};
use crate::application::directory_sync::{DirectoryRefresh, LeadDirectorySync};
use crate::application::missed_call_reporter::MissedCallReporter;
use crate::domain::call_session::{CallPhase, CallSessionMachine, FinalizeStart, SessionDirective};
use crate::domain::models::{
    ActiveLead, CallOrigin, CallOutcome, CallPolicy, EndReason, FollowUpPrompt,
};
use crate::domain::phone_number::{normalize, MatchPolicy};
use crate::infrastructure::activity_log::ActivityLog;
use crate::infrastructure::crm_graphql_client::CrmBackendClient;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::lead_cache::LeadDirectoryCache;
use crate::infrastructure::telephony::{
    classify_state, CallEventListener, NativeCallEvent, TelephonyBridge,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep_until, Instant};

const COMPONENT: &str = "call_controller";
const NOTICE_CAPACITY: usize = 16;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Collaborators the controller talks to.
#[derive(Clone)]
pub struct CallServices {
    pub backend: Arc<dyn CrmBackendClient>,
    pub tokens: Arc<dyn IdTokenProvider>,
    pub telephony: TelephonyBridge,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCallRequest {
    pub lead_id: Option<String>,
    pub lead_name: Option<String>,
    pub phone: String,
}

impl StartCallRequest {
    fn lead(&self, number: &str) -> Option<ActiveLead> {
        let id = self
            .lead_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())?;
        Some(ActiveLead {
            id: id.to_string(),
            name: self
                .lead_name
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned),
            phone: Some(number.to_string()),
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallSnapshot {
    pub phase: CallPhase,
    pub origin: Option<CallOrigin>,
    pub number: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub connected_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
    pub active_lead: Option<ActiveLead>,
    pub finalize_pending: bool,
    pub follow_up: Option<FollowUpPrompt>,
    pub last_outcome: Option<CallOutcome>,
    pub directory_size: usize,
}

/// Published once per finalized session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedCall {
    pub origin: CallOrigin,
    pub number: String,
    pub started_at: DateTime<Utc>,
    pub finalized_at: DateTime<Utc>,
    pub outcome: CallOutcome,
    pub follow_up: Option<FollowUpPrompt>,
}

enum ControllerCommand {
    StartCall {
        number: String,
        lead: Option<ActiveLead>,
        reply: oneshot::Sender<Result<CallSnapshot, InfraError>>,
    },
    Event(NativeCallEvent),
    Snapshot {
        reply: oneshot::Sender<CallSnapshot>,
    },
    DismissFollowUp {
        reply: oneshot::Sender<CallSnapshot>,
    },
    RefreshDirectory {
        reply: oneshot::Sender<DirectoryRefresh>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the task that owns the call session.
///
/// Native events, timer expiry and user commands are all serialized through
/// one worker, so every handler sees the latest session state. Call
/// [`CallController::shutdown`] when the owning screen goes away.
#[derive(Clone)]
pub struct CallController {
    commands: mpsc::UnboundedSender<ControllerCommand>,
    telephony: TelephonyBridge,
    notices: broadcast::Sender<FinalizedCall>,
}

impl CallController {
    pub fn spawn(
        services: CallServices,
        policy: CallPolicy,
        log: Arc<ActivityLog>,
    ) -> Result<Self, InfraError> {
        Self::spawn_with_clock(services, policy, log, Arc::new(Utc::now))
    }

    pub fn spawn_with_clock(
        services: CallServices,
        policy: CallPolicy,
        log: Arc<ActivityLog>,
        now_provider: NowProvider,
    ) -> Result<Self, InfraError> {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let listener_commands = commands.clone();
        let listener: CallEventListener = Arc::new(move |event| {
            let _ = listener_commands.send(ControllerCommand::Event(event));
        });
        let subscription = services.telephony.events.subscribe(listener)?;

        let cache = Arc::new(LeadDirectoryCache::default());
        let directory_sync = LeadDirectorySync::new(
            Arc::clone(&services.backend),
            Arc::clone(&services.tokens),
            Arc::clone(&cache),
            Arc::clone(&log),
        )
        .with_retry_policy(policy.directory_retry.clone());

        let mut worker = CallWorker {
            machine: CallSessionMachine::new(policy.settle_delay),
            finalizer: CallFinalizer::new(&services.telephony, policy.clone(), Arc::clone(&log)),
            reporter: MissedCallReporter::new(
                Arc::clone(&services.backend),
                Arc::clone(&services.tokens),
                Arc::clone(&log),
            ),
            directory_sync: Arc::new(directory_sync),
            cache,
            telephony: services.telephony.clone(),
            matching: policy.matching,
            log,
            now_provider,
            notices: notices.clone(),
            follow_up: None,
            last_outcome: None,
            finalize_deadline: None,
            tasks: JoinSet::new(),
            subscription: Some(subscription),
        };
        worker.load_directory(None);
        tokio::spawn(worker.run(receiver));

        Ok(Self {
            commands,
            telephony: services.telephony,
            notices,
        })
    }

    /// Places an outgoing call. Validation and permission checks happen before
    /// the session is touched.
    pub async fn start_call(&self, request: StartCallRequest) -> Result<CallSnapshot, InfraError> {
        let number = normalize(&request.phone);
        if number.is_empty() {
            return Err(InfraError::InvalidInput(
                "phone number is empty or invalid".to_string(),
            ));
        }
        let lead = request.lead(&number);

        if !self.telephony.permissions.ensure_call_permissions().await? {
            return Err(InfraError::PermissionDenied(
                "call permissions were not granted".to_string(),
            ));
        }
        if !self.telephony.dialer.can_dial(&number).await? {
            return Err(InfraError::Dialer(format!("no dialer can call {number}")));
        }

        self.request(|reply| ControllerCommand::StartCall {
            number,
            lead,
            reply,
        })
        .await?
    }

    pub fn dispatch(&self, event: NativeCallEvent) -> Result<(), InfraError> {
        self.commands
            .send(ControllerCommand::Event(event))
            .map_err(|_| InfraError::ControllerStopped)
    }

    pub async fn snapshot(&self) -> Result<CallSnapshot, InfraError> {
        self.request(|reply| ControllerCommand::Snapshot { reply }).await
    }

    pub async fn dismiss_follow_up(&self) -> Result<CallSnapshot, InfraError> {
        self.request(|reply| ControllerCommand::DismissFollowUp { reply })
            .await
    }

    pub async fn refresh_directory(&self) -> Result<DirectoryRefresh, InfraError> {
        self.request(|reply| ControllerCommand::RefreshDirectory { reply })
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FinalizedCall> {
        self.notices.subscribe()
    }

    /// Cancels any scheduled finalize, detaches from the event source and
    /// waits for background work to finish.
    pub async fn shutdown(&self) -> Result<(), InfraError> {
        self.request(|reply| ControllerCommand::Shutdown { reply })
            .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControllerCommand,
    ) -> Result<T, InfraError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| InfraError::ControllerStopped)?;
        response.await.map_err(|_| InfraError::ControllerStopped)
    }
}

struct CallWorker {
    machine: CallSessionMachine,
    finalizer: CallFinalizer,
    reporter: MissedCallReporter,
    directory_sync: Arc<LeadDirectorySync>,
    cache: Arc<LeadDirectoryCache>,
    telephony: TelephonyBridge,
    matching: MatchPolicy,
    log: Arc<ActivityLog>,
    now_provider: NowProvider,
    notices: broadcast::Sender<FinalizedCall>,
    follow_up: Option<FollowUpPrompt>,
    last_outcome: Option<CallOutcome>,
    finalize_deadline: Option<Instant>,
    tasks: JoinSet<()>,
    subscription: Option<u64>,
}

impl CallWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ControllerCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle(command).await {
                            break;
                        }
                    }
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                _ = wait_until(self.finalize_deadline) => {
                    self.finalize_deadline = None;
                    let directive = self.machine.on_finalize_timer();
                    self.apply(directive).await;
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.reap(joined);
                }
            }
        }
    }

    /// Returns false once the worker should stop.
    async fn handle(&mut self, command: ControllerCommand) -> bool {
        match command {
            ControllerCommand::StartCall {
                number,
                lead,
                reply,
            } => {
                let result = self.start_call(number, lead).await;
                let _ = reply.send(result);
            }
            ControllerCommand::Event(event) => self.on_event(event).await,
            ControllerCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            ControllerCommand::DismissFollowUp { reply } => {
                self.follow_up = None;
                self.machine.clear_active_lead();
                let _ = reply.send(self.snapshot());
            }
            ControllerCommand::RefreshDirectory { reply } => self.load_directory(Some(reply)),
            ControllerCommand::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn start_call(
        &mut self,
        number: String,
        lead: Option<ActiveLead>,
    ) -> Result<CallSnapshot, InfraError> {
        self.machine
            .begin_outgoing(number.clone(), lead, (self.now_provider)())?;
        self.follow_up = None;
        self.last_outcome = None;

        let launch_error = match self.telephony.dialer.launch(&number).await {
            Ok(true) => None,
            Ok(false) => Some(format!("dialer did not open for {number}")),
            Err(error) => Some(format!("dialer failed for {number}: {error}")),
        };
        if let Some(message) = launch_error {
            self.machine.abort_outgoing();
            self.log.warn(COMPONENT, &message);
            return Err(InfraError::Dialer(message));
        }

        self.log
            .info(COMPONENT, &format!("outgoing call started number={number}"));
        Ok(self.snapshot())
    }

    async fn on_event(&mut self, event: NativeCallEvent) {
        let now = (self.now_provider)();
        let directive = match event {
            NativeCallEvent::Incoming { number } => {
                let was_idle = self.machine.session().is_none();
                let number = normalize(&number);
                let matched = if number.is_empty() {
                    None
                } else {
                    self.cache.snapshot().find_match(&number, &self.matching)
                };
                let directive = self.machine.on_incoming(number, matched, now);
                if was_idle && self.machine.session().is_some() {
                    self.follow_up = None;
                    self.last_outcome = None;
                    let lead = self.machine.active_lead().map(|lead| lead.id.as_str());
                    self.log.info(
                        COMPONENT,
                        &format!("incoming call detected lead={}", lead.unwrap_or("none")),
                    );
                }
                directive
            }
            NativeCallEvent::StateChanged { state } => {
                self.machine.on_state_signal(classify_state(&state), now)
            }
            NativeCallEvent::Answered => self.machine.on_answered(now),
            NativeCallEvent::Ended => self.machine.on_call_ended(),
            NativeCallEvent::Missed => self.machine.on_call_missed(),
        };
        self.apply(directive).await;
    }

    async fn apply(&mut self, directive: SessionDirective) {
        match directive {
            SessionDirective::Nothing => {}
            SessionDirective::ScheduleFinalize(delay) => {
                self.finalize_deadline = Some(Instant::now() + delay);
            }
            SessionDirective::CancelScheduledFinalize => self.finalize_deadline = None,
            SessionDirective::FinalizeNow => {
                self.finalize_deadline = None;
                self.finalize().await;
            }
        }
    }

    async fn finalize(&mut self) {
        let (session, lead) = match self.machine.begin_finalize() {
            FinalizeStart::Ready { session, lead } => (session, lead),
            FinalizeStart::AlreadyRunning | FinalizeStart::NothingToFinalize => return,
        };

        if self.finalizer.needs_settle(&session, (self.now_provider)()) {
            let directive = self.machine.defer_finalize();
            self.apply_schedule(directive);
            return;
        }

        let call_log = self.finalizer.find_call_log(&session).await;
        let directory = self.cache.snapshot();
        let finalized_at = (self.now_provider)();
        let conclusion = conclude(
            &session,
            lead,
            call_log.as_ref(),
            &directory,
            &self.matching,
            finalized_at,
        );
        self.machine.finish_finalize(conclusion.retained_lead.clone());

        if let Some(record) = conclusion.missed_call {
            let reporter = self.reporter.clone();
            self.tasks.spawn(async move {
                reporter.report(record).await;
            });
        }

        self.log.info(
            COMPONENT,
            &format!(
                "call finalized status={} duration={}s follow_up={}",
                conclusion.outcome.status.as_str(),
                conclusion.outcome.duration_seconds,
                conclusion.follow_up.is_some()
            ),
        );
        self.follow_up = conclusion.follow_up.clone();
        self.last_outcome = Some(conclusion.outcome.clone());
        let _ = self.notices.send(FinalizedCall {
            origin: session.origin,
            number: session.number.clone(),
            started_at: session.started_at,
            finalized_at,
            outcome: conclusion.outcome,
            follow_up: conclusion.follow_up,
        });

        self.finalizer.return_to_app(&session).await;
    }

    fn apply_schedule(&mut self, directive: SessionDirective) {
        if let SessionDirective::ScheduleFinalize(delay) = directive {
            self.finalize_deadline = Some(Instant::now() + delay);
        }
    }

    fn load_directory(&mut self, reply: Option<oneshot::Sender<DirectoryRefresh>>) {
        let sync = Arc::clone(&self.directory_sync);
        self.tasks.spawn(async move {
            let result = sync.refresh().await;
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        });
    }

    fn reap(&self, joined: Result<(), JoinError>) {
        if let Err(error) = joined {
            self.log
                .error(COMPONENT, &format!("background task failed: {error}"));
        }
    }

    async fn shutdown(&mut self) {
        self.finalize_deadline = None;
        self.machine.cancel_pending();
        if let Some(subscription) = self.subscription.take() {
            if let Err(error) = self.telephony.events.unsubscribe(subscription) {
                self.log.warn(
                    COMPONENT,
                    &format!("call event unsubscribe failed: {error}"),
                );
            }
        }
        while let Some(joined) = self.tasks.join_next().await {
            self.reap(joined);
        }
        self.log.info(COMPONENT, "call controller stopped");
    }

    fn snapshot(&self) -> CallSnapshot {
        let session = self.machine.session();
        CallSnapshot {
            phase: self.machine.phase(),
            origin: session.map(|session| session.origin),
            number: session.map(|session| session.number.clone()),
            started_at: session.map(|session| session.started_at),
            connected_at: session.and_then(|session| session.connected_at),
            end_reason: session.and_then(|session| session.end_reason),
            active_lead: self.machine.active_lead().cloned(),
            finalize_pending: self.finalize_deadline.is_some(),
            follow_up: self.follow_up.clone(),
            last_outcome: self.last_outcome.clone(),
            directory_size: self.cache.snapshot().len(),
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
