use crate::application::auth::{
    AuthManager, EnsureTokenResult, FirebaseAuthConfig, IdTokenProvider, SignInRequest,
};
use crate::application::bootstrap::bootstrap_workspace;
use crate::application::call_controller::{
    CallController, CallServices, CallSnapshot, StartCallRequest,
};
use crate::application::directory_sync::DirectoryRefresh;
use crate::infrastructure::activity_log::ActivityLog;
use crate::infrastructure::auth_client::{ReqwestSecureTokenClient, SecureTokenClient};
use crate::infrastructure::config::{
    load_call_policy, optional_lookup_value, read_graphql_endpoint, FIREBASE_API_KEY_KEYS,
};
use crate::infrastructure::credential_store::{CredentialStore, KeyringCredentialStore};
use crate::infrastructure::crm_graphql_client::{CrmBackendClient, ReqwestCrmGraphQlClient};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::telephony::{NativeCallEvent, TelephonyBridge};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

type SharedAuthManager = AuthManager<dyn CredentialStore, dyn SecureTokenClient>;

pub struct AppState {
    config_dir: PathBuf,
    log: Arc<ActivityLog>,
    auth: Arc<SharedAuthManager>,
    controller: Mutex<Option<CallController>>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let lookup = |key: &str| std::env::var(key).ok();
        let api_key = optional_lookup_value(&lookup, FIREBASE_API_KEY_KEYS).unwrap_or_default();

        Self::with_collaborators(
            bootstrap.config_dir,
            FirebaseAuthConfig::new(api_key),
            Arc::new(KeyringCredentialStore::default()),
            Arc::new(ReqwestSecureTokenClient::new()),
            Arc::new(ActivityLog::to_file(&bootstrap.logs_dir)),
        )
    }

    pub fn with_collaborators(
        config_dir: PathBuf,
        auth_config: FirebaseAuthConfig,
        credential_store: Arc<dyn CredentialStore>,
        token_client: Arc<dyn SecureTokenClient>,
        log: Arc<ActivityLog>,
    ) -> Result<Self, InfraError> {
        Ok(Self {
            config_dir,
            log,
            auth: Arc::new(AuthManager::new(auth_config, credential_store, token_client)),
            controller: Mutex::new(None),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn activity_log(&self) -> &Arc<ActivityLog> {
        &self.log
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.log.info(command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.log.error(command, message);
    }

    fn lock_controller(&self) -> Result<MutexGuard<'_, Option<CallController>>, InfraError> {
        self.controller
            .lock()
            .map_err(|_| InfraError::InvalidConfig("controller lock poisoned".to_string()))
    }

    fn mounted_controller(&self) -> Result<CallController, InfraError> {
        self.lock_controller()?
            .clone()
            .ok_or(InfraError::ControllerStopped)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuthStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RefreshLeadsResponse {
    pub status: String,
    pub loaded: usize,
}

impl From<DirectoryRefresh> for RefreshLeadsResponse {
    fn from(value: DirectoryRefresh) -> Self {
        let (status, loaded) = match value {
            DirectoryRefresh::Loaded(count) => ("loaded", count),
            DirectoryRefresh::SignedOut => ("signed_out", 0),
            DirectoryRefresh::Failed => ("failed", 0),
        };
        Self {
            status: status.to_string(),
            loaded,
        }
    }
}

/// Mounts the call screen against the configured GraphQL backend.
pub async fn mount_impl(
    state: &AppState,
    telephony: TelephonyBridge,
) -> Result<CallSnapshot, InfraError> {
    let endpoint = read_graphql_endpoint(&state.config_dir, |key| std::env::var(key).ok())?;
    if endpoint.is_none() {
        state.log_info("mount", "graphql endpoint not configured; backend calls will fail");
    }
    let backend = ReqwestCrmGraphQlClient::new(endpoint.as_deref())?;
    mount_with_backend_impl(state, telephony, Arc::new(backend)).await
}

/// Starts the call controller once. A second mount returns the running state.
pub async fn mount_with_backend_impl(
    state: &AppState,
    telephony: TelephonyBridge,
    backend: Arc<dyn CrmBackendClient>,
) -> Result<CallSnapshot, InfraError> {
    let controller = {
        let mut slot = state.lock_controller()?;
        match slot.as_ref() {
            Some(existing) => existing.clone(),
            None => {
                let policy = load_call_policy(&state.config_dir)?;
                let tokens: Arc<dyn IdTokenProvider> = state.auth.clone();
                let controller = CallController::spawn(
                    CallServices {
                        backend,
                        tokens,
                        telephony,
                    },
                    policy,
                    state.log.clone(),
                )?;
                state.log_info("mount", "call controller started");
                slot.insert(controller).clone()
            }
        }
    };
    controller.snapshot().await
}

/// Stops the controller. Returns `false` when nothing was mounted.
pub async fn unmount_impl(state: &AppState) -> Result<bool, InfraError> {
    let Some(controller) = state.lock_controller()?.take() else {
        return Ok(false);
    };
    controller.shutdown().await?;
    state.log_info("unmount", "call controller stopped");
    Ok(true)
}

pub async fn start_call_impl(
    state: &AppState,
    request: StartCallRequest,
) -> Result<CallSnapshot, InfraError> {
    let controller = state.mounted_controller()?;
    controller.start_call(request).await
}

/// Forwards a named bridge event for hosts that push events through commands.
pub fn handle_call_event_impl(
    state: &AppState,
    name: String,
    payload: serde_json::Value,
) -> Result<(), InfraError> {
    let event = NativeCallEvent::from_bridge(&name, &payload)?;
    state.mounted_controller()?.dispatch(event)
}

pub async fn get_call_state_impl(state: &AppState) -> Result<CallSnapshot, InfraError> {
    state.mounted_controller()?.snapshot().await
}

pub async fn dismiss_follow_up_impl(state: &AppState) -> Result<CallSnapshot, InfraError> {
    state.mounted_controller()?.dismiss_follow_up().await
}

pub async fn refresh_leads_impl(state: &AppState) -> Result<RefreshLeadsResponse, InfraError> {
    let outcome = state.mounted_controller()?.refresh_directory().await?;
    Ok(outcome.into())
}

/// Stores the session from an interactive sign-in and reloads the directory
/// when the call screen is mounted.
pub async fn sign_in_impl(
    state: &AppState,
    request: SignInRequest,
) -> Result<AuthStatusResponse, InfraError> {
    let session = state.auth.store_sign_in(request)?;
    state.log_info("sign_in", "session stored");

    let controller = state.lock_controller()?.clone();
    if let Some(controller) = controller {
        let refreshed = RefreshLeadsResponse::from(controller.refresh_directory().await?);
        state.log_info(
            "sign_in",
            &format!("directory refresh after sign-in: {}", refreshed.status),
        );
    }

    Ok(AuthStatusResponse {
        status: "authenticated".to_string(),
        expires_at: Some(session.expires_at.to_rfc3339()),
    })
}

pub async fn auth_status_impl(state: &AppState) -> Result<AuthStatusResponse, InfraError> {
    let response = match state.auth.ensure_id_token().await? {
        EnsureTokenResult::Existing(session) | EnsureTokenResult::Refreshed(session) => {
            AuthStatusResponse {
                status: "authenticated".to_string(),
                expires_at: Some(session.expires_at.to_rfc3339()),
            }
        }
        EnsureTokenResult::ReauthenticationRequired => AuthStatusResponse {
            status: "reauthentication_required".to_string(),
            expires_at: None,
        },
    };
    Ok(response)
}

pub fn sign_out_impl(state: &AppState) -> Result<(), InfraError> {
    state.auth.sign_out()?;
    state.log_info("sign_out", "session removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::{assigned_lead, FakeBackend, FakeTelephony};
    use crate::domain::call_session::CallPhase;
    use crate::infrastructure::auth_client::{IdTokenRefreshRequest, SecureTokenResponse};
    use crate::infrastructure::config::ensure_default_configs;
    use crate::infrastructure::credential_store::InMemoryCredentialStore;
    use crate::infrastructure::telephony::PlatformCapabilities;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(1);

    struct RejectingTokenClient;

    #[async_trait]
    impl SecureTokenClient for RejectingTokenClient {
        async fn refresh_id_token(
            &self,
            _request: IdTokenRefreshRequest,
        ) -> Result<SecureTokenResponse, InfraError> {
            Err(InfraError::Auth("TOKEN_EXPIRED".to_string()))
        }
    }

    struct TempWorkspace {
        path: PathBuf,
    }

    impl TempWorkspace {
        fn new() -> Self {
            let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "crm-command-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(path.join("config")).expect("create temp workspace");
            ensure_default_configs(&path.join("config")).expect("write default configs");
            Self { path }
        }

        fn app_state(&self) -> AppState {
            AppState::with_collaborators(
                self.path.join("config"),
                FirebaseAuthConfig::new("test-api-key"),
                Arc::new(InMemoryCredentialStore::default()),
                Arc::new(RejectingTokenClient),
                Arc::new(ActivityLog::in_memory()),
            )
            .expect("initialize app state")
        }
    }

    impl Drop for TempWorkspace {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    fn sign_in_request(id_token: &str) -> SignInRequest {
        SignInRequest {
            id_token: id_token.to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_in: 3600,
            user_id: Some("agent-1".to_string()),
        }
    }

    fn two_leads() -> Arc<FakeBackend> {
        Arc::new(FakeBackend::with_leads(vec![
            assigned_lead("L1", "Asha", "+91 98765 43210"),
            assigned_lead("L2", "Ravi", "080-2222-3333"),
        ]))
    }

    #[tokio::test]
    async fn commands_before_mount_report_stopped_controller() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        assert!(matches!(
            get_call_state_impl(&state).await,
            Err(InfraError::ControllerStopped)
        ));
        assert!(matches!(
            handle_call_event_impl(&state, "callEnded".to_string(), serde_json::Value::Null),
            Err(InfraError::ControllerStopped)
        ));
        assert!(!unmount_impl(&state).await.expect("unmount"));
    }

    #[tokio::test]
    async fn mount_start_call_and_unmount() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let telephony = FakeTelephony::new();

        let mounted = mount_with_backend_impl(
            &state,
            telephony.bridge(PlatformCapabilities::default()),
            two_leads(),
        )
        .await
        .expect("mount");
        assert_eq!(mounted.phase, CallPhase::Idle);

        let remounted = mount_with_backend_impl(
            &state,
            telephony.bridge(PlatformCapabilities::default()),
            two_leads(),
        )
        .await
        .expect("remount");
        assert_eq!(remounted.phase, CallPhase::Idle);
        assert_eq!(telephony.events.listener_count(), 1);

        let snapshot = start_call_impl(
            &state,
            StartCallRequest {
                lead_id: Some("L1".to_string()),
                lead_name: Some("Asha".to_string()),
                phone: "98765 43210".to_string(),
            },
        )
        .await
        .expect("start call");
        assert_eq!(snapshot.phase, CallPhase::Dialing);
        assert_eq!(snapshot.number.as_deref(), Some("9876543210"));
        assert_eq!(telephony.dialer.launches(), vec!["9876543210".to_string()]);

        assert!(unmount_impl(&state).await.expect("unmount"));
        assert_eq!(telephony.events.listener_count(), 0);
        assert!(matches!(
            get_call_state_impl(&state).await,
            Err(InfraError::ControllerStopped)
        ));
    }

    #[tokio::test]
    async fn sign_in_reloads_directory_and_sign_out_requires_reauthentication() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let telephony = FakeTelephony::new();
        let backend = two_leads();

        let mounted = mount_with_backend_impl(
            &state,
            telephony.bridge(PlatformCapabilities::default()),
            backend.clone(),
        )
        .await
        .expect("mount");
        assert_eq!(mounted.directory_size, 0);

        let signed_in = sign_in_impl(&state, sign_in_request("id-token-1"))
            .await
            .expect("sign in");
        assert_eq!(signed_in.status, "authenticated");
        assert!(backend.leads_calls.load(Ordering::SeqCst) >= 1);
        assert_eq!(
            get_call_state_impl(&state).await.expect("state").directory_size,
            2
        );

        let refreshed = refresh_leads_impl(&state).await.expect("refresh");
        assert_eq!(
            refreshed,
            RefreshLeadsResponse {
                status: "loaded".to_string(),
                loaded: 2,
            }
        );

        sign_out_impl(&state).expect("sign out");
        let status = auth_status_impl(&state).await.expect("auth status");
        assert_eq!(status.status, "reauthentication_required");
        assert_eq!(
            refresh_leads_impl(&state).await.expect("refresh").status,
            "signed_out"
        );

        unmount_impl(&state).await.expect("unmount");
    }

    #[tokio::test]
    async fn blank_sign_in_is_rejected_and_logged() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();

        let error = sign_in_impl(&state, sign_in_request("   "))
            .await
            .expect_err("blank token must fail");
        let message = state.command_error("sign_in", &error);

        assert!(message.contains("id token must not be empty"));
        assert!(state
            .activity_log()
            .contains("error", "sign_in", "id token must not be empty"));
    }

    #[tokio::test]
    async fn bridge_events_are_decoded_before_dispatch() {
        let workspace = TempWorkspace::new();
        let state = workspace.app_state();
        let telephony = FakeTelephony::new();
        mount_with_backend_impl(
            &state,
            telephony.bridge(PlatformCapabilities::default()),
            two_leads(),
        )
        .await
        .expect("mount");

        assert!(matches!(
            handle_call_event_impl(&state, "callRecorded".to_string(), serde_json::Value::Null),
            Err(InfraError::InvalidInput(_))
        ));

        handle_call_event_impl(
            &state,
            "incomingCall".to_string(),
            serde_json::json!({ "phoneNumber": "+44 20 7946 0018" }),
        )
        .expect("dispatch incoming");
        let snapshot = get_call_state_impl(&state).await.expect("state");
        assert_eq!(snapshot.phase, CallPhase::Dialing);
        assert_eq!(snapshot.number.as_deref(), Some("+442079460018"));

        unmount_impl(&state).await.expect("unmount");
    }

    #[test]
    fn refresh_outcomes_map_to_response_status() {
        assert_eq!(
            RefreshLeadsResponse::from(DirectoryRefresh::Loaded(3)),
            RefreshLeadsResponse {
                status: "loaded".to_string(),
                loaded: 3,
            }
        );
        assert_eq!(
            RefreshLeadsResponse::from(DirectoryRefresh::Failed).status,
            "failed"
        );
    }
}
