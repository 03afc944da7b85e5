use crate::domain::models::AuthSession;
use crate::infrastructure::auth_client::{
    IdTokenRefreshRequest, SecureTokenClient, SecureTokenResponse, DEFAULT_SECURE_TOKEN_ENDPOINT,
};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;

const EXPIRY_LEEWAY_SECONDS: i64 = 60;

#[derive(Debug, Clone)]
pub struct FirebaseAuthConfig {
    pub api_key: String,
    pub token_endpoint: String,
}

impl FirebaseAuthConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            token_endpoint: DEFAULT_SECURE_TOKEN_ENDPOINT.to_string(),
        }
    }
}

/// Credentials handed over by the host after an interactive sign-in.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    pub id_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureTokenResult {
    Existing(AuthSession),
    Refreshed(AuthSession),
    ReauthenticationRequired,
}

/// Source of the bearer token used for backend calls. `None` means signed out.
#[async_trait]
pub trait IdTokenProvider: Send + Sync {
    async fn id_token(&self) -> Result<Option<String>, InfraError>;
}

pub struct AuthManager<S, C>
where
    S: CredentialStore + ?Sized,
    C: SecureTokenClient + ?Sized,
{
    config: FirebaseAuthConfig,
    credential_store: Arc<S>,
    token_client: Arc<C>,
}

impl<S, C> AuthManager<S, C>
where
    S: CredentialStore + ?Sized,
    C: SecureTokenClient + ?Sized,
{
    pub fn new(config: FirebaseAuthConfig, credential_store: Arc<S>, token_client: Arc<C>) -> Self {
        Self {
            config,
            credential_store,
            token_client,
        }
    }

    pub fn is_session_valid(&self, session: &AuthSession) -> bool {
        session.is_valid_at(Utc::now(), EXPIRY_LEEWAY_SECONDS)
    }

    pub fn store_sign_in(&self, request: SignInRequest) -> Result<AuthSession, InfraError> {
        if request.id_token.trim().is_empty() {
            return Err(InfraError::InvalidInput("id token must not be empty".to_string()));
        }
        let session = AuthSession {
            id_token: request.id_token.trim().to_string(),
            refresh_token: request
                .refresh_token
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            expires_at: Utc::now() + Duration::seconds(request.expires_in.max(0)),
            user_id: request.user_id,
        };
        self.credential_store.save_session(&session)?;
        Ok(session)
    }

    pub async fn ensure_id_token(&self) -> Result<EnsureTokenResult, InfraError> {
        let Some(stored) = self.credential_store.load_session()? else {
            return Ok(EnsureTokenResult::ReauthenticationRequired);
        };

        if self.is_session_valid(&stored) {
            return Ok(EnsureTokenResult::Existing(stored));
        }

        let Some(refresh_token) = stored.refresh_token.clone() else {
            return Ok(EnsureTokenResult::ReauthenticationRequired);
        };

        let refreshed = self
            .token_client
            .refresh_id_token(IdTokenRefreshRequest {
                token_endpoint: self.config.token_endpoint.clone(),
                api_key: self.config.api_key.clone(),
                refresh_token,
            })
            .await;

        match refreshed {
            Ok(response) => {
                let session = self.session_from_response(response, &stored);
                self.credential_store.save_session(&session)?;
                Ok(EnsureTokenResult::Refreshed(session))
            }
            Err(InfraError::Auth(_)) => Ok(EnsureTokenResult::ReauthenticationRequired),
            Err(error) => Err(error),
        }
    }

    pub fn sign_out(&self) -> Result<(), InfraError> {
        self.credential_store.delete_session()
    }

    fn session_from_response(&self, response: SecureTokenResponse, previous: &AuthSession) -> AuthSession {
        AuthSession {
            id_token: response.id_token,
            refresh_token: response.refresh_token.or_else(|| previous.refresh_token.clone()),
            expires_at: Utc::now() + Duration::seconds(response.expires_in.max(0)),
            user_id: response.user_id.or_else(|| previous.user_id.clone()),
        }
    }
}

#[async_trait]
impl<S, C> IdTokenProvider for AuthManager<S, C>
where
    S: CredentialStore + ?Sized,
    C: SecureTokenClient + ?Sized,
{
    async fn id_token(&self) -> Result<Option<String>, InfraError> {
        match self.ensure_id_token().await? {
            EnsureTokenResult::Existing(session) | EnsureTokenResult::Refreshed(session) => {
                Ok(Some(session.id_token))
            }
            EnsureTokenResult::ReauthenticationRequired => Ok(None),
        }
    }
}
