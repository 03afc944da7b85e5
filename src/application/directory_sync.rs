use crate::application::auth::IdTokenProvider;
use crate::domain::lead_directory::LeadDirectory;
use crate::domain::models::{LeadDirectoryEntry, RetryPolicy};
use crate::infrastructure::activity_log::ActivityLog;
use crate::infrastructure::crm_graphql_client::{AssignedLead, CrmBackendClient};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::lead_cache::LeadDirectoryCache;
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};

const COMPONENT: &str = "directory_sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryRefresh {
    Loaded(usize),
    SignedOut,
    Failed,
}

/// Loads the signed-in user's assigned leads into the shared cache.
///
/// Failures never escape: the previous snapshot stays in place and the cause
/// goes to the activity log.
pub struct LeadDirectorySync {
    backend: Arc<dyn CrmBackendClient>,
    tokens: Arc<dyn IdTokenProvider>,
    cache: Arc<LeadDirectoryCache>,
    retry_policy: RetryPolicy,
    log: Arc<ActivityLog>,
}

impl LeadDirectorySync {
    pub fn new(
        backend: Arc<dyn CrmBackendClient>,
        tokens: Arc<dyn IdTokenProvider>,
        cache: Arc<LeadDirectoryCache>,
        log: Arc<ActivityLog>,
    ) -> Self {
        Self {
            backend,
            tokens,
            cache,
            retry_policy: RetryPolicy::default(),
            log,
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn cache(&self) -> &Arc<LeadDirectoryCache> {
        &self.cache
    }

    pub async fn refresh(&self) -> DirectoryRefresh {
        match self.load().await {
            Ok(Some(directory)) => {
                let size = directory.len();
                self.cache.replace(directory);
                self.log
                    .info(COMPONENT, &format!("loaded {size} assigned leads"));
                DirectoryRefresh::Loaded(size)
            }
            Ok(None) => {
                self.log
                    .warn(COMPONENT, "not signed in; keeping current lead directory");
                DirectoryRefresh::SignedOut
            }
            Err(error) => {
                self.log.error(
                    COMPONENT,
                    &format!("lead directory load failed; keeping current snapshot: {error}"),
                );
                DirectoryRefresh::Failed
            }
        }
    }

    async fn load(&self) -> Result<Option<LeadDirectory>, InfraError> {
        let Some(id_token) = self.tokens.id_token().await? else {
            return Ok(None);
        };
        let leads = self.list_leads_with_retry(&id_token).await?;
        Ok(Some(LeadDirectory::new(
            leads.into_iter().map(LeadDirectoryEntry::from).collect(),
        )))
    }

    async fn list_leads_with_retry(&self, id_token: &str) -> Result<Vec<AssignedLead>, InfraError> {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match self.backend.my_assigned_leads(id_token).await {
                Ok(leads) => return Ok(leads),
                Err(error) if should_retry(&error) && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    self.log.warn(
                        COMPONENT,
                        &format!("retrying lead load in {delay}ms after: {error}"),
                    );
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }
}

fn should_retry(error: &InfraError) -> bool {
    match error {
        InfraError::Network(_) => true,
        InfraError::GraphQl(message) => {
            let message = message.to_ascii_lowercase();
            message.contains("http 502")
                || message.contains("http 503")
                || message.contains("http 504")
                || message.contains("temporarily unavailable")
        }
        _ => false,
    }
}
