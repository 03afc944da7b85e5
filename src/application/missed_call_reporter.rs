use crate::application::auth::IdTokenProvider;
use crate::domain::models::MissedCallRecord;
use crate::infrastructure::activity_log::ActivityLog;
use crate::infrastructure::crm_graphql_client::CrmBackendClient;
use crate::infrastructure::error::InfraError;
use std::sync::Arc;

const COMPONENT: &str = "missed_call_reporter";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportResult {
    Recorded,
    SignedOut,
    Failed,
}

#[derive(Clone)]
pub struct MissedCallReporter {
    backend: Arc<dyn CrmBackendClient>,
    tokens: Arc<dyn IdTokenProvider>,
    log: Arc<ActivityLog>,
}

impl MissedCallReporter {
    pub fn new(
        backend: Arc<dyn CrmBackendClient>,
        tokens: Arc<dyn IdTokenProvider>,
        log: Arc<ActivityLog>,
    ) -> Self {
        Self {
            backend,
            tokens,
            log,
        }
    }

    /// Writes the record to the backend. Failures are logged, never returned.
    pub async fn report(&self, record: MissedCallRecord) -> ReportResult {
        match self.try_report(&record).await {
            Ok(true) => {
                self.log.info(
                    COMPONENT,
                    &format!(
                        "recorded missed call lead={} reason={:?}",
                        record.lead_id, record.fail_reason
                    ),
                );
                ReportResult::Recorded
            }
            Ok(false) => {
                self.log.warn(
                    COMPONENT,
                    &format!("not signed in; dropped missed call for lead={}", record.lead_id),
                );
                ReportResult::SignedOut
            }
            Err(error) => {
                self.log.error(
                    COMPONENT,
                    &format!("missed call report failed for lead={}: {error}", record.lead_id),
                );
                ReportResult::Failed
            }
        }
    }

    async fn try_report(&self, record: &MissedCallRecord) -> Result<bool, InfraError> {
        record.validate().map_err(InfraError::InvalidInput)?;
        let Some(id_token) = self.tokens.id_token().await? else {
            return Ok(false);
        };
        self.backend.record_missed_call(&id_token, record).await?;
        Ok(true)
    }
}
