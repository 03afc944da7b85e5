use crate::domain::models::{LeadDirectoryEntry, MissedCallRecord};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

const MY_ASSIGNED_LEADS_QUERY: &str = "query MyAssignedLeads { myAssignedLeads { id name phone } }";
const CREATE_CALL_LOG_MUTATION: &str = "mutation CreateCallLog($input: CreateCallLogInput!) { createCallLog(input: $input) { id } }";
const MISSED_STATUS: &str = "MISSED";

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct AssignedLead {
    pub id: String,
    pub name: Option<String>,
    pub phone: Option<String>,
}

impl From<AssignedLead> for LeadDirectoryEntry {
    fn from(lead: AssignedLead) -> Self {
        LeadDirectoryEntry::new(lead.id, lead.name, lead.phone)
    }
}

#[async_trait]
pub trait CrmBackendClient: Send + Sync {
    async fn my_assigned_leads(&self, id_token: &str) -> Result<Vec<AssignedLead>, InfraError>;

    async fn record_missed_call(
        &self,
        id_token: &str,
        record: &MissedCallRecord,
    ) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestCrmGraphQlClient {
    client: Client,
    endpoint: Option<Url>,
}

impl ReqwestCrmGraphQlClient {
    pub fn new(endpoint: Option<&str>) -> Result<Self, InfraError> {
        let endpoint = endpoint
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| {
                Url::parse(value).map_err(|error| {
                    InfraError::InvalidConfig(format!("invalid graphql endpoint '{value}': {error}"))
                })
            })
            .transpose()?;
        Ok(Self {
            client: Client::new(),
            endpoint,
        })
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Auth(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn endpoint(&self) -> Result<&Url, InfraError> {
        self.endpoint.as_ref().ok_or_else(|| {
            InfraError::InvalidConfig("graphql endpoint is not configured".to_string())
        })
    }

    fn http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return InfraError::Auth(format!("graphql request rejected: http {}", status.as_u16()));
        }
        let message = if body.trim().is_empty() {
            format!("graphql api error: http {}", status.as_u16())
        } else {
            format!("graphql api error: http {}; body={body}", status.as_u16())
        };
        InfraError::GraphQl(message)
    }

    async fn execute<T>(
        &self,
        id_token: &str,
        operation: &str,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, InfraError>
    where
        T: DeserializeOwned,
    {
        Self::ensure_non_empty(id_token, "id token")?;
        let endpoint = self.endpoint()?;

        let response = self
            .client
            .post(endpoint.clone())
            .bearer_auth(id_token)
            .json(&serde_json::json!({
                "operationName": operation,
                "query": query,
                "variables": variables,
            }))
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("{operation}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::GraphQl(format!("failed reading {operation} response: {error}")))?;

        if !status.is_success() {
            return Err(Self::http_error(status, &body));
        }

        decode_graphql_payload(operation, &body)
    }
}

#[derive(Debug, serde::Deserialize)]
struct GraphQlEnvelope<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQlErrorItem>>,
}

#[derive(Debug, serde::Deserialize)]
struct GraphQlErrorItem {
    message: String,
}

#[derive(Debug, serde::Deserialize)]
struct MyAssignedLeadsData {
    #[serde(rename = "myAssignedLeads")]
    my_assigned_leads: Option<Vec<AssignedLead>>,
}

#[derive(Debug, serde::Deserialize)]
struct CreateCallLogData {
    #[serde(rename = "createCallLog")]
    create_call_log: Option<serde_json::Value>,
}

fn decode_graphql_payload<T>(operation: &str, body: &str) -> Result<T, InfraError>
where
    T: DeserializeOwned,
{
    let envelope: GraphQlEnvelope<T> = serde_json::from_str(body).map_err(|error| {
        InfraError::GraphQl(format!("invalid {operation} payload: {error}; body={body}"))
    })?;

    if let Some(errors) = envelope.errors.filter(|errors| !errors.is_empty()) {
        let messages = errors
            .into_iter()
            .map(|error| error.message)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(InfraError::GraphQl(format!("{operation} failed: {messages}")));
    }

    envelope
        .data
        .ok_or_else(|| InfraError::GraphQl(format!("{operation} response did not include data")))
}

fn call_log_variables(record: &MissedCallRecord) -> Result<serde_json::Value, InfraError> {
    Ok(serde_json::json!({
        "input": {
            "leadId": record.lead_id,
            "phoneNumber": record.phone_number,
            "direction": serde_json::to_value(record.direction)?,
            "status": MISSED_STATUS,
            "failReason": serde_json::to_value(record.fail_reason)?,
            "occurredAt": record.occurred_at.to_rfc3339(),
        }
    }))
}

#[async_trait]
impl CrmBackendClient for ReqwestCrmGraphQlClient {
    async fn my_assigned_leads(&self, id_token: &str) -> Result<Vec<AssignedLead>, InfraError> {
        let data: MyAssignedLeadsData = self
            .execute(
                id_token,
                "MyAssignedLeads",
                MY_ASSIGNED_LEADS_QUERY,
                serde_json::json!({}),
            )
            .await?;

        Ok(data
            .my_assigned_leads
            .unwrap_or_default()
            .into_iter()
            .filter_map(|lead| {
                let id = lead.id.trim();
                if id.is_empty() {
                    return None;
                }
                Some(AssignedLead {
                    id: id.to_string(),
                    name: lead.name.map(|value| value.trim().to_string()).filter(|value| !value.is_empty()),
                    phone: lead.phone.map(|value| value.trim().to_string()).filter(|value| !value.is_empty()),
                })
            })
            .collect())
    }

    async fn record_missed_call(
        &self,
        id_token: &str,
        record: &MissedCallRecord,
    ) -> Result<(), InfraError> {
        record.validate().map_err(InfraError::InvalidInput)?;
        let variables = call_log_variables(record)?;
        let data: CreateCallLogData = self
            .execute(id_token, "CreateCallLog", CREATE_CALL_LOG_MUTATION, variables)
            .await?;
        if data.create_call_log.is_none() {
            return Err(InfraError::GraphQl(
                "CreateCallLog response did not include a call log".to_string(),
            ));
        }
        Ok(())
    }
}
