use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

pub const DEFAULT_SECURE_TOKEN_ENDPOINT: &str = "https://securetoken.googleapis.com/v1/token";

#[derive(Debug, Clone)]
pub struct IdTokenRefreshRequest {
    pub token_endpoint: String,
    pub api_key: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureTokenResponse {
    pub id_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub user_id: Option<String>,
}

#[async_trait]
pub trait SecureTokenClient: Send + Sync {
    async fn refresh_id_token(
        &self,
        request: IdTokenRefreshRequest,
    ) -> Result<SecureTokenResponse, InfraError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestSecureTokenClient {
    client: Client,
}

#[derive(Debug, serde::Deserialize)]
struct SecureTokenPayload {
    id_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<String>,
    user_id: Option<String>,
    error: Option<SecureTokenErrorPayload>,
}

#[derive(Debug, serde::Deserialize)]
struct SecureTokenErrorPayload {
    message: Option<String>,
}

impl ReqwestSecureTokenClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

fn token_url(endpoint: &str, api_key: &str) -> Result<Url, InfraError> {
    if api_key.trim().is_empty() {
        return Err(InfraError::Auth("api key must not be empty".to_string()));
    }
    let mut url = Url::parse(endpoint)
        .map_err(|error| InfraError::Auth(format!("invalid token endpoint: {error}")))?;
    url.query_pairs_mut().append_pair("key", api_key.trim());
    Ok(url)
}

fn parse_token_response(
    status: reqwest::StatusCode,
    body: &str,
) -> Result<SecureTokenResponse, InfraError> {
    let parsed = serde_json::from_str::<SecureTokenPayload>(body).map_err(|error| {
        InfraError::Auth(format!("invalid token response payload: {error}; body={body}"))
    })?;

    if !status.is_success() || parsed.error.is_some() {
        let detail = parsed
            .error
            .and_then(|error| error.message)
            .unwrap_or_else(|| format!("http_{}", status.as_u16()));
        return Err(InfraError::Auth(format!("token endpoint error: {detail}")));
    }

    let id_token = parsed
        .id_token
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| InfraError::Auth("token response did not include id_token".to_string()))?;
    let expires_in = parsed
        .expires_in
        .as_deref()
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(0)
        .max(0);

    Ok(SecureTokenResponse {
        id_token,
        refresh_token: parsed.refresh_token,
        expires_in,
        user_id: parsed.user_id,
    })
}

#[async_trait]
impl SecureTokenClient for ReqwestSecureTokenClient {
    async fn refresh_id_token(
        &self,
        request: IdTokenRefreshRequest,
    ) -> Result<SecureTokenResponse, InfraError> {
        let url = token_url(&request.token_endpoint, &request.api_key)?;
        let response = self
            .client
            .post(url)
            .form(&[
                ("grant_type", "refresh_token".to_string()),
                ("refresh_token", request.refresh_token),
            ])
            .send()
            .await
            .map_err(|error| InfraError::Network(format!("token refresh: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Auth(format!("failed reading token response: {error}")))?;

        parse_token_response(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn token_url_appends_api_key() {
        let url = token_url(DEFAULT_SECURE_TOKEN_ENDPOINT, " api-key ").expect("build url");
        assert_eq!(
            url.as_str(),
            "https://securetoken.googleapis.com/v1/token?key=api-key"
        );
        assert!(matches!(
            token_url(DEFAULT_SECURE_TOKEN_ENDPOINT, ""),
            Err(InfraError::Auth(_))
        ));
    }

    #[test]
    fn parses_string_expiry() {
        let body = r#"{"id_token":"id-1","refresh_token":"refresh-1","expires_in":"3600","user_id":"u1"}"#;
        let response = parse_token_response(StatusCode::OK, body).expect("parse response");
        assert_eq!(response.id_token, "id-1");
        assert_eq!(response.expires_in, 3600);
        assert_eq!(response.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn error_payload_becomes_auth_error() {
        let body = r#"{"error":{"code":400,"message":"TOKEN_EXPIRED"}}"#;
        match parse_token_response(StatusCode::BAD_REQUEST, body) {
            Err(InfraError::Auth(message)) => assert!(message.contains("TOKEN_EXPIRED")),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[test]
    fn missing_id_token_is_rejected() {
        let body = r#"{"refresh_token":"refresh-1","expires_in":"3600"}"#;
        assert!(matches!(
            parse_token_response(StatusCode::OK, body),
            Err(InfraError::Auth(_))
        ));
    }
}
