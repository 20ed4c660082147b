//! Backend REST client shared by the session supervisor and the daemon
//! (§6.4): `getOrCreateSession`, `getOrCreateMachine`, and the connect
//! endpoints used by external vendor integrations.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::model::{Machine, Session};

/// Failures from a backend REST call, mapped onto the taxonomy in §7.
#[derive(Debug, Error)]
pub enum RestError {
    /// The request could not reach the backend at all (DNS, connect, TLS).
    #[error("backend unreachable: {0}")]
    Offline(String),
    /// The backend rejected the bearer token (401/403).
    #[error("backend rejected credentials")]
    AuthFailure,
    /// 404 on an endpoint that is allowed to be absent (machine registration).
    #[error("endpoint not found")]
    EndpointMissing,
    /// Any other non-2xx response.
    #[error("backend returned {status}: {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated for logging.
        body: String,
    },
    /// The response body did not match the expected shape.
    #[error("malformed backend response: {0}")]
    Decode(String),
}

/// Result type for [`BackendClient`] calls.
pub type RestResult<T> = Result<T, RestError>;

/// Thin REST client over the Happy backend's session/machine endpoints.
///
/// Cheap to clone: wraps a pooled [`reqwest::Client`] and the immutable
/// base URL / bearer token for one credentialed process.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl BackendClient {
    /// Build a client talking to `base_url` (e.g. `HAPPY_SERVER_URL`),
    /// authenticating every request with `token`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    /// `POST /v1/sessions`: create-or-fetch the session identified by
    /// `tag` (the client-chosen idempotency key).
    ///
    /// # Errors
    ///
    /// See [`RestError`]. Any non-2xx other than a registration 404
    /// surfaces as [`RestError::Http`].
    pub async fn get_or_create_session(
        &self,
        tag: uuid::Uuid,
        metadata: &Value,
        agent_state: &Value,
        data_encryption_key: Option<&str>,
    ) -> RestResult<Session> {
        let body = serde_json::json!({
            "tag": tag,
            "metadata": metadata,
            "agentState": agent_state,
            "dataEncryptionKey": data_encryption_key,
        });
        let response = self.post("/v1/sessions", &body).await?;
        extract_field(response, "session").await
    }

    /// `POST /v1/machines`: create-or-fetch the machine identified by
    /// `id`. A 404 here is not an error the caller should surface
    /// directly — §9 requires the caller to offline-synthesize a local
    /// [`Machine`] instead, so this returns [`RestError::EndpointMissing`]
    /// rather than swallowing it.
    ///
    /// # Errors
    ///
    /// See [`RestError`].
    pub async fn get_or_create_machine(
        &self,
        id: uuid::Uuid,
        metadata: &Value,
        daemon_state: Option<&Value>,
        data_encryption_key: Option<&str>,
    ) -> RestResult<Machine> {
        let body = serde_json::json!({
            "id": id,
            "metadata": metadata,
            "daemonState": daemon_state,
            "dataEncryptionKey": data_encryption_key,
        });
        let response = self.post("/v1/machines", &body).await?;
        extract_field(response, "machine").await
    }

    /// `POST /v1/connect/{vendor}/register`: register an external vendor
    /// integration (e.g. Discord) against this machine.
    ///
    /// # Errors
    ///
    /// See [`RestError`].
    pub async fn connect_register(&self, vendor: &str, payload: &Value) -> RestResult<Value> {
        self.post(&format!("/v1/connect/{vendor}/register"), payload).await
    }

    /// `GET /v1/connect/{vendor}/token`: fetch a short-lived vendor token.
    ///
    /// # Errors
    ///
    /// See [`RestError`].
    pub async fn connect_token(&self, vendor: &str) -> RestResult<Value> {
        let url = format!("{}/v1/connect/{vendor}/token", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| RestError::Offline(e.to_string()))?;
        self.decode(response).await
    }

    async fn post(&self, path: &str, body: &Value) -> RestResult<Value> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| RestError::Offline(e.to_string()))?;
        self.decode(response).await
    }

    async fn decode(&self, response: reqwest::Response) -> RestResult<Value> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .map_err(|e| RestError::Decode(e.to_string()));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(RestError::AuthFailure);
        }
        if status.as_u16() == 404 {
            return Err(RestError::EndpointMissing);
        }
        let body = response.text().await.unwrap_or_default();
        Err(RestError::Http { status: status.as_u16(), body })
    }
}

async fn extract_field<T: DeserializeOwned>(mut response: Value, field: &str) -> RestResult<T> {
    let value = response
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| RestError::Decode(format!("response missing `{field}`")))?;
    serde_json::from_value(value).map_err(|e| RestError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_client_is_cheap_to_clone() {
        let client = BackendClient::new("https://example.invalid", "token");
        let _clone = client.clone();
    }
}
