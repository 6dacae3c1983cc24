//! # AgentInvoker
//!
//! Thin adapter over the transport to the worker agents. Agents are invoked
//! with `{"job_id": ...}` and answer with a `{statusCode, body}` envelope;
//! their authoritative output goes into their payload slot on the job row,
//! not through this response. The orchestrator only needs success/failure
//! plus a diagnostic.

use std::collections::HashMap;
use std::time::Duration;

use folio_core::AgentName;
use reqwest::header;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Enumeration of failure modes for one agent invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvocationError {
    #[error("invocation deadline exceeded")]
    Timeout,
    // The agent ran and reported failure; the message is the agent's own.
    #[error("{0}")]
    WorkerFailed(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// The response envelope agents return. `statusCode == 200` means success;
/// `body` is diagnostic only.
#[derive(Debug, Deserialize)]
pub struct AgentResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: String,
}

pub struct AgentInvoker {
    client: reqwest::Client,
    endpoints: HashMap<AgentName, String>,
}

impl AgentInvoker {
    pub fn new(
        endpoints: HashMap<AgentName, String>,
        request_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("Folio Orchestrator")
            .timeout(request_timeout)
            .build()?;

        Ok(Self { client, endpoints })
    }

    /// Invoke a named agent for a job, returning its opaque output on
    /// success. Success is decided by the envelope's statusCode alone; the
    /// HTTP layer only matters when no envelope comes back at all.
    pub async fn invoke(&self, agent: AgentName, job_id: Uuid) -> Result<Value, InvocationError> {
        let endpoint = self.endpoints.get(&agent).ok_or_else(|| {
            InvocationError::Transport(format!("no endpoint configured for agent {}", agent))
        })?;

        let response = self
            .client
            .post(endpoint)
            .json(&serde_json::json!({ "job_id": job_id }))
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let envelope: AgentResponse = response.json().await.map_err(classify_reqwest_error)?;

        if envelope.status_code == 200 {
            Ok(Value::String(envelope.body))
        } else {
            Err(InvocationError::WorkerFailed(envelope.body))
        }
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> InvocationError {
    if error.is_timeout() {
        InvocationError::Timeout
    } else {
        InvocationError::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method, MockServer};
    use serde_json::json;

    fn invoker_for(server: &MockServer) -> AgentInvoker {
        let endpoints = HashMap::from([(AgentName::Analyzer, server.url("/analyzer"))]);
        AgentInvoker::new(endpoints, Duration::from_secs(5)).expect("failed to build invoker")
    }

    #[tokio::test]
    async fn test_invoke_success_returns_body() {
        let server = MockServer::start();
        let job_id = Uuid::now_v7();
        let mock = server.mock(|when, then| {
            when.method(Method::POST)
                .path("/analyzer")
                .json_body(json!({ "job_id": job_id.to_string() }));
            then.status(200)
                .json_body(json!({ "statusCode": 200, "body": "analysis stored" }));
        });

        let invoker = invoker_for(&server);
        let output = invoker
            .invoke(AgentName::Analyzer, job_id)
            .await
            .expect("invocation should succeed");

        assert_eq!(output, json!("analysis stored"));
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn test_invoke_failure_surfaces_agent_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::POST).path("/analyzer");
            then.status(200)
                .json_body(json!({ "statusCode": 500, "body": "schema mismatch" }));
        });

        let invoker = invoker_for(&server);
        let error = invoker
            .invoke(AgentName::Analyzer, Uuid::now_v7())
            .await
            .expect_err("invocation should fail");

        assert_eq!(
            error,
            InvocationError::WorkerFailed("schema mismatch".to_string())
        );
        assert_eq!(error.to_string(), "schema mismatch");
    }

    #[tokio::test]
    async fn test_invoke_unparseable_envelope_is_transport_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(Method::POST).path("/analyzer");
            then.status(502).body("<html>bad gateway</html>");
        });

        let invoker = invoker_for(&server);
        let error = invoker
            .invoke(AgentName::Analyzer, Uuid::now_v7())
            .await
            .expect_err("invocation should fail");

        assert!(matches!(error, InvocationError::Transport(_)));
    }

    #[tokio::test]
    async fn test_invoke_unconfigured_agent_is_transport_error() {
        let server = MockServer::start();
        let invoker = invoker_for(&server);

        let error = invoker
            .invoke(AgentName::Projector, Uuid::now_v7())
            .await
            .expect_err("invocation should fail");

        assert!(matches!(error, InvocationError::Transport(_)));
    }
}
