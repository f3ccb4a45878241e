//! HTTP-backed executor client.
//!
//! Posts the command and session context as JSON to an external executor
//! service and decodes its structured result. Wall-clock bounding is the
//! pipeline's job; this client only sets a connect timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::instrument;

use relay_core::executor::{
    CommandExecutor, ExecutionContext, ExecutorError, ExecutorResult,
};
use relay_core::ids::SessionId;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    session_id: &'a str,
    command: &'a str,
    context: &'a ExecutionContext,
}

pub struct HttpExecutor {
    client: Client,
    endpoint: String,
}

impl HttpExecutor {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CommandExecutor for HttpExecutor {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, command, context), fields(session_id = %session_id, endpoint = %self.endpoint))]
    async fn execute(
        &self,
        session_id: &SessionId,
        command: &str,
        context: ExecutionContext,
    ) -> Result<ExecutorResult, ExecutorError> {
        let body = ExecuteRequest {
            session_id: session_id.as_str(),
            command,
            context: &context,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header("accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutorError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body = resp.text().await.unwrap_or_default();
            return Err(ExecutorError::from_status(status, body));
        }

        let raw = resp
            .text()
            .await
            .map_err(|e| ExecutorError::Network(e.to_string()))?;

        serde_json::from_str(&raw)
            .map_err(|e| ExecutorError::Malformed(format!("undecodable result: {e}")))
    }
}
