// sage-core/src/infrastructure/adapters/http.rs

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::domain::schema::PreValidation;
use crate::error::SageError;
use crate::infrastructure::error::InfrastructureError;
use crate::ports::hook::{HookResponse, PreValidationHook};

/// reqwest-backed pre-validation hook. The configured payload is sent
/// verbatim as the JSON body; run context (submission id, staging
/// table) travels in headers so the payload stays untouched.
pub struct HttpHook {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpHook {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

impl Default for HttpHook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PreValidationHook for HttpHook {
    async fn call(
        &self,
        config: &PreValidation,
        staging_table: &str,
        submission_id: &str,
    ) -> Result<HookResponse, SageError> {
        let method = reqwest::Method::from_bytes(config.method.as_bytes()).map_err(|_| {
            SageError::Infrastructure(InfrastructureError::ConfigError(format!(
                "invalid pre_validation method '{}'",
                config.method
            )))
        })?;

        debug!(endpoint = %config.endpoint, %submission_id, "calling pre_validation hook");

        let mut request = self
            .client
            .request(method, &config.endpoint)
            .header("X-Sage-Submission", submission_id)
            .header("X-Sage-Staging-Table", staging_table)
            .timeout(self.timeout);

        if let Some(payload) = &config.payload {
            request = request.json(payload);
        }

        let response = request.send().await.map_err(InfrastructureError::Http)?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(InfrastructureError::Http)?;

        Ok(HookResponse { status, body })
    }
}
