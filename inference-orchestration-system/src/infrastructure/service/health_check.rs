use std::time::Duration;

use anyhow::Context;
use domain_inference::{exception::InferenceResult, service::HealthCheckService};

/// Probes service health endpoints over HTTP.
#[derive(Default)]
pub struct HttpHealthChecker {
    client: reqwest::Client,
}

impl HttpHealthChecker {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl HealthCheckService for HttpHealthChecker {
    async fn probe(&self, url: &str, timeout: Duration) -> InferenceResult<u16> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("Health probe of {url} failed"))?;
        Ok(response.status().as_u16())
    }
}
