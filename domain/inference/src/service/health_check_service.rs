use std::time::Duration;

use crate::exception::InferenceResult;

#[async_trait::async_trait]
pub trait HealthCheckService: Send + Sync {
    /// GET `url`, returning the HTTP status code. Connection failures and
    /// timeouts are errors.
    async fn probe(&self, url: &str, timeout: Duration) -> InferenceResult<u16>;
}
