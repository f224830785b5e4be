use domain_inference::{
    exception::{InferenceException, InferenceResult},
    model::vo::TargetSpec,
    repository::InstanceRepo,
};

/// Endpoint a client run will send its load to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub endpoint: String,
    /// Set when the endpoint belongs to a registered server instance.
    pub service_id: Option<String>,
}

impl ResolvedTarget {
    fn url(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            service_id: None,
        }
    }
}

fn is_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Resolve where a client run points, first match wins:
///
/// 1. `explicit` when it is an http(s) URL;
/// 2. `explicit` as a server instance id;
/// 3. `target.service` as a server instance id;
/// 4. `target.url`;
/// 5. the `ENDPOINT=` line of `target.endpoint_file`.
///
/// `None` leaves the choice to the command builder.
pub async fn resolve_target(
    services: &dyn InstanceRepo,
    target: &TargetSpec,
    explicit: Option<&str>,
) -> InferenceResult<Option<ResolvedTarget>> {
    if let Some(explicit) = explicit.map(str::trim).filter(|e| !e.is_empty()) {
        if is_url(explicit) {
            return Ok(Some(ResolvedTarget::url(explicit)));
        }
        return service_endpoint(services, explicit, &target.endpoint_name)
            .await
            .map(Some);
    }
    if let Some(service) = &target.service {
        return service_endpoint(services, service, &target.endpoint_name)
            .await
            .map(Some);
    }
    if let Some(url) = &target.url {
        return Ok(Some(ResolvedTarget::url(url)));
    }
    if let Some(file) = &target.endpoint_file {
        return read_endpoint_file(file).await.map(Some);
    }
    Ok(None)
}

async fn service_endpoint(
    services: &dyn InstanceRepo,
    id: &str,
    endpoint_name: &str,
) -> InferenceResult<ResolvedTarget> {
    let service = services.get(id).await?;
    match service.endpoint(endpoint_name) {
        Some(endpoint) => Ok(ResolvedTarget {
            endpoint: endpoint.to_owned(),
            service_id: Some(service.id.clone()),
        }),
        None => Err(InferenceException::Configuration {
            setting: "target".to_owned(),
            reason: format!(
                "service {id} has no endpoint `{endpoint_name}` (status {})",
                service.status
            ),
        }),
    }
}

async fn read_endpoint_file(path: &str) -> InferenceResult<ResolvedTarget> {
    let setting_error = |reason: String| InferenceException::Configuration {
        setting: "target.endpoint_file".to_owned(),
        reason,
    };
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| setting_error(format!("cannot read {path}: {e}")))?;
    content
        .lines()
        .filter_map(|line| line.trim().strip_prefix("ENDPOINT="))
        .map(str::trim)
        .find(|endpoint| !endpoint.is_empty())
        .map(ResolvedTarget::url)
        .ok_or_else(|| setting_error(format!("{path} has no ENDPOINT line")))
}
