use std::{collections::BTreeMap, path::Path};

use domain_inference::model::{
    entity::Instance,
    vo::{InstanceStatus, NetworkSpec, Recipe, ServerRecipe},
};
use serde_json::{json, Value};

pub(crate) const API_ENDPOINT: &str = "api";

/// `api` points at the first declared port (8000 when none is declared),
/// every declared port is also reachable under its own name.
pub(crate) fn endpoint_map(recipe: &Recipe, node: &str) -> BTreeMap<String, String> {
    let mut endpoints = BTreeMap::new();
    let Some(network) = recipe.network() else {
        return endpoints;
    };
    let (scheme, port) = network
        .primary_port()
        .map(|p| (p.scheme(), p.port))
        .unwrap_or(("http", NetworkSpec::DEFAULT_PORT));
    endpoints.insert(API_ENDPOINT.to_owned(), format!("{scheme}://{node}:{port}"));
    for port in &network.ports {
        endpoints
            .entry(port.name.clone())
            .or_insert_with(|| format!("{}://{node}:{}", port.scheme(), port.port));
    }
    endpoints
}

/// Setup lines making a server job publish where it listens.
pub(crate) fn endpoint_file_setup(id: &str, recipe: &ServerRecipe, endpoint_dir: &Path) -> Vec<String> {
    let (scheme, port) = recipe
        .network
        .primary_port()
        .map(|p| (p.scheme(), p.port))
        .unwrap_or(("http", NetworkSpec::DEFAULT_PORT));
    let dir = endpoint_dir.display();
    let file = endpoint_dir.join(format!("{id}_endpoint.txt"));
    let file = file.display();
    vec![
        format!("mkdir -p \"{dir}\""),
        format!("echo \"SERVICE_ID={id}\" > \"{file}\""),
        format!("echo \"SERVICE_NAME={}\" >> \"{file}\"", recipe.metadata.name),
        format!("echo \"NODE=$SLURM_NODELIST\" >> \"{file}\""),
        format!("echo \"PORT={port}\" >> \"{file}\""),
        format!("echo \"ENDPOINT={scheme}://$SLURM_NODELIST:{port}\" >> \"{file}\""),
    ]
}

/// A running server with metrics on, as a `host:port` scrape address.
pub(crate) fn scrape_address(service: &Instance) -> Option<String> {
    let Recipe::Server(recipe) = &service.recipe else {
        return None;
    };
    if service.status != InstanceStatus::Running || !recipe.metrics.enabled {
        return None;
    }
    let node = service.node.as_deref()?;
    Some(format!("{node}:{}", recipe.metrics.port))
}

/// Prometheus file-based service discovery entries.
pub(crate) fn scrape_config(services: &[(String, &Instance)]) -> Value {
    Value::Array(
        services
            .iter()
            .map(|(address, service)| {
                json!({
                    "targets": [address],
                    "labels": {
                        "service_id": service.id,
                        "service_name": service.recipe_name,
                        "job": format!("inferbench_{}", service.recipe_name),
                    },
                })
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use domain_inference::model::vo::{
        ContainerSpec, PortSpec, RecipeMetadata, ServerRecipeDocument,
    };

    use super::*;

    fn server(ports: Vec<PortSpec>) -> ServerRecipe {
        ServerRecipe::from_document(ServerRecipeDocument {
            metadata: RecipeMetadata::named("test-server"),
            container: Some(ContainerSpec {
                image: "/images/vllm.sif".to_owned(),
                ..Default::default()
            }),
            network: NetworkSpec { ports },
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn api_defaults_to_port_8000() {
        let endpoints = endpoint_map(&Recipe::Server(server(vec![])), "mel2091");
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints["api"], "http://mel2091:8000");
    }

    #[test]
    fn every_named_port_gets_an_endpoint() {
        let mut grpc = PortSpec::new("grpc", 50051);
        grpc.protocol = "grpc".to_owned();
        let mut tls = PortSpec::new("secure", 8443);
        tls.protocol = "https".to_owned();
        let recipe = Recipe::Server(server(vec![PortSpec::new("http", 8080), grpc, tls]));
        let endpoints = endpoint_map(&recipe, "mel2091");
        assert_eq!(endpoints["api"], "http://mel2091:8080");
        assert_eq!(endpoints["http"], "http://mel2091:8080");
        assert_eq!(endpoints["grpc"], "http://mel2091:50051");
        assert_eq!(endpoints["secure"], "https://mel2091:8443");
    }

    #[test]
    fn endpoint_file_lines() {
        let lines = endpoint_file_setup("abcd1234", &server(vec![]), Path::new("/scratch/endpoints"));
        assert_eq!(lines[0], "mkdir -p \"/scratch/endpoints\"");
        assert!(lines
            .last()
            .unwrap()
            .contains("ENDPOINT=http://$SLURM_NODELIST:8000\" >> \"/scratch/endpoints/abcd1234_endpoint.txt\""));
    }

    #[test]
    fn only_running_services_with_metrics_are_scraped() {
        let mut service = Instance::new(Recipe::Server(server(vec![])));
        assert_eq!(scrape_address(&service), None);
        service.status = InstanceStatus::Running;
        service.node = Some("mel2091".to_owned());
        assert_eq!(scrape_address(&service).as_deref(), Some("mel2091:8000"));

        let config = scrape_config(&[("mel2091:8000".to_owned(), &service)]);
        assert_eq!(config[0]["labels"]["job"], "inferbench_test-server");
        assert_eq!(config[0]["targets"][0], "mel2091:8000");
    }
}
