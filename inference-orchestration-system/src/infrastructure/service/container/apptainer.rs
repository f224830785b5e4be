use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use domain_inference::{
    exception::{InferenceException, InferenceResult},
    model::vo::{ContainerSpec, Recipe, RecipeKind},
    service::CommandBuilderService,
};
use typed_builder::TypedBuilder;

use crate::infrastructure::service::shell::{double_quoted, single_quoted};

const DEFAULT_BINDS: [&str; 2] = ["/tmp:/tmp", "/dev/shm:/dev/shm"];
const TARGET_ENDPOINT: &str = "TARGET_ENDPOINT";

/// Wraps recipe commands in `apptainer`/`singularity` invocations.
#[derive(TypedBuilder)]
pub struct ApptainerCommandBuilder {
    /// Mounted into every container next to the recipe's own binds.
    #[builder(default)]
    binds: Vec<String>,
    #[builder(default)]
    validate_image: bool,
    /// Given to client runs that were started without a resolvable target.
    #[builder(setter(into))]
    default_target_endpoint: String,
}

impl CommandBuilderService for ApptainerCommandBuilder {
    fn build_command(
        &self,
        recipe: &Recipe,
        environment: &BTreeMap<String, String>,
    ) -> InferenceResult<String> {
        let mut environment = environment.clone();
        let default_target = recipe.kind() == RecipeKind::Client
            && !environment.contains_key(TARGET_ENDPOINT);
        if default_target {
            tracing::warn!(
                "Client run of {} has no target, using {}",
                recipe.name(),
                self.default_target_endpoint
            );
            environment.insert(
                TARGET_ENDPOINT.to_owned(),
                self.default_target_endpoint.clone(),
            );
        }

        let Some(container) = recipe.container() else {
            let command = recipe.command().ok_or_else(|| InferenceException::Configuration {
                setting: "command".to_owned(),
                reason: format!("recipe {} has neither a container nor a command", recipe.name()),
            })?;
            return Ok(if default_target {
                format!(
                    "export {TARGET_ENDPOINT}={} && {command}",
                    double_quoted(&self.default_target_endpoint)
                )
            } else {
                command.to_owned()
            });
        };

        if self.validate_image {
            Self::check_image(container)?;
        }
        let mut parts = vec![container.runtime.binary().to_owned()];
        let command = recipe.command();
        parts.push(if command.is_some() { "exec" } else { "run" }.to_owned());
        for bind in self.binds(container) {
            parts.push(format!("--bind {bind}"));
        }
        if recipe.resources().gpus() > 0 {
            parts.push("--nv".to_owned());
        }
        for (key, value) in &environment {
            parts.push(format!("--env {key}={}", double_quoted(value)));
        }
        parts.push("--cleanenv".to_owned());
        parts.push(container.image.clone());
        if let Some(command) = command {
            parts.push(format!("bash -c {}", single_quoted(command)));
        }
        Ok(parts.join(" \\\n    "))
    }
}

impl ApptainerCommandBuilder {
    fn binds<'a>(&'a self, container: &'a ContainerSpec) -> BTreeSet<&'a str> {
        DEFAULT_BINDS
            .into_iter()
            .chain(container.binds.iter().map(String::as_str))
            .chain(self.binds.iter().map(String::as_str))
            .map(str::trim)
            .filter(|bind| !bind.is_empty())
            .collect()
    }

    fn check_image(container: &ContainerSpec) -> InferenceResult<()> {
        if Path::new(&container.image).is_file() {
            return Ok(());
        }
        Err(InferenceException::Container {
            operation: "validate".to_owned(),
            image: container.image.clone(),
            reason: "image file does not exist".to_owned(),
        })
    }
}
