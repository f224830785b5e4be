use std::collections::BTreeMap;

use crate::exception::InferenceResult;
use crate::model::vo::Recipe;

/// Builds the payload command of a job from its recipe.
pub trait CommandBuilderService: Send + Sync {
    /// `environment` is the full set of variables the workload must see,
    /// recipe values and lifecycle-provided ones merged.
    fn build_command(
        &self,
        recipe: &Recipe,
        environment: &BTreeMap<String, String>,
    ) -> InferenceResult<String>;
}
