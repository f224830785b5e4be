use std::path::PathBuf;

use async_trait::async_trait;

use crate::{
    exception::{InferenceException, InferenceResult},
    model::vo::{Recipe, RecipeKind, RecipePatch},
};

#[async_trait]
pub trait RecipeRepo: Send + Sync {
    async fn load(&self, kind: RecipeKind, name: &str) -> InferenceResult<Recipe>;

    /// Sorted recipe names of one kind.
    async fn list(&self, kind: RecipeKind) -> InferenceResult<Vec<String>>;

    async fn save(&self, recipe: &Recipe) -> InferenceResult<PathBuf>;

    /// Drop the cache and load every recipe again, returning how many loaded.
    async fn reload(&self) -> InferenceResult<usize>;

    fn clear_cache(&self);

    fn apply_overrides(&self, recipe: &Recipe, patch: &RecipePatch) -> InferenceResult<Recipe> {
        patch.apply(recipe).map_err(|errors| InferenceException::RecipeValidation {
            name: recipe.name().to_owned(),
            errors: errors.into_inner(),
        })
    }
}
