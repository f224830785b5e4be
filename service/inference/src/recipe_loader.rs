use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use domain_inference::{
    exception::{InferenceException, InferenceResult},
    model::vo::{
        ClientRecipe, ClientRecipeDocument, FieldErrors, MonitorRecipe, MonitorRecipeDocument,
        Recipe, RecipeKind, ServerRecipe, ServerRecipeDocument,
    },
    repository::RecipeRepo,
};
use serde::de::DeserializeOwned;
use serde_yaml::Value;

const EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// Recipes stored as `<recipes_dir>/{servers,clients,monitors}/<name>.yaml`,
/// parsed and validated once, then served from a cache.
pub struct RecipeLoader {
    recipes_dir: PathBuf,
    cache: DashMap<(RecipeKind, String), Recipe>,
}

impl RecipeLoader {
    pub fn new(recipes_dir: impl Into<PathBuf>) -> Self {
        Self {
            recipes_dir: recipes_dir.into(),
            cache: DashMap::new(),
        }
    }

    fn kind_dir(&self, kind: RecipeKind) -> PathBuf {
        self.recipes_dir.join(kind.dir_name())
    }

    async fn find(&self, kind: RecipeKind, name: &str) -> Option<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return None;
        }
        for ext in EXTENSIONS {
            let path = self.kind_dir(kind).join(format!("{name}.{ext}"));
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Some(path);
            }
        }
        None
    }

    async fn parse(kind: RecipeKind, name: &str, path: &Path) -> InferenceResult<Recipe> {
        let parse_error = |reason: String| InferenceException::RecipeParse {
            path: path.display().to_string(),
            reason,
        };
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| parse_error(e.to_string()))?;
        let value: Value = serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?;
        if value.is_null() {
            return Err(parse_error("recipe file is empty".to_owned()));
        }
        if !value.is_mapping() {
            return Err(InferenceException::RecipeValidation {
                name: name.to_owned(),
                errors: vec!["recipe must be a mapping of fields".to_owned()],
            });
        }
        let built = match kind {
            RecipeKind::Server => build::<ServerRecipeDocument, _>(value, name, |mut doc| {
                fill_name(&mut doc.metadata.name, name, path);
                ServerRecipe::from_document(doc).map(Recipe::Server)
            }),
            RecipeKind::Client => build::<ClientRecipeDocument, _>(value, name, |mut doc| {
                fill_name(&mut doc.metadata.name, name, path);
                ClientRecipe::from_document(doc).map(Recipe::Client)
            }),
            RecipeKind::Monitor => build::<MonitorRecipeDocument, _>(value, name, |mut doc| {
                fill_name(&mut doc.metadata.name, name, path);
                MonitorRecipe::from_document(doc).map(Recipe::Monitor)
            }),
        };
        built.map_err(|errors| InferenceException::RecipeValidation {
            name: name.to_owned(),
            errors: errors.into_inner(),
        })
    }
}

fn build<D, F>(value: Value, name: &str, validate: F) -> Result<Recipe, FieldErrors>
where
    D: DeserializeOwned,
    F: FnOnce(D) -> Result<Recipe, FieldErrors>,
{
    match serde_yaml::from_value::<D>(value) {
        Ok(doc) => validate(doc),
        Err(e) => Err(FieldErrors::from(vec![format!("{name}: {e}")])),
    }
}

fn fill_name(declared: &mut String, stem: &str, path: &Path) {
    if declared.trim().is_empty() {
        *declared = stem.to_owned();
    } else if declared != stem {
        tracing::warn!(
            "Recipe {} declares name `{declared}`, which differs from its file name",
            path.display()
        );
    }
}

#[async_trait]
impl RecipeRepo for RecipeLoader {
    async fn load(&self, kind: RecipeKind, name: &str) -> InferenceResult<Recipe> {
        let key = (kind, name.to_owned());
        if let Some(recipe) = self.cache.get(&key) {
            return Ok(recipe.clone());
        }
        let path = self
            .find(kind, name)
            .await
            .ok_or_else(|| InferenceException::RecipeNotFound {
                kind,
                name: name.to_owned(),
            })?;
        let recipe = Self::parse(kind, name, &path).await?;
        tracing::debug!("Loaded {kind} recipe {name} from {}", path.display());
        self.cache.insert(key, recipe.clone());
        Ok(recipe)
    }

    async fn list(&self, kind: RecipeKind) -> InferenceResult<Vec<String>> {
        let dir = self.kind_dir(kind);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Recipe directory {} does not exist", dir.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("Failed to read {}", dir.display()))
                    .into())
            }
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("Failed to read {}", dir.display()))?
        {
            let path = entry.path();
            let is_recipe = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| EXTENSIONS.contains(&e));
            if let (true, Some(stem)) = (is_recipe, path.file_stem().and_then(|s| s.to_str())) {
                names.push(stem.to_owned());
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn save(&self, recipe: &Recipe) -> InferenceResult<PathBuf> {
        recipe
            .validate()
            .map_err(|errors| InferenceException::RecipeValidation {
                name: recipe.name().to_owned(),
                errors: errors.into_inner(),
            })?;
        let dir = self.kind_dir(recipe.kind());
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let yaml = match recipe {
            Recipe::Server(r) => serde_yaml::to_string(r),
            Recipe::Client(r) => serde_yaml::to_string(r),
            Recipe::Monitor(r) => serde_yaml::to_string(r),
        }
        .context("Failed to serialize recipe")?;
        let path = dir.join(format!("{}.yaml", recipe.name()));
        tokio::fs::write(&path, yaml)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        self.cache.remove(&(recipe.kind(), recipe.name().to_owned()));
        tracing::info!("Saved {} recipe {} to {}", recipe.kind(), recipe.name(), path.display());
        Ok(path)
    }

    async fn reload(&self) -> InferenceResult<usize> {
        self.clear_cache();
        let mut loaded = 0;
        for kind in RecipeKind::ALL {
            for name in self.list(kind).await? {
                match self.load(kind, &name).await {
                    Ok(_) => loaded += 1,
                    Err(e) => tracing::warn!("Skipping {kind} recipe {name}: {e}"),
                }
            }
        }
        tracing::info!("Reloaded {loaded} recipe(s)");
        Ok(loaded)
    }

    fn clear_cache(&self) {
        self.cache.clear();
    }
}
