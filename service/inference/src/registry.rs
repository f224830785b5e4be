use std::{
    collections::BTreeMap,
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain_inference::{
    exception::{InferenceException, InferenceResult},
    model::{
        entity::Instance,
        vo::{InstanceStatus, RecipeKind},
    },
    repository::InstanceRepo,
};
use serde_json::Value;
use tokio::{io::AsyncWriteExt, sync::Mutex};

/// Instance records of one kind, persisted as a JSON object keyed by id.
///
/// A single lock serializes every operation and is held across the snapshot
/// write, so the file always reflects the latest mutation. Write failures are
/// logged; the in-memory map stays authoritative.
pub struct InstanceRegistry {
    kind: RecipeKind,
    path: Option<PathBuf>,
    instances: Mutex<BTreeMap<String, Instance>>,
}

impl InstanceRegistry {
    pub fn in_memory(kind: RecipeKind) -> Self {
        Self {
            kind,
            path: None,
            instances: Mutex::new(BTreeMap::new()),
        }
    }

    /// Load `path` if it exists. Undecodable records are skipped; an
    /// unreadable file is set aside as `<path>.corrupt-<timestamp>`.
    pub async fn open(kind: RecipeKind, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let instances = load_snapshot(&path).await;
        tracing::info!(
            "Loaded {} {kind} instance(s) from {}",
            instances.len(),
            path.display()
        );
        Self {
            kind,
            path: Some(path),
            instances: Mutex::new(instances),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Stale sweep against an explicit clock.
    pub async fn cleanup_stale_at(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> InferenceResult<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .with_context(|| format!("max age {max_age:?} out of range"))?;
        let mut instances = self.instances.lock().await;
        let before = instances.len();
        instances.retain(|id, instance| {
            if !instance.is_terminal() {
                return true;
            }
            let stopped = instance.stopped_at.unwrap_or(instance.created_at);
            let stale = now - stopped > max_age;
            if stale {
                tracing::debug!("Removing stale {} instance {id}", self.kind);
            }
            !stale
        });
        let removed = before - instances.len();
        if removed > 0 {
            self.persist(&instances).await;
        }
        Ok(removed)
    }

    async fn mutate<F>(&self, id: &str, f: F) -> InferenceResult<Instance>
    where
        F: FnOnce(&mut Instance) -> InferenceResult<bool> + Send,
    {
        let mut instances = self.instances.lock().await;
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| InferenceException::not_found(self.kind, id))?;
        let changed = f(instance)?;
        let snapshot = instance.clone();
        if changed {
            self.persist(&instances).await;
        }
        Ok(snapshot)
    }

    async fn persist(&self, instances: &BTreeMap<String, Instance>) {
        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_snapshot(path, instances).await {
            tracing::error!("Failed to persist {} registry to {}: {e:#}", self.kind, path.display());
        }
    }

    async fn select<F>(&self, predicate: F) -> Vec<Instance>
    where
        F: Fn(&Instance) -> bool,
    {
        self.instances
            .lock()
            .await
            .values()
            .filter(|i| predicate(i))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl InstanceRepo for InstanceRegistry {
    fn kind(&self) -> RecipeKind {
        self.kind
    }

    async fn register(&self, instance: &Instance) -> InferenceResult<()> {
        let mut instances = self.instances.lock().await;
        instances.insert(instance.id.clone(), instance.clone());
        self.persist(&instances).await;
        Ok(())
    }

    async fn get(&self, id: &str) -> InferenceResult<Instance> {
        self.instances
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| InferenceException::not_found(self.kind, id))
    }

    async fn get_by_external_job_id(&self, job_id: &str) -> InferenceResult<Option<Instance>> {
        Ok(self
            .instances
            .lock()
            .await
            .values()
            .find(|i| i.external_job_id.as_deref() == Some(job_id))
            .cloned())
    }

    async fn get_all(&self) -> InferenceResult<Vec<Instance>> {
        Ok(self.select(|_| true).await)
    }

    async fn get_running(&self) -> InferenceResult<Vec<Instance>> {
        Ok(self.select(|i| i.status == InstanceStatus::Running).await)
    }

    async fn get_active(&self) -> InferenceResult<Vec<Instance>> {
        Ok(self.select(|i| !i.is_terminal()).await)
    }

    async fn get_by_recipe(&self, recipe_name: &str) -> InferenceResult<Vec<Instance>> {
        Ok(self.select(|i| i.recipe_name == recipe_name).await)
    }

    async fn contains(&self, id: &str) -> InferenceResult<bool> {
        Ok(self.instances.lock().await.contains_key(id))
    }

    async fn update_status(
        &self,
        id: &str,
        status: InstanceStatus,
        error_message: Option<String>,
    ) -> InferenceResult<Instance> {
        self.mutate(id, |instance| {
            let from = instance.status;
            if !from.can_transition_to(status) {
                return Err(InferenceException::InvalidTransition {
                    id: instance.id.clone(),
                    from,
                    to: status,
                });
            }
            let mut changed = false;
            if from != status {
                let now = Utc::now();
                instance.status = status;
                if status == InstanceStatus::Running && instance.started_at.is_none() {
                    instance.started_at = Some(now);
                }
                if status.is_terminal() && instance.stopped_at.is_none() {
                    instance.stopped_at = Some(now);
                }
                tracing::info!("{} {} moved {from} -> {status}", self.kind, instance.id);
                changed = true;
            }
            if error_message.is_some() && instance.error_message != error_message {
                instance.error_message = error_message;
                changed = true;
            }
            Ok(changed)
        })
        .await
    }

    async fn update_external_job_id(&self, id: &str, job_id: &str) -> InferenceResult<Instance> {
        self.mutate(id, |instance| {
            if instance.external_job_id.as_deref() == Some(job_id) {
                return Ok(false);
            }
            instance.external_job_id = Some(job_id.to_owned());
            Ok(true)
        })
        .await
    }

    async fn update_node(&self, id: &str, node: &str) -> InferenceResult<Instance> {
        self.mutate(id, |instance| {
            if !instance.status.has_started() {
                return Err(anyhow!(
                    "node of {} can only be recorded once running, status is {}",
                    instance.id,
                    instance.status
                )
                .into());
            }
            match instance.node.as_deref() {
                Some(current) if current == node => Ok(false),
                Some(current) => Err(anyhow!(
                    "node of {} is already {current}, refusing {node}",
                    instance.id
                )
                .into()),
                None => {
                    instance.node = Some(node.to_owned());
                    Ok(true)
                }
            }
        })
        .await
    }

    async fn update_endpoints(
        &self,
        id: &str,
        endpoints: BTreeMap<String, String>,
    ) -> InferenceResult<Instance> {
        self.mutate(id, |instance| {
            if !instance.status.has_started() {
                return Err(anyhow!(
                    "endpoints of {} can only be recorded once running, status is {}",
                    instance.id,
                    instance.status
                )
                .into());
            }
            if instance.endpoints == endpoints {
                return Ok(false);
            }
            if !instance.endpoints.is_empty() {
                return Err(anyhow!("endpoints of {} are already recorded", instance.id).into());
            }
            instance.endpoints = endpoints;
            Ok(true)
        })
        .await
    }

    async fn unregister(&self, id: &str) -> InferenceResult<bool> {
        let mut instances = self.instances.lock().await;
        let removed = instances.remove(id).is_some();
        if removed {
            self.persist(&instances).await;
        }
        Ok(removed)
    }

    async fn cleanup_stale(&self, max_age: Duration) -> InferenceResult<usize> {
        self.cleanup_stale_at(Utc::now(), max_age).await
    }
}

async fn load_snapshot(path: &Path) -> BTreeMap<String, Instance> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            tracing::error!("Failed to read registry {}: {e}", path.display());
            set_aside(path).await;
            return BTreeMap::new();
        }
    };
    if content.trim().is_empty() {
        return BTreeMap::new();
    }
    let records: BTreeMap<String, Value> = match serde_json::from_str(&content) {
        Ok(records) => records,
        Err(e) => {
            tracing::error!("Registry {} is corrupt: {e}", path.display());
            set_aside(path).await;
            return BTreeMap::new();
        }
    };
    let mut instances = BTreeMap::new();
    for (id, record) in records {
        match serde_json::from_value::<Instance>(record) {
            Ok(instance) => {
                if instance.id != id {
                    tracing::warn!("Registry key {id} holds instance {}, keying by the latter", instance.id);
                }
                instances.insert(instance.id.clone(), instance);
            }
            Err(e) => tracing::warn!("Skipping undecodable instance {id} in {}: {e}", path.display()),
        }
    }
    instances
}

async fn set_aside(path: &Path) {
    let mut backup = OsString::from(path.as_os_str());
    backup.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S")));
    match tokio::fs::copy(path, &backup).await {
        Ok(_) => tracing::warn!("Backed up unreadable registry to {}", Path::new(&backup).display()),
        Err(e) => tracing::error!("Failed to back up registry {}: {e}", path.display()),
    }
}

/// Full snapshot to `<path>.tmp`, fsync, then rename over `path`.
async fn write_snapshot(path: &Path, instances: &BTreeMap<String, Instance>) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(instances)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp_path = path.with_extension("tmp");
    let result = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        tokio::fs::rename(&temp_path, path).await
    }
    .await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&temp_path).await;
    }
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use domain_inference::model::vo::{
        ClientRecipe, ClientRecipeDocument, Recipe, RecipeMetadata,
    };

    use super::*;

    fn instance(status: InstanceStatus) -> Instance {
        let doc = ClientRecipeDocument {
            metadata: RecipeMetadata::named("load"),
            ..Default::default()
        };
        let mut instance = Instance::new(Recipe::Client(ClientRecipe::from_document(doc).unwrap()));
        instance.status = status;
        instance
    }

    #[tokio::test]
    async fn reopening_yields_the_same_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_registry.json");
        let registry = InstanceRegistry::open(RecipeKind::Client, &path).await;
        let a = instance(InstanceStatus::Submitted);
        let b = instance(InstanceStatus::Queued);
        registry.register(&a).await.unwrap();
        registry.register(&b).await.unwrap();
        registry.update_external_job_id(&b.id, "4711").await.unwrap();
        registry.update_status(&b.id, InstanceStatus::Running, None).await.unwrap();

        let reopened = InstanceRegistry::open(RecipeKind::Client, &path).await;
        let mut before = registry.get_all().await.unwrap();
        let mut after = reopened.get_all().await.unwrap();
        before.sort_by(|x, y| x.id.cmp(&y.id));
        after.sort_by(|x, y| x.id.cmp(&y.id));
        assert_eq!(before, after);
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(
            reopened.get_by_external_job_id("4711").await.unwrap().map(|i| i.id),
            Some(b.id)
        );
    }

    #[tokio::test]
    async fn stamps_timestamps_and_rejects_backward_moves() {
        let registry = InstanceRegistry::in_memory(RecipeKind::Server);
        let i = instance(InstanceStatus::Queued);
        registry.register(&i).await.unwrap();

        let running = registry.update_status(&i.id, InstanceStatus::Running, None).await.unwrap();
        assert!(running.started_at.is_some());
        assert!(running.stopped_at.is_none());

        let err = registry
            .update_status(&i.id, InstanceStatus::Queued, None)
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceException::InvalidTransition { .. }));

        let failed = registry
            .update_status(&i.id, InstanceStatus::Error, Some("boom".to_owned()))
            .await
            .unwrap();
        assert!(failed.stopped_at.is_some());
        assert_eq!(failed.error_message.as_deref(), Some("boom"));
        assert!(registry.get_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn node_and_endpoints_are_set_once_after_running() {
        let registry = InstanceRegistry::in_memory(RecipeKind::Server);
        let i = instance(InstanceStatus::Queued);
        registry.register(&i).await.unwrap();
        assert!(registry.update_node(&i.id, "mel2091").await.is_err());

        registry.update_status(&i.id, InstanceStatus::Running, None).await.unwrap();
        registry.update_node(&i.id, "mel2091").await.unwrap();
        registry.update_node(&i.id, "mel2091").await.unwrap();
        assert!(registry.update_node(&i.id, "mel2092").await.is_err());

        let endpoints = BTreeMap::from([("api".to_owned(), "http://mel2091:8000".to_owned())]);
        registry.update_endpoints(&i.id, endpoints.clone()).await.unwrap();
        registry.update_endpoints(&i.id, endpoints).await.unwrap();
        assert!(registry.update_endpoints(&i.id, BTreeMap::new()).await.is_err());
    }

    #[tokio::test]
    async fn missing_ids_use_the_registry_kind() {
        let registry = InstanceRegistry::in_memory(RecipeKind::Server);
        let err = registry.get("nope").await.unwrap_err();
        assert!(matches!(err, InferenceException::ServiceNotFound { .. }));
        assert!(!registry.unregister("nope").await.unwrap());
    }

    #[tokio::test]
    async fn stale_cleanup_keeps_the_boundary() {
        let registry = InstanceRegistry::in_memory(RecipeKind::Client);
        let now = Utc::now();
        let day = Duration::from_secs(24 * 3600);
        let mut ids = Vec::new();
        for hours in [48, 24, 1] {
            let mut i = instance(InstanceStatus::Completed);
            i.stopped_at = Some(now - chrono::Duration::hours(hours));
            ids.push(i.id.clone());
            registry.register(&i).await.unwrap();
        }
        let mut live = instance(InstanceStatus::Running);
        live.created_at = now - chrono::Duration::hours(72);
        registry.register(&live).await.unwrap();

        assert_eq!(registry.cleanup_stale_at(now, day).await.unwrap(), 1);
        assert!(!registry.contains(&ids[0]).await.unwrap());
        assert!(registry.contains(&ids[1]).await.unwrap());
        assert!(registry.contains(&ids[2]).await.unwrap());
        assert!(registry.contains(&live.id).await.unwrap());
    }

    #[tokio::test]
    async fn skips_bad_records_and_sets_aside_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service_registry.json");
        let good = instance(InstanceStatus::Queued);
        let mut snapshot = serde_json::Map::new();
        snapshot.insert(good.id.clone(), serde_json::to_value(&good).unwrap());
        snapshot.insert(
            "deadbeef".to_owned(),
            serde_json::json!({ "id": "deadbeef", "status": "NOT_A_STATUS" }),
        );
        tokio::fs::write(&path, serde_json::to_vec(&snapshot).unwrap()).await.unwrap();
        let registry = InstanceRegistry::open(RecipeKind::Client, &path).await;
        assert_eq!(registry.get_all().await.unwrap().len(), 1);

        tokio::fs::write(&path, b"{ not json").await.unwrap();
        let registry = InstanceRegistry::open(RecipeKind::Client, &path).await;
        assert!(registry.get_all().await.unwrap().is_empty());
        let backups = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(backups, 1);
    }
}
