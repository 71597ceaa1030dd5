use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::sync::RwLock;

/// Typed view over the environment-variable inputs the core consumes (spec
/// §6, SPEC_FULL.md Ambient Stack / Configuration). The LLM API key is an
/// opaque passthrough: this core never interprets it, only forwards it to
/// the out-of-scope LLM transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvInputs {
    pub llm_api_key: Option<String>,
    pub embedding_provider_endpoint: Option<String>,
    pub sandbox_backend: Option<String>,
    pub sandbox_image: Option<String>,
    pub persistence_root: Option<String>,
    pub daily_budget_cap: Option<f64>,
    pub monthly_budget_cap: Option<f64>,
    pub max_concurrent_tasks_per_agent: Option<u32>,
    pub health_monitor_interval_secs: Option<u64>,
    pub health_stuck_threshold_secs: Option<u64>,
}

impl EnvInputs {
    /// Reads the canonical `AURORA_*` environment variables. Missing values
    /// are left `None`; callers fall back to config-layer or compiled-in
    /// defaults.
    pub fn from_env() -> Self {
        Self {
            llm_api_key: std::env::var("AURORA_LLM_API_KEY").ok(),
            embedding_provider_endpoint: std::env::var("AURORA_EMBEDDING_ENDPOINT").ok(),
            sandbox_backend: std::env::var("AURORA_SANDBOX_BACKEND").ok(),
            sandbox_image: std::env::var("AURORA_SANDBOX_IMAGE").ok(),
            persistence_root: std::env::var("AURORA_PERSISTENCE_ROOT").ok(),
            daily_budget_cap: std::env::var("AURORA_DAILY_BUDGET_CAP")
                .ok()
                .and_then(|v| v.parse().ok()),
            monthly_budget_cap: std::env::var("AURORA_MONTHLY_BUDGET_CAP")
                .ok()
                .and_then(|v| v.parse().ok()),
            max_concurrent_tasks_per_agent: std::env::var("AURORA_MAX_CONCURRENT_TASKS_PER_AGENT")
                .ok()
                .and_then(|v| v.parse().ok()),
            health_monitor_interval_secs: std::env::var("AURORA_HEALTH_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
            health_stuck_threshold_secs: std::env::var("AURORA_HEALTH_STUCK_THRESHOLD_SECS")
                .ok()
                .and_then(|v| v.parse().ok()),
        }
    }

    fn as_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Default)]
struct ConfigLayers {
    global: Value,
    project: Value,
    env: Value,
    runtime: Value,
}

/// Layered configuration store: `global < project < env < runtime-patch`,
/// deep-merged over `serde_json::Value` (SPEC_FULL.md Ambient Stack /
/// Configuration). Later layers win on key conflicts; objects merge
/// recursively, everything else overwrites.
#[derive(Clone)]
pub struct ConfigStore {
    global_path: PathBuf,
    project_path: PathBuf,
    layers: Arc<RwLock<ConfigLayers>>,
}

impl ConfigStore {
    pub async fn new(global_path: impl AsRef<Path>, project_path: impl AsRef<Path>) -> Self {
        let global_path = global_path.as_ref().to_path_buf();
        let project_path = project_path.as_ref().to_path_buf();

        let global = read_json_file(&global_path).await.unwrap_or(Value::Null);
        let project = read_json_file(&project_path).await.unwrap_or(Value::Null);
        let env = EnvInputs::from_env().as_json();

        Self {
            global_path,
            project_path,
            layers: Arc::new(RwLock::new(ConfigLayers {
                global,
                project,
                env,
                runtime: Value::Null,
            })),
        }
    }

    /// Merges the four layers in precedence order and returns the result.
    pub async fn resolved(&self) -> Value {
        let layers = self.layers.read().await;
        let mut merged = empty_object();
        deep_merge(&mut merged, &layers.global);
        deep_merge(&mut merged, &layers.project);
        deep_merge(&mut merged, &layers.env);
        deep_merge(&mut merged, &layers.runtime);
        merged
    }

    /// Applies a runtime patch (e.g. a breakpoint's approval `modifications`
    /// payload) on top of every other layer until the process restarts.
    pub async fn apply_runtime_patch(&self, patch: Value) {
        let mut layers = self.layers.write().await;
        deep_merge(&mut layers.runtime, &patch);
    }

    pub async fn reload_global(&self) -> anyhow::Result<()> {
        let global = read_json_file(&self.global_path).await.unwrap_or(Value::Null);
        self.layers.write().await.global = global;
        Ok(())
    }

    pub async fn reload_project(&self) -> anyhow::Result<()> {
        let project = read_json_file(&self.project_path)
            .await
            .unwrap_or(Value::Null);
        self.layers.write().await.project = project;
        Ok(())
    }
}

async fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    let raw = fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn deep_merge(base: &mut Value, overlay: &Value) {
    if overlay.is_null() {
        return;
    }
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                if value.is_null() {
                    continue;
                }
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_value, overlay_value) => {
            *base_value = overlay_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn layers_merge_with_runtime_patch_winning() {
        let dir = tempdir().unwrap();
        let global_path = dir.path().join("global.json");
        let project_path = dir.path().join("project.json");
        tokio::fs::write(&global_path, json!({"budget": {"daily_cap": 10.0}}).to_string())
            .await
            .unwrap();
        tokio::fs::write(&project_path, json!({"budget": {"daily_cap": 25.0}}).to_string())
            .await
            .unwrap();

        let store = ConfigStore::new(&global_path, &project_path).await;
        let resolved = store.resolved().await;
        assert_eq!(resolved["budget"]["daily_cap"], 25.0);

        store
            .apply_runtime_patch(json!({"budget": {"daily_cap": 5.0}}))
            .await;
        let resolved = store.resolved().await;
        assert_eq!(resolved["budget"]["daily_cap"], 5.0);
    }

    #[test]
    fn deep_merge_recurses_into_nested_objects() {
        let mut base = json!({"a": {"x": 1, "y": 2}});
        let overlay = json!({"a": {"y": 3, "z": 4}});
        deep_merge(&mut base, &overlay);
        assert_eq!(base, json!({"a": {"x": 1, "y": 3, "z": 4}}));
    }
}
