//! Pipeline persistence. Two scopes: workspace (`./.medlit`) and global
//! (user config directory). Configs are YAML files plus an index.json of
//! metadata; run history lives under the config content hash. Writes are
//! serialized process-wide.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::debug;

use crate::entities::pipeline::{PipelineConfig, PipelineRun, PipelineScope};
use crate::error::MedlitError;

const MAX_NAME_LEN: usize = 64;

static WRITE_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineIndexEntry {
    pub name: String,
    pub config_hash: String,
    pub saved_at: String,
    pub steps: usize,
    pub scope: PipelineScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PipelineIndex {
    #[serde(default)]
    pipelines: Vec<PipelineIndexEntry>,
}

pub struct PipelineStore {
    workspace_root: PathBuf,
    global_root: PathBuf,
}

/// Pipeline names on disk: lowercase, spaces to hyphens, path-safe,
/// at most 64 characters.
pub fn normalize_name(name: &str) -> Result<String, MedlitError> {
    let normalized: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if normalized.is_empty() {
        return Err(MedlitError::InvalidArgument(
            "Pipeline name is required. Example: medlit pipeline save my-search config.yaml"
                .into(),
        ));
    }
    if normalized.len() > MAX_NAME_LEN {
        return Err(MedlitError::InvalidArgument(format!(
            "Pipeline name is limited to {MAX_NAME_LEN} characters"
        )));
    }
    Ok(normalized)
}

/// SHA-256 over the canonical YAML of the step graph and output config.
/// Run history is linked by this hash, so renames keep history.
pub fn config_hash(config: &PipelineConfig) -> String {
    let canonical = serde_yaml::to_string(&(&config.steps, &config.output)).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{digest:x}")[..16].to_string()
}

impl PipelineStore {
    pub fn new() -> Result<Self, MedlitError> {
        Ok(Self {
            workspace_root: crate::config::workspace_config_dir(),
            global_root: crate::config::global_config_dir()?,
        })
    }

    #[cfg(test)]
    pub fn new_for_test(workspace_root: PathBuf, global_root: PathBuf) -> Self {
        Self {
            workspace_root,
            global_root,
        }
    }

    fn root(&self, scope: PipelineScope) -> &Path {
        match scope {
            PipelineScope::Workspace => &self.workspace_root,
            PipelineScope::Global => &self.global_root,
        }
    }

    fn pipelines_dir(&self, scope: PipelineScope) -> PathBuf {
        self.root(scope).join("pipelines")
    }

    fn config_path(&self, scope: PipelineScope, name: &str) -> PathBuf {
        self.pipelines_dir(scope).join(format!("{name}.yaml"))
    }

    fn index_path(&self, scope: PipelineScope) -> PathBuf {
        self.pipelines_dir(scope).join("index.json")
    }

    fn runs_dir(&self, scope: PipelineScope, hash: &str) -> PathBuf {
        self.root(scope).join("runs").join(hash)
    }

    fn read_index(&self, scope: PipelineScope) -> PipelineIndex {
        std::fs::read_to_string(self.index_path(scope))
            .ok()
            .and_then(|body| serde_json::from_str(&body).ok())
            .unwrap_or_default()
    }

    fn write_index(&self, scope: PipelineScope, index: &PipelineIndex) -> Result<(), MedlitError> {
        let body = serde_json::to_string_pretty(index).map_err(|source| MedlitError::ApiJson {
            api: "pipeline-store".to_string(),
            source,
        })?;
        std::fs::write(self.index_path(scope), body)?;
        Ok(())
    }

    pub fn save(&self, config: &PipelineConfig) -> Result<PipelineIndexEntry, MedlitError> {
        let _guard = WRITE_LOCK.lock().expect("store write lock poisoned");
        let name = normalize_name(&config.name)?;
        let scope = config.scope;
        std::fs::create_dir_all(self.pipelines_dir(scope))?;

        let mut stored = config.clone();
        stored.name = name.clone();
        let yaml = serde_yaml::to_string(&stored).map_err(|err| {
            MedlitError::InvalidArgument(format!("Config cannot be serialized: {err}"))
        })?;
        std::fs::write(self.config_path(scope, &name), yaml)?;

        let entry = PipelineIndexEntry {
            name: name.clone(),
            config_hash: config_hash(&stored),
            saved_at: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
            steps: stored.steps.len(),
            scope,
            template: stored.template.clone(),
        };
        let mut index = self.read_index(scope);
        index.pipelines.retain(|p| p.name != name);
        index.pipelines.push(entry.clone());
        index.pipelines.sort_by(|a, b| a.name.cmp(&b.name));
        self.write_index(scope, &index)?;
        debug!(name = %name, scope = ?scope, "pipeline saved");
        Ok(entry)
    }

    /// Resolution order: workspace first, then global.
    pub fn load(&self, name: &str) -> Result<PipelineConfig, MedlitError> {
        let name = normalize_name(name)?;
        for scope in [PipelineScope::Workspace, PipelineScope::Global] {
            let path = self.config_path(scope, &name);
            if let Ok(body) = std::fs::read_to_string(&path) {
                let mut config: PipelineConfig =
                    serde_yaml::from_str(&body).map_err(|err| {
                        MedlitError::InvalidArgument(format!(
                            "Saved pipeline \"{name}\" is not valid YAML: {err}"
                        ))
                    })?;
                config.scope = scope;
                return Ok(config);
            }
        }
        Err(MedlitError::NotFound {
            entity: "pipeline".into(),
            id: name.clone(),
            suggestion: "Try: medlit pipeline list".into(),
        })
    }

    pub fn list(&self) -> Vec<PipelineIndexEntry> {
        let mut entries = Vec::new();
        for scope in [PipelineScope::Workspace, PipelineScope::Global] {
            entries.extend(self.read_index(scope).pipelines);
        }
        entries
    }

    pub fn delete(&self, name: &str) -> Result<PipelineScope, MedlitError> {
        let _guard = WRITE_LOCK.lock().expect("store write lock poisoned");
        let name = normalize_name(name)?;
        for scope in [PipelineScope::Workspace, PipelineScope::Global] {
            let path = self.config_path(scope, &name);
            if path.exists() {
                std::fs::remove_file(&path)?;
                let mut index = self.read_index(scope);
                index.pipelines.retain(|p| p.name != name);
                self.write_index(scope, &index)?;
                return Ok(scope);
            }
        }
        Err(MedlitError::NotFound {
            entity: "pipeline".into(),
            id: name,
            suggestion: "Try: medlit pipeline list".into(),
        })
    }

    pub fn record_run(
        &self,
        scope: PipelineScope,
        run: &PipelineRun,
    ) -> Result<PathBuf, MedlitError> {
        let _guard = WRITE_LOCK.lock().expect("store write lock poisoned");
        let dir = self.runs_dir(scope, &run.config_hash);
        std::fs::create_dir_all(&dir)?;
        let timestamp = run.started_at.replace(':', "-");
        let path = dir.join(format!("{timestamp}.json"));
        let body = serde_json::to_string_pretty(run).map_err(|source| MedlitError::ApiJson {
            api: "pipeline-store".to_string(),
            source,
        })?;
        std::fs::write(&path, body)?;
        Ok(path)
    }

    pub fn run_history(&self, name_or_hash: &str) -> Result<Vec<PipelineRun>, MedlitError> {
        let hash = match self.load(name_or_hash) {
            Ok(config) => config_hash(&config),
            Err(_) => name_or_hash.trim().to_string(),
        };
        let mut runs: Vec<PipelineRun> = Vec::new();
        for scope in [PipelineScope::Workspace, PipelineScope::Global] {
            let dir = self.runs_dir(scope, &hash);
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                if let Ok(body) = std::fs::read_to_string(entry.path())
                    && let Ok(run) = serde_json::from_str::<PipelineRun>(&body)
                {
                    runs.push(run);
                }
            }
        }
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::pipeline::{PipelineStep, StepAction};

    fn temp_store() -> (PipelineStore, PathBuf) {
        let root = std::env::temp_dir().join(format!(
            "medlit-store-test-{}",
            std::process::id() as u64 + rand_suffix()
        ));
        let store =
            PipelineStore::new_for_test(root.join("workspace"), root.join("global"));
        (store, root)
    }

    fn rand_suffix() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as u64)
            .unwrap_or(0)
    }

    fn demo_config(name: &str, scope: PipelineScope) -> PipelineConfig {
        PipelineConfig {
            name: name.into(),
            scope,
            steps: vec![
                PipelineStep::new("s1", StepAction::Search).with_param("query", "sepsis"),
                PipelineStep::new("m1", StepAction::Merge).with_inputs(&["s1"]),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn name_normalization_rules() {
        assert_eq!(normalize_name("My Search").unwrap(), "my-search");
        assert_eq!(normalize_name("  PICO sepsis 2024 ").unwrap(), "pico-sepsis-2024");
        assert_eq!(normalize_name("path/../escape").unwrap(), "pathescape");
        assert!(normalize_name("").is_err());
        assert!(normalize_name(&"x".repeat(80)).is_err());
    }

    #[test]
    fn hash_is_content_based_not_name_based() {
        let a = demo_config("one", PipelineScope::Workspace);
        let mut b = demo_config("two", PipelineScope::Workspace);
        assert_eq!(config_hash(&a), config_hash(&b));
        b.steps[0] = PipelineStep::new("s1", StepAction::Search).with_param("query", "other");
        assert_ne!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn save_load_round_trip() {
        let (store, root) = temp_store();
        store
            .save(&demo_config("My Search", PipelineScope::Workspace))
            .unwrap();
        let loaded = store.load("my-search").unwrap();
        assert_eq!(loaded.steps.len(), 2);
        assert_eq!(loaded.steps[1].inputs, vec!["s1".to_string()]);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn workspace_shadows_global_on_load() {
        let (store, root) = temp_store();
        let mut global = demo_config("shared", PipelineScope::Global);
        global.output.limit = 5;
        store.save(&global).unwrap();
        let mut workspace = demo_config("shared", PipelineScope::Workspace);
        workspace.output.limit = 9;
        store.save(&workspace).unwrap();

        let loaded = store.load("shared").unwrap();
        assert_eq!(loaded.output.limit, 9);
        assert_eq!(loaded.scope, PipelineScope::Workspace);
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn list_and_delete_update_index() {
        let (store, root) = temp_store();
        store
            .save(&demo_config("alpha", PipelineScope::Workspace))
            .unwrap();
        store
            .save(&demo_config("beta", PipelineScope::Workspace))
            .unwrap();
        assert_eq!(store.list().len(), 2);
        store.delete("alpha").unwrap();
        let names: Vec<String> = store.list().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["beta".to_string()]);
        assert!(store.load("alpha").is_err());
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn run_history_is_linked_by_config_hash() {
        let (store, root) = temp_store();
        let config = demo_config("tracked", PipelineScope::Workspace);
        store.save(&config).unwrap();
        let hash = config_hash(&config);
        let run = PipelineRun {
            name: "tracked".into(),
            config_hash: hash.clone(),
            started_at: "2026-08-01T10:00:00Z".into(),
            steps: Vec::new(),
            aborted: false,
            output_count: 4,
        };
        store.record_run(PipelineScope::Workspace, &run).unwrap();
        let history = store.run_history("tracked").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].output_count, 4);
        let _ = std::fs::remove_dir_all(root);
    }
}
