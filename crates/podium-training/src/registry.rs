//! Model registry: numbered versions per model name plus string aliases.

use crate::artifacts::{copy_verified, write_json_atomic};
use crate::error::{TrainingError, TrainingResult};
use crate::layout::TrackingLayout;
use crate::tracking::RunId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

pub const CHAMPION: &str = "Champion";
pub const CHALLENGER: &str = "Challenger";

/// A registered model version as seen by callers, aliases resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: u32,
    pub run_id: RunId,
    /// Registry-owned copy of the weights.
    pub source: PathBuf,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
    pub aliases: Vec<String>,
}

impl ModelVersion {
    #[must_use]
    pub fn has_alias(&self, alias: &str) -> bool {
        self.aliases.iter().any(|a| a == alias)
    }
}

pub trait ModelRegistry: Send + Sync {
    /// Register `weights` produced by `run_id` as the next version of `name`.
    fn register_version(&self, name: &str, run_id: &RunId, weights: &Path) -> TrainingResult<ModelVersion>;

    fn versions(&self, name: &str) -> TrainingResult<Vec<ModelVersion>>;

    fn version_by_alias(&self, name: &str, alias: &str) -> TrainingResult<Option<ModelVersion>>;

    /// Point `alias` at `version`, moving it off whichever version held it.
    fn set_alias(&self, name: &str, alias: &str, version: u32) -> TrainingResult<()>;

    fn remove_alias(&self, name: &str, alias: &str) -> TrainingResult<()>;

    /// Names of every registered model.
    fn models(&self) -> TrainingResult<Vec<String>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredVersion {
    version: u32,
    run_id: RunId,
    source: PathBuf,
    sha256: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    versions: Vec<StoredVersion>,
    /// alias -> version. Keyed by alias so each alias has one holder.
    #[serde(default)]
    aliases: BTreeMap<String, u32>,
}

impl RegistryFile {
    fn resolve(&self, name: &str, stored: &StoredVersion) -> ModelVersion {
        ModelVersion {
            name: name.to_string(),
            version: stored.version,
            run_id: stored.run_id.clone(),
            source: stored.source.clone(),
            sha256: stored.sha256.clone(),
            created_at: stored.created_at,
            aliases: self
                .aliases
                .iter()
                .filter(|(_, v)| **v == stored.version)
                .map(|(a, _)| a.clone())
                .collect(),
        }
    }
}

/// Model registry backed by `<root>/models/<name>/registry.json`.
#[derive(Debug)]
pub struct FileRegistry {
    layout: TrackingLayout,
    write_lock: Mutex<()>,
}

impl FileRegistry {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { layout: TrackingLayout::new(root), write_lock: Mutex::new(()) }
    }

    fn read(&self, name: &str) -> TrainingResult<RegistryFile> {
        match std::fs::read(self.layout.model_registry_path(name)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, name: &str, file: &RegistryFile) -> TrainingResult<()> {
        write_json_atomic(&self.layout.model_registry_path(name), file)
    }

    fn lock(&self) -> TrainingResult<std::sync::MutexGuard<'_, ()>> {
        self.write_lock.lock().map_err(|_| TrainingError::Registry("registry lock poisoned".to_string()))
    }
}

impl ModelRegistry for FileRegistry {
    fn register_version(&self, name: &str, run_id: &RunId, weights: &Path) -> TrainingResult<ModelVersion> {
        validate_name(name)?;
        let _lock = self.lock()?;
        let mut file = self.read(name)?;
        let version = file.versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;

        let file_name = weights
            .file_name()
            .ok_or_else(|| TrainingError::Artifact(format!("not a file: {}", weights.display())))?;
        let source = self.layout.model_version_dir(name, version).join(file_name);
        let sha256 = copy_verified(weights, &source)?;

        let stored = StoredVersion { version, run_id: run_id.clone(), source, sha256, created_at: Utc::now() };
        let resolved = file.resolve(name, &stored);
        file.versions.push(stored);
        self.write(name, &file)?;

        info!(model = name, version, %run_id, "model version registered");
        Ok(resolved)
    }

    fn versions(&self, name: &str) -> TrainingResult<Vec<ModelVersion>> {
        let file = self.read(name)?;
        Ok(file.versions.iter().map(|v| file.resolve(name, v)).collect())
    }

    fn version_by_alias(&self, name: &str, alias: &str) -> TrainingResult<Option<ModelVersion>> {
        let file = self.read(name)?;
        let Some(version) = file.aliases.get(alias) else {
            return Ok(None);
        };
        let stored = file.versions.iter().find(|v| v.version == *version).ok_or_else(|| {
            TrainingError::Registry(format!("alias {alias} of {name} points at missing version {version}"))
        })?;
        Ok(Some(file.resolve(name, stored)))
    }

    fn set_alias(&self, name: &str, alias: &str, version: u32) -> TrainingResult<()> {
        let _lock = self.lock()?;
        let mut file = self.read(name)?;
        if !file.versions.iter().any(|v| v.version == version) {
            return Err(TrainingError::Registry(format!("{name} has no version {version}")));
        }
        file.aliases.insert(alias.to_string(), version);
        self.write(name, &file)?;
        info!(model = name, alias, version, "alias assigned");
        Ok(())
    }

    fn remove_alias(&self, name: &str, alias: &str) -> TrainingResult<()> {
        let _lock = self.lock()?;
        let mut file = self.read(name)?;
        if file.aliases.remove(alias).is_some() {
            self.write(name, &file)?;
        }
        Ok(())
    }

    fn models(&self) -> TrainingResult<Vec<String>> {
        let dir = match std::fs::read_dir(self.layout.root().join("models")) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in dir {
            let entry = entry?;
            if entry.path().join("registry.json").exists() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn validate_name(name: &str) -> TrainingResult<()> {
    let ok = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && name != "."
        && name != "..";
    if ok {
        Ok(())
    } else {
        Err(TrainingError::Registry(format!("invalid model name: {name:?}")))
    }
}
