use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::Config;
use crate::shared::{OrchestratorConfig, ValidationError};

/// Complete configuration of the `migrator` service.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MigratorConfig {
    /// Root directory whose files are migrated.
    pub source_dir: PathBuf,
    /// Root directory receiving the migrated files.
    pub target_dir: PathBuf,
    /// File receiving one JSON line per migrated resource.
    ///
    /// Defaults to `manifest.jsonl` inside the target directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,
    /// Orchestrator settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

impl MigratorConfig {
    /// Name of the manifest file used when [`MigratorConfig::manifest_path`] is not set.
    pub const DEFAULT_MANIFEST_FILE_NAME: &'static str = "manifest.jsonl";

    /// Returns the manifest path, defaulting to a file inside the target directory.
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_path
            .clone()
            .unwrap_or_else(|| self.target_dir.join(Self::DEFAULT_MANIFEST_FILE_NAME))
    }

    /// Validates the complete migrator configuration.
    ///
    /// Source and target directories must not contain one another, and the manifest must live
    /// outside of the source directory, otherwise migrated files would be picked up as sources.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let source_dir = normalize(&self.source_dir);
        let target_dir = normalize(&self.target_dir);

        if source_dir.starts_with(&target_dir) || target_dir.starts_with(&source_dir) {
            return Err(ValidationError::OverlappingPaths {
                first: "source_dir".to_string(),
                second: "target_dir".to_string(),
            });
        }

        if normalize(&self.manifest_path()).starts_with(&source_dir) {
            return Err(ValidationError::OverlappingPaths {
                first: "source_dir".to_string(),
                second: "manifest_path".to_string(),
            });
        }

        self.orchestrator.validate()
    }
}

/// Makes `path` absolute and resolves `.` and `..` lexically, without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            component => normalized.push(component),
        }
    }

    normalized
}

impl Config for MigratorConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
