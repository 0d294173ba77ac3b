use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::dedupe::DuplicateScanOptions;

/// How the planner treats two operations claiming the same destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Move/copy targets get ` (n)` appended; renames are still rejected.
    #[default]
    Uniquify,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannerConfig {
    #[serde(default)]
    pub collision_policy: CollisionPolicy,
    #[serde(default = "default_throughput")]
    pub throughput_bytes_per_sec: u64,
    #[serde(default = "default_operation_overhead")]
    pub per_operation_overhead_secs: u64,
    #[serde(default = "default_min_confidence")]
    pub min_suggestion_confidence: f32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            collision_policy: CollisionPolicy::default(),
            throughput_bytes_per_sec: default_throughput(),
            per_operation_overhead_secs: default_operation_overhead(),
            min_suggestion_confidence: default_min_confidence(),
        }
    }
}

fn default_throughput() -> u64 {
    100 * 1024 * 1024
}

fn default_operation_overhead() -> u64 {
    10
}

fn default_min_confidence() -> f32 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutorConfig {
    /// Where deletes stage restorable copies when a backup is requested.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            backup_dir: default_backup_dir(),
        }
    }
}

fn default_backup_dir() -> PathBuf {
    std::env::temp_dir().join("disk-tidy-backup")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub detection: DuplicateScanOptions,
}

impl EngineConfig {
    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("config {} not found; using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{CollisionPolicy, EngineConfig};
    use crate::dedupe::DetectionMethod;

    #[test]
    fn partial_config_fills_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "planner": { "collision_policy": "reject" }, "detection": { "method": "name_and_size" } }"#,
        )
        .expect("write config");

        let config = EngineConfig::load(&path).expect("load");
        assert_eq!(config.planner.collision_policy, CollisionPolicy::Reject);
        assert_eq!(config.planner.per_operation_overhead_secs, 10);
        assert_eq!(config.detection.method, DetectionMethod::NameAndSize);
        assert!(config.executor.backup_dir.ends_with("disk-tidy-backup"));
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempdir().expect("tempdir");
        let config = EngineConfig::load(&dir.path().join("absent.json")).expect("load");
        assert_eq!(config, EngineConfig::default());
    }
}
