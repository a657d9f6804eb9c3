//! Pool entry persistence using JSON file storage

use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// A configured pool: what the host stores between restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolEntry {
    /// Unique identifier
    #[serde(default = "new_entry_id")]
    pub id: String,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    pub config: Config,
}

fn new_entry_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl PoolEntry {
    /// Create an entry with a fresh id
    pub fn new(name: impl Into<String>, config: Config) -> Self {
        Self {
            id: new_entry_id(),
            name: name.into(),
            config,
        }
    }
}

/// Load pool entries from a JSON file
pub async fn load_entries(path: &Path) -> Vec<PoolEntry> {
    match fs::read_to_string(path).await {
        Ok(contents) => match serde_json::from_str::<Vec<PoolEntry>>(&contents) {
            Ok(entries) => {
                tracing::info!("Loaded {} pool entries from {:?}", entries.len(), path);
                entries
            }
            Err(e) => {
                tracing::warn!("Failed to parse pool entries file {:?}: {}", path, e);
                Vec::new()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No pool entries file found at {:?}, starting fresh", path);
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("Failed to read pool entries file {:?}: {}", path, e);
            Vec::new()
        }
    }
}

/// Save pool entries to a JSON file atomically
#[allow(clippy::missing_errors_doc)]
pub async fn save_entries(path: &Path, entries: &[PoolEntry]) -> Result<(), std::io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_string_pretty(entries)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    // Write to a temp file, then rename over the target
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &json).await?;
    fs::rename(&tmp_path, path).await?;

    tracing::debug!("Saved {} pool entries to {:?}", entries.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("filtration-engine-{}-{}", name, std::process::id()))
    }

    fn entry() -> PoolEntry {
        PoolEntry::new(
            "Main pool",
            Config::new(
                "sensor.water",
                "switch.pump",
                NaiveTime::from_hms_opt(13, 45, 0).unwrap(),
            ),
        )
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let path = scratch_dir("missing").join("pools.json");
        assert!(load_entries(&path).await.is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = scratch_dir("save");
        let path = dir.join("pools.json");
        let entries = vec![entry()];

        save_entries(&path, &entries).await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(load_entries(&path).await, entries);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_corrupt_file_loads_empty() {
        let dir = scratch_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pools.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(load_entries(&path).await.is_empty());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_entry_without_id_gets_one() {
        let entry: PoolEntry = serde_json::from_str(
            r#"{"config": {"water_sensor": "w", "pump_switch": "p", "pivot": "14:00"}}"#,
        )
        .unwrap();
        assert!(!entry.id.is_empty());
        assert_eq!(entry.name, "");
    }
}
