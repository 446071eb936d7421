//! Persisted list of optional packages that failed to install

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::DepsError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionalFailureRecord {
    pub recorded_at: DateTime<Utc>,
    pub packages: Vec<String>,
}

impl OptionalFailureRecord {
    pub fn new(packages: Vec<String>) -> Self {
        Self {
            recorded_at: Utc::now(),
            packages,
        }
    }

    /// Read a record; missing or unreadable files yield `None`
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Ignoring malformed {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), DepsError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Save when there are failures, otherwise remove any stale record
    pub fn store(packages: Vec<String>, path: &Path) -> Result<(), DepsError> {
        if packages.is_empty() {
            return match std::fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            };
        }
        Self::new(packages).save(path)
    }

    pub fn contains(&self, package: &str) -> bool {
        self.packages.iter().any(|p| p == package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_load() {
        let path = std::env::temp_dir().join("lofi_launcher_optional_failures.json");
        OptionalFailureRecord::store(vec!["torch".to_string()], &path).unwrap();

        let record = OptionalFailureRecord::load(&path).unwrap();
        assert_eq!(record.packages, vec!["torch".to_string()]);
        assert!(record.contains("torch"));
        assert!(!record.contains("audiocraft"));

        OptionalFailureRecord::store(Vec::new(), &path).unwrap();
        assert!(!path.exists());
        assert!(OptionalFailureRecord::load(&path).is_none());
    }

    #[test]
    fn test_malformed_record_is_ignored() {
        let path = std::env::temp_dir().join("lofi_launcher_optional_failures_bad.json");
        std::fs::write(&path, "[not json").unwrap();
        assert!(OptionalFailureRecord::load(&path).is_none());
        std::fs::remove_file(&path).ok();
    }
}
