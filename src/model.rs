use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Human-facing package metadata carried from the source list into the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayMetadata {
    pub name: String,
    pub description: String,
    pub category: String, // e.g. "text-editor", "developer"
    pub icon_url: String,
    pub package_name: String, // e.g. "google-chrome-stable"
    pub install_type: String, // e.g. "deb", "AppImage"
}

/// Persisted state of one tracked package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub id: String,
    #[serde(flatten)]
    pub display: DisplayMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_release: Option<Release>,
    /// Stamped again by every reconciliation that saves the record.
    pub last_checked_at: DateTime<Utc>,
}

impl PackageRecord {
    /// Fresh record for an id that has never been resolved.
    pub fn new(id: impl Into<String>, display: DisplayMetadata) -> Self {
        Self {
            id: id.into(),
            display,
            current_release: None,
            last_checked_at: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_checked_at = Utc::now();
    }
}

/// A verified release. Always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub version: String,
    pub download_url: String,
    pub checksum: String, // lowercase hex SHA-256
    pub size: u64,
}

/// What a probe saw upstream during one reconciliation attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateObservation {
    /// Version discovered without downloading. `None` when the probe cannot tell.
    pub version: Option<String>,
    pub download_url: String,
    /// Hash asserted by an upstream integrity header. Not verified.
    pub remote_checksum: Option<String>,
    /// Size asserted by a transfer-length header.
    pub remote_size: Option<u64>,
    /// Label for sources without a real version signal. Never compared.
    pub placeholder_version: Option<String>,
}

impl CandidateObservation {
    pub fn new(download_url: impl Into<String>) -> Self {
        Self {
            download_url: download_url.into(),
            ..Self::default()
        }
    }

    /// Discovered version, treating an empty string as absent.
    pub fn discovered_version(&self) -> Option<&str> {
        self.version.as_deref().filter(|v| !v.is_empty())
    }

    pub fn remote_checksum(&self) -> Option<&str> {
        self.remote_checksum.as_deref().filter(|c| !c.is_empty())
    }
}

/// One entry of the source list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    #[serde(flatten)]
    pub display: DisplayMetadata,
    pub strategy: String,
    /// Strategy-specific keys (`url`, `regex`, `repo`, `asset_filter`, ...).
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl SourceConfig {
    pub fn seed_record(&self) -> PackageRecord {
        PackageRecord::new(self.id.clone(), self.display.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_source_config_flattened_fields() {
        let json = r#"{
            "id": "vscode",
            "name": "Visual Studio Code",
            "category": "text-editor",
            "install_type": "deb",
            "strategy": "direct_url_head",
            "config": { "url": "https://example.com/latest" }
        }"#;

        let source: SourceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(source.id, "vscode");
        assert_eq!(source.display.name, "Visual Studio Code");
        assert_eq!(source.display.install_type, "deb");
        assert_eq!(source.display.description, "");
        assert_eq!(source.config["url"], "https://example.com/latest");
    }

    #[test]
    fn test_seed_record_has_no_release() {
        let source = SourceConfig {
            id: "chrome".to_string(),
            display: DisplayMetadata {
                name: "Chrome".to_string(),
                ..Default::default()
            },
            strategy: "direct_static".to_string(),
            config: HashMap::new(),
        };

        let record = source.seed_record();
        assert_eq!(record.id, "chrome");
        assert_eq!(record.display.name, "Chrome");
        assert!(record.current_release.is_none());
    }

    #[test]
    fn test_record_omits_missing_release() {
        let record = PackageRecord::new("discord", DisplayMetadata::default());
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("current_release").is_none());
        assert_eq!(value["id"], "discord");
        assert_eq!(value["install_type"], "");
    }

    #[test]
    fn test_record_always_carries_last_checked_at() {
        let mut record = PackageRecord::new("discord", DisplayMetadata::default());
        let created = record.last_checked_at;
        record.touch();
        assert!(record.last_checked_at >= created);

        let value = serde_json::to_value(&record).unwrap();
        let stamp = value["last_checked_at"].as_str().unwrap();
        assert_eq!(
            stamp.parse::<DateTime<Utc>>().unwrap(),
            record.last_checked_at
        );

        let mut without_stamp = value;
        without_stamp
            .as_object_mut()
            .unwrap()
            .remove("last_checked_at");
        assert!(serde_json::from_value::<PackageRecord>(without_stamp).is_err());
    }

    #[test]
    fn test_empty_discovered_version_is_absent() {
        let mut candidate = CandidateObservation::new("https://example.com/a.deb");
        candidate.version = Some(String::new());
        candidate.remote_checksum = Some(String::new());
        assert_eq!(candidate.discovered_version(), None);
        assert_eq!(candidate.remote_checksum(), None);
    }
}
