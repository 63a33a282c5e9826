//! Debian package inspector.

use std::ffi::OsString;
use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::harvest::traits::{ArtifactInspector, InspectError};

/// Reads the `Version` control field with `dpkg-deb --field`.
#[derive(Debug, Clone)]
pub struct DpkgInspector {
    program: OsString,
}

impl DpkgInspector {
    pub fn new() -> Self {
        Self {
            program: OsString::from("dpkg-deb"),
        }
    }

    /// Uses another `dpkg-deb` compatible binary.
    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for DpkgInspector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactInspector for DpkgInspector {
    fn name(&self) -> &str {
        "dpkg-deb"
    }

    fn supports(&self, install_type: &str) -> bool {
        install_type.eq_ignore_ascii_case("deb")
    }

    async fn extract_version(&self, path: &Path) -> Result<String, InspectError> {
        let unavailable = |reason: String| InspectError::MetadataUnavailable {
            path: path.to_path_buf(),
            reason,
        };

        let output = Command::new(&self.program)
            .arg("--field")
            .arg(path)
            .arg("Version")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                unavailable(format!("cannot run {}: {e}", self.program.to_string_lossy()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(unavailable(format!(
                "{} exited with {}: {}",
                self.program.to_string_lossy(),
                output.status,
                stderr.trim()
            )));
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if version.is_empty() {
            return Err(unavailable("no Version field".to_string()));
        }

        debug!(path = %path.display(), %version, "Read package version");
        Ok(version)
    }
}
