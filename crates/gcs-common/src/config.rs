//! Service configuration model.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GcsError, Result};

/// Root configuration for the guest compute service.
///
/// Every field has a default, so a partial JSON document only needs to
/// name the values it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcsConfig {
    /// Helper invoked to configure a network adapter inside a namespace.
    pub netns_helper: PathBuf,
    /// Interval between checks for a hot-added adapter to enumerate.
    pub adapter_poll_interval_ms: u64,
    /// Deadline for a hot-added adapter to enumerate.
    pub adapter_timeout_ms: u64,
    /// Interval between mount attempts while a device is not yet present.
    pub mount_retry_interval_ms: u64,
    /// Deadline for a device to become mountable.
    pub mount_retry_timeout_ms: u64,
    /// Filesystem type used for SCSI disks and pmem devices.
    pub default_filesystem: String,
    /// Permission bits for directories the service creates.
    pub dir_mode: u32,
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            netns_helper: PathBuf::from(crate::constants::DEFAULT_NETNS_HELPER),
            adapter_poll_interval_ms: 10,
            adapter_timeout_ms: 2_000,
            mount_retry_interval_ms: 100,
            mount_retry_timeout_ms: 2_000,
            default_filesystem: crate::constants::DEFAULT_FILESYSTEM.to_string(),
            dir_mode: crate::constants::DEFAULT_DIR_MODE,
        }
    }
}

impl GcsConfig {
    /// Loads a configuration from a JSON file and validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// describes an unusable configuration.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| GcsError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that intervals are non-zero and fit inside their deadlines.
    ///
    /// # Errors
    ///
    /// Returns [`GcsError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        check_interval(
            "adapter",
            self.adapter_poll_interval_ms,
            self.adapter_timeout_ms,
        )?;
        check_interval(
            "mount retry",
            self.mount_retry_interval_ms,
            self.mount_retry_timeout_ms,
        )?;
        if self.netns_helper.as_os_str().is_empty() {
            return Err(GcsError::Config {
                message: "netns_helper must not be empty".into(),
            });
        }
        if self.default_filesystem.is_empty() {
            return Err(GcsError::Config {
                message: "default_filesystem must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Interval between adapter enumeration checks.
    #[must_use]
    pub const fn adapter_poll_interval(&self) -> Duration {
        Duration::from_millis(self.adapter_poll_interval_ms)
    }

    /// Deadline for adapter enumeration.
    #[must_use]
    pub const fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    /// Interval between mount attempts.
    #[must_use]
    pub const fn mount_retry_interval(&self) -> Duration {
        Duration::from_millis(self.mount_retry_interval_ms)
    }

    /// Deadline for mount retries.
    #[must_use]
    pub const fn mount_retry_timeout(&self) -> Duration {
        Duration::from_millis(self.mount_retry_timeout_ms)
    }
}

fn check_interval(name: &str, interval_ms: u64, timeout_ms: u64) -> Result<()> {
    if interval_ms == 0 {
        return Err(GcsError::Config {
            message: format!("{name} interval must be non-zero"),
        });
    }
    if interval_ms > timeout_ms {
        return Err(GcsError::Config {
            message: format!(
                "{name} interval ({interval_ms}ms) exceeds its timeout ({timeout_ms}ms)"
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_guest_expectations() {
        let config = GcsConfig::default();
        assert_eq!(config.adapter_poll_interval(), Duration::from_millis(10));
        assert_eq!(config.adapter_timeout(), Duration::from_secs(2));
        assert_eq!(config.netns_helper, PathBuf::from("netnscfg"));
        assert_eq!(config.default_filesystem, "ext4");
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn load_fills_missing_fields_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gcs.json");
        std::fs::write(&path, r#"{ "adapter_timeout_ms": 500 }"#).expect("write");

        let config = GcsConfig::load(&path).expect("load");
        assert_eq!(config.adapter_timeout(), Duration::from_millis(500));
        assert_eq!(config.adapter_poll_interval_ms, 10);
    }

    #[test]
    fn load_rejects_interval_longer_than_timeout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("gcs.json");
        std::fs::write(
            &path,
            r#"{ "mount_retry_interval_ms": 5000, "mount_retry_timeout_ms": 100 }"#,
        )
        .expect("write");

        let err = GcsConfig::load(&path).expect_err("invalid");
        assert!(matches!(err, GcsError::Config { .. }));
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = GcsConfig::load(Path::new("/nonexistent/gcs.json")).expect_err("missing");
        assert!(err.to_string().contains("/nonexistent/gcs.json"));
    }
}
