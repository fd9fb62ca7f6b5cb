use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uniflash_hal::TableStyle;

pub const DEFAULT_BOOT_SUPPORT_URL: &str =
    "https://github.com/pbatard/rufus/raw/master/res/uefi/uefi-ntfs.img";

pub const ENV_SCRATCH_ROOT: &str = "UNIFLASH_SCRATCH_ROOT";
pub const ENV_MOUNT_ROOT: &str = "UNIFLASH_MOUNT_ROOT";
pub const ENV_BOOT_SUPPORT_URL: &str = "UNIFLASH_BOOT_SUPPORT_URL";

/// Tunables of a flash session, read from an optional TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlashSettings {
    pub boot_support_url: String,
    pub fetch_timeout_secs: u64,
    pub progress_interval_ms: u64,
    /// Parent of the per-session scratch directory; the system temp dir when unset.
    pub scratch_root: Option<PathBuf>,
    pub mount_root: PathBuf,
    pub partition_table: String,
}

impl Default for FlashSettings {
    fn default() -> Self {
        Self {
            boot_support_url: DEFAULT_BOOT_SUPPORT_URL.to_string(),
            fetch_timeout_secs: 30,
            progress_interval_ms: 50,
            scratch_root: None,
            mount_root: PathBuf::from("/media"),
            partition_table: "msdos".to_string(),
        }
    }
}

impl FlashSettings {
    /// Defaults, overlaid with `path` (if any) and then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read settings {}", path.display()))?;
                Self::from_toml_str(&text)
                    .with_context(|| format!("Invalid settings file {}", path.display()))?
            }
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(ENV_SCRATCH_ROOT).filter(|v| !v.is_empty()) {
            self.scratch_root = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup(ENV_MOUNT_ROOT).filter(|v| !v.is_empty()) {
            self.mount_root = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_BOOT_SUPPORT_URL).filter(|v| !v.is_empty()) {
            self.boot_support_url = value;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.boot_support_url)
            .with_context(|| format!("Invalid boot_support_url {:?}", self.boot_support_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("boot_support_url must be http(s): {}", url);
        }
        if self.fetch_timeout_secs == 0 {
            bail!("fetch_timeout_secs must be greater than zero");
        }
        if self.progress_interval_ms == 0 {
            bail!("progress_interval_ms must be greater than zero");
        }
        if !self.mount_root.is_absolute() {
            bail!(
                "mount_root must be an absolute path: {}",
                self.mount_root.display()
            );
        }
        self.table_style()?;
        Ok(())
    }

    pub fn table_style(&self) -> Result<TableStyle> {
        self.partition_table
            .parse()
            .map_err(|err: String| anyhow!(err))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let settings = FlashSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.table_style().unwrap(), TableStyle::Msdos);
        assert_eq!(settings.progress_interval(), Duration::from_millis(50));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let settings = FlashSettings::from_toml_str(
            "partition_table = \"gpt\"\nfetch_timeout_secs = 5\n",
        )
        .unwrap();
        assert_eq!(settings.table_style().unwrap(), TableStyle::Gpt);
        assert_eq!(settings.fetch_timeout(), Duration::from_secs(5));
        assert_eq!(settings.boot_support_url, DEFAULT_BOOT_SUPPORT_URL);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(FlashSettings::from_toml_str("dry_run = true\n").is_err());
    }

    #[test]
    fn environment_overrides_win() {
        let env: HashMap<&str, &str> = [
            (ENV_MOUNT_ROOT, "/run/uniflash"),
            (ENV_BOOT_SUPPORT_URL, "http://mirror.local/uefi-ntfs.img"),
            (ENV_SCRATCH_ROOT, ""),
        ]
        .into_iter()
        .collect();
        let mut settings = FlashSettings::default();

        settings.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.mount_root, PathBuf::from("/run/uniflash"));
        assert_eq!(settings.boot_support_url, "http://mirror.local/uefi-ntfs.img");
        assert_eq!(settings.scratch_root, None);
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut settings = FlashSettings {
            boot_support_url: "not a url".into(),
            ..FlashSettings::default()
        };
        assert!(settings.validate().is_err());

        settings.boot_support_url = "ftp://example.com/uefi-ntfs.img".into();
        assert!(settings.validate().is_err());

        settings = FlashSettings {
            progress_interval_ms: 0,
            ..FlashSettings::default()
        };
        assert!(settings.validate().is_err());

        settings = FlashSettings {
            partition_table: "apm".into(),
            ..FlashSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("uniflash.toml");
        fs::write(&path, "mount_root = \"/mnt/uniflash\"\n").unwrap();

        let settings = FlashSettings::load(Some(&path)).unwrap();

        assert!(settings.mount_root.is_absolute());
        assert!(FlashSettings::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
