use anyhow::{bail, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Programs the Linux device layer shells out to.
pub const REQUIRED_BINARIES: &[&str] = &[
    "mount",
    "lsblk",
    "wipefs",
    "parted",
    "mkfs.vfat",
    "mkntfs",
    "ntfs-3g",
    "partprobe",
    "udevadm",
    "sync",
];

/// Needed only for the Windows 7 UEFI loader workaround.
pub const OPTIONAL_BINARIES: &[&str] = &["7z"];

#[derive(Debug, Clone)]
pub struct PreflightConfig {
    pub required_binaries: Vec<String>,
    pub optional_binaries: Vec<String>,
    pub path_env: String,
    pub require_root: bool,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        let path_env = std::env::var("PATH").unwrap_or_default();
        Self {
            required_binaries: REQUIRED_BINARIES.iter().map(|b| b.to_string()).collect(),
            optional_binaries: OPTIONAL_BINARIES.iter().map(|b| b.to_string()).collect(),
            path_env,
            require_root: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreflightReport {
    pub missing_optional: Vec<String>,
}

pub fn run() -> Result<PreflightReport> {
    run_with(&PreflightConfig::default())
}

pub fn run_with(cfg: &PreflightConfig) -> Result<PreflightReport> {
    log::info!("Preflight checks");

    if cfg.require_root {
        check_privileges()?;
    }
    check_binaries(cfg)?;

    let missing_optional: Vec<String> = cfg
        .optional_binaries
        .iter()
        .filter(|bin| find_executable_in_path(bin, &cfg.path_env).is_none())
        .cloned()
        .collect();
    for bin in &missing_optional {
        log::warn!("Optional tool {} not found; some boot workarounds are unavailable", bin);
    }

    log::info!("Preflight checks passed");
    Ok(PreflightReport { missing_optional })
}

fn check_privileges() -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        bail!("Writing to block devices requires root privileges");
    }
    Ok(())
}

fn check_binaries(cfg: &PreflightConfig) -> Result<()> {
    let missing: Vec<&str> = cfg
        .required_binaries
        .iter()
        .filter(|bin| find_executable_in_path(bin, &cfg.path_env).is_none())
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        bail!("Missing required tools: {}", missing.join(", "));
    }
    Ok(())
}

fn find_executable_in_path(binary: &str, path_env: &str) -> Option<PathBuf> {
    for dir in path_env.split(':').filter(|dir| !dir.is_empty()) {
        let candidate = Path::new(dir).join(binary);
        if let Ok(metadata) = fs::metadata(&candidate) {
            if metadata.is_file() && metadata.permissions().mode() & 0o111 != 0 {
                return Some(candidate);
            }
        }
    }
    None
}
