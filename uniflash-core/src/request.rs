//! Flash request parameters and target resolution.

use std::fmt;
use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use regex::Regex;
use uniflash_error::{FlashError, FlashResult};
use uniflash_hal::path::partition_path;
use uniflash_hal::FilesystemType;

/// Longest label any supported filesystem accepts.
pub const MAX_LABEL_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstallMode {
    /// Repartition the whole device.
    #[default]
    WholeDevice,
    /// Reformat one existing partition and leave the rest of the device alone.
    SinglePartition,
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallMode::WholeDevice => write!(f, "whole-device"),
            InstallMode::SinglePartition => write!(f, "single-partition"),
        }
    }
}

impl FromStr for InstallMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "whole-device" | "device" | "disk" => Ok(InstallMode::WholeDevice),
            "single-partition" | "partition" => Ok(InstallMode::SinglePartition),
            other => Err(format!("unknown install mode: {}", other)),
        }
    }
}

/// Immutable input of one flash operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashRequest {
    /// Installation image or optical drive node.
    pub source: PathBuf,
    pub target: String,
    pub mode: InstallMode,
    pub filesystem: FilesystemType,
    pub label: String,
    pub boot_flag: bool,
    /// Unmount busy target partitions instead of refusing.
    pub auto_unmount: bool,
    /// The caller acknowledged that the target will be erased.
    pub confirmed: bool,
}

impl FlashRequest {
    pub fn new(
        source: impl Into<PathBuf>,
        target: impl Into<String>,
        mode: InstallMode,
        filesystem: FilesystemType,
        label: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            mode,
            filesystem,
            label: label.into(),
            boot_flag: true,
            auto_unmount: false,
            confirmed: false,
        }
    }

    pub fn with_boot_flag(mut self, boot_flag: bool) -> Self {
        self.boot_flag = boot_flag;
        self
    }

    pub fn with_auto_unmount(mut self, auto_unmount: bool) -> Self {
        self.auto_unmount = auto_unmount;
        self
    }

    pub fn confirmed(mut self) -> Self {
        self.confirmed = true;
        self
    }
}

/// Where the data ends up: the device to partition and the data partition on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    pub device: PathBuf,
    pub partition: PathBuf,
}

impl TargetAddress {
    /// Node that busy checks and signature wipes apply to in `mode`.
    pub fn scope(&self, mode: InstallMode) -> &Path {
        match mode {
            InstallMode::WholeDevice => &self.device,
            InstallMode::SinglePartition => &self.partition,
        }
    }
}

const DISK_NAMES: &str = r"sd[a-z]+|vd[a-z]+|hd[a-z]+|nvme\d+n\d+|mmcblk\d+|loop\d+";

fn regex(pattern: &str) -> FlashResult<Regex> {
    Regex::new(pattern).map_err(|err| FlashError::Internal(err.to_string()))
}

/// Resolve `target` into device and data partition for `mode`.
///
/// Drive letters (`X:` for a device, `X:\` for a partition) and Linux block nodes are accepted.
pub fn resolve_target(target: &str, mode: InstallMode) -> FlashResult<TargetAddress> {
    match mode {
        InstallMode::WholeDevice => {
            let letter = regex(r"^[A-Z]:$")?;
            let node = regex(&format!(r"^/dev/(?:{})$", DISK_NAMES))?;
            if letter.is_match(target) || node.is_match(target) {
                let device = PathBuf::from(target);
                let partition = partition_path(&device, 1);
                return Ok(TargetAddress { device, partition });
            }
            Err(FlashError::InvalidInput(format!(
                "target {:?} is not a device (expected e.g. X: or /dev/sdb)",
                target
            )))
        }
        InstallMode::SinglePartition => {
            let letter = regex(r"^([A-Z]:)\\$")?;
            if let Some(caps) = letter.captures(target) {
                return Ok(TargetAddress {
                    device: PathBuf::from(&caps[1]),
                    partition: PathBuf::from(target),
                });
            }
            let plain = regex(r"^(/dev/(?:sd[a-z]+|vd[a-z]+|hd[a-z]+))\d+$")?;
            let postfixed = regex(r"^(/dev/(?:nvme\d+n\d+|mmcblk\d+|loop\d+))p\d+$")?;
            if let Some(caps) = plain
                .captures(target)
                .or_else(|| postfixed.captures(target))
            {
                return Ok(TargetAddress {
                    device: PathBuf::from(&caps[1]),
                    partition: PathBuf::from(target),
                });
            }
            Err(FlashError::InvalidInput(format!(
                "target {:?} is not a partition (expected e.g. X:\\ or /dev/sdb1)",
                target
            )))
        }
    }
}

/// The source must be an existing, readable regular file or block device.
pub fn validate_source(source: &Path) -> FlashResult<()> {
    let meta = fs::metadata(source).map_err(|err| {
        FlashError::InvalidInput(format!("source {} is unusable: {}", source.display(), err))
    })?;
    let file_type = meta.file_type();
    if !(file_type.is_file() || file_type.is_block_device()) {
        return Err(FlashError::InvalidInput(format!(
            "source {} is neither an image file nor a block device",
            source.display()
        )));
    }
    fs::File::open(source).map_err(|err| {
        FlashError::InvalidInput(format!("source {} is not readable: {}", source.display(), err))
    })?;
    Ok(())
}

pub fn validate_label(label: &str) -> FlashResult<()> {
    if label.trim().is_empty() {
        return Err(FlashError::InvalidInput("filesystem label is empty".into()));
    }
    if label.chars().count() > MAX_LABEL_LEN {
        return Err(FlashError::InvalidInput(format!(
            "filesystem label {:?} is longer than {} characters",
            label, MAX_LABEL_LEN
        )));
    }
    if label.chars().any(char::is_control) {
        return Err(FlashError::InvalidInput(
            "filesystem label contains control characters".into(),
        ));
    }
    Ok(())
}

/// Whether the source is an image that needs a loop mount.
pub fn is_image_file(source: &Path) -> bool {
    fs::metadata(source).map(|m| m.is_file()).unwrap_or(false)
}
