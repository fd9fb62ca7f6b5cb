//! Filesystem formatting operations trait.

use crate::HalResult;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Largest file FAT32 can address: 4 GiB - 1 byte.
pub const FAT32_MAX_FILE_SIZE: u64 = (1 << 32) - 1;

/// Filesystems the target data partition can be created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilesystemType {
    Fat32,
    Ntfs,
}

impl FilesystemType {
    /// Filesystem name as understood by `parted mkpart`.
    pub fn parted_name(&self) -> &'static str {
        match self {
            FilesystemType::Fat32 => "fat32",
            FilesystemType::Ntfs => "ntfs",
        }
    }

    /// Filesystem type passed to mount(8).
    pub fn mount_type(&self) -> &'static str {
        match self {
            FilesystemType::Fat32 => "vfat",
            FilesystemType::Ntfs => "ntfs-3g",
        }
    }

    pub fn max_label_len(&self) -> usize {
        match self {
            FilesystemType::Fat32 => 11,
            FilesystemType::Ntfs => 32,
        }
    }

    /// Largest single file the filesystem can store, if bounded.
    pub fn max_file_size(&self) -> Option<u64> {
        match self {
            FilesystemType::Fat32 => Some(FAT32_MAX_FILE_SIZE),
            FilesystemType::Ntfs => None,
        }
    }

    /// Truncate a label to what the filesystem accepts.
    pub fn fit_label(&self, label: &str) -> String {
        label.chars().take(self.max_label_len()).collect()
    }
}

impl fmt::Display for FilesystemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilesystemType::Fat32 => write!(f, "FAT32"),
            FilesystemType::Ntfs => write!(f, "NTFS"),
        }
    }
}

impl FromStr for FilesystemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fat" | "fat32" | "vfat" => Ok(FilesystemType::Fat32),
            "ntfs" => Ok(FilesystemType::Ntfs),
            other => Err(format!("unsupported filesystem type: {}", other)),
        }
    }
}

/// Options shared by all destructive device operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskOptions {
    /// If true, the user has confirmed the destructive operation.
    pub confirmed: bool,
}

impl DiskOptions {
    pub fn new(confirmed: bool) -> Self {
        Self { confirmed }
    }

    pub fn confirmed() -> Self {
        Self { confirmed: true }
    }
}

/// Trait for creating filesystems on block devices.
pub trait FormatOps {
    /// Create a filesystem of type `filesystem` on `partition`.
    ///
    /// # Arguments
    /// * `partition` - Partition node (e.g., `/dev/sdb1`)
    /// * `label` - Volume label; callers should fit it with [`FilesystemType::fit_label`]
    fn format(
        &self,
        partition: &Path,
        filesystem: FilesystemType,
        label: &str,
        opts: &DiskOptions,
    ) -> HalResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_spellings() {
        assert_eq!("FAT32".parse::<FilesystemType>(), Ok(FilesystemType::Fat32));
        assert_eq!("fat".parse::<FilesystemType>(), Ok(FilesystemType::Fat32));
        assert_eq!("ntfs".parse::<FilesystemType>(), Ok(FilesystemType::Ntfs));
        assert!("exfat".parse::<FilesystemType>().is_err());
    }

    #[test]
    fn fat32_labels_are_truncated() {
        assert_eq!(FilesystemType::Fat32.fit_label("WINDOWS10INSTALL"), "WINDOWS10IN");
        assert_eq!(FilesystemType::Ntfs.fit_label("WINDOWS10INSTALL"), "WINDOWS10INSTALL");
    }

    #[test]
    fn only_fat32_limits_file_size() {
        assert_eq!(FilesystemType::Fat32.max_file_size(), Some(4_294_967_295));
        assert_eq!(FilesystemType::Ntfs.max_file_size(), None);
    }
}
