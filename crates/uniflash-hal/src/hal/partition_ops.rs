//! Partitioning operations (wipefs/parted).

use super::{DiskOptions, FilesystemType};
use crate::HalResult;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Size of the UEFI:NTFS support partition, in 512-byte sectors (1 MiB).
pub const BOOT_SUPPORT_SECTORS: u64 = 2048;

/// Partition table style written by [`PartitionOps::create_partition_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TableStyle {
    /// MBR, the "legacy" layout; boots on BIOS and UEFI firmware.
    #[default]
    Msdos,
    Gpt,
}

impl TableStyle {
    pub fn parted_label(&self) -> &'static str {
        match self {
            TableStyle::Msdos => "msdos",
            TableStyle::Gpt => "gpt",
        }
    }
}

impl fmt::Display for TableStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableStyle::Msdos => write!(f, "MBR"),
            TableStyle::Gpt => write!(f, "GPT"),
        }
    }
}

impl FromStr for TableStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "msdos" | "mbr" | "legacy" => Ok(TableStyle::Msdos),
            "gpt" => Ok(TableStyle::Gpt),
            other => Err(format!("unsupported partition table style: {}", other)),
        }
    }
}

/// One partition to create with `parted mkpart`.
///
/// `start`/`end` use parted unit syntax; negative sector values count from the end of the disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    pub number: u32,
    /// Filesystem to create after the partition exists; `None` leaves it raw.
    pub filesystem: Option<FilesystemType>,
    pub label: Option<String>,
    pub start: String,
    pub end: String,
}

impl PartitionSpec {
    /// The data partition. NTFS leaves room at the tail for the UEFI:NTFS partition.
    pub fn data(filesystem: FilesystemType, label: &str) -> Self {
        let end = match filesystem {
            FilesystemType::Ntfs => format!("-{}s", BOOT_SUPPORT_SECTORS + 1),
            FilesystemType::Fat32 => "100%".to_string(),
        };
        Self {
            number: 1,
            filesystem: Some(filesystem),
            label: Some(filesystem.fit_label(label)),
            start: "4MiB".to_string(),
            end,
        }
    }

    /// The small raw partition that receives the UEFI:NTFS image.
    pub fn boot_support() -> Self {
        Self {
            number: 2,
            filesystem: None,
            label: None,
            start: format!("-{}s", BOOT_SUPPORT_SECTORS),
            end: "-1s".to_string(),
        }
    }

    /// Filesystem hint for the partition table entry.
    pub fn parted_fs_type(&self) -> &'static str {
        match self.filesystem {
            Some(fs) => fs.parted_name(),
            None => "fat16",
        }
    }
}

pub trait PartitionOps {
    /// Whether the device already carries at least one partition.
    fn detect_existing_partition(&self, disk: &Path) -> HalResult<bool>;

    /// Destroy partition-table and filesystem signatures (`wipefs -a`).
    fn wipe_signatures(&self, device: &Path, opts: &DiskOptions) -> HalResult<()>;

    /// Write a fresh, empty partition table.
    fn create_partition_table(
        &self,
        disk: &Path,
        style: TableStyle,
        opts: &DiskOptions,
    ) -> HalResult<()>;

    /// Create a partition and, if the spec names one, its filesystem.
    ///
    /// Returns the partition node.
    fn create_partition(
        &self,
        disk: &Path,
        spec: &PartitionSpec,
        opts: &DiskOptions,
    ) -> HalResult<PathBuf>;

    /// Toggle the boot flag on `part_num`.
    fn set_boot_flag(&self, disk: &Path, part_num: u32, opts: &DiskOptions) -> HalResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ntfs_data_partition_reserves_tail() {
        let spec = PartitionSpec::data(FilesystemType::Ntfs, "USB");
        assert_eq!(spec.end, "-2049s");
        let support = PartitionSpec::boot_support();
        assert_eq!(support.start, "-2048s");
        assert_eq!(support.number, 2);
        assert_eq!(support.parted_fs_type(), "fat16");
    }

    #[test]
    fn fat32_data_partition_fills_disk_and_fits_label() {
        let spec = PartitionSpec::data(FilesystemType::Fat32, "WINDOWS10INSTALL");
        assert_eq!(spec.end, "100%");
        assert_eq!(spec.label.as_deref(), Some("WINDOWS10IN"));
    }

    #[test]
    fn table_style_parses_legacy_alias() {
        assert_eq!("legacy".parse::<TableStyle>(), Ok(TableStyle::Msdos));
        assert_eq!("GPT".parse::<TableStyle>(), Ok(TableStyle::Gpt));
        assert!("apm".parse::<TableStyle>().is_err());
    }
}
