//! HAL trait definitions and implementations.
//!
//! This module defines the device capability traits the flash pipeline calls and provides
//! both real (LinuxHal) and fake (FakeHal) implementations.

pub mod copy_ops;
pub mod fake_hal;
pub mod flash_ops;
pub mod format_ops;
pub mod linux_hal;
pub mod mount_ops;
pub mod partition_ops;
pub mod probe_ops;
pub mod process_ops;
pub mod system_ops;

pub use copy_ops::{CopyOps, CopyOptions};
pub use fake_hal::{FakeHal, Operation, OperationKind};
pub use flash_ops::FlashOps;
pub use format_ops::{DiskOptions, FilesystemType, FormatOps, FAT32_MAX_FILE_SIZE};
pub use linux_hal::LinuxHal;
pub use mount_ops::{MountOps, MountOptions};
pub use partition_ops::{PartitionOps, PartitionSpec, TableStyle, BOOT_SUPPORT_SECTORS};
pub use probe_ops::ProbeOps;
pub use process_ops::ProcessOps;
pub use system_ops::SystemOps;

/// Complete device capability combining all operation traits.
pub trait DiskOps:
    MountOps
    + PartitionOps
    + FormatOps
    + ProbeOps
    + SystemOps
    + FlashOps
    + CopyOps
    + ProcessOps
    + Send
    + Sync
{
}

/// Automatically implement DiskOps for any type implementing all required traits.
impl<T> DiskOps for T where
    T: MountOps
        + PartitionOps
        + FormatOps
        + ProbeOps
        + SystemOps
        + FlashOps
        + CopyOps
        + ProcessOps
        + Send
        + Sync
{
}
