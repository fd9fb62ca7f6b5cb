//! Device probing operations.

use crate::HalResult;
use std::path::{Path, PathBuf};

/// Probing operations trait.
pub trait ProbeOps {
    /// Mount points of the disk or any of its partitions.
    fn mounted_partitions(&self, disk: &Path) -> HalResult<Vec<PathBuf>>;

    /// Return a human-readable lsblk table for diagnostics.
    fn lsblk_table(&self, disk: &Path) -> HalResult<String>;
}
