//! System-level operations (sync, partition table rescan).

use crate::HalResult;
use std::path::Path;

/// System operations trait.
pub trait SystemOps {
    /// Best-effort filesystem sync.
    fn sync(&self) -> HalResult<()>;

    /// Make the kernel re-read the partition table of `disk` and wait for udev to settle.
    fn reread_partition_table(&self, disk: &Path) -> HalResult<()>;
}
