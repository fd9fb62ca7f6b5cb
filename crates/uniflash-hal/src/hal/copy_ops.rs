//! Native single-file copy used by the file copier.

use crate::HalResult;
use std::path::Path;

/// Options controlling how files are copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOptions {
    /// Preserve access and modification times.
    pub preserve_times: bool,
}

impl CopyOptions {
    pub fn preserving_times() -> Self {
        Self {
            preserve_times: true,
        }
    }
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self::preserving_times()
    }
}

/// Copy operations abstraction.
pub trait CopyOps {
    /// Copy one regular file, creating or truncating `dst`. Returns bytes written.
    fn copy_file(&self, src: &Path, dst: &Path, opts: &CopyOptions) -> HalResult<u64>;
}
