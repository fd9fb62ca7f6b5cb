//! UniFlash hardware abstraction layer.
//!
//! Every destructive or world-touching device operation the flash pipeline performs goes
//! through the traits in [`hal`], so the pipeline can run against [`FakeHal`] in tests.

pub mod hal;
pub mod path;
pub mod procfs;

pub use hal::*;
pub use uniflash_error::{HalError, HalResult};
