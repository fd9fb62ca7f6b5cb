//! UniFlash core: writes bootable installation media onto USB storage.
//!
//! The [`pipeline::FlashPipeline`] sequences device preparation, file copy and boot-support
//! post-processing against a [`uniflash_hal::DiskOps`] implementation, reporting through a
//! caller-owned [`status::StatusSink`].

pub mod analyze;
pub mod boot_support;
pub mod config;
pub mod copier;
pub mod efi_loader;
pub mod logging;
pub mod pipeline;
pub mod preflight;
pub mod progress;
pub mod request;
pub mod status;

pub use pipeline::{
    CleanupManager, FlashContext, FlashPipeline, FlashReport, FlashWarning, Outcome,
    PipelineHandle, Stage, StageEvent,
};
pub use request::{FlashRequest, InstallMode, TargetAddress};
pub use status::{CancelToken, ChannelObserver, Severity, StatusMessage, StatusObserver, StatusSink};
pub use uniflash_error::{DeviceStep, FlashError, FlashResult, HalError};
