use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use uniflash_core::{FlashRequest, InstallMode};
use uniflash_hal::FilesystemType;

#[derive(Parser, Debug)]
#[command(name = "uniflash", author, version, about = "Write Windows installation media to USB drives")]
pub struct Cli {
    /// Debug logging (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Settings file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Append log records to this file instead of stderr
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check required tools and privileges
    Preflight,
    /// Erase the target and write the installation media onto it
    Flash(FlashArgs),
}

#[derive(Args, Debug)]
pub struct FlashArgs {
    /// ISO image or block device holding the installation media
    #[arg(long)]
    pub source: PathBuf,

    /// Target device (/dev/sdb, X:) or partition (/dev/sdb1, X:\)
    #[arg(long)]
    pub target: String,

    /// whole-device or single-partition
    #[arg(long, default_value = "whole-device")]
    pub mode: InstallMode,

    /// fat32 or ntfs; FAT32 switches to NTFS when a file is too large for it
    #[arg(long = "fs", default_value = "fat32")]
    pub filesystem: FilesystemType,

    /// Volume label of the new filesystem
    #[arg(long, default_value = "UNIFLASH")]
    pub label: String,

    /// Do not mark the data partition bootable
    #[arg(long)]
    pub no_boot_flag: bool,

    /// Unmount partitions of the target that are in use
    #[arg(long)]
    pub auto_unmount: bool,

    /// Confirm that everything on the target will be destroyed
    #[arg(long)]
    pub yes_i_know: bool,

    /// Do not check for required tools and root privileges first
    #[arg(long)]
    pub skip_preflight: bool,
}

impl FlashArgs {
    pub fn to_request(&self) -> FlashRequest {
        let request = FlashRequest::new(
            &self.source,
            &self.target,
            self.mode,
            self.filesystem,
            &self.label,
        )
        .with_boot_flag(!self.no_boot_flag)
        .with_auto_unmount(self.auto_unmount);
        if self.yes_i_know {
            request.confirmed()
        } else {
            request
        }
    }
}
