//! Fake HAL implementation for testing.
//!
//! This implementation records all operations without touching devices,
//! allowing for CI-safe testing without root privileges or real hardware.
//! Failures can be injected per operation kind or per mount source.

use super::{
    CopyOps, CopyOptions, DiskOptions, FilesystemType, FlashOps, FormatOps, MountOps, MountOptions,
    PartitionOps, PartitionSpec, ProbeOps, ProcessOps, SystemOps, TableStyle,
};
use crate::{HalError, HalResult};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use walkdir::WalkDir;

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Mount {
        source: PathBuf,
        target: PathBuf,
        options: MountOptions,
    },
    Unmount {
        target: PathBuf,
    },
    DetectPartition {
        disk: PathBuf,
    },
    WipeSignatures {
        device: PathBuf,
    },
    CreatePartitionTable {
        disk: PathBuf,
        style: TableStyle,
    },
    CreatePartition {
        disk: PathBuf,
        spec: PartitionSpec,
    },
    Format {
        partition: PathBuf,
        filesystem: FilesystemType,
        label: String,
    },
    SetBootFlag {
        disk: PathBuf,
        part_num: u32,
    },
    RereadPartitionTable {
        disk: PathBuf,
    },
    FlashImage {
        image: PathBuf,
        target: PathBuf,
    },
    CopyFile {
        src: PathBuf,
        dst: PathBuf,
    },
    Sync,
    MountedPartitions {
        disk: PathBuf,
    },
    LsblkTable {
        disk: PathBuf,
    },
    Command {
        program: String,
        args: Vec<String>,
    },
}

/// Discriminant of [`Operation`], used for failure injection and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Mount,
    Unmount,
    DetectPartition,
    WipeSignatures,
    CreatePartitionTable,
    CreatePartition,
    Format,
    SetBootFlag,
    RereadPartitionTable,
    FlashImage,
    CopyFile,
    Sync,
    MountedPartitions,
    LsblkTable,
    Command,
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Mount { .. } => OperationKind::Mount,
            Operation::Unmount { .. } => OperationKind::Unmount,
            Operation::DetectPartition { .. } => OperationKind::DetectPartition,
            Operation::WipeSignatures { .. } => OperationKind::WipeSignatures,
            Operation::CreatePartitionTable { .. } => OperationKind::CreatePartitionTable,
            Operation::CreatePartition { .. } => OperationKind::CreatePartition,
            Operation::Format { .. } => OperationKind::Format,
            Operation::SetBootFlag { .. } => OperationKind::SetBootFlag,
            Operation::RereadPartitionTable { .. } => OperationKind::RereadPartitionTable,
            Operation::FlashImage { .. } => OperationKind::FlashImage,
            Operation::CopyFile { .. } => OperationKind::CopyFile,
            Operation::Sync => OperationKind::Sync,
            Operation::MountedPartitions { .. } => OperationKind::MountedPartitions,
            Operation::LsblkTable { .. } => OperationKind::LsblkTable,
            Operation::Command { .. } => OperationKind::Command,
        }
    }

    /// Whether the operation modifies the device layout or contents.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self.kind(),
            OperationKind::WipeSignatures
                | OperationKind::CreatePartitionTable
                | OperationKind::CreatePartition
                | OperationKind::Format
                | OperationKind::SetBootFlag
                | OperationKind::FlashImage
        )
    }
}

/// Shared state for FakeHal operations.
#[derive(Debug, Default)]
struct FakeHalState {
    /// All operations that were recorded
    operations: Vec<Operation>,
    /// Currently mounted paths
    mounted_paths: HashSet<PathBuf>,
    failing_kinds: HashSet<OperationKind>,
    failing_mount_sources: HashSet<PathBuf>,
    /// Mount source -> directory whose layout appears at the mount point
    source_trees: HashMap<PathBuf, PathBuf>,
    has_partitions: bool,
    /// Device -> mount points reported as in use on it
    busy_mounts: HashMap<PathBuf, Vec<PathBuf>>,
    command_stdout: Vec<u8>,
}

/// Fake HAL implementation that records operations without executing them.
///
/// Mounting a source registered with [`FakeHal::with_source_tree`] materialises that tree at
/// the mount point as sparse files of identical size, so size analysis and copying see
/// realistic metadata without real data.
#[derive(Debug, Clone, Default)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
}

impl FakeHal {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeHalState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state().operations.clone()
    }

    /// Get the number of operations recorded.
    pub fn operation_count(&self) -> usize {
        self.state().operations.len()
    }

    /// Number of recorded operations of one kind.
    pub fn count(&self, kind: OperationKind) -> usize {
        self.state()
            .operations
            .iter()
            .filter(|op| op.kind() == kind)
            .count()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state().operations.iter().any(check)
    }

    /// Clear all recorded operations.
    pub fn clear(&self) {
        let mut state = self.state();
        state.operations.clear();
        state.mounted_paths.clear();
    }

    /// Make every operation of `kind` fail after being recorded.
    pub fn fail_on(&self, kind: OperationKind) -> &Self {
        self.state().failing_kinds.insert(kind);
        self
    }

    /// Make mounting `source` fail.
    pub fn fail_mount_of(&self, source: impl Into<PathBuf>) -> &Self {
        self.state().failing_mount_sources.insert(source.into());
        self
    }

    /// Expose the layout of `tree` whenever `source` is mounted.
    pub fn with_source_tree(&self, source: impl Into<PathBuf>, tree: impl Into<PathBuf>) -> &Self {
        self.state()
            .source_trees
            .insert(source.into(), tree.into());
        self
    }

    pub fn with_existing_partition(&self, present: bool) -> &Self {
        self.state().has_partitions = present;
        self
    }

    /// Pretend the target already has these mount points.
    /// Report `mounts` as in use on `disk` until they are unmounted.
    pub fn with_mounted_partitions(
        &self,
        disk: impl Into<PathBuf>,
        mounts: Vec<PathBuf>,
    ) -> &Self {
        self.state().busy_mounts.insert(disk.into(), mounts);
        self
    }

    /// Stdout returned by every external command.
    pub fn with_command_output(&self, stdout: impl Into<Vec<u8>>) -> &Self {
        self.state().command_stdout = stdout.into();
        self
    }

    fn record_operation(&self, op: Operation) -> HalResult<()> {
        let mut state = self.state();
        let injected = state.failing_kinds.contains(&op.kind());
        let description = format!("{:?}", op.kind());
        state.operations.push(op);
        if injected {
            return Err(HalError::Other(format!(
                "injected failure: {}",
                description
            )));
        }
        Ok(())
    }

    fn check_confirmed(opts: &DiskOptions) -> HalResult<()> {
        if !opts.confirmed {
            return Err(HalError::SafetyLock);
        }
        Ok(())
    }
}

fn materialize_tree(tree: &Path, target: &Path) -> HalResult<()> {
    for entry in WalkDir::new(tree).min_depth(1) {
        let entry = entry.map_err(|e| HalError::Other(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(tree)
            .map_err(|e| HalError::Other(e.to_string()))?;
        let dest = target.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            let len = entry.metadata().map_err(|e| HalError::Other(e.to_string()))?.len();
            fs::File::create(&dest)?.set_len(len)?;
        }
    }
    Ok(())
}

fn clear_dir(dir: &Path) -> HalResult<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

impl MountOps for FakeHal {
    fn mount(&self, source: &Path, target: &Path, options: &MountOptions) -> HalResult<()> {
        log::info!(
            "FAKE HAL: mount {} -> {} ({:?})",
            source.display(),
            target.display(),
            options
        );

        self.record_operation(Operation::Mount {
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            options: options.clone(),
        })?;

        let tree = {
            let state = self.state();
            if state.failing_mount_sources.contains(source) {
                return Err(HalError::Other(format!(
                    "injected mount failure: {}",
                    source.display()
                )));
            }
            state.source_trees.get(source).cloned()
        };

        if let Some(tree) = tree {
            materialize_tree(&tree, target)?;
        }
        self.state().mounted_paths.insert(target.to_path_buf());
        Ok(())
    }

    fn unmount(&self, target: &Path) -> HalResult<()> {
        log::info!("FAKE HAL: unmount {}", target.display());

        self.record_operation(Operation::Unmount {
            target: target.to_path_buf(),
        })?;

        let was_mounted = {
            let mut state = self.state();
            for mounts in state.busy_mounts.values_mut() {
                mounts.retain(|mp| mp != target);
            }
            state.mounted_paths.remove(target)
        };
        // Unmounting hides whatever the fake filesystem held.
        if was_mounted {
            clear_dir(target)?;
        }
        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        Ok(self.state().mounted_paths.contains(path))
    }
}

impl FormatOps for FakeHal {
    fn format(
        &self,
        partition: &Path,
        filesystem: FilesystemType,
        label: &str,
        opts: &DiskOptions,
    ) -> HalResult<()> {
        Self::check_confirmed(opts)?;
        log::info!(
            "FAKE HAL: mkfs {} {} ({})",
            filesystem,
            partition.display(),
            label
        );
        self.record_operation(Operation::Format {
            partition: partition.to_path_buf(),
            filesystem,
            label: label.to_string(),
        })
    }
}

impl PartitionOps for FakeHal {
    fn detect_existing_partition(&self, disk: &Path) -> HalResult<bool> {
        self.record_operation(Operation::DetectPartition {
            disk: disk.to_path_buf(),
        })?;
        Ok(self.state().has_partitions)
    }

    fn wipe_signatures(&self, device: &Path, opts: &DiskOptions) -> HalResult<()> {
        Self::check_confirmed(opts)?;
        self.record_operation(Operation::WipeSignatures {
            device: device.to_path_buf(),
        })
    }

    fn create_partition_table(
        &self,
        disk: &Path,
        style: TableStyle,
        opts: &DiskOptions,
    ) -> HalResult<()> {
        Self::check_confirmed(opts)?;
        self.record_operation(Operation::CreatePartitionTable {
            disk: disk.to_path_buf(),
            style,
        })?;
        self.state().has_partitions = false;
        Ok(())
    }

    fn create_partition(
        &self,
        disk: &Path,
        spec: &PartitionSpec,
        opts: &DiskOptions,
    ) -> HalResult<PathBuf> {
        Self::check_confirmed(opts)?;
        self.record_operation(Operation::CreatePartition {
            disk: disk.to_path_buf(),
            spec: spec.clone(),
        })?;
        self.state().has_partitions = true;
        Ok(crate::path::partition_path(disk, spec.number))
    }

    fn set_boot_flag(&self, disk: &Path, part_num: u32, opts: &DiskOptions) -> HalResult<()> {
        Self::check_confirmed(opts)?;
        self.record_operation(Operation::SetBootFlag {
            disk: disk.to_path_buf(),
            part_num,
        })
    }
}

impl ProbeOps for FakeHal {
    fn mounted_partitions(&self, disk: &Path) -> HalResult<Vec<PathBuf>> {
        self.record_operation(Operation::MountedPartitions {
            disk: disk.to_path_buf(),
        })?;
        Ok(self
            .state()
            .busy_mounts
            .get(disk)
            .cloned()
            .unwrap_or_default())
    }

    fn lsblk_table(&self, disk: &Path) -> HalResult<String> {
        self.record_operation(Operation::LsblkTable {
            disk: disk.to_path_buf(),
        })?;
        Ok(String::new())
    }
}

impl SystemOps for FakeHal {
    fn sync(&self) -> HalResult<()> {
        self.record_operation(Operation::Sync)
    }

    fn reread_partition_table(&self, disk: &Path) -> HalResult<()> {
        self.record_operation(Operation::RereadPartitionTable {
            disk: disk.to_path_buf(),
        })
    }
}

impl FlashOps for FakeHal {
    fn flash_raw_image(
        &self,
        image_path: &Path,
        target: &Path,
        opts: &DiskOptions,
    ) -> HalResult<()> {
        Self::check_confirmed(opts)?;
        log::info!(
            "FAKE HAL: write {} -> {}",
            image_path.display(),
            target.display()
        );
        self.record_operation(Operation::FlashImage {
            image: image_path.to_path_buf(),
            target: target.to_path_buf(),
        })
    }
}

impl CopyOps for FakeHal {
    fn copy_file(&self, src: &Path, dst: &Path, _opts: &CopyOptions) -> HalResult<u64> {
        self.record_operation(Operation::CopyFile {
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
        })?;
        // Same size, no data: keeps multi-GiB fixtures cheap.
        let len = fs::metadata(src)?.len();
        fs::File::create(dst)?.set_len(len)?;
        Ok(len)
    }
}

impl ProcessOps for FakeHal {
    fn command_stdout(
        &self,
        program: &str,
        args: &[String],
        _timeout: Duration,
    ) -> HalResult<Vec<u8>> {
        self.record_operation(Operation::Command {
            program: program.to_string(),
            args: args.to_vec(),
        })?;
        Ok(self.state().command_stdout.clone())
    }
}
