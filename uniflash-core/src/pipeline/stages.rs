//! One handler per pipeline stage.

use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::Builder as TempDirBuilder;
use uniflash_error::{DeviceStep, FlashError, FlashResult, HalError};
use uniflash_hal::{
    DiskOptions, FilesystemType, FlashOps, FormatOps, MountOps, MountOptions, PartitionOps,
    PartitionSpec, ProbeOps, SystemOps,
};

use super::report::FlashWarning;
use super::session::{FlashSession, MountPoint};
use super::stage::{Stage, StageEvent};
use super::FlashPipeline;
use crate::analyze::analyze_source;
use crate::copier::{CopyOutcome, FileCopier};
use crate::efi_loader;
use crate::request::{self, FlashRequest, InstallMode};

const SCRATCH_PREFIX: &str = "UniFlash.";

fn device_failed(step: DeviceStep) -> impl FnOnce(HalError) -> FlashError {
    move |cause| FlashError::DeviceModificationFailed { step, cause }
}

impl FlashPipeline {
    pub(super) fn run_stage(
        &self,
        stage: Stage,
        session: &mut FlashSession,
        request: &FlashRequest,
    ) -> FlashResult<StageEvent> {
        match stage {
            Stage::Idle => self.prepare_scratch(session),
            Stage::ValidatingInput => self.validate_input(session, request),
            Stage::MountingSource => self.mount_source(session, request),
            Stage::AnalyzingSource => self.analyze(session),
            Stage::FormattingTarget => self.prepare_device(session, request),
            Stage::WipingTarget => self.wipe(session, request),
            Stage::PartitioningTarget => self.write_partition_table(session, request),
            Stage::CreatingFilesystem => self.create_filesystem(session, request),
            Stage::MountingTarget => self.mount_target(session),
            Stage::Copying => self.copy_files(session),
            Stage::PostProcessing => self.install_boot_support(session, request),
            Stage::CleaningUp | Stage::Terminated(_) => Err(FlashError::Internal(format!(
                "{} is not a working stage",
                stage
            ))),
        }
    }

    fn prepare_scratch(&self, session: &mut FlashSession) -> FlashResult<StageEvent> {
        let root = self.ctx.settings.scratch_root();
        let scratch = TempDirBuilder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&root)?;
        log::debug!("scratch directory {}", scratch.path().display());
        session.scratch = Some(scratch);
        Ok(StageEvent::Completed)
    }

    fn validate_input(
        &self,
        session: &mut FlashSession,
        request: &FlashRequest,
    ) -> FlashResult<StageEvent> {
        if !request.confirmed {
            return Err(FlashError::InvalidInput(
                "refusing to erase the target without confirmation".into(),
            ));
        }
        request::validate_source(&request.source)?;
        request::validate_label(&request.label)?;
        let target = request::resolve_target(&request.target, request.mode)?;
        session.table_style = self
            .ctx
            .settings
            .table_style()
            .map_err(|err| FlashError::InvalidInput(err.to_string()))?;

        let hal = &self.ctx.hal;
        // Image files never show up as a mount source, so this only catches optical drives
        // and block devices that are still mounted.
        let source_busy = hal.mounted_partitions(&request.source).map_err(|err| {
            FlashError::InvalidInput(format!(
                "unable to inspect {}: {}",
                request.source.display(),
                err
            ))
        })?;
        if let Some(mountpoint) = source_busy.first() {
            return Err(FlashError::InvalidInput(format!(
                "source media {} is in use (mounted at {}); unmount it first",
                request.source.display(),
                mountpoint.display()
            )));
        }

        let scope = target.scope(request.mode);
        let busy = hal.mounted_partitions(scope).map_err(|err| {
            FlashError::InvalidInput(format!("unable to inspect {}: {}", scope.display(), err))
        })?;
        if !busy.is_empty() {
            let listed = busy
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            if !request.auto_unmount {
                return Err(FlashError::InvalidInput(format!(
                    "{} is in use (mounted at {}); unmount it first",
                    scope.display(),
                    listed
                )));
            }
            self.ctx.sink.info(format!("Unmounting {}", listed));
            for mountpoint in &busy {
                hal.unmount(mountpoint).map_err(|err| {
                    FlashError::InvalidInput(format!(
                        "unable to unmount {}: {}",
                        mountpoint.display(),
                        err
                    ))
                })?;
            }
        }

        match hal.lsblk_table(&target.device) {
            Ok(table) if !table.trim().is_empty() => log::debug!("target layout:\n{}", table),
            Ok(_) => {}
            Err(err) => log::debug!("lsblk unavailable: {}", err),
        }

        session.target = Some(target);
        Ok(StageEvent::Completed)
    }

    fn create_mountpoint(&self, session: &FlashSession, role: &str) -> std::io::Result<PathBuf> {
        let suffix = session
            .suffix()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))?;
        let path = self
            .ctx
            .settings
            .mount_root
            .join(format!("uniflash_{}_{}", role, suffix));
        fs::create_dir_all(&path)?;
        Ok(path)
    }

    fn mount_source(
        &self,
        session: &mut FlashSession,
        request: &FlashRequest,
    ) -> FlashResult<StageEvent> {
        let source_failed = |cause: HalError| FlashError::SourceMountFailed {
            source_path: request.source.clone(),
            cause,
        };
        let path = self
            .create_mountpoint(session, "source")
            .map_err(|err| source_failed(HalError::Io(err)))?;
        let mount = session.source_mount.insert(MountPoint::new(path));

        let options = MountOptions::source(request::is_image_file(&request.source));
        self.ctx
            .hal
            .mount(&request.source, &mount.path, &options)
            .map_err(source_failed)?;
        mount.mounted = true;
        Ok(StageEvent::Completed)
    }

    fn analyze(&self, session: &mut FlashSession) -> FlashResult<StageEvent> {
        let root = mounted_path(&session.source_mount, "source")?;
        let analysis = analyze_source(&root);
        self.ctx.sink.info(analysis.summary());

        if session.requested_filesystem == FilesystemType::Fat32 && analysis.requires_ntfs() {
            session.escalate_to_ntfs()?;
            let biggest = analysis
                .oversized
                .iter()
                .max_by_key(|f| f.size)
                .map(|f| f.path.display().to_string())
                .unwrap_or_default();
            self.ctx.sink.warning(format!(
                "{} is too large for FAT32; using NTFS instead",
                biggest
            ));
        }
        session.analysis = Some(analysis);
        Ok(StageEvent::Completed)
    }

    fn prepare_device(
        &self,
        session: &mut FlashSession,
        request: &FlashRequest,
    ) -> FlashResult<StageEvent> {
        if request.mode == InstallMode::SinglePartition {
            log::info!("single-partition mode: keeping the existing partition layout");
            return Ok(StageEvent::Completed);
        }
        let device = session.target()?.device.clone();
        let hal = &self.ctx.hal;
        let step = DeviceStep::InitialPartitioning;
        if hal
            .detect_existing_partition(&device)
            .map_err(device_failed(step))?
        {
            log::debug!("{} already has a partition", device.display());
            return Ok(StageEvent::Completed);
        }

        self.ctx.sink.info(format!(
            "No partition on {}, creating and formatting one",
            device.display()
        ));
        let opts = DiskOptions::confirmed();
        hal.create_partition_table(&device, session.table_style, &opts)
            .map_err(device_failed(step))?;
        hal.create_partition(
            &device,
            &PartitionSpec::data(session.resolved_filesystem, &request.label),
            &opts,
        )
        .map_err(device_failed(step))?;
        Ok(StageEvent::Completed)
    }

    fn wipe(&self, session: &mut FlashSession, request: &FlashRequest) -> FlashResult<StageEvent> {
        let target = session.target()?;
        let scope = target.scope(request.mode);
        self.ctx
            .hal
            .wipe_signatures(scope, &DiskOptions::confirmed())
            .map_err(device_failed(DeviceStep::WipeSignatures))?;
        Ok(StageEvent::Completed)
    }

    fn write_partition_table(
        &self,
        session: &mut FlashSession,
        request: &FlashRequest,
    ) -> FlashResult<StageEvent> {
        if request.mode == InstallMode::SinglePartition {
            log::info!("single-partition mode: partition table left untouched");
            return Ok(StageEvent::Completed);
        }
        let device = &session.target()?.device;
        self.ctx
            .hal
            .create_partition_table(device, session.table_style, &DiskOptions::confirmed())
            .map_err(device_failed(DeviceStep::PartitionTable))?;
        Ok(StageEvent::Completed)
    }

    fn create_filesystem(
        &self,
        session: &mut FlashSession,
        request: &FlashRequest,
    ) -> FlashResult<StageEvent> {
        let filesystem = session.resolved_filesystem;
        let target = session.target()?.clone();
        let hal = &self.ctx.hal;
        let opts = DiskOptions::confirmed();
        let step = DeviceStep::CreateFilesystem;

        let partition = match request.mode {
            InstallMode::WholeDevice => hal
                .create_partition(
                    &target.device,
                    &PartitionSpec::data(filesystem, &request.label),
                    &opts,
                )
                .map_err(device_failed(step))?,
            InstallMode::SinglePartition => {
                hal.format(
                    &target.partition,
                    filesystem,
                    &filesystem.fit_label(&request.label),
                    &opts,
                )
                .map_err(device_failed(step))?;
                target.partition.clone()
            }
        };
        session.data_partition = Some(partition);

        if request.mode == InstallMode::WholeDevice {
            if request.boot_flag {
                if let Err(err) = hal.set_boot_flag(&target.device, 1, &opts) {
                    self.warn(
                        session,
                        FlashWarning::BootFlag {
                            cause: err.to_string(),
                        },
                    );
                }
            }
            self.rescan(&target.device);
        }
        Ok(StageEvent::Completed)
    }

    fn mount_target(&self, session: &mut FlashSession) -> FlashResult<StageEvent> {
        let partition = session.data_partition()?.to_path_buf();
        let target_failed = |cause: HalError| FlashError::TargetMountFailed {
            partition: partition.clone(),
            cause,
        };
        let path = self
            .create_mountpoint(session, "target")
            .map_err(|err| target_failed(HalError::Io(err)))?;
        let options = MountOptions::with_fstype(session.resolved_filesystem.mount_type());
        let mount = session.target_mount.insert(MountPoint::new(path));

        self.ctx
            .hal
            .mount(&partition, &mount.path, &options)
            .map_err(target_failed)?;
        mount.mounted = true;
        Ok(StageEvent::Completed)
    }

    fn copy_files(&self, session: &mut FlashSession) -> FlashResult<StageEvent> {
        let source = mounted_path(&session.source_mount, "source")?;
        let target = mounted_path(&session.target_mount, "target")?;

        let copier = FileCopier::new(self.ctx.hal.as_ref(), &self.ctx.sink)
            .with_interval(self.ctx.settings.progress_interval());
        match copier.copy(&source, &target, &mut session.reporter)? {
            CopyOutcome::Completed(summary) => {
                session.copied = Some(summary);
                self.ctx.sink.info(format!(
                    "Copied {} files ({})",
                    summary.files,
                    crate::analyze::human_size(summary.bytes)
                ));
            }
            CopyOutcome::Cancelled(summary) => {
                session.copied = Some(summary);
                return Err(FlashError::Cancelled);
            }
        }

        match efi_loader::install_if_needed(self.ctx.hal.as_ref(), &source, &target) {
            Ok(Some(path)) => self
                .ctx
                .sink
                .info(format!("Installed UEFI loader {}", path.display())),
            Ok(None) => {}
            Err(err) => self.warn(
                session,
                FlashWarning::LegacyEfiLoader {
                    cause: format!("{:#}", err),
                },
            ),
        }

        if session.resolved_filesystem == FilesystemType::Ntfs {
            Ok(StageEvent::CompletedNeedsBootSupport)
        } else {
            Ok(StageEvent::Completed)
        }
    }

    fn install_boot_support(
        &self,
        session: &mut FlashSession,
        request: &FlashRequest,
    ) -> FlashResult<StageEvent> {
        if request.mode == InstallMode::SinglePartition {
            self.warn(
                session,
                FlashWarning::BootSupport {
                    cause: "single-partition mode leaves no room for a UEFI:NTFS partition"
                        .into(),
                },
            );
            return Ok(StageEvent::Completed);
        }

        let device = session.target()?.device.clone();
        if let Err(err) = self.write_boot_support(session, &device) {
            self.warn(
                session,
                FlashWarning::BootSupport {
                    cause: format!("{:#}", err),
                },
            );
        }
        self.rescan(&device);
        Ok(StageEvent::Completed)
    }

    /// Create the UEFI:NTFS partition, fetch the image, write it raw.
    fn write_boot_support(&self, session: &FlashSession, device: &Path) -> anyhow::Result<()> {
        let hal = &self.ctx.hal;
        let opts = DiskOptions::confirmed();
        let partition = hal
            .create_partition(device, &PartitionSpec::boot_support(), &opts)
            .context("Failed to create the UEFI:NTFS partition")?;
        self.rescan(device);

        let scratch = session
            .scratch_dir()
            .context("Scratch directory is gone")?;
        let image = self
            .ctx
            .fetcher
            .fetch(&self.ctx.settings.boot_support_url, scratch)
            .context("Failed to download the UEFI:NTFS image")?;
        hal.flash_raw_image(&image, &partition, &opts)
            .with_context(|| format!("Failed to write {}", partition.display()))?;
        self.ctx.sink.info("Installed UEFI:NTFS support");
        Ok(())
    }

    fn rescan(&self, device: &Path) {
        if let Err(err) = self.ctx.hal.reread_partition_table(device) {
            log::warn!(
                "Partition table rescan of {} failed: {}",
                device.display(),
                err
            );
        }
    }

    fn warn(&self, session: &mut FlashSession, warning: FlashWarning) {
        self.ctx.sink.warning(warning.to_string());
        session.warnings.push(warning);
    }
}

fn mounted_path(mount: &Option<MountPoint>, role: &str) -> FlashResult<PathBuf> {
    match mount {
        Some(mount) if mount.mounted => Ok(mount.path.clone()),
        _ => Err(FlashError::Internal(format!("{} is not mounted", role))),
    }
}
