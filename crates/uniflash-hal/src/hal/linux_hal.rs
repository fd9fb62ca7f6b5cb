//! Linux HAL implementation using real system calls and standard disk utilities.

use super::{
    CopyOps, CopyOptions, DiskOptions, FilesystemType, FlashOps, FormatOps, MountOps, MountOptions,
    PartitionOps, PartitionSpec, ProbeOps, ProcessOps, SystemOps, TableStyle,
};
use crate::procfs::mountinfo;
use crate::{HalError, HalResult};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal;

impl LinuxHal {
    pub fn new() -> Self {
        Self
    }
}

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const MOUNT_TIMEOUT: Duration = Duration::from_secs(60);
const SYNC_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const FORMAT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const WIPEFS_TIMEOUT: Duration = Duration::from_secs(60);
const PARTED_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(60);

fn map_command_err(program: &str, err: io::Error) -> HalError {
    if err.kind() == io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

fn output_failed(program: &str, output: &Output) -> HalError {
    HalError::CommandFailed {
        program: program.to_string(),
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    }
}

fn output_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    // Drain pipes concurrently to avoid deadlocks on large output.
    let stdout_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout.take() {
            let _ = out.read_to_end(&mut buf);
        }
        buf
    });
    let stderr_handle = std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr.take() {
            let _ = err.read_to_end(&mut buf);
        }
        buf
    });

    let status = match child.wait_timeout(timeout).map_err(HalError::Io)? {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stdout_handle.join();
            let _ = stderr_handle.join();
            return Err(HalError::CommandTimeout {
                program: program.to_string(),
                timeout_secs: timeout.as_secs(),
            });
        }
    };

    let stdout = stdout_handle.join().unwrap_or_default();
    let stderr = stderr_handle.join().unwrap_or_default();
    Ok(Output {
        status,
        stdout,
        stderr,
    })
}

fn run_checked(program: &str, args: &[String], timeout: Duration) -> HalResult<Output> {
    log::debug!("exec: {} {}", program, args.join(" "));
    let mut cmd = Command::new(program);
    cmd.args(args);
    let output = output_with_timeout(program, &mut cmd, timeout)?;
    if !output.status.success() {
        return Err(output_failed(program, &output));
    }
    Ok(output)
}

fn map_nix_err(err: nix::errno::Errno) -> HalError {
    use nix::errno::Errno;
    match err {
        Errno::EBUSY => HalError::DiskBusy,
        Errno::EACCES | Errno::EPERM => HalError::PermissionDenied,
        other => HalError::Nix(other),
    }
}

fn require_confirmation(opts: &DiskOptions) -> HalResult<()> {
    if !opts.confirmed {
        return Err(HalError::SafetyLock);
    }
    Ok(())
}

fn read_mountinfo() -> HalResult<Vec<mountinfo::MountInfo>> {
    let content = fs::read_to_string("/proc/self/mountinfo")?;
    Ok(mountinfo::parse_mountinfo(&content))
}

impl MountOps for LinuxHal {
    fn mount(&self, source: &Path, target: &Path, options: &MountOptions) -> HalResult<()> {
        let mut args = Vec::new();
        if let Some(ref fstype) = options.fstype {
            args.push("-t".to_string());
            args.push(fstype.clone());
        }
        if let Some(opts) = options.option_string() {
            args.push("-o".to_string());
            args.push(opts);
        }
        args.push(source.display().to_string());
        args.push(target.display().to_string());

        run_checked("mount", &args, MOUNT_TIMEOUT)?;
        Ok(())
    }

    fn unmount(&self, target: &Path) -> HalResult<()> {
        nix::mount::umount2(target, nix::mount::MntFlags::empty()).map_err(map_nix_err)?;
        Ok(())
    }

    fn is_mounted(&self, path: &Path) -> HalResult<bool> {
        let entries = read_mountinfo()?;
        Ok(mountinfo::is_mounted_from_info(path, &entries))
    }
}

impl FormatOps for LinuxHal {
    fn format(
        &self,
        partition: &Path,
        filesystem: FilesystemType,
        label: &str,
        opts: &DiskOptions,
    ) -> HalResult<()> {
        require_confirmation(opts)?;

        let label = filesystem.fit_label(label);
        let device = partition.display().to_string();
        match filesystem {
            FilesystemType::Fat32 => {
                let args = vec![
                    "-F".to_string(),
                    "32".to_string(),
                    "-n".to_string(),
                    label,
                    device,
                ];
                run_checked("mkfs.vfat", &args, FORMAT_TIMEOUT)?;
            }
            FilesystemType::Ntfs => {
                let args = vec![
                    "--quick".to_string(),
                    "--label".to_string(),
                    label,
                    device,
                ];
                run_checked("mkntfs", &args, FORMAT_TIMEOUT)?;
            }
        }
        Ok(())
    }
}

impl PartitionOps for LinuxHal {
    fn detect_existing_partition(&self, disk: &Path) -> HalResult<bool> {
        let args = vec!["-lnpo".to_string(), "TYPE".to_string(), disk.display().to_string()];
        let output = run_checked("lsblk", &args, PROBE_TIMEOUT)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().any(|line| line.trim() == "part"))
    }

    fn wipe_signatures(&self, device: &Path, opts: &DiskOptions) -> HalResult<()> {
        require_confirmation(opts)?;
        let args = vec!["--all".to_string(), device.display().to_string()];
        run_checked("wipefs", &args, WIPEFS_TIMEOUT)?;
        Ok(())
    }

    fn create_partition_table(
        &self,
        disk: &Path,
        style: TableStyle,
        opts: &DiskOptions,
    ) -> HalResult<()> {
        require_confirmation(opts)?;
        let args = vec![
            "-s".to_string(),
            disk.display().to_string(),
            "mklabel".to_string(),
            style.parted_label().to_string(),
        ];
        run_checked("parted", &args, PARTED_TIMEOUT)?;
        Ok(())
    }

    fn create_partition(
        &self,
        disk: &Path,
        spec: &PartitionSpec,
        opts: &DiskOptions,
    ) -> HalResult<PathBuf> {
        require_confirmation(opts)?;
        // `--` keeps negative sector offsets from being parsed as options.
        let args = vec![
            "-s".to_string(),
            "-a".to_string(),
            "optimal".to_string(),
            disk.display().to_string(),
            "--".to_string(),
            "mkpart".to_string(),
            "primary".to_string(),
            spec.parted_fs_type().to_string(),
            spec.start.clone(),
            spec.end.clone(),
        ];
        run_checked("parted", &args, PARTED_TIMEOUT)?;

        let partition = crate::path::partition_path(disk, spec.number);
        if let Some(filesystem) = spec.filesystem {
            // The new node only shows up once the kernel has re-read the table.
            self.reread_partition_table(disk)?;
            let label = spec.label.as_deref().unwrap_or_default();
            self.format(&partition, filesystem, label, opts)?;
        }
        Ok(partition)
    }

    fn set_boot_flag(&self, disk: &Path, part_num: u32, opts: &DiskOptions) -> HalResult<()> {
        require_confirmation(opts)?;
        let args = vec![
            "-s".to_string(),
            disk.display().to_string(),
            "set".to_string(),
            part_num.to_string(),
            "boot".to_string(),
            "on".to_string(),
        ];
        run_checked("parted", &args, PARTED_TIMEOUT)?;
        Ok(())
    }
}

impl ProbeOps for LinuxHal {
    fn mounted_partitions(&self, disk: &Path) -> HalResult<Vec<PathBuf>> {
        let entries = read_mountinfo()?;
        Ok(mountinfo::mounted_under_device(&entries, disk))
    }

    fn lsblk_table(&self, disk: &Path) -> HalResult<String> {
        let args = vec![
            "-o".to_string(),
            "NAME,SIZE,TYPE,FSTYPE,LABEL,MOUNTPOINTS,MODEL".to_string(),
            disk.display().to_string(),
        ];
        let output = run_checked("lsblk", &args, PROBE_TIMEOUT)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl SystemOps for LinuxHal {
    fn sync(&self) -> HalResult<()> {
        run_checked("sync", &[], SYNC_TIMEOUT)?;
        Ok(())
    }

    fn reread_partition_table(&self, disk: &Path) -> HalResult<()> {
        run_checked("partprobe", &[disk.display().to_string()], PARTED_TIMEOUT)?;
        run_checked("udevadm", &["settle".to_string()], SETTLE_TIMEOUT)?;
        Ok(())
    }
}

impl FlashOps for LinuxHal {
    fn flash_raw_image(
        &self,
        image_path: &Path,
        target: &Path,
        opts: &DiskOptions,
    ) -> HalResult<()> {
        require_confirmation(opts)?;

        log::info!("Writing image {} -> {}", image_path.display(), target.display());

        let mut input = fs::File::open(image_path)?;
        let mut out = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(target)?;

        io::copy(&mut input, &mut out)?;

        // Best-effort flush (block devices may ignore).
        out.sync_all().ok();

        Ok(())
    }
}

impl CopyOps for LinuxHal {
    fn copy_file(&self, src: &Path, dst: &Path, opts: &CopyOptions) -> HalResult<u64> {
        let bytes = fs::copy(src, dst)?;
        if opts.preserve_times {
            let metadata = fs::metadata(src)?;
            let mtime = filetime::FileTime::from_last_modification_time(&metadata);
            let atime = filetime::FileTime::from_last_access_time(&metadata);
            filetime::set_file_times(dst, atime, mtime)?;
        }
        Ok(bytes)
    }
}

impl ProcessOps for LinuxHal {
    fn command_stdout(
        &self,
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> HalResult<Vec<u8>> {
        Ok(run_checked(program, args, timeout)?.stdout)
    }
}
