//! UEFI loader for Windows 7 style media.
//!
//! Windows 7 installation media ship no `efi/boot/bootx64.efi`; the loader lives inside
//! `sources/install.wim` as `bootmgfw.efi` and has to be extracted onto the target.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uniflash_hal::ProcessOps;

const EXTRACT_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const LOADER_IN_WIM: &str = "Windows/Boot/EFI/bootmgfw.efi";

/// Case-insensitive lookup of `components` below `root`, as FAT and NTFS would resolve it.
fn find_case_insensitive(root: &Path, components: &[&str]) -> Option<PathBuf> {
    let mut current = root.to_path_buf();
    for component in components {
        let direct = current.join(component);
        if direct.exists() {
            current = direct;
            continue;
        }
        let found = fs::read_dir(&current).ok()?.flatten().find(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.eq_ignore_ascii_case(component))
        })?;
        current = found.path();
    }
    Some(current)
}

/// Whether `source` carries Windows 7 media that needs the loader extracted.
pub fn needs_legacy_loader(source: &Path) -> Result<bool> {
    if find_case_insensitive(source, &["bootmgr.efi"]).is_some() {
        return Ok(true);
    }
    let Some(cversion) = find_case_insensitive(source, &["sources", "cversion.ini"]) else {
        return Ok(false);
    };
    let bytes = fs::read(&cversion)
        .with_context(|| format!("Failed to read {}", cversion.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    let min_server = Regex::new(r"(?m)^MinServer=7\d{3}\.\d")?;
    Ok(min_server.is_match(&text))
}

/// Extract the Windows 7 UEFI loader onto `target` when the media needs it.
///
/// Returns the written path, or `None` when nothing had to be done.
pub fn install_if_needed<H: ProcessOps + ?Sized>(
    hal: &H,
    source: &Path,
    target: &Path,
) -> Result<Option<PathBuf>> {
    if find_case_insensitive(target, &["efi", "boot", "bootx64.efi"]).is_some() {
        return Ok(None);
    }
    if !needs_legacy_loader(source)? {
        return Ok(None);
    }

    let wim = find_case_insensitive(source, &["sources", "install.wim"])
        .context("Windows 7 media without sources/install.wim")?;
    log::info!("Extracting UEFI loader from {}", wim.display());

    let args = vec![
        "e".to_string(),
        "-so".to_string(),
        wim.display().to_string(),
        LOADER_IN_WIM.to_string(),
    ];
    let loader = hal
        .command_stdout("7z", &args, EXTRACT_TIMEOUT)
        .context("Failed to extract bootmgfw.efi with 7z")?;
    if loader.is_empty() {
        bail!("7z produced an empty bootmgfw.efi");
    }

    let boot_dir = match find_case_insensitive(target, &["efi", "boot"]) {
        Some(dir) => dir,
        None => {
            let dir = find_case_insensitive(target, &["efi"])
                .unwrap_or_else(|| target.join("efi"))
                .join("boot");
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            dir
        }
    };
    let dest = boot_dir.join("bootx64.efi");
    fs::write(&dest, loader).with_context(|| format!("Failed to write {}", dest.display()))?;
    Ok(Some(dest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use uniflash_hal::{FakeHal, Operation, OperationKind};

    fn win7_source(root: &Path) {
        fs::create_dir_all(root.join("sources")).unwrap();
        fs::write(
            root.join("sources/cversion.ini"),
            "[HostBuild]\r\nMinClient=7600.16385\r\nMinServer=7600.16385\r\n",
        )
        .unwrap();
        fs::write(root.join("sources/install.wim"), b"MSWIM").unwrap();
    }

    #[test]
    fn detects_windows_7_media() {
        let dir = tempdir().unwrap();
        win7_source(dir.path());
        assert!(needs_legacy_loader(dir.path()).unwrap());

        fs::write(
            dir.path().join("sources/cversion.ini"),
            "[HostBuild]\nMinServer=9200.16384\n",
        )
        .unwrap();
        assert!(!needs_legacy_loader(dir.path()).unwrap());

        fs::write(dir.path().join("BOOTMGR.EFI"), b"").unwrap();
        assert!(needs_legacy_loader(dir.path()).unwrap());
    }

    #[test]
    fn extracts_loader_into_existing_efi_tree() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        win7_source(source.path());
        fs::create_dir_all(target.path().join("EFI/Microsoft")).unwrap();
        let hal = FakeHal::new();
        hal.with_command_output(b"MZ-loader".to_vec());

        let written = install_if_needed(&hal, source.path(), target.path())
            .unwrap()
            .unwrap();

        assert_eq!(written, target.path().join("EFI/boot/bootx64.efi"));
        assert_eq!(fs::read(&written).unwrap(), b"MZ-loader");
        assert!(hal.has_operation(|op| matches!(
            op,
            Operation::Command { program, args } if program == "7z" && args[3] == LOADER_IN_WIM
        )));
    }

    #[test]
    fn leaves_targets_with_a_loader_alone() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        win7_source(source.path());
        fs::create_dir_all(target.path().join("efi/boot")).unwrap();
        fs::write(target.path().join("efi/boot/BOOTX64.EFI"), b"x").unwrap();
        let hal = FakeHal::new();

        assert_eq!(install_if_needed(&hal, source.path(), target.path()).unwrap(), None);
        assert_eq!(hal.count(OperationKind::Command), 0);
    }

    #[test]
    fn extraction_failure_is_an_error() {
        let source = tempdir().unwrap();
        let target = tempdir().unwrap();
        win7_source(source.path());
        let hal = FakeHal::new();
        hal.fail_on(OperationKind::Command);

        assert!(install_if_needed(&hal, source.path(), target.path()).is_err());
    }
}
