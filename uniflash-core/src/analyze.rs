//! Source tree inspection ahead of formatting.

use std::path::{Path, PathBuf};

use uniflash_hal::{FilesystemType, FAT32_MAX_FILE_SIZE};
use walkdir::WalkDir;

/// A file the requested filesystem cannot store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OversizedFile {
    /// Path relative to the source root.
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceAnalysis {
    pub total_bytes: u64,
    pub file_count: u64,
    /// Files larger than FAT32 can address.
    pub oversized: Vec<OversizedFile>,
    /// Entries that could not be inspected.
    pub unreadable: u64,
}

impl SourceAnalysis {
    /// Whether every file fits on `filesystem`.
    pub fn fits(&self, filesystem: FilesystemType) -> bool {
        match filesystem.max_file_size() {
            Some(limit) => self.oversized.iter().all(|f| f.size <= limit),
            None => true,
        }
    }

    pub fn requires_ntfs(&self) -> bool {
        !self.fits(FilesystemType::Fat32)
    }

    pub fn summary(&self) -> String {
        format!(
            "Source holds {} files, {} in total",
            self.file_count,
            human_size(self.total_bytes)
        )
    }
}

/// Walk `root` and total up its regular files.
///
/// Unreadable entries are counted and skipped; the result only steers the filesystem choice.
pub fn analyze_source(root: &Path) -> SourceAnalysis {
    let mut analysis = SourceAnalysis::default();

    for entry in WalkDir::new(root).min_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("Skipping unreadable source entry: {}", err);
                analysis.unreadable += 1;
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(err) => {
                log::warn!("Unable to stat {}: {}", entry.path().display(), err);
                analysis.unreadable += 1;
                continue;
            }
        };

        analysis.file_count += 1;
        analysis.total_bytes += size;
        if size > FAT32_MAX_FILE_SIZE {
            let path = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_path_buf();
            log::debug!("{} exceeds the FAT32 file size limit", path.display());
            analysis.oversized.push(OversizedFile { path, size });
        }
    }

    analysis
}

/// Render a byte count with binary units and one decimal, e.g. `4.5 GiB`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = UNITS[0];
    for candidate in UNITS {
        value /= 1024.0;
        unit = candidate;
        if value < 1024.0 {
            break;
        }
    }
    format!("{:.1} {}", value, unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::tempdir;

    #[test]
    fn human_size_uses_binary_units() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(5 * 1024 * 1024 * 1024), "5.0 GiB");
        assert_eq!(human_size(3 * 1024_u64.pow(4)), "3.0 TiB");
    }

    #[test]
    fn detects_files_beyond_the_fat32_limit() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sources")).unwrap();
        File::create(dir.path().join("sources/install.wim"))
            .unwrap()
            .set_len(FAT32_MAX_FILE_SIZE + 1)
            .unwrap();
        fs::write(dir.path().join("setup.exe"), b"MZ").unwrap();

        let analysis = analyze_source(dir.path());

        assert_eq!(analysis.file_count, 2);
        assert_eq!(analysis.total_bytes, FAT32_MAX_FILE_SIZE + 3);
        assert!(analysis.requires_ntfs());
        assert_eq!(analysis.oversized[0].path, PathBuf::from("sources/install.wim"));
        assert!(analysis.fits(FilesystemType::Ntfs));
    }

    #[test]
    fn a_file_of_exactly_the_limit_still_fits_fat32() {
        let dir = tempdir().unwrap();
        File::create(dir.path().join("boot.wim"))
            .unwrap()
            .set_len(FAT32_MAX_FILE_SIZE)
            .unwrap();

        let analysis = analyze_source(dir.path());

        assert!(analysis.oversized.is_empty());
        assert!(!analysis.requires_ntfs());
    }
}
