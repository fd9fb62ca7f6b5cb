use std::path::{Path, PathBuf};

/// Partition node for a block device. Handles nvme/mmcblk/loop `p` postfixing.
pub fn partition_path(disk: &Path, num: u32) -> PathBuf {
    let disk = disk.to_string_lossy();
    let ends_with_digit = disk.chars().last().is_some_and(|c| c.is_ascii_digit());
    if ends_with_digit
        && (disk.contains("nvme") || disk.contains("mmcblk") || disk.contains("loop"))
    {
        PathBuf::from(format!("{}p{}", disk, num))
    } else {
        PathBuf::from(format!("{}{}", disk, num))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_path_handles_naming_schemes() {
        assert_eq!(partition_path(Path::new("/dev/sdb"), 1), PathBuf::from("/dev/sdb1"));
        assert_eq!(
            partition_path(Path::new("/dev/nvme0n1"), 2),
            PathBuf::from("/dev/nvme0n1p2")
        );
        assert_eq!(
            partition_path(Path::new("/dev/mmcblk0"), 1),
            PathBuf::from("/dev/mmcblk0p1")
        );
        assert_eq!(partition_path(Path::new("/dev/loop3"), 1), PathBuf::from("/dev/loop3p1"));
    }
}
