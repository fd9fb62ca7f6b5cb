//! Parsing helpers for `/proc/self/mountinfo`.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub mount_point: PathBuf,
    pub source: String,
}

pub fn parse_mountinfo(content: &str) -> Vec<MountInfo> {
    content
        .lines()
        .filter_map(|line| {
            // <id> <parent> <maj:min> <root> <mount point> <opts...> - <fstype> <source> <superopts>
            let (pre, post) = line.split_once(" - ")?;
            let pre_fields: Vec<&str> = pre.split_whitespace().collect();
            if pre_fields.len() < 5 {
                return None;
            }
            let mut post_fields = post.split_whitespace();
            let _fstype = post_fields.next()?;
            let source = post_fields.next().unwrap_or_default().to_string();
            Some(MountInfo {
                mount_point: PathBuf::from(unescape_mount_path(pre_fields[4])),
                source,
            })
        })
        .collect()
}

pub fn is_mounted_from_info(path: &Path, entries: &[MountInfo]) -> bool {
    let target = normalize_path(path);
    entries
        .iter()
        .any(|entry| normalize_path(&entry.mount_point) == target)
}

/// Mount points whose source is `disk` itself or one of its partitions.
pub fn mounted_under_device(entries: &[MountInfo], disk: &Path) -> Vec<PathBuf> {
    let disk = disk.to_string_lossy();
    let mut mounts: Vec<PathBuf> = entries
        .iter()
        .filter(|entry| is_same_or_partition_of(&entry.source, &disk))
        .map(|entry| entry.mount_point.clone())
        .collect();
    mounts.sort();
    mounts.dedup();
    mounts
}

fn is_same_or_partition_of(source: &str, disk: &str) -> bool {
    let Some(rest) = source.strip_prefix(disk) else {
        return false;
    };
    if rest.is_empty() {
        return true;
    }
    // Names ending in a digit (loop1, nvme0n1, mmcblk0, sdb1) only take `p<n>` partitions,
    // so `/dev/loop1` never matches `/dev/loop10`. Otherwise `/dev/sda` must not match
    // `/dev/sdaa1`.
    let digits = if disk.ends_with(|c: char| c.is_ascii_digit()) {
        match rest.strip_prefix('p') {
            Some(digits) => digits,
            None => return false,
        }
    } else {
        rest
    };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Decode the `\ooo` octal escapes the kernel uses for whitespace and backslashes.
pub fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escape = bytes.get(i + 1..i + 4).filter(|digits| {
            bytes[i] == b'\\' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
        });
        match escape {
            Some(digits) => {
                let value = digits.iter().fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                out.push(value as u8);
                i += 4;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn normalize_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.len() > 1 && s.ends_with('/') {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}
