//! Filesystem collector: `/proc/self/mounts` enumeration + `statvfs(2)`.

use std::ffi::CString;
use std::mem::MaybeUninit;
use std::path::Path;

use crate::churn::{ChurnCounter, ChurnKind};
use crate::fs::FileSystem;
use crate::model::FilesystemMount;

const DENYLIST: &[&str] = &[
    "proc", "sysfs", "devtmpfs", "tmpfs", "cgroup", "cgroup2", "bpf", "autofs", "overlay", "fuse.portal", "squashfs",
    "devpts", "securityfs", "debugfs", "tracefs", "pstore", "mqueue", "hugetlbfs", "fusectl", "configfs", "binfmt_misc",
];

struct MountEntry {
    device: String,
    mountpoint: String,
    fstype: String,
}

fn parse_mounts(contents: &str) -> Vec<MountEntry> {
    let mut out = Vec::new();
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mountpoint), Some(fstype)) = (fields.next(), fields.next(), fields.next()) else {
            continue;
        };
        out.push(MountEntry { device: device.to_string(), mountpoint: mountpoint.to_string(), fstype: fstype.to_string() });
    }
    out
}

/// Queries `statvfs(2)` for a mountpoint. Returns `None` on any FFI failure.
fn statvfs_stats(mountpoint: &str) -> Option<(u64, u64, u64)> {
    let c_path = CString::new(mountpoint).ok()?;
    // SAFETY: `stat` is a valid, properly-aligned out-param for statvfs; the
    // path is a NUL-terminated C string borrowed only for the call duration.
    unsafe {
        let mut stat: MaybeUninit<libc::statvfs> = MaybeUninit::uninit();
        let rc = libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr());
        if rc != 0 {
            return None;
        }
        let stat = stat.assume_init();
        let block_size = stat.f_frsize as u64;
        let total = stat.f_blocks as u64 * block_size;
        let avail = stat.f_bavail as u64 * block_size;
        let free = stat.f_bfree as u64 * block_size;
        let used = total.saturating_sub(free);
        Some((total, used, avail))
    }
}

pub struct FilesystemCollector;

impl FilesystemCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn sample(&mut self, fs: &dyn FileSystem, churn: &ChurnCounter) -> Vec<FilesystemMount> {
        let contents = match fs.read_to_string(Path::new("/proc/self/mounts")) {
            Ok(c) => c,
            Err(_) => {
                churn.note(ChurnKind::SystemSource);
                return Vec::new();
            }
        };

        let mut out: Vec<FilesystemMount> = parse_mounts(&contents)
            .into_iter()
            .filter(|m| !DENYLIST.contains(&m.fstype.as_str()))
            .filter_map(|m| {
                let (total_bytes, used_bytes, avail_bytes) = statvfs_stats(&m.mountpoint)?;
                let used_pct = if total_bytes == 0 { 0.0 } else { used_bytes as f64 / total_bytes as f64 * 100.0 };
                Some(FilesystemMount {
                    device: m.device,
                    mountpoint: m.mountpoint,
                    fstype: m.fstype,
                    total_bytes,
                    used_bytes,
                    avail_bytes,
                    used_pct,
                })
            })
            .collect();

        out.sort_by(|a, b| b.used_pct.partial_cmp(&a.used_pct).unwrap().then(b.used_bytes.cmp(&a.used_bytes)));
        out
    }
}

impl Default for FilesystemCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mounts_skips_nothing_itself() {
        let contents = "/dev/sda1 / ext4 rw,relatime 0 0\nproc /proc proc rw 0 0\ntmpfs /run tmpfs rw 0 0\n";
        let entries = parse_mounts(contents);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].mountpoint, "/");
    }

    #[test]
    fn denylist_excludes_pseudo_filesystems() {
        assert!(DENYLIST.contains(&"tmpfs"));
        assert!(DENYLIST.contains(&"overlay"));
        assert!(!DENYLIST.contains(&"ext4"));
    }

    #[test]
    fn statvfs_real_root_succeeds() {
        // Exercises the real FFI path against the actual host root filesystem.
        let stats = statvfs_stats("/");
        assert!(stats.is_some());
    }
}
