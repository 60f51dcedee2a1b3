//! Filesystem abstraction over `/proc` and `/sys`.
//!
//! Every collector reads through the [`FileSystem`] trait rather than
//! touching `std::fs` directly, so the whole collection layer can run
//! against a [`MockFs`] fixture in tests without a real Linux host.
//!
//! [`RealFs`] resolves the roots once, at construction, from the
//! `HOSTGLANCE_PROC_ROOT` / `HOSTGLANCE_SYS_ROOT` environment variables
//! (falling back to `/proc` and `/sys`). Collectors themselves never see
//! the env vars or do any path rewriting.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

/// Abstraction over the parts of the filesystem collectors need.
///
/// Paths passed in are always the canonical `/proc/...` or `/sys/...`
/// form; implementations are responsible for any root remapping.
pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    fn read_to_bytes(&self, path: &Path) -> io::Result<Vec<u8>>;
    fn exists(&self, path: &Path) -> bool;
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;
}

/// Filesystem backed by the real OS, with optional root remapping for
/// running off-host against a captured `/proc`/`/sys` tree.
pub struct RealFs {
    proc_root: PathBuf,
    sys_root: PathBuf,
}

impl RealFs {
    /// Resolves `HOSTGLANCE_PROC_ROOT` / `HOSTGLANCE_SYS_ROOT` once and
    /// bakes the result in. Collection itself never re-reads the env.
    pub fn new() -> Self {
        let proc_root = std::env::var("HOSTGLANCE_PROC_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/proc"));
        let sys_root = std::env::var("HOSTGLANCE_SYS_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/sys"));
        Self { proc_root, sys_root }
    }

    fn map(&self, path: &Path) -> PathBuf {
        if let Ok(rest) = path.strip_prefix("/proc") {
            if self.proc_root != Path::new("/proc") {
                return self.proc_root.join(rest);
            }
        } else if let Ok(rest) = path.strip_prefix("/sys") {
            if self.sys_root != Path::new("/sys") {
                return self.sys_root.join(rest);
            }
        }
        path.to_path_buf()
    }
}

impl Default for RealFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(self.map(path))
    }

    fn read_to_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(self.map(path))
    }

    fn exists(&self, path: &Path) -> bool {
        self.map(path).exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mapped = self.map(path);
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&mapped)? {
            out.push(entry?.path());
        }
        Ok(out)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::read_link(self.map(path))
    }
}

/// In-memory filesystem fixture for tests.
///
/// Symlinks are stored as a separate map since their "contents" (the
/// link target) is conceptually different from a regular file's bytes.
#[derive(Default)]
pub struct MockFs {
    files: HashMap<PathBuf, Vec<u8>>,
    directories: HashSet<PathBuf>,
    links: HashMap<PathBuf, PathBuf>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file, creating any parent directories implicitly.
    pub fn add_file(&mut self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) -> &mut Self {
        let path = path.as_ref().to_path_buf();
        let mut parent = path.parent();
        while let Some(p) = parent {
            if p == Path::new("/") || p == Path::new("") {
                break;
            }
            self.directories.insert(p.to_path_buf());
            parent = p.parent();
        }
        self.files.insert(path, contents.into());
        self
    }

    pub fn add_dir(&mut self, path: impl AsRef<Path>) -> &mut Self {
        self.directories.insert(path.as_ref().to_path_buf());
        self
    }

    pub fn add_link(&mut self, path: impl AsRef<Path>, target: impl AsRef<Path>) -> &mut Self {
        let path = path.as_ref().to_path_buf();
        if let Some(p) = path.parent() {
            self.directories.insert(p.to_path_buf());
        }
        self.links.insert(path, target.as_ref().to_path_buf());
        self
    }

    /// Builds a minimal but complete `/proc/<pid>/*` fixture for one process.
    #[allow(clippy::too_many_arguments)]
    pub fn add_process(
        &mut self,
        pid: u32,
        stat: &str,
        status: &str,
        cmdline: &[&str],
        exe: Option<&str>,
    ) -> &mut Self {
        let base = PathBuf::from(format!("/proc/{pid}"));
        self.add_file(base.join("stat"), stat);
        self.add_file(base.join("status"), status);
        let cmdline_bytes: Vec<u8> = cmdline
            .iter()
            .flat_map(|s| s.bytes().chain(std::iter::once(0u8)))
            .collect();
        self.add_file(base.join("cmdline"), cmdline_bytes);
        self.add_dir(base.join("fd"));
        if let Some(exe) = exe {
            self.add_link(base.join("exe"), exe);
        }
        self
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn read_to_bytes(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.directories.contains(path) || self.links.contains_key(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.directories.contains(path) {
            return Err(io::Error::new(io::ErrorKind::NotFound, path.display().to_string()));
        }
        let mut seen = HashSet::new();
        for p in self.files.keys().chain(self.links.keys()) {
            if p.parent() == Some(path) {
                seen.insert(p.clone());
            }
        }
        for p in &self.directories {
            if p.parent() == Some(path) {
                seen.insert(p.clone());
            }
        }
        Ok(seen.into_iter().collect())
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        self.links
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_fs_read_and_list() {
        let mut fs = MockFs::new();
        fs.add_file("/proc/stat", "cpu  1 2 3 4 5 6 7 0 0 0\n");
        assert!(fs.read_to_string(Path::new("/proc/stat")).unwrap().starts_with("cpu"));
        assert!(fs.exists(Path::new("/proc")));
        let entries = fs.read_dir(Path::new("/proc")).unwrap();
        assert!(entries.contains(&PathBuf::from("/proc/stat")));
    }

    #[test]
    fn mock_fs_process_fixture() {
        let mut fs = MockFs::new();
        fs.add_process(
            42,
            "42 (bash) S 1 42 42 0 -1 4194304 100 0 0 0 1 2 0 0 20 0 1 0 1000 0 0 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0",
            "Uid:\t1000\t1000\t1000\t1000\nThreads:\t1\n",
            &["/bin/bash"],
            Some("/bin/bash"),
        );
        assert!(fs.read_to_string(Path::new("/proc/42/stat")).unwrap().contains("bash"));
        assert_eq!(fs.read_link(Path::new("/proc/42/exe")).unwrap(), PathBuf::from("/bin/bash"));
    }

    #[test]
    fn mock_fs_missing_file_is_not_found() {
        let fs = MockFs::new();
        let err = fs.read_to_string(Path::new("/proc/missing")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
