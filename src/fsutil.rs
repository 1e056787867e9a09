//! thin wrappers over the OS primitives the store and committer rely on

use std::fs;
use std::path::Path;

use filetime::FileTime;

use crate::error::{IoResultExt, Result};

/// last-modified time of a path in milliseconds since the unix epoch
pub fn mtime_millis(path: &Path) -> Result<i64> {
    let meta = fs::metadata(path).with_path(path)?;
    let ft = FileTime::from_last_modification_time(&meta);
    Ok(ft.unix_seconds() * 1000 + i64::from(ft.nanoseconds()) / 1_000_000)
}

/// stamp a path's last-modified time from milliseconds since the unix epoch
pub fn set_mtime_millis(path: &Path, millis: i64) -> Result<()> {
    let secs = millis.div_euclid(1000);
    let nanos = (millis.rem_euclid(1000) * 1_000_000) as u32;
    filetime::set_file_mtime(path, FileTime::from_unix_time(secs, nanos)).with_path(path)
}

/// strip write permission from a path
pub fn set_read_only(path: &Path) -> Result<()> {
    let mut perms = fs::metadata(path).with_path(path)?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms).with_path(path)
}

/// rename with replace-existing semantics; atomic when src and dst share a filesystem
pub fn atomic_rename(src: &Path, dst: &Path) -> Result<()> {
    fs::rename(src, dst).with_path(dst)
}

/// create a hard link at dst pointing to src's inode
pub fn hard_link(src: &Path, dst: &Path) -> Result<()> {
    fs::hard_link(src, dst).with_path(dst)
}

/// fsync a directory
pub(crate) fn fsync_dir(path: &Path) -> Result<()> {
    let dir = fs::File::open(path).with_path(path)?;
    dir.sync_all().with_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_mtime_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "x").unwrap();

        set_mtime_millis(&path, 1_500_000_123_456).unwrap();
        assert_eq!(mtime_millis(&path).unwrap(), 1_500_000_123_456);
    }

    #[test]
    fn test_mtime_pre_epoch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "x").unwrap();

        set_mtime_millis(&path, -1_500).unwrap();
        assert_eq!(mtime_millis(&path).unwrap(), -1_500);
    }

    #[test]
    fn test_set_read_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "x").unwrap();

        set_read_only(&path).unwrap();
        assert!(fs::metadata(&path).unwrap().permissions().readonly());
        assert!(fs::write(&path, "y").is_err());
    }

    #[test]
    fn test_hard_link_shares_content() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::write(&src, "shared").unwrap();

        hard_link(&src, &dst).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), b"shared");
    }

    #[test]
    fn test_atomic_rename_replaces() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, "new").unwrap();
        fs::write(&b, "old").unwrap();

        atomic_rename(&a, &b).unwrap();
        assert_eq!(fs::read(&b).unwrap(), b"new");
        assert!(!a.exists());
    }
}
