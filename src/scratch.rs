use std::path::{Path, PathBuf};

use tempfile::{Builder, TempDir};

use crate::error::{IoResultExt, Result};

/// process-global scratch root
///
/// per-operation scratch directories are allocated inside one root that is
/// reclaimed when the root is dropped (normally process exit). allocated
/// subdirectories are never cleaned up individually.
pub struct ScratchRoot {
    root: TempDir,
}

impl ScratchRoot {
    /// create a scratch root in the system temp directory
    pub fn new() -> Result<Self> {
        let root = Builder::new()
            .prefix("fileset-")
            .tempdir()
            .with_path(std::env::temp_dir())?;
        Ok(Self { root })
    }

    /// create a scratch root inside the given directory
    pub fn new_in(dir: &Path) -> Result<Self> {
        let root = Builder::new()
            .prefix("fileset-")
            .tempdir_in(dir)
            .with_path(dir)?;
        Ok(Self { root })
    }

    /// scratch root path
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// allocate a unique scratch subdirectory
    ///
    /// the directory lives until the root is dropped.
    pub fn make_dir(&self, prefix: &str) -> Result<PathBuf> {
        let dir = Builder::new()
            .prefix(prefix)
            .tempdir_in(self.root.path())
            .with_path(self.root.path())?;
        Ok(dir.keep())
    }
}
