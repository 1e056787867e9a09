use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::{IoResultExt, Result};
use crate::fileset::Fileset;
use crate::scratch::ScratchRoot;
use crate::store::BlobStore;
use crate::types::Entry;

/// process context for fileset operations
///
/// owns the blob store, the scratch root and the shadow commit state, and
/// is threaded explicitly through operations instead of living in hidden
/// globals. cloning is cheap (shared inner); all filesets derived from one
/// environment share its store.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

struct EnvInner {
    store: BlobStore,
    scratch: ScratchRoot,
    shadow: Mutex<HashMap<PathBuf, Shadow>>,
}

/// last fileset committed to a target directory, with the directory's
/// mtime observed at that time
///
/// holds the tree rather than a whole fileset so entries (and their blob
/// references) stay alive without the shadow map referencing the
/// environment back.
pub(crate) struct Shadow {
    pub(crate) tree: BTreeMap<String, Entry>,
    pub(crate) dir_mtime: i64,
}

impl Environment {
    /// create an environment with its store and scratch space under a
    /// fresh temp directory, reclaimed when the environment is dropped
    pub fn new() -> Result<Self> {
        let scratch = ScratchRoot::new()?;
        let store = BlobStore::new(&scratch.path().join("blobs"))?;
        Ok(Self {
            inner: Arc::new(EnvInner {
                store,
                scratch,
                shadow: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// create an environment rooted at a caller-provided directory
    pub fn at(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).with_path(root)?;
        let store = BlobStore::new(&root.join("blobs"))?;
        let scratch = ScratchRoot::new_in(root)?;
        Ok(Self {
            inner: Arc::new(EnvInner {
                store,
                scratch,
                shadow: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// an empty fileset bound to this environment
    pub fn new_fileset(&self) -> Fileset {
        Fileset::empty(self.clone())
    }

    /// allocate a unique temporary directory under the scratch root
    pub fn new_tmpdir(&self) -> Result<PathBuf> {
        self.inner.scratch.make_dir("tmp-")
    }

    pub fn store(&self) -> &BlobStore {
        &self.inner.store
    }

    pub fn scratch(&self) -> &ScratchRoot {
        &self.inner.scratch
    }

    pub(crate) fn shadow(&self) -> MutexGuard<'_, HashMap<PathBuf, Shadow>> {
        self.inner.shadow.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_fileset_is_empty() {
        let env = Environment::new().unwrap();
        let fs = env.new_fileset();
        assert!(fs.is_empty());
        assert_eq!(fs.ls().count(), 0);
    }

    #[test]
    fn test_new_tmpdir_unique() {
        let env = Environment::new().unwrap();
        let a = env.new_tmpdir().unwrap();
        let b = env.new_tmpdir().unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir());
        assert!(b.is_dir());
    }

    #[test]
    fn test_at_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("fileset-root");
        let env = Environment::at(&root).unwrap();

        assert!(root.join("blobs").is_dir());
        assert!(env.scratch().path().starts_with(&root));
    }

    #[test]
    fn test_clones_share_store() {
        let env = Environment::new().unwrap();
        let other = env.clone();
        assert_eq!(env.store().dir(), other.store().dir());
    }
}
