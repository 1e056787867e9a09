use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, IoResultExt, Result};
use crate::fsutil;
use crate::hash::Digest;
use crate::types::BlobId;

/// content-addressed, reference-counted repository of immutable files
///
/// blobs live in one process-owned directory, named by their id
/// (`<32hex>.<millis>`). a blob is read-only after creation and never
/// modified in place. while its refcount is above zero the store holds an
/// open read handle on it, so the file can be recreated if something
/// deletes it out-of-band.
#[derive(Clone)]
pub struct BlobStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    dir: PathBuf,
    table: Mutex<HashMap<BlobId, BlobState>>,
}

struct BlobState {
    refs: usize,
    handle: File,
}

impl BlobStore {
    /// open a store rooted at the given directory, creating it if missing
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).with_path(dir)?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                dir: dir.to_path_buf(),
                table: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// store directory path
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// intern a source file, copying its bytes into the store
    ///
    /// the source is hashed and its mtime captured to form the blob id. if
    /// the blob already exists its refcount is bumped; otherwise the bytes
    /// are copied to a temp file in the store directory, stamped with the
    /// captured mtime, atomically renamed into place and marked read-only.
    /// the source file itself is not moved.
    pub fn add(&self, source: &Path) -> Result<BlobRef> {
        let id = self.identify(source)?;
        self.intern(source, id, false)
    }

    /// intern a source file by hard link instead of copy
    ///
    /// for bulk ingestion from a directory known to be immutable. the
    /// external contract is identical to [`BlobStore::add`]; linking falls
    /// back to the copy protocol when the source is on another filesystem.
    pub fn add_linked(&self, source: &Path) -> Result<BlobRef> {
        let id = self.identify(source)?;
        self.intern(source, id, true)
    }

    /// intern by hard link under a caller-supplied id, skipping the hash
    ///
    /// used when seeding from a manifest whose ids are trusted.
    pub(crate) fn intern_linked(&self, source: &Path, id: BlobId) -> Result<BlobRef> {
        self.intern(source, id, true)
    }

    /// compute the blob id a source file would intern under
    pub fn identify(&self, source: &Path) -> Result<BlobId> {
        let digest = Digest::of_file(source)?;
        let time = fsutil::mtime_millis(source)?;
        Ok(BlobId::new(digest, time))
    }

    /// true if the store currently tracks a live blob under this id
    pub fn contains(&self, id: &BlobId) -> bool {
        self.inner.table.lock().contains_key(id)
    }

    /// number of live blobs
    pub fn len(&self) -> usize {
        self.inner.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.table.lock().is_empty()
    }

    // the table lock is held across existence check, copy and insert so
    // concurrent adds of one id are linearizable: one creation wins and
    // the rest take references to it.
    fn intern(&self, source: &Path, id: BlobId, link: bool) -> Result<BlobRef> {
        let mut table = self.inner.table.lock();

        if let Some(state) = table.get_mut(&id) {
            state.refs += 1;
            return Ok(BlobRef {
                store: Arc::clone(&self.inner),
                id,
            });
        }

        let final_path = self.inner.dir.join(id.file_name());
        if link && fsutil::hard_link(source, &final_path).is_ok() {
            // shared inode: the seed directory is expected to be immutable
            fsutil::set_read_only(&final_path)?;
        } else {
            self.inner.copy_into(source, &final_path, id.time())?;
        }

        let handle = File::open(&final_path).with_path(&final_path)?;
        table.insert(id, BlobState { refs: 1, handle });

        Ok(BlobRef {
            store: Arc::clone(&self.inner),
            id,
        })
    }
}

impl StoreInner {
    fn blob_path(&self, id: &BlobId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    /// copy protocol: temp file in the store directory, captured mtime,
    /// rename with replace semantics, then read-only
    fn copy_into(&self, source: &Path, final_path: &Path, time: i64) -> Result<()> {
        let tmp = self.dir.join(format!("incoming-{}", Uuid::new_v4()));

        fs::copy(source, &tmp).with_path(source)?;
        File::open(&tmp).with_path(&tmp)?.sync_all().with_path(&tmp)?;
        fsutil::set_mtime_millis(&tmp, time)?;
        fsutil::atomic_rename(&tmp, final_path)?;
        fsutil::set_read_only(final_path)?;
        fsutil::fsync_dir(&self.dir)?;

        Ok(())
    }

    /// path to the blob file, recreating it from the held read handle if
    /// it was deleted out-of-band
    fn ensure_on_disk(&self, id: &BlobId) -> Result<PathBuf> {
        let path = self.blob_path(id);
        if path.exists() {
            return Ok(path);
        }

        let mut table = self.table.lock();
        let state = table.get_mut(id).ok_or(Error::UntrackedBlob(*id))?;

        // re-check: a racing caller may have recovered it already
        if !path.exists() {
            debug!(blob = %id, "blob file missing, recreating from held handle");

            let tmp = self.dir.join(format!("recover-{}", Uuid::new_v4()));
            {
                let mut src = &state.handle;
                src.seek(SeekFrom::Start(0)).with_path(&path)?;
                let mut out = File::create(&tmp).with_path(&tmp)?;
                io::copy(&mut src, &mut out).with_path(&tmp)?;
                out.sync_all().with_path(&tmp)?;
            }
            fsutil::set_mtime_millis(&tmp, id.time())?;
            fsutil::atomic_rename(&tmp, &path)?;
            fsutil::set_read_only(&path)?;

            // the old handle points at the unlinked inode; track the new one
            state.handle = File::open(&path).with_path(&path)?;
        }

        Ok(path)
    }

    fn acquire(&self, id: &BlobId) {
        if let Some(state) = self.table.lock().get_mut(id) {
            state.refs += 1;
        }
    }

    fn release(&self, id: &BlobId) {
        let mut table = self.table.lock();
        let Some(state) = table.get_mut(id) else {
            return;
        };
        state.refs -= 1;
        if state.refs == 0 {
            // dropping the state closes the held handle
            table.remove(id);
            let path = self.blob_path(id);
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(blob = %id, error = %e, "failed to unlink released blob");
                }
            }
        }
    }
}

/// counted reference to a blob in the store
///
/// cloning increments the blob's refcount; dropping the last reference
/// closes the held handle and unlinks the blob file.
pub struct BlobRef {
    store: Arc<StoreInner>,
    id: BlobId,
}

impl BlobRef {
    pub fn id(&self) -> &BlobId {
        &self.id
    }

    /// path to a readable file with the blob's bytes, with deletion recovery
    pub fn path(&self) -> Result<PathBuf> {
        self.store.ensure_on_disk(&self.id)
    }

    /// open the blob for reading, with deletion recovery
    pub fn open(&self) -> Result<File> {
        let path = self.path()?;
        File::open(&path).with_path(&path)
    }
}

impl Clone for BlobRef {
    fn clone(&self) -> Self {
        self.store.acquire(&self.id);
        Self {
            store: Arc::clone(&self.store),
            id: self.id,
        }
    }
}

impl Drop for BlobRef {
    fn drop(&mut self) {
        self.store.release(&self.id);
    }
}

impl PartialEq for BlobRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for BlobRef {}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobRef({})", self.id)
    }
}
