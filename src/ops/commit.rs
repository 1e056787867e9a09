use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::env::Shadow;
use crate::error::{Error, IoResultExt, Result};
use crate::fileset::{AddOptions, Fileset};
use crate::fsutil;
use crate::ops::diff::diff;
use crate::types::Entry;

/// materialize a fileset into a target directory using hard links
///
/// reconciles against the directory's last committed state to touch only
/// what changed: a shadow record per target directory remembers the last
/// fileset committed there and the directory mtime observed at that time.
/// a target touched out-of-band since is re-ingested to act as the
/// previous state, which also restores files deleted behind our back.
///
/// entries that cannot be materialized (a directory occupies the entry
/// path, or a file occupies a required parent) are logged at warn and
/// omitted from the returned fileset; the commit continues.
pub fn commit(fs: &Fileset, target: &Path) -> Result<Fileset> {
    fs::create_dir_all(target).with_path(target)?;
    let canon = target.canonicalize().with_path(target)?;
    let env = fs.env().clone();

    // exclusive across read, apply and update of the shadow record
    let mut shadow = env.shadow();

    let previous = match shadow.get(&canon) {
        Some(s) if fsutil::mtime_millis(&canon)? <= s.dir_mtime => {
            Fileset::from_tree(env.clone(), s.tree.clone())
        }
        _ => {
            debug!(target = %canon.display(), "no fresh shadow state, ingesting current contents");
            env.new_fileset()
                .add_directory(&canon, &AddOptions::default())?
        }
    };

    let d = diff(Some(&previous), fs);

    // clear entries that are gone or stale
    for path in d.removed.ls().chain(d.changed.ls()) {
        let dest = canon.join(path);
        match fs::remove_file(&dest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(Error::Io { path: dest, source }),
        }
    }
    for path in d.removed.ls() {
        prune_empty_parents(&canon, path);
    }

    // deep files first, so a concurrently cleaned-up parent directory is
    // recreated before its shallower siblings are linked
    let mut pending: Vec<&Entry> = d.added.entries().chain(d.changed.entries()).collect();
    pending.sort_by(|a, b| b.path().len().cmp(&a.path().len()));

    let mut kept = fs.clone();
    for entry in pending {
        if let Err(e) = link_entry(&canon, entry) {
            warn!(
                path = %entry.path(),
                error = %e,
                "cannot materialize entry, omitting it from the committed fileset"
            );
            kept = kept.remove([entry.path()]);
        }
    }

    let dir_mtime = fsutil::mtime_millis(&canon)?;
    shadow.insert(
        canon,
        Shadow {
            tree: kept.tree().clone(),
            dir_mtime,
        },
    );

    Ok(kept)
}

/// hard-link one entry's blob into place under the target root
fn link_entry(root: &Path, entry: &Entry) -> Result<()> {
    let dest = root.join(entry.path());

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }
    if dest.is_dir() {
        return Err(Error::Io {
            path: dest,
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a directory occupies the entry path",
            ),
        });
    }
    if dest.exists() {
        fs::remove_file(&dest).with_path(&dest)?;
    }

    let blob = entry.blob().path()?;
    fsutil::hard_link(&blob, &dest)
}

/// best-effort removal of now-empty ancestor directories of an unlinked
/// path, never climbing past the target root
fn prune_empty_parents(root: &Path, rel: &str) {
    let mut dir = Path::new(rel).parent();
    while let Some(d) = dir {
        if d.as_os_str().is_empty() {
            break;
        }
        if fs::remove_dir(root.join(d)).is_err() {
            break;
        }
        dir = d.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::io::Read;

    use crate::env::Environment;
    use crate::hash::Digest;

    fn test_env() -> Environment {
        Environment::new().unwrap()
    }

    fn write_assets(dir: &Path) {
        fs::write(dir.join("file1.md"), "this is a file").unwrap();
        fs::write(dir.join("file2.md"), "second file").unwrap();
        fs::create_dir(dir.join("dir1")).unwrap();
        fs::write(dir.join("dir1/file3.md"), "third file").unwrap();
    }

    fn ingest(env: &Environment, dir: &Path) -> Fileset {
        env.new_fileset()
            .add_directory(dir, &AddOptions::default())
            .unwrap()
    }

    fn dir_files(root: &Path) -> BTreeSet<String> {
        walkdir::WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let rel = e.path().strip_prefix(root).unwrap();
                rel.to_string_lossy().replace('\\', "/")
            })
            .collect()
    }

    fn set(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|s| s.to_string()).collect()
    }

    /// overwrite a committed (hard-linked, read-only) file with new bytes
    fn replace_file(path: &Path, content: &str) {
        fs::remove_file(path).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_round_trip() {
        let env = test_env();
        let src = tempfile::tempdir().unwrap();
        write_assets(src.path());
        let fs1 = ingest(&env, src.path());

        let target = tempfile::tempdir().unwrap();
        let committed = commit(&fs1, target.path()).unwrap();

        assert_eq!(
            dir_files(target.path()),
            set(&["dir1/file3.md", "file1.md", "file2.md"])
        );
        assert_eq!(
            fs::read(target.path().join("file1.md")).unwrap(),
            b"this is a file"
        );
        // last-modified preserved from the source
        assert_eq!(
            fsutil::mtime_millis(&target.path().join("file1.md")).unwrap(),
            fsutil::mtime_millis(&src.path().join("file1.md")).unwrap()
        );
        // the fileset comes back unchanged
        assert_eq!(committed.checksum(true), fs1.checksum(true));
    }

    #[test]
    fn test_update_then_add() {
        let env = test_env();
        let src = tempfile::tempdir().unwrap();
        write_assets(src.path());
        let fs1 = ingest(&env, src.path());

        let d = tempfile::tempdir().unwrap();
        commit(&fs1, d.path()).unwrap();

        replace_file(&d.path().join("file1.md"), "NEW CONTENT");
        fs::write(d.path().join("dir1/file4.md"), "NEW FILE").unwrap();

        let fs2 = fs1.add_directory(d.path(), &AddOptions::default()).unwrap();

        let d2 = tempfile::tempdir().unwrap();
        commit(&fs2, d2.path()).unwrap();

        assert_eq!(
            dir_files(d2.path()),
            set(&["dir1/file3.md", "dir1/file4.md", "file1.md", "file2.md"])
        );
        assert_eq!(
            fs::read(d2.path().join("file1.md")).unwrap(),
            b"NEW CONTENT"
        );
    }

    #[test]
    fn test_remove_then_recommit() {
        let env = test_env();
        let src = tempfile::tempdir().unwrap();
        write_assets(src.path());
        let fs1 = ingest(&env, src.path());

        let d = tempfile::tempdir().unwrap();
        commit(&fs1, d.path()).unwrap();

        let fs2 = fs1.remove(["dir1/file3.md"]);
        commit(&fs2, d.path()).unwrap();

        assert_eq!(dir_files(d.path()), set(&["file1.md", "file2.md"]));
        // the emptied directory is pruned
        assert!(!d.path().join("dir1").exists());
    }

    #[test]
    fn test_meta_filtered_outputs() {
        let env = test_env();
        let src = tempfile::tempdir().unwrap();
        write_assets(src.path());

        let inputs = env
            .new_fileset()
            .add_directory(src.path(), &AddOptions::default().meta("input", true))
            .unwrap();

        let w = tempfile::tempdir().unwrap();
        commit(&inputs, w.path()).unwrap();

        fs::create_dir(w.path().join("out")).unwrap();
        fs::write(w.path().join("out/file1.out"), "produced 1").unwrap();
        fs::write(w.path().join("out/file2.out"), "produced 2").unwrap();

        let opts = AddOptions::default()
            .include(regex::Regex::new(r"\.out$").unwrap())
            .meta("output", true);
        let all = inputs.add_directory(w.path(), &opts).unwrap();

        let outputs = all.filter_by_meta(|m| {
            m.get("output").and_then(|v| v.as_bool()).unwrap_or(false)
        });

        let d3 = tempfile::tempdir().unwrap();
        commit(&outputs, d3.path()).unwrap();

        assert_eq!(
            dir_files(d3.path()),
            set(&["out/file1.out", "out/file2.out"])
        );
    }

    #[test]
    fn test_recommit_is_idempotent() {
        let env = test_env();
        let src = tempfile::tempdir().unwrap();
        write_assets(src.path());
        let fs1 = ingest(&env, src.path());

        let d = tempfile::tempdir().unwrap();
        commit(&fs1, d.path()).unwrap();
        let before = dir_files(d.path());

        commit(&fs1, d.path()).unwrap();
        assert_eq!(dir_files(d.path()), before);
    }

    #[test]
    fn test_out_of_band_deletion_restored() {
        let env = test_env();
        let src = tempfile::tempdir().unwrap();
        write_assets(src.path());
        let fs1 = ingest(&env, src.path());

        let d = tempfile::tempdir().unwrap();
        commit(&fs1, d.path()).unwrap();

        let recorded = fsutil::mtime_millis(d.path()).unwrap();
        fs::remove_file(d.path().join("file2.md")).unwrap();
        // make the out-of-band touch visible even on coarse clocks
        fsutil::set_mtime_millis(d.path(), recorded + 10_000).unwrap();

        // the shadow is stale, so the current contents become the
        // previous state and the missing file shows up as added
        commit(&fs1, d.path()).unwrap();
        assert_eq!(
            fs::read(d.path().join("file2.md")).unwrap(),
            b"second file"
        );
    }

    #[test]
    fn test_committed_files_share_blob_inode() {
        use std::os::unix::fs::MetadataExt;

        let env = test_env();
        let src = tempfile::tempdir().unwrap();
        write_assets(src.path());
        let fs1 = ingest(&env, src.path());

        let d = tempfile::tempdir().unwrap();
        commit(&fs1, d.path()).unwrap();

        let blob = fs1.content_path("file1.md").unwrap().unwrap();
        assert_eq!(
            fs::metadata(d.path().join("file1.md")).unwrap().ino(),
            fs::metadata(&blob).unwrap().ino()
        );
        // hard links inherit the blob's read-only mode
        assert!(fs::metadata(d.path().join("file1.md"))
            .unwrap()
            .permissions()
            .readonly());
    }

    #[test]
    fn test_commit_after_blob_deletion_recovers() {
        let env = test_env();
        let src = tempfile::tempdir().unwrap();
        write_assets(src.path());
        let fs1 = ingest(&env, src.path());

        let blob = fs1.content_path("file1.md").unwrap().unwrap();
        let mut perms = fs::metadata(&blob).unwrap().permissions();
        perms.set_readonly(false);
        fs::set_permissions(&blob, perms).unwrap();
        fs::remove_file(&blob).unwrap();

        let d = tempfile::tempdir().unwrap();
        commit(&fs1, d.path()).unwrap();

        let mut bytes = Vec::new();
        fs1.open_content("file1.md")
            .unwrap()
            .unwrap()
            .read_to_end(&mut bytes)
            .unwrap();
        assert_eq!(Digest::of_bytes(&bytes).to_hex(), fs1.hash_of("file1.md").unwrap());
        assert_eq!(
            fs::read(d.path().join("file1.md")).unwrap(),
            b"this is a file"
        );
    }

    #[test]
    fn test_conflicting_entry_is_omitted() {
        let env = test_env();

        // merging two sources can leave a fileset where one entry's path
        // is a directory prefix of another's; they cannot both land
        let files = tempfile::tempdir().unwrap();
        fs::write(files.path().join("blocked"), "i want to be a file").unwrap();
        fs::write(files.path().join("ok.txt"), "fine").unwrap();

        let dirs = tempfile::tempdir().unwrap();
        fs::create_dir(dirs.path().join("blocked")).unwrap();
        fs::write(dirs.path().join("blocked/inner.txt"), "nested").unwrap();

        let fs1 = ingest(&env, files.path())
            .add_directory(dirs.path(), &AddOptions::default())
            .unwrap();
        assert!(fs1.contains("blocked") && fs1.contains("blocked/inner.txt"));

        let d = tempfile::tempdir().unwrap();
        let committed = commit(&fs1, d.path()).unwrap();

        // the deeper entry is linked first and claims the directory; the
        // file entry is dropped from the committed fileset
        assert!(committed.contains("blocked/inner.txt"));
        assert!(!committed.contains("blocked"));
        assert!(committed.contains("ok.txt"));
        assert_eq!(
            fs::read(d.path().join("blocked/inner.txt")).unwrap(),
            b"nested"
        );
        assert_eq!(fs::read(d.path().join("ok.txt")).unwrap(), b"fine");
    }

    #[test]
    fn test_changed_file_is_replaced() {
        let env = test_env();

        let src = tempfile::tempdir().unwrap();
        fs::write(src.path().join("f.txt"), "version one").unwrap();
        let fs1 = ingest(&env, src.path());

        let d = tempfile::tempdir().unwrap();
        commit(&fs1, d.path()).unwrap();

        replace_file(&src.path().join("f.txt"), "version two");
        let fs2 = env.new_fileset().add_directory(src.path(), &AddOptions::default()).unwrap();

        commit(&fs2, d.path()).unwrap();
        assert_eq!(fs::read(d.path().join("f.txt")).unwrap(), b"version two");
    }
}
