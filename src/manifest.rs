//! properties-style manifest persistence
//!
//! a manifest is a plain `path=blob_id` text file describing a
//! materialized directory. saving one next to a committed directory lets
//! a later process rebuild the fileset without re-hashing: entries whose
//! backing file still carries the recorded timestamp are interned by hard
//! link under their recorded id.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;
use uuid::Uuid;

use crate::env::Environment;
use crate::error::{Error, IoResultExt, Result};
use crate::fileset::Fileset;
use crate::fsutil;
use crate::types::{BlobId, Entry, MetaMap};

/// write a fileset's `path=blob_id` lines, sorted by path
///
/// written to a temp file in the same directory and renamed into place,
/// so a concurrent reader never observes a torn manifest.
pub fn save(fs: &Fileset, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let tmp = dir.join(format!("manifest-{}", Uuid::new_v4()));

    let file = File::create(&tmp).with_path(&tmp)?;
    let mut out = BufWriter::new(file);
    for entry in fs.entries() {
        writeln!(out, "{}={}", entry.path(), entry.id()).with_path(&tmp)?;
    }
    out.flush().with_path(&tmp)?;
    out.get_ref().sync_all().with_path(&tmp)?;
    drop(out);

    fsutil::atomic_rename(&tmp, path)?;
    fsutil::fsync_dir(dir)
}

/// rebuild a fileset from a manifest over a seeded directory
///
/// `dir` holds the files the manifest describes, laid out by logical
/// path. entries with a missing backing file, or one whose mtime no
/// longer matches the recorded id, are logged at debug and skipped;
/// everything else is interned by hard link without re-hashing.
pub fn seed(env: &Environment, dir: &Path, manifest: &Path) -> Result<Fileset> {
    let text = fs::read_to_string(manifest).with_path(manifest)?;
    let mut tree = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        // blob ids contain no '=', so the last one separates key and value
        let (rel, id) = line
            .rsplit_once('=')
            .ok_or_else(|| Error::ManifestParse(line.to_string()))?;
        let id: BlobId = id.parse()?;

        let source = dir.join(rel);
        if !source.is_file() {
            debug!(path = %source.display(), "manifest entry has no backing file, skipping");
            continue;
        }
        if fsutil::mtime_millis(&source)? != id.time() {
            debug!(path = %source.display(), "manifest entry is stale, skipping");
            continue;
        }

        let blob = env.store().intern_linked(&source, id)?;
        tree.insert(rel.to_string(), Entry::new(rel, blob, MetaMap::new()));
    }

    Ok(Fileset::from_tree(env.clone(), tree))
}
