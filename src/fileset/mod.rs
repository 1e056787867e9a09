mod ingest;

pub use ingest::{AddOptions, Merger};

use std::collections::BTreeMap;
use std::fs::File;
use std::path::PathBuf;

use tracing::warn;

use crate::env::Environment;
use crate::error::{Error, IoResultExt, Result};
use crate::hash::ChecksumBuilder;
use crate::types::{merge_meta, Entry, MetaMap};

/// an immutable mapping from logical path to entry
///
/// all update operations are functional: they return a new fileset and
/// leave the input untouched. entries share blobs across filesets through
/// counted references, so derived filesets cost no file copies.
#[derive(Clone)]
pub struct Fileset {
    env: Environment,
    tree: BTreeMap<String, Entry>,
}

impl Fileset {
    /// an empty fileset bound to an environment
    pub fn empty(env: Environment) -> Self {
        Self {
            env,
            tree: BTreeMap::new(),
        }
    }

    pub(crate) fn from_tree(env: Environment, tree: BTreeMap<String, Entry>) -> Self {
        Self { env, tree }
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub(crate) fn tree(&self) -> &BTreeMap<String, Entry> {
        &self.tree
    }

    /// number of entries
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.tree.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.tree.get(path)
    }

    /// logical paths present in the fileset
    pub fn ls(&self) -> impl Iterator<Item = &str> {
        self.tree.keys().map(|s| s.as_str())
    }

    /// entries of the fileset
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.tree.values()
    }

    /// fileset without the given paths; unknown paths are ignored
    pub fn remove<P: AsRef<str>>(&self, paths: impl IntoIterator<Item = P>) -> Fileset {
        let mut tree = self.tree.clone();
        for path in paths {
            tree.remove(path.as_ref());
        }
        Self {
            env: self.env.clone(),
            tree,
        }
    }

    /// move an entry to a new logical path
    ///
    /// fails with `PathNotFound` if `from` is absent and `RenameConflict`
    /// if `to` is already occupied. renaming a present path onto itself
    /// is the identity.
    pub fn rename(&self, from: &str, to: &str) -> Result<Fileset> {
        let entry = self
            .tree
            .get(from)
            .ok_or_else(|| Error::PathNotFound(from.to_string()))?;
        if from == to {
            return Ok(self.clone());
        }
        if self.tree.contains_key(to) {
            return Err(Error::RenameConflict(to.to_string()));
        }

        let moved = entry.at_path(to);
        let mut tree = self.tree.clone();
        tree.remove(from);
        tree.insert(to.to_string(), moved);

        Ok(Self {
            env: self.env.clone(),
            tree,
        })
    }

    /// fileset narrowed to entries the predicate accepts
    pub fn filter(&self, pred: impl Fn(&Entry) -> bool) -> Fileset {
        let tree = self
            .tree
            .iter()
            .filter(|(_, entry)| pred(entry))
            .map(|(path, entry)| (path.clone(), entry.clone()))
            .collect();
        Self {
            env: self.env.clone(),
            tree,
        }
    }

    /// fileset narrowed by a predicate over entry metadata
    pub fn filter_by_meta(&self, pred: impl Fn(&MetaMap) -> bool) -> Fileset {
        self.filter(|entry| pred(entry.meta()))
    }

    /// path-union of two filesets
    ///
    /// on a path collision the entry with the greater captured time wins
    /// and keeps its blob; the metas of both are unioned with the winner
    /// overlaying the loser. a collision that discards different content
    /// or meta is reported at warn level.
    pub fn merge(&self, other: &Fileset) -> Fileset {
        let mut tree = self.tree.clone();
        for (path, incoming) in &other.tree {
            let merged = match tree.get(path) {
                None => incoming.clone(),
                Some(existing) => {
                    let (winner, loser) = if incoming.time() > existing.time() {
                        (incoming, existing)
                    } else {
                        (existing, incoming)
                    };
                    if loser.digest() != winner.digest() || loser.meta() != winner.meta() {
                        warn!(
                            path = %path,
                            kept = %winner.id(),
                            dropped = %loser.id(),
                            "fileset merge discarded a conflicting entry"
                        );
                    }
                    winner.with_meta(merge_meta(loser.meta(), winner.meta()))
                }
            };
            tree.insert(path.clone(), merged);
        }
        Self {
            env: self.env.clone(),
            tree,
        }
    }

    /// fold [`Fileset::merge`] over any number of filesets
    pub fn merge_with<'a>(&self, others: impl IntoIterator<Item = &'a Fileset>) -> Fileset {
        others
            .into_iter()
            .fold(self.clone(), |acc, other| acc.merge(other))
    }

    /// content hash of the entry at a path, if present
    pub fn hash_of(&self, path: &str) -> Option<String> {
        self.tree.get(path).map(|e| e.hash())
    }

    /// captured last-modified millis of the entry at a path, if present
    pub fn time_of(&self, path: &str) -> Option<i64> {
        self.tree.get(path).map(|e| e.time())
    }

    /// path to a readable on-disk file with the entry's bytes
    ///
    /// goes through the blob store, so an out-of-band deleted blob file is
    /// recreated before the path is returned. `None` for absent paths.
    pub fn content_path(&self, path: &str) -> Result<Option<PathBuf>> {
        match self.tree.get(path) {
            None => Ok(None),
            Some(entry) => entry.blob().path().map(Some),
        }
    }

    /// open the entry's bytes for reading; `None` for absent paths
    pub fn open_content(&self, path: &str) -> Result<Option<File>> {
        match self.content_path(path)? {
            None => Ok(None),
            Some(p) => File::open(&p).with_path(&p).map(Some),
        }
    }

    /// MD5 over the canonical serialization of the fileset
    ///
    /// triples of `(path, hash[, time])` are fed in lexicographic path
    /// order, so two filesets with equal normalized sets produce equal
    /// checksums regardless of construction order.
    pub fn checksum(&self, include_times: bool) -> String {
        let mut sum = ChecksumBuilder::new();
        for (path, entry) in &self.tree {
            sum.update(path.as_bytes());
            sum.update(b"\n");
            sum.update(entry.hash().as_bytes());
            sum.update(b"\n");
            if include_times {
                sum.update(entry.time().to_string().as_bytes());
                sum.update(b"\n");
            }
        }
        sum.finalize().to_hex()
    }
}
