use std::collections::BTreeMap;

use crate::fileset::Fileset;
use crate::types::Entry;

/// entry identity used when comparing filesets
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DiffKey {
    /// content hash plus captured timestamp (the blob id)
    #[default]
    BlobId,
    /// content hash only, ignoring timestamps
    Hash,
}

impl DiffKey {
    fn same(&self, a: &Entry, b: &Entry) -> bool {
        match self {
            DiffKey::BlobId => a.id() == b.id(),
            DiffKey::Hash => a.digest() == b.digest(),
        }
    }
}

/// set-algebraic difference between two filesets
///
/// `added` and `changed` narrow the after tree; `removed` narrows the
/// before tree. the three subsets are pairwise disjoint by construction.
pub struct Diff {
    pub added: Fileset,
    pub removed: Fileset,
    pub changed: Fileset,
}

impl Diff {
    /// the entries a consumer has to apply: `added ∪ changed`
    pub fn delta(&self) -> Fileset {
        self.added.merge(&self.changed)
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// compare two filesets by blob id
///
/// an absent `before` makes everything added.
pub fn diff(before: Option<&Fileset>, after: &Fileset) -> Diff {
    diff_by(before, after, DiffKey::BlobId)
}

/// compare two filesets under a chosen entry identity
pub fn diff_by(before: Option<&Fileset>, after: &Fileset, key: DiffKey) -> Diff {
    let mut added = BTreeMap::new();
    let mut removed = BTreeMap::new();
    let mut changed = BTreeMap::new();

    match before {
        None => {
            added = after.tree().clone();
        }
        Some(before) => {
            for (path, entry) in after.tree() {
                match before.tree().get(path) {
                    None => {
                        added.insert(path.clone(), entry.clone());
                    }
                    Some(prev) if !key.same(prev, entry) => {
                        changed.insert(path.clone(), entry.clone());
                    }
                    Some(_) => {}
                }
            }
            for (path, entry) in before.tree() {
                if !after.contains(path) {
                    removed.insert(path.clone(), entry.clone());
                }
            }
        }
    }

    let before_env = before.map(|b| b.env()).unwrap_or_else(|| after.env());
    Diff {
        added: Fileset::from_tree(after.env().clone(), added),
        removed: Fileset::from_tree(before_env.clone(), removed),
        changed: Fileset::from_tree(after.env().clone(), changed),
    }
}

/// paths present only in `after`
pub fn added(before: Option<&Fileset>, after: &Fileset) -> Fileset {
    diff(before, after).added
}

/// paths present only in `before`
pub fn removed(before: Option<&Fileset>, after: &Fileset) -> Fileset {
    diff(before, after).removed
}

/// paths present in both whose entry identity differs
pub fn changed(before: Option<&Fileset>, after: &Fileset) -> Fileset {
    diff(before, after).changed
}
