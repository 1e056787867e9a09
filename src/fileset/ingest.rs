use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};
use crate::fileset::Fileset;
use crate::types::{merge_meta, Entry, MetaMap, MetaValue};

/// combiner resolving a path collision by producing merged bytes
///
/// receives readers over the colliding old and new content and a writer
/// for the merged output; it must fully consume and emit eagerly. the
/// caller closes all three streams afterward.
pub type Merger =
    Box<dyn Fn(&mut dyn Read, &mut dyn Read, &mut dyn Write) -> io::Result<()> + Send + Sync>;

/// options for [`Fileset::add_directory`]
///
/// include/exclude patterns use find (partial match) semantics on the
/// `/`-normalized relative path; exclude takes priority over include.
#[derive(Default)]
pub struct AddOptions {
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    mergers: Vec<(Regex, Merger)>,
    meta: MetaMap,
}

impl AddOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// require relative paths to match at least one include pattern
    pub fn include(mut self, pattern: Regex) -> Self {
        self.include.push(pattern);
        self
    }

    /// drop relative paths matching any exclude pattern
    pub fn exclude(mut self, pattern: Regex) -> Self {
        self.exclude.push(pattern);
        self
    }

    /// register a combiner for path collisions matching a pattern
    pub fn merger(
        mut self,
        pattern: Regex,
        combine: impl Fn(&mut dyn Read, &mut dyn Read, &mut dyn Write) -> io::Result<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.mergers.push((pattern, Box::new(combine)));
        self
    }

    /// tag every ingested entry with a meta key
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    fn admits(&self, rel: &str) -> bool {
        if self.exclude.iter().any(|re| re.is_match(rel)) {
            return false;
        }
        if !self.include.is_empty() && !self.include.iter().any(|re| re.is_match(rel)) {
            return false;
        }
        true
    }

    fn merger_for(&self, rel: &str) -> Option<&Merger> {
        self.mergers
            .iter()
            .find(|(re, _)| re.is_match(rel))
            .map(|(_, m)| m)
    }
}

impl Fileset {
    /// union a source directory's regular files into the fileset
    ///
    /// the walk follows symlinks and skips everything that is not a
    /// regular file. every ingested entry is tagged with `options.meta`
    /// (merged into the meta of a replaced entry on collision). a file
    /// vanishing mid-walk is logged and skipped. on a path collision a
    /// matching merger combines old and new content into a fresh blob;
    /// without one the newly walked entry replaces the old.
    pub fn add_directory(&self, source: &Path, options: &AddOptions) -> Result<Fileset> {
        let mut tree = self.tree().clone();

        for walked in WalkDir::new(source).follow_links(true) {
            let walked = match walked {
                Ok(entry) => entry,
                Err(e) if e.io_error().map(|io| io.kind()) == Some(io::ErrorKind::NotFound) => {
                    debug!(path = ?e.path(), "entry vanished during walk, skipping");
                    continue;
                }
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.to_path_buf())
                        .unwrap_or_else(|| source.to_path_buf());
                    return Err(Error::Io {
                        path,
                        source: e.into(),
                    });
                }
            };
            if !walked.file_type().is_file() {
                continue;
            }

            let rel = logical_path(source, walked.path());
            if !options.admits(&rel) {
                continue;
            }

            let existing = tree.get(&rel).cloned();
            let entry = match &existing {
                Some(old) => match options.merger_for(&rel) {
                    Some(merger) => self.combine(old, walked.path(), &rel, merger, &options.meta),
                    None => self
                        .ingest(walked.path(), &rel, merge_meta(old.meta(), &options.meta)),
                },
                None => self.ingest(walked.path(), &rel, options.meta.clone()),
            };

            match entry {
                Ok(entry) => {
                    tree.insert(rel, entry);
                }
                Err(e) if e.is_not_found() => {
                    debug!(path = ?walked.path(), "file vanished before ingestion, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Fileset::from_tree(self.env().clone(), tree))
    }

    fn ingest(&self, source: &Path, rel: &str, meta: MetaMap) -> Result<Entry> {
        let blob = self.env().store().add(source)?;
        Ok(Entry::new(rel, blob, meta))
    }

    /// run a combiner over the colliding contents and ingest the result
    /// as a fresh blob replacing both
    fn combine(
        &self,
        old: &Entry,
        incoming: &Path,
        rel: &str,
        merger: &Merger,
        meta: &MetaMap,
    ) -> Result<Entry> {
        let scratch = self.env().scratch().make_dir("merge-")?;
        let out_path = scratch.join(file_name_of(rel));
        {
            let mut old_reader = old.blob().open()?;
            let mut new_reader = File::open(incoming).with_path(incoming)?;
            let mut out = File::create(&out_path).with_path(&out_path)?;
            merger(&mut old_reader, &mut new_reader, &mut out).with_path(&out_path)?;
        }
        let blob = self.env().store().add(&out_path)?;
        Ok(Entry::new(rel, blob, merge_meta(old.meta(), meta)))
    }
}

/// relative path normalized to forward slashes
fn logical_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.join("/")
}

fn file_name_of(rel: &str) -> &str {
    rel.rsplit('/').next().unwrap_or(rel)
}
