//! fileset - immutable filesets over a content-addressed blob store
//!
//! logical snapshots of directory trees whose contents are
//! content-addressed, structurally shared, and materialized to concrete
//! directories on demand. built for build pipelines and asset processors
//! that derive successive versions of a tree (diff, merge, filter)
//! without mutating source data and without paying for full copies.
//!
//! # Core concepts
//!
//! - **Blob**: an immutable on-disk file named `<32hex-md5>.<mtime-millis>`,
//!   owned and reference-counted by the store
//! - **Entry**: a `(path, blob, meta)` row of a fileset tree
//! - **Fileset**: an immutable mapping from logical path to entry; every
//!   update returns a new fileset
//! - **Commit**: materialization of a fileset into a directory via hard
//!   links, reconciled against the directory's last committed state
//!
//! # Example usage
//!
//! ```no_run
//! use fileset::{ops, AddOptions, Environment};
//! use std::path::Path;
//!
//! // one environment per process: blob store, scratch space, shadow state
//! let env = Environment::new().unwrap();
//!
//! // snapshot a source directory
//! let fs = env
//!     .new_fileset()
//!     .add_directory(Path::new("/source"), &AddOptions::default())
//!     .unwrap();
//!
//! // materialize it with hard links
//! ops::commit(&fs, Path::new("/destination")).unwrap();
//! ```

mod env;
mod error;
mod fsutil;
mod hash;
mod scratch;
mod store;
mod types;

pub mod fileset;
pub mod manifest;
pub mod ops;

pub use env::Environment;
pub use error::{Error, Result};
pub use fileset::{AddOptions, Fileset, Merger};
pub use hash::Digest;
pub use ops::{added, changed, commit, diff, diff_by, removed, Diff, DiffKey};
pub use scratch::ScratchRoot;
pub use store::{BlobRef, BlobStore};
pub use types::{merge_meta, BlobId, Entry, MetaMap, MetaValue};
