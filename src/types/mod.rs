mod entry;
mod meta;

pub use entry::{BlobId, Entry};
pub use meta::{merge_meta, MetaMap, MetaValue};
