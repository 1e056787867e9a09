use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::hash::Digest;
use crate::store::BlobRef;
use crate::types::MetaMap;

/// identity of a stored blob: content digest plus captured mtime
///
/// the on-disk form (and the blob's file name) is `<32hex>.<millis>`.
/// two files with identical content but different timestamps get distinct
/// ids; identical content and timestamp share one id and one stored blob.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId {
    digest: Digest,
    time: i64,
}

impl BlobId {
    pub fn new(digest: Digest, time: i64) -> Self {
        Self { digest, time }
    }

    /// content digest
    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    /// captured last-modified milliseconds
    pub fn time(&self) -> i64 {
        self.time
    }

    /// the blob's file name inside the store directory
    pub fn file_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.digest, self.time)
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self)
    }
}

impl FromStr for BlobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let (hex, millis) = s
            .split_once('.')
            .ok_or_else(|| Error::InvalidBlobId(s.to_string()))?;
        let digest = Digest::from_hex(hex)?;
        let time = millis
            .parse::<i64>()
            .map_err(|_| Error::InvalidBlobId(s.to_string()))?;
        Ok(Self { digest, time })
    }
}

impl Serialize for BlobId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BlobId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// one row of a fileset tree
///
/// holds a counted reference to its blob; cloning an entry clones the
/// reference, and dropping the last clone releases the blob.
#[derive(Clone, Debug)]
pub struct Entry {
    path: String,
    blob: BlobRef,
    meta: MetaMap,
}

impl Entry {
    pub fn new(path: impl Into<String>, blob: BlobRef, meta: MetaMap) -> Self {
        Self {
            path: path.into(),
            blob,
            meta,
        }
    }

    /// logical path, forward-slash separated
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn id(&self) -> &BlobId {
        self.blob.id()
    }

    /// content hash, 32 lowercase hex chars
    pub fn hash(&self) -> String {
        self.id().digest().to_hex()
    }

    pub fn digest(&self) -> &Digest {
        self.id().digest()
    }

    /// captured last-modified milliseconds
    pub fn time(&self) -> i64 {
        self.id().time()
    }

    pub fn meta(&self) -> &MetaMap {
        &self.meta
    }

    pub(crate) fn blob(&self) -> &BlobRef {
        &self.blob
    }

    /// same blob and meta under a different logical path
    pub(crate) fn at_path(&self, path: impl Into<String>) -> Entry {
        Entry {
            path: path.into(),
            blob: self.blob.clone(),
            meta: self.meta.clone(),
        }
    }

    /// same blob and path with replaced meta
    pub(crate) fn with_meta(&self, meta: MetaMap) -> Entry {
        Entry {
            path: self.path.clone(),
            blob: self.blob.clone(),
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_id_display() {
        let id = BlobId::new(
            Digest::from_hex("abcdef0123456789abcdef0123456789").unwrap(),
            1234567890123,
        );
        assert_eq!(id.to_string(), "abcdef0123456789abcdef0123456789.1234567890123");
    }

    #[test]
    fn test_blob_id_parse_roundtrip() {
        let id: BlobId = "abcdef0123456789abcdef0123456789.1234567890123"
            .parse()
            .unwrap();
        assert_eq!(id.digest().to_hex(), "abcdef0123456789abcdef0123456789");
        assert_eq!(id.time(), 1234567890123);
        assert_eq!(id.to_string().parse::<BlobId>().unwrap(), id);
    }

    #[test]
    fn test_blob_id_parse_negative_time() {
        let id: BlobId = "abcdef0123456789abcdef0123456789.-5000".parse().unwrap();
        assert_eq!(id.time(), -5000);
    }

    #[test]
    fn test_blob_id_parse_rejects_garbage() {
        assert!("no-dot-here".parse::<BlobId>().is_err());
        assert!("tooshort.123".parse::<BlobId>().is_err());
        assert!("abcdef0123456789abcdef0123456789.notanumber"
            .parse::<BlobId>()
            .is_err());
    }

    #[test]
    fn test_blob_id_serde_json() {
        let id: BlobId = "abcdef0123456789abcdef0123456789.42".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: BlobId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
