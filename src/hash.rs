use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::{Digest as _, Md5};
use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};

/// read buffer size for streaming file hashing
const HASH_BUF_SIZE: usize = 1024;

/// MD5 digest used for content addressing
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 16]);

impl Digest {
    /// zero digest (useful as sentinel)
    pub const ZERO: Digest = Digest([0u8; 16]);

    /// create from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// parse from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| Error::InvalidBlobId(s.to_string()))?;
        if bytes.len() != 16 {
            return Err(Error::InvalidBlobId(s.to_string()));
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// get raw bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// convert to hex string (32 lowercase chars)
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// digest of an in-memory byte slice
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(Md5::digest(data).into())
    }

    /// digest of a file's content, streamed in fixed-size buffers
    pub fn of_file(path: &Path) -> Result<Self> {
        let mut file = File::open(path).with_path(path)?;
        let mut hasher = Md5::new();
        let mut buf = [0u8; HASH_BUF_SIZE];
        loop {
            let n = file.read(&mut buf).with_path(path)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self(hasher.finalize().into()))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", &self.to_hex()[..12])
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// incremental MD5 accumulator, for checksums over canonical serializations
pub struct ChecksumBuilder {
    hasher: Md5,
}

impl ChecksumBuilder {
    pub fn new() -> Self {
        Self { hasher: Md5::new() }
    }

    /// feed bytes
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// finalize and return digest
    pub fn finalize(self) -> Digest {
        Digest(self.hasher.finalize().into())
    }
}

impl Default for ChecksumBuilder {
    fn default() -> Self {
        Self::new()
    }
}
