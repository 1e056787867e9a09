use std::path::PathBuf;

use crate::types::BlobId;

/// error type for fileset operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("path not found in fileset: {0}")]
    PathNotFound(String),

    #[error("rename target already present: {0}")]
    RenameConflict(String),

    #[error("invalid blob id: {0}")]
    InvalidBlobId(String),

    #[error("blob not tracked by store: {0}")]
    UntrackedBlob(BlobId),

    #[error("malformed manifest line: {0}")]
    ManifestParse(String),

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// true when the underlying cause is a missing file or directory
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}

/// helper to wrap io errors with path context
pub trait IoResultExt<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.into(),
            source,
        })
    }
}
