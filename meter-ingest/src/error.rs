use std::path::PathBuf;

use meter_client::db::StoreError;

/// File-level failures. Anything narrower than a whole file is a
/// [`RecordError`](crate::sources::RecordError) and never reaches this type.
#[derive(thiserror::Error, Debug)]
pub enum ImportError {
    #[error("file content already imported as '{prior}'")]
    DuplicateContent { prior: String, fingerprint: String },
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ImportError {
    /// Duplicate content is reported as a skip, not a failure.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::DuplicateContent { .. })
    }
}
