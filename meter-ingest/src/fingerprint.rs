//! Content fingerprinting and the "already imported?" gate.

use meter_client::{
    db::Store,
    domain::{FileStatus, ImportedFile},
};

use crate::error::ImportError;

/// Hex BLAKE3 digest of the raw file bytes (64 characters).
pub fn fingerprint(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}

/// What the gate found for a fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Never seen before.
    Fresh,
    /// A previous attempt ended in `Error`; its row gets reopened.
    Retry(ImportedFile),
}

/// Fails with `DuplicateContent` when the same bytes were already imported or
/// are being imported right now.
pub async fn check_prior_import<S>(store: &S, fingerprint: &str) -> Result<GateDecision, ImportError>
where
    S: Store + ?Sized,
{
    match store.find_file_by_fingerprint(fingerprint).await? {
        None => Ok(GateDecision::Fresh),
        Some(prior) if prior.status == FileStatus::Error => {
            tracing::info!(
                prior = %prior.filename,
                fingerprint,
                "previous import of this content failed, retrying"
            );
            Ok(GateDecision::Retry(prior))
        }
        Some(prior) => {
            tracing::warn!(
                prior = %prior.filename,
                status = %prior.status,
                fingerprint,
                "file with same content already processed"
            );
            Err(ImportError::DuplicateContent {
                prior: prior.filename,
                fingerprint: fingerprint.to_string(),
            })
        }
    }
}
