//! Persistence seam for the import core.
//!
//! A [`Store`] hands out one [`UnitOfWork`] per file import. Everything the
//! import writes goes through that unit and becomes visible only on
//! [`UnitOfWork::commit`]. Failure bookkeeping goes through
//! [`Store::record_failure`], which runs in its own transaction so that a rolled
//! back import still leaves an `Error` row behind.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use crate::domain::{
    FileRef, FileUpdate, ImportedFile, MeterDefaults, MeterRef, NewFile, ReadingDefaults, ReadingKey,
    ReadingRef,
};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("fingerprint {fingerprint} already recorded for '{filename}'")]
    DuplicateFingerprint { fingerprint: String, filename: String },
    #[error("unknown imported file id {0}")]
    UnknownFile(i64),
    #[error("invalid stored value: {0}")]
    Decode(String),
}

/// Result of a create-or-fetch: the row's id and whether this call inserted it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted<T> {
    pub id: T,
    pub created: bool,
}

impl<T> Upserted<T> {
    pub fn created(id: T) -> Self {
        Self { id, created: true }
    }

    pub fn existing(id: T) -> Self {
        Self { id, created: false }
    }
}

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn find_file_by_fingerprint(&self, fingerprint: &str) -> Result<Option<ImportedFile>, StoreError>;

    /// True when some earlier file used this name, whatever its content.
    async fn filename_seen(&self, filename: &str) -> Result<bool, StoreError>;

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Durably marks the file with this fingerprint as `Error`, creating the row
    /// if the failed import never got to commit one.
    async fn record_failure(&self, file: &NewFile) -> Result<FileRef, StoreError>;
}

/// One atomic import. Dropping a unit without committing discards its writes.
#[async_trait::async_trait]
pub trait UnitOfWork: Send {
    async fn create_file(&mut self, file: &NewFile) -> Result<FileRef, StoreError>;

    async fn update_file(&mut self, file: FileRef, update: &FileUpdate) -> Result<(), StoreError>;

    /// Moves a failed file back to `Processing` for a retry. Fails with
    /// [`StoreError::DuplicateFingerprint`] once the row has left `Error`.
    async fn reopen_failed_file(&mut self, file: &ImportedFile) -> Result<(), StoreError>;

    /// Fetches the meter with this serial or inserts it from `defaults`.
    /// Safe against a concurrent insert of the same serial.
    async fn upsert_meter(&mut self, serial: &str, defaults: &MeterDefaults) -> Result<Upserted<MeterRef>, StoreError>;

    /// Fetches the reading with this natural key or inserts it from `defaults`.
    async fn upsert_reading(
        &mut self,
        key: &ReadingKey,
        defaults: &ReadingDefaults,
    ) -> Result<Upserted<ReadingRef>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
