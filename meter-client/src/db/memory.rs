use std::{collections::HashMap, sync::Arc};

use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Store, StoreError, UnitOfWork, Upserted};
use crate::domain::{
    FileRef, FileStatus, FileUpdate, HeaderFields, ImportedFile, Meter, MeterDefaults, MeterRef, NewFile, Reading,
    ReadingDefaults, ReadingKey, ReadingRef,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    files: Vec<ImportedFile>,
    meters: Vec<Meter>,
    meter_by_serial: HashMap<String, MeterRef>,
    readings: Vec<Reading>,
    reading_by_key: HashMap<ReadingKey, ReadingRef>,
}

impl MemoryState {
    fn file_by_fingerprint(&self, fingerprint: &str) -> Option<&ImportedFile> {
        self.files.iter().find(|f| f.fingerprint == fingerprint)
    }

    fn file_mut(&mut self, id: FileRef) -> Result<&mut ImportedFile, StoreError> {
        self.files
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or(StoreError::UnknownFile(id.0))
    }

    fn insert_file(&mut self, file: &NewFile) -> FileRef {
        let id = FileRef(self.files.len() as i64 + 1);
        self.files.push(ImportedFile {
            id,
            filename: file.filename.clone(),
            format: file.format,
            fingerprint: file.fingerprint.clone(),
            status: file.status,
            record_count: 0,
            header: HeaderFields::default(),
            imported_at: OffsetDateTime::now_utc(),
        });
        id
    }
}

/// Process-local store used by tests and dry runs.
///
/// There are no database constraints to lean on here, so the unit of work
/// holds the store lock from `begin` until commit or rollback. Imports against
/// one `InMemoryStore` are therefore serialized, which is what keeps the
/// serial-number and natural-key uniqueness intact under concurrent callers.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn files(&self) -> Vec<ImportedFile> {
        self.state.lock().await.files.clone()
    }

    pub async fn meters(&self) -> Vec<Meter> {
        self.state.lock().await.meters.clone()
    }

    pub async fn readings(&self) -> Vec<Reading> {
        self.state.lock().await.readings.clone()
    }
}

#[async_trait::async_trait]
impl Store for InMemoryStore {
    async fn find_file_by_fingerprint(&self, fingerprint: &str) -> Result<Option<ImportedFile>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.file_by_fingerprint(fingerprint).cloned())
    }

    async fn filename_seen(&self, filename: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state.files.iter().any(|f| f.filename == filename))
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryUnit {
            guard,
            snapshot: Some(snapshot),
        }))
    }

    async fn record_failure(&self, file: &NewFile) -> Result<FileRef, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.files.iter_mut().find(|f| f.fingerprint == file.fingerprint) {
            existing.status = FileStatus::Error;
            return Ok(existing.id);
        }
        let failed = NewFile {
            status: FileStatus::Error,
            ..file.clone()
        };
        Ok(state.insert_file(&failed))
    }
}

struct MemoryUnit {
    guard: OwnedMutexGuard<MemoryState>,
    /// State at `begin`; restored unless the unit commits.
    snapshot: Option<MemoryState>,
}

impl Drop for MemoryUnit {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait::async_trait]
impl UnitOfWork for MemoryUnit {
    async fn create_file(&mut self, file: &NewFile) -> Result<FileRef, StoreError> {
        if let Some(existing) = self.guard.file_by_fingerprint(&file.fingerprint) {
            return Err(StoreError::DuplicateFingerprint {
                fingerprint: file.fingerprint.clone(),
                filename: existing.filename.clone(),
            });
        }
        Ok(self.guard.insert_file(file))
    }

    async fn update_file(&mut self, file: FileRef, update: &FileUpdate) -> Result<(), StoreError> {
        let row = self.guard.file_mut(file)?;
        row.status = update.status;
        row.record_count = update.record_count;
        if let Some(header) = &update.header {
            row.header = header.clone();
        }
        Ok(())
    }

    async fn reopen_failed_file(&mut self, file: &ImportedFile) -> Result<(), StoreError> {
        let row = self.guard.file_mut(file.id)?;
        if row.status != FileStatus::Error {
            return Err(StoreError::DuplicateFingerprint {
                fingerprint: row.fingerprint.clone(),
                filename: row.filename.clone(),
            });
        }
        row.status = FileStatus::Processing;
        Ok(())
    }

    async fn upsert_meter(&mut self, serial: &str, defaults: &MeterDefaults) -> Result<Upserted<MeterRef>, StoreError> {
        if let Some(id) = self.guard.meter_by_serial.get(serial) {
            return Ok(Upserted::existing(*id));
        }

        let id = MeterRef(self.guard.meters.len() as i64 + 1);
        self.guard.meters.push(Meter {
            id,
            serial_number: serial.to_string(),
            point_id: defaults.point_id.clone(),
            energy_type: defaults.energy_type,
            created_at: defaults.created_at,
            imported_file: defaults.imported_file,
        });
        self.guard.meter_by_serial.insert(serial.to_string(), id);
        Ok(Upserted::created(id))
    }

    async fn upsert_reading(
        &mut self,
        key: &ReadingKey,
        defaults: &ReadingDefaults,
    ) -> Result<Upserted<ReadingRef>, StoreError> {
        if let Some(id) = self.guard.reading_by_key.get(key) {
            return Ok(Upserted::existing(*id));
        }

        let id = ReadingRef(self.guard.readings.len() as i64 + 1);
        self.guard.readings.push(Reading {
            id,
            meter: key.meter,
            register_id: key.register_id.clone(),
            taken_at: key.taken_at,
            value: key.value,
            reading_type: defaults.reading_type.clone(),
            measurement_method: defaults.measurement_method.clone(),
            imported_file: defaults.imported_file,
        });
        self.guard.reading_by_key.insert(key.clone(), id);
        Ok(Upserted::created(id))
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        drop(self);
        Ok(())
    }
}
