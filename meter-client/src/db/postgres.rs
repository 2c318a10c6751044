use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    Postgres, Transaction,
};
use time::OffsetDateTime;

use super::{Store, StoreError, UnitOfWork, Upserted};
use crate::domain::{
    FileFormat, FileRef, FileStatus, FileUpdate, HeaderFields, ImportedFile, MeterDefaults, MeterRef, NewFile,
    ReadingDefaults, ReadingKey, ReadingRef,
};

const SCHEMA_SQL: &str = include_str!("../../sql/schema/01_meter_readings.sql");

const FILE_COLUMNS: &str = "id, filename, format, fingerprint, status, record_count, \
     sequence_number, version, sender, receiver, creation_date, imported_at";

#[derive(Debug, sqlx::FromRow)]
struct FileRow {
    id: i64,
    filename: String,
    format: String,
    fingerprint: String,
    status: String,
    record_count: i64,
    sequence_number: Option<String>,
    version: Option<String>,
    sender: Option<String>,
    receiver: Option<String>,
    creation_date: Option<OffsetDateTime>,
    imported_at: OffsetDateTime,
}

impl TryFrom<FileRow> for ImportedFile {
    type Error = StoreError;

    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        let format = FileFormat::from_tag(&row.format)
            .ok_or_else(|| StoreError::Decode(format!("unknown file format '{}'", row.format)))?;
        let status = FileStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Decode(format!("unknown file status '{}'", row.status)))?;

        Ok(ImportedFile {
            id: FileRef(row.id),
            filename: row.filename,
            format,
            fingerprint: row.fingerprint,
            status,
            record_count: row.record_count,
            header: HeaderFields {
                sequence_number: row.sequence_number,
                version: row.version,
                sender: row.sender,
                receiver: row.receiver,
                created_at: row.creation_date,
            },
            imported_at: row.imported_at,
        })
    }
}

/// Postgres-backed store. Uniqueness of fingerprints, serial numbers and
/// reading natural keys is enforced by the schema; upserts insert with
/// `ON CONFLICT DO NOTHING` and re-fetch when another writer got there first.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(uri: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(uri)
            .await?;
        Ok(Self::new(pool))
    }

    /// Applies the bundled schema. Every statement is idempotent.
    pub async fn apply_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn find_file_by_fingerprint(&self, fingerprint: &str) -> Result<Option<ImportedFile>, StoreError> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM imported_files WHERE fingerprint = $1");
        let row = sqlx::query_as::<_, FileRow>(&sql)
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ImportedFile::try_from).transpose()
    }

    async fn filename_seen(&self, filename: &str) -> Result<bool, StoreError> {
        let seen = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM imported_files WHERE filename = $1)")
            .bind(filename)
            .fetch_one(&self.pool)
            .await?;
        Ok(seen)
    }

    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }

    async fn record_failure(&self, file: &NewFile) -> Result<FileRef, StoreError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO imported_files (filename, format, fingerprint, status)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (fingerprint) DO UPDATE SET status = EXCLUDED.status
            RETURNING id
            "#,
        )
        .bind(&file.filename)
        .bind(file.format.as_tag())
        .bind(&file.fingerprint)
        .bind(FileStatus::Error.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(FileRef(id))
    }
}

pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn create_file(&mut self, file: &NewFile) -> Result<FileRef, StoreError> {
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO imported_files (filename, format, fingerprint, status)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (fingerprint) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&file.filename)
        .bind(file.format.as_tag())
        .bind(&file.fingerprint)
        .bind(file.status.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(id) = inserted {
            return Ok(FileRef(id));
        }

        let filename = sqlx::query_scalar::<_, String>("SELECT filename FROM imported_files WHERE fingerprint = $1")
            .bind(&file.fingerprint)
            .fetch_one(&mut *self.tx)
            .await?;
        Err(StoreError::DuplicateFingerprint {
            fingerprint: file.fingerprint.clone(),
            filename,
        })
    }

    async fn update_file(&mut self, file: FileRef, update: &FileUpdate) -> Result<(), StoreError> {
        let result = match &update.header {
            Some(header) => {
                sqlx::query(
                    r#"
                    UPDATE imported_files
                    SET status = $2, record_count = $3,
                        sequence_number = $4, version = $5, sender = $6, receiver = $7, creation_date = $8
                    WHERE id = $1
                    "#,
                )
                .bind(file.0)
                .bind(update.status.as_str())
                .bind(update.record_count)
                .bind(&header.sequence_number)
                .bind(&header.version)
                .bind(&header.sender)
                .bind(&header.receiver)
                .bind(header.created_at)
                .execute(&mut *self.tx)
                .await?
            }
            None => {
                sqlx::query("UPDATE imported_files SET status = $2, record_count = $3 WHERE id = $1")
                    .bind(file.0)
                    .bind(update.status.as_str())
                    .bind(update.record_count)
                    .execute(&mut *self.tx)
                    .await?
            }
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::UnknownFile(file.0));
        }
        Ok(())
    }

    async fn reopen_failed_file(&mut self, file: &ImportedFile) -> Result<(), StoreError> {
        let reopened = sqlx::query("UPDATE imported_files SET status = $2 WHERE id = $1 AND status = $3")
            .bind(file.id.0)
            .bind(FileStatus::Processing.as_str())
            .bind(FileStatus::Error.as_str())
            .execute(&mut *self.tx)
            .await?;

        // A concurrent retry got there first.
        if reopened.rows_affected() == 0 {
            return Err(StoreError::DuplicateFingerprint {
                fingerprint: file.fingerprint.clone(),
                filename: file.filename.clone(),
            });
        }
        Ok(())
    }

    async fn upsert_meter(&mut self, serial: &str, defaults: &MeterDefaults) -> Result<Upserted<MeterRef>, StoreError> {
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO meters (serial_number, point_id, energy_type, created_at, imported_file_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (serial_number) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(serial)
        .bind(&defaults.point_id)
        .bind(defaults.energy_type.code())
        .bind(defaults.created_at)
        .bind(defaults.imported_file.0)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(id) = inserted {
            return Ok(Upserted::created(MeterRef(id)));
        }

        let id = sqlx::query_scalar::<_, i64>("SELECT id FROM meters WHERE serial_number = $1")
            .bind(serial)
            .fetch_one(&mut *self.tx)
            .await?;
        tracing::debug!(serial, meter_id = id, "meter already present");
        Ok(Upserted::existing(MeterRef(id)))
    }

    async fn upsert_reading(
        &mut self,
        key: &ReadingKey,
        defaults: &ReadingDefaults,
    ) -> Result<Upserted<ReadingRef>, StoreError> {
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO readings
                (meter_id, register_id, taken_at, value, reading_type, measurement_method, imported_file_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT ON CONSTRAINT uniq_reading_natural_key DO NOTHING
            RETURNING id
            "#,
        )
        .bind(key.meter.0)
        .bind(&key.register_id)
        .bind(key.taken_at)
        .bind(key.value)
        .bind(defaults.reading_type.code())
        .bind(&defaults.measurement_method)
        .bind(defaults.imported_file.0)
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(id) = inserted {
            return Ok(Upserted::created(ReadingRef(id)));
        }

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM readings
            WHERE meter_id = $1 AND register_id = $2 AND taken_at = $3 AND value = $4
            "#,
        )
        .bind(key.meter.0)
        .bind(&key.register_id)
        .bind(key.taken_at)
        .bind(key.value)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(Upserted::existing(ReadingRef(id)))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let unit = *self;
        unit.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let unit = *self;
        unit.tx.rollback().await?;
        Ok(())
    }
}
