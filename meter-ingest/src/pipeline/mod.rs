pub mod batch;
pub mod upsert;

pub use batch::{run_batch, BatchAborted, BatchOptions, BatchSummary, FileOutcome};
pub use upsert::EntityUpserter;

use std::{path::Path, sync::Arc};

use meter_client::{
    db::{Store, StoreError, UnitOfWork},
    domain::{FileFormat, FileRef, FileStatus, FileUpdate, HeaderFields, NewFile},
};
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::{
    context::{ImportContext, ImportStats},
    detect::detect_format,
    error::ImportError,
    fingerprint::{check_prior_import, fingerprint, GateDecision},
    sources::{document, parser_for, RecordParser},
};

/// Knobs that change what a file import produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    /// Strict detail records with an earlier previous-read date also emit a
    /// zero-valued estimated reading at that date.
    pub previous_reading_placeholder: bool,
    /// Documents with no extractable text get a sentinel meter and reading.
    pub no_content_sentinel: bool,
    /// Lines sampled when sniffing the delimiter of delimited text.
    pub sniff_sample_lines: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            previous_reading_placeholder: true,
            no_content_sentinel: false,
            sniff_sample_lines: 10,
        }
    }
}

/// Whether any text could be read out of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentState {
    Extracted,
    NoContent,
}

/// Outcome of one successful file import.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ImportReport {
    pub file: FileRef,
    pub filename: String,
    pub format: FileFormat,
    pub fingerprint: String,
    pub content: ContentState,
    pub record_count: i64,
    pub stats: ImportStats,
    pub header: HeaderFields,
}

/// Imports whole files: checksum gate, format detection, parsing and upserts,
/// all inside one unit of work per file.
///
/// No store call is made while a unit of work is open other than through the
/// unit itself.
pub struct Importer {
    store: Arc<dyn Store>,
    options: ImportOptions,
}

impl Importer {
    pub fn new(store: Arc<dyn Store>, options: ImportOptions) -> Self {
        Self { store, options }
    }

    pub async fn import_path(&self, path: &Path) -> Result<ImportReport, ImportError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| ImportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.import_bytes(&filename, &bytes).await
    }

    pub async fn import_bytes(&self, filename: &str, bytes: &[u8]) -> Result<ImportReport, ImportError> {
        let fingerprint = fingerprint(bytes);
        info!(filename, %fingerprint, size = bytes.len(), "importing file");

        let decision = match check_prior_import(self.store.as_ref(), &fingerprint).await {
            Ok(decision) => decision,
            Err(err) => {
                if err.is_skip() {
                    metrics::counter!("meter_import_duplicates_total").increment(1);
                    metrics::counter!("meter_import_files_total", "outcome" => "duplicate").increment(1);
                }
                return Err(err);
            }
        };
        if decision == GateDecision::Fresh && self.store.filename_seen(filename).await? {
            warn!(
                filename,
                "filename previously seen with different content; proceeding with checksum-based idempotency"
            );
        }

        let format = detect_format(filename, bytes);
        info!(filename, %format, "format detected");
        let new_file = NewFile {
            filename: filename.to_string(),
            format,
            fingerprint,
            status: FileStatus::Processing,
        };

        if format == FileFormat::Unsupported {
            let err = ImportError::UnsupportedFormat(filename.to_string());
            self.fail(&new_file, &err).await;
            return Err(err);
        }

        match self.run_unit(&new_file, decision, bytes).await {
            Ok(report) => {
                let outcome = match report.content {
                    ContentState::Extracted => "imported",
                    ContentState::NoContent => "no_content",
                };
                metrics::counter!("meter_import_files_total", "outcome" => outcome).increment(1);
                metrics::counter!("meter_import_meters_created_total").increment(report.stats.meters_created);
                metrics::counter!("meter_import_readings_created_total").increment(report.stats.readings_created);
                info!(
                    filename,
                    record_count = report.record_count,
                    meters_created = report.stats.meters_created,
                    readings_created = report.stats.readings_created,
                    duplicates_skipped = report.stats.duplicates_skipped,
                    records_skipped = report.stats.records_skipped,
                    "file imported"
                );
                Ok(report)
            }
            Err(err) if err.is_skip() => {
                metrics::counter!("meter_import_duplicates_total").increment(1);
                metrics::counter!("meter_import_files_total", "outcome" => "duplicate").increment(1);
                Err(err)
            }
            Err(err) => {
                self.fail(&new_file, &err).await;
                Err(err)
            }
        }
    }

    /// Leaves an `Error` row behind. Runs outside any unit of work.
    async fn fail(&self, file: &NewFile, err: &ImportError) {
        error!(filename = %file.filename, error = %err, "import failed");
        metrics::counter!("meter_import_files_total", "outcome" => "error").increment(1);
        if let Err(store_err) = self.store.record_failure(file).await {
            error!(filename = %file.filename, error = %store_err, "could not record failed import");
        }
    }

    async fn run_unit(
        &self,
        new_file: &NewFile,
        decision: GateDecision,
        bytes: &[u8],
    ) -> Result<ImportReport, ImportError> {
        let mut unit = self.store.begin().await?;
        match self.import_in_unit(unit.as_mut(), new_file, decision, bytes).await {
            Ok(report) => {
                unit.commit().await?;
                Ok(report)
            }
            Err(err) => {
                if let Err(rollback_err) = unit.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn import_in_unit(
        &self,
        unit: &mut dyn UnitOfWork,
        new_file: &NewFile,
        decision: GateDecision,
        bytes: &[u8],
    ) -> Result<ImportReport, ImportError> {
        // Either call loses to another import of the same bytes that got there first.
        let file = match decision {
            GateDecision::Fresh => unit.create_file(new_file).await.map_err(already_imported)?,
            GateDecision::Retry(prior) => {
                unit.reopen_failed_file(&prior).await.map_err(already_imported)?;
                prior.id
            }
        };

        let mut ctx = ImportContext::new(OffsetDateTime::now_utc());
        let mut upserter = EntityUpserter::new(unit, file);

        let content = if new_file.format == FileFormat::DocumentText {
            match document::extract_text(bytes) {
                Some(text) => {
                    let inner = document::text_format(&text);
                    info!(filename = %new_file.filename, format = %inner, "document text extracted");
                    self.parse_with(inner, &text, &mut ctx, &mut upserter).await?;
                    ContentState::Extracted
                }
                None => {
                    warn!(filename = %new_file.filename, "no text could be extracted from document");
                    if self.options.no_content_sentinel {
                        let effects = document::no_content_sentinel(&ctx);
                        upserter.apply_all(effects, &mut ctx.stats).await?;
                    }
                    ContentState::NoContent
                }
            }
        } else {
            let text = decode_text(&new_file.filename, bytes);
            self.parse_with(new_file.format, &text, &mut ctx, &mut upserter).await?;
            ContentState::Extracted
        };

        let update = FileUpdate {
            status: FileStatus::Imported,
            record_count: ctx.stats.record_count(),
            header: Some(ctx.header.clone()),
        };
        upserter.unit().update_file(file, &update).await?;

        Ok(ImportReport {
            file,
            filename: new_file.filename.clone(),
            format: new_file.format,
            fingerprint: new_file.fingerprint.clone(),
            content,
            record_count: update.record_count,
            stats: ctx.stats,
            header: ctx.header,
        })
    }

    async fn parse_with(
        &self,
        format: FileFormat,
        text: &str,
        ctx: &mut ImportContext,
        upserter: &mut EntityUpserter<'_>,
    ) -> Result<(), ImportError> {
        let parser = parser_for(format, &self.options).ok_or_else(|| ImportError::UnsupportedFormat(format.to_string()))?;
        dispatch_all(parser.as_ref(), format, text, ctx, upserter).await
    }
}

/// Feeds every record through the parser. Malformed records are counted and
/// logged; store failures end the file.
async fn dispatch_all(
    parser: &dyn RecordParser,
    format: FileFormat,
    text: &str,
    ctx: &mut ImportContext,
    upserter: &mut EntityUpserter<'_>,
) -> Result<(), ImportError> {
    for record in parser.split(text) {
        match parser.dispatch(&record, ctx) {
            Ok(effects) => upserter.apply_all(effects, &mut ctx.stats).await?,
            Err(err) => {
                ctx.stats.records_skipped += 1;
                metrics::counter!("meter_import_records_skipped_total", "format" => format.as_tag()).increment(1);
                warn!(position = record.position(), error = %err, "skipping malformed record");
            }
        }
    }
    Ok(())
}

fn already_imported(err: StoreError) -> ImportError {
    match err {
        StoreError::DuplicateFingerprint { fingerprint, filename } => {
            ImportError::DuplicateContent { prior: filename, fingerprint }
        }
        other => other.into(),
    }
}

fn decode_text(filename: &str, bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            warn!(filename, "content is not valid UTF-8, replacing invalid bytes");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
