use std::path::PathBuf;

use futures::{stream, StreamExt};

use super::{ImportReport, Importer};
use crate::error::ImportError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    /// Keep going after a file fails instead of stopping the batch.
    pub continue_on_error: bool,
    /// Files imported at the same time. Outcomes are still reported in input
    /// order.
    pub concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            concurrency: 1,
        }
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    Imported { path: PathBuf, report: ImportReport },
    Skipped { path: PathBuf, reason: String },
    Failed { path: PathBuf, error: String },
}

impl FileOutcome {
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Imported { path, .. } | Self::Skipped { path, .. } | Self::Failed { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, serde::Serialize)]
pub struct BatchSummary {
    pub outcomes: Vec<FileOutcome>,
}

impl BatchSummary {
    pub fn imported(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Imported { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, FileOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

/// A hard failure that stopped the batch. Carries the outcomes of the files
/// handled before it.
#[derive(thiserror::Error, Debug)]
#[error("import of {} failed: {source}", path.display())]
pub struct BatchAborted {
    pub path: PathBuf,
    #[source]
    pub source: ImportError,
    pub summary: BatchSummary,
}

/// Imports `paths` in order. Duplicate content is always a skip. Any other
/// failure either stops the batch or, with `continue_on_error`, is recorded
/// and the batch moves on.
pub async fn run_batch(
    importer: &Importer,
    paths: &[PathBuf],
    options: &BatchOptions,
) -> Result<BatchSummary, BatchAborted> {
    let mut results = stream::iter(paths.iter().cloned())
        .map(|path| async move {
            let result = importer.import_path(&path).await;
            (path, result)
        })
        .buffered(options.concurrency.max(1));

    let mut summary = BatchSummary::default();
    while let Some((path, result)) = results.next().await {
        match result {
            Ok(report) => summary.outcomes.push(FileOutcome::Imported { path, report }),
            Err(err) if err.is_skip() => summary.outcomes.push(FileOutcome::Skipped {
                path,
                reason: err.to_string(),
            }),
            Err(err) if options.continue_on_error => summary.outcomes.push(FileOutcome::Failed {
                path,
                error: err.to_string(),
            }),
            Err(source) => return Err(BatchAborted { path, source, summary }),
        }
    }
    Ok(summary)
}
