use std::{path::PathBuf, sync::Arc};

use meter_client::{db::InMemoryStore, domain::FileStatus};
use meter_ingest::pipeline::{run_batch, BatchOptions, FileOutcome, ImportOptions, Importer};
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn fixture(dir: &TempDir) -> Vec<PathBuf> {
    vec![
        write(dir, "one.csv", b"mpan,serial,reading\n1200023305967,S1,1\n"),
        write(dir, "bad.bin", b"\x00\x01\x02"),
        write(dir, "copy.csv", b"mpan,serial,reading\n1200023305967,S1,1\n"),
        write(dir, "two.csv", b"mpan,serial,reading\n1200023305968,S2,2\n"),
    ]
}

#[tokio::test]
async fn first_hard_failure_stops_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let store = InMemoryStore::new();
    let importer = Importer::new(Arc::new(store.clone()), ImportOptions::default());
    let paths = fixture(&dir);

    let aborted = run_batch(&importer, &paths, &BatchOptions::default()).await.unwrap_err();
    assert_eq!(aborted.path, paths[1]);
    assert_eq!(aborted.summary.imported(), 1);

    // Files after the failure were never attempted.
    let files = store.files().await;
    assert_eq!(files.len(), 2);
    assert!(files.iter().all(|f| f.filename != "two.csv"));
}

#[tokio::test]
async fn continue_on_error_reports_every_file_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = InMemoryStore::new();
    let importer = Importer::new(Arc::new(store.clone()), ImportOptions::default());
    let paths = fixture(&dir);
    let options = BatchOptions {
        continue_on_error: true,
        concurrency: 1,
    };

    let summary = run_batch(&importer, &paths, &options).await.unwrap();
    assert_eq!(summary.outcomes.len(), 4);
    assert!(matches!(summary.outcomes[0], FileOutcome::Imported { .. }));
    assert!(matches!(summary.outcomes[1], FileOutcome::Failed { .. }));
    assert!(matches!(summary.outcomes[2], FileOutcome::Skipped { .. }));
    assert!(matches!(summary.outcomes[3], FileOutcome::Imported { .. }));
    let reported: Vec<&PathBuf> = summary.outcomes.iter().map(FileOutcome::path).collect();
    assert_eq!(reported, paths.iter().collect::<Vec<_>>());

    let statuses: Vec<FileStatus> = store.files().await.iter().map(|f| f.status).collect();
    assert_eq!(statuses.iter().filter(|s| **s == FileStatus::Error).count(), 1);
    assert_eq!(statuses.iter().filter(|s| **s == FileStatus::Imported).count(), 2);
}

#[tokio::test]
async fn concurrent_batch_keeps_input_order_and_skips_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let store = InMemoryStore::new();
    let importer = Importer::new(Arc::new(store.clone()), ImportOptions::default());
    let paths: Vec<PathBuf> = (0..6)
        .map(|i| {
            // Pairs of identical content under different names.
            let content = format!("mpan,serial,reading\n120002330596{},S{},{}\n", i / 2, i / 2, i / 2);
            write(&dir, &format!("f{i}.csv"), content.as_bytes())
        })
        .collect();
    let options = BatchOptions {
        continue_on_error: false,
        concurrency: 4,
    };

    let summary = run_batch(&importer, &paths, &options).await.unwrap();
    assert_eq!(summary.imported(), 3);
    assert_eq!(summary.skipped(), 3);
    let reported: Vec<&PathBuf> = summary.outcomes.iter().map(FileOutcome::path).collect();
    assert_eq!(reported, paths.iter().collect::<Vec<_>>());
    assert_eq!(store.meters().await.len(), 3);
    assert_eq!(store.files().await.len(), 3);
}
