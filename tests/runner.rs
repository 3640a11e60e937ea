//! End-to-end runs of the indexer against a temporary database and storage.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

use content_indexer::config::{self, Config, JobConfig};
use content_indexer::context::{unix_now, RunContext};
use content_indexer::db;
use content_indexer::extract::{ContentExtractor, ExtractError, ExtractorRegistry, PlainTextExtractor};
use content_indexer::hooks::{CleanupHook, CustomIndexer, Hooks};
use content_indexer::indexer::{Indexer, IndexerRegistry};
use content_indexer::migrate;
use content_indexer::models::{IndexRecord, IndexingMode, StoredRecord};
use content_indexer::notify::Notifier;
use content_indexer::report::RunReport;
use content_indexer::runner::{IndexerRunner, RunOutcome, ALREADY_RUNNING_MESSAGE};
use content_indexer::status::{LockAttempt, RunStatus};
use content_indexer::store::IndexStore;

const FILE_JOB: &str = r#"
[[jobs]]
uid = 1
title = "Documents"
type = "file"
storage_pid = 5
storage = 1
directories = ["/docs/"]
"#;

fn setup(jobs: &str, extra: &str) -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("storage/docs")).unwrap();
    let content = format!(
        r#"
[db]
path = "{db}"

[indexing]
public_root = "{root}"
{extra}

[[storages]]
uid = 1
name = "fileadmin"
base_path = "{storage}"
{jobs}
"#,
        db = tmp.path().join("data/index.sqlite").display(),
        root = tmp.path().display(),
        storage = tmp.path().join("storage").display(),
        extra = extra,
        jobs = jobs,
    );
    let config: Config = toml::from_str(&content).unwrap();
    config::validate(&config).unwrap();
    (tmp, config)
}

async fn open(config: &Config) -> SqlitePool {
    let pool = db::connect(config).await.unwrap();
    migrate::create_schema(&pool).await.unwrap();
    pool
}

fn docs(tmp: &TempDir) -> PathBuf {
    tmp.path().join("storage/docs")
}

fn txt_only() -> ExtractorRegistry {
    let mut extractors = ExtractorRegistry::new();
    extractors.register(Arc::new(PlainTextExtractor));
    extractors
}

fn finished(outcome: RunOutcome) -> RunReport {
    match outcome {
        RunOutcome::Finished(report) => report,
        RunOutcome::AlreadyRunning(message) => panic!("run did not start: {}", message),
    }
}

async fn records(pool: &SqlitePool) -> Vec<StoredRecord> {
    IndexStore::new(pool.clone()).list().await.unwrap()
}

struct CountingExtractor(Arc<AtomicUsize>);

impl ContentExtractor for CountingExtractor {
    fn extensions(&self) -> &[&'static str] {
        &["txt"]
    }

    fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        fs::read_to_string(path).map_err(|source| ExtractError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

#[derive(Clone, Default)]
struct Outbox(Arc<Mutex<Vec<(String, String)>>>);

impl Notifier for Outbox {
    fn send(&self, recipient: &str, _subject: &str, body: &str) -> Result<()> {
        self.0
            .lock()
            .unwrap()
            .push((recipient.to_string(), body.to_string()));
        Ok(())
    }
}

#[tokio::test]
async fn test_managed_storage_without_pdf_extractor() {
    let (tmp, config) = setup(FILE_JOB, "");
    fs::write(docs(&tmp).join("a.txt"), "hello").unwrap();
    fs::write(docs(&tmp).join("b.pdf"), b"%PDF-1.4 not really").unwrap();
    let pool = open(&config).await;

    let report = finished(
        IndexerRunner::new(config, pool.clone())
            .with_extractors(txt_only())
            .start_indexing(IndexingMode::Full, false)
            .await
            .unwrap(),
    );

    let rows = records(&pool).await;
    assert_eq!(rows.len(), 2);
    let a = rows.iter().find(|r| r.record.title == "a.txt").unwrap();
    let b = rows.iter().find(|r| r.record.title == "b.pdf").unwrap();
    assert_eq!(a.record.content, "hello");
    assert_eq!(a.record.record_type, "file:txt");
    assert_eq!(a.record.tags, "#file#");
    assert_eq!(a.record.target_pid, "1");
    assert_eq!(a.record.language, -1);
    assert_eq!(b.record.content, "");
    assert_eq!(b.record.record_type, "file:pdf");
    assert!(a.record.orig_uid > 0);

    assert_eq!(report.jobs.len(), 1);
    assert!(report.jobs[0]
        .message
        .starts_with("2 files have been found for indexing.\n2 files have been indexed."));
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert_eq!(report.total_records, 2);

    let status = RunStatus::new(pool.clone());
    assert_eq!(status.lock_time().await.unwrap(), None);
    assert_eq!(
        status.last_run().await.unwrap().unwrap().start_time,
        report.start_time
    );
}

#[tokio::test]
async fn test_full_run_is_idempotent() {
    let (tmp, config) = setup(FILE_JOB, "");
    fs::write(docs(&tmp).join("a.txt"), "hello").unwrap();
    let pool = open(&config).await;
    let runner = IndexerRunner::new(config, pool.clone());

    finished(runner.start_indexing(IndexingMode::Full, false).await.unwrap());
    let first = records(&pool).await;
    finished(runner.start_indexing(IndexingMode::Full, false).await.unwrap());
    let second = records(&pool).await;

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(first[0].uid, second[0].uid);
    assert_eq!(first[0].crdate, second[0].crdate);
    assert_eq!(first[0].record.content, second[0].record.content);
}

#[tokio::test]
async fn test_incremental_skips_unchanged_files() {
    let (tmp, config) = setup(FILE_JOB, "");
    let file = docs(&tmp).join("a.txt");
    fs::write(&file, "hello").unwrap();
    let pool = open(&config).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let mut extractors = ExtractorRegistry::new();
    extractors.register(Arc::new(CountingExtractor(Arc::clone(&calls))));
    let runner = IndexerRunner::new(config, pool.clone()).with_extractors(extractors);

    finished(runner.start_indexing(IndexingMode::Full, false).await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let report = finished(
        runner
            .start_indexing(IndexingMode::Incremental, false)
            .await
            .unwrap(),
    );
    assert_eq!(report.mode, IndexingMode::Incremental);
    assert!(report.jobs[0].incremental);
    assert!(report.jobs[0]
        .message
        .contains("0 new or updated files have been indexed."));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // full runs reuse stored content for unchanged files
    finished(runner.start_indexing(IndexingMode::Full, false).await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    fs::write(&file, "hello again").unwrap();
    fs::File::options()
        .write(true)
        .open(&file)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(60))
        .unwrap();
    let report = finished(
        runner
            .start_indexing(IndexingMode::Incremental, false)
            .await
            .unwrap(),
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(report.jobs[0]
        .message
        .contains("1 new or updated files have been indexed."));
    // the previous version's row stays until the next full cleanup
    let rows = records(&pool).await;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].record.content, "hello");
    assert_eq!(rows[1].record.content, "hello again");
    assert!(rows[1].record.sortdate > rows[0].record.sortdate);
}

#[tokio::test]
async fn test_incremental_without_last_run_runs_full() {
    let (tmp, config) = setup(FILE_JOB, "");
    fs::write(docs(&tmp).join("a.txt"), "hello").unwrap();
    let pool = open(&config).await;

    let report = finished(
        IndexerRunner::new(config, pool.clone())
            .start_indexing(IndexingMode::Incremental, false)
            .await
            .unwrap(),
    );

    assert_eq!(report.mode, IndexingMode::Full);
    assert!(report.mode_message.contains("Switching to full mode"));
    assert!(!report.jobs[0].incremental);
    assert!(report.cleanup.contains("entries deleted."));
}

#[tokio::test]
async fn test_incremental_removes_records_of_deleted_files() {
    let (tmp, config) = setup(FILE_JOB, "");
    fs::write(docs(&tmp).join("a.txt"), "hello").unwrap();
    fs::write(docs(&tmp).join("gone.txt"), "bye").unwrap();
    let pool = open(&config).await;
    let runner = IndexerRunner::new(config, pool.clone());

    finished(runner.start_indexing(IndexingMode::Full, false).await.unwrap());
    assert_eq!(records(&pool).await.len(), 2);

    fs::remove_file(docs(&tmp).join("gone.txt")).unwrap();
    sqlx::query("UPDATE index_records SET tstamp = tstamp - 100")
        .execute(&pool)
        .await
        .unwrap();

    let report = finished(
        runner
            .start_indexing(IndexingMode::Incremental, false)
            .await
            .unwrap(),
    );
    let rows = records(&pool).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record.title, "a.txt");
    assert!(report.jobs[0]
        .message
        .contains("Found and removed 1 outdated file index record(s)."));
    assert_eq!(report.cleanup, "Skipping cleanup in incremental mode.");
}

#[tokio::test]
async fn test_full_cleanup_removes_stale_rows() {
    let (tmp, config) = setup(FILE_JOB, "");
    fs::write(docs(&tmp).join("a.txt"), "hello").unwrap();
    let pool = open(&config).await;

    let store = IndexStore::new(pool.clone());
    let mut stale = IndexRecord::new(5, "Old page", "page", "12", "old content");
    stale.orig_uid = 12;
    store.insert(&stale, unix_now() - 3600).await.unwrap();

    let report = finished(
        IndexerRunner::new(config, pool.clone())
            .start_indexing(IndexingMode::Full, false)
            .await
            .unwrap(),
    );

    let rows = records(&pool).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record.title, "a.txt");
    assert!(report.cleanup.contains("1 entries deleted."));
    assert!(report.cleanup.contains("Cleanup process took"));
}

#[tokio::test]
async fn test_fresh_lock_rejects_second_run() {
    let (tmp, config) = setup(FILE_JOB, "");
    fs::write(docs(&tmp).join("a.txt"), "hello").unwrap();
    let pool = open(&config).await;

    let status = RunStatus::new(pool.clone());
    let locked_at = unix_now() - 3600;
    assert_eq!(
        status.try_acquire(locked_at, 12 * 3600).await.unwrap(),
        LockAttempt::Acquired
    );

    let outcome = IndexerRunner::new(config, pool.clone())
        .start_indexing(IndexingMode::Full, false)
        .await
        .unwrap();

    match outcome {
        RunOutcome::AlreadyRunning(message) => assert_eq!(message, ALREADY_RUNNING_MESSAGE),
        RunOutcome::Finished(_) => panic!("second run must not start"),
    }
    assert_eq!(status.lock_time().await.unwrap(), Some(locked_at));
    assert!(records(&pool).await.is_empty());
    assert!(status.last_run().await.unwrap().is_none());
}

#[tokio::test]
async fn test_stale_lock_is_reclaimed() {
    let (tmp, config) = setup(FILE_JOB, "");
    fs::write(docs(&tmp).join("a.txt"), "hello").unwrap();
    let pool = open(&config).await;

    let status = RunStatus::new(pool.clone());
    status
        .try_acquire(unix_now() - 13 * 3600, 12 * 3600)
        .await
        .unwrap();

    let report = finished(
        IndexerRunner::new(config, pool.clone())
            .start_indexing(IndexingMode::Full, false)
            .await
            .unwrap(),
    );

    assert!(report
        .notices
        .iter()
        .any(|n| n.starts_with("lock has been removed because it is older than 12 hours")));
    assert_eq!(records(&pool).await.len(), 1);
    assert_eq!(status.lock_time().await.unwrap(), None);
}

#[tokio::test]
async fn test_missing_directory_is_reported_and_run_continues() {
    let jobs = r#"
[[jobs]]
uid = 1
title = "Broken"
type = "file"
storage_pid = 5
storage = 1
directories = ["/missing/"]

[[jobs]]
uid = 2
title = "Documents"
type = "file"
storage_pid = 5
storage = 1
directories = ["/docs/"]
"#;
    let (tmp, config) = setup(jobs, "");
    fs::write(docs(&tmp).join("a.txt"), "hello").unwrap();
    let pool = open(&config).await;

    let report = finished(
        IndexerRunner::new(config, pool.clone())
            .start_indexing(IndexingMode::Full, false)
            .await
            .unwrap(),
    );

    assert_eq!(report.jobs.len(), 2);
    assert_eq!(
        report.errors,
        vec!["Broken: Folder \"/missing/\" does not exist.".to_string()]
    );
    assert_eq!(records(&pool).await.len(), 1);
    assert!(report
        .render_plaintext()
        .contains("- Broken: Folder \"/missing/\" does not exist."));
}

#[tokio::test]
async fn test_job_without_sources_is_a_configuration_message() {
    let jobs = r#"
[[jobs]]
uid = 1
title = "Empty"
type = "file"
storage_pid = 5
"#;
    let (_tmp, config) = setup(jobs, "");
    let pool = open(&config).await;

    let report = finished(
        IndexerRunner::new(config, pool.clone())
            .start_indexing(IndexingMode::Full, false)
            .await
            .unwrap(),
    );

    assert_eq!(
        report.jobs[0].message,
        "No directories or file collections defined for indexing."
    );
    assert_eq!(report.error_count(), 1);
}

#[tokio::test]
async fn test_missing_builtin_indexer_skips_job() {
    let jobs = r#"
[[jobs]]
uid = 1
title = "Pages"
type = "page"
storage_pid = 5
startingpoints_recursive = [1]
"#;
    let (_tmp, config) = setup(jobs, "");
    let pool = open(&config).await;

    let report = finished(
        IndexerRunner::new(config, pool.clone())
            .with_registry(IndexerRegistry::new())
            .start_indexing(IndexingMode::Full, false)
            .await
            .unwrap(),
    );

    assert!(report.jobs.is_empty());
    assert_eq!(
        report.errors,
        vec!["Pages: Configuration error: Could not find indexer for type page".to_string()]
    );
}

struct FullOnlyIndexer {
    errors: Vec<String>,
}

#[async_trait]
impl Indexer for FullOnlyIndexer {
    async fn start_indexing(&mut self, ctx: &mut RunContext) -> Result<String> {
        let mut record = IndexRecord::new(5, "Entry", "news", "7", "body");
        record.orig_uid = 1;
        ctx.store_in_index(record).await?;
        Ok("1 news record indexed.".to_string())
    }

    fn errors(&self) -> &[String] {
        &self.errors
    }

    fn duration_ms(&self) -> i64 {
        0
    }

    fn ran_incremental(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn test_indexer_without_incremental_support_runs_full() {
    let jobs = r#"
[[jobs]]
uid = 1
title = "News"
type = "news"
storage_pid = 5
"#;
    let (_tmp, config) = setup(jobs, "");
    let pool = open(&config).await;

    let mut registry = IndexerRegistry::with_builtin();
    registry.register(
        "news",
        Arc::new(|_: &JobConfig| Box::new(FullOnlyIndexer { errors: Vec::new() }) as Box<dyn Indexer>),
    );
    let runner = IndexerRunner::new(config, pool.clone()).with_registry(registry);

    finished(runner.start_indexing(IndexingMode::Full, false).await.unwrap());
    let report = finished(
        runner
            .start_indexing(IndexingMode::Incremental, false)
            .await
            .unwrap(),
    );

    assert_eq!(report.mode, IndexingMode::Incremental);
    assert_eq!(
        report.jobs[0].message,
        "Incremental indexing is not available for this indexer, starting full indexing.\n1 news record indexed."
    );
    assert!(!report.jobs[0].incremental);
    assert_eq!(records(&pool).await.len(), 1);
}

struct Related;

#[async_trait]
impl CustomIndexer for Related {
    fn name(&self) -> &str {
        "related"
    }

    async fn custom_indexing(&self, job: &JobConfig, ctx: &mut RunContext) -> Result<String> {
        if job.job_type.as_str() != "related" {
            return Ok(String::new());
        }
        let mut record = IndexRecord::new(job.storage_pid, "Related", "related", "3", "linked");
        record.orig_uid = 99;
        ctx.store_in_index(record).await?;
        Ok("1 related record indexed.".to_string())
    }
}

struct CountingCleanup(Arc<AtomicUsize>);

#[async_trait]
impl CleanupHook for CountingCleanup {
    async fn cleanup(&self, cutoff: i64, ctx: &RunContext) -> Result<String> {
        assert_eq!(cutoff, ctx.start_time);
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok("Custom cleanup done.\n".to_string())
    }
}

#[tokio::test]
async fn test_custom_indexer_and_cleanup_hook() {
    let jobs = r#"
[[jobs]]
uid = 1
title = "Related"
type = "related"
storage_pid = 5
"#;
    let (_tmp, config) = setup(jobs, "");
    let pool = open(&config).await;

    let cleanups = Arc::new(AtomicUsize::new(0));
    let hooks = Hooks::new()
        .with_custom_indexer(Arc::new(Related))
        .on_cleanup(Arc::new(CountingCleanup(Arc::clone(&cleanups))));
    let runner = IndexerRunner::new(config, pool.clone()).with_hooks(hooks);

    let report = finished(runner.start_indexing(IndexingMode::Full, false).await.unwrap());

    assert_eq!(report.jobs.len(), 1);
    assert_eq!(report.jobs[0].message, "1 related record indexed.");
    assert!(report.errors.is_empty(), "{:?}", report.errors);
    assert!(report.cleanup.starts_with("Custom cleanup done.\n0 entries deleted."));
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);

    let rows = records(&pool).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].record.record_type, "related");
}

#[tokio::test]
async fn test_report_is_mailed_only_for_automated_runs() {
    let extra = r#"
[notification]
enabled = true
recipient = "ops@example.org"
"#;
    let (tmp, config) = setup(FILE_JOB, extra);
    fs::write(docs(&tmp).join("a.txt"), "hello").unwrap();
    let pool = open(&config).await;

    let outbox = Outbox::default();
    let runner = IndexerRunner::new(config, pool.clone()).with_notifier(Box::new(outbox.clone()));

    finished(runner.start_indexing(IndexingMode::Full, false).await.unwrap());
    assert!(outbox.0.lock().unwrap().is_empty());

    finished(runner.start_indexing(IndexingMode::Full, true).await.unwrap());
    let sent = outbox.0.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "ops@example.org");
    assert!(sent[0].1.contains("Index contains 1 entries."));
}

#[tokio::test]
async fn test_plain_directory_keeps_less_than_in_text() {
    let jobs = r#"
[[jobs]]
uid = 1
title = "Notes"
type = "file"
storage_pid = 5
directories = ["notes/"]
"#;
    let (tmp, config) = setup(jobs, "");
    fs::create_dir_all(tmp.path().join("notes")).unwrap();
    fs::write(
        tmp.path().join("notes/math.txt"),
        "if a < b then swap them and continue sorting",
    )
    .unwrap();
    let pool = open(&config).await;

    let report = finished(
        IndexerRunner::new(config, pool.clone())
            .with_extractors(txt_only())
            .start_indexing(IndexingMode::Full, false)
            .await
            .unwrap(),
    );

    assert!(report.errors.is_empty());
    let rows = records(&pool).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].record.content,
        "if a < b then swap them and continue sorting"
    );
    assert_eq!(rows[0].record.language, -1);
}

#[tokio::test]
async fn test_collection_job_without_storage_needs_extractor() {
    let jobs = r#"
[[jobs]]
uid = 1
title = "Collected"
type = "file"
storage_pid = 5
target_pid = 42
file_collections = [7]
"#;
    let (tmp, config) = setup(jobs, "");
    fs::write(docs(&tmp).join("a.txt"), "hello").unwrap();
    fs::write(docs(&tmp).join("b.pdf"), b"%PDF-1.4 not really").unwrap();
    let pool = open(&config).await;
    sqlx::query(
        "INSERT INTO files (uid, storage, identifier, title, description) VALUES \
         (1, 1, '/docs/a.txt', 'Handbook', 'All about a'), (2, 1, '/docs/b.pdf', '', '')",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO file_collection_items (collection, file, sorting) VALUES (7, 1, 1), (7, 2, 2)",
    )
    .execute(&pool)
    .await
    .unwrap();

    let report = finished(
        IndexerRunner::new(config, pool.clone())
            .with_extractors(txt_only())
            .start_indexing(IndexingMode::Full, false)
            .await
            .unwrap(),
    );

    let rows = records(&pool).await;
    assert_eq!(rows.len(), 1);
    let a = &rows[0].record;
    assert_eq!(a.title, "a.txt");
    assert_eq!(a.content, "hello");
    assert_eq!(a.abstract_text, "");
    assert_eq!(a.orig_uid, 1);
    assert_eq!(a.target_pid, "42");

    assert!(report.jobs[0]
        .message
        .contains("1 files have been indexed."));
    assert!(report
        .errors
        .iter()
        .any(|e| e.starts_with("Collected: ") && e.contains("No indexer for this type of file")));
}
