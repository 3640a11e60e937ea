//! Indexing orchestration.
//!
//! [`IndexerRunner::start_indexing`] takes the run lock, dispatches every
//! configured job to its indexer and to the registered custom indexers,
//! cleans up rows not touched by a full run, records the run and builds the
//! report. Jobs run one after another; a failing job is reported and the
//! run moves on.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::{Config, JobConfig};
use crate::context::{unix_now, RunContext};
use crate::error::IndexError;
use crate::extract::ExtractorRegistry;
use crate::hooks::Hooks;
use crate::indexer::IndexerRegistry;
use crate::models::IndexingMode;
use crate::notify::{notify_report, Notifier, SendmailNotifier};
use crate::report::{format_timestamp, JobReport, RunReport};
use crate::status::{JobState, LastRun, LockAttempt};

pub const ALREADY_RUNNING_MESSAGE: &str =
    "You can't start the indexer twice. Please wait while first indexer process is currently running";

const NOT_INCREMENTAL_NOTICE: &str =
    "Incremental indexing is not available for this indexer, starting full indexing.\n";

#[derive(Debug)]
pub enum RunOutcome {
    /// A fresh lock is held by another run. Nothing was changed.
    AlreadyRunning(String),
    Finished(RunReport),
}

pub struct IndexerRunner {
    config: Arc<Config>,
    pool: SqlitePool,
    hooks: Arc<Hooks>,
    extractors: Arc<ExtractorRegistry>,
    registry: IndexerRegistry,
    notifier: Box<dyn Notifier>,
}

impl IndexerRunner {
    /// Runner with the built-in indexers, the default extractors, no hooks
    /// and sendmail notification.
    pub fn new(config: Config, pool: SqlitePool) -> Self {
        let notifier = Box::new(SendmailNotifier::new(&config.notification));
        Self {
            config: Arc::new(config),
            pool,
            hooks: Arc::new(Hooks::default()),
            extractors: Arc::new(ExtractorRegistry::with_defaults()),
            registry: IndexerRegistry::with_builtin(),
            notifier,
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = Arc::new(extractors);
        self
    }

    pub fn with_registry(mut self, registry: IndexerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn start_indexing(
        &self,
        mode: IndexingMode,
        called_from_automation: bool,
    ) -> Result<RunOutcome> {
        let mut ctx = RunContext::new(
            Arc::clone(&self.config),
            self.pool.clone(),
            Arc::clone(&self.hooks),
            Arc::clone(&self.extractors),
        );
        ctx.last_run_start_time = ctx.status.last_run_start_time().await?;
        let (mode, mode_message) = resolve_mode(mode, ctx.last_run_start_time);
        ctx.mode = mode;
        info!("Indexing process started: {}", mode_message);

        let now = unix_now();
        let stale_after = self.config.indexing.lock_stale_after_hours * 3600;
        let mut report = RunReport::new(mode, mode_message, now);
        report.max_displayed_errors = self.config.indexing.max_displayed_errors;

        match ctx.status.try_acquire(now, stale_after).await? {
            LockAttempt::Acquired => {}
            LockAttempt::Reclaimed { previous_start } => {
                let notice = format!(
                    "lock has been removed because it is older than {} hours (set at {})",
                    self.config.indexing.lock_stale_after_hours,
                    format_timestamp(previous_start)
                );
                warn!("{}", notice);
                report.notices.push(notice);
            }
            LockAttempt::Held { since } => {
                warn!(since, "lock is set, you can't start indexer twice");
                return Ok(RunOutcome::AlreadyRunning(ALREADY_RUNNING_MESSAGE.to_string()));
            }
        }
        ctx.start_time = now;

        let result = self.run(&mut ctx, &mut report).await;
        let released = ctx.status.release().await;
        result?;
        released?;

        info!("{}", report.finished_message());
        info!("Index contains {} entries.", report.total_records);
        notify_report(
            &self.config.notification,
            self.notifier.as_ref(),
            &report,
            called_from_automation,
        );
        Ok(RunOutcome::Finished(report))
    }

    async fn run(&self, ctx: &mut RunContext, report: &mut RunReport) -> Result<()> {
        ctx.register_additional_fields().await?;

        for job in &self.config.jobs {
            ctx.status
                .set_job_status(job.uid, JobState::Scheduled, unix_now())
                .await?;
        }
        for job in &self.config.jobs {
            self.run_job(ctx, job, report).await?;
        }

        report.cleanup = self.cleanup_index(ctx).await?;
        report.errors.extend(ctx.take_errors());

        report.end_time = unix_now();
        report.total_records = ctx.store.count().await?;
        ctx.status
            .set_last_run(&LastRun {
                start_time: report.start_time,
                end_time: report.end_time,
                duration: report.duration_secs(),
            })
            .await?;
        ctx.status.clear_all().await?;
        Ok(())
    }

    /// Run the indexer for one job plus every custom indexer. Only status
    /// bookkeeping failures are returned; indexing failures go to the report.
    async fn run_job(&self, ctx: &mut RunContext, job: &JobConfig, report: &mut RunReport) -> Result<()> {
        info!(job = %job.title, job_type = %job.job_type, "Running indexer configuration");
        ctx.status
            .set_job_status(job.uid, JobState::Running { current: 0, total: 0 }, unix_now())
            .await?;
        ctx.begin_job(job.clone());
        let incremental = ctx.mode == IndexingMode::Incremental;

        match self.registry.create(job) {
            Some(mut indexer) => {
                let mut message = String::new();
                let result = if incremental && indexer.supports_incremental() {
                    indexer.start_incremental_indexing(ctx).await
                } else {
                    if incremental {
                        info!(job = %job.title, "{}", NOT_INCREMENTAL_NOTICE.trim_end());
                        message.push_str(NOT_INCREMENTAL_NOTICE);
                    }
                    indexer.start_indexing(ctx).await
                };
                match result {
                    Ok(text) => message.push_str(&text),
                    Err(e) => {
                        error!(job = %job.title, error = %format!("{:#}", e), "indexer failed");
                        message.push_str(&format!("Indexing aborted: {:#}", e));
                        report.errors.push(format!("{}: {:#}", job.title, e));
                    }
                }
                report
                    .errors
                    .extend(indexer.errors().iter().map(|e| format!("{}: {}", job.title, e)));
                report.jobs.push(JobReport {
                    title: job.title.clone(),
                    incremental: indexer.ran_incremental(),
                    message,
                    duration_ms: indexer.duration_ms(),
                });
            }
            None if job.job_type.is_builtin() => {
                let e = IndexError::Configuration(format!(
                    "Could not find indexer for type {}",
                    job.job_type
                ));
                error!(job = %job.title, "{}", e);
                report.notices.push(e.to_string());
                report.errors.push(format!("{}: {}", job.title, e));
            }
            None => {}
        }

        let hooks = Arc::clone(&self.hooks);
        for custom in hooks.custom_indexers() {
            info!(job = %job.title, indexer = custom.name(), "Trying to start custom indexer");
            let started = Instant::now();
            let run_incremental = incremental && custom.supports_incremental();
            let result = if run_incremental {
                custom.start_incremental_indexing(job, ctx).await
            } else {
                custom.custom_indexing(job, ctx).await
            };
            match result {
                Ok(message) if message.is_empty() => {}
                Ok(message) => report.jobs.push(JobReport {
                    title: job.title.clone(),
                    incremental: run_incremental,
                    message,
                    duration_ms: started.elapsed().as_millis() as i64,
                }),
                Err(e) => {
                    error!(job = %job.title, indexer = custom.name(), error = %format!("{:#}", e), "custom indexer failed");
                    report.errors.push(format!("{}: {:#}", job.title, e));
                }
            }
        }

        report.errors.extend(
            ctx.take_errors()
                .into_iter()
                .map(|e| format!("{}: {}", job.title, e)),
        );
        ctx.status
            .set_job_status(job.uid, JobState::Finished, unix_now())
            .await?;
        ctx.end_job();
        Ok(())
    }

    /// Full mode: delete every row not written since the run started.
    async fn cleanup_index(&self, ctx: &mut RunContext) -> Result<String> {
        if ctx.mode == IndexingMode::Incremental {
            let message = "Skipping cleanup in incremental mode.";
            info!("{}", message);
            return Ok(message.to_string());
        }

        let started = Instant::now();
        ctx.status
            .set_cleanup_status(JobState::Running { current: 0, total: 1 }, unix_now())
            .await?;
        let mut content = String::new();

        let hooks = Arc::clone(&self.hooks);
        for hook in hooks.cleanup() {
            match hook.cleanup(ctx.start_time, ctx).await {
                Ok(message) => content.push_str(&message),
                Err(e) => {
                    error!(error = %format!("{:#}", e), "cleanup hook failed");
                    ctx.add_error(format!("Cleanup: {:#}", e));
                }
            }
        }

        let count = ctx.store.count_older_than(ctx.start_time).await?;
        if count > 0 {
            ctx.store.delete_older_than(ctx.start_time).await?;
        }
        info!("CleanUpIndex: {} entries deleted.", count);
        content.push_str(&format!("{} entries deleted.\n", count));
        content.push_str(&format!(
            "Cleanup process took {} ms.\n",
            started.elapsed().as_millis()
        ));

        ctx.status
            .set_cleanup_status(JobState::Finished, unix_now())
            .await?;
        Ok(content)
    }
}

/// Falls back to full mode when there is no completed run to compare with.
fn resolve_mode(requested: IndexingMode, last_run_start_time: i64) -> (IndexingMode, String) {
    let mut message = format!("Running indexing process in {} mode", requested);
    let mode = match requested {
        IndexingMode::Incremental if last_run_start_time == 0 => {
            message.push_str(", but last run time is not available. Switching to full mode");
            IndexingMode::Full
        }
        IndexingMode::Incremental => {
            message.push_str(&format!(", last run was {}", format_timestamp(last_run_start_time)));
            IndexingMode::Incremental
        }
        IndexingMode::Full => IndexingMode::Full,
    };
    message.push('.');
    (mode, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_without_last_run_switches_to_full() {
        let (mode, message) = resolve_mode(IndexingMode::Incremental, 0);
        assert_eq!(mode, IndexingMode::Full);
        assert_eq!(
            message,
            "Running indexing process in incremental mode, but last run time is not available. Switching to full mode."
        );
    }

    #[test]
    fn incremental_with_last_run_stays_incremental() {
        let (mode, message) = resolve_mode(IndexingMode::Incremental, 86_400);
        assert_eq!(mode, IndexingMode::Incremental);
        assert_eq!(
            message,
            "Running indexing process in incremental mode, last run was 1970-01-02 00:00:00."
        );

        let (mode, message) = resolve_mode(IndexingMode::Full, 86_400);
        assert_eq!(mode, IndexingMode::Full);
        assert_eq!(message, "Running indexing process in full mode.");
    }
}
