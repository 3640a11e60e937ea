//! Per-run state.
//!
//! A [`RunContext`] is built once per indexing run and handed to every
//! indexer and hook. It owns the store handles, the registered hooks, the
//! run-scoped error list and the upsert path into the index table.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{debug, error, warn};

use crate::config::{Config, JobConfig, JobType, StoreFailurePolicy};
use crate::error::IndexError;
use crate::extract::ExtractorRegistry;
use crate::hooks::{AdditionalField, Hooks};
use crate::host::HostStore;
use crate::models::{IndexRecord, IndexingMode};
use crate::status::{JobState, RunStatus};
use crate::store::{is_core_column, IndexStore};
use crate::text::{add_tag, make_tag, plain_tags, strip_control_characters, unique_list};

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct RunContext {
    pub config: Arc<Config>,
    pub store: IndexStore,
    pub host: HostStore,
    pub status: RunStatus,
    pub hooks: Arc<Hooks>,
    pub extractors: Arc<ExtractorRegistry>,
    pub mode: IndexingMode,
    /// Unix time this run started. Rows older than this are removed by cleanup.
    pub start_time: i64,
    /// Start time of the previous completed run, `0` if there was none.
    pub last_run_start_time: i64,
    additional_fields: Vec<AdditionalField>,
    job: Option<JobConfig>,
    errors: Vec<String>,
}

impl RunContext {
    pub fn new(
        config: Arc<Config>,
        pool: SqlitePool,
        hooks: Arc<Hooks>,
        extractors: Arc<ExtractorRegistry>,
    ) -> Self {
        Self {
            config,
            store: IndexStore::new(pool.clone()),
            host: HostStore::new(pool.clone()),
            status: RunStatus::new(pool),
            hooks,
            extractors,
            mode: IndexingMode::Full,
            start_time: unix_now(),
            last_run_start_time: 0,
            additional_fields: Vec::new(),
            job: None,
            errors: Vec::new(),
        }
    }

    pub fn tag_char(&self) -> char {
        self.config.indexing.tag_char
    }

    /// Collect the fields declared by hooks and add any missing columns.
    pub async fn register_additional_fields(&mut self) -> Result<(), IndexError> {
        let fields = self.hooks.collect_additional_fields();
        let columns: Vec<AdditionalField> = fields
            .iter()
            .filter(|f| !is_core_column(&f.name))
            .cloned()
            .collect();
        self.store.ensure_columns(&columns).await?;
        self.additional_fields = columns;
        Ok(())
    }

    pub fn additional_fields(&self) -> &[AdditionalField] {
        &self.additional_fields
    }

    pub fn job(&self) -> Option<&JobConfig> {
        self.job.as_ref()
    }

    pub fn begin_job(&mut self, job: JobConfig) {
        self.job = Some(job);
    }

    pub fn end_job(&mut self) {
        self.job = None;
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }

    /// Progress of the current job, `current` out of `total` items done.
    pub async fn set_progress(&self, current: usize, total: usize) {
        let Some(job) = &self.job else {
            return;
        };
        if let Err(e) = self
            .status
            .set_job_status(job.uid, JobState::Running { current, total }, unix_now())
            .await
        {
            warn!(job = %job.title, error = %e, "could not record job progress");
        }
    }

    /// Validate, enrich and upsert one record.
    ///
    /// Returns `Ok(false)` when the record was rejected by validation, or when
    /// the write failed under the best-effort policy; the reason is in
    /// [`errors`](Self::errors) either way. Under the fail-fast policy a
    /// failed write is returned as `Err`.
    pub async fn store_in_index(&mut self, mut record: IndexRecord) -> Result<bool, IndexError> {
        if let Err(e) = validate(&record) {
            error!("{}", e);
            self.add_error(e.to_string());
            return Ok(false);
        }

        if let Err(e) = self.prepare(&mut record).await {
            return self.store_failed(e);
        }

        let hooks = Arc::clone(&self.hooks);
        for hook in hooks.modify_field_values() {
            hook.modify_field_values(&mut record, self);
        }
        self.drop_unregistered_fields(&mut record);

        debug!(
            title = %record.title,
            record_type = %record.record_type,
            pid = record.storage_pid,
            language = record.language,
            "storing record"
        );
        if record.debug_only {
            debug!("not writing, debug only");
            return Ok(true);
        }

        let now = unix_now();
        let written = match self.store.find_by_natural_key(&record).await {
            Ok(Some(existing)) => self.store.update(existing.uid, &record, now).await,
            Ok(None) => self.store.insert(&record, now).await.map(|_| ()),
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => Ok(true),
            Err(e) => self.store_failed(e.into()),
        }
    }

    fn store_failed(&mut self, e: IndexError) -> Result<bool, IndexError> {
        error!("{}", e);
        match self.config.indexing.store_failure_policy {
            StoreFailurePolicy::BestEffort => {
                self.add_error(e.to_string());
                Ok(false)
            }
            StoreFailurePolicy::FailFast => Err(e),
        }
    }

    /// Only registered additional fields have a column to write to.
    fn drop_unregistered_fields(&self, record: &mut IndexRecord) {
        record.extra.retain(|name, _| {
            let registered = self.additional_fields.iter().any(|f| &f.name == name);
            if !registered {
                warn!(field = %name, "dropping value of unregistered index field");
            }
            registered
        });
    }

    /// Default tag, tag de-duplication, tag titles, field defaults and
    /// sanitizing.
    async fn prepare(&self, record: &mut IndexRecord) -> Result<(), IndexError> {
        if let Some(job) = &self.job {
            let applies = !record.is_file()
                || job.index_use_page_tags_for_files
                || job.job_type == JobType::File;
            if let (true, Some(option_uid)) = (applies, job.filter_option) {
                if let Some(option) = self.host.filter_options(&[option_uid]).await?.first() {
                    record.tags = add_tag(&record.tags, &make_tag(self.tag_char(), &option.tag));
                }
            }
        }

        record.tags = unique_list(&record.tags);

        if self.config.indexing.index_tag_titles_as_hidden_content && !record.tags.is_empty() {
            let tags = plain_tags(&record.tags, self.tag_char());
            let titles: Vec<String> = self
                .host
                .filter_options_by_tags(&tags, record.language)
                .await?
                .into_iter()
                .map(|option| option.title)
                .collect();
            if !titles.is_empty() {
                record.add_hidden_content(&titles.join(" "));
            }
        }

        for field in &self.additional_fields {
            record
                .extra
                .entry(field.name.clone())
                .or_insert_with(|| field.default.clone());
        }

        record.title = strip_control_characters(&record.title);
        record.content = strip_control_characters(&record.content);
        record.abstract_text = strip_control_characters(&record.abstract_text);
        Ok(())
    }
}

fn validate(record: &IndexRecord) -> Result<(), IndexError> {
    let mut missing = Vec::new();
    if record.storage_pid == 0 {
        missing.push("No storage PID set");
    }
    if record.record_type.is_empty() {
        missing.push("No type set");
    }
    if record.target_pid.is_empty() || record.target_pid == "0" {
        missing.push("No target PID set");
    }
    if missing.is_empty() {
        return Ok(());
    }

    let mut message = missing.join(", ");
    if !record.record_type.is_empty() {
        message.push_str(&format!("; TYPE: {}", record.record_type));
    }
    if !record.target_pid.is_empty() {
        message.push_str(&format!("; TARGET PID: {}", record.target_pid));
    }
    if record.storage_pid != 0 {
        message.push_str(&format!("; STORAGE PID: {}", record.storage_pid));
    }
    Err(IndexError::Validation(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_lists_every_missing_field() {
        let record = IndexRecord::new(0, "Home", "", "1", "");
        let err = validate(&record).unwrap_err().to_string();
        assert_eq!(
            err,
            "Validation error: No storage PID set, No type set; TARGET PID: 1"
        );
    }

    #[test]
    fn zero_target_pid_is_missing() {
        let record = IndexRecord::new(5, "Home", "page", "0", "");
        let err = validate(&record).unwrap_err().to_string();
        assert!(err.contains("No target PID set"));
        assert!(err.contains("STORAGE PID: 5"));
    }

    #[test]
    fn complete_record_is_valid() {
        assert!(validate(&IndexRecord::new(5, "Home", "page", "1", "")).is_ok());
    }
}
