//! Indexes pages of the host page tree.
//!
//! Pages below the job's recursive starting points plus its single pages are
//! filtered to searchable, live pages, tagged, and stored as one `page`
//! record each. Files in the page's `media` field are either appended to the
//! page content or stored as records of their own.

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, info};

use super::base::{record_is_live, IndexerBase, ParentRecord};
use super::Indexer;
use crate::config::JobConfig;
use crate::context::RunContext;
use crate::models::{IndexRecord, IndexingMode};
use crate::text::strip_tags;

pub struct PageIndexer {
    base: IndexerBase,
}

impl PageIndexer {
    pub fn new(job: JobConfig) -> Self {
        Self {
            base: IndexerBase::new(job),
        }
    }

    async fn run(&mut self, ctx: &mut RunContext) -> Result<String> {
        let ids = self
            .base
            .resolve_recursive_page_list(
                &ctx.host,
                &self.base.job.startingpoints_recursive,
                &self.base.job.single_pages,
                false,
            )
            .await?;
        let mut pages = self
            .base
            .filter_searchable_pages(&ctx.host, &ids, |_| true)
            .await?;
        self.base.assign_tags(ctx, &mut pages).await?;

        let since = ctx.last_run_start_time;
        let total = pages.len();
        let mut indexed = 0;
        let mut skipped = 0;
        for (position, page) in pages.into_values().enumerate() {
            ctx.set_progress(position, total).await;

            if !record_is_live(page.version_markers()) {
                debug!(uid = page.uid, "page is not live, skipping");
                skipped += 1;
                continue;
            }
            if self.base.is_incremental() && page.tstamp < since {
                continue;
            }

            let files = self
                .base
                .extract_attached_file_content(ctx, "pages", "media", page.uid, page.sys_language_uid)
                .await?;
            let mut content = format!("{}\n{}", page.title, strip_tags(&page.bodytext));
            if self.base.job.index_files_separately {
                self.base
                    .store_attached_files_as_individual_records(ctx, &files, &ParentRecord::from(&page))
                    .await?;
            } else if !files.is_empty() {
                content.push('\n');
                content.push_str(&self.base.content_from_files(ctx, &files));
            }

            let mut record = IndexRecord::new(
                self.base.job.storage_pid,
                page.title.clone(),
                "page",
                page.uid.to_string(),
                content,
            );
            record.tags = page.tags.clone();
            record.abstract_text = page.abstract_text.clone();
            record.language = page.sys_language_uid;
            record.starttime = page.starttime;
            record.endtime = page.endtime;
            record.fe_group = page.fe_group.clone();
            record.orig_uid = page.uid;
            record.orig_pid = page.pid;

            if ctx.store_in_index(record).await? {
                indexed += 1;
            }
        }

        info!(
            job = %self.base.job.title,
            found = total,
            indexed,
            files = self.base.file_counter,
            "page indexing done"
        );
        let mut message = format!(
            "{} pages have been found for indexing.\n{} pages have been indexed.",
            total, indexed
        );
        if skipped > 0 {
            message.push_str(&format!("\n{} pages are not live and have been skipped.", skipped));
        }
        if self.base.file_counter > 0 {
            message.push_str(&format!("\n{} files have been indexed.", self.base.file_counter));
        }
        Ok(message)
    }
}

#[async_trait]
impl Indexer for PageIndexer {
    fn supports_incremental(&self) -> bool {
        true
    }

    async fn start_indexing(&mut self, ctx: &mut RunContext) -> Result<String> {
        self.base.mode = IndexingMode::Full;
        self.run(ctx).await
    }

    async fn start_incremental_indexing(&mut self, ctx: &mut RunContext) -> Result<String> {
        self.base.mode = IndexingMode::Incremental;
        self.run(ctx).await
    }

    fn errors(&self) -> &[String] {
        self.base.errors()
    }

    fn duration_ms(&self) -> i64 {
        self.base.duration_ms()
    }

    fn ran_incremental(&self) -> bool {
        self.base.is_incremental()
    }
}
