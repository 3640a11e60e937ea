//! Indexes files from managed storages, plain directories and static file
//! collections.
//!
//! A file is identified by the hash of its path plus its modification time.
//! In incremental mode a file whose identity is already in the index is
//! skipped entirely; in full mode its stored content is written again so the
//! row survives cleanup. Rows of files that disappeared are removed by
//! [`FileIndexer::remove_deleted`] after an incremental run.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::base::{
    add_file_metadata, build_unique_file_hash, category_tags, detect_file_language,
    get_file_content, is_file_indexable, IndexerBase, FILES_TABLE, MAX_TREE_DEPTH,
};
use super::Indexer;
use crate::config::JobConfig;
use crate::context::RunContext;
use crate::fileinfo::FileInfo;
use crate::models::{IndexRecord, IndexingMode};
use crate::storage::{ManagedFile, ManagedStorage, TEMP_FOLDER};
use crate::text::{add_tag, make_tag};

/// A file found for indexing.
#[derive(Debug, Clone)]
pub enum IndexableFile {
    /// Plain file below the public root.
    Plain(PathBuf),
    /// File in a managed storage, with metadata.
    Managed(ManagedFile),
}

impl IndexableFile {
    pub fn path(&self) -> &Path {
        match self {
            IndexableFile::Plain(path) => path,
            IndexableFile::Managed(file) => &file.path,
        }
    }
}

pub struct FileIndexer {
    base: IndexerBase,
    storage: Option<ManagedStorage>,
}

impl FileIndexer {
    pub fn new(job: JobConfig) -> Self {
        Self {
            base: IndexerBase::new(job),
            storage: None,
        }
    }

    async fn run(&mut self, ctx: &mut RunContext) -> Result<String> {
        let directories: Vec<String> = self
            .base
            .job
            .directories
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        let collections = self.base.job.file_collections.clone();

        if directories.is_empty() && collections.is_empty() {
            let message = "No directories or file collections defined for indexing.";
            error!(job = %self.base.job.title, "{}", message);
            self.base.add_error(message);
            return Ok(message.to_string());
        }

        let mut files = Vec::new();
        if !directories.is_empty() {
            if self.base.job.uses_managed_storage() {
                self.storage = self
                    .base
                    .job
                    .storage
                    .and_then(|uid| ctx.config.storage(uid))
                    .map(ManagedStorage::from);
                self.files_from_storage(ctx, &mut files, &directories)
                    .await?;
            } else {
                files = self.files_from_directories(ctx, &directories);
            }
        }
        if !collections.is_empty() {
            self.files_from_collections(ctx, &mut files, &collections)
                .await?;
        }

        let counter = self.extract_content_and_save_to_index(ctx, &files).await?;
        info!(
            job = %self.base.job.title,
            found = files.len(),
            indexed = counter,
            "file indexing done"
        );

        let mut message = format!("{} files have been found for indexing.\n", files.len());
        if self.base.is_incremental() {
            message.push_str(&format!("{} new or updated files have been indexed.", counter));
            if self.base.counter_removed > 0 {
                message.push_str(&format!(
                    "\n{} outdated file index record(s) have been removed.",
                    self.base.counter_removed
                ));
            }
        } else {
            message.push_str(&format!("{} files have been indexed.", counter));
        }
        Ok(message)
    }

    /// Walk storage folders depth first. Files failing the indexability check
    /// are dropped from the index in incremental mode.
    async fn files_from_storage(
        &mut self,
        ctx: &RunContext,
        files: &mut Vec<IndexableFile>,
        directories: &[String],
    ) -> Result<()> {
        let Some(storage) = self.storage.clone() else {
            let message = format!(
                "Storage {} is not configured.",
                self.base.job.storage.unwrap_or_default()
            );
            error!("{}", message);
            self.base.add_error(message);
            return Ok(());
        };

        let mut pending: Vec<String> = directories.iter().rev().cloned().collect();
        while let Some(folder) = pending.pop() {
            if !storage.has_folder(&folder) {
                let message = format!("Folder \"{}\" does not exist.", folder);
                error!("{}", message);
                self.base.add_error(message);
                continue;
            }
            if ManagedStorage::folder_name(&folder) == TEMP_FOLDER {
                continue;
            }

            for file in storage.files(&ctx.host, &folder).await? {
                let indexable = FileInfo::from_path(&file.path)
                    .map(|info| is_file_indexable(&self.base.job, &info))
                    .unwrap_or(false);
                if indexable {
                    files.push(IndexableFile::Managed(file));
                } else if self.base.is_incremental() {
                    self.base.remove_file_from_index(ctx, &file).await?;
                }
            }

            let mut subfolders = storage.subfolders(&folder)?;
            subfolders.reverse();
            pending.extend(subfolders);
        }
        Ok(())
    }

    /// Files below plain directories, recursively, filtered by extension.
    fn files_from_directories(&mut self, ctx: &RunContext, directories: &[String]) -> Vec<IndexableFile> {
        let mut files = Vec::new();
        for directory in directories {
            let root = ctx
                .config
                .indexing
                .public_root
                .join(directory.trim_matches('/'));
            if !root.is_dir() {
                let message = format!("Directory \"{}\" does not exist.", root.display());
                warn!("{}", message);
                self.base.add_error(message);
                continue;
            }
            for entry in WalkDir::new(&root)
                .max_depth(MAX_TREE_DEPTH)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if !entry.file_type().is_file() {
                    continue;
                }
                let extension = entry
                    .path()
                    .extension()
                    .map(|e| e.to_string_lossy().to_string())
                    .unwrap_or_default();
                if self.base.job.allows_extension(&extension) {
                    files.push(IndexableFile::Plain(entry.path().to_path_buf()));
                }
            }
        }
        files
    }

    async fn files_from_collections(
        &mut self,
        ctx: &RunContext,
        files: &mut Vec<IndexableFile>,
        collections: &[i64],
    ) -> Result<()> {
        for collection in collections {
            for file_uid in ctx.host.collection_files(*collection).await? {
                let Some(meta) = ctx.host.file(file_uid).await? else {
                    self.base.add_error(format!(
                        "File #{} of collection #{} does not exist.",
                        file_uid, collection
                    ));
                    continue;
                };
                match ctx.config.storage(meta.storage) {
                    Some(storage) => files.push(IndexableFile::Managed(
                        ManagedStorage::from(storage).file_for(meta),
                    )),
                    None => self.base.add_error(format!(
                        "File #{} of collection #{} lives in unknown storage {}.",
                        file_uid, collection, meta.storage
                    )),
                }
            }
        }
        Ok(())
    }

    /// Store every file whose content is new or, in full mode, every file.
    /// Returns the number of files written.
    async fn extract_content_and_save_to_index(
        &mut self,
        ctx: &mut RunContext,
        files: &[IndexableFile],
    ) -> Result<usize> {
        let total = files.len();
        let mut counter = 0;
        for (position, file) in files.iter().enumerate() {
            ctx.set_progress(position, total).await;

            let info = match FileInfo::from_path(file.path()) {
                Ok(info) => info,
                Err(e) => {
                    self.base.add_error(format!("{:#}", e));
                    continue;
                }
            };
            let hash = build_unique_file_hash(&info.directory, &info.name);
            let existing = ctx
                .store
                .find_file_record(
                    &format!("file:{}", info.extension),
                    &hash,
                    self.base.job.storage_pid,
                    info.mtime,
                    self.file_language(ctx, file),
                )
                .await?;

            if self.base.is_incremental() && existing.is_some() {
                debug!(path = %info.path.display(), "unchanged, skipping");
                continue;
            }

            // A changed mtime gives a new identity, so this inserts a second
            // row. The row of the previous version stays until a full run's
            // cleanup removes it.
            let content = match existing {
                Some(row) => row.record.content,
                None => {
                    let managed = self.base.job.uses_managed_storage();
                    match get_file_content(&ctx.extractors, &info, managed) {
                        Ok(content) => content,
                        Err(e) => {
                            error!("{}", e);
                            self.base.add_error(e.to_string());
                            continue;
                        }
                    }
                }
            };

            self.store_to_index(ctx, file, &info, hash, content).await?;
            counter += 1;
        }
        Ok(counter)
    }

    /// Page holding the file links. Jobs without one point at page 1.
    fn target_pid(&self) -> i64 {
        if self.base.job.target_pid > 0 {
            self.base.job.target_pid
        } else {
            1
        }
    }

    fn file_language(&self, ctx: &RunContext, file: &IndexableFile) -> i64 {
        match file {
            IndexableFile::Plain(_) => -1,
            IndexableFile::Managed(managed) => {
                detect_file_language(&ctx.config.languages, &managed.meta.language)
            }
        }
    }

    async fn store_to_index(
        &mut self,
        ctx: &mut RunContext,
        file: &IndexableFile,
        info: &FileInfo,
        hash: String,
        content: String,
    ) -> Result<()> {
        let tag_char = ctx.tag_char();
        let mut record = IndexRecord::new(
            self.base.job.storage_pid,
            info.name.clone(),
            format!("file:{}", info.extension),
            self.target_pid().to_string(),
            content,
        );
        record.tags = make_tag(tag_char, "file");
        record.language = self.file_language(ctx, file);
        record.sortdate = info.mtime;
        record.directory = info.directory.clone();
        record.hash = hash;

        if let IndexableFile::Managed(managed) = file {
            record.orig_uid = managed.uid();
            // Metadata, groups and categories only for managed storage jobs.
            if self.base.job.uses_managed_storage() {
                record.content = add_file_metadata(&managed.meta, &record.content);
                record.abstract_text = managed.meta.description.clone();
                record.fe_group = managed.meta.fe_groups.clone();
                record.tags = add_tag(
                    &record.tags,
                    &category_tags(ctx, FILES_TABLE, managed.uid()).await?,
                );
            }
        }

        let hooks = Arc::clone(&ctx.hooks);
        for hook in hooks.modify_file_index_entry() {
            hook.modify_file_index_entry(file.path(), &mut record, ctx);
        }

        ctx.store_in_index(record).await?;
        Ok(())
    }

    /// Delete file rows of this job that were not touched since the last
    /// run and whose file is gone.
    pub async fn remove_deleted(&mut self, ctx: &RunContext) -> Result<String> {
        let outdated = ctx
            .store
            .find_outdated_file_records(self.base.job.storage_pid, ctx.last_run_start_time)
            .await?;
        let mut deleted = 0;
        for row in outdated {
            let path = format!("{}{}", row.record.directory, row.record.title);
            if !Path::new(&path).exists() {
                ctx.store.delete_by_uid(row.uid).await?;
                deleted += 1;
            }
        }
        if deleted > 0 {
            info!(job = %self.base.job.title, deleted, "removed outdated file records");
            return Ok(format!(
                "\nFound and removed {} outdated file index record(s).",
                deleted
            ));
        }
        Ok(String::new())
    }
}

#[async_trait]
impl Indexer for FileIndexer {
    fn supports_incremental(&self) -> bool {
        true
    }

    async fn start_indexing(&mut self, ctx: &mut RunContext) -> Result<String> {
        self.base.mode = IndexingMode::Full;
        self.run(ctx).await
    }

    async fn start_incremental_indexing(&mut self, ctx: &mut RunContext) -> Result<String> {
        self.base.mode = IndexingMode::Incremental;
        let mut message = self.run(ctx).await?;
        message.push_str(&self.remove_deleted(ctx).await?);
        Ok(message)
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
