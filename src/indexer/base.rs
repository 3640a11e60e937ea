//! Shared toolkit for concrete indexers: page tree traversal, access
//! filtering, tagging, attached files, file identity and language detection.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::{JobConfig, LanguageConfig};
use crate::context::RunContext;
use crate::error::IndexError;
use crate::extract::ExtractorRegistry;
use crate::fileinfo::FileInfo;
use crate::host::{FileRow, HostStore, PageTreeFilter};
use crate::models::{IndexRecord, IndexingMode, PageRecord, VersionMarkers};
use crate::storage::{ManagedFile, ManagedStorage};
use crate::text::{add_tag, make_tag, split_int_list, strip_tags, tag_from_title};

/// How deep page trees are descended below a starting point.
pub const MAX_TREE_DEPTH: usize = 99;

/// Separates prepended file metadata from the extracted file content.
pub const METADATA_SEPARATOR: char = '\n';

/// Table name category relations use for managed files.
pub const FILES_TABLE: &str = "files";

/// Access window, groups, target page and language a file record inherits
/// from the record it is attached to.
#[derive(Debug, Clone, Default)]
pub struct ParentRecord {
    pub uid: i64,
    pub target_pid: i64,
    pub language: i64,
    pub starttime: i64,
    pub endtime: i64,
    pub fe_group: String,
}

impl From<&PageRecord> for ParentRecord {
    fn from(page: &PageRecord) -> Self {
        Self {
            uid: page.uid,
            target_pid: page.uid,
            language: page.sys_language_uid,
            starttime: page.starttime,
            endtime: page.endtime,
            fe_group: page.fe_group.clone(),
        }
    }
}

pub struct IndexerBase {
    pub job: JobConfig,
    pub mode: IndexingMode,
    started: Instant,
    errors: Vec<String>,
    /// Index rows deleted by this indexer.
    pub counter_removed: u64,
    /// Attached files read or stored by this indexer.
    pub file_counter: usize,
}

impl IndexerBase {
    pub fn new(job: JobConfig) -> Self {
        Self {
            job,
            mode: IndexingMode::Full,
            started: Instant::now(),
            errors: Vec::new(),
            counter_removed: 0,
            file_counter: 0,
        }
    }

    pub fn is_incremental(&self) -> bool {
        self.mode == IndexingMode::Incremental
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn duration_ms(&self) -> i64 {
        self.started.elapsed().as_millis() as i64
    }

    /// Every page below the recursive roots plus the single pages, without
    /// duplicates, in discovery order.
    pub async fn resolve_recursive_page_list(
        &self,
        host: &HostStore,
        roots: &[i64],
        singles: &[i64],
        include_deleted: bool,
    ) -> Result<Vec<i64>, IndexError> {
        let filter = PageTreeFilter {
            include_deleted,
            ..Default::default()
        };
        let mut pages = Vec::new();
        for root in roots {
            pages.extend(tree_list(host, *root, MAX_TREE_DEPTH, &filter).await?);
        }
        pages.extend_from_slice(singles);

        let mut seen = HashSet::new();
        pages.retain(|uid| seen.insert(*uid));
        Ok(pages)
    }

    /// Searchable rows of `ids` that also pass `extra`, keyed by page uid.
    pub async fn filter_searchable_pages<F>(
        &self,
        host: &HostStore,
        ids: &[i64],
        extra: F,
    ) -> Result<BTreeMap<i64, PageRecord>, IndexError>
    where
        F: Fn(&PageRecord) -> bool,
    {
        if ids.is_empty() {
            warn!(job = %self.job.title, "No pages/sysfolders given.");
            return Ok(BTreeMap::new());
        }
        Ok(host
            .searchable_pages(ids)
            .await?
            .into_iter()
            .filter(|page| extra(page))
            .map(|page| (page.uid, page))
            .collect())
    }

    /// Add tags to `pages` from their own filter options, their system
    /// categories and the automated tagging rules of filter options.
    /// Existing tags are kept.
    pub async fn assign_tags(
        &self,
        ctx: &RunContext,
        pages: &mut BTreeMap<i64, PageRecord>,
    ) -> Result<(), IndexError> {
        if pages.is_empty() {
            warn!(job = %self.job.title, "No pages/sysfolders given to add tags for.");
            return Ok(());
        }
        let tag_char = ctx.tag_char();

        for page in pages.values_mut() {
            let option_uids = split_int_list(&page.facet_options);
            for option in ctx.host.filter_options(&option_uids).await? {
                page.tags = add_tag(&page.tags, &make_tag(tag_char, &option.tag));
            }
        }

        for page in pages.values_mut() {
            for category in ctx.host.categories_for("pages", page.uid).await? {
                page.tags = add_tag(&page.tags, &system_category_tag(tag_char, category.uid));
            }
        }

        for option in ctx.host.automated_tagging_options().await? {
            let filter = PageTreeFilter {
                searchable_only: true,
                exclude_parents: split_int_list(&option.automated_tagging_exclude),
                ..Default::default()
            };
            for root in split_int_list(&option.automated_tagging) {
                for uid in tree_list(&ctx.host, root, MAX_TREE_DEPTH, &filter).await? {
                    if let Some(page) = pages.get_mut(&uid) {
                        page.tags = add_tag(&page.tags, &make_tag(tag_char, &option.tag));
                    }
                }
            }
        }
        Ok(())
    }

    /// Indexable files attached to `table.field` of a record, in attachment
    /// order.
    pub async fn extract_attached_file_content(
        &mut self,
        ctx: &RunContext,
        table: &str,
        field: &str,
        record: i64,
        language: i64,
    ) -> Result<Vec<ManagedFile>, IndexError> {
        let mut files = Vec::new();
        for reference in ctx.host.file_references(table, field, record, language).await? {
            let Some(meta) = ctx.host.file(reference.file).await? else {
                self.add_error(format!(
                    "File #{} referenced by {} #{} does not exist.",
                    reference.file, table, record
                ));
                continue;
            };
            let Some(storage) = ctx.config.storage(meta.storage) else {
                self.add_error(format!(
                    "File #{} lives in unknown storage {}.",
                    meta.uid, meta.storage
                ));
                continue;
            };
            let file = ManagedStorage::from(storage).file_for(meta);
            match FileInfo::from_path(&file.path) {
                Ok(info) if is_file_indexable(&self.job, &info) => files.push(file),
                Ok(_) => debug!(path = %file.path.display(), "attached file is not indexable"),
                // Reported when the file is stored.
                Err(_) => files.push(file),
            }
        }
        Ok(files)
    }

    /// Extracted text of `files`, one per line.
    pub fn content_from_files(&mut self, ctx: &RunContext, files: &[ManagedFile]) -> String {
        let mut content = String::new();
        for file in files {
            let extracted = FileInfo::from_path(&file.path)
                .map_err(|e| IndexError::Source(e.to_string()))
                .and_then(|info| get_file_content(&ctx.extractors, &info, true));
            match extracted {
                Ok(text) => {
                    content.push_str(&text);
                    content.push('\n');
                    self.file_counter += 1;
                    debug!(path = %file.path.display(), "file content has been fetched");
                }
                Err(e) => self.add_error(e.to_string()),
            }
        }
        content
    }

    /// Store each attached file as a record of its own, inheriting access
    /// and placement from `parent`.
    pub async fn store_attached_files_as_individual_records(
        &mut self,
        ctx: &mut RunContext,
        files: &[ManagedFile],
        parent: &ParentRecord,
    ) -> Result<(), IndexError> {
        for file in files {
            if !file.path.exists() {
                let message = format!(
                    "Could not index file {} from parent record #{} (file does not exist).",
                    file.path.display(),
                    parent.uid
                );
                warn!("{}", message);
                self.add_error(message);
                continue;
            }
            let info = match FileInfo::from_path(&file.path) {
                Ok(info) => info,
                Err(e) => {
                    self.add_error(e.to_string());
                    continue;
                }
            };
            match get_file_content(&ctx.extractors, &info, true) {
                Ok(content) if !content.is_empty() => {
                    self.store_file_in_index(ctx, file, &info, &content, parent)
                        .await?;
                    self.file_counter += 1;
                }
                other => {
                    if let Err(e) = other {
                        self.add_error(e.to_string());
                    }
                    let message = format!("Could not index file {}.", file.path.display());
                    warn!("{}", message);
                    self.add_error(message);
                }
            }
        }
        Ok(())
    }

    async fn store_file_in_index(
        &mut self,
        ctx: &mut RunContext,
        file: &ManagedFile,
        info: &FileInfo,
        content: &str,
        parent: &ParentRecord,
    ) -> Result<bool, IndexError> {
        let tag_char = ctx.tag_char();
        let mut tags = make_tag(tag_char, "file");
        tags = add_tag(&tags, &category_tags(ctx, FILES_TABLE, file.uid()).await?);

        let mut record = IndexRecord::new(
            self.job.storage_pid,
            info.name.clone(),
            format!("file:{}", info.extension),
            parent.target_pid.to_string(),
            add_file_metadata(&file.meta, content),
        );
        record.tags = tags;
        record.abstract_text = file.meta.description.clone();
        record.language = parent.language;
        record.starttime = parent.starttime;
        record.endtime = parent.endtime;
        record.fe_group = intersect_groups(&parent.fe_group, &file.meta.fe_groups);
        record.sortdate = info.mtime;
        record.orig_uid = file.uid();
        record.directory = info.directory.clone();
        record.hash = build_unique_file_hash(&info.directory, &info.name);

        let stored = ctx.store_in_index(record).await?;
        debug!(path = %file.path.display(), "file has been stored");
        Ok(stored)
    }

    /// Delete the index rows of a managed file that is no longer indexable.
    pub async fn remove_file_from_index(
        &mut self,
        ctx: &RunContext,
        file: &ManagedFile,
    ) -> Result<(), IndexError> {
        let extension = Path::new(&file.meta.identifier)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let record_type = format!("file:{}", extension);
        let language = detect_file_language(&ctx.config.languages, &file.meta.language);
        let removed = ctx
            .store
            .delete_by_unique_properties(file.uid(), self.job.storage_pid, &record_type, language)
            .await?;
        if removed > 0 {
            self.counter_removed += removed;
            debug!(
                identifier = %file.meta.identifier,
                removed,
                "removed index records for file"
            );
        }
        Ok(())
    }
}

/// `root` followed by its descendants in depth-first order, at most `depth`
/// levels deep.
pub async fn tree_list(
    host: &HostStore,
    root: i64,
    depth: usize,
    filter: &PageTreeFilter,
) -> Result<Vec<i64>, IndexError> {
    let root = root.abs();
    let mut list = vec![root];
    if root == 0 || depth == 0 {
        return Ok(list);
    }

    let mut stack: Vec<(i64, usize)> = host
        .page_children(root, filter)
        .await?
        .into_iter()
        .rev()
        .map(|uid| (uid, depth - 1))
        .collect();
    while let Some((uid, remaining)) = stack.pop() {
        list.push(uid);
        if remaining > 0 {
            let children = host.page_children(uid, filter).await?;
            stack.extend(children.into_iter().rev().map(|c| (c, remaining - 1)));
        }
    }
    Ok(list)
}

pub fn system_category_tag(tag_char: char, category_uid: i64) -> String {
    make_tag(tag_char, &format!("syscat{}", category_uid))
}

/// Tags for the categories of a record: one per category title plus the
/// generic `syscat<uid>` tag.
pub async fn category_tags(ctx: &RunContext, table: &str, record: i64) -> Result<String, IndexError> {
    let tag_char = ctx.tag_char();
    let categories = ctx.host.categories_for(table, record).await?;
    let mut tags = String::new();
    for category in &categories {
        let tag = tag_from_title(&category.title, tag_char);
        if !tag.is_empty() {
            tags = add_tag(&tags, &make_tag(tag_char, &tag));
        }
    }
    for category in &categories {
        tags = add_tag(&tags, &system_category_tag(tag_char, category.uid));
    }
    Ok(tags)
}

/// Identity of a file: SHA-256 of its directory and name. Editing a file in
/// place keeps the hash, the modification time tells versions apart.
pub fn build_unique_file_hash(directory: &str, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(directory.as_bytes());
    hasher.update(name.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Site language id for a declared file language, `-1` when unknown.
pub fn detect_file_language(languages: &[LanguageConfig], declared: &str) -> i64 {
    let declared = declared.trim().to_lowercase();
    if declared.is_empty() {
        return -1;
    }
    languages
        .iter()
        .rev()
        .find(|language| {
            std::iter::once(Some(&language.locale))
                .chain([
                    language.title.as_ref(),
                    language.website_title.as_ref(),
                    language.hreflang.as_ref(),
                    language.legacy_key.as_ref(),
                ])
                .flatten()
                .any(|name| name.to_lowercase() == declared)
        })
        .map(|language| language.id)
        .unwrap_or(-1)
}

/// Records in a draft workspace or with a non-default version state are not
/// indexed.
pub fn record_is_live(markers: VersionMarkers) -> bool {
    markers.state.unwrap_or(0) == 0 && markers.workspace.unwrap_or(0) == 0
}

/// Prepend `title description alternative` to the content, replacing
/// metadata prepended earlier.
pub fn add_file_metadata(meta: &FileRow, content: &str) -> String {
    let content = match content.rfind(METADATA_SEPARATOR) {
        Some(pos) => &content[pos + METADATA_SEPARATOR.len_utf8()..],
        None => content,
    };

    let mut metadata = String::new();
    for value in [&meta.title, &meta.description, &meta.alternative] {
        if !value.is_empty() {
            metadata.push_str(value);
            metadata.push(' ');
        }
    }
    if metadata.is_empty() {
        return content.to_string();
    }
    format!("{}{}{}", metadata, METADATA_SEPARATOR, content)
}

/// Extension allow-list and size cap of the job.
pub fn is_file_indexable(job: &JobConfig, info: &FileInfo) -> bool {
    info.is_file
        && job.allows_extension(&info.extension)
        && job.max_file_size.map_or(true, |max| info.size <= max)
}

/// Plain text of a file with markup removed and line breaks flattened.
///
/// A file type without extractor yields empty content when
/// `allow_missing_extractor` is set, which indexes metadata only.
pub fn get_file_content(
    extractors: &ExtractorRegistry,
    info: &FileInfo,
    allow_missing_extractor: bool,
) -> Result<String, IndexError> {
    if !info.is_file {
        return Err(IndexError::Source(format!(
            "{} is not a file.",
            info.path.display()
        )));
    }
    let Some(extractor) = extractors.get(&info.extension) else {
        if allow_missing_extractor {
            return Ok(String::new());
        }
        return Err(IndexError::Source(format!(
            "No indexer for this type of file ({}).",
            info.extension
        )));
    };
    let text = extractor
        .extract(&info.path)
        .map_err(|e| IndexError::Source(format!("{}: {}", info.path.display(), e)))?;
    Ok(strip_tags(&text).replace(METADATA_SEPARATOR, " "))
}

/// Groups allowed by both lists. An empty list does not restrict.
pub fn intersect_groups(parent: &str, file: &str) -> String {
    if file.trim().is_empty() {
        return parent.to_string();
    }
    if parent.trim().is_empty() {
        return file.to_string();
    }
    let file_groups = split_int_list(file);
    split_int_list(parent)
        .into_iter()
        .filter(|g| file_groups.contains(g))
        .map(|g| g.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn language(id: i64, locale: &str, hreflang: &str) -> LanguageConfig {
        LanguageConfig {
            id,
            locale: locale.into(),
            title: Some(format!("Language {}", id)),
            website_title: None,
            hreflang: Some(hreflang.into()),
            legacy_key: None,
        }
    }

    #[test]
    fn file_hash_depends_on_path_only() {
        let a = build_unique_file_hash("/srv/docs/", "a.txt");
        assert_eq!(a, build_unique_file_hash("/srv/docs/", "a.txt"));
        assert_ne!(a, build_unique_file_hash("/srv/other/", "a.txt"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn languages_match_case_insensitively() {
        let languages = vec![language(0, "en_US.UTF-8", "en-US"), language(1, "de_DE", "de")];
        assert_eq!(detect_file_language(&languages, "DE"), 1);
        assert_eq!(detect_file_language(&languages, "en_us.utf-8"), 0);
        assert_eq!(detect_file_language(&languages, "language 1"), 1);
        assert_eq!(detect_file_language(&languages, "fr"), -1);
        assert_eq!(detect_file_language(&languages, ""), -1);
    }

    #[test]
    fn liveness_follows_version_markers() {
        assert!(record_is_live(VersionMarkers::default()));
        assert!(record_is_live(VersionMarkers {
            state: Some(0),
            workspace: Some(0)
        }));
        assert!(!record_is_live(VersionMarkers {
            state: Some(1),
            workspace: Some(0)
        }));
        assert!(!record_is_live(VersionMarkers {
            state: None,
            workspace: Some(3)
        }));
    }

    #[test]
    fn metadata_is_replaced_not_stacked() {
        let meta = FileRow {
            title: "Annual report".into(),
            description: "Figures".into(),
            ..Default::default()
        };
        let once = add_file_metadata(&meta, "body text");
        assert_eq!(once, "Annual report Figures \nbody text");
        assert_eq!(add_file_metadata(&meta, &once), once);
        assert_eq!(add_file_metadata(&FileRow::default(), "body"), "body");
    }

    #[test]
    fn groups_are_intersected() {
        assert_eq!(intersect_groups("1,2,3", "2,3,4"), "2,3");
        assert_eq!(intersect_groups("", "5"), "5");
        assert_eq!(intersect_groups("1", ""), "1");
    }
}
