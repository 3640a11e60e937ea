//! Core data models used throughout the indexer.
//!
//! These types represent the index records written to the search table and
//! the host platform rows (pages, filter options) the indexers read.

use std::collections::BTreeMap;
use std::fmt;

/// Full reindex or incremental reindex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexingMode {
    Full,
    Incremental,
}

impl fmt::Display for IndexingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexingMode::Full => f.write_str("full"),
            IndexingMode::Incremental => f.write_str("incremental"),
        }
    }
}

/// Value of a registered additional index field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Int(i64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Text(v) => f.write_str(v),
        }
    }
}

/// A row of the flat search index, as produced by an indexer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexRecord {
    pub storage_pid: i64,
    pub title: String,
    pub record_type: String,
    pub target_pid: String,
    pub content: String,
    /// Comma separated, each token wrapped in the configured tag char.
    pub tags: String,
    pub params: String,
    pub abstract_text: String,
    /// `-1` means "all languages".
    pub language: i64,
    pub starttime: i64,
    pub endtime: i64,
    pub fe_group: String,
    pub orig_uid: i64,
    pub orig_pid: i64,
    pub sortdate: i64,
    pub hash: String,
    pub directory: String,
    pub hidden_content: String,
    /// Values for fields registered through the additional-fields hook.
    pub extra: BTreeMap<String, FieldValue>,
    /// Validate and log only; nothing is written.
    pub debug_only: bool,
}

impl IndexRecord {
    pub fn new(
        storage_pid: i64,
        title: impl Into<String>,
        record_type: impl Into<String>,
        target_pid: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            storage_pid,
            title: title.into(),
            record_type: record_type.into(),
            target_pid: target_pid.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    /// File records use the hash based identity instead of `orig_uid`.
    pub fn is_file(&self) -> bool {
        self.record_type.starts_with("file")
    }

    pub fn add_hidden_content(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if !self.hidden_content.is_empty() {
            self.hidden_content.push(' ');
        }
        self.hidden_content.push_str(text);
    }
}

/// An index row read back from the store.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub uid: i64,
    pub tstamp: i64,
    pub crdate: i64,
    pub record: IndexRecord,
}

/// A page row of the host platform, plus the tags assigned during indexing.
#[derive(Debug, Clone, Default)]
pub struct PageRecord {
    pub uid: i64,
    pub pid: i64,
    pub title: String,
    pub abstract_text: String,
    pub bodytext: String,
    pub sys_language_uid: i64,
    pub starttime: i64,
    pub endtime: i64,
    pub fe_group: String,
    /// Comma separated filter option uids selected on the page itself.
    pub facet_options: String,
    pub t3ver_state: i64,
    pub t3ver_wsid: i64,
    pub tstamp: i64,
    /// Tags collected by `assign_tags`.
    pub tags: String,
}

/// Workspace versioning markers of a host record.
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionMarkers {
    pub state: Option<i64>,
    pub workspace: Option<i64>,
}

impl PageRecord {
    pub fn version_markers(&self) -> VersionMarkers {
        VersionMarkers {
            state: Some(self.t3ver_state),
            workspace: Some(self.t3ver_wsid),
        }
    }
}

/// A facet option. Its `tag` is what ends up in index records.
#[derive(Debug, Clone, Default)]
pub struct FilterOption {
    pub uid: i64,
    pub title: String,
    pub tag: String,
    pub sys_language_uid: i64,
    /// Comma separated page uids whose subtrees get this tag automatically.
    pub automated_tagging: String,
    /// Comma separated parent page uids excluded from automated tagging.
    pub automated_tagging_exclude: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_records_are_detected_by_type_prefix() {
        assert!(IndexRecord::new(1, "a.pdf", "file:pdf", "1", "").is_file());
        assert!(IndexRecord::new(1, "a", "file", "1", "").is_file());
        assert!(!IndexRecord::new(1, "Home", "page", "1", "").is_file());
    }

    #[test]
    fn hidden_content_is_appended_with_spaces() {
        let mut record = IndexRecord::default();
        record.add_hidden_content("News");
        record.add_hidden_content("  ");
        record.add_hidden_content("Events");
        assert_eq!(record.hidden_content, "News Events");
    }
}
