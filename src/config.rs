use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub languages: Vec<LanguageConfig>,
    #[serde(default)]
    pub storages: Vec<StorageConfig>,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    /// Character wrapped around every tag token, e.g. `#news#`.
    #[serde(default = "default_tag_char")]
    pub tag_char: char,
    /// Base directory that plain job directories are resolved against.
    #[serde(default = "default_public_root")]
    pub public_root: PathBuf,
    #[serde(default = "default_lock_stale_after_hours")]
    pub lock_stale_after_hours: i64,
    #[serde(default = "default_true")]
    pub index_tag_titles_as_hidden_content: bool,
    #[serde(default)]
    pub store_failure_policy: StoreFailurePolicy,
    #[serde(default = "default_max_displayed_errors")]
    pub max_displayed_errors: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            tag_char: default_tag_char(),
            public_root: default_public_root(),
            lock_stale_after_hours: default_lock_stale_after_hours(),
            index_tag_titles_as_hidden_content: true,
            store_failure_policy: StoreFailurePolicy::default(),
            max_displayed_errors: default_max_displayed_errors(),
        }
    }
}

fn default_tag_char() -> char {
    '#'
}
fn default_public_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_lock_stale_after_hours() -> i64 {
    12
}
fn default_true() -> bool {
    true
}
fn default_max_displayed_errors() -> usize {
    20
}

/// What happens when an insert or update against the index table fails.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Log and record the error, keep indexing.
    #[default]
    BestEffort,
    /// Abort the job that hit the failure; the run moves on to the next job.
    FailFast,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub recipient: String,
    #[serde(default = "default_sender")]
    pub sender: String,
    #[serde(default = "default_subject")]
    pub subject: String,
    /// sendmail-compatible command reading the message from stdin.
    #[serde(default = "default_mail_command")]
    pub command: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            recipient: String::new(),
            sender: default_sender(),
            subject: default_subject(),
            command: default_mail_command(),
        }
    }
}

fn default_sender() -> String {
    "indexer@localhost".to_string()
}
fn default_subject() -> String {
    "Indexing report".to_string()
}
fn default_mail_command() -> String {
    "sendmail".to_string()
}

/// A site language. Files declaring any of these names are assigned `id`.
#[derive(Debug, Deserialize, Clone)]
pub struct LanguageConfig {
    pub id: i64,
    pub locale: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub website_title: Option<String>,
    #[serde(default)]
    pub hreflang: Option<String>,
    #[serde(default)]
    pub legacy_key: Option<String>,
}

/// A managed file storage rooted at a directory on disk.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub uid: i64,
    #[serde(default)]
    pub name: String,
    pub base_path: PathBuf,
}

/// One configured indexing job.
#[derive(Debug, Deserialize, Clone)]
pub struct JobConfig {
    pub uid: i64,
    pub title: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(default)]
    pub storage_pid: i64,
    #[serde(default)]
    pub target_pid: i64,
    #[serde(default)]
    pub directories: Vec<String>,
    /// Managed storage uid; when set, `directories` are folders inside it.
    #[serde(default)]
    pub storage: Option<i64>,
    #[serde(default)]
    pub file_collections: Vec<i64>,
    /// Lowercase extension allow-list. Empty allows every extension.
    #[serde(default)]
    pub file_extensions: Vec<String>,
    #[serde(default)]
    pub max_file_size: Option<u64>,
    #[serde(default)]
    pub startingpoints_recursive: Vec<i64>,
    #[serde(default)]
    pub single_pages: Vec<i64>,
    /// Filter option uid whose tag is added to every record of this job.
    #[serde(default)]
    pub filter_option: Option<i64>,
    #[serde(default)]
    pub index_use_page_tags_for_files: bool,
    #[serde(default)]
    pub index_files_separately: bool,
}

impl JobConfig {
    pub fn allows_extension(&self, extension: &str) -> bool {
        self.file_extensions.is_empty()
            || self
                .file_extensions
                .iter()
                .any(|e| e.eq_ignore_ascii_case(extension))
    }

    pub fn uses_managed_storage(&self) -> bool {
        self.storage.is_some_and(|uid| uid > 0)
    }
}

/// Indexer type of a job. Unknown strings are custom types handled by
/// registered custom indexers.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(from = "String")]
pub enum JobType {
    File,
    Page,
    Custom(String),
}

impl From<String> for JobType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "file" => JobType::File,
            "page" => JobType::Page,
            _ => JobType::Custom(value),
        }
    }
}

impl JobType {
    pub fn as_str(&self) -> &str {
        match self {
            JobType::File => "file",
            JobType::Page => "page",
            JobType::Custom(name) => name,
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, JobType::Custom(_))
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Config {
    pub fn storage(&self, uid: i64) -> Option<&StorageConfig> {
        self.storages.iter().find(|s| s.uid == uid)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;

    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.indexing.tag_char.is_whitespace() || config.indexing.tag_char == ',' {
        anyhow::bail!("indexing.tag_char must not be whitespace or ','");
    }

    if config.indexing.lock_stale_after_hours < 1 {
        anyhow::bail!("indexing.lock_stale_after_hours must be >= 1");
    }

    if config.indexing.max_displayed_errors < 1 {
        anyhow::bail!("indexing.max_displayed_errors must be >= 1");
    }

    let mut storage_uids = HashSet::new();
    for storage in &config.storages {
        if !storage_uids.insert(storage.uid) {
            anyhow::bail!("Duplicate storage uid: {}", storage.uid);
        }
    }

    let mut job_uids = HashSet::new();
    for job in &config.jobs {
        if !job_uids.insert(job.uid) {
            anyhow::bail!("Duplicate job uid: {}", job.uid);
        }
        if let Some(uid) = job.storage {
            if uid > 0 && config.storage(uid).is_none() {
                anyhow::bail!(
                    "Job '{}' references unknown storage {}",
                    job.title,
                    uid
                );
            }
        }
    }

    if config.notification.enabled && config.notification.command.trim().is_empty() {
        anyhow::bail!("notification.command must be set when notifications are enabled");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let content = format!("[db]\npath = \"/tmp/index.sqlite\"\n{}", extra);
        let config: Config = toml::from_str(&content)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn defaults_apply() {
        let config = parse("").unwrap();
        assert_eq!(config.indexing.tag_char, '#');
        assert_eq!(config.indexing.lock_stale_after_hours, 12);
        assert_eq!(config.indexing.max_displayed_errors, 20);
        assert!(config.indexing.index_tag_titles_as_hidden_content);
        assert_eq!(
            config.indexing.store_failure_policy,
            StoreFailurePolicy::BestEffort
        );
        assert!(config.jobs.is_empty());
    }

    #[test]
    fn job_types_parse() {
        let config = parse(
            r#"
[[jobs]]
uid = 1
title = "Files"
type = "file"
storage_pid = 5

[[jobs]]
uid = 2
title = "News"
type = "news"
storage_pid = 5
"#,
        )
        .unwrap();
        assert_eq!(config.jobs[0].job_type, JobType::File);
        assert_eq!(config.jobs[1].job_type, JobType::Custom("news".into()));
        assert!(!config.jobs[1].job_type.is_builtin());
    }

    #[test]
    fn unknown_storage_is_rejected() {
        let err = parse(
            r#"
[[jobs]]
uid = 1
title = "Files"
type = "file"
storage = 3
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown storage"));
    }

    #[test]
    fn duplicate_job_uid_is_rejected() {
        let err = parse(
            r#"
[[jobs]]
uid = 1
title = "A"
type = "file"

[[jobs]]
uid = 1
title = "B"
type = "page"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate job uid"));
    }

    #[test]
    fn extension_allow_list_is_case_insensitive() {
        let config = parse(
            r#"
[[jobs]]
uid = 1
title = "Files"
type = "file"
file_extensions = ["pdf", "txt"]
"#,
        )
        .unwrap();
        assert!(config.jobs[0].allows_extension("PDF"));
        assert!(!config.jobs[0].allows_extension("docx"));
    }
}
