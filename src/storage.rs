//! Managed file storages.
//!
//! A storage is a directory on disk addressed by identifiers relative to its
//! root (`/docs/report.pdf`). Every file listed through a storage gets a
//! metadata row in the host `files` table, created on first sight.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::StorageConfig;
use crate::host::{FileRow, HostStore};

/// Folder name never descended into.
pub const TEMP_FOLDER: &str = "_temp_";

#[derive(Debug, Clone)]
pub struct ManagedStorage {
    pub uid: i64,
    pub name: String,
    pub base_path: PathBuf,
}

/// A file inside a managed storage together with its metadata row.
#[derive(Debug, Clone)]
pub struct ManagedFile {
    pub path: PathBuf,
    pub meta: FileRow,
}

impl ManagedFile {
    pub fn uid(&self) -> i64 {
        self.meta.uid
    }
}

impl From<&StorageConfig> for ManagedStorage {
    fn from(config: &StorageConfig) -> Self {
        Self {
            uid: config.uid,
            name: config.name.clone(),
            base_path: config.base_path.clone(),
        }
    }
}

impl ManagedStorage {
    /// Absolute path of an identifier such as `/docs/` or `docs/a.pdf`.
    pub fn resolve(&self, identifier: &str) -> PathBuf {
        let relative = identifier.trim_start_matches('/');
        if relative.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(relative)
        }
    }

    pub fn has_folder(&self, identifier: &str) -> bool {
        self.resolve(identifier).is_dir()
    }

    /// Name of the last path segment of a folder identifier.
    pub fn folder_name(identifier: &str) -> &str {
        identifier
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }

    /// Files directly inside a folder, by name.
    pub async fn files(&self, host: &HostStore, identifier: &str) -> Result<Vec<ManagedFile>> {
        let mut files = Vec::new();
        for entry in self.entries(identifier)? {
            if !entry.file_type().is_file() {
                continue;
            }
            let file_identifier = self.identifier_of(entry.path());
            let meta = host
                .ensure_file(self.uid, &file_identifier)
                .await
                .with_context(|| format!("Failed to register file {}", file_identifier))?;
            files.push(ManagedFile {
                path: entry.path().to_path_buf(),
                meta,
            });
        }
        Ok(files)
    }

    /// Identifiers of the folders directly inside a folder, by name.
    pub fn subfolders(&self, identifier: &str) -> Result<Vec<String>> {
        Ok(self
            .entries(identifier)?
            .into_iter()
            .filter(|e| e.file_type().is_dir())
            .map(|e| format!("{}/", self.identifier_of(e.path())))
            .collect())
    }

    /// Look up a file by its metadata row, e.g. from a file reference.
    pub fn file_for(&self, meta: FileRow) -> ManagedFile {
        ManagedFile {
            path: self.resolve(&meta.identifier),
            meta,
        }
    }

    fn entries(&self, identifier: &str) -> Result<Vec<walkdir::DirEntry>> {
        let root = self.resolve(identifier);
        WalkDir::new(&root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to list {}", root.display()))
    }

    fn identifier_of(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.base_path).unwrap_or(path);
        let mut identifier = String::from("/");
        identifier.push_str(&relative.to_string_lossy().replace('\\', "/"));
        identifier
    }
}
