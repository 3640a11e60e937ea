//! Per-file stat snapshot.
//!
//! A [`FileInfo`] is rebuilt for every file visited and never persisted.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathBuf,
    /// Absolute directory, always ending in `/`.
    pub directory: String,
    /// File name including extension, e.g. `Report 2024.PDF`.
    pub name: String,
    /// File name without extension.
    pub body: String,
    /// Lowercased extension, e.g. `pdf`.
    pub extension: String,
    /// Extension as written on disk, e.g. `PDF`.
    pub real_extension: String,
    pub mtime: i64,
    pub atime: i64,
    pub size: u64,
    pub permissions: u32,
    pub is_file: bool,
    pub is_dir: bool,
    pub is_link: bool,
    pub is_readable: bool,
}

impl FileInfo {
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = match path.file_name() {
            Some(n) => n.to_string_lossy().to_string(),
            None => bail!("{} has no file name", path.display()),
        };
        let metadata = std::fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        let is_link = std::fs::symlink_metadata(path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);

        let (body, real_extension) = split_name(&name);
        let directory = path
            .parent()
            .map(|p| {
                let mut dir = p.to_string_lossy().to_string();
                if !dir.ends_with('/') {
                    dir.push('/');
                }
                dir
            })
            .unwrap_or_else(|| "./".to_string());

        Ok(Self {
            path: path.to_path_buf(),
            directory,
            body,
            extension: real_extension.to_lowercase(),
            real_extension,
            name,
            mtime: unix_secs(metadata.modified().ok()),
            atime: unix_secs(metadata.accessed().ok()),
            size: metadata.len(),
            permissions: permissions(&metadata),
            is_file: metadata.is_file(),
            is_dir: metadata.is_dir(),
            is_link,
            is_readable: metadata.is_file() && std::fs::File::open(path).is_ok(),
        })
    }
}

fn split_name(name: &str) -> (String, String) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (name[..pos].to_string(), name[pos + 1..].to_string()),
        _ => (name.to_string(), String::new()),
    }
}

fn unix_secs(time: Option<SystemTime>) -> i64 {
    time.unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(unix)]
fn permissions(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn permissions(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn snapshot_of_regular_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("Report.PDF");
        std::fs::write(&path, b"12345").unwrap();

        let info = FileInfo::from_path(&path).unwrap();
        assert_eq!(info.name, "Report.PDF");
        assert_eq!(info.body, "Report");
        assert_eq!(info.extension, "pdf");
        assert_eq!(info.real_extension, "PDF");
        assert_eq!(info.size, 5);
        assert!(info.is_file);
        assert!(!info.is_dir);
        assert!(info.is_readable);
        assert!(info.mtime > 0);
        assert!(info.directory.ends_with('/'));
        assert_eq!(format!("{}{}", info.directory, info.name), path.to_string_lossy());
    }

    #[test]
    fn names_without_extension() {
        assert_eq!(split_name("README"), ("README".into(), String::new()));
        assert_eq!(split_name(".env"), (".env".into(), String::new()));
        assert_eq!(split_name("a.tar.gz"), ("a.tar".into(), "gz".into()));
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(FileInfo::from_path(&tmp.path().join("nope.txt")).is_err());
    }
}
