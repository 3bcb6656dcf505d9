//! Read-only directory listing rooted at a fixed base path.
//!
//! Grounded in `routes::files::validate_path`'s absolute-path and
//! no-traversal checks, narrowed to the single containment rule this
//! surface actually needs: resolve the caller's relative path against a
//! fixed root and require the result to stay under it. Unlike the reference
//! file routes (read/write/delete, base64 binary handling, atomic
//! temp-then-rename), this is listing-only.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;

/// One entry in a [`list`] result.
#[derive(Debug, Clone, Serialize)]
pub struct FsEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub size: u64,
    pub modified: String,
}

/// Why a listing request was rejected outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsBrowserError {
    /// The resolved path would escape `browse_root`.
    Containment,
    /// The resolved path doesn't exist or isn't a directory.
    NotADirectory,
    /// The directory couldn't be read (permissions, I/O error).
    ReadFailed(String),
}

impl std::fmt::Display for FsBrowserError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Containment => write!(f, "path escapes the browse root"),
            Self::NotADirectory => write!(f, "path is not a directory"),
            Self::ReadFailed(e) => write!(f, "failed to read directory: {e}"),
        }
    }
}

/// Read-only directory browser rooted at a fixed base path.
#[derive(Clone)]
pub struct FileBrowser {
    root: PathBuf,
}

impl FileBrowser {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve `relative` against the browse root and list its contents.
    ///
    /// `relative` may be empty (lists the root itself). A per-entry stat
    /// failure downgrades that entry to `type: "unknown"` rather than
    /// failing the whole listing.
    pub fn list(&self, relative: &str) -> Result<Vec<FsEntry>, FsBrowserError> {
        let resolved = self.resolve(relative)?;

        if !resolved.is_dir() {
            return Err(FsBrowserError::NotADirectory);
        }

        let read_dir = std::fs::read_dir(&resolved).map_err(|e| FsBrowserError::ReadFailed(e.to_string()))?;

        let mut entries = Vec::new();
        for item in read_dir {
            let item = match item {
                Ok(item) => item,
                Err(_) => continue,
            };
            let name = item.file_name().to_string_lossy().into_owned();
            entries.push(describe_entry(&item.path(), name));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Resolve `relative` against the root, rejecting any path that would
    /// escape it. Rejects `..` components structurally rather than relying
    /// on filesystem canonicalization, so the check also applies to paths
    /// that don't exist yet.
    fn resolve(&self, relative: &str) -> Result<PathBuf, FsBrowserError> {
        let candidate = Path::new(relative);
        if candidate.is_absolute() {
            return Err(FsBrowserError::Containment);
        }

        let mut resolved = self.root.clone();
        for component in candidate.components() {
            match component {
                std::path::Component::Normal(part) => resolved.push(part),
                std::path::Component::CurDir => {}
                std::path::Component::ParentDir => return Err(FsBrowserError::Containment),
                _ => return Err(FsBrowserError::Containment),
            }
        }

        if !resolved.starts_with(&self.root) {
            return Err(FsBrowserError::Containment);
        }
        Ok(resolved)
    }
}

fn describe_entry(path: &Path, name: String) -> FsEntry {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let entry_type = if meta.is_dir() {
                "directory"
            } else if meta.is_file() {
                "file"
            } else {
                "unknown"
            };
            FsEntry {
                name,
                entry_type: entry_type.to_string(),
                size: if meta.is_file() { meta.len() } else { 0 },
                modified: meta
                    .modified()
                    .ok()
                    .map(format_iso)
                    .unwrap_or_else(|| "unknown".to_string()),
            }
        }
        Err(_) => FsEntry {
            name,
            entry_type: "unknown".to_string(),
            size: 0,
            modified: "unknown".to_string(),
        },
    }
}

fn format_iso(time: SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time).to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root() -> (tempfile::TempDir, FileBrowser) {
        let dir = tempfile::tempdir().unwrap();
        let browser = FileBrowser::new(dir.path());
        (dir, browser)
    }

    #[test]
    fn rejects_absolute_paths() {
        let (_dir, browser) = temp_root();
        assert_eq!(browser.list("/etc"), Err(FsBrowserError::Containment));
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        let (_dir, browser) = temp_root();
        assert_eq!(browser.list("../etc"), Err(FsBrowserError::Containment));
    }

    #[test]
    fn lists_root_contents() {
        let (dir, browser) = temp_root();
        std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let entries = browser.list("").unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"a.txt"));
        assert!(names.contains(&"sub"));

        let file_entry = entries.iter().find(|e| e.name == "a.txt").unwrap();
        assert_eq!(file_entry.entry_type, "file");
        assert_eq!(file_entry.size, 2);

        let dir_entry = entries.iter().find(|e| e.name == "sub").unwrap();
        assert_eq!(dir_entry.entry_type, "directory");
    }

    #[test]
    fn nonexistent_path_is_not_a_directory() {
        let (_dir, browser) = temp_root();
        assert_eq!(browser.list("missing"), Err(FsBrowserError::NotADirectory));
    }

    #[test]
    fn modified_timestamp_is_rfc3339() {
        let (dir, browser) = temp_root();
        std::fs::write(dir.path().join("a.txt"), b"hi").unwrap();
        let entries = browser.list("").unwrap();
        let entry = entries.iter().find(|e| e.name == "a.txt").unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&entry.modified).is_ok());
    }
}
