//! File existence and size collaborator

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::config::Config;
use crate::error::Result;

const HIDDEN: &str = ".hidden";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
}

/// Backing storage for `file` resources. Paths are resource paths
/// (`/dir/name`), not host paths.
pub trait Files: Send + Sync {
    /// `None` when nothing exists at `path`.
    fn stat(&self, path: &str) -> Result<Option<FileStat>>;
    /// Every regular file under `dir`, recursively, skipping `.hidden` trees.
    fn list_files(&self, dir: &str) -> Result<Vec<String>>;
    /// Whether `path` lies under a publicly readable directory.
    fn is_public(&self, path: &str) -> bool;
}

/// Files rooted at a local directory.
pub struct LocalFiles {
    root: PathBuf,
    public_dirs: Vec<String>,
}

impl LocalFiles {
    pub fn new(root: impl Into<PathBuf>, public_dirs: Vec<String>) -> Self {
        LocalFiles { root: root.into(), public_dirs }
    }

    /// Files under `root` with the public directories from `config`.
    pub fn from_config(root: impl Into<PathBuf>, config: &Config) -> Self {
        Self::new(root, config.public_dirs.clone())
    }

    /// Host path under the root, `None` for paths that would leave it.
    fn host_path(&self, path: &str) -> Option<PathBuf> {
        let rel = Path::new(path.trim_start_matches('/'));
        if rel.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) {
            Some(self.root.join(rel))
        } else {
            None
        }
    }

    fn resource_path(&self, host: &Path) -> Option<String> {
        let rel = host.strip_prefix(&self.root).ok()?;
        Some(format!("/{}", rel.to_string_lossy().replace('\\', "/")))
    }
}

impl Files for LocalFiles {
    fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        let Some(host) = self.host_path(path) else { return Ok(None) };
        match std::fs::metadata(host) {
            Ok(m) => Ok(Some(FileStat { size: m.len(), is_dir: m.is_dir() })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        let Some(host) = self.host_path(dir) else { return Ok(out) };
        let walker = WalkDir::new(host)
            .into_iter()
            .filter_entry(|e| e.file_name() != HIDDEN);
        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() {
                if let Some(p) = self.resource_path(entry.path()) {
                    out.push(p);
                }
            }
        }
        Ok(out)
    }

    fn is_public(&self, path: &str) -> bool {
        is_under(path, &self.public_dirs)
    }
}

/// True if `path` equals or is nested under one of `dirs`.
pub fn is_under(path: &str, dirs: &[String]) -> bool {
    dirs.iter().any(|d| {
        let d = d.trim_end_matches('/');
        !d.is_empty() && (path == d || path.strip_prefix(d).map_or(false, |rest| rest.starts_with('/')))
    })
}

/// True for paths inside a `.hidden` directory.
pub fn is_hidden(path: &str) -> bool {
    path.contains("/.hidden/")
}
