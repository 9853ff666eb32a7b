//! Line-oriented list files (upload credentials, served domains) that are
//! reloaded whenever they change on disk.
//!
//! One entry per line; anything after `#` is a comment; blank lines are
//! ignored.

use anyhow::{Context, Result};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};

pub fn parse_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug)]
pub struct ListFile {
    label: &'static str,
    path: Option<PathBuf>,
    entries: RwLock<Vec<String>>,
}

impl ListFile {
    /// Load `path`. A missing or unreadable file yields an empty list and a
    /// warning; the watcher picks the file up once it appears.
    pub fn load(label: &'static str, path: impl Into<PathBuf>) -> Arc<Self> {
        let list = Arc::new(Self {
            label,
            path: Some(path.into()),
            entries: RwLock::new(Vec::new()),
        });
        list.reload();
        list
    }

    /// Fixed in-memory list, never reloaded.
    pub fn from_entries(label: &'static str, entries: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            label,
            path: None,
            entries: RwLock::new(entries),
        })
    }

    pub fn reload(&self) {
        let Some(path) = &self.path else { return };
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let entries = parse_list(&text);
                info!(list = self.label, count = entries.len(), "reloaded list file");
                *self.entries.write() = entries;
            }
            Err(err) => warn!(list = self.label, path = %path.display(), error = %err, "could not read list file"),
        }
    }

    pub fn contains(&self, entry: &str) -> bool {
        !entry.is_empty() && self.entries.read().iter().any(|e| e == entry)
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.read().clone()
    }

    /// Watch the file's directory and reload on create/modify of the file.
    ///
    /// The returned watcher must be kept alive for reloads to continue.
    pub fn watch(self: &Arc<Self>) -> Result<Option<RecommendedWatcher>> {
        let Some(path) = self.path.clone() else {
            return Ok(None);
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file_name = path.file_name().map(|n| n.to_os_string());

        let list = Arc::clone(self);
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                        && event
                            .paths
                            .iter()
                            .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name)
                    {
                        list.reload();
                    }
                }
                Err(err) => warn!(list = list.label, error = %err, "list watcher error"),
            },
            Config::default(),
        )
        .context("creating list file watcher")?;

        watcher
            .watch(Path::new(&dir), RecursiveMode::NonRecursive)
            .with_context(|| format!("watching {}", dir.display()))?;

        info!(list = self.label, path = %path.display(), "watching list file");
        Ok(Some(watcher))
    }
}
