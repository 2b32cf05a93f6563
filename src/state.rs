//! # State Management Module
//!
//! Questo modulo gestisce i timestamp di ottimizzazione per evitare rielaborazioni.
//!
//! ## Responsabilità:
//! - Legge il dotfile `.picopt_timestamp` della directory più vicina al file
//! - Usa il modification time del dotfile come "ultima ottimizzazione"
//! - Scrive il dotfile per le directory ottimizzate a fine run
//! - `--optimize-after` ha sempre la precedenza sui dotfile
//!
//! ## Strategia di persistence:
//! - Un dotfile vuoto per directory, il contenuto non conta
//! - Solo il mtime viene letto e scritto (via `filetime`)
//! - Cache in memoria per non rileggere lo stesso dotfile a ogni file

use crate::config::Config;
use filetime::FileTime;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tracing::debug;

/// Name of the per-directory timestamp dotfile
pub const TIMESTAMP_FILENAME: &str = ".picopt_timestamp";

/// Answers "was this file modified after the last optimization?"
#[derive(Debug, Default)]
pub struct TimestampStore {
    /// Explicit cutoff, supersedes every dotfile
    optimize_after: Option<FileTime>,
    /// Directory -> dotfile mtime, if any
    cache: Mutex<HashMap<PathBuf, Option<FileTime>>>,
}

impl TimestampStore {
    pub fn new(config: &Config) -> Self {
        Self {
            optimize_after: config
                .optimize_after
                .map(|secs| FileTime::from_unix_time(secs, 0)),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_timestamp_file(path: &Path) -> bool {
        path.file_name()
            .map(|name| name == TIMESTAMP_FILENAME)
            .unwrap_or(false)
    }

    /// Cutoff for `path`: the explicit `--optimize-after`, or the dotfile of
    /// the nearest directory between the file and `root` (both included).
    pub fn cutoff(&self, path: &Path, root: &Path) -> Option<FileTime> {
        if self.optimize_after.is_some() {
            return self.optimize_after;
        }

        let mut dir = if path.is_dir() { Some(path) } else { path.parent() };
        while let Some(current) = dir {
            if let Some(mtime) = self.read_timestamp(current) {
                return Some(mtime);
            }
            if current == root || !current.starts_with(root) {
                break;
            }
            dir = current.parent();
        }
        None
    }

    /// True when the file should be skipped by the walk
    pub fn is_unchanged(&self, path: &Path, root: &Path, metadata: &std::fs::Metadata) -> bool {
        match self.cutoff(path, root) {
            Some(cutoff) => FileTime::from_last_modification_time(metadata) <= cutoff,
            None => false,
        }
    }

    fn read_timestamp(&self, dir: &Path) -> Option<FileTime> {
        let mut cache = match self.cache.lock() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cache.entry(dir.to_path_buf()).or_insert_with(|| {
            std::fs::metadata(dir.join(TIMESTAMP_FILENAME))
                .ok()
                .map(|m| FileTime::from_last_modification_time(&m))
        })
    }

    /// Mark `dir` as optimized now
    pub async fn record(dir: &Path) -> std::io::Result<PathBuf> {
        let record_path = dir.join(TIMESTAMP_FILENAME);
        fs::write(&record_path, b"").await?;
        let target = record_path.clone();
        tokio::task::spawn_blocking(move || filetime::set_file_mtime(&target, FileTime::now()))
            .await
            .map_err(std::io::Error::other)??;
        debug!("Recorded timestamp {}", record_path.display());
        Ok(record_path)
    }
}
