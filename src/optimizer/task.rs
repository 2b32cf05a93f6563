//! # Task Types
//!
//! Unità di lavoro dello scheduler e il loro risultato.
//!
//! ## Responsabilità:
//! - `Task`: un file classificato, immutabile, consumato una sola volta
//! - `OptimizationOutcome`: risultato di un task, emesso una sola volta
//! - `TaskHandle`: handle per attendere un task sottomesso

use crate::classifier::{Classification, FileFormat};
use crate::config::Config;
use crate::error::OptimizeError;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// One classified file waiting to be optimized
#[derive(Debug, Clone)]
pub struct Task {
    pub path: PathBuf,
    pub format: FileFormat,
    pub sequenced: bool,
    pub config: Arc<Config>,
    /// Name used in reports
    pub display: String,
}

impl Task {
    pub fn new(
        path: PathBuf,
        classification: Classification,
        config: Arc<Config>,
        display: String,
    ) -> Self {
        Self {
            path,
            format: classification.format,
            sequenced: classification.sequenced,
            config,
            display,
        }
    }

    /// Archive this file was extracted from
    pub fn archive_name(&self) -> Option<&str> {
        self.config.archive_name.as_deref()
    }

    pub fn is_archive(&self) -> bool {
        self.format.is_archive()
    }
}

/// Result of one task
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationOutcome {
    pub path: PathBuf,
    #[serde(skip)]
    pub display: String,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub report_lines: Vec<String>,
    pub replaced: bool,
    pub error: Option<String>,
    /// Counted inside its archive's own delta
    #[serde(skip)]
    pub in_archive: bool,
}

impl OptimizationOutcome {
    /// Nothing happened to the file
    pub fn unchanged(task: &Task, size: u64) -> Self {
        Self {
            path: task.path.clone(),
            display: task.display.clone(),
            bytes_in: size,
            bytes_out: size,
            report_lines: Vec::new(),
            replaced: false,
            error: None,
            in_archive: task.archive_name().is_some(),
        }
    }

    /// Zero-savings outcome carrying the error
    pub fn failed(task: &Task, error: &OptimizeError) -> Self {
        Self::failed_path(task.path.clone(), task.display.clone(), error.to_string())
            .inside_archive(task.archive_name().is_some())
    }

    pub fn failed_path(path: PathBuf, display: String, error: String) -> Self {
        Self {
            path,
            display,
            bytes_in: 0,
            bytes_out: 0,
            report_lines: Vec::new(),
            replaced: false,
            error: Some(error),
            in_archive: false,
        }
    }

    fn inside_archive(mut self, in_archive: bool) -> Self {
        self.in_archive = in_archive;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn bytes_saved(&self) -> i64 {
        self.bytes_in as i64 - self.bytes_out as i64
    }
}

/// Handle to a submitted task
#[derive(Debug)]
pub struct TaskHandle {
    pub path: PathBuf,
    pub(crate) join: JoinHandle<OptimizationOutcome>,
}

impl TaskHandle {
    /// Wait for the outcome. A panicked task becomes a failed outcome.
    pub async fn wait(self) -> OptimizationOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => OptimizationOutcome::failed_path(
                self.path.clone(),
                self.path.display().to_string(),
                format!("task aborted: {}", e),
            ),
        }
    }
}
