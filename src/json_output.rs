//! # JSON Output Module
//!
//! Questo modulo gestisce l'output strutturato in JSON per l'integrazione con altri programmi.
//!
//! ## Responsabilità:
//! - Emette un messaggio JSON per riga su stdout (`--json`)
//! - Riutilizza `OptimizationOutcome` e `TotalsSnapshot` senza duplicarne i campi
//! - Fornisce interfaccia standardizzata per comunicazione inter-processo
//!
//! ## Tipi di messaggi:
//! - `start`: Inizio del run con i path richiesti
//! - `file_complete`: Fine elaborazione di un file o archivio
//! - `complete`: Fine del run con i totali
//! - `error`: File non classificabile o errore generale

use crate::classifier::FileFormat;
use crate::optimizer::OptimizationOutcome;
use crate::progress::TotalsSnapshot;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tipo di messaggio JSON
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JsonMessage {
    /// Inizio del processo di ottimizzazione
    #[serde(rename = "start")]
    Start {
        paths: Vec<PathBuf>,
        config: JsonConfig,
    },

    /// Fine elaborazione di un file specifico
    #[serde(rename = "file_complete")]
    FileComplete {
        path: PathBuf,
        bytes_in: u64,
        bytes_out: u64,
        reduction_percent: f64,
        replaced: bool,
        tools: Vec<String>,
        error: Option<String>,
    },

    /// Processo completato
    #[serde(rename = "complete")]
    Complete {
        files_processed: usize,
        files_replaced: usize,
        errors: usize,
        bytes_in: u64,
        bytes_out: u64,
        total_bytes_saved: i64,
        average_reduction: f64,
        duration_seconds: f64,
    },

    /// Errore
    #[serde(rename = "error")]
    Error {
        message: String,
        details: Option<String>,
    },
}

/// Configurazione per output JSON
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonConfig {
    pub jobs: usize,
    pub formats: Vec<FileFormat>,
    pub recurse: bool,
    pub comics: bool,
    pub dry_run: bool,
    pub bigger: bool,
}

impl JsonMessage {
    /// Emette il messaggio JSON su stdout
    pub fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{}", json);
        }
    }

    pub fn start(paths: Vec<PathBuf>, config: JsonConfig) -> Self {
        Self::Start { paths, config }
    }

    /// Crea un messaggio di completamento file
    pub fn file_complete(outcome: &OptimizationOutcome) -> Self {
        let reduction_percent = if outcome.bytes_in > 0 {
            outcome.bytes_saved() as f64 / outcome.bytes_in as f64 * 100.0
        } else {
            0.0
        };
        Self::FileComplete {
            path: outcome.path.clone(),
            bytes_in: outcome.bytes_in,
            bytes_out: outcome.bytes_out,
            reduction_percent,
            replaced: outcome.replaced,
            tools: outcome.report_lines.clone(),
            error: outcome.error.clone(),
        }
    }

    /// Crea un messaggio di completamento generale
    pub fn complete(totals: &TotalsSnapshot, duration_seconds: f64) -> Self {
        Self::Complete {
            files_processed: totals.files,
            files_replaced: totals.replaced,
            errors: totals.failures,
            bytes_in: totals.bytes_in,
            bytes_out: totals.bytes_out,
            total_bytes_saved: totals.bytes_saved(),
            average_reduction: totals.percent_saved(),
            duration_seconds,
        }
    }

    /// Crea un messaggio di errore
    pub fn error(message: String, details: Option<String>) -> Self {
        Self::Error { message, details }
    }
}

impl From<&crate::Config> for JsonConfig {
    fn from(config: &crate::Config) -> Self {
        Self {
            jobs: config.jobs,
            formats: config.selected_formats(),
            recurse: config.recurse,
            comics: config.comics,
            dry_run: config.dry_run,
            bigger: config.bigger,
        }
    }
}
