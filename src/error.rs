//! # Error Types Module
//!
//! Questo modulo definisce tutti i tipi di errore custom dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce `OptimizeError` enum per categorizzare tutti gli errori possibili
//! - Distingue gli errori per-file (non fatali) da quelli di configurazione (fatali)
//! - Integra con `thiserror` per automatic error conversion
//!
//! ## Categorie di errori:
//! - `Classification`: File illeggibile o non riconosciuto (skippato)
//! - `ToolUnavailable`: Tool esterno mancante o disabilitato (escluso)
//! - `ToolExecution`: Tool terminato con errore o segnale (candidato scartato)
//! - `Replacement`: Errore durante lo swap atomico dei file
//! - `Archive`: Errore di estrazione o re-packaging di un fumetto
//! - `Configuration`: Nessun optimizer disponibile, timestamp invalido (fatale)
//!
//! ## Esempio:
//! ```rust
//! use picopt::OptimizeError;
//!
//! let err = OptimizeError::ToolUnavailable("optipng".to_string());
//! assert!(!err.is_fatal());
//! ```

use std::path::PathBuf;

/// Custom error types for image and comic optimization
#[derive(thiserror::Error, Debug)]
pub enum OptimizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{path} doesn't look like an image: {reason}")]
    Classification { path: PathBuf, reason: String },

    #[error("Tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("{tool} failed on {path}: {reason}")]
    ToolExecution {
        tool: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Could not replace {path}: {reason}")]
    Replacement { path: PathBuf, reason: String },

    #[error("Archive error for {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Worker pool closed: {0}")]
    PoolClosed(#[from] tokio::sync::AcquireError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl OptimizeError {
    /// True for errors that must stop the run before any work starts
    pub fn is_fatal(&self) -> bool {
        matches!(self, OptimizeError::Configuration(_))
    }

    pub(crate) fn archive(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        OptimizeError::Archive {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn replacement(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        OptimizeError::Replacement {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = OptimizeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configuration_is_fatal() {
        assert!(OptimizeError::Configuration("no optimizers".into()).is_fatal());
        assert!(!OptimizeError::ToolUnavailable("pngout".into()).is_fatal());
        assert!(!OptimizeError::archive("/tmp/a.cbz", "corrupt").is_fatal());
    }

    #[test]
    fn test_messages_name_the_path() {
        let err = OptimizeError::replacement("/tmp/x.png", "permission denied");
        assert_eq!(err.to_string(), "Could not replace /tmp/x.png: permission denied");
    }
}
