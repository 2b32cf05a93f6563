//! # Picopt Library
//!
//! Questo è il modulo principale della libreria che espone tutte le API pubbliche.
//!
//! ## Responsabilità:
//! - Definisce la struttura modulare dell'applicazione
//! - Espone i tipi e le funzioni principali tramite re-exports
//! - Fornisce un'interfaccia pulita per il main.rs e per altri consumatori
//!
//! ## Architettura dei moduli:
//! - `config`: Gestione configurazione, toggle dei tool e parsing CLI
//! - `error`: Tipi di errore custom per diverse operazioni
//! - `classifier`: Riconoscimento formato e immagini animate
//! - `tools`: Registro degli optimizer esterni e dei loro argomenti
//! - `tool_resolver` / `tool_runner`: Ricerca ed esecuzione dei binari
//! - `file_manager`: Walk, discovery e sostituzione sicura dei file
//! - `image_processor`: Catene lossless (best-of-N) e lossy (first-success)
//! - `comic_processor`: Estrazione, ottimizzazione e re-packaging CBZ/CBR
//! - `optimizer`: Orchestratore, scheduler e task
//! - `progress`: Totali, report per file e progress bar
//! - `state`: Timestamp dell'ultima esecuzione per directory
//! - `json_output`: Output JSON lines per integrazioni
//!
//! ## Utilizzo:
//! ```text
//! let config = Config { recurse: true, ..Config::default() };
//! let optimizer = MediaOptimizer::new(config)?;
//! let totals = optimizer.run(&[PathBuf::from("photos")]).await?;
//! ```

pub mod classifier;
pub mod comic_processor;
pub mod config;
pub mod error;
pub mod file_manager;
pub mod image_processor;
pub mod json_output;
pub mod optimizer;
pub mod progress;
pub mod state;
pub mod tool_resolver;
pub mod tool_runner;
pub mod tools;
pub mod utils;

pub use classifier::{classify, Classification, FileFormat};
pub use config::{Config, ToolToggles};
pub use error::OptimizeError;
pub use optimizer::{MediaOptimizer, OptimizationOutcome};
pub use progress::TotalsSnapshot;
