//! # Media Optimizer Main Orchestrator
//!
//! Orchestratore principale che collega walk, scheduler e report finale.
//!
//! ## Flusso:
//! 1. Valida la configurazione e risolve i tool (errore fatale se nessuno)
//! 2. Per ogni path: walk + classificazione in `spawn_blocking`
//! 3. Modalità list: stampa `path : FORMATO` senza ottimizzare
//! 4. Altrimenti sottomette i task allo `Scheduler` e aspetta il drain
//! 5. Scrive i timestamp delle directory e stampa il totale

use crate::classifier::Classification;
use crate::config::Config;
use crate::error::Result;
use crate::file_manager::{discover, Discovery};
use crate::json_output::{JsonConfig, JsonMessage};
use crate::optimizer::Scheduler;
use crate::progress::{Reporter, Totals, TotalsSnapshot};
use crate::state::TimestampStore;
use crate::tool_resolver::ToolPathResolver;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Orchestratore principale
pub struct MediaOptimizer {
    config: Arc<Config>,
    resolver: Arc<ToolPathResolver>,
}

impl MediaOptimizer {
    /// Crea nuova istanza dell'ottimizzatore
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let resolver = ToolPathResolver::probe(&config);
        debug!("{}", resolver.get_tools_report());
        resolver.verify_tools()?;

        Ok(Self {
            config: Arc::new(config),
            resolver: Arc::new(resolver),
        })
    }

    /// Esegue il processo di ottimizzazione
    pub async fn run(&self, paths: &[PathBuf]) -> Result<TotalsSnapshot> {
        let mut paths = paths.to_vec();
        paths.sort();
        paths.dedup();

        if self.config.json_output {
            JsonMessage::start(paths.clone(), JsonConfig::from(&*self.config)).emit();
        }
        self.log_configuration();

        let totals = Arc::new(Totals::new());
        let scheduler = Scheduler::new(
            self.config.jobs,
            Arc::clone(&self.resolver),
            Arc::clone(&totals),
            Reporter::new(&self.config),
        );
        let timestamps = Arc::new(TimestampStore::new(&self.config));
        let mut record_dirs = Vec::new();

        for path in paths {
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                warn!("{} was not found.", path.display());
                continue;
            }
            if self.config.recurse && path.is_dir() {
                record_dirs.push(path.clone());
            }

            let config = Arc::clone(&self.config);
            let store = Arc::clone(&timestamps);
            let root = path.clone();
            let discovered =
                tokio::task::spawn_blocking(move || discover(&root, &config, &store)).await?;
            debug!("{}: {} entries", path.display(), discovered.len());

            for discovery in discovered {
                match discovery {
                    Discovery::Task(task) if self.config.list_only => {
                        let classification = Classification {
                            format: task.format,
                            sequenced: task.sequenced,
                        };
                        println!("{} : {}", task.path.display(), classification);
                    }
                    Discovery::Task(task) => {
                        scheduler.submit(task);
                    }
                    Discovery::Rejected { path, error } => scheduler.record_rejected(&path, &error),
                }
            }
        }

        scheduler.drain().await;
        let snapshot = totals.snapshot();

        if self.config.list_only {
            return Ok(snapshot);
        }

        if self.config.record_timestamp && !self.config.dry_run {
            for dir in &record_dirs {
                if let Err(e) = TimestampStore::record(dir).await {
                    warn!("Could not record timestamp in {}: {}", dir.display(), e);
                }
            }
        }

        scheduler.reporter().finish(&snapshot);
        Ok(snapshot)
    }

    /// Logga configurazione
    fn log_configuration(&self) {
        let formats: Vec<String> = self
            .config
            .selected_formats()
            .iter()
            .map(|f| f.to_string())
            .collect();
        info!("Optimizing formats: {}", formats.join(", "));
        info!("Workers: {}", self.config.jobs);
        if self.config.dry_run {
            info!("Dry run mode: No files will be modified");
        }
        if let Some(after) = self.config.optimize_after {
            info!("Only files modified after {}", after);
        }
    }
}
