//! # Image Processing Module
//!
//! Questo modulo gestisce l'ottimizzazione di tutti i formati immagine supportati
//! utilizzando esclusivamente tool esterni.
//!
//! ## Architettura
//!
//! Nessun algoritmo di compressione è implementato qui: il modulo orchestra i
//! tool esterni del registry (`tools.rs`) e decide quale risultato tenere.
//!
//! | Famiglia  | Formati              | Strategia                     |
//! |-----------|----------------------|-------------------------------|
//! | Lossless  | PNG, GIF, TIFF, PNM  | best-of-N: tutti i tool       |
//! | Lossy     | JPEG                 | first-success: primo che va   |
//!
//! ## Pipeline di Ottimizzazione
//!
//! 1. **Candidati**: tool abilitati, disponibili e compatibili col formato
//! 2. **Conversione**: GIF/TIFF/PNM diventano PNG se la conversione è attiva
//! 3. **Lossless**: ogni tool parte dal miglior risultato finora
//! 4. **Lossy**: mozjpeg → jpegrescan → jpegtran_prog → jpegtran, stop al primo successo
//! 5. **Immagini animate**: solo tool frame-aware (gifsicle), altrimenti skip
//! 6. **Decisione**: sostituzione solo se più piccolo (o `--bigger`)
//! 7. **Sostituzione**: rename in tre passi di `FileManager::replace_file`
//!
//! ## Gestione file temporanei
//!
//! Ogni output di tool è un `TempPath` unico accanto all'originale: viene
//! cancellato automaticamente se scartato.

use crate::classifier::{png_bit_depth, FileFormat, FormatFamily};
use crate::config::Config;
use crate::error::Result;
use crate::file_manager::{new_percent_saved, FileManager};
use crate::optimizer::{OptimizationOutcome, Task};
use crate::progress::Totals;
use crate::tool_resolver::ToolPathResolver;
use crate::tool_runner::ToolRunner;
use crate::tools::{enabled_tools, ToolDescriptor, ToolId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use tracing::{debug, info};

/// Best result so far in a chain
struct Candidate {
    path: TempPath,
    size: u64,
    format: FileFormat,
}

/// Image optimization pipeline for a single file.
///
/// Features:
/// - Greedy best-of-N chain for lossless formats
/// - First-success chain for JPEG
/// - Conversion to PNG of the other lossless formats
/// - Missing tools are silently excluded
/// - Never deletes an original before its replacement is in place
#[derive(Clone)]
pub struct ImageProcessor {
    runner: ToolRunner,
    totals: Arc<Totals>,
}

impl ImageProcessor {
    pub fn new(resolver: Arc<ToolPathResolver>, totals: Arc<Totals>) -> Self {
        Self {
            runner: ToolRunner::new(resolver),
            totals,
        }
    }

    /// Optimizes one image task.
    ///
    /// # Returns
    /// * `Ok(OptimizationOutcome)` - Sizes, tool reports and whether the
    ///   file was replaced. A file no tool could improve comes back with
    ///   `bytes_out == bytes_in`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, a temporary file cannot
    /// be created, or the final replacement fails.
    pub async fn optimize(&self, task: &Task) -> Result<OptimizationOutcome> {
        let config = &task.config;
        let bytes_in = FileManager::file_size(&task.path).await?;

        let first_tools: Vec<&'static ToolDescriptor> = self
            .chain(task.format.family(), config)
            .into_iter()
            .filter(|tool| self.compatible(tool, task.format, task.sequenced, config))
            .collect();

        if first_tools.is_empty() {
            if task.sequenced {
                info!("{} is a sequenced image with no frame-aware optimizer", task.display);
                self.totals.nag_about_sequenced();
            } else {
                debug!("No available optimizer for {}", task.display);
            }
            return Ok(OptimizationOutcome::unchanged(task, bytes_in));
        }

        let mut report_lines = Vec::new();
        let best = match task.format.family() {
            FormatFamily::Lossy => self.lossy(task, bytes_in, &mut report_lines).await?,
            _ => self.lossless(task, bytes_in, &mut report_lines).await?,
        };

        let mut outcome = OptimizationOutcome::unchanged(task, bytes_in);
        outcome.report_lines = report_lines;

        // every tool failed
        let Some(best) = best else {
            return Ok(outcome);
        };

        if !FileManager::should_replace(bytes_in, best.size, config.bigger) {
            debug!(
                "{}: best result {} is not smaller than {}",
                task.display, best.size, bytes_in
            );
            return Ok(outcome);
        }

        outcome.bytes_out = best.size;
        if config.dry_run {
            return Ok(outcome);
        }

        let final_path: PathBuf = FileManager::final_path(&task.path, task.format, best.format);
        FileManager::replace_file(&task.path, best.path, &final_path).await?;
        outcome.path = final_path;
        outcome.replaced = true;
        Ok(outcome)
    }

    /// Enabled and available tools of the family, in registry order
    fn chain(&self, family: FormatFamily, config: &Config) -> Vec<&'static ToolDescriptor> {
        enabled_tools(config, family)
            .into_iter()
            .filter(|tool| self.runner.resolver().is_tool_available(tool.id))
            .collect()
    }

    fn compatible(
        &self,
        tool: &ToolDescriptor,
        format: FileFormat,
        sequenced: bool,
        config: &Config,
    ) -> bool {
        tool.accepts(format, sequenced) && (config.convert_to_png || !tool.converts(format))
    }

    /// `compatible`, plus checks that need to look at the actual input file.
    ///
    /// pngout cannot handle 16 bit PNGs, nor PNGs whose depth is unreadable.
    fn applicable(
        &self,
        tool: &ToolDescriptor,
        input: &Path,
        format: FileFormat,
        sequenced: bool,
        config: &Config,
    ) -> bool {
        if !self.compatible(tool, format, sequenced, config) {
            return false;
        }
        if tool.id == ToolId::Pngout && format == FileFormat::Png {
            let depth = png_bit_depth(input);
            if !matches!(depth, Some(d) if d != 16) {
                let depth = depth.map_or_else(|| "unknown".to_string(), |d| d.to_string());
                info!("Skipped pngout for {} bit PNG: {}", depth, input.display());
                return false;
            }
        }
        true
    }

    /// Every applicable tool, each seeded from the best result so far.
    ///
    /// The original is the first baseline. A result only becomes the new
    /// best when it is smaller, or when it converted the image to PNG.
    async fn lossless(
        &self,
        task: &Task,
        bytes_in: u64,
        report_lines: &mut Vec<String>,
    ) -> Result<Option<Candidate>> {
        let config = &task.config;
        let mut best: Option<Candidate> = None;

        for tool in self.chain(FormatFamily::Lossless, config) {
            let (input, format, size) = match best {
                Some(ref b) => (b.path.to_path_buf(), b.format, b.size),
                None => (task.path.clone(), task.format, bytes_in),
            };
            if !self.applicable(tool, &input, format, task.sequenced, config) {
                continue;
            }

            let out_format = tool.output_format(format);
            let output = FileManager::temp_output(&task.path, out_format)?;
            let result = self.runner.run(tool, &input, &output, config).await;
            if !result.success {
                continue;
            }

            report_lines.push(format!("{}: {}", tool.id, new_percent_saved(size, result.size_after)));
            if out_format != format || result.size_after < size {
                best = Some(Candidate {
                    path: output,
                    size: result.size_after,
                    format: out_format,
                });
            }
        }

        Ok(best)
    }

    /// Tools in priority order, stopping at the first success
    async fn lossy(
        &self,
        task: &Task,
        bytes_in: u64,
        report_lines: &mut Vec<String>,
    ) -> Result<Option<Candidate>> {
        let config = &task.config;

        for tool in self.chain(FormatFamily::Lossy, config) {
            if !self.applicable(tool, &task.path, task.format, task.sequenced, config) {
                continue;
            }
            let out_format = tool.output_format(task.format);
            let output = FileManager::temp_output(&task.path, out_format)?;
            let result = self.runner.run(tool, &task.path, &output, config).await;
            if result.success {
                report_lines.push(format!(
                    "{}: {}",
                    tool.id,
                    new_percent_saved(bytes_in, result.size_after)
                ));
                return Ok(Some(Candidate {
                    path: output,
                    size: result.size_after,
                    format: out_format,
                }));
            }
        }

        Ok(None)
    }
}
