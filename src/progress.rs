//! # Progress Tracking and Statistics Module
//!
//! Questo modulo gestisce il progress tracking e le statistiche di ottimizzazione.
//!
//! ## Responsabilità:
//! - Progress bar visual con `indicatif` per feedback real-time
//! - Aggregazione atomica dei byte in/out da worker concorrenti (`Totals`)
//! - Report per file (percentuale risparmiata e report dei tool)
//! - Report finale con il totale risparmiato
//! - Output JSON quando richiesto
//!
//! ## Componenti principali:
//! - `Totals`: Contatori atomici condivisi via `Arc`, mai globali
//! - `TotalsSnapshot`: Lettura dei contatori a fine run
//! - `ProgressManager`: Gestisce la progress bar (lunghezza dinamica)
//! - `Reporter`: Stampa i report sopra la barra o in JSON
//!
//! ## Statistiche tracciate:
//! - **bytes_in** / **bytes_out**: Solo file di primo livello e archivi interi
//! - **files**: Task completati
//! - **replaced**: File effettivamente sostituiti
//! - **failures**: Errori per file o archivio
//! - **nag_about_sequenced**: Immagini animate saltate per mancanza di tool
//!
//! ## Visual feedback:
//! ```text
//! ⠋ [00:02:15] [========================================] 150/150 (100%) photo.jpg
//! ```

use crate::config::Config;
use crate::file_manager::humanize_bytes;
use crate::json_output::JsonMessage;
use crate::optimizer::OptimizationOutcome;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Printed once at the end when animated images were skipped
pub const SEQUENCED_NAG: &str =
    "Sequenced (animated) images were skipped: enable gifsicle to optimize them.";

/// Race-free aggregate of every finished task
#[derive(Debug, Default)]
pub struct Totals {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    files: AtomicUsize,
    replaced: AtomicUsize,
    failures: AtomicUsize,
    nag_about_sequenced: AtomicBool,
}

impl Totals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, bytes_in: u64, bytes_out: u64) {
        self.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
    }

    /// Merge one outcome. Files inside an archive only count through the
    /// archive's own sizes.
    pub fn record(&self, outcome: &OptimizationOutcome) {
        self.files.fetch_add(1, Ordering::Relaxed);
        if outcome.is_error() {
            self.add_failure();
            return;
        }
        if outcome.replaced {
            self.replaced.fetch_add(1, Ordering::Relaxed);
        }
        if !outcome.in_archive {
            self.add(outcome.bytes_in, outcome.bytes_out);
        }
    }

    pub fn add_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn nag_about_sequenced(&self) {
        self.nag_about_sequenced.store(true, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TotalsSnapshot {
        TotalsSnapshot {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            nag_about_sequenced: self.nag_about_sequenced.load(Ordering::Relaxed),
        }
    }
}

/// Totals read once after the scheduler drained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TotalsSnapshot {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub files: usize,
    pub replaced: usize,
    pub failures: usize,
    pub nag_about_sequenced: bool,
}

impl TotalsSnapshot {
    pub fn bytes_saved(&self) -> i64 {
        self.bytes_in as i64 - self.bytes_out as i64
    }

    pub fn percent_saved(&self) -> f64 {
        if self.bytes_in == 0 {
            0.0
        } else {
            self.bytes_saved() as f64 / self.bytes_in as f64 * 100.0
        }
    }

    /// Final report lines
    pub fn format_summary(&self, dry_run: bool) -> Vec<String> {
        let mut lines = Vec::new();
        if self.bytes_in == 0 {
            lines.push("Didn't optimize any files.".to_string());
        } else {
            let saved = self.bytes_saved();
            let verb = match (dry_run, saved.signum()) {
                (true, 1) => "Could save",
                (true, 0) => "Could even out for",
                (true, _) => "Could lose",
                (false, 1) => "Saved",
                (false, 0) => "Evened out",
                (false, _) => "Lost",
            };
            let amount = if saved < 0 {
                format!("-{}", humanize_bytes(saved.unsigned_abs()))
            } else {
                humanize_bytes(saved as u64)
            };
            lines.push(format!(
                "{} a total of {} or {:.2}%",
                verb,
                amount,
                self.percent_saved()
            ));
            if dry_run {
                lines.push("Test run did not change any files.".to_string());
            }
        }
        if self.failures > 0 {
            lines.push(format!("{} file(s) could not be optimized.", self.failures));
        }
        lines
    }
}

/// Manages the progress bar
#[derive(Clone)]
pub struct ProgressManager {
    bar: ProgressBar,
}

impl ProgressManager {
    /// Progress bar whose length grows as tasks are discovered
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);

        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn add_task(&self) {
        self.bar.inc_length(1);
    }

    /// Update progress with a message
    pub fn update(&self, message: &str) {
        self.bar.inc(1);
        self.bar.set_message(message.to_string());
    }

    /// Print above the bar, or plainly when there is no terminal
    pub fn println(&self, line: &str) {
        if self.bar.is_hidden() {
            println!("{}", line);
        } else {
            self.bar.println(line);
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Console or JSON reporting for one run
pub struct Reporter {
    progress: ProgressManager,
    quiet: bool,
    json: bool,
    dry_run: bool,
    start_time: Instant,
}

impl Reporter {
    pub fn new(config: &Config) -> Self {
        let progress = if config.quiet() || config.json_output || config.list_only {
            ProgressManager::hidden()
        } else {
            ProgressManager::new()
        };
        Self {
            progress,
            quiet: config.quiet(),
            json: config.json_output,
            dry_run: config.dry_run,
            start_time: Instant::now(),
        }
    }

    /// Prints nothing
    pub fn silent() -> Self {
        Self {
            progress: ProgressManager::hidden(),
            quiet: true,
            json: false,
            dry_run: false,
            start_time: Instant::now(),
        }
    }

    pub fn task_submitted(&self) {
        self.progress.add_task();
    }

    pub fn task_finished(&self, outcome: &OptimizationOutcome) {
        self.progress.update(&outcome.display);

        if self.json {
            JsonMessage::file_complete(outcome).emit();
        } else if !self.quiet {
            self.progress.println(&format_report(outcome, self.dry_run));
        }
    }

    /// A file the walk could not classify
    pub fn rejected(&self, path: &Path, error: &str) {
        if self.json {
            JsonMessage::error(format!("{}", path.display()), Some(error.to_string())).emit();
        } else if !self.quiet {
            self.progress.println(&format!("{}: {}", path.display(), error));
        }
    }

    pub fn finish(&self, totals: &TotalsSnapshot) {
        self.progress.finish();

        if self.json {
            JsonMessage::complete(totals, self.start_time.elapsed().as_secs_f64()).emit();
            return;
        }
        for line in totals.format_summary(self.dry_run) {
            println!("{}", line);
        }
        if totals.nag_about_sequenced {
            println!("{}", SEQUENCED_NAG);
        }
    }
}

/// `path: 40.00% (400 bytes)` followed by the tool reports
pub fn format_report(outcome: &OptimizationOutcome, dry_run: bool) -> String {
    let mut report = format!("{}: ", outcome.display);
    match outcome.error {
        Some(ref error) => report.push_str(error),
        None => {
            report.push_str(&crate::file_manager::new_percent_saved(
                outcome.bytes_in,
                outcome.bytes_out,
            ));
            if dry_run {
                report.push_str(" could be saved.");
            }
        }
    }
    if !outcome.report_lines.is_empty() {
        report.push_str("\n\t");
        report.push_str(&outcome.report_lines.join(", "));
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn outcome(bytes_in: u64, bytes_out: u64) -> OptimizationOutcome {
        OptimizationOutcome {
            path: PathBuf::from("a.png"),
            display: "a.png".to_string(),
            bytes_in,
            bytes_out,
            report_lines: vec!["optipng: 40.00% (400 bytes)".to_string()],
            replaced: bytes_out < bytes_in,
            error: None,
            in_archive: false,
        }
    }

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        let totals = Arc::new(Totals::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let totals = Arc::clone(&totals);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        totals.add(10, 7);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let snapshot = totals.snapshot();
        assert_eq!(snapshot.bytes_in, 80_000);
        assert_eq!(snapshot.bytes_out, 56_000);
    }

    #[test]
    fn test_archive_children_and_failures_do_not_move_bytes() {
        let totals = Totals::new();
        totals.record(&outcome(1000, 600));

        let mut child = outcome(500, 100);
        child.in_archive = true;
        totals.record(&child);

        let mut failed = outcome(0, 0);
        failed.error = Some("boom".to_string());
        totals.record(&failed);

        let snapshot = totals.snapshot();
        assert_eq!((snapshot.bytes_in, snapshot.bytes_out), (1000, 600));
        assert_eq!(snapshot.files, 3);
        assert_eq!(snapshot.replaced, 2);
        assert_eq!(snapshot.failures, 1);
    }

    #[test]
    fn test_summary_wording() {
        let saved = TotalsSnapshot {
            bytes_in: 1000,
            bytes_out: 600,
            ..Default::default()
        };
        assert_eq!(saved.format_summary(false), vec!["Saved a total of 400 bytes or 40.00%"]);
        assert_eq!(
            saved.format_summary(true),
            vec![
                "Could save a total of 400 bytes or 40.00%",
                "Test run did not change any files."
            ]
        );

        let lost = TotalsSnapshot {
            bytes_in: 100,
            bytes_out: 150,
            ..Default::default()
        };
        assert_eq!(lost.format_summary(false), vec!["Lost a total of -50 bytes or -50.00%"]);

        assert_eq!(
            TotalsSnapshot::default().format_summary(false),
            vec!["Didn't optimize any files."]
        );
    }

    #[test]
    fn test_file_report() {
        let report = format_report(&outcome(1000, 600), true);
        assert_eq!(
            report,
            "a.png: 40.00% (400 bytes) could be saved.\n\toptipng: 40.00% (400 bytes)"
        );
    }
}
