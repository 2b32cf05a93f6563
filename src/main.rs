//! # Picopt - Main Entry Point
//!
//! Questo è il punto di ingresso principale dell'applicazione.
//!
//! ## Responsabilità:
//! - Parsing degli argomenti della command line con `clap`
//! - Inizializzazione del sistema di logging con `tracing`
//! - Merge tra file di configurazione opzionale e flag CLI
//! - Creazione della configurazione e avvio dell'optimizer
//!
//! ## Flusso di esecuzione:
//! 1. Parsa gli argomenti CLI (paths, formati, jobs, toggle dei tool, etc.)
//! 2. Configura il logging (WARN di default, `-v` INFO, `-vv` DEBUG, `-Q` ERROR)
//! 3. Carica `--config` se presente, poi applica i flag
//! 4. Con `-d` cambia directory: i path sono relativi a quella
//! 5. Istanzia MediaOptimizer e avvia il processo di ottimizzazione
//!
//! Errori per singolo file non cambiano l'exit code: solo errori di
//! configurazione terminano con codice diverso da zero.
//!
//! ## Esempio di utilizzo:
//! ```bash
//! picopt -r -c -j 8 ~/Pictures ~/Comics
//! ```

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use tracing::debug;

use picopt::config::{parse_formats, parse_timestamp};
use picopt::json_output::JsonMessage;
use picopt::{Config, MediaOptimizer};

#[derive(Parser)]
#[command(name = "picopt")]
#[command(about = "Losslessly optimize images and comic archives with external tools")]
#[command(version)]
struct Args {
    /// Files and directories to optimize
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Recurse down through directories
    #[arg(short, long)]
    recurse: bool,

    /// Change to this directory before optimizing; paths are relative to it
    #[arg(short = 'd', long = "dir", value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Only optimize these formats (comma separated, e.g. PNG,JPEG)
    #[arg(short, long)]
    formats: Option<String>,

    /// Number of parallel workers (default: number of CPUs)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Also optimize comic book archives (CBZ, CBR)
    #[arg(short, long)]
    comics: bool,

    /// Keep optimized files even if they are bigger than the original
    #[arg(short, long)]
    bigger: bool,

    /// Dry run - measure savings without replacing files
    #[arg(short = 'N', long)]
    noop: bool,

    /// Only list files that would be optimized and their format
    #[arg(short, long)]
    list: bool,

    /// Strip metadata such as EXIF and JFIF
    #[arg(short = 'M', long)]
    destroy_metadata: bool,

    /// Only optimize files modified after this time (RFC 3339, YYYY-MM-DD or unix seconds)
    #[arg(short = 'D', long)]
    optimize_after: Option<String>,

    /// Record the optimization time in a dotfile in each directory
    #[arg(short = 't', long)]
    record_timestamp: bool,

    /// Verbose output, repeat for more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only print errors
    #[arg(short = 'Q', long)]
    quiet: bool,

    /// Do not optimize with optipng
    #[arg(short = 'O', long)]
    disable_optipng: bool,

    /// Optimize with advpng (slow)
    #[arg(short = 'a', long)]
    enable_advpng: bool,

    /// Do not optimize with pngout
    #[arg(short = 'P', long)]
    disable_pngout: bool,

    /// Do not optimize with gifsicle
    #[arg(short = 'G', long)]
    disable_gifsicle: bool,

    /// Do not optimize with mozjpeg
    #[arg(short = 'Z', long)]
    disable_mozjpeg: bool,

    /// Do not optimize with jpegrescan
    #[arg(short = 'J', long)]
    disable_jpegrescan: bool,

    /// Do not optimize with jpegtran -progressive
    #[arg(short = 'E', long)]
    disable_progressive: bool,

    /// Do not optimize with jpegtran
    #[arg(short = 'T', long)]
    disable_jpegtran: bool,

    /// Do not convert GIF, TIFF and PNM to PNG
    #[arg(short = 'Y', long)]
    disable_convert_type: bool,

    /// Do not follow symlinks while walking
    #[arg(short = 'S', long)]
    disable_follow_symlinks: bool,

    /// Search this directory for optimizer binaries before PATH
    #[arg(long)]
    tools_dir: Option<PathBuf>,

    /// Output progress and results as JSON lines
    #[arg(long)]
    json: bool,

    /// Load base settings from a JSON config file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Args {
    fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::WARN,
                1 => tracing::Level::INFO,
                _ => tracing::Level::DEBUG,
            }
        }
    }

    fn change_dir(&self) -> Result<()> {
        if let Some(ref dir) = self.dir {
            std::env::set_current_dir(dir)
                .with_context(|| format!("Cannot change to directory {}", dir.display()))?;
            debug!("Working directory: {}", dir.display());
        }
        Ok(())
    }

    /// Apply the command line on top of `base`
    fn into_config(self, mut config: Config) -> Result<(Config, Vec<PathBuf>)> {
        config.recurse |= self.recurse;
        config.comics |= self.comics;
        config.bigger |= self.bigger;
        config.dry_run |= self.noop;
        config.list_only |= self.list;
        config.destroy_metadata |= self.destroy_metadata;
        config.record_timestamp |= self.record_timestamp;
        config.json_output |= self.json;

        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        config.jobs = config.jobs.max(1);

        if let Some(ref formats) = self.formats {
            config.formats = Some(parse_formats(formats)?);
        }
        if let Some(ref after) = self.optimize_after {
            config.optimize_after = Some(parse_timestamp(after)?);
        }
        if self.tools_dir.is_some() {
            config.tools_dir = self.tools_dir.clone();
        }

        config.verbose = if self.quiet { 0 } else { 1 + self.verbose };

        let tools = &mut config.tools;
        tools.optipng &= !self.disable_optipng;
        tools.advpng |= self.enable_advpng;
        tools.pngout &= !self.disable_pngout;
        tools.gifsicle &= !self.disable_gifsicle;
        tools.mozjpeg &= !self.disable_mozjpeg;
        tools.jpegrescan &= !self.disable_jpegrescan;
        tools.jpegtran_prog &= !self.disable_progressive;
        tools.jpegtran &= !self.disable_jpegtran;
        config.convert_to_png &= !self.disable_convert_type;
        config.follow_symlinks &= !self.disable_follow_symlinks;

        // Few files and many cores: let jpegrescan spread out
        let all_files = self.paths.iter().all(|p| p.is_file());
        config.jpegrescan_multithread =
            all_files && config.jobs as i64 - 3 * self.paths.len() as i64 >= 0;

        Ok((config, self.paths))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let base = match args.config {
        Some(ref path) => Config::from_file(path).await?,
        None => Config::default(),
    };
    args.change_dir()?;
    let (config, paths) = args.into_config(base)?;
    debug!("{:?}", config);

    let json = config.json_output;
    let optimizer = match MediaOptimizer::new(config) {
        Ok(optimizer) => optimizer,
        Err(e) => {
            if json {
                JsonMessage::error(e.to_string(), None).emit();
            }
            return Err(e.into());
        }
    };
    optimizer.run(&paths).await?;

    Ok(())
}
