//! # Configuration Management Module
//!
//! Questo modulo gestisce tutta la configurazione dell'applicazione.
//!
//! ## Responsabilità:
//! - Definisce la struct `Config` con tutti i parametri di ottimizzazione
//! - Definisce `ToolToggles` per abilitare/disabilitare ogni optimizer esterno
//! - Fornisce validazione dei parametri e parsing di formati e timestamp
//! - Supporta caricamento/salvataggio configurazione da/verso file JSON
//! - Fornisce l'override immutabile usato per i contenuti dei fumetti
//!
//! ## Parametri di configurazione:
//! - `recurse`: Discesa ricorsiva nelle directory (default: false)
//! - `formats`: Formati selezionati (default: None = tutti)
//! - `jobs`: Numero di worker paralleli (default: numero di CPU)
//! - `comics`: Ottimizza anche archivi CBZ/CBR (default: false)
//! - `bigger`: Mantieni output anche se più grande (default: false)
//! - `dry_run`: Misura senza sostituire file (default: false)
//! - `optimize_after`: Ignora file non modificati dopo questo istante
//!
//! ## Esempio:
//! ```rust
//! use picopt::Config;
//!
//! let config = Config {
//!     recurse: true,
//!     jobs: 8,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! let inner = config.for_archive("issue-01.cbz");
//! assert!(inner.recurse);
//! ```

use crate::classifier::FileFormat;
use crate::error::OptimizeError;
use crate::tools::ToolId;
use anyhow::Result;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Delimiter for the `--formats` list
pub const FORMAT_DELIMITER: char = ',';

/// Which external optimizers the user allows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolToggles {
    pub optipng: bool,
    /// advpng is opt-in
    pub advpng: bool,
    pub pngout: bool,
    pub gifsicle: bool,
    pub mozjpeg: bool,
    pub jpegrescan: bool,
    /// jpegtran with `-progressive`
    pub jpegtran_prog: bool,
    pub jpegtran: bool,
}

impl Default for ToolToggles {
    fn default() -> Self {
        Self {
            optipng: true,
            advpng: false,
            pngout: true,
            gifsicle: true,
            mozjpeg: true,
            jpegrescan: true,
            jpegtran_prog: true,
            jpegtran: true,
        }
    }
}

impl ToolToggles {
    /// Every tool switched off
    pub fn none() -> Self {
        Self {
            optipng: false,
            advpng: false,
            pngout: false,
            gifsicle: false,
            mozjpeg: false,
            jpegrescan: false,
            jpegtran_prog: false,
            jpegtran: false,
        }
    }

    pub fn is_enabled(&self, id: ToolId) -> bool {
        match id {
            ToolId::Optipng => self.optipng,
            ToolId::Advpng => self.advpng,
            ToolId::Pngout => self.pngout,
            ToolId::Gifsicle => self.gifsicle,
            ToolId::Mozjpeg => self.mozjpeg,
            ToolId::Jpegrescan => self.jpegrescan,
            ToolId::JpegtranProg => self.jpegtran_prog,
            ToolId::Jpegtran => self.jpegtran,
        }
    }
}

/// Configuration for image and comic optimization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Descend into directories
    pub recurse: bool,
    /// Explicit format selection (None = every supported format)
    pub formats: Option<Vec<FileFormat>>,
    /// Number of parallel workers
    pub jobs: usize,
    /// Optimize CBZ/CBR comic archives
    pub comics: bool,
    /// Keep optimized files even when they are larger
    pub bigger: bool,
    /// Measure only - don't actually replace files
    pub dry_run: bool,
    /// Only print the classification of every file
    pub list_only: bool,
    /// Strip EXIF/JFIF and other metadata
    pub destroy_metadata: bool,
    /// Convert GIF, TIFF and PNM to PNG
    pub convert_to_png: bool,
    /// Follow symlinks while walking
    pub follow_symlinks: bool,
    /// Skip files not modified after this unix timestamp
    pub optimize_after: Option<i64>,
    /// Write a timestamp dotfile in every optimized directory
    pub record_timestamp: bool,
    /// Per-tool switches
    pub tools: ToolToggles,
    /// Directory searched for optimizer binaries before PATH
    pub tools_dir: Option<PathBuf>,
    /// Let jpegrescan use its own threads
    pub jpegrescan_multithread: bool,
    /// Output progress and results as JSON lines
    pub json_output: bool,
    /// 0 = quiet, 1 = normal, 2 = verbose, 3 = noisy
    pub verbose: u8,
    /// Display name of the comic archive the files come from
    #[serde(skip)]
    pub archive_name: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recurse: false,
            formats: None,
            jobs: num_cpus::get().max(1),
            comics: false,
            bigger: false,
            dry_run: false,
            list_only: false,
            destroy_metadata: false,
            convert_to_png: true,
            follow_symlinks: true,
            optimize_after: None,
            record_timestamp: false,
            tools: ToolToggles::default(),
            tools_dir: None,
            jpegrescan_multithread: false,
            json_output: false,
            verbose: 1,
            archive_name: None,
        }
    }
}

impl Config {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), OptimizeError> {
        if self.jobs == 0 {
            return Err(OptimizeError::Configuration(
                "Number of jobs must be greater than 0".to_string(),
            ));
        }

        if let Some(ref formats) = self.formats {
            if formats.is_empty() {
                return Err(OptimizeError::Configuration(
                    "At least one format must be selected".to_string(),
                ));
            }
        }

        if let Some(ref tools_dir) = self.tools_dir {
            if !tools_dir.is_dir() {
                return Err(OptimizeError::Configuration(format!(
                    "Tools directory is not a directory: {}",
                    tools_dir.display()
                )));
            }
        }

        Ok(())
    }

    /// Settings for the contents of a comic archive.
    ///
    /// Archives are always walked recursively no matter what the top level
    /// asked for, and their files are reported under the archive's name.
    pub fn for_archive(&self, archive_name: &str) -> Config {
        Config {
            recurse: true,
            archive_name: Some(archive_name.to_string()),
            ..self.clone()
        }
    }

    /// Formats that will be optimized with the current settings
    pub fn selected_formats(&self) -> Vec<FileFormat> {
        let mut selected = match self.formats {
            Some(ref formats) => formats.clone(),
            None => {
                let mut all = vec![FileFormat::Png, FileFormat::Jpeg, FileFormat::Gif];
                if self.convert_to_png {
                    all.extend([FileFormat::Tiff, FileFormat::Pnm]);
                }
                all
            }
        };
        if self.comics {
            selected.extend([FileFormat::Cbz, FileFormat::Cbr]);
        }
        selected.sort();
        selected.dedup();
        selected
    }

    pub fn is_format_selected(&self, format: FileFormat) -> bool {
        if format.is_archive() && !self.comics {
            return false;
        }
        self.selected_formats().contains(&format)
    }

    pub fn quiet(&self) -> bool {
        self.verbose == 0
    }

    /// Load configuration from file
    pub async fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

/// Parse a `--formats` list like `png,JPEG,gif`
pub fn parse_formats(list: &str) -> Result<Vec<FileFormat>, OptimizeError> {
    list.split(FORMAT_DELIMITER)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| {
            name.parse::<FileFormat>()
                .map_err(|_| OptimizeError::Configuration(format!("Unknown format: {}", name)))
        })
        .collect()
}

/// Parse an `--optimize-after` timestamp into unix seconds.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS`,
/// `YYYY-MM-DD` (local time) and raw unix seconds.
pub fn parse_timestamp(value: &str) -> Result<i64, OptimizeError> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp());
    }

    for pattern in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, pattern) {
            return local_timestamp(naive, value);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return local_timestamp(naive, value);
        }
    }

    if let Ok(seconds) = value.parse::<i64>() {
        return Ok(seconds);
    }

    Err(OptimizeError::Configuration(format!(
        "Could not parse date to optimize after: {}",
        value
    )))
}

fn local_timestamp(naive: NaiveDateTime, raw: &str) -> Result<i64, OptimizeError> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
        .ok_or_else(|| OptimizeError::Configuration(format!("Nonexistent local time: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.jobs = 0;
        assert!(config.validate().is_err());

        config.jobs = 2;
        config.formats = Some(vec![]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(!config.recurse);
        assert!(config.jobs >= 1);
        assert!(config.convert_to_png);
        assert!(config.tools.optipng);
        assert!(!config.tools.advpng);
        assert!(!config.dry_run);
    }

    #[test]
    fn test_for_archive_forces_recursion_without_touching_original() {
        let config = Config::default();
        let inner = config.for_archive("book.cbr");
        assert!(inner.recurse);
        assert_eq!(inner.archive_name.as_deref(), Some("book.cbr"));
        assert!(!config.recurse);
        assert!(config.archive_name.is_none());
    }

    #[test]
    fn test_selected_formats() {
        let mut config = Config::default();
        assert!(config.is_format_selected(FileFormat::Tiff));
        assert!(!config.is_format_selected(FileFormat::Cbz));

        config.convert_to_png = false;
        assert!(!config.is_format_selected(FileFormat::Pnm));
        assert!(config.is_format_selected(FileFormat::Png));

        config.comics = true;
        config.formats = Some(vec![FileFormat::Jpeg]);
        assert!(config.is_format_selected(FileFormat::Cbr));
        assert!(!config.is_format_selected(FileFormat::Png));
    }

    #[test]
    fn test_parse_formats() {
        let formats = parse_formats("png, JPEG,gif").unwrap();
        assert_eq!(formats, vec![FileFormat::Png, FileFormat::Jpeg, FileFormat::Gif]);
        assert!(parse_formats("png,webp").is_err());
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("2020-01-01T00:00:00Z").unwrap(), 1_577_836_800);
        assert_eq!(parse_timestamp("1577836800").unwrap(), 1_577_836_800);
        assert!(parse_timestamp("2020-01-01").is_ok());
        assert!(parse_timestamp("2020-01-01 12:30:00").is_ok());

        let err = parse_timestamp("last tuesday").unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_config_save_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");

        let original_config = Config {
            recurse: true,
            jobs: 3,
            comics: true,
            bigger: true,
            formats: Some(vec![FileFormat::Png]),
            tools: ToolToggles {
                pngout: false,
                ..ToolToggles::default()
            },
            ..Config::default()
        };

        original_config.save_to_file(&config_path).await.unwrap();
        let loaded_config = Config::from_file(&config_path).await.unwrap();

        assert!(loaded_config.recurse);
        assert_eq!(loaded_config.jobs, 3);
        assert!(loaded_config.comics);
        assert!(loaded_config.bigger);
        assert_eq!(loaded_config.formats, Some(vec![FileFormat::Png]));
        assert!(!loaded_config.tools.pngout);
    }
}
