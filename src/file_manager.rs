//! # File Management Module
//!
//! Questo modulo gestisce tutte le operazioni sui file e la discovery delle immagini.
//!
//! ## Responsabilità:
//! - Discovery di file in directory (ricorsiva con `--recurse`)
//! - Classificazione di ogni file trovato e creazione dei `Task`
//! - Sostituzione sicura dell'originale con il file ottimizzato
//! - Utilità per calcoli dimensioni e percentuali
//! - Formattazione human-readable delle dimensioni
//!
//! ## Operazioni sui file:
//! - `discover()`: Trova e classifica i file sotto una radice
//! - `FileManager::temp_output()`: File temporaneo accanto all'originale
//! - `FileManager::replace_file()`: Sostituzione in tre passi
//! - `FileManager::should_replace()`: Decide se tenere il risultato
//!
//! ## Sicurezza operazioni:
//! - L'originale viene rinominato in `<nome>.picopt-remove`, mai cancellato prima
//! - Il candidato viene spostato al nome finale con un rename
//! - Rollback dell'originale se lo spostamento fallisce
//! - Un `.picopt-remove` rimasto indica un run interrotto e viene segnalato
//!
//! ## Utilità:
//! - `humanize_bytes()`: Converte bytes in formato leggibile (kiB, MiB, GiB)
//! - `new_percent_saved()`: Percentuale e bytes risparmiati

use crate::classifier::{classify, FileFormat};
use crate::config::Config;
use crate::error::{OptimizeError, Result};
use crate::optimizer::Task;
use crate::state::TimestampStore;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Suffix of an original waiting to be deleted
pub const REMOVE_EXT: &str = ".picopt-remove";
/// Marker inside the name of every tool output
pub const OPTIMIZED_MARKER: &str = ".picopt-optimized";
/// Prefix of comic archive scratch directories
pub const SCRATCH_PREFIX: &str = "picopt_tmp_";

const ABBREVS: &[(u64, &str)] = &[
    (1 << 50, "PiB"),
    (1 << 40, "TiB"),
    (1 << 30, "GiB"),
    (1 << 20, "MiB"),
    (1 << 10, "kiB"),
    (1, "bytes"),
];

/// What the walk found at one path
#[derive(Debug)]
pub enum Discovery {
    /// Ready to be scheduled
    Task(Task),
    /// Could not be classified
    Rejected { path: PathBuf, error: OptimizeError },
}

/// Walk `root` and classify everything under it.
///
/// Blocking: header sniffing reads files, so callers run this inside
/// `spawn_blocking`.
pub fn discover(root: &Path, config: &Arc<Config>, timestamps: &TimestampStore) -> Vec<Discovery> {
    let mut found = Vec::new();

    if root.is_dir() && !config.recurse {
        info!("{} is a directory, skipping (use --recurse)", root.display());
        return found;
    }

    let walker = WalkDir::new(root)
        .follow_links(config.follow_symlinks)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_scratch_dir(entry));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Walk error under {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if TimestampStore::is_timestamp_file(path) || is_tool_output(path) {
            continue;
        }
        if has_suffix(path, REMOVE_EXT) {
            warn!(
                "{} was left behind by an interrupted run; the optimized file may be missing",
                path.display()
            );
            continue;
        }

        // Archive contents are always fresh; the archive itself was checked
        if config.archive_name.is_none() {
            match entry.metadata() {
                Ok(metadata) if timestamps.is_unchanged(path, root, &metadata) => {
                    debug!("{} not modified since last run", path.display());
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Cannot stat {}: {}", path.display(), e);
                    continue;
                }
            }
        }

        match classify(path) {
            Err(error) => found.push(Discovery::Rejected {
                path: path.to_path_buf(),
                error,
            }),
            Ok(None) => debug!("{} is not an image", path.display()),
            Ok(Some(classification)) => {
                if !config.is_format_selected(classification.format) {
                    info!(
                        "{} {} is not a selected format",
                        path.display(),
                        classification.format
                    );
                    continue;
                }
                let display = display_name(root, path, config);
                found.push(Discovery::Task(Task::new(
                    path.to_path_buf(),
                    classification,
                    Arc::clone(config),
                    display,
                )));
            }
        }
    }

    found
}

fn is_scratch_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with(SCRATCH_PREFIX))
            .unwrap_or(false)
}

fn is_tool_output(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.contains(OPTIMIZED_MARKER))
        .unwrap_or(false)
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.ends_with(suffix))
        .unwrap_or(false)
}

/// `archive.cbz:page01.png` inside archives, the plain path otherwise
fn display_name(root: &Path, path: &Path, config: &Config) -> String {
    match config.archive_name {
        Some(ref archive) => {
            let relative = path.strip_prefix(root).unwrap_or(path);
            format!("{}:{}", archive, relative.display())
        }
        None => path.display().to_string(),
    }
}

/// Manages file operations
pub struct FileManager;

impl FileManager {
    /// Get the size of a file
    pub async fn file_size(path: &Path) -> Result<u64> {
        Ok(fs::metadata(path).await?.len())
    }

    /// Keep the candidate?
    pub fn should_replace(size_in: u64, size_out: u64, bigger: bool) -> bool {
        size_out > 0 && (size_out < size_in || bigger)
    }

    /// Where the original waits while its replacement is moved in
    pub fn remove_path(original: &Path) -> PathBuf {
        let mut name = OsString::from(original.as_os_str());
        name.push(REMOVE_EXT);
        PathBuf::from(name)
    }

    /// Name the file gets once its format is `format`
    pub fn final_path(original: &Path, original_format: FileFormat, format: FileFormat) -> PathBuf {
        if original_format == format {
            original.to_path_buf()
        } else {
            original.with_extension(format.extension())
        }
    }

    /// Unique scratch file next to `original`, deleted on drop unless persisted
    pub fn temp_output(original: &Path, format: FileFormat) -> Result<TempPath> {
        let parent = original
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let file = tempfile::Builder::new()
            .prefix(&format!(".{}.", name))
            .suffix(&format!("{}.{}", OPTIMIZED_MARKER, format.extension()))
            .tempfile_in(parent)?;
        Ok(file.into_temp_path())
    }

    /// Replace `original` with `candidate`, which ends up at `final_path`.
    ///
    /// 1. original -> `<original>.picopt-remove`
    /// 2. candidate -> `final_path`
    /// 3. delete the remove-file
    pub async fn replace_file(original: &Path, candidate: TempPath, final_path: &Path) -> Result<()> {
        if final_path != original && fs::try_exists(final_path).await.unwrap_or(true) {
            return Err(OptimizeError::replacement(
                original,
                format!("{} already exists", final_path.display()),
            ));
        }

        let remove_path = Self::remove_path(original);
        fs::rename(original, &remove_path)
            .await
            .map_err(|e| OptimizeError::replacement(original, e))?;

        if let Err(e) = candidate.persist(final_path) {
            return match fs::rename(&remove_path, original).await {
                Ok(()) => Err(OptimizeError::replacement(original, e.error)),
                Err(restore) => Err(OptimizeError::replacement(
                    original,
                    format!(
                        "{}; original kept at {} ({})",
                        e.error,
                        remove_path.display(),
                        restore
                    ),
                )),
            };
        }

        fs::remove_file(&remove_path).await.map_err(|e| {
            OptimizeError::replacement(
                original,
                format!("replaced but could not delete {}: {}", remove_path.display(), e),
            )
        })?;

        debug!("Replaced {} -> {}", original.display(), final_path.display());
        Ok(())
    }
}

/// Humanized representation of a number of bytes, 1024 based.
///
/// Only whole bytes are printed without decimals.
pub fn humanize_bytes(num_bytes: u64) -> String {
    match num_bytes {
        0 => return "no bytes".to_string(),
        1 => return "1 byte".to_string(),
        _ => {}
    }

    let (factor, suffix) = ABBREVS
        .iter()
        .copied()
        .find(|(factor, _)| num_bytes >= *factor)
        .unwrap_or((1, "bytes"));

    if factor == 1 {
        format!("{} {}", num_bytes, suffix)
    } else {
        format!("{:.1} {}", num_bytes as f64 / factor as f64, suffix)
    }
}

/// Percent saved, two decimals, with the humanized byte delta
pub fn new_percent_saved(size_in: u64, size_out: u64) -> String {
    let percent_saved = if size_in == 0 {
        0.0
    } else {
        (1.0 - size_out as f64 / size_in as f64) * 100.0
    };

    let saved = if size_out > size_in {
        format!("-{}", humanize_bytes(size_out - size_in))
    } else {
        humanize_bytes(size_in - size_out)
    };

    format!("{:.2}% ({})", percent_saved, saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_humanize_bytes() {
        assert_eq!(humanize_bytes(0), "no bytes");
        assert_eq!(humanize_bytes(1), "1 byte");
        assert_eq!(humanize_bytes(400), "400 bytes");
        assert_eq!(humanize_bytes(1024), "1.0 kiB");
        assert_eq!(humanize_bytes(1024 * 123), "123.0 kiB");
        assert_eq!(humanize_bytes(1024 * 12342), "12.1 MiB");
        assert_eq!(humanize_bytes(1 << 40), "1.0 TiB");
    }

    #[test]
    fn test_new_percent_saved() {
        assert_eq!(new_percent_saved(1000, 600), "40.00% (400 bytes)");
        assert_eq!(new_percent_saved(1000, 1000), "0.00% (no bytes)");
        assert_eq!(new_percent_saved(100, 150), "-50.00% (-50 bytes)");
        assert_eq!(new_percent_saved(0, 0), "0.00% (no bytes)");
    }

    #[test]
    fn test_should_replace() {
        assert!(FileManager::should_replace(1000, 600, false));
        assert!(!FileManager::should_replace(1000, 1000, false));
        assert!(!FileManager::should_replace(1000, 1200, false));
        assert!(FileManager::should_replace(1000, 1200, true));
        assert!(!FileManager::should_replace(1000, 0, true));
    }

    #[test]
    fn test_paths() {
        let original = Path::new("/data/photo.gif");
        assert_eq!(
            FileManager::remove_path(original),
            PathBuf::from("/data/photo.gif.picopt-remove")
        );
        assert_eq!(
            FileManager::final_path(original, FileFormat::Gif, FileFormat::Png),
            PathBuf::from("/data/photo.png")
        );
        assert_eq!(
            FileManager::final_path(original, FileFormat::Gif, FileFormat::Gif),
            original.to_path_buf()
        );
    }

    #[tokio::test]
    async fn test_replace_with_new_extension_leaves_no_remove_file() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("image.gif");
        std::fs::write(&original, vec![0u8; 1000]).unwrap();

        let candidate = FileManager::temp_output(&original, FileFormat::Png).unwrap();
        std::fs::write(&candidate, vec![1u8; 600]).unwrap();
        let final_path = FileManager::final_path(&original, FileFormat::Gif, FileFormat::Png);

        FileManager::replace_file(&original, candidate, &final_path)
            .await
            .unwrap();

        assert!(!original.exists());
        assert_eq!(std::fs::metadata(&final_path).unwrap().len(), 600);
        assert!(!FileManager::remove_path(&original).exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_replace_refuses_to_clobber_another_file() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("image.gif");
        let other = dir.path().join("image.png");
        std::fs::write(&original, b"gif").unwrap();
        std::fs::write(&other, b"someone else's png").unwrap();

        let candidate = FileManager::temp_output(&original, FileFormat::Png).unwrap();
        std::fs::write(&candidate, b"png").unwrap();

        let err = FileManager::replace_file(&original, candidate, &other)
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizeError::Replacement { .. }));
        assert_eq!(std::fs::read(&original).unwrap(), b"gif");
        assert_eq!(std::fs::read(&other).unwrap(), b"someone else's png");
    }

    #[tokio::test]
    async fn test_failed_move_into_place_restores_the_original() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("image.gif");
        std::fs::write(&original, b"original gif").unwrap();

        let candidate = FileManager::temp_output(&original, FileFormat::Png).unwrap();
        std::fs::write(&candidate, b"png").unwrap();
        // The destination directory does not exist, so the second step fails
        let final_path = dir.path().join("missing").join("image.png");

        let err = FileManager::replace_file(&original, candidate, &final_path)
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizeError::Replacement { .. }));
        assert_eq!(std::fs::read(&original).unwrap(), b"original gif");
        assert!(!FileManager::remove_path(&original).exists());
        assert!(!final_path.exists());
        // The rejected candidate is gone too
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("image.gif")]);
    }

    #[test]
    fn test_temp_output_is_hidden_from_the_walk() {
        let dir = TempDir::new().unwrap();
        let original = dir.path().join("a.png");
        let temp = FileManager::temp_output(&original, FileFormat::Png).unwrap();
        assert!(is_tool_output(&temp));
        assert_eq!(temp.parent(), Some(dir.path()));
        let path = temp.to_path_buf();
        drop(temp);
        assert!(!path.exists());
    }

    #[test]
    fn test_discover_classifies_and_skips() {
        let dir = TempDir::new().unwrap();
        image::RgbImage::new(4, 4)
            .save(dir.path().join("a.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("broken.png"), b"\x89PNG\r\n\x1a\nnope").unwrap();
        std::fs::write(dir.path().join("old.png.picopt-remove"), b"x").unwrap();
        let scratch = dir.path().join("picopt_tmp_book.cbz");
        std::fs::create_dir(&scratch).unwrap();
        image::RgbImage::new(4, 4).save(scratch.join("b.png")).unwrap();

        let config = Arc::new(Config {
            recurse: true,
            ..Config::default()
        });
        let timestamps = TimestampStore::new(&config);
        let found = discover(dir.path(), &config, &timestamps);

        let tasks: Vec<&Task> = found
            .iter()
            .filter_map(|d| match d {
                Discovery::Task(task) => Some(task),
                _ => None,
            })
            .collect();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].path, dir.path().join("a.png"));
        assert_eq!(tasks[0].format, FileFormat::Png);

        let rejected: Vec<&PathBuf> = found
            .iter()
            .filter_map(|d| match d {
                Discovery::Rejected { path, .. } => Some(path),
                _ => None,
            })
            .collect();
        assert_eq!(rejected, vec![&dir.path().join("broken.png")]);
    }

    #[test]
    fn test_directories_need_recurse() {
        let dir = TempDir::new().unwrap();
        image::RgbImage::new(4, 4)
            .save(dir.path().join("a.png"))
            .unwrap();
        let config = Arc::new(Config::default());
        let timestamps = TimestampStore::new(&config);
        assert!(discover(dir.path(), &config, &timestamps).is_empty());

        // A file argument is fine without it
        let found = discover(&dir.path().join("a.png"), &config, &timestamps);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_archive_children_are_named_after_the_archive() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("ch1")).unwrap();
        image::RgbImage::new(4, 4)
            .save(dir.path().join("ch1").join("p1.png"))
            .unwrap();

        let config = Arc::new(Config::default().for_archive("book.cbz"));
        let timestamps = TimestampStore::new(&config);
        let found = discover(dir.path(), &config, &timestamps);
        match &found[..] {
            [Discovery::Task(task)] => {
                assert_eq!(task.display, format!("book.cbz:{}", Path::new("ch1").join("p1.png").display()));
                assert_eq!(task.archive_name(), Some("book.cbz"));
            }
            other => panic!("unexpected discovery {:?}", other),
        }
    }
}
