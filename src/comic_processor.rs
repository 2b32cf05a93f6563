//! # Comic Archive Processing Module
//!
//! Questo modulo gestisce l'ottimizzazione degli archivi fumetto (CBZ/CBR).
//!
//! ## Responsabilità:
//! - Estrae l'archivio in una scratch directory dedicata
//! - Sottomette il contenuto allo stesso `Scheduler` (anche archivi annidati)
//! - Attende i figli senza occupare un worker
//! - Ricrea l'archivio in formato CBZ e lo sostituisce se più piccolo
//! - Rimuove sempre la scratch directory
//!
//! ## Stati:
//! ```text
//! Created → Extracting → Dispatched → AwaitingChildren → Repackaging → Cleanup → Done
//!                                   (qualsiasi errore) → Error
//! ```
//!
//! ## Formati:
//! - **CBZ**: estratto e ricreato con il crate `zip`
//! - **CBR**: estratto con il programma esterno `unrar`, ricreato come CBZ

use crate::classifier::FileFormat;
use crate::error::{OptimizeError, Result};
use crate::file_manager::{discover, Discovery, FileManager, SCRATCH_PREFIX};
use crate::optimizer::{OptimizationOutcome, Scheduler, Task, TaskHandle};
use crate::state::TimestampStore;
use crate::tool_resolver::ToolPathResolver;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tempfile::TempPath;
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Lifecycle of one archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveState {
    Created,
    Extracting,
    Dispatched,
    AwaitingChildren,
    Repackaging,
    Cleanup,
    Done,
    Error,
}

/// Extraction workspace owned by exactly one archive job.
///
/// Jobs call [`ScratchDir::remove`] when they finish. Dropping a directory
/// that was never removed falls back to a blocking removal.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    removed: bool,
}

impl ScratchDir {
    /// `<parent>/picopt_tmp_<archive file name>`, recreated if stale
    pub async fn create(archive: &Path) -> Result<Self> {
        let path = Self::path_for(archive)?;
        if tokio::fs::try_exists(&path).await? {
            debug!("Removing stale scratch dir {}", path.display());
            tokio::fs::remove_dir_all(&path).await?;
        }
        tokio::fs::create_dir(&path).await?;
        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path_for(archive: &Path) -> Result<PathBuf> {
        let name = archive
            .file_name()
            .ok_or_else(|| OptimizeError::archive(archive, "no file name"))?;
        let mut dir_name = std::ffi::OsString::from(SCRATCH_PREFIX);
        dir_name.push(name);
        Ok(archive
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(dir_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(mut self) -> Result<()> {
        self.removed = true;
        tokio::fs::remove_dir_all(&self.path).await?;
        Ok(())
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if self.path.exists() {
                warn!("Could not remove {}: {}", self.path.display(), e);
            }
        }
    }
}

/// One comic archive being optimized
#[derive(Debug)]
pub struct ArchiveJob {
    pub archive_path: PathBuf,
    pub scratch: ScratchDir,
    pub children: Vec<TaskHandle>,
    state: ArchiveState,
}

impl ArchiveJob {
    pub async fn new(archive_path: &Path) -> Result<Self> {
        Ok(Self {
            archive_path: archive_path.to_path_buf(),
            scratch: ScratchDir::create(archive_path).await?,
            children: Vec::new(),
            state: ArchiveState::Created,
        })
    }

    fn transition(&mut self, next: ArchiveState) {
        debug!(
            "{}: {:?} -> {:?}",
            self.archive_path.display(),
            self.state,
            next
        );
        self.state = next;
    }

    async fn run(&mut self, scheduler: &Scheduler, task: &Task) -> Result<OptimizationOutcome> {
        let bytes_in = FileManager::file_size(&task.path).await?;
        let archive_name = task
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| task.display.clone());

        {
            let _permit = scheduler.acquire().await?;
            self.transition(ArchiveState::Extracting);
            info!("Extracting {}...", task.display);
            extract(task.format, &self.archive_path, self.scratch.path(), scheduler.resolver()).await?;
        }

        self.transition(ArchiveState::Dispatched);
        let child_config = Arc::new(task.config.for_archive(&archive_name));
        let root = self.scratch.path().to_path_buf();
        let discovered = tokio::task::spawn_blocking(move || {
            let timestamps = TimestampStore::default();
            discover(&root, &child_config, &timestamps)
        })
        .await?;

        for discovery in discovered {
            match discovery {
                Discovery::Task(child) => self.children.push(scheduler.submit(child)),
                Discovery::Rejected { path, error } => scheduler.record_rejected(&path, &error),
            }
        }

        self.transition(ArchiveState::AwaitingChildren);
        let outcomes =
            futures::future::join_all(self.children.drain(..).map(TaskHandle::wait)).await;
        let failed = outcomes.iter().filter(|o| o.is_error()).count();
        if failed > 0 {
            warn!("{}: {} file(s) inside could not be optimized", task.display, failed);
        }

        let _permit = scheduler.acquire().await?;
        self.transition(ArchiveState::Repackaging);
        let candidate = FileManager::temp_output(&task.path, FileFormat::Cbz)?;
        let candidate = repack(self.scratch.path().to_path_buf(), candidate).await?;
        let bytes_out = FileManager::file_size(&candidate).await?;

        self.transition(ArchiveState::Cleanup);
        let mut outcome = OptimizationOutcome::unchanged(task, bytes_in);
        if !FileManager::should_replace(bytes_in, bytes_out, task.config.bigger) {
            return Ok(outcome);
        }
        outcome.bytes_out = bytes_out;
        if task.config.dry_run {
            return Ok(outcome);
        }

        let final_path = FileManager::final_path(&task.path, task.format, FileFormat::Cbz);
        FileManager::replace_file(&task.path, candidate, &final_path).await?;
        outcome.path = final_path;
        outcome.replaced = true;
        Ok(outcome)
    }
}

/// Extract, re-optimize the contents, repack and replace one archive.
///
/// The caller holds no worker permit: one is taken for extraction and one
/// for repacking, never while the children run.
pub async fn optimize_archive(scheduler: &Scheduler, task: &Task) -> Result<OptimizationOutcome> {
    let mut job = ArchiveJob::new(&task.path).await?;
    let result = job.run(scheduler, task).await;
    match result {
        Ok(_) => job.transition(ArchiveState::Done),
        Err(ref e) => {
            job.transition(ArchiveState::Error);
            debug!("{}: {}", task.display, e);
        }
    }
    if let Err(e) = job.scratch.remove().await {
        warn!("Could not remove scratch dir for {}: {}", task.display, e);
    }
    result
}

/// Unpack `archive` into `scratch`
pub async fn extract(
    format: FileFormat,
    archive: &Path,
    scratch: &Path,
    resolver: &ToolPathResolver,
) -> Result<()> {
    match format {
        FileFormat::Cbz => {
            let archive = archive.to_path_buf();
            let scratch = scratch.to_path_buf();
            tokio::task::spawn_blocking(move || extract_cbz(&archive, &scratch)).await?
        }
        FileFormat::Cbr => extract_cbr(archive, scratch, resolver).await,
        other => Err(OptimizeError::archive(
            archive,
            format!("{} is not a good format", other),
        )),
    }
}

fn extract_cbz(archive: &Path, scratch: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(BufReader::new(file))
        .map_err(|e| OptimizeError::archive(archive, e))?;
    debug!("extracting {:?} to {:?}", archive, scratch);
    zip.extract(scratch)
        .map_err(|e| OptimizeError::archive(archive, e))?;
    Ok(())
}

async fn extract_cbr(archive: &Path, scratch: &Path, resolver: &ToolPathResolver) -> Result<()> {
    let unrar = resolver
        .resolve_program("unrar")
        .ok_or_else(|| OptimizeError::archive(archive, "unrar is not available"))?;

    let mut destination = scratch.as_os_str().to_os_string();
    destination.push(std::path::MAIN_SEPARATOR_STR);

    let status = Command::new(unrar)
        .arg("x")
        .arg("-o+")
        .arg("-idq")
        .arg(archive)
        .arg(destination)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if status.success() {
        Ok(())
    } else {
        Err(OptimizeError::archive(archive, format!("unrar exited with {}", status)))
    }
}

/// Zip the scratch directory into `output`, paths relative to the scratch root
pub async fn repack(scratch: PathBuf, output: TempPath) -> Result<TempPath> {
    tokio::task::spawn_blocking(move || {
        write_cbz(&scratch, &output)?;
        Ok(output)
    })
    .await?
}

fn write_cbz(scratch: &Path, output: &Path) -> Result<()> {
    let file = File::create(output)?;
    let mut zipper = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(scratch).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| OptimizeError::archive(scratch, e))?;
        let relative = entry
            .path()
            .strip_prefix(scratch)
            .map_err(|e| OptimizeError::archive(scratch, e))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_file() {
            debug!("add to archive: {}", name);
            zipper.start_file(name, options)?;
            let mut source = File::open(entry.path())?;
            std::io::copy(&mut source, &mut zipper)?;
        } else if entry.file_type().is_dir() {
            zipper.add_directory(name, options)?;
        }
    }

    zipper.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classification;
    use crate::config::{Config, ToolToggles};
    use crate::progress::{Reporter, Totals};
    use std::collections::BTreeMap;
    use std::io::{Read, Write};
    use tempfile::TempDir;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn read_zip(path: &Path) -> BTreeMap<String, Vec<u8>> {
        let mut zip = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut contents = BTreeMap::new();
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).unwrap();
            if entry.is_dir() {
                continue;
            }
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            contents.insert(entry.name().to_string(), data);
        }
        contents
    }

    fn png_bytes(width: u32) -> Vec<u8> {
        let mut buffer = std::io::Cursor::new(Vec::new());
        image::RgbImage::new(width, 3)
            .write_to(&mut buffer, image::ImageOutputFormat::Png)
            .unwrap();
        buffer.into_inner()
    }

    fn scheduler(config: &Config) -> Scheduler {
        Scheduler::new(
            1,
            Arc::new(ToolPathResolver::probe(config)),
            Arc::new(Totals::new()),
            Reporter::silent(),
        )
    }

    fn archive_task(path: &Path, format: FileFormat, config: Config) -> Task {
        Task::new(
            path.to_path_buf(),
            Classification {
                format,
                sequenced: false,
            },
            Arc::new(config),
            path.display().to_string(),
        )
    }

    #[tokio::test]
    async fn test_scratch_dir_is_named_after_the_archive_and_removed() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("book.cbz");
        let stale = dir.path().join("picopt_tmp_book.cbz");
        std::fs::create_dir(&stale).unwrap();
        std::fs::write(stale.join("leftover"), b"x").unwrap();

        let scratch = ScratchDir::create(&archive).await.unwrap();
        assert_eq!(scratch.path(), stale.as_path());
        assert!(!stale.join("leftover").exists());
        std::fs::create_dir(stale.join("ch1")).unwrap();
        std::fs::write(stale.join("ch1").join("p1.png"), b"page").unwrap();
        scratch.remove().await.unwrap();
        assert!(!stale.exists());

        // Dropped without remove: still cleaned up
        let scratch = ScratchDir::create(&archive).await.unwrap();
        assert!(stale.exists());
        drop(scratch);
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn test_round_trip_with_all_tools_disabled_keeps_contents() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("book.cbz");
        let page1 = png_bytes(4);
        let page2 = png_bytes(7);
        let notes = vec![b'a'; 4096];
        write_zip(
            &archive,
            &[
                ("ch1/p1.png", &page1),
                ("ch1/p2.png", &page2),
                ("notes.txt", &notes),
            ],
        );
        let before = read_zip(&archive);

        let config = Config {
            comics: true,
            bigger: true,
            tools: ToolToggles::none(),
            ..Config::default()
        };
        let scheduler = scheduler(&config);
        let task = archive_task(&archive, FileFormat::Cbz, config);

        let outcome = optimize_archive(&scheduler, &task).await.unwrap();
        scheduler.drain().await;

        assert!(outcome.error.is_none());
        assert_eq!(read_zip(&outcome.path), before);
        assert!(!dir.path().join("picopt_tmp_book.cbz").exists());
        // Two pages went through the scheduler
        assert_eq!(scheduler.totals().snapshot().files, 2);
    }

    fn dir_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_nested_archive_round_trips_through_the_scheduler() {
        let dir = TempDir::new().unwrap();
        let pages = [png_bytes(3), png_bytes(5)];
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let mut inner = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (i, page) in pages.iter().enumerate() {
            inner.start_file(format!("p{}.png", i), options).unwrap();
            inner.write_all(page).unwrap();
        }
        let inner = inner.finish().unwrap().into_inner();
        let cover = png_bytes(9);

        let archive = dir.path().join("book.cbz");
        write_zip(&archive, &[("cover.png", &cover), ("vol/inner.cbz", &inner)]);

        let config = Config {
            comics: true,
            bigger: true,
            tools: ToolToggles::none(),
            ..Config::default()
        };
        let scheduler = scheduler(&config);
        let handle = scheduler.submit(archive_task(&archive, FileFormat::Cbz, config));
        tokio::time::timeout(std::time::Duration::from_secs(30), scheduler.drain())
            .await
            .expect("nested archive pipeline deadlocked");
        let outcome = handle.wait().await;
        assert!(outcome.error.is_none(), "{:?}", outcome.error);

        let outer = read_zip(&outcome.path);
        assert_eq!(outer.len(), 2);
        assert_eq!(outer["cover.png"], cover);

        let unpacked = TempDir::new().unwrap();
        let inner_copy = unpacked.path().join("inner.cbz");
        std::fs::write(&inner_copy, &outer["vol/inner.cbz"]).unwrap();
        let inner_contents = read_zip(&inner_copy);
        assert_eq!(inner_contents.len(), 2);
        assert_eq!(inner_contents["p0.png"], pages[0]);
        assert_eq!(inner_contents["p1.png"], pages[1]);

        // No scratch dir or temporary output left behind at either level
        assert_eq!(dir_names(dir.path()), vec!["book.cbz".to_string()]);
        // outer, inner, cover and two pages
        assert_eq!(scheduler.totals().snapshot().files, 5);
        assert_eq!(scheduler.totals().snapshot().failures, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cbr_is_extracted_with_unrar_and_repacked_as_cbz() {
        use crate::tool_runner::test_support::install_script;

        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("book.cbr");
        std::fs::write(&archive, b"Rar!\x1a\x07\x00").unwrap();
        let tools = TempDir::new().unwrap();
        // unrar x -o+ -idq ARCHIVE DEST/
        install_script(
            tools.path(),
            "unrar",
            r#"for last; do :; done
mkdir -p "${last}ch1"; printf 'page' > "${last}ch1/p1.txt""#,
        );

        let config = Config {
            comics: true,
            bigger: true,
            tools: ToolToggles::none(),
            tools_dir: Some(tools.path().to_path_buf()),
            ..Config::default()
        };
        let scheduler = scheduler(&config);
        let task = archive_task(&archive, FileFormat::Cbr, config);
        let outcome = optimize_archive(&scheduler, &task).await.unwrap();
        scheduler.drain().await;

        assert!(outcome.replaced);
        assert_eq!(outcome.path, dir.path().join("book.cbz"));
        assert!(!archive.exists());
        let expected = BTreeMap::from([("ch1/p1.txt".to_string(), b"page".to_vec())]);
        assert_eq!(read_zip(&outcome.path), expected);
        assert_eq!(dir_names(dir.path()), vec!["book.cbz".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_archive_is_an_error_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("broken.cbz");
        std::fs::write(&archive, b"PK\x03\x04 definitely not a zip").unwrap();

        let config = Config {
            comics: true,
            tools: ToolToggles::none(),
            ..Config::default()
        };
        let scheduler = scheduler(&config);
        let task = archive_task(&archive, FileFormat::Cbz, config);

        let err = optimize_archive(&scheduler, &task).await.unwrap_err();
        assert!(matches!(err, OptimizeError::Archive { .. }));
        assert!(!dir.path().join("picopt_tmp_broken.cbz").exists());
        assert_eq!(std::fs::read(&archive).unwrap(), b"PK\x03\x04 definitely not a zip");
    }

    #[tokio::test]
    async fn test_scheduled_archive_with_one_worker_does_not_deadlock() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("book.cbz");
        let pages: Vec<Vec<u8>> = (1..6).map(png_bytes).collect();
        let entries: Vec<(String, &[u8])> = pages
            .iter()
            .enumerate()
            .map(|(i, p)| (format!("p{}.png", i), p.as_slice()))
            .collect();
        let entries: Vec<(&str, &[u8])> = entries.iter().map(|(n, d)| (n.as_str(), *d)).collect();
        write_zip(&archive, &entries);

        let config = Config {
            comics: true,
            tools: ToolToggles::none(),
            ..Config::default()
        };
        let scheduler = scheduler(&config);
        let handle = scheduler.submit(archive_task(&archive, FileFormat::Cbz, config));

        tokio::time::timeout(std::time::Duration::from_secs(30), scheduler.drain())
            .await
            .expect("archive pipeline deadlocked");
        let outcome = handle.wait().await;
        assert!(outcome.error.is_none(), "{:?}", outcome.error);

        let totals = scheduler.totals().snapshot();
        assert_eq!(totals.files, 6);
        // Only the archive itself counts
        assert_eq!(totals.bytes_in, outcome.bytes_in);
    }

    #[tokio::test]
    async fn test_cbr_without_unrar_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("book.cbr");
        std::fs::write(&archive, b"Rar!\x1a\x07\x00").unwrap();
        let empty_tools = TempDir::new().unwrap();

        let config = Config {
            comics: true,
            tools: ToolToggles::none(),
            tools_dir: Some(empty_tools.path().to_path_buf()),
            ..Config::default()
        };
        let resolver = ToolPathResolver::probe(&config);
        if resolver.resolve_program("unrar").is_some() {
            // A real unrar would report the truncated archive instead
            return;
        }

        let scheduler = scheduler(&config);
        let task = archive_task(&archive, FileFormat::Cbr, config);
        let err = optimize_archive(&scheduler, &task).await.unwrap_err();
        assert!(err.to_string().contains("unrar"));
        assert!(archive.exists());
    }
}
