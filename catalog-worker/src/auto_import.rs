//! Intake directory watcher and job dispatch.
//!
//! Watches `raw/` for new catalog PDFs and supplier spreadsheets. Events are
//! debounced per path, then handed to a single worker thread that processes
//! files strictly one at a time in arrival order. Successful PDFs are moved to
//! `processed/` by the pipeline; failed jobs are moved to `raw/failed/` along
//! with their side files.

pub mod debounce;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Instant;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::{StorageLayout, WatcherConfig, WorkerConfig};
use crate::error::{WorkerError, WorkerResult};
use crate::ingestion::job::{file_name_of, target_skus_file_name};
use crate::ingestion::spreadsheet::{SpreadsheetIngestor, meta_path};
use crate::ingestion::{CatalogPipeline, move_file};

pub use debounce::Debouncer;

const PDF_EXTENSIONS: &[&str] = &["pdf"];
const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xls", "csv"];

/// What to do with a file that landed in the intake directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeKind {
    Pdf,
    Spreadsheet,
    /// Blank supplier templates dropped alongside real orders
    Template,
    /// Side files and anything unsupported
    Ignored,
}

/// Classify an intake file by extension and name.
pub fn classify_intake(path: &Path) -> IntakeKind {
    let Some(ext) = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
    else {
        return IntakeKind::Ignored;
    };

    if PDF_EXTENSIONS.contains(&ext.as_str()) {
        return IntakeKind::Pdf;
    }
    if !SPREADSHEET_EXTENSIONS.contains(&ext.as_str()) {
        return IntakeKind::Ignored;
    }

    let name = file_name_of(path);
    if name.contains("ECV") || name.to_lowercase().contains("template") {
        IntakeKind::Template
    } else {
        IntakeKind::Spreadsheet
    }
}

/// Handle to the extraction worker thread.
pub struct WorkerHandle {
    jobs: mpsc::UnboundedSender<PathBuf>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn jobs(&self) -> mpsc::UnboundedSender<PathBuf> {
        self.jobs.clone()
    }

    /// Stop accepting work and wait for the current job to finish.
    pub async fn shutdown(self) {
        let WorkerHandle { jobs, thread } = self;
        drop(jobs);
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => info!("Extraction worker stopped"),
            _ => error!("Extraction worker panicked"),
        }
    }
}

/// Start the extraction worker thread.
///
/// The detector, OCR engine and PDF library are loaded once inside the
/// thread. Returns once they are ready, or with the error that prevented it.
pub async fn start_worker(config: WorkerConfig) -> WorkerResult<WorkerHandle> {
    let (jobs, mut queue) = mpsc::unbounded_channel::<PathBuf>();
    let (ready_tx, ready_rx) = oneshot::channel::<WorkerResult<()>>();

    let thread = std::thread::Builder::new()
        .name("catalog-worker".to_string())
        .spawn(move || {
            let layout = StorageLayout::from(&config.storage);
            let pipeline = match CatalogPipeline::from_config(&config) {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let spreadsheets = SpreadsheetIngestor::new(&layout);
            let _ = ready_tx.send(Ok(()));
            info!("Extraction worker ready");

            while let Some(path) = queue.blocking_recv() {
                handle_intake(&pipeline, &spreadsheets, &layout, &path);
            }
        })
        .map_err(|e| WorkerError::Config {
            message: format!("Failed to spawn worker thread: {}", e),
        })?;

    match ready_rx.await {
        Ok(Ok(())) => Ok(WorkerHandle { jobs, thread }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(WorkerError::Config {
            message: "Worker thread exited during startup".to_string(),
        }),
    }
}

/// Process one ready intake file to completion.
fn handle_intake(
    pipeline: &CatalogPipeline,
    spreadsheets: &SpreadsheetIngestor,
    layout: &StorageLayout,
    path: &Path,
) {
    if !path.is_file() {
        debug!(file = %path.display(), "Intake file no longer present");
        return;
    }

    match classify_intake(path) {
        IntakeKind::Pdf => match pipeline.process_pdf(path) {
            Ok(outcome) => info!(
                file = %path.display(),
                items = outcome.items,
                missing = outcome.missing_skus,
                "PDF processed"
            ),
            Err(e) => {
                error!(file = %path.display(), error = %e.display_chain(), "PDF job failed");
                let side_file = layout
                    .intake_dir()
                    .join(target_skus_file_name(&file_name_of(path)));
                quarantine(path, &[side_file], &layout.failed_dir());
            }
        },
        IntakeKind::Spreadsheet => {
            if let Err(e) = spreadsheets.process(path) {
                error!(file = %path.display(), error = %e.display_chain(), "Spreadsheet job failed");
                quarantine(path, &[meta_path(path)], &layout.failed_dir());
            }
        }
        IntakeKind::Template => {
            info!(file = %path.display(), "Skipping template file");
        }
        IntakeKind::Ignored => {
            debug!(file = %path.display(), "Ignoring intake file");
        }
    }
}

/// Move a failed source file and any existing companion side files into the
/// quarantine directory.
fn quarantine(file_path: &Path, companions: &[PathBuf], failed_dir: &Path) {
    move_to_failed(file_path, failed_dir);
    for companion in companions.iter().filter(|p| p.is_file()) {
        move_to_failed(companion, failed_dir);
    }
}

/// Move a file to the failed/ directory, keeping its name.
fn move_to_failed(file_path: &Path, failed_dir: &Path) {
    if let Err(e) = std::fs::create_dir_all(failed_dir) {
        warn!(
            dest = %failed_dir.display(),
            error = %e,
            "Failed to create failed/ directory"
        );
        return;
    }

    let dest = failed_dir.join(file_name_of(file_path));
    match move_file(file_path, &dest) {
        Ok(()) => info!(file = %file_path.display(), dest = %dest.display(), "Moved to failed/"),
        Err(e) => warn!(
            file = %file_path.display(),
            dest = %dest.display(),
            error = %e,
            "Failed to move file to failed/, leaving in place"
        ),
    }
}

/// Files already waiting in the intake directory, sorted by path.
fn scan_intake(intake_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(intake_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && classify_intake(p) != IntakeKind::Ignored)
        .collect();
    files.sort();
    Ok(files)
}

/// Debounce decision for one raw notify event
fn apply_event(debouncer: &mut Debouncer, event: Event, now: Instant) {
    let arm = match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => false,
        EventKind::Create(_) | EventKind::Modify(_) => true,
        _ => return,
    };

    for path in event.paths {
        if classify_intake(&path) == IntakeKind::Ignored {
            continue;
        }
        if arm {
            debouncer.observe(path, now);
        } else if debouncer.cancel(&path) {
            debug!(file = %path.display(), "Pending intake file went away");
        }
    }
}

/// Watch the intake directory until `shutdown` resolves, sending each file to
/// `jobs` once its debounce period has elapsed.
pub async fn run_watcher(
    intake_dir: PathBuf,
    config: &WatcherConfig,
    jobs: mpsc::UnboundedSender<PathBuf>,
    shutdown: impl Future<Output = ()>,
) -> WorkerResult<()> {
    let (event_tx, mut events) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher = notify::recommended_watcher(move |res| {
        let _ = event_tx.send(res);
    })
    .map_err(|e| WorkerError::Config {
        message: format!("Failed to create file watcher: {}", e),
    })?;
    // failed/ lives below the intake directory and must not re-trigger jobs
    watcher
        .watch(&intake_dir, RecursiveMode::NonRecursive)
        .map_err(|e| WorkerError::Config {
            message: format!("Failed to watch {}: {}", intake_dir.display(), e),
        })?;
    info!(path = %intake_dir.display(), debounce_ms = config.debounce_ms, "Watching intake directory");

    if config.scan_on_startup {
        match scan_intake(&intake_dir) {
            Ok(existing) => {
                info!(files = existing.len(), "Queueing files found at startup");
                for path in existing {
                    let _ = jobs.send(path);
                }
            }
            Err(e) => warn!(error = %e, "Failed to scan intake directory"),
        }
    }

    let mut debouncer = Debouncer::new(config.debounce());
    tokio::pin!(shutdown);

    loop {
        let next_deadline = debouncer.next_deadline();
        let wait = async {
            match next_deadline {
                Some(deadline) => {
                    tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = &mut shutdown => {
                info!(pending = debouncer.len(), "Shutting down watcher");
                break;
            }
            event = events.recv() => match event {
                Some(Ok(event)) => apply_event(&mut debouncer, event, Instant::now()),
                Some(Err(e)) => warn!(error = %e, "File watcher error"),
                None => break,
            },
            _ = wait => {
                for path in debouncer.drain_ready(Instant::now()) {
                    debug!(file = %path.display(), "Intake file settled");
                    if jobs.send(path).is_err() {
                        error!("Extraction worker is gone, stopping watcher");
                        return Ok(());
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_classify_intake() {
        assert_eq!(classify_intake(Path::new("raw/cat.pdf")), IntakeKind::Pdf);
        assert_eq!(classify_intake(Path::new("raw/cat.PDF")), IntakeKind::Pdf);
        assert_eq!(classify_intake(Path::new("raw/order.xlsx")), IntakeKind::Spreadsheet);
        assert_eq!(classify_intake(Path::new("raw/order.XLS")), IntakeKind::Spreadsheet);
        assert_eq!(classify_intake(Path::new("raw/order.csv")), IntakeKind::Spreadsheet);

        assert_eq!(classify_intake(Path::new("raw/ECV_order.xlsx")), IntakeKind::Template);
        assert_eq!(classify_intake(Path::new("raw/Order_Template.csv")), IntakeKind::Template);
        // markers only matter for spreadsheets
        assert_eq!(classify_intake(Path::new("raw/template.pdf")), IntakeKind::Pdf);

        assert_eq!(
            classify_intake(Path::new("raw/target_skus_cat.pdf.json")),
            IntakeKind::Ignored
        );
        assert_eq!(
            classify_intake(Path::new("raw/order.xlsx.meta.json")),
            IntakeKind::Ignored
        );
        assert_eq!(classify_intake(Path::new("raw/README")), IntakeKind::Ignored);
        assert_eq!(classify_intake(Path::new("raw/photo.jpg")), IntakeKind::Ignored);
    }

    #[test]
    fn test_quarantine_moves_file_and_side_file() {
        let tmp = TempDir::new().unwrap();
        let layout = StorageLayout::new(tmp.path());
        layout.ensure_dirs().unwrap();

        let pdf = layout.intake_dir().join("bad.pdf");
        let side = layout.intake_dir().join("target_skus_bad.pdf.json");
        let absent = layout.intake_dir().join("nothing.json");
        std::fs::write(&pdf, b"%PDF").unwrap();
        std::fs::write(&side, br#"{"target_skus":["A"]}"#).unwrap();

        quarantine(&pdf, &[side.clone(), absent], &layout.failed_dir());

        assert!(!pdf.exists());
        assert!(!side.exists());
        assert!(layout.failed_dir().join("bad.pdf").exists());
        assert!(layout.failed_dir().join("target_skus_bad.pdf.json").exists());
    }

    #[test]
    fn test_quarantine_replaces_earlier_failure() {
        let tmp = TempDir::new().unwrap();
        let failed = tmp.path().join("failed");
        let pdf = tmp.path().join("bad.pdf");
        std::fs::create_dir_all(&failed).unwrap();
        std::fs::write(failed.join("bad.pdf"), b"old").unwrap();
        std::fs::write(&pdf, b"new").unwrap();

        quarantine(&pdf, &[], &failed);

        assert_eq!(std::fs::read(failed.join("bad.pdf")).unwrap(), b"new");
    }

    #[test]
    fn test_scan_intake_skips_side_files_and_subdirectories() {
        let tmp = TempDir::new().unwrap();
        let layout = StorageLayout::new(tmp.path());
        layout.ensure_dirs().unwrap();
        let intake = layout.intake_dir();

        for name in ["b.pdf", "a.csv", "target_skus_b.pdf.json", "notes.txt"] {
            std::fs::write(intake.join(name), b"x").unwrap();
        }
        std::fs::write(layout.failed_dir().join("c.pdf"), b"x").unwrap();

        let files = scan_intake(&intake).unwrap();
        assert_eq!(files, vec![intake.join("a.csv"), intake.join("b.pdf")]);
    }

    #[test]
    fn test_events_arm_and_cancel_debounce() {
        let now = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(1000));
        let pdf = PathBuf::from("/shared/raw/cat.pdf");

        apply_event(
            &mut debouncer,
            Event::new(EventKind::Create(CreateKind::File)).add_path(pdf.clone()),
            now,
        );
        apply_event(
            &mut debouncer,
            Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                .add_path(pdf.clone()),
            now,
        );
        apply_event(
            &mut debouncer,
            Event::new(EventKind::Create(CreateKind::File))
                .add_path(PathBuf::from("/shared/raw/target_skus_cat.pdf.json")),
            now,
        );
        assert_eq!(debouncer.len(), 1);

        apply_event(
            &mut debouncer,
            Event::new(EventKind::Remove(RemoveKind::File)).add_path(pdf),
            now,
        );
        assert!(debouncer.is_empty());
    }
}
