//! Job records built once at intake.
//!
//! A PDF runs in targeted mode when `target_skus_<filename>.json` sits next
//! to it in the intake directory and lists at least one SKU, and in auto
//! mode otherwise. The mode is fixed for the whole run.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{ProcessingError, WorkerResult};

/// Side file body: `{"target_skus": ["...", ...]}`
#[derive(Debug, Deserialize)]
struct TargetSkuFile {
    #[serde(default)]
    target_skus: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionMode {
    /// Locate known SKUs
    Targeted { target_skus: Vec<String> },
    /// Crop every detected region and guess its SKU with OCR
    Auto,
}

/// One PDF processing run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub source_path: PathBuf,
    pub file_name: String,
    /// Side file found at intake, whatever its contents. Removed once the
    /// job succeeds.
    pub side_file: Option<PathBuf>,
    pub mode: ExtractionMode,
}

impl Job {
    /// Build a job for a PDF that landed in `intake_dir`.
    ///
    /// A side file that is missing, unparseable or lists no SKUs selects auto
    /// mode.
    pub fn from_intake(source_path: &Path, intake_dir: &Path) -> WorkerResult<Job> {
        let file_name = file_name_of(source_path);
        let side_path = intake_dir.join(target_skus_file_name(&file_name));
        let listed = read_target_skus(&side_path)?;

        let mode = match &listed {
            Some(target_skus) if !target_skus.is_empty() => {
                info!(
                    file = %file_name,
                    skus = target_skus.len(),
                    "Targeted extraction mode"
                );
                ExtractionMode::Targeted {
                    target_skus: target_skus.clone(),
                }
            }
            // An empty or unparseable list still leaves its side file behind;
            // relocate removes it with the PDF.
            _ => {
                info!(file = %file_name, "Auto discovery mode");
                ExtractionMode::Auto
            }
        };

        Ok(Job {
            source_path: source_path.to_path_buf(),
            file_name,
            side_file: listed.map(|_| side_path),
            mode,
        })
    }

    /// Target SKUs in targeted mode, `None` in auto mode.
    pub fn target_skus(&self) -> Option<&[String]> {
        match &self.mode {
            ExtractionMode::Targeted { target_skus, .. } => Some(target_skus),
            ExtractionMode::Auto => None,
        }
    }

}

/// `target_skus_<filename>.json`
pub fn target_skus_file_name(source_file_name: &str) -> String {
    format!("target_skus_{}.json", source_file_name)
}

pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// `None` when no side file exists. An unparseable file reads as an empty
/// list.
fn read_target_skus(side_file: &Path) -> WorkerResult<Option<Vec<String>>> {
    let bytes = match std::fs::read(side_file) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(ProcessingError::io(side_file, e).into()),
    };

    match serde_json::from_slice::<TargetSkuFile>(&bytes) {
        Ok(parsed) => Ok(Some(parsed.target_skus)),
        Err(e) => {
            warn!(
                path = %side_file.display(),
                error = %e,
                "Ignoring unparseable target SKU file"
            );
            Ok(Some(Vec::new()))
        }
    }
}
