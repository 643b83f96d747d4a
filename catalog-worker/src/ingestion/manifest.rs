//! Per-document manifest of extracted regions.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use uuid::Uuid;

use crate::error::{ProcessingError, WorkerResult};

use super::detection::RegionSource;
use super::geometry::PixelBox;

/// How a manifest entry's region was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Paired with a target SKU's text occurrence
    TargetedMatch,
    Learned,
    Contour,
}

impl From<RegionSource> for DetectionMethod {
    fn from(source: RegionSource) -> Self {
        match source {
            RegionSource::Learned => DetectionMethod::Learned,
            RegionSource::Contour => DetectionMethod::Contour,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestMode {
    Targeted,
    Auto,
}

/// One extracted region.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManifestEntry {
    pub uuid: Uuid,
    pub file_path: PathBuf,
    /// 1-based
    pub source_page: u32,
    pub source_page_image_path: PathBuf,
    pub source_page_dims: [u32; 2],
    /// Final crop box, after padding and clamping
    #[serde(rename = "box")]
    pub bounds: PixelBox,
    pub detection_method: DetectionMethod,
    pub detected_sku: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_name: Option<String>,
}

/// Final manifest written once per document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub items: Vec<ManifestEntry>,
    pub missing_skus: Vec<String>,
    pub mode: ManifestMode,
}

/// Accumulates entries across pages and tracks which target SKUs were found.
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    items: Vec<ManifestEntry>,
    found_skus: HashSet<String>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. A targeted match also marks its SKU as found, so a SKU
    /// listed in `items` never shows up in `missing_skus`.
    pub fn push(&mut self, entry: ManifestEntry) {
        if entry.detection_method == DetectionMethod::TargetedMatch {
            self.found_skus.insert(entry.detected_sku.clone());
        }
        self.items.push(entry);
    }

    /// Close the manifest.
    ///
    /// `target_skus` is `None` in auto mode. In targeted mode, `missing_skus`
    /// keeps target order and lists each unfound SKU once.
    pub fn finish(self, target_skus: Option<&[String]>) -> Manifest {
        let Some(targets) = target_skus else {
            return Manifest {
                items: self.items,
                missing_skus: Vec::new(),
                mode: ManifestMode::Auto,
            };
        };

        let mut seen = HashSet::new();
        let missing_skus = targets
            .iter()
            .filter(|sku| !self.found_skus.contains(sku.as_str()))
            .filter(|sku| seen.insert(sku.as_str()))
            .cloned()
            .collect();

        Manifest {
            items: self.items,
            missing_skus,
            mode: ManifestMode::Targeted,
        }
    }
}

/// `manifest_<filename>.json`. Reprocessing a same-named file overwrites it.
pub fn manifest_file_name(source_file_name: &str) -> String {
    format!("manifest_{}.json", source_file_name)
}

/// Write a manifest as pretty-printed JSON.
pub fn write_manifest(manifest: &Manifest, path: &Path) -> WorkerResult<()> {
    let json = serde_json::to_vec_pretty(manifest).map_err(|e| ProcessingError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    std::fs::write(path, json).map_err(|e| ProcessingError::io(path, e))?;
    Ok(())
}
