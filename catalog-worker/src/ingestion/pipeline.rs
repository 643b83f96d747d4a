//! Per-document extraction pipeline.
//!
//! For every page, in order: render, detect candidate regions, persist the
//! full-page raster, then either match target SKUs to regions (targeted mode)
//! or crop and OCR every region (auto mode). After the last page the manifest
//! is written, the target SKU side file is removed and the source PDF is moved
//! into the processed directory.
//!
//! Any error aborts the whole document. Nothing is relocated in that case;
//! quarantine is the caller's decision.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{StorageLayout, WorkerConfig};
use crate::error::{ProcessingError, WorkerResult};

use super::detection::{CandidateRegion, ObjectDetector, VisualRegionDetector, YoloDetector};
use super::extraction::{RegionExtractor, SavedPage};
use super::job::{ExtractionMode, Job, file_name_of};
use super::manifest::{
    DetectionMethod, ManifestBuilder, ManifestEntry, manifest_file_name, write_manifest,
};
use super::matching::{TargetMatcher, TextHit};
use super::ocr::{AutoSkuExtractor, OcrEngine, TesseractOcr};
use super::pdf::{PageRasterizer, PdfiumRasterizer, RasterDocument};
use super::reconcile::CoordinateReconciler;
use super::{RasterPage, move_file};

/// Summary of a finished document.
#[derive(Debug, Clone, PartialEq)]
pub struct PdfOutcome {
    pub manifest_path: PathBuf,
    pub items: usize,
    pub missing_skus: usize,
}

/// Body of `progress_<filename>.json`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobProgress {
    Processing {
        page: u32,
        total_pages: u32,
        message: String,
    },
    Failed {
        message: String,
    },
}

#[derive(Serialize)]
struct ProgressRecord<'a> {
    #[serde(flatten)]
    progress: &'a JobProgress,
    updated_at: DateTime<Utc>,
}

/// Progress side file polled by the downstream consumer while the manifest
/// does not exist yet.
#[derive(Debug, Clone)]
pub struct ProgressFile {
    path: PathBuf,
}

impl ProgressFile {
    pub fn new(processed_dir: &Path, source_file_name: &str) -> Self {
        Self {
            path: processed_dir.join(format!("progress_{}.json", source_file_name)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, progress: &JobProgress) -> WorkerResult<()> {
        let record = ProgressRecord {
            progress,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_vec(&record).map_err(|e| ProcessingError::Json {
            path: self.path.clone(),
            source: e,
        })?;
        std::fs::write(&self.path, json).map_err(|e| ProcessingError::io(&self.path, e))?;
        Ok(())
    }

    pub fn remove(&self) -> WorkerResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProcessingError::io(&self.path, e).into()),
        }
    }
}

/// Everything a page needs to turn regions into manifest entries.
struct PageContext<'a> {
    number: u32,
    raster: &'a RasterPage,
    saved: &'a SavedPage,
    candidates: &'a [CandidateRegion],
}

/// Catalog PDF extraction pipeline. Collaborators are built once and reused
/// for every document.
pub struct CatalogPipeline {
    layout: StorageLayout,
    rasterizer: Box<dyn PageRasterizer>,
    regions: VisualRegionDetector,
    matcher: TargetMatcher,
    extractor: RegionExtractor,
    auto_sku: AutoSkuExtractor,
}

impl CatalogPipeline {
    pub fn new(
        config: &WorkerConfig,
        rasterizer: Box<dyn PageRasterizer>,
        detector: Box<dyn ObjectDetector>,
        ocr: Box<dyn OcrEngine>,
    ) -> Self {
        let layout = StorageLayout::from(&config.storage);
        Self {
            regions: VisualRegionDetector::new(detector, &config.detection),
            matcher: TargetMatcher::new(config.matching.max_distance_ratio),
            extractor: RegionExtractor::new(&config.extraction, &layout),
            auto_sku: AutoSkuExtractor::new(ocr),
            rasterizer,
            layout,
        }
    }

    /// Build the pipeline with pdfium, the YOLO model and Tesseract.
    pub fn from_config(config: &WorkerConfig) -> WorkerResult<Self> {
        let rasterizer = PdfiumRasterizer::new(&config.render)?;
        let detector = YoloDetector::load(&config.detection)?;
        let ocr = TesseractOcr::new(&config.ocr)?;
        Ok(Self::new(
            config,
            Box::new(rasterizer),
            Box::new(detector),
            Box::new(ocr),
        ))
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Process one PDF from the intake directory.
    ///
    /// On failure the progress file is marked failed and the error returned;
    /// the source file stays where it is.
    pub fn process_pdf(&self, source_path: &Path) -> WorkerResult<PdfOutcome> {
        let progress = ProgressFile::new(
            &self.layout.processed_dir(),
            &file_name_of(source_path),
        );

        let result = Job::from_intake(source_path, &self.layout.intake_dir())
            .and_then(|job| self.run(&job, &progress));
        if let Err(e) = &result {
            let failed = JobProgress::Failed {
                message: e.display_chain(),
            };
            if let Err(write_err) = progress.write(&failed) {
                warn!(
                    path = %progress.path().display(),
                    error = %write_err.display_chain(),
                    "Failed to record job failure"
                );
            }
        }
        result
    }

    fn run(&self, job: &Job, progress: &ProgressFile) -> WorkerResult<PdfOutcome> {
        let document = self.rasterizer.open(&job.source_path)?;
        let total_pages = u32::from(document.page_count());
        info!(file = %job.file_name, pages = total_pages, "Processing PDF");

        let mut builder = ManifestBuilder::new();
        for index in 0..document.page_count() {
            let number = u32::from(index) + 1;
            progress.write(&JobProgress::Processing {
                page: number,
                total_pages,
                message: format!("Processing page {} of {}", number, total_pages),
            })?;
            info!(file = %job.file_name, page = number, total = total_pages, "Processing page");

            let raster = document.render_page(index)?;
            let candidates = self.regions.detect(&raster.image)?;
            let saved = self.extractor.save_page(&raster.image)?;
            debug!(page = number, candidates = candidates.len(), "Detected regions");

            let page = PageContext {
                number,
                raster: &raster,
                saved: &saved,
                candidates: &candidates,
            };
            match &job.mode {
                ExtractionMode::Targeted { target_skus, .. } => self.extract_targeted(
                    document.as_ref(),
                    index,
                    &page,
                    target_skus,
                    &mut builder,
                )?,
                ExtractionMode::Auto => self.extract_auto(&page, &mut builder)?,
            }
        }

        let manifest = builder.finish(job.target_skus());
        let manifest_path = self
            .layout
            .processed_dir()
            .join(manifest_file_name(&job.file_name));
        write_manifest(&manifest, &manifest_path)?;
        progress.remove()?;
        info!(
            path = %manifest_path.display(),
            items = manifest.items.len(),
            missing = manifest.missing_skus.len(),
            "Manifest created"
        );

        self.relocate(job)?;

        Ok(PdfOutcome {
            manifest_path,
            items: manifest.items.len(),
            missing_skus: manifest.missing_skus.len(),
        })
    }

    fn extract_targeted(
        &self,
        document: &dyn RasterDocument,
        index: u16,
        page: &PageContext<'_>,
        target_skus: &[String],
        builder: &mut ManifestBuilder,
    ) -> WorkerResult<()> {
        let reconciler = CoordinateReconciler::new(
            page.raster.vector_width,
            page.raster.vector_height,
            page.raster.image.width(),
            page.raster.image.height(),
        );

        let mut queried = HashSet::new();
        let mut hits = Vec::new();
        for sku in target_skus {
            if !queried.insert(sku.as_str()) {
                continue;
            }
            for rect in document.search_text(index, sku)? {
                hits.push(TextHit {
                    sku: sku.clone(),
                    rect,
                });
            }
        }

        let matches = self.matcher.match_page(
            &hits,
            &reconciler,
            page.candidates,
            page.raster.image.height(),
        );

        for matched in matches {
            let Some(region) = self
                .extractor
                .extract(&page.raster.image, matched.region.bounds)?
            else {
                continue;
            };

            builder.push(ManifestEntry {
                uuid: region.uuid,
                file_path: region.path,
                source_page: page.number,
                source_page_image_path: page.saved.path.clone(),
                source_page_dims: [page.saved.width, page.saved.height],
                bounds: region.bounds,
                detection_method: DetectionMethod::TargetedMatch,
                detected_name: Some(format!("Matched {}", matched.assigned_sku)),
                detected_sku: matched.assigned_sku,
                detected_text: None,
            });
        }
        Ok(())
    }

    fn extract_auto(&self, page: &PageContext<'_>, builder: &mut ManifestBuilder) -> WorkerResult<()> {
        for candidate in page.candidates {
            let Some(region) = self
                .extractor
                .extract(&page.raster.image, candidate.bounds)?
            else {
                continue;
            };

            let ocr = self.auto_sku.extract(&region.crop)?;
            builder.push(ManifestEntry {
                uuid: region.uuid,
                file_path: region.path,
                source_page: page.number,
                source_page_image_path: page.saved.path.clone(),
                source_page_dims: [page.saved.width, page.saved.height],
                bounds: region.bounds,
                detection_method: DetectionMethod::from(candidate.source),
                detected_sku: ocr.detected_sku,
                detected_text: Some(ocr.detected_text),
                detected_name: None,
            });
        }
        Ok(())
    }

    /// Drop the consumed side file and move the PDF out of the intake
    /// directory, replacing any same-named processed file.
    fn relocate(&self, job: &Job) -> WorkerResult<()> {
        if let Some(side_file) = &job.side_file {
            match std::fs::remove_file(side_file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(ProcessingError::io(side_file, e).into()),
            }
        }

        let dest = self.layout.processed_dir().join(&job.file_name);
        move_file(&job.source_path, &dest).map_err(|e| ProcessingError::io(&job.source_path, e))?;
        info!(dest = %dest.display(), "Moved processed file");
        Ok(())
    }
}
