use std::path::PathBuf;

use thiserror::Error;

/// Main worker error type.
///
/// Every variant is fatal for the job that produced it. Recoverable conditions
/// (skipped spreadsheet rows, unmatched SKU occurrences) are modelled as
/// outcomes by the code that handles them and never become a `WorkerError`.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Document processing failed")]
    Processing(#[from] ProcessingError),

    #[error("Region detection failed")]
    Detection(#[from] DetectionError),

    #[error("OCR failed")]
    Ocr(#[from] OcrError),

    #[error("Spreadsheet ingestion failed")]
    Spreadsheet(#[from] SpreadsheetError),

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl WorkerError {
    /// The error and all of its sources, joined with `: `.
    pub fn display_chain(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

/// Document processing errors
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Failed to load PDFium library: {message}")]
    Pdfium { message: String },

    #[error("Failed to load PDF {path}")]
    PdfLoad {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to rasterize page {page}")]
    Rasterize {
        page: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to search text on page {page}")]
    TextSearch {
        page: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Failed to encode image {path}")]
    ImageEncode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Invalid JSON in {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("IO error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessingError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProcessingError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Region detector errors
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Failed to load detector model from {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    #[error("Inference failed: {message}")]
    Inference { message: String },
}

/// OCR engine errors
#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Failed to initialize OCR engine for language '{language}': {message}")]
    Init { language: String, message: String },

    #[error("Recognition failed: {message}")]
    Recognition { message: String },
}

/// Spreadsheet errors that abort the whole file
#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("Failed to open workbook {path}: {message}")]
    Workbook { path: PathBuf, message: String },

    #[error("Workbook {path} has no worksheets")]
    NoWorksheet { path: PathBuf },

    #[error("Failed to read CSV {path}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Per-row spreadsheet problems. Logged and skipped, never fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowError {
    #[error("invalid quantity '{value}'")]
    InvalidQuantity { value: String },

    #[error("invalid price '{value}'")]
    InvalidPrice { value: String },
}

/// Result type alias for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_error_converts_into_worker_error() {
        let err: WorkerError = ProcessingError::io(
            "/tmp/missing.pdf",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        )
        .into();
        assert!(matches!(err, WorkerError::Processing(ProcessingError::Io { .. })));
        assert_eq!(err.to_string(), "Document processing failed");
    }

    #[test]
    fn test_display_chain_includes_sources() {
        let err: WorkerError = ProcessingError::io(
            "/tmp/missing.pdf",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        )
        .into();
        assert_eq!(
            err.display_chain(),
            "Document processing failed: IO error on /tmp/missing.pdf: gone"
        );
    }

    #[test]
    fn test_row_error_messages() {
        let err = RowError::InvalidQuantity {
            value: "five".to_string(),
        };
        assert_eq!(err.to_string(), "invalid quantity 'five'");
    }
}
