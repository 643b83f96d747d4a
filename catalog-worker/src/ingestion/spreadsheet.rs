//! Supplier spreadsheet ingestion.
//!
//! `.xlsx`/`.xls` workbooks (first worksheet) and `.csv` files are mapped by
//! column position into normalized line items, written as one JSON file per
//! spreadsheet under `processed/orders/`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use calamine::{Data, Reader, open_workbook_auto};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::StorageLayout;
use crate::error::{ProcessingError, RowError, SpreadsheetError, WorkerResult};

/// Column positions (0-based). A missing or negative column reads as empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MappingConfig {
    /// Row holding the column titles; data starts on the next row
    #[serde(default)]
    pub header_row: usize,
    #[serde(default)]
    pub col_sku: Option<i64>,
    #[serde(default)]
    pub col_qty: Option<i64>,
    #[serde(default)]
    pub col_price: Option<i64>,
    #[serde(default)]
    pub col_brand: Option<i64>,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            header_row: 0,
            col_sku: Some(0),
            col_qty: Some(1),
            col_price: Some(2),
            col_brand: Some(3),
        }
    }
}

/// Body of the optional `<file>.meta.json` side file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SpreadsheetMeta {
    #[serde(default)]
    pub mapping_config: Option<MappingConfig>,
    #[serde(default)]
    pub supplier_id: Option<String>,
}

/// A spreadsheet cell reduced to what the mapping cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::DateTime(dt) => Cell::Text(dt.to_string()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        }
    }
}

impl Cell {
    fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }

    /// Trimmed text, integral numbers without a decimal point.
    fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
            Cell::Number(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                Some((*f as i64).to_string())
            }
            Cell::Number(f) => Some(f.to_string()),
        }
    }
}

/// One normalized order line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub sku: String,
    pub qty: i64,
    pub price: f64,
    pub brand: Option<String>,
}

/// Result of mapping a single row. Only `Item` reaches the output.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Item(LineItem),
    /// No SKU; skipped without a warning
    Empty,
    Rejected(RowError),
}

/// Output file body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderFile {
    pub supplier_id: Option<String>,
    pub items: Vec<LineItem>,
    pub detected_brands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpreadsheetOutcome {
    pub output_path: PathBuf,
    pub items: usize,
    pub brands: usize,
}

pub struct SpreadsheetIngestor {
    orders_dir: PathBuf,
}

impl SpreadsheetIngestor {
    pub fn new(layout: &StorageLayout) -> Self {
        Self {
            orders_dir: layout.orders_dir(),
        }
    }

    /// Normalize one spreadsheet into `orders/<uuid>.json`.
    ///
    /// The spreadsheet and its side file are left in place.
    pub fn process(&self, path: &Path) -> WorkerResult<SpreadsheetOutcome> {
        let meta = read_meta(&meta_path(path))?;
        let mapping = meta.mapping_config.unwrap_or_default();
        debug!(file = %path.display(), ?mapping, "Reading spreadsheet");

        let rows = read_rows(path)?;
        let (items, detected_brands) = normalize_rows(&rows, &mapping);

        let order = OrderFile {
            supplier_id: meta.supplier_id,
            items,
            detected_brands,
        };

        let output_path = self.orders_dir.join(format!("{}.json", Uuid::new_v4()));
        let json = serde_json::to_vec_pretty(&order).map_err(|e| ProcessingError::Json {
            path: output_path.clone(),
            source: e,
        })?;
        std::fs::write(&output_path, json).map_err(|e| ProcessingError::io(&output_path, e))?;

        info!(
            file = %path.display(),
            items = order.items.len(),
            brands = order.detected_brands.len(),
            output = %output_path.display(),
            "Spreadsheet processed"
        );

        Ok(SpreadsheetOutcome {
            output_path,
            items: order.items.len(),
            brands: order.detected_brands.len(),
        })
    }
}

/// `<file>.meta.json` next to the spreadsheet
pub fn meta_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

fn read_meta(path: &Path) -> WorkerResult<SpreadsheetMeta> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(SpreadsheetMeta::default());
        }
        Err(e) => return Err(ProcessingError::io(path, e).into()),
    };
    let meta = serde_json::from_slice(&bytes).map_err(|e| ProcessingError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(meta)
}

/// Every row of the file as cells, header rows included.
fn read_rows(path: &Path) -> Result<Vec<Vec<Cell>>, SpreadsheetError> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));

    if is_csv {
        read_csv_rows(path)
    } else {
        read_workbook_rows(path)
    }
}

fn read_csv_rows(path: &Path) -> Result<Vec<Vec<Cell>>, SpreadsheetError> {
    let csv_error = |e| SpreadsheetError::Csv {
        path: path.to_path_buf(),
        source: e,
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_path(path)
        .map_err(csv_error)?;

    reader
        .records()
        .map(|result| {
            result
                .map(|record| {
                    record
                        .iter()
                        .map(|field| {
                            if field.is_empty() {
                                Cell::Empty
                            } else {
                                Cell::Text(field.to_string())
                            }
                        })
                        .collect()
                })
                .map_err(csv_error)
        })
        .collect()
}

fn read_workbook_rows(path: &Path) -> Result<Vec<Vec<Cell>>, SpreadsheetError> {
    let workbook_error = |e: &dyn std::fmt::Display| SpreadsheetError::Workbook {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let mut workbook = open_workbook_auto(path).map_err(|e| workbook_error(&e))?;
    let first_sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| SpreadsheetError::NoWorksheet {
            path: path.to_path_buf(),
        })?;
    let range = workbook
        .worksheet_range(&first_sheet)
        .map_err(|e| workbook_error(&e))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(Cell::from).collect())
        .collect())
}

/// Map data rows to line items and collect brands in first-seen order.
pub fn normalize_rows(rows: &[Vec<Cell>], mapping: &MappingConfig) -> (Vec<LineItem>, Vec<String>) {
    let mut items = Vec::new();
    let mut brands = Vec::new();
    let mut seen_brands = HashSet::new();

    let data_rows = rows.iter().skip(mapping.header_row + 1);
    for (index, row) in data_rows.enumerate() {
        if row.iter().all(Cell::is_blank) {
            continue;
        }

        match parse_row(row, mapping) {
            RowOutcome::Item(item) => {
                if let Some(brand) = &item.brand
                    && seen_brands.insert(brand.clone())
                {
                    brands.push(brand.clone());
                }
                items.push(item);
            }
            RowOutcome::Empty => {}
            RowOutcome::Rejected(e) => {
                warn!(row = index, error = %e, "Skipping spreadsheet row");
            }
        }
    }

    (items, brands)
}

pub fn parse_row(row: &[Cell], mapping: &MappingConfig) -> RowOutcome {
    let Some(sku) = column(row, mapping.col_sku).as_text() else {
        return RowOutcome::Empty;
    };

    let qty = match parse_qty(column(row, mapping.col_qty)) {
        Ok(qty) => qty,
        Err(e) => return RowOutcome::Rejected(e),
    };
    let price = match parse_price(column(row, mapping.col_price)) {
        Ok(price) => price,
        Err(e) => return RowOutcome::Rejected(e),
    };
    let brand = column(row, mapping.col_brand).as_text();

    RowOutcome::Item(LineItem {
        sku,
        qty,
        price,
        brand,
    })
}

fn column(row: &[Cell], index: Option<i64>) -> &Cell {
    index
        .and_then(|i| usize::try_from(i).ok())
        .and_then(|i| row.get(i))
        .unwrap_or(&Cell::Empty)
}

/// Empty is 0; fractional values truncate toward zero.
fn parse_qty(cell: &Cell) -> Result<i64, RowError> {
    let invalid = |value: String| RowError::InvalidQuantity { value };
    match cell {
        Cell::Empty => Ok(0),
        Cell::Number(f) if f.is_finite() => Ok(f.trunc() as i64),
        Cell::Number(f) => Err(invalid(f.to_string())),
        Cell::Text(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(0);
            }
            s.parse::<i64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite())
                        .map(|f| f.trunc() as i64)
                })
                .ok_or_else(|| invalid(s.to_string()))
        }
    }
}

/// Empty is 0.0.
fn parse_price(cell: &Cell) -> Result<f64, RowError> {
    match cell {
        Cell::Empty => Ok(0.0),
        Cell::Number(f) => Ok(*f),
        Cell::Text(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Ok(0.0);
            }
            s.parse::<f64>().map_err(|_| RowError::InvalidPrice {
                value: s.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn text_row(cells: &[&str]) -> Vec<Cell> {
        cells
            .iter()
            .map(|c| {
                if c.is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(c.to_string())
                }
            })
            .collect()
    }

    #[test]
    fn test_parse_basic_row() {
        let outcome = parse_row(
            &text_row(&["SKU1", "5", "10.0", "BrandX"]),
            &MappingConfig::default(),
        );
        assert_eq!(
            outcome,
            RowOutcome::Item(LineItem {
                sku: "SKU1".to_string(),
                qty: 5,
                price: 10.0,
                brand: Some("BrandX".to_string()),
            })
        );
    }

    #[test]
    fn test_row_without_sku_is_empty() {
        let mapping = MappingConfig::default();
        assert_eq!(parse_row(&text_row(&["", "5", "10.0", "BrandX"]), &mapping), RowOutcome::Empty);
        assert_eq!(parse_row(&text_row(&["   ", "5"]), &mapping), RowOutcome::Empty);
    }

    #[test]
    fn test_bad_quantity_is_rejected() {
        let outcome = parse_row(&text_row(&["SKU1", "five", "1"]), &MappingConfig::default());
        assert_eq!(
            outcome,
            RowOutcome::Rejected(RowError::InvalidQuantity {
                value: "five".to_string()
            })
        );
    }

    #[test]
    fn test_bad_price_is_rejected() {
        let outcome = parse_row(&text_row(&["SKU1", "1", "n/a"]), &MappingConfig::default());
        assert!(matches!(outcome, RowOutcome::Rejected(RowError::InvalidPrice { .. })));
    }

    #[test]
    fn test_numeric_cells() {
        let row = vec![
            Cell::Number(12345.0),
            Cell::Number(3.9),
            Cell::Number(2.5),
            Cell::Empty,
        ];
        let RowOutcome::Item(item) = parse_row(&row, &MappingConfig::default()) else {
            panic!("expected an item");
        };
        assert_eq!(item.sku, "12345");
        assert_eq!(item.qty, 3);
        assert_eq!(item.price, 2.5);
        assert_eq!(item.brand, None);
    }

    #[test]
    fn test_missing_columns_default() {
        let RowOutcome::Item(item) = parse_row(&text_row(&["SKU9"]), &MappingConfig::default())
        else {
            panic!("expected an item");
        };
        assert_eq!(item.qty, 0);
        assert_eq!(item.price, 0.0);
        assert_eq!(item.brand, None);
    }

    #[test]
    fn test_negative_column_reads_as_empty() {
        let mapping = MappingConfig {
            col_brand: Some(-1),
            ..MappingConfig::default()
        };
        let RowOutcome::Item(item) = parse_row(&text_row(&["S1", "1", "1", "Acme"]), &mapping)
        else {
            panic!("expected an item");
        };
        assert_eq!(item.brand, None);
    }

    #[test]
    fn test_normalize_skips_header_and_dedups_brands() {
        let rows = vec![
            text_row(&["SKU", "Qty", "Price", "Brand"]),
            text_row(&["SKU1", "5", "10.0", "BrandX"]),
            text_row(&["", "", "", ""]),
            text_row(&["SKU2", "1", "3", "BrandY"]),
            text_row(&["", "7", "1.0", "BrandZ"]),
            text_row(&["SKU3", "bad", "1.0", "BrandZ"]),
            text_row(&["SKU4", "2", "4.5", "BrandX"]),
        ];
        let (items, brands) = normalize_rows(&rows, &MappingConfig::default());

        let skus: Vec<&str> = items.iter().map(|i| i.sku.as_str()).collect();
        assert_eq!(skus, vec!["SKU1", "SKU2", "SKU4"]);
        assert_eq!(brands, vec!["BrandX".to_string(), "BrandY".to_string()]);
    }

    #[test]
    fn test_header_row_offset() {
        let rows = vec![
            text_row(&["Supplier price list"]),
            text_row(&["Brand", "Code", "Units", "Cost"]),
            text_row(&["Acme", "AC-1", "2", "9.5"]),
        ];
        let mapping = MappingConfig {
            header_row: 1,
            col_sku: Some(1),
            col_qty: Some(2),
            col_price: Some(3),
            col_brand: Some(0),
        };
        let (items, brands) = normalize_rows(&rows, &mapping);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].sku, "AC-1");
        assert_eq!(items[0].qty, 2);
        assert_eq!(brands, vec!["Acme".to_string()]);
    }

    #[test]
    fn test_process_csv_with_meta() {
        let tmp = TempDir::new().unwrap();
        let layout = StorageLayout::new(tmp.path());
        layout.ensure_dirs().unwrap();

        let csv_path = layout.intake_dir().join("order.csv");
        std::fs::write(
            &csv_path,
            "SKU,Qty,Price,Brand\nSKU1,5,10.0,BrandX\nSKU2,1,2.0,BrandX\n,3,1.0,BrandY\n",
        )
        .unwrap();
        std::fs::write(
            meta_path(&csv_path),
            r#"{"supplier_id": "sup-42", "mapping_config": {"header_row": 0, "col_sku": 0, "col_qty": 1, "col_price": 2, "col_brand": 3}}"#,
        )
        .unwrap();

        let outcome = SpreadsheetIngestor::new(&layout).process(&csv_path).unwrap();
        assert_eq!(outcome.items, 2);
        assert!(outcome.output_path.starts_with(layout.orders_dir()));

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&outcome.output_path).unwrap()).unwrap();
        assert_eq!(value["supplier_id"], "sup-42");
        assert_eq!(
            value["items"][0],
            serde_json::json!({"sku": "SKU1", "qty": 5, "price": 10.0, "brand": "BrandX"})
        );
        assert_eq!(value["detected_brands"], serde_json::json!(["BrandX"]));

        // left in place
        assert!(csv_path.exists());
        assert!(meta_path(&csv_path).exists());
    }

    #[test]
    fn test_process_without_meta_uses_default_mapping() {
        let tmp = TempDir::new().unwrap();
        let layout = StorageLayout::new(tmp.path());
        layout.ensure_dirs().unwrap();

        let csv_path = layout.intake_dir().join("plain.csv");
        std::fs::write(&csv_path, "a,b,c,d\nX-1,2,3.5,\n").unwrap();

        let outcome = SpreadsheetIngestor::new(&layout).process(&csv_path).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&outcome.output_path).unwrap()).unwrap();

        assert!(value["supplier_id"].is_null());
        assert_eq!(value["items"][0]["brand"], serde_json::Value::Null);
        assert_eq!(value["detected_brands"], serde_json::json!([]));
    }

    /// Minimal single-sheet `.xlsx`. Text cells go through the shared
    /// string table, everything else is written as a numeric `<v>`.
    fn write_xlsx(path: &Path, rows: &[&[&str]]) {
        use std::io::Write;
        use zip::write::SimpleFileOptions;

        let mut strings: Vec<&str> = Vec::new();
        let mut sheet_rows = String::new();
        for (r, row) in rows.iter().enumerate() {
            sheet_rows.push_str(&format!(r#"<row r="{}">"#, r + 1));
            for (c, value) in row.iter().enumerate() {
                let cell_ref = format!("{}{}", char::from(b'A' + c as u8), r + 1);
                if value.parse::<f64>().is_ok() {
                    sheet_rows.push_str(&format!(r#"<c r="{}"><v>{}</v></c>"#, cell_ref, value));
                } else {
                    sheet_rows.push_str(&format!(
                        r#"<c r="{}" t="s"><v>{}</v></c>"#,
                        cell_ref,
                        strings.len()
                    ));
                    strings.push(value);
                }
            }
            sheet_rows.push_str("</row>");
        }
        let shared: String = strings.iter().map(|s| format!("<si><t>{}</t></si>", s)).collect();

        let parts = [
            (
                "[Content_Types].xml",
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/><Override PartName="/xl/sharedStrings.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml"/></Types>"#.to_string(),
            ),
            (
                "_rels/.rels",
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#.to_string(),
            ),
            (
                "xl/workbook.xml",
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Order" sheetId="1" r:id="rId1"/></sheets></workbook>"#.to_string(),
            ),
            (
                "xl/_rels/workbook.xml.rels",
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/sharedStrings" Target="sharedStrings.xml"/></Relationships>"#.to_string(),
            ),
            (
                "xl/sharedStrings.xml",
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><sst xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" count="{0}" uniqueCount="{0}">{1}</sst>"#,
                    strings.len(),
                    shared
                ),
            ),
            (
                "xl/worksheets/sheet1.xml",
                format!(
                    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{}</sheetData></worksheet>"#,
                    sheet_rows
                ),
            ),
        ];

        let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        let options = SimpleFileOptions::default();
        for (name, body) in parts {
            zip.start_file(name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_process_xlsx_first_sheet() {
        let tmp = TempDir::new().unwrap();
        let layout = StorageLayout::new(tmp.path());
        layout.ensure_dirs().unwrap();

        let xlsx_path = layout.intake_dir().join("order.xlsx");
        write_xlsx(
            &xlsx_path,
            &[
                &["SKU", "Qty", "Price", "Brand"],
                &["10045", "2.5", "19.99", "Acme"],
                &["ZX-1", "3", "4.5", "Acme"],
                &["ZX-2", "1", "7", "Birch"],
            ],
        );

        let outcome = SpreadsheetIngestor::new(&layout).process(&xlsx_path).unwrap();
        assert_eq!(outcome.items, 3);
        assert_eq!(outcome.brands, 2);

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&outcome.output_path).unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "supplier_id": null,
                "items": [
                    {"sku": "10045", "qty": 2, "price": 19.99, "brand": "Acme"},
                    {"sku": "ZX-1", "qty": 3, "price": 4.5, "brand": "Acme"},
                    {"sku": "ZX-2", "qty": 1, "price": 7.0, "brand": "Birch"}
                ],
                "detected_brands": ["Acme", "Birch"]
            })
        );
        assert!(xlsx_path.exists());
    }

    #[test]
    fn test_meta_path() {
        assert_eq!(
            meta_path(Path::new("/raw/order.xlsx")),
            PathBuf::from("/raw/order.xlsx.meta.json")
        );
    }
}
