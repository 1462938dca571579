//! BOM File Parser
//!
//! Decodes CSV and Excel bill-of-materials files into normalized line items.
//! Both formats are first read into a grid of cell strings; header detection,
//! column sniffing and cell cleaning then run on the grid.

use calamine::{open_workbook_from_rs, DataType, Reader, Xls, Xlsx};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use std::str::FromStr;

use crate::error::{ProcuraError, ProcuraResult};
use procura_models::LineItem;

/// Rows scanned when looking for the header row.
const HEADER_SCAN_ROWS: usize = 30;

/// Recognisable header cells needed to accept a row as the header.
const HEADER_MIN_MATCHES: usize = 2;

type Grid = Vec<Vec<String>>;

/// Supported BOM file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BomFormat {
    Csv,
    Excel, // XLSX/XLS
}

impl BomFormat {
    /// Detect format from file extension
    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" | "xlsm" | "xls" => Some(Self::Excel),
            _ => None,
        }
    }

    /// Detect format from content type header
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            "text/csv" | "application/csv" => Some(Self::Csv),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Some(Self::Excel),
            "application/vnd.ms-excel" => Some(Self::Excel),
            _ => None,
        }
    }
}

impl std::fmt::Display for BomFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv => write!(f, "csv"),
            Self::Excel => write!(f, "excel"),
        }
    }
}

/// Raw BOM file handed to a [`Parser`].
#[derive(Debug, Clone)]
pub struct BomSource {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Overrides detection by extension.
    pub format: Option<BomFormat>,
}

impl BomSource {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
            format: None,
        }
    }

    pub fn with_format(mut self, format: BomFormat) -> Self {
        self.format = Some(format);
        self
    }
}

/// Column positions detected in the header row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub headers: Vec<String>,
    pub part_number: Option<usize>,
    pub description: Option<usize>,
    pub quantity: Option<usize>,
    pub unit_of_measure: Option<usize>,
}

impl ColumnMapping {
    pub fn is_empty(&self) -> bool {
        self.part_number.is_none()
            && self.description.is_none()
            && self.quantity.is_none()
            && self.unit_of_measure.is_none()
    }
}

/// Complete parsed BOM with metadata
#[derive(Debug, Clone)]
pub struct ParsedBom {
    pub format: BomFormat,
    /// Line numbers run 1..n over kept rows.
    pub items: Vec<LineItem>,
    pub warnings: Vec<String>,
    /// Zero-based grid row holding the headers.
    pub header_row: usize,
    pub column_mapping: ColumnMapping,
}

/// Decodes a BOM file into line items.
pub trait Parser: Send + Sync {
    fn parse(&self, source: &BomSource) -> ProcuraResult<ParsedBom>;
}

/// Main BOM parser
pub struct BomParser {
    header_patterns: Vec<&'static str>,
    part_number_priority: Vec<&'static str>,
    part_number_fallback: Vec<&'static str>,
    description_priority: Vec<&'static str>,
    description_fallback: Vec<&'static str>,
    quantity_patterns: Vec<&'static str>,
    uom_patterns: Vec<&'static str>,
    numeric_run: Regex,
}

impl BomParser {
    pub fn new() -> ProcuraResult<Self> {
        let numeric_run = Regex::new(r"\d+(?:\.\d+)?")
            .map_err(|e| ProcuraError::internal(format!("Invalid quantity pattern: {}", e)))?;

        Ok(Self {
            header_patterns: vec![
                "part number", "part_number", "partnumber", "part no", "part #", "pn", "p/n",
                "description", "desc", "component",
                "quantity", "qty", "qnty",
                "designator", "ref des", "reference",
                "manufacturer", "mfr", "mfg",
                "footprint", "package",
            ],
            part_number_priority: vec![
                "part number", "part_number", "partnumber", "part no", "part #", "pn", "p/n", "mpn", "mfr part",
            ],
            part_number_fallback: vec!["part", "item", "sku", "item_number", "itemnumber", "libref", "lib ref"],
            description_priority: vec!["description", "desc"],
            description_fallback: vec!["comment", "name", "item_name", "part_name", "component", "value"],
            quantity_patterns: vec!["qty", "quantity", "qnty", "count", "amount"],
            uom_patterns: vec!["uom", "unit", "u/m", "unit_of_measure", "measure"],
            numeric_run,
        })
    }

    /// Parse BOM file from bytes
    pub fn parse_bytes(&self, filename: &str, data: &[u8], format: Option<BomFormat>) -> ProcuraResult<ParsedBom> {
        let format = format
            .or_else(|| BomFormat::from_extension(Path::new(filename)))
            .ok_or_else(|| ProcuraError::decode(format!("Unsupported file format: {}", filename)))?;

        let grid = match format {
            BomFormat::Csv => self.read_csv(data)?,
            BomFormat::Excel => self.read_excel(data)?,
        };

        self.parse_grid(format, grid)
    }

    fn read_csv(&self, data: &[u8]) -> ProcuraResult<Grid> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(data);

        let mut grid = Vec::new();
        for record in reader.records() {
            let record = record?;
            grid.push(record.iter().map(|cell| cell.trim().to_string()).collect());
        }
        Ok(grid)
    }

    fn read_excel(&self, data: &[u8]) -> ProcuraResult<Grid> {
        // Legacy XLS files are OLE compound documents; everything else is
        // treated as XLSX.
        if data.starts_with(&[0xD0, 0xCF, 0x11, 0xE0]) {
            read_first_sheet::<Xls<_>>(data)
        } else {
            read_first_sheet::<Xlsx<_>>(data)
        }
    }

    fn parse_grid(&self, format: BomFormat, grid: Grid) -> ProcuraResult<ParsedBom> {
        if grid.is_empty() {
            return Err(ProcuraError::decode("BOM file is empty"));
        }

        let header_row = self.find_header_row(&grid);
        let mapping = self.detect_columns(&grid[header_row]);
        if mapping.is_empty() {
            return Err(ProcuraError::decode(
                "Could not detect BOM columns. Please ensure columns are labeled.",
            ));
        }

        let mut items = Vec::new();
        let mut warnings = Vec::new();

        for (offset, row) in grid.iter().enumerate().skip(header_row + 1) {
            if row.iter().all(|cell| cell.is_empty()) {
                continue;
            }

            let cell = |idx: Option<usize>| idx.and_then(|i| row.get(i)).map(|v| v.trim()).filter(|v| !v.is_empty());

            let part_number = cell(mapping.part_number).and_then(clean_part_number);
            let description = cell(mapping.description).map(str::to_string);
            if part_number.is_none() && description.is_none() {
                continue;
            }

            let line_number = items.len() as u32 + 1;
            let mut item = LineItem::new(line_number, Decimal::ONE);
            item.part_number_raw = part_number;
            item.description_raw = description;

            match cell(mapping.quantity).and_then(|q| self.clean_quantity(q)) {
                Some(quantity) if quantity > Decimal::ZERO => item.quantity = quantity,
                _ => warnings.push(format!(
                    "Row {}: Missing or invalid quantity for {}",
                    offset + 1,
                    item.label()
                )),
            }

            if let Some(uom) = cell(mapping.unit_of_measure) {
                item.unit_of_measure = uom.to_uppercase();
            }

            items.push(item);
        }

        if items.is_empty() {
            return Err(ProcuraError::decode("No line items found in BOM"));
        }

        tracing::debug!(
            format = %format,
            header_row,
            items = items.len(),
            warnings = warnings.len(),
            "Parsed BOM"
        );

        Ok(ParsedBom {
            format,
            items,
            warnings,
            header_row,
            column_mapping: mapping,
        })
    }

    /// First row among the leading rows with enough recognisable headers,
    /// else row 0.
    fn find_header_row(&self, grid: &Grid) -> usize {
        grid.iter()
            .take(HEADER_SCAN_ROWS)
            .position(|row| {
                let matches = row
                    .iter()
                    .map(|cell| cell.to_lowercase())
                    .filter(|cell| self.header_patterns.iter().any(|p| cell.contains(p)))
                    .count();
                matches >= HEADER_MIN_MATCHES
            })
            .unwrap_or(0)
    }

    fn detect_columns(&self, header: &[String]) -> ColumnMapping {
        let headers: Vec<String> = header.iter().map(|h| h.trim().to_lowercase()).collect();

        let find = |patterns: &[&str], skip_supplier: bool| {
            headers.iter().position(|h| {
                !(skip_supplier && h.contains("supplier")) && patterns.iter().any(|p| h.contains(p))
            })
        };

        // Supplier part-number columns are never the main part number
        let part_number = find(&self.part_number_priority, true).or_else(|| find(&self.part_number_fallback, true));
        let description = find(&self.description_priority, false).or_else(|| find(&self.description_fallback, false));

        ColumnMapping {
            part_number,
            description,
            quantity: find(&self.quantity_patterns, false),
            unit_of_measure: find(&self.uom_patterns, false),
            headers: header.to_vec(),
        }
    }

    /// Plain decimals are taken as is; otherwise the first numeric run.
    fn clean_quantity(&self, value: &str) -> Option<Decimal> {
        if let Ok(quantity) = Decimal::from_str(value) {
            return Some(quantity);
        }
        self.numeric_run
            .find(value)
            .and_then(|m| Decimal::from_str(m.as_str()).ok())
    }
}

impl Parser for BomParser {
    fn parse(&self, source: &BomSource) -> ProcuraResult<ParsedBom> {
        self.parse_bytes(&source.filename, &source.bytes, source.format)
    }
}

fn read_first_sheet<R>(data: &[u8]) -> ProcuraResult<Grid>
where
    R: Reader<Cursor<Vec<u8>>>,
    R::Error: std::fmt::Display,
{
    let mut workbook: R = open_workbook_from_rs(Cursor::new(data.to_vec()))
        .map_err(|e| ProcuraError::decode(format!("Failed to open Excel workbook: {}", e)))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| ProcuraError::decode("No sheets found in workbook"))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .ok_or_else(|| ProcuraError::decode(format!("Sheet {} not found", sheet_name)))?
        .map_err(|e| ProcuraError::decode(format!("Failed to read worksheet: {}", e)))?;

    Ok(range
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell: &DataType| match cell {
                    DataType::Empty => String::new(),
                    other => other.to_string().trim().to_string(),
                })
                .collect()
        })
        .collect())
}

/// Strips leading `#`, `-` and whitespace.
fn clean_part_number(value: &str) -> Option<String> {
    let cleaned = value.trim_start_matches(|c: char| c == '#' || c == '-' || c.is_whitespace()).trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}
