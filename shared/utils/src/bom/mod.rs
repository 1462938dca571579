//! BOM (Bill of Materials) Processing Module
//!
//! Parser capability and structural validation for BOM files.
//! Supports CSV and Excel (XLSX/XLS) formats.

pub mod parser;
pub mod validator;

pub use parser::{BomFormat, BomParser, BomSource, ColumnMapping, ParsedBom, Parser};
pub use validator::{BomValidator, ValidationIssue, ValidationResult, ValidationSeverity, ValidationSummary};
