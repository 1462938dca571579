//! BOM Validator
//!
//! Structural checks over parsed line items. Issues are advisory: they are
//! logged and stored with the run, never fatal.

use std::collections::HashSet;

use rust_decimal::Decimal;
use procura_models::LineItem;

/// Validation severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    Error,
    Warning,
}

/// Single validation issue
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub severity: ValidationSeverity,
    pub line_number: Option<u32>,
    pub field: Option<String>,
    pub message: String,
}

/// Validation result for a BOM
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error_count: usize,
    pub warning_count: usize,
    pub issues: Vec<ValidationIssue>,
    pub summary: ValidationSummary,
}

/// Summary statistics for validation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub total_items: usize,
    pub unique_parts: usize,
    pub missing_identity: usize,
    pub invalid_quantities: usize,
    pub duplicate_lines: usize,
}

impl ValidationResult {
    /// Issue messages in the form stored on the run.
    pub fn messages(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.message.clone()).collect()
    }
}

/// BOM validator
#[derive(Debug, Clone, Default)]
pub struct BomValidator;

impl BomValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate parsed line items
    pub fn validate(&self, items: &[LineItem]) -> ValidationResult {
        let mut issues = Vec::new();
        let mut summary = ValidationSummary {
            total_items: items.len(),
            ..ValidationSummary::default()
        };

        if items.is_empty() {
            issues.push(ValidationIssue {
                severity: ValidationSeverity::Error,
                line_number: None,
                field: None,
                message: "No items found in BOM".to_string(),
            });
        }

        let mut seen_lines = HashSet::new();
        let mut seen_parts = HashSet::new();

        for item in items {
            let line = item.line_number;

            if !seen_lines.insert(line) {
                summary.duplicate_lines += 1;
                issues.push(ValidationIssue {
                    severity: ValidationSeverity::Error,
                    line_number: Some(line),
                    field: Some("line_number".to_string()),
                    message: format!("Duplicate line number: {}", line),
                });
            }

            if let Some(part_number) = &item.part_number_raw {
                if !seen_parts.insert(part_number.as_str()) {
                    issues.push(ValidationIssue {
                        severity: ValidationSeverity::Warning,
                        line_number: Some(line),
                        field: Some("part_number".to_string()),
                        message: format!("Line {}: Duplicate part number '{}'", line, part_number),
                    });
                }
            }

            if item.part_number_raw.is_none() && item.description_raw.is_none() {
                summary.missing_identity += 1;
                issues.push(ValidationIssue {
                    severity: ValidationSeverity::Error,
                    line_number: Some(line),
                    field: None,
                    message: format!("Line {}: Missing both part number and description", line),
                });
            }

            if item.quantity <= Decimal::ZERO {
                summary.invalid_quantities += 1;
                issues.push(ValidationIssue {
                    severity: ValidationSeverity::Error,
                    line_number: Some(line),
                    field: Some("quantity".to_string()),
                    message: format!("Line {}: Invalid quantity ({})", line, item.quantity),
                });
            }
        }

        summary.unique_parts = seen_parts.len();
        let error_count = issues.iter().filter(|i| i.severity == ValidationSeverity::Error).count();
        let warning_count = issues.len() - error_count;

        ValidationResult {
            is_valid: error_count == 0,
            error_count,
            warning_count,
            issues,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_items_are_valid() {
        let items = vec![
            LineItem::new(1, Decimal::ONE).with_part_number("ABC-123"),
            LineItem::new(2, Decimal::new(3, 0)).with_description("10uF capacitor"),
        ];
        let result = BomValidator::new().validate(&items);

        assert!(result.is_valid);
        assert!(result.issues.is_empty());
        assert_eq!(result.summary.unique_parts, 1);
    }

    #[test]
    fn test_structural_issues() {
        let items = vec![
            LineItem::new(1, Decimal::ONE).with_part_number("ABC-123"),
            LineItem::new(1, Decimal::ZERO).with_part_number("ABC-123"),
            LineItem::new(3, Decimal::ONE),
        ];
        let result = BomValidator::new().validate(&items);

        assert!(!result.is_valid);
        assert_eq!(result.summary.duplicate_lines, 1);
        assert_eq!(result.summary.invalid_quantities, 1);
        assert_eq!(result.summary.missing_identity, 1);
        assert_eq!(result.warning_count, 1);
        assert!(result.messages().contains(&"Line 3: Missing both part number and description".to_string()));
    }
}
