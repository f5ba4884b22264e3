//! Shared XLSX specification models.

////////////////////////////////////////////////////////////////////////////////
// #region CellFormatSpecification

/// Cell format specification used for header and body cells.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SpecCellFormat {
    /// Font family name.
    pub font_name: Option<String>,
    /// Font size in points.
    pub font_size: Option<i64>,
    /// Bold style.
    pub bold: Option<bool>,

    /// Horizontal alignment.
    pub align: Option<String>,
    /// Vertical alignment.
    pub valign: Option<String>,
    /// Text wrap.
    pub text_wrap: Option<bool>,

    /// Number format code.
    pub num_format: Option<String>,
}

impl SpecCellFormat {
    /// Return a new format by overlaying `patch` onto `self`.
    pub fn with_(&self, patch: SpecCellFormat) -> SpecCellFormat {
        self.merge(&patch)
    }

    /// Merge two formats with right-side non-`None` overwrite semantics.
    pub fn merge(&self, other: &SpecCellFormat) -> SpecCellFormat {
        SpecCellFormat {
            font_name: other.font_name.clone().or_else(|| self.font_name.clone()),
            font_size: other.font_size.or(self.font_size),
            bold: other.bold.or(self.bold),
            align: other.align.clone().or_else(|| self.align.clone()),
            valign: other.valign.clone().or_else(|| self.valign.clone()),
            text_wrap: other.text_wrap.or(self.text_wrap),
            num_format: other.num_format.clone().or_else(|| self.num_format.clone()),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CellValues

/// Normalized cell value read from a template or written into a sheet.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EnumCellValue {
    /// Missing/blank value.
    #[default]
    None,
    /// Text value.
    String(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Boolean(bool),
}

impl EnumCellValue {
    /// `true` for blank cells and empty strings.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::None => true,
            Self::String(val) => val.is_empty(),
            Self::Number(_) | Self::Boolean(_) => false,
        }
    }

    /// Display text of the cell; integral numbers render without a fraction.
    pub fn to_text(&self) -> String {
        match self {
            Self::None => String::new(),
            Self::String(val) => val.clone(),
            Self::Number(val) => {
                if val.is_finite() && val.fract() == 0.0 && val.abs() < 1e15 {
                    format!("{}", *val as i64)
                } else {
                    val.to_string()
                }
            }
            Self::Boolean(val) => if *val { "TRUE" } else { "FALSE" }.to_string(),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ColumnSpecification

/// One output column: header text written to row 0 and the key used to pick
/// row values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpecColumn {
    /// Header text.
    pub header: String,
    /// Row mapping key.
    pub key: String,
    /// Zero-based sheet column the header occupies in the template.
    pub n_idx_col: usize,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region TemplateSpecification

/// Non-blank template cell below the header row, in absolute coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecTemplateCell {
    /// Zero-based sheet row (always >= 1).
    pub n_idx_row: usize,
    /// Zero-based sheet column.
    pub n_idx_col: usize,
    /// Cell value.
    pub value: EnumCellValue,
}

/// First worksheet of a loaded template workbook.
///
/// The header row is kept dense so column positions survive gaps; the body is
/// kept sparse.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecTemplateSheet {
    /// Worksheet name as stored in the template.
    pub sheet_name: String,
    /// Row 0 values from column A to the last used header cell.
    pub l_header: Vec<EnumCellValue>,
    /// Non-blank cells of rows 1.., in row-major order.
    pub l_body_cells: Vec<SpecTemplateCell>,
    /// Number of used rows, counting from row 0.
    pub n_rows: usize,
}

impl SpecTemplateSheet {
    /// First row values, without any leading placeholder cell.
    pub fn first_row(&self) -> &[EnumCellValue] {
        &self.l_header
    }

    /// Number of used rows, counting from row 0.
    pub fn height(&self) -> usize {
        self.n_rows
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region AutofitSpecification

/// Autofit rule for column width inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumAutofitColumnsRule {
    /// Disable autofit.
    None,
    /// Infer width from header cells only (default).
    #[default]
    Header,
    /// Infer width from appended body cells only.
    Body,
    /// Infer width from both header and body cells.
    All,
}

/// Autofit policy for the sheet writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecAutofitCellsPolicy {
    /// Autofit width inference rule.
    pub rule_columns: EnumAutofitColumnsRule,
    /// Minimum final width.
    pub width_cell_min: usize,
    /// Maximum final width.
    pub width_cell_max: usize,
    /// Width padding added after inference.
    pub width_cell_padding: usize,
}

impl Default for SpecAutofitCellsPolicy {
    fn default() -> Self {
        Self {
            rule_columns: EnumAutofitColumnsRule::Header,
            width_cell_min: 8,
            width_cell_max: 60,
            width_cell_padding: 2,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReportSpecification

/// Per-sheet write report.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecXlsxReport {
    /// Worksheet name actually written.
    pub sheet_name: String,
    /// Number of rows appended after the template body.
    pub n_rows_appended: usize,
    /// Number of images embedded.
    pub n_images_embedded: usize,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl SpecXlsxReport {
    /// Add a warning message.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        self.warnings.push(msg.as_ref().to_string());
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_value_text_renders_integral_numbers_without_fraction() {
        assert_eq!(EnumCellValue::Number(42.0).to_text(), "42");
        assert_eq!(EnumCellValue::Number(1.5).to_text(), "1.5");
        assert_eq!(EnumCellValue::Boolean(true).to_text(), "TRUE");
        assert_eq!(EnumCellValue::None.to_text(), "");
    }

    #[test]
    fn test_format_merge_prefers_right_side() {
        let fmt_base = SpecCellFormat {
            font_name: Some("Calibri".to_string()),
            bold: Some(false),
            ..Default::default()
        };
        let fmt_merged = fmt_base.with_(SpecCellFormat {
            bold: Some(true),
            ..Default::default()
        });
        assert_eq!(fmt_merged.font_name.as_deref(), Some("Calibri"));
        assert_eq!(fmt_merged.bold, Some(true));
    }
}
