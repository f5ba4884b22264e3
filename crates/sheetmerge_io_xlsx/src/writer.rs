//! Single-writer sheet builder for template merges.

use std::collections::BTreeMap;

use rust_xlsxwriter::{Format, Image, Workbook, Worksheet};

use crate::spec::{
    EnumAutofitColumnsRule, EnumCellValue, SpecAutofitCellsPolicy, SpecCellFormat, SpecColumn,
    SpecTemplateSheet, SpecXlsxReport,
};
use crate::util::{
    cast_col_num, cast_row_num, derive_rust_xlsx_format, derive_xlsx_error_text,
    estimate_unicode_string_width, sanitize_sheet_name, validate_image_buffer,
    validate_unique_columns,
};

/// Stateful workbook writer holding exactly one worksheet.
///
/// Row appends are strictly sequential: each call to [`Self::append_row`] takes the
/// next free row. The workbook is buffered in memory until
/// [`Self::save_to_buffer`] is called.
pub struct TemplateSheetWriter {
    workbook: Workbook,
    fmt_text: SpecCellFormat,
    fmt_header: SpecCellFormat,
    policy_autofit: SpecAutofitCellsPolicy,
    l_columns: Vec<SpecColumn>,
    l_width_by_col_header: Vec<usize>,
    l_width_by_col_body: Vec<usize>,
    n_row_next: usize,
    report: SpecXlsxReport,
    if_closed: bool,
}

impl TemplateSheetWriter {
    /// Create a writer whose only worksheet is named after `sheet_name`.
    pub fn new(
        sheet_name: &str,
        fmt_text: SpecCellFormat,
        fmt_header: SpecCellFormat,
        policy_autofit: SpecAutofitCellsPolicy,
    ) -> Result<Self, String> {
        validate_policy_autofit(&policy_autofit)?;

        let sheet_name = sanitize_sheet_name(sheet_name, "_");
        let mut workbook = Workbook::new();
        workbook
            .add_worksheet()
            .set_name(&sheet_name)
            .map_err(derive_xlsx_error_text)?;

        Ok(Self {
            workbook,
            fmt_text,
            fmt_header,
            policy_autofit,
            l_columns: Vec::new(),
            l_width_by_col_header: Vec::new(),
            l_width_by_col_body: Vec::new(),
            n_row_next: 0,
            report: SpecXlsxReport {
                sheet_name,
                ..Default::default()
            },
            if_closed: false,
        })
    }

    /// Zero-based row index the next [`Self::append_row`] call will write to.
    pub fn next_row_index(&self) -> usize {
        self.n_row_next
    }

    /// Snapshot of the write report.
    pub fn report(&self) -> SpecXlsxReport {
        self.report.clone()
    }

    /// Copy template body cells (rows after the header row) into the sheet.
    ///
    /// Appended rows start below the last template row.
    pub fn write_template_body(&mut self, sheet: &SpecTemplateSheet) -> Result<(), String> {
        self.ensure_open()?;
        let fmt_text = derive_rust_xlsx_format(&self.fmt_text);
        let worksheet = self.worksheet()?;
        for cell in &sheet.l_body_cells {
            write_cell_with_format(worksheet, cell.n_idx_row, cell.n_idx_col, &cell.value, &fmt_text)?;
        }
        self.n_row_next = usize::max(self.n_row_next, sheet.height());
        Ok(())
    }

    /// Set the column schema and write each header into row 0 at its
    /// `n_idx_col`.
    ///
    /// Duplicate keys are accepted; every duplicate receives the same row value
    /// and a warning is recorded.
    pub fn set_columns(&mut self, columns: Vec<SpecColumn>) -> Result<(), String> {
        self.ensure_open()?;
        let l_keys: Vec<String> = columns.iter().map(|col| col.key.clone()).collect();
        if let Err(msg) = validate_unique_columns(&l_keys) {
            self.report.warn(msg);
        }

        let fmt_header = derive_rust_xlsx_format(&self.fmt_header);
        let worksheet = self.worksheet()?;
        for column in &columns {
            worksheet
                .write_string_with_format(
                    cast_row_num(0)?,
                    cast_col_num(column.n_idx_col)?,
                    &column.header,
                    &fmt_header,
                )
                .map_err(derive_xlsx_error_text)?;
        }

        self.l_width_by_col_header = columns
            .iter()
            .map(|col| estimate_unicode_string_width(&col.header))
            .collect();
        self.l_width_by_col_body = vec![0; columns.len()];
        if !columns.is_empty() {
            self.n_row_next = usize::max(self.n_row_next, 1);
        }
        self.l_columns = columns;
        Ok(())
    }

    /// Append one row keyed by column keys; keys with no column are dropped.
    ///
    /// Returns the zero-based row index written.
    pub fn append_row(
        &mut self,
        dict_values: &BTreeMap<String, EnumCellValue>,
    ) -> Result<usize, String> {
        self.ensure_open()?;
        let n_idx_row = self.n_row_next;
        cast_row_num(n_idx_row)?;

        let fmt_text = derive_rust_xlsx_format(&self.fmt_text);
        let Self {
            workbook,
            l_columns,
            l_width_by_col_body,
            ..
        } = self;
        let worksheet = workbook
            .worksheet_from_index(0)
            .map_err(derive_xlsx_error_text)?;
        for (n_idx, column) in l_columns.iter().enumerate() {
            let Some(value) = dict_values.get(&column.key) else {
                continue;
            };
            write_cell_with_format(worksheet, n_idx_row, column.n_idx_col, value, &fmt_text)?;
            l_width_by_col_body[n_idx] = usize::max(
                l_width_by_col_body[n_idx],
                estimate_unicode_string_width(&value.to_text()),
            );
        }

        self.n_row_next += 1;
        self.report.n_rows_appended += 1;
        Ok(n_idx_row)
    }

    /// Embed an image fitted into the cell at (`n_idx_row`, `n_idx_col`).
    ///
    /// The image type is detected from the bytes; `extension` is only used for
    /// diagnostics. Payloads whose headers are cut short are rejected before
    /// they reach the embedder.
    pub fn embed_image(
        &mut self,
        v_image: &[u8],
        extension: &str,
        n_idx_row: usize,
        n_idx_col: usize,
    ) -> Result<(), String> {
        self.ensure_open()?;
        let err_unsupported = |err: String| {
            format!("Unsupported {extension:?} image at row {n_idx_row}, column {n_idx_col}: {err}")
        };
        validate_image_buffer(v_image).map_err(err_unsupported)?;
        let image = Image::new_from_buffer(v_image)
            .map_err(|err| err_unsupported(err.to_string()))?;
        let n_row = cast_row_num(n_idx_row)?;
        let n_col = cast_col_num(n_idx_col)?;
        self.worksheet()?
            .insert_image_fit_to_cell(n_row, n_col, &image, false)
            .map_err(derive_xlsx_error_text)?;
        self.report.n_images_embedded += 1;
        Ok(())
    }

    /// Record a non-fatal warning on this sheet's report.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        self.report.warn(msg);
    }

    /// Serialize workbook to bytes and close the writer.
    pub fn save_to_buffer(&mut self) -> Result<Vec<u8>, String> {
        self.ensure_open()?;
        self.apply_column_widths()?;
        let v_xlsx = self
            .workbook
            .save_to_buffer()
            .map_err(derive_xlsx_error_text)?;
        self.if_closed = true;
        Ok(v_xlsx)
    }

    fn ensure_open(&self) -> Result<(), String> {
        if self.if_closed {
            return Err("Cannot write after save().".to_string());
        }
        Ok(())
    }

    fn worksheet(&mut self) -> Result<&mut Worksheet, String> {
        self.workbook
            .worksheet_from_index(0)
            .map_err(derive_xlsx_error_text)
    }

    fn apply_column_widths(&mut self) -> Result<(), String> {
        if matches!(self.policy_autofit.rule_columns, EnumAutofitColumnsRule::None) {
            return Ok(());
        }

        let n_min = usize::max(1, self.policy_autofit.width_cell_min);
        let n_max = usize::min(255, usize::max(n_min, self.policy_autofit.width_cell_max));
        let n_pad = self.policy_autofit.width_cell_padding;

        let l_widths: Vec<(usize, usize)> = (0..self.l_columns.len())
            .map(|n_idx| {
                let n_header = self.l_width_by_col_header[n_idx];
                let n_body = self.l_width_by_col_body[n_idx];
                let n_width_recorded = match self.policy_autofit.rule_columns {
                    EnumAutofitColumnsRule::Header | EnumAutofitColumnsRule::None => n_header,
                    EnumAutofitColumnsRule::Body => n_body,
                    EnumAutofitColumnsRule::All => usize::max(n_header, n_body),
                };
                (
                    self.l_columns[n_idx].n_idx_col,
                    usize::min(n_max, usize::max(n_min, n_width_recorded + n_pad)),
                )
            })
            .collect();

        let worksheet = self.worksheet()?;
        for (n_idx_col, n_width) in l_widths {
            worksheet
                .set_column_width(cast_col_num(n_idx_col)?, n_width as f64)
                .map_err(derive_xlsx_error_text)?;
        }
        Ok(())
    }
}

fn validate_policy_autofit(policy_autofit: &SpecAutofitCellsPolicy) -> Result<(), String> {
    if policy_autofit.width_cell_min == 0 {
        return Err("policy_autofit.width_cell_min must be >= 1.".to_string());
    }
    if policy_autofit.width_cell_max < policy_autofit.width_cell_min {
        return Err(
            "policy_autofit.width_cell_max must be >= policy_autofit.width_cell_min.".to_string(),
        );
    }
    Ok(())
}

fn write_cell_with_format(
    worksheet: &mut Worksheet,
    row_idx: usize,
    col_idx: usize,
    value: &EnumCellValue,
    format: &Format,
) -> Result<(), String> {
    let n_row = cast_row_num(row_idx)?;
    let n_col = cast_col_num(col_idx)?;
    match value {
        EnumCellValue::None => {
            worksheet
                .write_blank(n_row, n_col, format)
                .map_err(derive_xlsx_error_text)?;
        }
        EnumCellValue::String(val) => {
            worksheet
                .write_string_with_format(n_row, n_col, val, format)
                .map_err(derive_xlsx_error_text)?;
        }
        EnumCellValue::Number(val) => {
            worksheet
                .write_number_with_format(n_row, n_col, *val, format)
                .map_err(derive_xlsx_error_text)?;
        }
        EnumCellValue::Boolean(val) => {
            worksheet
                .write_boolean_with_format(n_row, n_col, *val, format)
                .map_err(derive_xlsx_error_text)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::conf::derive_default_xlsx_formats;
    use crate::reader::read_template_sheet;
    use crate::spec::SpecTemplateCell;

    fn new_writer() -> TemplateSheetWriter {
        let dict_fmt = derive_default_xlsx_formats();
        TemplateSheetWriter::new(
            "Orders",
            dict_fmt["text"].clone(),
            dict_fmt["header"].clone(),
            SpecAutofitCellsPolicy::default(),
        )
        .expect("writer")
    }

    fn columns(l_names: &[&str]) -> Vec<SpecColumn> {
        l_names
            .iter()
            .enumerate()
            .map(|(n_idx_col, name)| SpecColumn {
                header: name.to_string(),
                key: name.to_string(),
                n_idx_col,
            })
            .collect()
    }

    fn text(value: &str) -> EnumCellValue {
        EnumCellValue::String(value.to_string())
    }

    fn body_values(sheet: &SpecTemplateSheet) -> Vec<(usize, usize, EnumCellValue)> {
        sheet
            .l_body_cells
            .iter()
            .map(|cell| (cell.n_idx_row, cell.n_idx_col, cell.value.clone()))
            .collect()
    }

    #[test]
    fn test_append_row_writes_by_key_and_drops_unmatched() {
        let mut writer = new_writer();
        writer.set_columns(columns(&["Name", "Qty"])).expect("columns");

        let dict_values = BTreeMap::from([
            ("Qty".to_string(), EnumCellValue::Number(2.0)),
            ("Name".to_string(), EnumCellValue::String("Alice".to_string())),
            ("Unmapped".to_string(), EnumCellValue::String("x".to_string())),
        ]);
        assert_eq!(writer.append_row(&dict_values).expect("append"), 1);
        assert_eq!(writer.next_row_index(), 2);

        let v_xlsx = writer.save_to_buffer().expect("buffer");
        let sheet = read_template_sheet(&v_xlsx).expect("read back");
        assert_eq!(sheet.first_row(), &[text("Name"), text("Qty")]);
        assert_eq!(
            body_values(&sheet),
            vec![(1, 0, text("Alice")), (1, 1, EnumCellValue::Number(2.0))]
        );
    }

    #[test]
    fn test_template_body_pushes_appended_rows_down() {
        let mut writer = new_writer();
        let sheet = SpecTemplateSheet {
            sheet_name: "Orders".to_string(),
            l_header: vec![text("Name")],
            l_body_cells: vec![SpecTemplateCell {
                n_idx_row: 1,
                n_idx_col: 0,
                value: text("example"),
            }],
            n_rows: 2,
        };
        writer.write_template_body(&sheet).expect("body");
        writer.set_columns(columns(&["Name"])).expect("columns");
        assert_eq!(writer.next_row_index(), 2);
    }

    #[test]
    fn test_columns_keep_their_template_positions() {
        let mut writer = new_writer();
        let sheet = SpecTemplateSheet {
            sheet_name: "Orders".to_string(),
            l_header: vec![text("Name"), EnumCellValue::None, text("Qty")],
            l_body_cells: vec![
                SpecTemplateCell {
                    n_idx_row: 1,
                    n_idx_col: 0,
                    value: text("ex"),
                },
                SpecTemplateCell {
                    n_idx_row: 1,
                    n_idx_col: 2,
                    value: EnumCellValue::Number(5.0),
                },
            ],
            n_rows: 2,
        };
        writer.write_template_body(&sheet).expect("body");
        writer
            .set_columns(vec![
                SpecColumn {
                    header: "Name".to_string(),
                    key: "Name".to_string(),
                    n_idx_col: 0,
                },
                SpecColumn {
                    header: "Qty".to_string(),
                    key: "Qty".to_string(),
                    n_idx_col: 2,
                },
            ])
            .expect("columns");
        let dict_values = BTreeMap::from([
            ("Name".to_string(), text("Alice")),
            ("Qty".to_string(), EnumCellValue::Number(3.0)),
        ]);
        assert_eq!(writer.append_row(&dict_values).expect("append"), 2);

        let sheet_out = read_template_sheet(&writer.save_to_buffer().expect("buffer"))
            .expect("read back");
        assert_eq!(
            sheet_out.first_row(),
            &[text("Name"), EnumCellValue::None, text("Qty")]
        );
        assert_eq!(
            body_values(&sheet_out),
            vec![
                (1, 0, text("ex")),
                (1, 2, EnumCellValue::Number(5.0)),
                (2, 0, text("Alice")),
                (2, 2, EnumCellValue::Number(3.0)),
            ]
        );
    }

    #[test]
    fn test_empty_columns_append_blank_rows_from_top() {
        let mut writer = new_writer();
        writer.set_columns(vec![]).expect("columns");
        assert_eq!(writer.next_row_index(), 0);
        let dict_values = BTreeMap::from([(
            "Name".to_string(),
            EnumCellValue::String("Alice".to_string()),
        )]);
        assert_eq!(writer.append_row(&dict_values).expect("append"), 0);
        assert_eq!(writer.report().n_rows_appended, 1);
    }

    #[test]
    fn test_duplicate_headers_are_reported_as_warning() {
        let mut writer = new_writer();
        writer
            .set_columns(columns(&["Name", "Name"]))
            .expect("columns");
        assert_eq!(writer.report().warnings.len(), 1);
    }

    #[test]
    fn test_embed_image_rejects_short_payload_without_panicking() {
        let mut writer = new_writer();
        let err = writer.embed_image(&[0x41], "png", 1, 0).unwrap_err();
        assert!(err.contains("Unsupported \"png\" image"));
        assert!(err.contains("too short"));
        assert!(writer.embed_image(b"\x89PNG\r\n\x1a\n\0\0", "png", 1, 0).is_err());
        assert_eq!(writer.report().n_images_embedded, 0);
    }

    #[test]
    fn test_embed_image_rejects_unknown_payload() {
        let mut writer = new_writer();
        let err = writer.embed_image(b"not an image", "gif", 1, 0).unwrap_err();
        assert!(err.contains("Unsupported \"gif\" image"));
        assert_eq!(writer.report().n_images_embedded, 0);
    }

    #[test]
    fn test_writes_after_save_are_rejected() {
        let mut writer = new_writer();
        writer.save_to_buffer().expect("buffer");
        assert!(writer.set_columns(columns(&["Name"])).is_err());
    }
}
