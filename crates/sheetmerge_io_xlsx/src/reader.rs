//! Template reader: loads the first worksheet of an XLSX payload.

use std::io::Cursor;

use calamine::{Data, Range, Reader, Xlsx, open_workbook_from_rs};

use crate::spec::{EnumCellValue, SpecTemplateCell, SpecTemplateSheet};

/// Load `v_xlsx` and return its first worksheet.
///
/// Coordinates are absolute, so `first_row()` is always row 1 of the template
/// even when the used range starts lower or further right. Only non-blank body
/// cells are kept. Formatting, formulas and drawings are not carried over;
/// cached formula results are read as plain values.
pub fn read_template_sheet(v_xlsx: &[u8]) -> Result<SpecTemplateSheet, String> {
    let mut workbook: Xlsx<Cursor<Vec<u8>>> = open_workbook_from_rs(Cursor::new(v_xlsx.to_vec()))
        .map_err(|err| format!("Failed to open template workbook: {err}"))?;

    let Some(sheet_name) = workbook.sheet_names().first().cloned() else {
        return Err("Template workbook has no worksheet.".to_string());
    };
    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|err| format!("Failed to read worksheet {sheet_name:?}: {err}"))?;

    Ok(derive_template_sheet(sheet_name, &range))
}

fn derive_template_sheet(sheet_name: String, range: &Range<Data>) -> SpecTemplateSheet {
    let mut sheet = SpecTemplateSheet {
        sheet_name,
        ..Default::default()
    };
    let Some((n_row_start, n_col_start)) = range.start() else {
        return sheet;
    };
    let (n_row_start, n_col_start) = (n_row_start as usize, n_col_start as usize);
    sheet.n_rows = n_row_start + range.height();

    for (n_idx_row, n_idx_col, cell) in range.used_cells() {
        let (n_idx_row, n_idx_col) = (n_row_start + n_idx_row, n_col_start + n_idx_col);
        let value = derive_cell_value_from_data(cell);
        if n_idx_row == 0 {
            if sheet.l_header.len() <= n_idx_col {
                sheet.l_header.resize(n_idx_col + 1, EnumCellValue::None);
            }
            sheet.l_header[n_idx_col] = value;
        } else if !matches!(value, EnumCellValue::None) {
            sheet.l_body_cells.push(SpecTemplateCell {
                n_idx_row,
                n_idx_col,
                value,
            });
        }
    }

    sheet
}

fn derive_cell_value_from_data(value: &Data) -> EnumCellValue {
    match value {
        Data::Empty => EnumCellValue::None,
        Data::String(val) => EnumCellValue::String(val.clone()),
        Data::Float(val) => EnumCellValue::Number(*val),
        Data::Int(val) => EnumCellValue::Number(*val as f64),
        Data::Bool(val) => EnumCellValue::Boolean(*val),
        Data::DateTime(val) => EnumCellValue::Number(val.as_f64()),
        Data::DateTimeIso(val) | Data::DurationIso(val) => EnumCellValue::String(val.clone()),
        Data::Error(_) => EnumCellValue::String(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_xlsxwriter::Workbook;

    use super::*;

    fn build_template(l_cells: &[(u32, u16, &str)]) -> Vec<u8> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name("Orders").expect("sheet name");
        for (n_row, n_col, text) in l_cells {
            worksheet
                .write_string(*n_row, *n_col, *text)
                .expect("write cell");
        }
        workbook.save_to_buffer().expect("template bytes")
    }

    #[test]
    fn test_read_template_sheet_returns_first_row_and_sheet_name() {
        let v_xlsx = build_template(&[(0, 0, "Name"), (0, 1, "Photo")]);
        let sheet = read_template_sheet(&v_xlsx).expect("read template");

        assert_eq!(sheet.sheet_name, "Orders");
        assert_eq!(
            sheet.first_row(),
            &[
                EnumCellValue::String("Name".to_string()),
                EnumCellValue::String("Photo".to_string()),
            ]
        );
        assert_eq!(sheet.height(), 1);
    }

    #[test]
    fn test_read_template_sheet_keeps_absolute_positions() {
        let v_xlsx = build_template(&[(0, 1, "Name"), (2, 0, "note")]);
        let sheet = read_template_sheet(&v_xlsx).expect("read template");

        assert_eq!(sheet.height(), 3);
        assert_eq!(
            sheet.first_row(),
            &[EnumCellValue::None, EnumCellValue::String("Name".to_string())]
        );
        assert_eq!(
            sheet.l_body_cells,
            vec![SpecTemplateCell {
                n_idx_row: 2,
                n_idx_col: 0,
                value: EnumCellValue::String("note".to_string()),
            }]
        );
    }

    #[test]
    fn test_read_template_sheet_far_stray_cell_stays_sparse() {
        let v_xlsx = build_template(&[(1_048_575, 16_383, "stray")]);
        let sheet = read_template_sheet(&v_xlsx).expect("read template");

        assert!(sheet.first_row().is_empty());
        assert_eq!(sheet.height(), 1_048_576);
        assert_eq!(
            sheet.l_body_cells,
            vec![SpecTemplateCell {
                n_idx_row: 1_048_575,
                n_idx_col: 16_383,
                value: EnumCellValue::String("stray".to_string()),
            }]
        );
    }

    #[test]
    fn test_read_template_sheet_empty_sheet_has_no_cells() {
        let v_xlsx = build_template(&[]);
        let sheet = read_template_sheet(&v_xlsx).expect("read template");
        assert!(sheet.first_row().is_empty());
        assert!(sheet.l_body_cells.is_empty());
        assert_eq!(sheet.height(), 0);
    }

    #[test]
    fn test_read_template_sheet_rejects_non_xlsx_bytes() {
        let err = read_template_sheet(b"not a workbook").unwrap_err();
        assert!(err.starts_with("Failed to open template workbook"));
    }
}
