//! Column model derived from a template header row.

use sheetmerge_io_xlsx::{EnumCellValue, SpecColumn};

/// One column per non-blank header cell; header and key are both the cell text.
///
/// Blank cells are dropped from the model, but every column keeps the sheet
/// column its header sits in. An empty header row yields an empty model, and every appended row is then
/// blank. That is accepted as-is.
pub fn derive_columns(first_row: &[EnumCellValue]) -> Vec<SpecColumn> {
    first_row
        .iter()
        .enumerate()
        .filter(|(_, value)| !value.is_blank())
        .map(|(n_idx_col, value)| {
            let c_text = value.to_text();
            SpecColumn {
                header: c_text.clone(),
                key: c_text,
                n_idx_col,
            }
        })
        .collect()
}
