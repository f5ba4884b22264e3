//! Stateless helper utilities used by the XLSX reader/writer kernels.

use std::collections::{BTreeMap, BTreeSet};

use rust_xlsxwriter::{Format, FormatAlign, XlsxError};

use crate::conf::{
    C_SHEET_NAME_DEFAULT, N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX,
    TUP_EXCEL_ILLEGAL,
};
use crate::spec::SpecCellFormat;

////////////////////////////////////////////////////////////////////////////////
// #region ColumnUtils

/// Validate that `columns` has no duplicated names.
pub fn validate_unique_columns(columns: &[String]) -> Result<(), String> {
    if columns.len() == columns.iter().collect::<BTreeSet<_>>().len() {
        return Ok(());
    }

    let mut dict_pos: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (n_idx, c_name) in columns.iter().enumerate() {
        dict_pos.entry(c_name).or_default().push(n_idx);
    }

    let c_msg = dict_pos
        .iter()
        .filter_map(|(c_name, l_pos)| {
            if l_pos.len() > 1 {
                Some(format!(
                    "{c_name:?} x{} at indices {:?}",
                    l_pos.len(),
                    l_pos
                ))
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("; ");

    Err(format!("Duplicate column names detected: {c_msg}"))
}

/// Approximate display width: non-ASCII characters count as 1.6 units.
pub fn estimate_unicode_string_width(s: &str) -> usize {
    let n_ascii = s.chars().filter(|chr| chr.is_ascii()).count();
    let n_non_ascii = s.chars().count().saturating_sub(n_ascii);
    n_ascii + (n_non_ascii as f64 * 1.6).round() as usize
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetNames

/// Replace illegal characters, trim, and cut to the Excel sheet-name limit.
pub fn sanitize_sheet_name(name: &str, replace_to: &str) -> String {
    let mut c_name = name.to_string();
    for c_illegal in TUP_EXCEL_ILLEGAL {
        c_name = c_name.replace(c_illegal, replace_to);
    }
    let c_name = c_name.trim().trim_matches('\'').trim();
    if c_name.is_empty() {
        return C_SHEET_NAME_DEFAULT.to_string();
    }

    c_name.chars().take(N_LEN_EXCEL_SHEET_NAME_MAX).collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CellAddressing

pub(crate) fn cast_row_num(value: usize) -> Result<u32, String> {
    if value >= N_NROWS_EXCEL_MAX {
        return Err(format!(
            "row index {value} exceeds Excel limit of {N_NROWS_EXCEL_MAX} rows"
        ));
    }
    u32::try_from(value).map_err(|_| format!("row index overflow: {value}"))
}

pub(crate) fn cast_col_num(value: usize) -> Result<u16, String> {
    if value >= N_NCOLS_EXCEL_MAX {
        return Err(format!(
            "column index {value} exceeds Excel limit of {N_NCOLS_EXCEL_MAX} columns"
        ));
    }
    u16::try_from(value).map_err(|_| format!("column index overflow: {value}"))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RustXlsxWriterBridge

pub(crate) fn derive_xlsx_error_text(err: XlsxError) -> String {
    format!("xlsx write error: {err}")
}

pub(crate) fn derive_rust_xlsx_format(spec: &SpecCellFormat) -> Format {
    let mut format = Format::new();

    if let Some(val) = &spec.font_name {
        format = format.set_font_name(val.clone());
    }
    if let Some(val) = spec.font_size {
        format = format.set_font_size(val as f64);
    }
    if spec.bold.unwrap_or(false) {
        format = format.set_bold();
    }

    if let Some(val) = &spec.align
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }
    if let Some(val) = &spec.valign
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }

    if let Some(val) = &spec.num_format {
        format = format.set_num_format(val.clone());
    }
    if spec.text_wrap.unwrap_or(false) {
        format = format.set_text_wrap();
    }

    format
}

fn derive_format_align(align: &str) -> Option<FormatAlign> {
    let value = align.trim().to_ascii_lowercase();
    match value.as_str() {
        "general" => Some(FormatAlign::General),
        "left" => Some(FormatAlign::Left),
        "center" => Some(FormatAlign::Center),
        "right" => Some(FormatAlign::Right),
        "top" => Some(FormatAlign::Top),
        "bottom" => Some(FormatAlign::Bottom),
        "vcenter" | "vertical_center" => Some(FormatAlign::VerticalCenter),
        _ => None,
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ImageBuffers

const N_IMAGE_HEADER_LEN_MIN: usize = 4;

/// Check that every header field the image embedder reads lies inside `v_image`.
///
/// Covers the PNG chunk walk, the JPEG segment walk and the fixed BMP/GIF
/// size fields. Payloads with no known signature pass through; the embedder
/// rejects them itself.
pub fn validate_image_buffer(v_image: &[u8]) -> Result<(), String> {
    let n_len = v_image.len();
    if n_len < N_IMAGE_HEADER_LEN_MIN {
        return Err(format!(
            "image payload of {n_len} bytes is too short to carry an image header"
        ));
    }
    let err_truncated = |kind: &str| format!("truncated {kind} image ({n_len} bytes)");

    if &v_image[1..4] == b"PNG" {
        let mut n_offset = 8usize;
        while n_offset < n_len {
            let Some(v_chunk) = v_image.get(n_offset..n_offset + 8) else {
                return Err(err_truncated("PNG"));
            };
            let n_chunk_len = u32::from_be_bytes([v_chunk[0], v_chunk[1], v_chunk[2], v_chunk[3]]);
            let n_end_read = match &v_chunk[4..8] {
                b"IHDR" => n_offset + 16,
                b"pHYs" => n_offset + 17,
                b"IEND" => break,
                _ => n_offset + 8,
            };
            if n_end_read > n_len {
                return Err(err_truncated("PNG"));
            }
            n_offset = n_offset.saturating_add(n_chunk_len as usize + 12);
        }
    } else if v_image[0..2] == [0xFF_u8, 0xD8] {
        let mut n_offset = 2usize;
        while n_offset < n_len {
            let Some(v_segment) = v_image.get(n_offset..n_offset + 4) else {
                return Err(err_truncated("JPEG"));
            };
            let n_marker = u16::from_be_bytes([v_segment[0], v_segment[1]]);
            let n_segment_len = u16::from_be_bytes([v_segment[2], v_segment[3]]);
            let n_end_read = if n_marker & 0xFFF0 == 0xFFC0
                && !matches!(n_marker, 0xFFC4 | 0xFFC8 | 0xFFCC)
            {
                n_offset + 9
            } else if n_marker == 0xFFE0 {
                n_offset + 16
            } else {
                n_offset + 4
            };
            if n_end_read > n_len {
                return Err(err_truncated("JPEG"));
            }
            if n_marker == 0xFFDA {
                break;
            }
            n_offset += n_segment_len as usize + 2;
        }
    } else if &v_image[0..2] == b"BM" {
        if n_len < 26 {
            return Err(err_truncated("BMP"));
        }
    } else if &v_image[0..4] == b"GIF8" && n_len < 10 {
        return Err(err_truncated("GIF"));
    }
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_sheet_name_replaces_illegal_and_truncates() {
        assert_eq!(sanitize_sheet_name("a/b:c", "_"), "a_b_c");
        assert_eq!(sanitize_sheet_name("   ", "_"), "Sheet1");
        let c_long = "x".repeat(40);
        assert_eq!(sanitize_sheet_name(&c_long, "_").len(), N_LEN_EXCEL_SHEET_NAME_MAX);
    }

    #[test]
    fn test_validate_unique_columns_reports_positions() {
        assert!(validate_unique_columns(&["A".to_string(), "B".to_string()]).is_ok());
        let err = validate_unique_columns(&[
            "A".to_string(),
            "B".to_string(),
            "A".to_string(),
        ])
        .unwrap_err();
        assert!(err.contains("\"A\" x2 at indices [0, 2]"));
    }

    #[test]
    fn test_cast_rejects_out_of_sheet_addresses() {
        assert_eq!(cast_row_num(3), Ok(3));
        assert!(cast_row_num(N_NROWS_EXCEL_MAX).is_err());
        assert!(cast_col_num(N_NCOLS_EXCEL_MAX).is_err());
    }

    #[test]
    fn test_estimate_width_counts_wide_chars() {
        assert_eq!(estimate_unicode_string_width("Name"), 4);
        assert_eq!(estimate_unicode_string_width("名前"), 3);
    }

    #[test]
    fn test_validate_image_buffer_rejects_short_and_truncated_payloads() {
        assert!(validate_image_buffer(&[]).is_err());
        assert!(validate_image_buffer(&[0x41]).is_err());
        assert!(validate_image_buffer(b"\x89PN").is_err());
        // PNG signature with a cut-off IHDR chunk.
        let mut v_png = b"\x89PNG\r\n\x1a\n".to_vec();
        v_png.extend_from_slice(&[0, 0, 0, 13]);
        v_png.extend_from_slice(b"IHDR");
        v_png.extend_from_slice(&[0, 0]);
        assert!(validate_image_buffer(&v_png).unwrap_err().contains("PNG"));
        assert!(validate_image_buffer(&[0xFF, 0xD8, 0xFF, 0xC0, 0, 17, 8]).is_err());
        assert!(validate_image_buffer(b"BM\0\0\0\0").is_err());
        assert!(validate_image_buffer(b"GIF89a").is_err());
    }

    #[test]
    fn test_validate_image_buffer_passes_unknown_and_complete_payloads() {
        assert!(validate_image_buffer(b"not really a jpeg").is_ok());
        let v_gif = b"GIF89a\x01\x00\x01\x00\x00".to_vec();
        assert!(validate_image_buffer(&v_gif).is_ok());
    }
}
