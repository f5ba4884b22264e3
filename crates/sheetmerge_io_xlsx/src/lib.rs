//! `sheetmerge_io_xlsx` v1:
//! Rust-side XLSX template kernel.
//!
//! Module layout:
//! - `conf`   : constants and default presets
//! - `spec`   : specs/models/options
//! - `util`   : pure helper functions
//! - `reader` : template loading (first worksheet, header row, sparse body)
//! - `writer` : single-writer sheet builder (header, rows, embedded images)
pub mod conf;
pub mod reader;
pub mod spec;
pub mod util;
pub mod writer;

pub use conf::{
    C_SHEET_NAME_DEFAULT, N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX,
    TUP_EXCEL_ILLEGAL,
};
pub use reader::read_template_sheet;
pub use spec::{
    EnumAutofitColumnsRule, EnumCellValue, SpecAutofitCellsPolicy, SpecCellFormat, SpecColumn,
    SpecTemplateCell, SpecTemplateSheet, SpecXlsxReport,
};
pub use util::{sanitize_sheet_name, validate_image_buffer, validate_unique_columns};
pub use writer::TemplateSheetWriter;
