//! `sheetmerge_io_fs` v1:
//! Rust-side scratch-directory layout for merge artifacts.
//!
//! Module layout:
//! - `layout` : per-template directories and unique output paths
//! - `spec`   : layout options and errors
//! - `util`   : name sanitizing and destination safety checks

pub mod layout;
pub mod spec;
mod util;

pub use layout::{
    derive_output_file_path, derive_timestamp_now, prepare_group_dir, write_output_file,
};
pub use spec::{
    C_FILE_NAME_DEFAULT, C_SCRATCH_DIR_NAME, C_TIMESTAMP_FORMAT, LayoutError, SpecScratchLayout,
};
pub use util::sanitize_file_name;
