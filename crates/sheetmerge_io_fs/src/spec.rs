//! Scratch layout specification models and error types.

use std::path::PathBuf;

use thiserror::Error;

/// Fallback output file name when the template carried none.
pub const C_FILE_NAME_DEFAULT: &str = "template.xlsx";
/// Directory created under the OS temp dir when no scratch root is configured.
pub const C_SCRATCH_DIR_NAME: &str = "sheetmerge";
/// `chrono` format for the file-name timestamp prefix (no `:` so it is valid on
/// every platform).
pub const C_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";

/// Root under which one subdirectory per template id is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecScratchLayout {
    /// Scratch root directory.
    pub path_dir_root: PathBuf,
}

impl Default for SpecScratchLayout {
    fn default() -> Self {
        Self {
            path_dir_root: std::env::temp_dir().join(C_SCRATCH_DIR_NAME),
        }
    }
}

impl SpecScratchLayout {
    /// Layout rooted at `path_dir_root`.
    pub fn new(path_dir_root: impl Into<PathBuf>) -> Self {
        Self {
            path_dir_root: path_dir_root.into(),
        }
    }
}

/// Failures while preparing or writing into the scratch layout.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// Template id sanitizes to an empty path component.
    #[error("Template id {0:?} cannot be used as a directory name")]
    InvalidTemplateId(String),
    /// Path would escape the scratch root or traverse a symlink.
    #[error("Unsafe output path: {0}")]
    UnsafePath(String),
    /// Directory creation failed.
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// File write failed.
    #[error("Failed to write file {path}: {source}")]
    WriteFile {
        /// File that could not be written.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}
