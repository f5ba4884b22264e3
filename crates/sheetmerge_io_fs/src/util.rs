use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::spec::C_FILE_NAME_DEFAULT;

////////////////////////////////////////////////////////////////////////////////
// #region NameSanitizing

static RE_UNSAFE_NAME_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[/\\:*?"<>|\x00-\x1f]"#).expect("static pattern compiles")
});

/// Replace path separators, reserved and control characters with `_`.
///
/// Returns `None` when nothing usable remains (empty, `.` or `..`).
pub(crate) fn sanitize_path_component(name: &str) -> Option<String> {
    let c_name = RE_UNSAFE_NAME_CHARS.replace_all(name.trim(), "_");
    let c_name = c_name.trim_matches(|chr: char| chr == ' ' || chr == '.');
    if c_name.is_empty() {
        return None;
    }
    Some(c_name.to_string())
}

/// Sanitize a file name for use inside a template directory.
///
/// Falls back to `template.xlsx` when nothing usable remains.
pub fn sanitize_file_name(name: &str) -> String {
    sanitize_path_component(name).unwrap_or_else(|| C_FILE_NAME_DEFAULT.to_string())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PathUtilities

fn _absolutize_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

/// Reject destinations that escape `path_dir_root` or traverse a symlink.
pub(crate) fn validate_destination_path_safety(
    path_dst_item: &Path,
    path_dir_root: &Path,
) -> Result<(), String> {
    let path_dir_root_abs = _absolutize_path(path_dir_root);
    let path_dst_item_abs = _absolutize_path(path_dst_item);

    let path_rel = path_dst_item_abs
        .strip_prefix(&path_dir_root_abs)
        .map_err(|_| {
            format!(
                "destination escapes scratch root: {} (root={})",
                path_dst_item.display(),
                path_dir_root.display()
            )
        })?;

    let mut path_cursor = path_dir_root_abs.clone();
    for part_rel in path_rel.components() {
        path_cursor.push(part_rel.as_os_str());
        match fs::symlink_metadata(&path_cursor) {
            Ok(meta_cursor) => {
                if meta_cursor.file_type().is_symlink() {
                    return Err(format!(
                        "destination traverses symlink component: {}",
                        path_cursor.display()
                    ));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(format!(
                    "failed to inspect destination path component {} ({e})",
                    path_cursor.display()
                ));
            }
        }
    }

    Ok(())
}

/// Return `path` itself when free, else the first `stem__N.ext` (N >= 2) that is.
pub(crate) fn derive_unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|val| val.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|val| format!(".{}", val.to_string_lossy()))
        .unwrap_or_default();
    let path_dir = path.parent().unwrap_or(Path::new(""));

    let mut n_idx = 2usize;
    loop {
        let candidate = path_dir.join(format!("{stem}__{n_idx}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n_idx += 1;
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
