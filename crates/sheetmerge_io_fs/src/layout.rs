//! Per-template scratch directories and unique, timestamped output paths.
//!
//! Layout: `<root>/<template id>/<timestamp>_<file name>`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::spec::{C_TIMESTAMP_FORMAT, LayoutError, SpecScratchLayout};
use crate::util::{
    derive_unique_path, sanitize_file_name, sanitize_path_component,
    validate_destination_path_safety,
};

/// Current local time formatted with [`C_TIMESTAMP_FORMAT`].
pub fn derive_timestamp_now() -> String {
    chrono::Local::now().format(C_TIMESTAMP_FORMAT).to_string()
}

/// Create (if absent) and return the directory for `template_id`.
pub fn prepare_group_dir(
    layout: &SpecScratchLayout,
    template_id: &str,
) -> Result<PathBuf, LayoutError> {
    let c_dir_name = sanitize_path_component(template_id)
        .ok_or_else(|| LayoutError::InvalidTemplateId(template_id.to_string()))?;
    let path_dir_group = layout.path_dir_root.join(c_dir_name);

    validate_destination_path_safety(&path_dir_group, &layout.path_dir_root)
        .map_err(LayoutError::UnsafePath)?;
    fs::create_dir_all(&path_dir_group).map_err(|source| LayoutError::CreateDir {
        path: path_dir_group.clone(),
        source,
    })?;

    Ok(path_dir_group)
}

/// Derive a free output path for one merge of `template_id`.
///
/// The file name is `{timestamp}_{file_name}`; when that path is already taken
/// a `__N` counter is inserted before the extension.
pub fn derive_output_file_path(
    layout: &SpecScratchLayout,
    template_id: &str,
    file_name: &str,
    timestamp: &str,
) -> Result<PathBuf, LayoutError> {
    let path_dir_group = prepare_group_dir(layout, template_id)?;
    let c_file_name = sanitize_file_name(&format!("{timestamp}_{}", sanitize_file_name(file_name)));
    let path_file_out = derive_unique_path(&path_dir_group.join(c_file_name));

    validate_destination_path_safety(&path_file_out, &layout.path_dir_root)
        .map_err(LayoutError::UnsafePath)?;
    Ok(path_file_out)
}

/// Write `v_content` to `path_file_out` through a sibling temporary file.
///
/// The destination only appears once fully written, and an existing file is
/// never replaced.
pub fn write_output_file(path_file_out: &Path, v_content: &[u8]) -> Result<(), LayoutError> {
    let into_write_err = |source: std::io::Error| LayoutError::WriteFile {
        path: path_file_out.to_path_buf(),
        source,
    };

    let path_dir_parent = path_file_out
        .parent()
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut file_tmp = NamedTempFile::new_in(path_dir_parent).map_err(into_write_err)?;
    file_tmp.write_all(v_content).map_err(into_write_err)?;
    file_tmp.flush().map_err(into_write_err)?;
    file_tmp
        .persist_noclobber(path_file_out)
        .map_err(|err| into_write_err(err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_is_scoped_per_template() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = SpecScratchLayout::new(dir.path());

        let path_out =
            derive_output_file_path(&layout, "T1", "report.xlsx", "2024-01-02T03-04-05.006")
                .expect("path");
        assert_eq!(
            path_out,
            dir.path().join("T1").join("2024-01-02T03-04-05.006_report.xlsx")
        );
        assert!(dir.path().join("T1").is_dir());
    }

    #[test]
    fn test_output_path_falls_back_to_default_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = SpecScratchLayout::new(dir.path());
        let path_out = derive_output_file_path(&layout, "7", "", "ts").expect("path");
        assert_eq!(path_out, dir.path().join("7").join("ts_template.xlsx"));
    }

    #[test]
    fn test_output_paths_never_collide_within_one_timestamp() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = SpecScratchLayout::new(dir.path());

        let path_first = derive_output_file_path(&layout, "T1", "a.xlsx", "ts").expect("first");
        write_output_file(&path_first, b"one").expect("write first");
        let path_second = derive_output_file_path(&layout, "T1", "a.xlsx", "ts").expect("second");
        assert_ne!(path_first, path_second);
        assert_eq!(path_second, dir.path().join("T1").join("ts_a__2.xlsx"));
    }

    #[test]
    fn test_template_id_cannot_escape_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let layout = SpecScratchLayout::new(dir.path().join("root"));

        let path_dir = prepare_group_dir(&layout, "../evil").expect("sanitized dir");
        assert_eq!(path_dir, dir.path().join("root").join("_evil"));
        assert!(matches!(
            prepare_group_dir(&layout, ".."),
            Err(LayoutError::InvalidTemplateId(_))
        ));
    }

    #[test]
    fn test_write_output_file_refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path_file = dir.path().join("out.xlsx");
        write_output_file(&path_file, b"one").expect("write");
        assert!(write_output_file(&path_file, b"two").is_err());
        assert_eq!(fs::read(&path_file).expect("read"), b"one");
    }

    #[test]
    fn test_timestamp_has_no_colons() {
        let c_ts = derive_timestamp_now();
        assert!(!c_ts.contains(':'));
        assert_eq!(c_ts.len(), "2024-01-02T03-04-05.006".len());
    }
}
