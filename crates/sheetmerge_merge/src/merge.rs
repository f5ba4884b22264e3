//! Per-group merge pipeline: template -> columns -> rows/images -> file.

use sheetmerge_io_fs::{derive_output_file_path, derive_timestamp_now, write_output_file};
use sheetmerge_io_xlsx::{SpecColumn, TemplateSheetWriter, read_template_sheet};
use tracing::{debug, instrument, warn};

use crate::column::derive_columns;
use crate::error::MergeError;
use crate::image::{decode_image_data_url, is_image_field};
use crate::spec::{
    CanonicalId, EnumImageAnchorRule, EnumMergeStage, SpecGroupMerge, SpecImageAnchor,
    SpecMergeOptions, SpecRecord, SpecRowView, SpecTemplateArtifact,
};

/// Split one record into cell values and image anchors.
///
/// Image fields never reach the cell values. An image that fails to decode is
/// reported in `warnings` and its cell stays blank.
pub fn derive_row_view(
    record: &SpecRecord,
    columns: &[SpecColumn],
    rule_image_anchor: EnumImageAnchorRule,
) -> SpecRowView {
    let mut row_view = SpecRowView::default();
    for (n_idx_field, (field_name, value)) in record.iter().enumerate() {
        if !is_image_field(value) {
            row_view
                .dict_values
                .insert(field_name.to_string(), value.to_cell_value());
            continue;
        }

        let Some(c_data_url) = value.as_str() else {
            continue;
        };
        match decode_image_data_url(c_data_url) {
            Ok(image) => {
                let n_idx_col = match rule_image_anchor {
                    EnumImageAnchorRule::FieldOrder => n_idx_field,
                    EnumImageAnchorRule::Column => columns
                        .iter()
                        .find(|column| column.key == field_name)
                        .map_or(n_idx_field, |column| column.n_idx_col),
                };
                row_view.l_images.push(SpecImageAnchor {
                    field_name: field_name.to_string(),
                    n_idx_col,
                    image,
                });
            }
            Err(msg) => row_view
                .warnings
                .push(format!("Field {field_name:?} skipped: {msg}")),
        }
    }
    row_view
}

/// Merge one template group into a new workbook file.
///
/// Stages run strictly in order (`loaded`, `columns-derived`,
/// `rows-appended(n)`, `serialized`) and any failure stops this group only.
/// Rows are appended below the template body in record order.
#[instrument(skip_all, fields(template_id = %template_id, n_records = records.len()))]
pub fn merge_group(
    records: &[SpecRecord],
    artifact: &SpecTemplateArtifact,
    template_id: &CanonicalId,
    options: &SpecMergeOptions,
) -> Result<SpecGroupMerge, MergeError> {
    let err_at = |stage: EnumMergeStage| {
        move |message: String| MergeError::MergeComputation {
            template_id: template_id.clone(),
            stage,
            message,
        }
    };

    // Loaded
    let sheet_template =
        read_template_sheet(&artifact.v_content).map_err(err_at(EnumMergeStage::Loaded))?;
    let mut writer = TemplateSheetWriter::new(
        &sheet_template.sheet_name,
        options.fmt_text.clone(),
        options.fmt_header.clone(),
        options.policy_autofit.clone(),
    )
    .map_err(err_at(EnumMergeStage::Loaded))?;
    writer
        .write_template_body(&sheet_template)
        .map_err(err_at(EnumMergeStage::Loaded))?;

    // ColumnsDerived
    let l_columns = derive_columns(sheet_template.first_row());
    if l_columns.is_empty() {
        warn!("template header row is empty; appended rows will be blank");
        writer.warn("Template header row is empty.");
    }
    writer
        .set_columns(l_columns.clone())
        .map_err(err_at(EnumMergeStage::ColumnsDerived))?;
    debug!(n_columns = l_columns.len(), "columns derived");

    // RowsAppended(n)
    let mut n_rows_appended = 0usize;
    for record in records {
        let row_view = derive_row_view(record, &l_columns, options.rule_image_anchor);
        let n_idx_row = writer.next_row_index();
        for msg in &row_view.warnings {
            warn!(row = n_idx_row, "{msg}");
            writer.warn(msg);
        }
        for anchor in &row_view.l_images {
            if let Err(msg) = writer.embed_image(
                &anchor.image.v_bytes,
                &anchor.image.extension,
                n_idx_row,
                anchor.n_idx_col,
            ) {
                warn!(field = %anchor.field_name, "{msg}");
                writer.warn(format!("Field {:?} skipped: {msg}", anchor.field_name));
            }
        }
        writer
            .append_row(&row_view.dict_values)
            .map_err(err_at(EnumMergeStage::RowsAppended(n_rows_appended)))?;
        n_rows_appended += 1;
    }

    // Serialized
    let v_xlsx = writer
        .save_to_buffer()
        .map_err(|message| MergeError::Serialization {
            template_id: template_id.clone(),
            message,
        })?;
    let into_output_err = |source| MergeError::Output {
        template_id: template_id.clone(),
        source,
    };
    let path_file_out = derive_output_file_path(
        &options.layout,
        template_id.as_str(),
        artifact.file_name_or_default(),
        &derive_timestamp_now(),
    )
    .map_err(into_output_err)?;
    write_output_file(&path_file_out, &v_xlsx).map_err(into_output_err)?;

    let report = writer.report();
    debug!(
        path = %path_file_out.display(),
        n_rows = report.n_rows_appended,
        n_images = report.n_images_embedded,
        "group serialized"
    );
    Ok(SpecGroupMerge {
        template_id: template_id.clone(),
        path_file_out,
        report,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use sheetmerge_io_fs::SpecScratchLayout;
    use sheetmerge_io_xlsx::EnumCellValue;

    use super::*;
    use crate::spec::EnumFieldValue;

    fn columns(l_keys: &[&str]) -> Vec<SpecColumn> {
        l_keys
            .iter()
            .enumerate()
            .map(|(n_idx_col, key)| SpecColumn {
                header: key.to_string(),
                key: key.to_string(),
                n_idx_col,
            })
            .collect()
    }

    #[test]
    fn test_row_view_strips_image_fields() {
        let record = SpecRecord::from_fields([
            ("Name", EnumFieldValue::from("Alice")),
            ("Photo", EnumFieldValue::from("data:image/png;base64,QQ==")),
        ]);
        let row_view =
            derive_row_view(&record, &columns(&["Name", "Photo"]), EnumImageAnchorRule::FieldOrder);

        assert_eq!(
            row_view.dict_values.get("Name"),
            Some(&EnumCellValue::String("Alice".to_string()))
        );
        assert!(!row_view.dict_values.contains_key("Photo"));
        assert_eq!(row_view.l_images.len(), 1);
        assert_eq!(row_view.l_images[0].n_idx_col, 1);
        assert_eq!(row_view.l_images[0].image.v_bytes, vec![0x41]);
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_row_view_keeps_empty_image_placeholder_as_cell() {
        let record = SpecRecord::from_fields([("Photo", "")]);
        let row_view = derive_row_view(&record, &columns(&["Photo"]), EnumImageAnchorRule::default());
        assert_eq!(
            row_view.dict_values.get("Photo"),
            Some(&EnumCellValue::String(String::new()))
        );
        assert!(row_view.l_images.is_empty());
    }

    #[test]
    fn test_row_view_anchor_by_column_rule() {
        let record = SpecRecord::from_fields([
            ("Photo", EnumFieldValue::from("data:image/png;base64,QQ==")),
            ("Name", EnumFieldValue::from("Bob")),
            ("Logo", EnumFieldValue::from("data:image/png;base64,QQ==")),
        ]);
        let l_columns = columns(&["Name", "Photo"]);

        let row_view = derive_row_view(&record, &l_columns, EnumImageAnchorRule::Column);
        let l_cols: Vec<usize> = row_view.l_images.iter().map(|img| img.n_idx_col).collect();
        assert_eq!(l_cols, vec![1, 2]);

        let row_view = derive_row_view(&record, &l_columns, EnumImageAnchorRule::FieldOrder);
        let l_cols: Vec<usize> = row_view.l_images.iter().map(|img| img.n_idx_col).collect();
        assert_eq!(l_cols, vec![0, 2]);
    }

    #[test]
    fn test_row_view_warns_on_undecodable_image() {
        let record = SpecRecord::from_fields([("Photo", "data:image/png;base64,@@")]);
        let row_view = derive_row_view(&record, &[], EnumImageAnchorRule::FieldOrder);
        assert!(row_view.dict_values.is_empty());
        assert!(row_view.l_images.is_empty());
        assert_eq!(row_view.warnings.len(), 1);
    }

    #[test]
    fn test_merge_group_rejects_unreadable_template() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = SpecMergeOptions {
            layout: SpecScratchLayout::new(dir.path()),
            ..Default::default()
        };
        let artifact = SpecTemplateArtifact {
            v_content: b"not a workbook".to_vec(),
            file_name: None,
        };
        let err = merge_group(&[], &artifact, &CanonicalId::from("T9"), &options).unwrap_err();
        assert!(matches!(
            err,
            MergeError::MergeComputation {
                stage: EnumMergeStage::Loaded,
                ..
            }
        ));
        assert!(!dir.path().join("T9").exists());
    }
}
