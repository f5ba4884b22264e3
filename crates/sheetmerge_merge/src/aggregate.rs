//! Per-group merge result for upload.

use std::path::Path;

use crate::conf::SpecRecordFields;
use crate::spec::{CanonicalId, EnumFieldValue, SpecMergeArtifact, SpecRecord};

/// Collect the upload metadata of one merged group.
///
/// Record ids keep merge order and skip falsy values. The user id is taken from
/// the first record only, not the most recently updated one.
pub fn aggregate_merge_result(
    template_id: &CanonicalId,
    path_file_out: &Path,
    records: &[SpecRecord],
    record_fields: &SpecRecordFields,
) -> SpecMergeArtifact {
    let record_ids = records
        .iter()
        .filter_map(|record| record.get(&record_fields.record_id))
        .filter(|value| value.is_truthy())
        .map(EnumFieldValue::to_key_string)
        .collect();
    let user_id = records
        .first()
        .and_then(|record| record.get(&record_fields.last_user_id))
        .filter(|value| value.is_truthy())
        .map(EnumFieldValue::to_key_string);

    SpecMergeArtifact {
        template_id: template_id.clone(),
        path_file_out: path_file_out.to_path_buf(),
        record_ids,
        user_id,
    }
}
