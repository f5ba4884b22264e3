//! Partition records by template id.

use crate::spec::{CanonicalId, SpecRecord, SpecTemplateGroup};

/// Group `records` by the value of `template_id_field`.
///
/// Groups are ordered by first appearance of their template id and keep the
/// relative input order of their records. Records whose template id is missing
/// or falsy are dropped. Numeric and string forms of the same id share a group.
pub fn group_records(records: &[SpecRecord], template_id_field: &str) -> Vec<SpecTemplateGroup> {
    let mut l_groups: Vec<SpecTemplateGroup> = Vec::new();
    for record in records {
        let Some(template_id) = record
            .get(template_id_field)
            .and_then(CanonicalId::from_field_value)
        else {
            continue;
        };
        match l_groups.iter_mut().find(|group| group.template_id == template_id) {
            Some(group) => group.records.push(record.clone()),
            None => l_groups.push(SpecTemplateGroup {
                template_id,
                records: vec![record.clone()],
            }),
        }
    }
    l_groups
}
