//! Merge constants and JSON job configuration.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use sheetmerge_io_fs::SpecScratchLayout;

use crate::error::MergeError;
use crate::spec::{CanonicalId, EnumFieldValue, EnumImageAnchorRule, SpecMergeOptions};

/// Record field used for record updates and merged-doc record ids.
pub const C_FIELD_ID: &str = "id";
/// Record field listed in merge details.
pub const C_FIELD_RECORD_ID: &str = "Record ID";
/// Record field naming the last updating user.
pub const C_FIELD_LAST_USER_ID: &str = "Last User(id)";
/// Prefix marking a field value as an inline image.
pub const C_IMAGE_PREFIX: &str = "data:image";
/// Field structure type of attachment image fields.
pub const C_FIELD_TYPE_IMAGE: &str = "image";
/// Export-field table key of the merged-doc table.
pub const C_TABLE_MERGE: &str = "MERGE";
/// Export-field table key of the template table.
pub const C_TABLE_TEMPLATE: &str = "TEMPLATE";
/// Maximum records fetched from one view.
pub const N_PAGING_MAX_DEFAULT: usize = 1000;
/// Upper bound of the default worker count.
pub const N_WORKERS_MAX_DEFAULT: usize = 8;

////////////////////////////////////////////////////////////////////////////////
// #region ConfigSpecification

/// Full job configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecMergeConfig {
    /// Source tables whose records get merged.
    pub source_tables: SpecSourceTablesConfig,
    /// Table holding template documents.
    pub template_table: SpecTemplateTableConfig,
    /// Table receiving merged documents.
    pub merged_doc_table: SpecMergedDocTableConfig,
    /// Table key (`MERGE`, `TEMPLATE`) -> setting name -> field name; used only
    /// to diagnose field-name misconfiguration.
    #[serde(default)]
    pub export_fields: BTreeMap<String, BTreeMap<String, String>>,
    /// Well-known record field names.
    #[serde(default)]
    pub record_fields: SpecRecordFields,
    /// Engine settings.
    #[serde(default)]
    pub merge: SpecMergeSettings,
}

/// Source table bindings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecSourceTablesConfig {
    /// Relationship field reset to null before merging.
    pub template_relationship_field_name: String,
    /// Field carrying the template id records are grouped by.
    pub template_relationship_field_name_id: String,
    /// Source table id -> merge view id.
    pub table_ids_to_view_ids: BTreeMap<CanonicalId, CanonicalId>,
}

/// Template table bindings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecTemplateTableConfig {
    /// View exposing template records.
    #[serde(deserialize_with = "deserialize_view_id")]
    pub view_id: String,
    /// File field holding the template document.
    pub field_name_for_template_document: String,
}

/// Merged-doc table bindings; empty optional names count as unset.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpecMergedDocTableConfig {
    /// View receiving merged-doc records.
    #[serde(deserialize_with = "deserialize_view_id")]
    pub view_id: String,
    /// Text field receiving `Merged <n> records:` details.
    #[serde(default, deserialize_with = "deserialize_optional_name")]
    pub merged_doc_details_field_name: Option<String>,
    /// Relationship field pointing back to the template.
    #[serde(default, deserialize_with = "deserialize_optional_name")]
    pub merged_doc_to_template_relationship_field_name: Option<String>,
    /// Field receiving the merging user id.
    #[serde(default, deserialize_with = "deserialize_optional_name")]
    pub merge_user_field_name: Option<String>,
    /// File field the merged workbook is attached to.
    pub merged_document_field_name: String,
}

/// Well-known record field names.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecRecordFields {
    /// Record id used for updates (`id`).
    pub id: String,
    /// Record id listed in merge details and used for attachment fetches (`Record ID`).
    pub record_id: String,
    /// Last updating user (`Last User(id)`).
    pub last_user_id: String,
}

impl Default for SpecRecordFields {
    fn default() -> Self {
        Self {
            id: C_FIELD_ID.to_string(),
            record_id: C_FIELD_RECORD_ID.to_string(),
            last_user_id: C_FIELD_LAST_USER_ID.to_string(),
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecMergeSettings {
    /// Scratch root; defaults to `<temp dir>/sheetmerge`.
    pub scratch_root: Option<PathBuf>,
    /// Worker bound for group merges; `1` is strictly sequential.
    pub num_workers_max: Option<usize>,
    /// Image anchoring rule.
    pub image_anchor: EnumImageAnchorRule,
    /// Maximum records fetched from the merge view.
    pub paging_max: usize,
}

impl Default for SpecMergeSettings {
    fn default() -> Self {
        Self {
            scratch_root: None,
            num_workers_max: None,
            image_anchor: EnumImageAnchorRule::default(),
            paging_max: N_PAGING_MAX_DEFAULT,
        }
    }
}

impl SpecMergeSettings {
    /// Effective worker count: configured value, else `min(cpus, 8)`; never 0.
    pub fn derive_num_workers(&self) -> usize {
        self.num_workers_max
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(usize::from)
                    .unwrap_or(1)
                    .min(N_WORKERS_MAX_DEFAULT)
            })
            .max(1)
    }

    /// Per-group merge options derived from these settings.
    pub fn derive_merge_options(&self) -> SpecMergeOptions {
        let layout = match &self.scratch_root {
            Some(path_dir_root) => SpecScratchLayout::new(path_dir_root),
            None => SpecScratchLayout::default(),
        };
        SpecMergeOptions {
            layout,
            rule_image_anchor: self.image_anchor,
            ..Default::default()
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ConfigLoading

/// Parse a JSON configuration document.
pub fn parse_merge_config(c_json: &str) -> Result<SpecMergeConfig, MergeError> {
    serde_json::from_str(c_json)
        .map_err(|err| MergeError::Configuration(format!("Invalid merge config: {err}")))
}

/// Read and parse a JSON configuration file.
pub fn load_merge_config(path_file_config: &Path) -> Result<SpecMergeConfig, MergeError> {
    let c_json = fs::read_to_string(path_file_config).map_err(|err| {
        MergeError::Configuration(format!(
            "Failed to read merge config {}: {err}",
            path_file_config.display()
        ))
    })?;
    parse_merge_config(&c_json)
}

/// View ids arrive as numbers or strings; keep the raw text so validation can
/// report what was configured.
fn deserialize_view_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = EnumFieldValue::deserialize(deserializer)?;
    Ok(value.to_key_string())
}

fn deserialize_optional_name<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|name| !name.trim().is_empty()))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
