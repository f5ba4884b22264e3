//! Shared merge specification models.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sheetmerge_io_fs::{C_FILE_NAME_DEFAULT, SpecScratchLayout};
use sheetmerge_io_xlsx::conf::derive_default_xlsx_formats;
use sheetmerge_io_xlsx::{EnumCellValue, SpecAutofitCellsPolicy, SpecCellFormat, SpecXlsxReport};

////////////////////////////////////////////////////////////////////////////////
// #region FieldValues

/// One record field value as delivered by the data source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnumFieldValue {
    /// JSON `null` or absent.
    #[default]
    Null,
    /// Boolean value.
    Boolean(bool),
    /// Numeric value.
    Number(f64),
    /// Text value; image fields carry a `data:image/...;base64,` URL or `""`.
    String(String),
    /// Arrays/objects, kept verbatim.
    Json(serde_json::Value),
}

impl EnumFieldValue {
    /// Truthiness used for id filtering: null, `false`, `0`, NaN and `""` are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Boolean(val) => *val,
            Self::Number(val) => *val != 0.0 && !val.is_nan(),
            Self::String(val) => !val.is_empty(),
            Self::Json(_) => true,
        }
    }

    /// Borrow the text payload of a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(val) => Some(val),
            _ => None,
        }
    }

    /// Canonical string form; integral numbers render without a fraction so
    /// `5` and `"5"` map to the same key.
    pub fn to_key_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Boolean(val) => val.to_string(),
            Self::Number(val) => {
                if val.is_finite() && val.fract() == 0.0 && val.abs() < 1e15 {
                    format!("{}", *val as i64)
                } else {
                    val.to_string()
                }
            }
            Self::String(val) => val.clone(),
            Self::Json(val) => val.to_string(),
        }
    }

    /// Cell value written into a merged row.
    pub fn to_cell_value(&self) -> EnumCellValue {
        match self {
            Self::Null => EnumCellValue::None,
            Self::Boolean(val) => EnumCellValue::Boolean(*val),
            Self::Number(val) => EnumCellValue::Number(*val),
            Self::String(val) => EnumCellValue::String(val.clone()),
            Self::Json(val) => EnumCellValue::String(val.to_string()),
        }
    }
}

impl From<&str> for EnumFieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for EnumFieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for EnumFieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for EnumFieldValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CanonicalIds

/// Table, view, template or record id normalized to one string form.
///
/// Ids arrive as JSON numbers or strings; both forms of the same id compare
/// equal once wrapped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct CanonicalId(String);

impl CanonicalId {
    /// Wrap an already-canonical id string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Id from a field value; `None` for falsy values.
    pub fn from_field_value(value: &EnumFieldValue) -> Option<Self> {
        if !value.is_truthy() {
            return None;
        }
        Some(Self(value.to_key_string()))
    }

    /// Borrow the id text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `true` when the id parses as an integer greater than zero.
    pub fn is_positive_integer(&self) -> bool {
        self.0.trim().parse::<i64>().is_ok_and(|val| val > 0)
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CanonicalId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<u64> for CanonicalId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for CanonicalId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = EnumFieldValue::deserialize(deserializer)?;
        CanonicalId::from_field_value(&value)
            .ok_or_else(|| de::Error::custom(format!("expected a non-empty id, got {value:?}")))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Records

/// One data-source record: field name -> value, in delivery order.
///
/// Field order matters: image anchors default to a field's position in this
/// order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecRecord {
    l_fields: Vec<(String, EnumFieldValue)>,
}

impl SpecRecord {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, value)` pairs; later duplicates overwrite earlier ones.
    pub fn from_fields<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<EnumFieldValue>,
    {
        let mut record = Self::new();
        for (key, value) in fields {
            record.set(key, value);
        }
        record
    }

    /// Value of `field_name`, if present.
    pub fn get(&self, field_name: &str) -> Option<&EnumFieldValue> {
        self.l_fields
            .iter()
            .find(|(name, _)| name == field_name)
            .map(|(_, value)| value)
    }

    /// Insert or replace `field_name`, keeping its original position on replace.
    pub fn set(&mut self, field_name: impl Into<String>, value: impl Into<EnumFieldValue>) {
        let field_name = field_name.into();
        let value = value.into();
        match self.l_fields.iter_mut().find(|(name, _)| *name == field_name) {
            Some((_, slot)) => *slot = value,
            None => self.l_fields.push((field_name, value)),
        }
    }

    /// Iterate fields in delivery order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EnumFieldValue)> {
        self.l_fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.l_fields.len()
    }

    /// `true` when the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.l_fields.is_empty()
    }
}

impl Serialize for SpecRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.l_fields.len()))?;
        for (name, value) in &self.l_fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SpecRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = SpecRecord;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a record object")
            }

            fn visit_map<A>(self, mut map: A) -> Result<SpecRecord, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut record = SpecRecord::new();
                while let Some((name, value)) = map.next_entry::<String, EnumFieldValue>()? {
                    record.set(name, value);
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

/// Records sharing one template id, in input order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecTemplateGroup {
    /// Canonical template id.
    pub template_id: CanonicalId,
    /// Member records, in input order.
    pub records: Vec<SpecRecord>,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Artifacts

/// Template document fetched for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecTemplateArtifact {
    /// Raw XLSX bytes.
    pub v_content: Vec<u8>,
    /// File name suggested by the data source, if any.
    pub file_name: Option<String>,
}

impl SpecTemplateArtifact {
    /// Suggested file name, or `template.xlsx`.
    pub fn file_name_or_default(&self) -> &str {
        self.file_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(C_FILE_NAME_DEFAULT)
    }
}

/// Output of one successful group merge.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecGroupMerge {
    /// Template id of the group.
    pub template_id: CanonicalId,
    /// Written file.
    pub path_file_out: PathBuf,
    /// Sheet write report (row/image counts, warnings).
    pub report: SpecXlsxReport,
}

/// What gets uploaded for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecMergeArtifact {
    /// Template id of the group.
    pub template_id: CanonicalId,
    /// Written file.
    pub path_file_out: PathBuf,
    /// Identifiers of merged records, in merge order, falsy ids skipped.
    pub record_ids: Vec<String>,
    /// Last updating user of the group's first record.
    pub user_id: Option<String>,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RowViews

/// Decoded image payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecDecodedImage {
    /// Raw image bytes.
    pub v_bytes: Vec<u8>,
    /// Format token from the MIME subtype (`png`, `jpeg`, `svg`, ...).
    pub extension: String,
}

/// Image to embed next to an appended row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecImageAnchor {
    /// Source field name.
    pub field_name: String,
    /// Zero-based anchor column.
    pub n_idx_col: usize,
    /// Decoded image.
    pub image: SpecDecodedImage,
}

/// Column-ready view of one record; the record itself is left untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecRowView {
    /// Cell values keyed by field name, image fields excluded.
    pub dict_values: BTreeMap<String, EnumCellValue>,
    /// Images to embed on the row.
    pub l_images: Vec<SpecImageAnchor>,
    /// Non-fatal problems (e.g. undecodable image payloads).
    pub warnings: Vec<String>,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region MergeOptions

/// Column used to anchor an embedded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumImageAnchorRule {
    /// Position of the field in the record's field order (default).
    #[default]
    FieldOrder,
    /// Column whose key equals the field name; falls back to field order.
    Column,
}

/// Per-group pipeline stage, used for error attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumMergeStage {
    /// Template bytes parsed.
    Loaded,
    /// Column model derived and written.
    ColumnsDerived,
    /// `n` rows appended.
    RowsAppended(usize),
    /// Workbook written to disk.
    Serialized,
}

impl fmt::Display for EnumMergeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded => write!(f, "loaded"),
            Self::ColumnsDerived => write!(f, "columns-derived"),
            Self::RowsAppended(n_rows) => write!(f, "rows-appended({n_rows})"),
            Self::Serialized => write!(f, "serialized"),
        }
    }
}

/// Options shared by every group merge of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecMergeOptions {
    /// Scratch root layout.
    pub layout: SpecScratchLayout,
    /// Image anchoring rule.
    pub rule_image_anchor: EnumImageAnchorRule,
    /// Body cell format.
    pub fmt_text: SpecCellFormat,
    /// Header cell format.
    pub fmt_header: SpecCellFormat,
    /// Column autofit policy.
    pub policy_autofit: SpecAutofitCellsPolicy,
}

impl Default for SpecMergeOptions {
    fn default() -> Self {
        let mut dict_fmt = derive_default_xlsx_formats();
        Self {
            layout: SpecScratchLayout::default(),
            rule_image_anchor: EnumImageAnchorRule::default(),
            fmt_text: dict_fmt.remove("text").unwrap_or_default(),
            fmt_header: dict_fmt.remove("header").unwrap_or_default(),
            policy_autofit: SpecAutofitCellsPolicy::default(),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region JobModels

/// Job trigger payload (`{"tableId": 12}`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecJobEvent {
    /// Source table whose merge view should be processed.
    #[serde(default)]
    pub table_id: Option<CanonicalId>,
}

/// Overall job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumJobStatus {
    /// Every group merged and uploaded.
    Success,
    /// At least one group succeeded and at least one failed.
    PartialFailure,
    /// Nothing to do (no table id).
    Skipped,
    /// Cancelled during upload; earlier uploads are kept in the outcome.
    Cancelled,
}

/// One group that did not make it to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecGroupFailure {
    /// Template id of the failed group.
    pub template_id: CanonicalId,
    /// Error text.
    pub message: String,
}

/// Uploaded group with the id of the merged-doc record created for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecUploadedArtifact {
    /// Aggregated merge result.
    pub artifact: SpecMergeArtifact,
    /// Record created in the merged-doc view.
    pub merged_doc_record_id: CanonicalId,
}

/// Result of one job invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecJobOutcome {
    /// Overall status.
    pub status: EnumJobStatus,
    /// Human-readable summary.
    pub message: String,
    /// Successfully uploaded groups, in group order.
    pub uploaded: Vec<SpecUploadedArtifact>,
    /// Failed groups, in group order.
    pub failures: Vec<SpecGroupFailure>,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_record_deserialize_keeps_field_order() {
        let record: SpecRecord =
            serde_json::from_str(r#"{"z": 1, "a": "x", "m": null, "tags": ["p", "q"]}"#)
                .expect("record");
        let l_names: Vec<&str> = record.iter().map(|(name, _)| name).collect();
        assert_eq!(l_names, vec!["z", "a", "m", "tags"]);
        assert_eq!(record.get("z"), Some(&EnumFieldValue::Number(1.0)));
        assert_eq!(record.get("m"), Some(&EnumFieldValue::Null));
        assert!(matches!(record.get("tags"), Some(EnumFieldValue::Json(_))));
    }

    #[test]
    fn test_record_set_replaces_in_place() {
        let mut record = SpecRecord::from_fields([("a", 1i64), ("b", 2i64)]);
        record.set("a", "x");
        let l_names: Vec<&str> = record.iter().map(|(name, _)| name).collect();
        assert_eq!(l_names, vec!["a", "b"]);
        assert_eq!(record.get("a").and_then(EnumFieldValue::as_str), Some("x"));
    }

    #[test]
    fn test_canonical_id_unifies_number_and_string() {
        let id_num: CanonicalId = serde_json::from_str("12").expect("number id");
        let id_str: CanonicalId = serde_json::from_str("\"12\"").expect("string id");
        assert_eq!(id_num, id_str);
        assert!(id_num.is_positive_integer());
        assert!(serde_json::from_str::<CanonicalId>("\"\"").is_err());
    }

    #[test]
    fn test_field_value_truthiness() {
        assert!(!EnumFieldValue::Null.is_truthy());
        assert!(!EnumFieldValue::from("").is_truthy());
        assert!(!EnumFieldValue::from(0i64).is_truthy());
        assert!(EnumFieldValue::from("T1").is_truthy());
        assert!(EnumFieldValue::from(3i64).is_truthy());
    }

    #[test]
    fn test_artifact_file_name_fallback() {
        let artifact = SpecTemplateArtifact {
            v_content: vec![],
            file_name: Some("  ".to_string()),
        };
        assert_eq!(artifact.file_name_or_default(), "template.xlsx");
    }
}
