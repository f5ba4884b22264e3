//! Data-source client seam and image-field hydration.

use serde::Deserialize;
use sheetmerge_io_fs::C_FILE_NAME_DEFAULT;
use thiserror::Error;
use tracing::{debug, warn};

use crate::conf::C_FIELD_TYPE_IMAGE;
use crate::image::encode_image_data_url;
use crate::spec::{CanonicalId, SpecRecord};

const C_IMAGE_EXTENSION_DEFAULT: &str = "png";

////////////////////////////////////////////////////////////////////////////////
// #region ClientSpecification

/// Failure reported by a data-source client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Remote answered with a non-success status.
    #[error("status {status}: {message}")]
    Status {
        /// HTTP-like status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },
    /// Record or attachment does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Transport or decoding failure.
    #[error("{0}")]
    Other(String),
}

/// Paging window for view fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecPagingWindow {
    /// Zero-based first record.
    pub start: usize,
    /// Maximum records returned.
    pub max: usize,
}

/// One field of a view's structure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SpecFieldStructure {
    /// Field name.
    pub name: String,
    /// Field type (`image`, `shortAnswer`, ...).
    #[serde(rename = "type")]
    pub field_type: String,
}

/// Records of one view page with the view's field structure.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SpecViewPage {
    /// Records, in view order.
    #[serde(rename = "data", default)]
    pub records: Vec<SpecRecord>,
    /// Field structure of the view.
    #[serde(default)]
    pub structure: Vec<SpecFieldStructure>,
}

/// Fetched file attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecAttachment {
    /// Raw file bytes.
    pub v_content: Vec<u8>,
    /// `Content-Disposition` value, if the source sent one.
    pub content_disposition: Option<String>,
}

impl SpecAttachment {
    /// File name from the content disposition, or `template.xlsx`.
    pub fn file_name(&self) -> String {
        derive_file_name_from_content_disposition(self.content_disposition.as_deref())
    }
}

/// Remote tabular data source.
///
/// Implementations own transport, authentication and retries. Calls are
/// blocking; the job drives them from one thread.
pub trait DataSourceClient {
    /// Fetch records and structure of `view_id`.
    fn fetch_view(
        &self,
        view_id: &CanonicalId,
        window: SpecPagingWindow,
    ) -> Result<SpecViewPage, SourceError>;

    /// Fetch the file stored in `field_name` of a record.
    fn fetch_attachment(
        &self,
        view_id: &CanonicalId,
        record_id: &CanonicalId,
        field_name: &str,
    ) -> Result<SpecAttachment, SourceError>;

    /// Update fields of an existing record.
    fn update_record(
        &self,
        view_id: &CanonicalId,
        record_id: &CanonicalId,
        fields: &SpecRecord,
    ) -> Result<(), SourceError>;

    /// Create a record and return its id.
    fn create_record(
        &self,
        view_id: &CanonicalId,
        fields: &SpecRecord,
    ) -> Result<CanonicalId, SourceError>;

    /// Attach `v_content` to `field_name` of a record.
    fn attach_file(
        &self,
        view_id: &CanonicalId,
        record_id: &CanonicalId,
        field_name: &str,
        file_name: &str,
        v_content: &[u8],
    ) -> Result<(), SourceError>;
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Hydration

/// File name after `filename=` with quotes removed; `template.xlsx` otherwise.
pub fn derive_file_name_from_content_disposition(content_disposition: Option<&str>) -> String {
    let Some(content_disposition) = content_disposition else {
        return C_FILE_NAME_DEFAULT.to_string();
    };
    let c_unquoted = content_disposition.replace('"', "");
    match c_unquoted.find("filename=") {
        Some(n_idx) if n_idx > 0 => {
            let c_name = c_unquoted[n_idx + "filename=".len()..]
                .split(';')
                .next()
                .unwrap_or_default()
                .trim();
            if c_name.is_empty() {
                C_FILE_NAME_DEFAULT.to_string()
            } else {
                c_name.to_string()
            }
        }
        _ => C_FILE_NAME_DEFAULT.to_string(),
    }
}

/// Extension after the first `.` of the attachment's file name.
fn derive_attachment_extension(attachment: &SpecAttachment) -> String {
    let c_file_name = attachment.file_name();
    c_file_name
        .split('.')
        .nth(1)
        .filter(|ext| !ext.is_empty())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| C_IMAGE_EXTENSION_DEFAULT.to_string())
}

/// Replace every image field with an inline data URL.
///
/// Attachments are fetched one by one because the source reports empty image
/// fields as errors. Any failure (or a record without a record id) leaves `""`
/// in the field.
pub fn hydrate_image_fields<C>(
    client: &C,
    view_id: &CanonicalId,
    records: Vec<SpecRecord>,
    structure: &[SpecFieldStructure],
    record_id_field: &str,
) -> Vec<SpecRecord>
where
    C: DataSourceClient + ?Sized,
{
    let l_image_fields: Vec<&str> = structure
        .iter()
        .filter(|field| field.field_type == C_FIELD_TYPE_IMAGE)
        .map(|field| field.name.as_str())
        .collect();
    if l_image_fields.is_empty() {
        return records;
    }
    debug!(n_fields = l_image_fields.len(), "hydrating image fields");

    records
        .into_iter()
        .map(|mut record| {
            let record_id = record
                .get(record_id_field)
                .and_then(CanonicalId::from_field_value);
            for field_name in &l_image_fields {
                let c_value = match &record_id {
                    Some(record_id) => {
                        match client.fetch_attachment(view_id, record_id, field_name) {
                            Ok(attachment) => encode_image_data_url(
                                &attachment.v_content,
                                &derive_attachment_extension(&attachment),
                            ),
                            Err(err) => {
                                warn!(%record_id, field = *field_name, "image fetch failed: {err}");
                                String::new()
                            }
                        }
                    }
                    None => {
                        warn!(field = *field_name, "record has no record id; image left empty");
                        String::new()
                    }
                };
                record.set(*field_name, c_value);
            }
            record
        })
        .collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
