//! Error kinds for merge jobs and per-group pipelines.

use sheetmerge_io_fs::LayoutError;
use thiserror::Error;

use crate::source::SourceError;
use crate::spec::{CanonicalId, EnumMergeStage};

/// Failures surfaced by the merge engine and job orchestration.
///
/// Everything except [`MergeError::Configuration`], [`MergeError::AllGroupsFailed`]
/// and [`MergeError::Cancelled`] is scoped to a single template group.
#[derive(Debug, Error)]
pub enum MergeError {
    /// Missing/invalid view id, unmapped table id, unreadable config file.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Record view or template document could not be fetched.
    #[error("Failed to fetch {what}: {source}")]
    UpstreamFetch {
        /// What was being fetched.
        what: String,
        /// Data-source failure.
        #[source]
        source: SourceError,
    },

    /// Template missing from the template view.
    #[error("Template document not found for template {0}")]
    TemplateNotFound(CanonicalId),

    /// Template could not be parsed or a row could not be written.
    #[error("Merge failed for template {template_id} at stage {stage}: {message}")]
    MergeComputation {
        /// Template id of the group.
        template_id: CanonicalId,
        /// Stage that failed.
        stage: EnumMergeStage,
        /// Kernel error text.
        message: String,
    },

    /// Workbook could not be encoded.
    #[error("Failed to serialize merged workbook for template {template_id}: {message}")]
    Serialization {
        /// Template id of the group.
        template_id: CanonicalId,
        /// Kernel error text.
        message: String,
    },

    /// Output directory or file could not be written.
    #[error("Failed to write merged workbook for template {template_id}: {source}")]
    Output {
        /// Template id of the group.
        template_id: CanonicalId,
        /// Layout failure.
        #[source]
        source: LayoutError,
    },

    /// Merged-doc record creation or file attachment failed.
    #[error(
        "Upload failed for template {template_id}: {source}. Check that the configured field names match the merged document table exactly."
    )]
    Upload {
        /// Template id of the group.
        template_id: CanonicalId,
        /// Data-source failure.
        #[source]
        source: SourceError,
    },

    /// Every attempted group failed.
    #[error("All {0} template groups failed")]
    AllGroupsFailed(usize),

    /// Cancellation observed before the upload phase.
    #[error("Merge job cancelled")]
    Cancelled,
}
