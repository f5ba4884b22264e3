//! `sheetmerge_merge` v1:
//! Record-grouping and template-merge engine.
//!
//! Module layout:
//! - `conf`      : constants and JSON configuration
//! - `spec`      : records, ids, artifacts, options, reports
//! - `error`     : job and per-group error kinds
//! - `group`     : partition records by template id
//! - `column`    : column model from a template header row
//! - `image`     : data-URL image detection, decoding and encoding
//! - `merge`     : per-group merge pipeline
//! - `aggregate` : per-group merge result (record ids, merging user)
//! - `source`    : data-source client seam and record hydration
//! - `job`       : end-to-end job orchestration
pub mod aggregate;
pub mod column;
pub mod conf;
pub mod error;
pub mod group;
pub mod image;
pub mod job;
pub mod merge;
pub mod source;
pub mod spec;

pub use aggregate::aggregate_merge_result;
pub use column::derive_columns;
pub use conf::{
    SpecMergeConfig, SpecMergeSettings, SpecMergedDocTableConfig, SpecRecordFields,
    SpecSourceTablesConfig, SpecTemplateTableConfig, load_merge_config, parse_merge_config,
};
pub use error::MergeError;
pub use group::group_records;
pub use image::{
    decode_image_data_url, derive_image_extension, encode_image_data_url, is_image_field,
};
pub use job::{CancellationFlag, run_merge_job};
pub use merge::{derive_row_view, merge_group};
pub use source::{
    DataSourceClient, SourceError, SpecAttachment, SpecFieldStructure, SpecPagingWindow,
    SpecViewPage, derive_file_name_from_content_disposition, hydrate_image_fields,
};
pub use spec::{
    CanonicalId, EnumFieldValue, EnumImageAnchorRule, EnumJobStatus, EnumMergeStage,
    SpecDecodedImage, SpecGroupFailure, SpecGroupMerge, SpecImageAnchor, SpecJobEvent,
    SpecJobOutcome, SpecMergeArtifact, SpecMergeOptions, SpecRecord, SpecRowView,
    SpecTemplateArtifact, SpecTemplateGroup, SpecUploadedArtifact,
};
