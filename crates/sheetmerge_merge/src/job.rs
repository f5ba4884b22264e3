//! End-to-end merge job: fetch, hydrate, group, merge, upload.
//!
//! Flow:
//! 1. Validate view ids and resolve the source table's merge view.
//! 2. Fetch records, inline image attachments, reset template relationships.
//! 3. Group by template id and fetch each group's template document.
//! 4. Merge groups (serial or bounded `rayon` pool).
//! 5. Create one merged-doc record per group and attach its workbook.

use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::aggregate::aggregate_merge_result;
use crate::conf::{C_TABLE_MERGE, C_TABLE_TEMPLATE, SpecMergeConfig};
use crate::error::MergeError;
use crate::group::group_records;
use crate::merge::merge_group;
use crate::source::{DataSourceClient, SourceError, SpecPagingWindow, hydrate_image_fields};
use crate::spec::{
    CanonicalId, EnumFieldValue, EnumJobStatus, SpecGroupFailure, SpecGroupMerge, SpecJobEvent,
    SpecJobOutcome, SpecMergeArtifact, SpecMergeOptions, SpecRecord, SpecTemplateArtifact,
    SpecTemplateGroup, SpecUploadedArtifact,
};

/// Shared flag checked between template groups.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Fresh, not-cancelled flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; groups already in progress still finish.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// `true` once [`Self::cancel`] was called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

////////////////////////////////////////////////////////////////////////////////
// #region JobEntry

/// Run one merge job for the table named in `event`.
///
/// Returns `Success` when every group was uploaded, `PartialFailure` when some
/// groups failed, and [`MergeError::AllGroupsFailed`] when none succeeded.
///
/// Cancellation seen while templates are fetched is [`MergeError::Cancelled`].
/// In the upload phase the job stops at the next group boundary and returns a
/// `Cancelled` outcome listing the groups already uploaded.
pub fn run_merge_job<C>(
    client: &C,
    config: &SpecMergeConfig,
    event: &SpecJobEvent,
    cancel: &CancellationFlag,
) -> Result<SpecJobOutcome, MergeError>
where
    C: DataSourceClient + ?Sized,
{
    info!("starting merge job");
    let view_id_template = validate_view_id(&config.template_table.view_id, "template")?;
    let view_id_merged = validate_view_id(&config.merged_doc_table.view_id, "merged document")?;

    let Some(table_id) = event.table_id.as_ref() else {
        info!("no table id in event; nothing to do");
        return Ok(SpecJobOutcome {
            status: EnumJobStatus::Skipped,
            message: "There's no table ID, so I'm done".to_string(),
            uploaded: Vec::new(),
            failures: Vec::new(),
        });
    };
    let view_id_source = derive_view_for_table(config, table_id)?;
    info!(%table_id, view_id = %view_id_source, "resolved merge view");

    let page = client
        .fetch_view(
            &view_id_source,
            SpecPagingWindow {
                start: 0,
                max: config.merge.paging_max,
            },
        )
        .map_err(|source| MergeError::UpstreamFetch {
            what: format!("records of view {view_id_source}"),
            source,
        })?;
    let l_records = hydrate_image_fields(
        client,
        &view_id_source,
        page.records,
        &page.structure,
        &config.record_fields.record_id,
    );
    info!(n_records = l_records.len(), "records found in view");

    reset_template_relationships(client, config, &view_id_source, &l_records);

    let l_groups = group_records(
        &l_records,
        &config.source_tables.template_relationship_field_name_id,
    );
    if l_groups.is_empty() {
        info!("no records reference a template");
        return Ok(SpecJobOutcome {
            status: EnumJobStatus::Success,
            message: "No records to merge".to_string(),
            uploaded: Vec::new(),
            failures: Vec::new(),
        });
    }

    let mut l_templates = Vec::with_capacity(l_groups.len());
    for group in &l_groups {
        ensure_not_cancelled(cancel)?;
        let res_template = fetch_template(client, config, &view_id_template, &group.template_id);
        if res_template.is_err() {
            check_field_names(client, config, C_TABLE_TEMPLATE, &view_id_template);
        }
        l_templates.push(res_template);
    }

    let options = config.merge.derive_merge_options();
    let l_merged = merge_groups(
        &l_groups,
        l_templates,
        &options,
        config.merge.derive_num_workers(),
        cancel,
    );

    let mut l_uploaded = Vec::new();
    let mut l_failures = Vec::new();
    for (group, res_merge) in l_groups.iter().zip(l_merged) {
        if ensure_not_cancelled(cancel).is_err() {
            return Ok(derive_cancelled_outcome(l_groups.len(), l_uploaded, l_failures));
        }
        let res_upload = res_merge.and_then(|group_merge| {
            let artifact = aggregate_merge_result(
                &group.template_id,
                &group_merge.path_file_out,
                &group.records,
                &config.record_fields,
            );
            upload_merge_artifact(client, config, &view_id_merged, group, artifact)
        });
        match res_upload {
            Ok(uploaded) => l_uploaded.push(uploaded),
            Err(MergeError::Cancelled) => {
                return Ok(derive_cancelled_outcome(l_groups.len(), l_uploaded, l_failures));
            }
            Err(err) => {
                error!(template_id = %group.template_id, "{err}");
                if matches!(err, MergeError::Upload { .. }) {
                    check_field_names(client, config, C_TABLE_MERGE, &view_id_merged);
                }
                l_failures.push(SpecGroupFailure {
                    template_id: group.template_id.clone(),
                    message: err.to_string(),
                });
            }
        }
    }

    derive_job_outcome(l_groups.len(), l_uploaded, l_failures)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region JobSteps

fn ensure_not_cancelled(cancel: &CancellationFlag) -> Result<(), MergeError> {
    if cancel.is_cancelled() {
        warn!("merge job cancelled between groups");
        return Err(MergeError::Cancelled);
    }
    Ok(())
}

/// View ids must be integers greater than zero.
fn validate_view_id(c_view_id: &str, label: &str) -> Result<CanonicalId, MergeError> {
    let view_id = CanonicalId::new(c_view_id.trim());
    if !view_id.is_positive_integer() {
        let msg = format!(
            "Please ensure {label} view ids are numeric and greater than 0 (got {c_view_id:?})"
        );
        error!("{msg}");
        return Err(MergeError::Configuration(msg));
    }
    Ok(view_id)
}

fn derive_view_for_table(
    config: &SpecMergeConfig,
    table_id: &CanonicalId,
) -> Result<CanonicalId, MergeError> {
    config
        .source_tables
        .table_ids_to_view_ids
        .get(table_id)
        .cloned()
        .ok_or_else(|| {
            let msg = format!("There's no entry in our map for table: {table_id}");
            error!("{msg}");
            MergeError::Configuration(msg)
        })
}

/// Clear the template relationship of every source record; failures are only
/// logged.
fn reset_template_relationships<C>(
    client: &C,
    config: &SpecMergeConfig,
    view_id: &CanonicalId,
    records: &[SpecRecord],
) where
    C: DataSourceClient + ?Sized,
{
    let c_field_name = &config.source_tables.template_relationship_field_name;
    let record_reset = SpecRecord::from_fields([(c_field_name.as_str(), EnumFieldValue::Null)]);

    let mut n_failed = 0usize;
    for record in records {
        let Some(record_id) = record
            .get(&config.record_fields.id)
            .and_then(CanonicalId::from_field_value)
        else {
            continue;
        };
        if let Err(err) = client.update_record(view_id, &record_id, &record_reset) {
            debug!(%record_id, "reset failed: {err}");
            n_failed += 1;
        }
    }

    if n_failed > 0 {
        error!(
            n_failed,
            "Unable to unset relationship to template. Please ensure template relationship field name {c_field_name:?} matches the relationship name on the source table exactly, and that view {view_id} is the correct view for sending merge data to templates."
        );
    } else {
        info!("reset all source records");
    }
}

fn fetch_template<C>(
    client: &C,
    config: &SpecMergeConfig,
    view_id_template: &CanonicalId,
    template_id: &CanonicalId,
) -> Result<SpecTemplateArtifact, MergeError>
where
    C: DataSourceClient + ?Sized,
{
    let attachment = client
        .fetch_attachment(
            view_id_template,
            template_id,
            &config.template_table.field_name_for_template_document,
        )
        .map_err(|source| match source {
            SourceError::NotFound(_) => MergeError::TemplateNotFound(template_id.clone()),
            source => MergeError::UpstreamFetch {
                what: format!("template {template_id}"),
                source,
            },
        })?;
    let file_name = attachment.file_name();
    debug!(%template_id, %file_name, "template fetched");
    Ok(SpecTemplateArtifact {
        v_content: attachment.v_content,
        file_name: Some(file_name),
    })
}

fn merge_groups(
    l_groups: &[SpecTemplateGroup],
    l_templates: Vec<Result<SpecTemplateArtifact, MergeError>>,
    options: &SpecMergeOptions,
    n_workers_max: usize,
    cancel: &CancellationFlag,
) -> Vec<Result<SpecGroupMerge, MergeError>> {
    let merge_one = |(group, res_template): (
        &SpecTemplateGroup,
        Result<SpecTemplateArtifact, MergeError>,
    )|
     -> Result<SpecGroupMerge, MergeError> {
        let artifact = res_template?;
        if cancel.is_cancelled() {
            return Err(MergeError::Cancelled);
        }
        merge_group(&group.records, &artifact, &group.template_id, options)
    };

    if n_workers_max <= 1 {
        return l_groups.iter().zip(l_templates).map(merge_one).collect();
    }

    let thread_pool = ThreadPoolBuilder::new().num_threads(n_workers_max).build();
    let Ok(thread_pool) = thread_pool else {
        warn!(n_workers_max, "failed to initialize thread pool; merging serially");
        return l_groups.iter().zip(l_templates).map(merge_one).collect();
    };
    thread_pool.install(|| {
        l_groups
            .par_iter()
            .zip(l_templates.into_par_iter())
            .map(merge_one)
            .collect()
    })
}

fn upload_merge_artifact<C>(
    client: &C,
    config: &SpecMergeConfig,
    view_id_merged: &CanonicalId,
    group: &SpecTemplateGroup,
    artifact: SpecMergeArtifact,
) -> Result<SpecUploadedArtifact, MergeError>
where
    C: DataSourceClient + ?Sized,
{
    let into_upload_err = |source| MergeError::Upload {
        template_id: group.template_id.clone(),
        source,
    };
    let cfg_table = &config.merged_doc_table;

    let mut record_merged = SpecRecord::new();
    if let Some(c_field) = &cfg_table.merged_doc_details_field_name {
        record_merged.set(
            c_field,
            format!(
                "Merged {} records:\n{}",
                group.records.len(),
                artifact.record_ids.join("\n")
            ),
        );
    }
    if let Some(c_field) = &cfg_table.merged_doc_to_template_relationship_field_name {
        record_merged.set(c_field, group.template_id.as_str());
    }
    if let (Some(c_field), Some(user_id)) = (&cfg_table.merge_user_field_name, &artifact.user_id) {
        record_merged.set(c_field, user_id.as_str());
    }

    let v_content = fs::read(&artifact.path_file_out).map_err(|err| {
        into_upload_err(SourceError::Other(format!(
            "failed to read {}: {err}",
            artifact.path_file_out.display()
        )))
    })?;
    let file_name = artifact
        .path_file_out
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    let merged_doc_record_id = client
        .create_record(view_id_merged, &record_merged)
        .map_err(into_upload_err)?;
    client
        .attach_file(
            view_id_merged,
            &merged_doc_record_id,
            &cfg_table.merged_document_field_name,
            &file_name,
            &v_content,
        )
        .map_err(into_upload_err)?;
    info!(
        template_id = %group.template_id,
        %merged_doc_record_id,
        n_records = artifact.record_ids.len(),
        "merged document uploaded"
    );

    Ok(SpecUploadedArtifact {
        artifact,
        merged_doc_record_id,
    })
}

fn derive_cancelled_outcome(
    n_groups: usize,
    l_uploaded: Vec<SpecUploadedArtifact>,
    l_failures: Vec<SpecGroupFailure>,
) -> SpecJobOutcome {
    let msg = format!(
        "Merge cancelled after uploading {} of {n_groups} template groups",
        l_uploaded.len()
    );
    warn!("{msg}");
    SpecJobOutcome {
        status: EnumJobStatus::Cancelled,
        message: msg,
        uploaded: l_uploaded,
        failures: l_failures,
    }
}

fn derive_job_outcome(
    n_groups: usize,
    l_uploaded: Vec<SpecUploadedArtifact>,
    l_failures: Vec<SpecGroupFailure>,
) -> Result<SpecJobOutcome, MergeError> {
    if l_uploaded.is_empty() {
        error!(n_groups, "every template group failed");
        return Err(MergeError::AllGroupsFailed(n_groups));
    }
    if l_failures.is_empty() {
        info!(n_groups, "merge completed successfully");
        return Ok(SpecJobOutcome {
            status: EnumJobStatus::Success,
            message: "Merge completed successfully".to_string(),
            uploaded: l_uploaded,
            failures: l_failures,
        });
    }

    let msg = format!(
        "Merged {} of {n_groups} template groups; {} failed",
        l_uploaded.len(),
        l_failures.len()
    );
    warn!("{msg}");
    Ok(SpecJobOutcome {
        status: EnumJobStatus::PartialFailure,
        message: msg,
        uploaded: l_uploaded,
        failures: l_failures,
    })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Diagnostics

/// Log configured export field names that the view's structure lacks.
///
/// Returns the missing field names; an unreachable view yields none.
pub fn check_field_names<C>(
    client: &C,
    config: &SpecMergeConfig,
    table: &str,
    view_id: &CanonicalId,
) -> Vec<String>
where
    C: DataSourceClient + ?Sized,
{
    let page = match client.fetch_view(view_id, SpecPagingWindow { start: 0, max: 1 }) {
        Ok(page) => page,
        Err(SourceError::Status { status: 401, .. }) => {
            error!("Could not find {table} view, please check the view id: {view_id:?}");
            return Vec::new();
        }
        Err(err) => {
            error!("Failed to inspect {table} view {view_id}: {err}");
            return Vec::new();
        }
    };

    let Some(dict_fields) = config.export_fields.get(table) else {
        return Vec::new();
    };
    let mut l_missing = Vec::new();
    for (c_setting, c_field) in dict_fields {
        if page.structure.iter().any(|field| field.name == *c_field) {
            continue;
        }
        error!(
            "Couldn't find the field {c_field:?} in the table {table:?}. This value is configured as {c_setting:?}"
        );
        l_missing.push(c_field.clone());
    }
    l_missing
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_validate_view_id() {
        assert_eq!(validate_view_id("12", "template").expect("ok"), CanonicalId::from("12"));
        assert!(validate_view_id("0", "template").is_err());
        assert!(validate_view_id("abc", "template").is_err());
        assert!(validate_view_id("", "template").is_err());
    }

    #[test]
    fn test_cancellation_flag_is_shared_between_clones() {
        let cancel = CancellationFlag::new();
        let cancel_clone = cancel.clone();
        assert!(!cancel.is_cancelled());
        cancel_clone.cancel();
        assert!(cancel.is_cancelled());
        assert!(matches!(ensure_not_cancelled(&cancel), Err(MergeError::Cancelled)));
    }

    #[test]
    fn test_outcome_policy() {
        let uploaded = SpecUploadedArtifact {
            artifact: SpecMergeArtifact {
                template_id: CanonicalId::from("T1"),
                path_file_out: "out.xlsx".into(),
                record_ids: vec![],
                user_id: None,
            },
            merged_doc_record_id: CanonicalId::from("1"),
        };
        let failure = SpecGroupFailure {
            template_id: CanonicalId::from("T2"),
            message: "boom".to_string(),
        };

        let outcome = derive_job_outcome(1, vec![uploaded.clone()], vec![]).expect("success");
        assert_eq!(outcome.status, EnumJobStatus::Success);

        let outcome =
            derive_job_outcome(2, vec![uploaded], vec![failure.clone()]).expect("partial");
        assert_eq!(outcome.status, EnumJobStatus::PartialFailure);
        assert_eq!(outcome.message, "Merged 1 of 2 template groups; 1 failed");

        assert!(matches!(
            derive_job_outcome(1, vec![], vec![failure.clone()]),
            Err(MergeError::AllGroupsFailed(1))
        ));
    }

    #[test]
    fn test_cancelled_outcome_keeps_uploaded_groups() {
        let uploaded = SpecUploadedArtifact {
            artifact: SpecMergeArtifact {
                template_id: CanonicalId::from("T1"),
                path_file_out: "out.xlsx".into(),
                record_ids: vec!["R-1".to_string()],
                user_id: None,
            },
            merged_doc_record_id: CanonicalId::from("M1"),
        };
        let outcome = derive_cancelled_outcome(3, vec![uploaded.clone()], vec![]);
        assert_eq!(outcome.status, EnumJobStatus::Cancelled);
        assert_eq!(outcome.uploaded, vec![uploaded]);
        assert_eq!(
            outcome.message,
            "Merge cancelled after uploading 1 of 3 template groups"
        );
    }
}
