//! Pipeline metrics for the CD catalog.
//!
//! Every stage records into the global `metrics` recorder using the names in
//! [`MetricName`]. With no recorder installed the calls are no-ops, so library
//! code and tests can record freely; the CLI installs a Prometheus recorder
//! via [`init`] and dumps [`render`] to a snapshot file.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::fmt;
use tracing::{debug, info};

/// All metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Importer
    ImporterRowsImported,
    ImporterFilesMissing,
    ImporterSchemaRejected,

    // Normalize
    NormalizeRecordsProcessed,
    NormalizeYearsDiscarded,

    // Validate
    ValidateRecordsValid,
    ValidateRecordsInvalid,

    // Enrich
    EnrichRecordsMatched,
    EnrichRecordsUnmatched,
    EnrichLookupsFailed,
    EnrichLookupDuration,

    // Merge
    MergeRecordsMerged,

    // Store
    StoreRowsInserted,
    StoreRowsUpdated,
    StoreRowsDeleted,
    StoreBatchesRolledBack,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ImporterRowsImported => "cd_catalog_importer_rows_imported_total",
            MetricName::ImporterFilesMissing => "cd_catalog_importer_files_missing_total",
            MetricName::ImporterSchemaRejected => "cd_catalog_importer_schema_rejected_total",

            MetricName::NormalizeRecordsProcessed => "cd_catalog_normalize_records_processed_total",
            MetricName::NormalizeYearsDiscarded => "cd_catalog_normalize_years_discarded_total",

            MetricName::ValidateRecordsValid => "cd_catalog_validate_records_valid_total",
            MetricName::ValidateRecordsInvalid => "cd_catalog_validate_records_invalid_total",

            MetricName::EnrichRecordsMatched => "cd_catalog_enrich_records_matched_total",
            MetricName::EnrichRecordsUnmatched => "cd_catalog_enrich_records_unmatched_total",
            MetricName::EnrichLookupsFailed => "cd_catalog_enrich_lookups_failed_total",
            MetricName::EnrichLookupDuration => "cd_catalog_enrich_lookup_duration_seconds",

            MetricName::MergeRecordsMerged => "cd_catalog_merge_records_merged_total",

            MetricName::StoreRowsInserted => "cd_catalog_store_rows_inserted_total",
            MetricName::StoreRowsUpdated => "cd_catalog_store_rows_updated_total",
            MetricName::StoreRowsDeleted => "cd_catalog_store_rows_deleted_total",
            MetricName::StoreBatchesRolledBack => "cd_catalog_store_batches_rolled_back_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Calling it again is a no-op.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    if HANDLE.get().is_some() {
        debug!("Metrics recorder already installed");
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    let _ = HANDLE.set(handle);
    info!("Metrics system initialized");
    Ok(())
}

/// Prometheus text exposition of everything recorded so far.
pub fn render() -> Option<String> {
    HANDLE.get().map(|handle| handle.render())
}

pub mod importer {
    use super::MetricName;

    pub fn rows_imported(count: usize) {
        ::metrics::counter!(MetricName::ImporterRowsImported.as_str()).increment(count as u64);
    }

    pub fn file_missing() {
        ::metrics::counter!(MetricName::ImporterFilesMissing.as_str()).increment(1);
    }

    pub fn schema_rejected() {
        ::metrics::counter!(MetricName::ImporterSchemaRejected.as_str()).increment(1);
    }
}

pub mod normalize {
    use super::MetricName;

    pub fn batch_processed(count: usize) {
        ::metrics::counter!(MetricName::NormalizeRecordsProcessed.as_str()).increment(count as u64);
    }

    /// A year outside the accepted range was dropped
    pub fn year_discarded() {
        ::metrics::counter!(MetricName::NormalizeYearsDiscarded.as_str()).increment(1);
    }
}

pub mod validate {
    use super::MetricName;

    pub fn records_classified(valid: usize, invalid: usize) {
        ::metrics::counter!(MetricName::ValidateRecordsValid.as_str()).increment(valid as u64);
        ::metrics::counter!(MetricName::ValidateRecordsInvalid.as_str()).increment(invalid as u64);
    }
}

pub mod enrich {
    use super::MetricName;
    use crate::app::ports::LookupError;

    pub fn record_matched() {
        ::metrics::counter!(MetricName::EnrichRecordsMatched.as_str()).increment(1);
    }

    pub fn record_unmatched() {
        ::metrics::counter!(MetricName::EnrichRecordsUnmatched.as_str()).increment(1);
    }

    pub fn record_failed(error: &LookupError) {
        ::metrics::counter!(
            MetricName::EnrichLookupsFailed.as_str(),
            "error_type" => error.kind()
        )
        .increment(1);
    }

    pub fn lookup_duration(secs: f64) {
        ::metrics::histogram!(MetricName::EnrichLookupDuration.as_str()).record(secs);
    }
}

pub mod merge {
    use super::MetricName;

    pub fn records_merged(count: usize) {
        ::metrics::counter!(MetricName::MergeRecordsMerged.as_str()).increment(count as u64);
    }
}

pub mod store {
    use super::MetricName;

    pub fn rows_inserted(count: usize) {
        ::metrics::counter!(MetricName::StoreRowsInserted.as_str()).increment(count as u64);
    }

    /// One upsert; `created` tells whether it inserted or updated
    pub fn upserted(created: bool) {
        let name = if created {
            MetricName::StoreRowsInserted
        } else {
            MetricName::StoreRowsUpdated
        };
        ::metrics::counter!(name.as_str()).increment(1);
    }

    pub fn rows_deleted(count: usize) {
        ::metrics::counter!(MetricName::StoreRowsDeleted.as_str()).increment(count as u64);
    }

    pub fn batch_rolled_back() {
        ::metrics::counter!(MetricName::StoreBatchesRolledBack.as_str()).increment(1);
    }
}
