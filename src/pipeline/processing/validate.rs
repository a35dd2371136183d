use serde::Serialize;
use tracing::{info, warn};

use crate::domain::CdRecord;
use crate::pipeline::processing::normalize::{MAX_YEAR, MIN_YEAR};

/// A record that failed validation together with every reason it failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidRecord {
    pub record: CdRecord,
    pub reasons: Vec<String>,
}

/// Records partitioned by validity, each side in input order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub valid: Vec<CdRecord>,
    pub invalid: Vec<InvalidRecord>,
}

/// Classify a normalized record. Returns the failure reasons on error.
pub fn validate_record(record: &CdRecord) -> Result<(), Vec<String>> {
    let mut reasons = Vec::new();

    if record.artist.as_deref().map_or(true, str::is_empty) {
        reasons.push("artist is required".to_string());
    }
    if record.title.as_deref().map_or(true, str::is_empty) {
        reasons.push("title is required".to_string());
    }
    if let Some(year) = record.year {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            reasons.push(format!(
                "year must be between {} and {}, got {}",
                MIN_YEAR, MAX_YEAR, year
            ));
        }
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(reasons)
    }
}

pub fn is_valid(record: &CdRecord) -> bool {
    validate_record(record).is_ok()
}

/// Split `records` into valid and invalid sequences.
pub fn validate_records(records: &[CdRecord]) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();

    for record in records {
        match validate_record(record) {
            Ok(()) => outcome.valid.push(record.clone()),
            Err(reasons) => {
                warn!("Invalid record {}: {:?}", record.display_name(), reasons);
                outcome.invalid.push(InvalidRecord {
                    record: record.clone(),
                    reasons,
                });
            }
        }
    }

    crate::observability::metrics::validate::records_classified(
        outcome.valid.len(),
        outcome.invalid.len(),
    );
    info!(
        "Validation: {} valid, {} invalid",
        outcome.valid.len(),
        outcome.invalid.len()
    );
    outcome
}
