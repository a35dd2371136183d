use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::domain::CdRecord;

/// Which side wins when both the original and the enriched record carry a value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourcePriority {
    /// Enriched values replace original ones whenever present
    #[default]
    Enriched,
    /// Original values are kept; enriched values only fill gaps
    Original,
}

impl fmt::Display for SourcePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourcePriority::Enriched => write!(f, "enriched"),
            SourcePriority::Original => write!(f, "original"),
        }
    }
}

impl FromStr for SourcePriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enriched" => Ok(SourcePriority::Enriched),
            "original" => Ok(SourcePriority::Original),
            other => Err(format!(
                "unknown source priority '{}', expected 'enriched' or 'original'",
                other
            )),
        }
    }
}

trait Presence {
    fn is_present(&self) -> bool;
}

impl Presence for String {
    fn is_present(&self) -> bool {
        !self.trim().is_empty()
    }
}

impl Presence for i32 {
    fn is_present(&self) -> bool {
        true
    }
}

fn pick<T: Presence + Clone>(
    original: &Option<T>,
    enriched: &Option<T>,
    priority: SourcePriority,
) -> Option<T> {
    let original = original.as_ref().filter(|v| v.is_present());
    let enriched = enriched.as_ref().filter(|v| v.is_present());
    match priority {
        SourcePriority::Enriched => enriched.or(original).cloned(),
        SourcePriority::Original => original.or(enriched).cloned(),
    }
}

/// Merge one original record with its enriched counterpart, field by field.
pub fn merge_pair(original: &CdRecord, enriched: &CdRecord, priority: SourcePriority) -> CdRecord {
    CdRecord {
        artist: pick(&original.artist, &enriched.artist, priority),
        title: pick(&original.title, &enriched.title, priority),
        year: pick(&original.year, &enriched.year, priority),
        genre: pick(&original.genre, &enriched.genre, priority),
        style: pick(&original.style, &enriched.style, priority),
        labels: pick(&original.labels, &enriched.labels, priority),
        formats: pick(&original.formats, &enriched.formats, priority),
        country: pick(&original.country, &enriched.country, priority),
        discogs_id: pick(&original.discogs_id, &enriched.discogs_id, priority),
    }
}

/// Merge two row-aligned sequences positionally.
///
/// Callers must keep `original[i]` and `enriched[i]` describing the same CD.
/// When the lengths differ only the common prefix is merged.
pub fn merge_records(
    original: &[CdRecord],
    enriched: &[CdRecord],
    priority: SourcePriority,
) -> Vec<CdRecord> {
    if original.len() != enriched.len() {
        warn!(
            "Original ({}) and enriched ({}) have different lengths; merging only matching indices",
            original.len(),
            enriched.len()
        );
    }

    let merged: Vec<CdRecord> = original
        .iter()
        .zip(enriched)
        .map(|(o, e)| merge_pair(o, e, priority))
        .collect();

    crate::observability::metrics::merge::records_merged(merged.len());
    info!("Merged {} records (priority: {})", merged.len(), priority);
    merged
}
