use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::domain::{CdRecord, RawRecord};

/// Earliest release year accepted by the catalog.
pub const MIN_YEAR: i32 = 1900;
/// Latest release year accepted by the catalog.
pub const MAX_YEAR: i32 = 2099;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Trait for turning raw imported rows into canonical records
pub trait Normalizer {
    fn normalize(&self, record: &RawRecord) -> CdRecord;

    fn normalize_batch(&self, records: &[RawRecord]) -> Vec<CdRecord> {
        let normalized: Vec<CdRecord> = records.iter().map(|r| self.normalize(r)).collect();
        crate::observability::metrics::normalize::batch_processed(normalized.len());
        normalized
    }
}

/// Lowercases, trims and collapses whitespace; coerces the year into range.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultNormalizer;

impl Normalizer for DefaultNormalizer {
    fn normalize(&self, record: &RawRecord) -> CdRecord {
        CdRecord {
            artist: normalize_text(record.artist.as_deref()),
            title: normalize_text(record.title.as_deref()),
            year: normalize_year(record.year.as_deref()),
            genre: normalize_text(record.genre.as_deref()),
            style: normalize_text(record.style.as_deref()),
            labels: normalize_text(record.labels.as_deref()),
            formats: normalize_text(record.formats.as_deref()),
            country: None,
            discogs_id: None,
        }
    }
}

/// Convenience wrapper around [`DefaultNormalizer`].
pub fn normalize(record: &RawRecord) -> CdRecord {
    DefaultNormalizer.normalize(record)
}

/// Lowercase, trim and collapse internal whitespace. Empty results are absent.
pub fn normalize_string(value: &str) -> String {
    WHITESPACE_RUN
        .replace_all(value.trim(), " ")
        .to_lowercase()
}

fn normalize_text(value: Option<&str>) -> Option<String> {
    let normalized = normalize_string(value?);
    (!normalized.is_empty()).then_some(normalized)
}

fn normalize_year(value: Option<&str>) -> Option<i32> {
    let raw = value?.trim();
    if raw.is_empty() {
        return None;
    }

    let parsed = raw.parse::<i32>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0 && f.is_finite())
            .map(|f| f as i32)
    });

    match parsed {
        Some(year) if (MIN_YEAR..=MAX_YEAR).contains(&year) => Some(year),
        Some(year) => {
            warn!("Year {} outside {}-{}, clearing", year, MIN_YEAR, MAX_YEAR);
            crate::observability::metrics::normalize::year_discarded();
            None
        }
        None => {
            warn!("Invalid year value: {:?}, clearing", raw);
            crate::observability::metrics::normalize::year_discarded();
            None
        }
    }
}
