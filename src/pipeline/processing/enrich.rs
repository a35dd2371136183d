use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::app::ports::{LookupError, MetadataLookupPort, ReleaseCandidate};
use crate::config::Config;
use crate::domain::CdRecord;

const CD_FORMAT_BONUS: f64 = 0.1;
const MAX_YEAR_BONUS: f64 = 0.05;
const YEAR_BONUS_SPAN: f64 = 150.0;
const MULTI_VALUE_SEPARATOR: &str = " / ";

/// Tuning for [`MetadataEnricher`]
#[derive(Debug, Clone)]
pub struct EnricherConfig {
    /// Fixed pause between successive lookups in a batch
    pub delay: Duration,
    /// Deadline for a single lookup; exceeding it skips the record
    pub request_timeout: Duration,
    /// Number of candidates requested per lookup
    pub result_limit: usize,
    /// Best candidate must score at least this much to be used
    pub match_threshold: f64,
}

impl Default for EnricherConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            result_limit: 5,
            match_threshold: 0.0,
        }
    }
}

impl EnricherConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            delay: config.enrich.delay(),
            request_timeout: config.discogs.timeout(),
            result_limit: config.discogs.result_limit,
            match_threshold: config.enrich.match_threshold,
        }
    }
}

/// How enrichment of a single record ended
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentStatus {
    Matched { discogs_id: String, score: f64 },
    NoMatch,
    Failed(LookupError),
}

/// The enriched copy of a record. On anything but `Matched` the record is
/// identical to the input.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentOutcome {
    pub record: CdRecord,
    pub status: EnrichmentStatus,
}

impl EnrichmentOutcome {
    fn unchanged(record: &CdRecord, status: EnrichmentStatus) -> Self {
        Self {
            record: record.clone(),
            status,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self.status, EnrichmentStatus::Matched { .. })
    }
}

/// Statistics for a batch of enrichment operations
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize)]
pub struct EnrichBatchStats {
    pub total_records: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub failed: usize,
}

impl EnrichBatchStats {
    pub fn from_outcomes(outcomes: &[EnrichmentOutcome]) -> Self {
        let mut stats = Self::default();
        for outcome in outcomes {
            stats.total_records += 1;
            match outcome.status {
                EnrichmentStatus::Matched { .. } => stats.matched += 1,
                EnrichmentStatus::NoMatch => stats.unmatched += 1,
                EnrichmentStatus::Failed(_) => stats.failed += 1,
            }
        }
        stats
    }
}

/// Looks each record up through a [`MetadataLookupPort`] and layers the best
/// match's metadata onto a copy of it.
pub struct MetadataEnricher {
    lookup: Arc<dyn MetadataLookupPort>,
    config: EnricherConfig,
}

impl MetadataEnricher {
    pub fn new(lookup: Arc<dyn MetadataLookupPort>, config: EnricherConfig) -> Self {
        Self { lookup, config }
    }

    pub fn config(&self) -> &EnricherConfig {
        &self.config
    }

    /// Enrich one record. Never fails: lookup problems leave it unchanged.
    pub async fn enrich(&self, record: &CdRecord) -> EnrichmentOutcome {
        let (artist, title) = match (record.artist.as_deref(), record.title.as_deref()) {
            (Some(a), Some(t)) if !a.is_empty() && !t.is_empty() => (a, t),
            _ => {
                warn!("Missing artist or title, skipping lookup: {}", record.display_name());
                crate::observability::metrics::enrich::record_unmatched();
                return EnrichmentOutcome::unchanged(record, EnrichmentStatus::NoMatch);
            }
        };

        let started = std::time::Instant::now();
        let lookup = self
            .lookup
            .search_releases(artist, title, self.config.result_limit);
        let result = match tokio::time::timeout(self.config.request_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(LookupError::Timeout),
        };
        crate::observability::metrics::enrich::lookup_duration(started.elapsed().as_secs_f64());

        let candidates = match result {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Lookup failed for {} - {}: {}", artist, title, e);
                crate::observability::metrics::enrich::record_failed(&e);
                return EnrichmentOutcome::unchanged(record, EnrichmentStatus::Failed(e));
            }
        };

        let Some((best, score)) = select_best(artist, title, &candidates) else {
            warn!("No metadata results for {} - {}", artist, title);
            crate::observability::metrics::enrich::record_unmatched();
            return EnrichmentOutcome::unchanged(record, EnrichmentStatus::NoMatch);
        };

        if score < self.config.match_threshold {
            warn!(
                "Best match for {} - {} scored {:.2}, below threshold {:.2}",
                artist, title, score, self.config.match_threshold
            );
            crate::observability::metrics::enrich::record_unmatched();
            return EnrichmentOutcome::unchanged(record, EnrichmentStatus::NoMatch);
        }

        info!(
            "Enriched {} - {} (match score: {:.2}, release: {}, year: {:?})",
            artist, title, score, best.id, best.year
        );
        crate::observability::metrics::enrich::record_matched();
        EnrichmentOutcome {
            record: apply_candidate(record, best),
            status: EnrichmentStatus::Matched {
                discogs_id: best.id.clone(),
                score,
            },
        }
    }

    /// Enrich records strictly in order, pausing `delay` between lookups.
    pub async fn enrich_batch(&self, records: &[CdRecord]) -> Vec<EnrichmentOutcome> {
        let mut outcomes = Vec::with_capacity(records.len());

        for (idx, record) in records.iter().enumerate() {
            info!(
                "Processing {}/{}: {}",
                idx + 1,
                records.len(),
                record.display_name()
            );
            outcomes.push(self.enrich(record).await);

            if idx + 1 < records.len() && !self.config.delay.is_zero() {
                tokio::time::sleep(self.config.delay).await;
            }
        }

        let stats = EnrichBatchStats::from_outcomes(&outcomes);
        info!(
            "Enrichment: {} matched, {} unmatched, {} failed",
            stats.matched, stats.unmatched, stats.failed
        );
        outcomes
    }
}

/// Similarity of the candidate title to "artist - title", plus small bonuses
/// for CD releases and older releases.
pub fn score_candidate(artist: &str, title: &str, candidate: &ReleaseCandidate) -> f64 {
    let query = format!("{} - {}", artist, title).to_lowercase();
    let title_score = strsim::normalized_levenshtein(&query, &candidate.title.to_lowercase());

    let format_bonus = if candidate
        .formats
        .iter()
        .any(|f| f.to_lowercase().contains("cd"))
    {
        CD_FORMAT_BONUS
    } else {
        0.0
    };

    let year_bonus = candidate
        .year
        .map(|year| {
            let age = 1.0 - (f64::from(year) - 1900.0) / YEAR_BONUS_SPAN;
            age.clamp(0.0, 1.0) * MAX_YEAR_BONUS
        })
        .unwrap_or(0.0);

    let score = title_score + format_bonus + year_bonus;
    debug!(
        "  Release: {} | title {:.2} | format {:.2} | year {:.2} | total {:.2}",
        candidate.title, title_score, format_bonus, year_bonus, score
    );
    score
}

/// Highest-scoring candidate; ties go to the earlier (higher-ranked) one.
pub fn select_best<'a>(
    artist: &str,
    title: &str,
    candidates: &'a [ReleaseCandidate],
) -> Option<(&'a ReleaseCandidate, f64)> {
    let mut best: Option<(&ReleaseCandidate, f64)> = None;
    for candidate in candidates {
        let score = score_candidate(artist, title, candidate);
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((candidate, score));
        }
    }
    best
}

fn join_values(values: &[String]) -> Option<String> {
    let parts: Vec<&str> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(MULTI_VALUE_SEPARATOR))
}

fn apply_candidate(record: &CdRecord, candidate: &ReleaseCandidate) -> CdRecord {
    let mut enriched = record.clone();
    enriched.genre = join_values(&candidate.genres).or(enriched.genre);
    enriched.style = join_values(&candidate.styles).or(enriched.style);
    enriched.formats = join_values(&candidate.formats).or(enriched.formats);
    enriched.country = candidate
        .country
        .clone()
        .filter(|c| !c.trim().is_empty())
        .or(enriched.country);
    enriched.discogs_id = Some(candidate.id.clone());
    enriched
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockLookup {
        responses: HashMap<String, Result<Vec<ReleaseCandidate>, LookupError>>,
        slow_artists: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl MockLookup {
        fn respond(mut self, artist: &str, result: Result<Vec<ReleaseCandidate>, LookupError>) -> Self {
            self.responses.insert(artist.to_string(), result);
            self
        }

        fn hang_on(mut self, artist: &str) -> Self {
            self.slow_artists.push(artist.to_string());
            self
        }
    }

    #[async_trait]
    impl MetadataLookupPort for MockLookup {
        async fn search_releases(
            &self,
            artist: &str,
            _title: &str,
            _limit: usize,
        ) -> Result<Vec<ReleaseCandidate>, LookupError> {
            self.calls.lock().unwrap().push(artist.to_string());
            if self.slow_artists.iter().any(|a| a == artist) {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            self.responses
                .get(artist)
                .cloned()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn candidate(id: &str, title: &str, formats: &[&str], year: Option<i32>) -> ReleaseCandidate {
        ReleaseCandidate {
            id: id.to_string(),
            title: title.to_string(),
            year,
            genres: vec!["Rock".to_string()],
            styles: vec!["Prog Rock".to_string(), "Art Rock".to_string()],
            country: Some("UK".to_string()),
            formats: formats.iter().map(|f| f.to_string()).collect(),
            labels: vec!["Harvest".to_string()],
        }
    }

    fn fast_config() -> EnricherConfig {
        EnricherConfig {
            delay: Duration::ZERO,
            request_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn enricher(mock: MockLookup, config: EnricherConfig) -> (MetadataEnricher, Arc<MockLookup>) {
        let mock = Arc::new(mock);
        (MetadataEnricher::new(mock.clone(), config), mock)
    }

    #[tokio::test]
    async fn test_enrich_populates_fields_from_match() {
        let mock = MockLookup::default().respond(
            "pink floyd",
            Ok(vec![candidate("123", "Pink Floyd - The Wall", &["CD", "Album"], Some(1979))]),
        );
        let (enricher, _) = enricher(mock, fast_config());
        let record = CdRecord::new("pink floyd", "the wall").with_year(1979);

        let outcome = enricher.enrich(&record).await;

        assert!(outcome.is_matched());
        assert_eq!(outcome.record.genre.as_deref(), Some("Rock"));
        assert_eq!(outcome.record.style.as_deref(), Some("Prog Rock / Art Rock"));
        assert_eq!(outcome.record.formats.as_deref(), Some("CD / Album"));
        assert_eq!(outcome.record.country.as_deref(), Some("UK"));
        assert_eq!(outcome.record.discogs_id.as_deref(), Some("123"));
        assert_eq!(outcome.record.artist, record.artist);
        assert_eq!(outcome.record.year, Some(1979));
    }

    #[tokio::test]
    async fn test_prefers_cd_release_with_same_title() {
        let mock = MockLookup::default().respond(
            "pink floyd",
            Ok(vec![
                candidate("vinyl", "Pink Floyd - The Wall", &["Vinyl", "LP"], Some(1979)),
                candidate("cd", "Pink Floyd - The Wall", &["CD", "Album"], Some(1979)),
            ]),
        );
        let (enricher, _) = enricher(mock, fast_config());

        let outcome = enricher.enrich(&CdRecord::new("pink floyd", "the wall")).await;
        assert_eq!(outcome.record.discogs_id.as_deref(), Some("cd"));
    }

    #[test]
    fn test_tie_keeps_first_candidate() {
        let candidates = vec![
            candidate("first", "Other - Thing", &[], None),
            candidate("second", "Other - Thing", &[], None),
        ];
        let (best, _) = select_best("a", "b", &candidates).unwrap();
        assert_eq!(best.id, "first");
        assert!(select_best("a", "b", &[]).is_none());
    }

    #[test]
    fn test_older_release_scores_higher() {
        let old = candidate("old", "A - B", &[], Some(1960));
        let new = candidate("new", "A - B", &[], Some(2020));
        assert!(score_candidate("a", "b", &old) > score_candidate("a", "b", &new));
    }

    #[test]
    fn test_extreme_years_do_not_overflow() {
        let ancient = candidate("min", "A - B", &[], Some(i32::MIN));
        let future = candidate("max", "A - B", &[], Some(i32::MAX));
        let plain = candidate("none", "A - B", &[], None);

        let base = score_candidate("a", "b", &plain);
        assert!((score_candidate("a", "b", &ancient) - (base + MAX_YEAR_BONUS)).abs() < 1e-9);
        assert!((score_candidate("a", "b", &future) - base).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_threshold_rejects_weak_match() {
        let mock = MockLookup::default().respond(
            "pink floyd",
            Ok(vec![candidate("9", "Completely Unrelated Compilation", &[], None)]),
        );
        let config = EnricherConfig {
            match_threshold: 0.7,
            ..fast_config()
        };
        let (enricher, _) = enricher(mock, config);
        let record = CdRecord::new("pink floyd", "the wall");

        let outcome = enricher.enrich(&record).await;
        assert_eq!(outcome.status, EnrichmentStatus::NoMatch);
        assert_eq!(outcome.record, record);
    }

    #[tokio::test]
    async fn test_no_results_returns_original() {
        let (enricher, _) = enricher(MockLookup::default(), fast_config());
        let record = CdRecord::new("nobody", "nothing").with_genre("jazz");

        let outcome = enricher.enrich(&record).await;
        assert_eq!(outcome.status, EnrichmentStatus::NoMatch);
        assert_eq!(outcome.record, record);
    }

    #[tokio::test]
    async fn test_rate_limit_returns_original() {
        let mock = MockLookup::default().respond("a", Err(LookupError::RateLimited));
        let (enricher, _) = enricher(mock, fast_config());
        let record = CdRecord::new("a", "b");

        let outcome = enricher.enrich(&record).await;
        assert_eq!(outcome.status, EnrichmentStatus::Failed(LookupError::RateLimited));
        assert_eq!(outcome.record, record);
    }

    #[tokio::test]
    async fn test_missing_title_skips_lookup() {
        let (enricher, mock) = enricher(MockLookup::default(), fast_config());
        let record = CdRecord {
            artist: Some("a".to_string()),
            ..Default::default()
        };

        let outcome = enricher.enrich(&record).await;
        assert_eq!(outcome.status, EnrichmentStatus::NoMatch);
        assert!(mock.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_in_batch_does_not_stop_others() {
        let mock = MockLookup::default()
            .respond("a", Ok(vec![candidate("1", "A - One", &["CD"], None)]))
            .respond("b", Ok(vec![candidate("2", "B - Two", &["CD"], None)]))
            .respond("c", Ok(vec![candidate("3", "C - Three", &["CD"], None)]))
            .hang_on("b");
        let (enricher, mock) = enricher(mock, fast_config());
        let records = vec![
            CdRecord::new("a", "one"),
            CdRecord::new("b", "two").with_genre("punk"),
            CdRecord::new("c", "three"),
        ];

        let outcomes = enricher.enrich_batch(&records).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].record.discogs_id.as_deref(), Some("1"));
        assert_eq!(outcomes[1].status, EnrichmentStatus::Failed(LookupError::Timeout));
        assert_eq!(outcomes[1].record, records[1]);
        assert_eq!(outcomes[2].record.discogs_id.as_deref(), Some("3"));
        assert_eq!(*mock.calls.lock().unwrap(), vec!["a", "b", "c"]);

        let stats = EnrichBatchStats::from_outcomes(&outcomes);
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.matched, 2);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_batch_waits_between_calls() {
        let config = EnricherConfig {
            delay: Duration::from_millis(40),
            ..fast_config()
        };
        let (enricher, _) = enricher(MockLookup::default(), config);
        let records = vec![
            CdRecord::new("a", "1"),
            CdRecord::new("b", "2"),
            CdRecord::new("c", "3"),
        ];

        let started = std::time::Instant::now();
        enricher.enrich_batch(&records).await;
        assert!(started.elapsed() >= Duration::from_millis(80));
    }
}
