use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, info_span, warn, Instrument};

use crate::domain::CdRecord;
use crate::pipeline::ingestion::importer;
use crate::pipeline::processing::enrich::{EnrichBatchStats, MetadataEnricher};
use crate::pipeline::processing::merge::{merge_records, SourcePriority};
use crate::pipeline::processing::normalize::{DefaultNormalizer, Normalizer};
use crate::pipeline::processing::validate::{validate_records, InvalidRecord};
use crate::pipeline::storage::CdStore;

/// How validated records are written to the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Update the row with the same artist and title, insert otherwise
    #[default]
    Upsert,
    /// One all-or-nothing batch insert
    Insert,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Stop after validation; nothing is enriched or stored
    pub validate_only: bool,
    pub mode: LoadMode,
    pub priority: SourcePriority,
}

/// Summary of one import run
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub file: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Rows read from the file
    pub imported: usize,
    pub valid: usize,
    pub invalid: Vec<InvalidRecord>,
    pub enrichment: Option<EnrichBatchStats>,
    pub inserted: usize,
    pub updated: usize,
    /// Records whose store write failed; the rest of the import went on
    pub store_failures: usize,
    /// Final records after merge, in input order
    #[serde(skip)]
    pub records: Vec<CdRecord>,
}

impl ImportReport {
    fn started(file: &Path) -> Self {
        let now = Utc::now();
        Self {
            file: file.to_path_buf(),
            started_at: now,
            finished_at: now,
            imported: 0,
            valid: 0,
            invalid: Vec::new(),
            enrichment: None,
            inserted: 0,
            updated: 0,
            store_failures: 0,
            records: Vec::new(),
        }
    }
}

/// Runs one file through import, normalize, validate, enrich, merge and store.
///
/// Enrichment and storage are optional: without an enricher the validated
/// records pass straight to the store, and without a store the run ends
/// after merge with the records in the report.
pub struct ImportUseCase {
    normalizer: Box<dyn Normalizer + Send + Sync>,
    enricher: Option<MetadataEnricher>,
    store: Option<CdStore>,
}

impl Default for ImportUseCase {
    fn default() -> Self {
        Self::new(Box::new(DefaultNormalizer))
    }
}

impl ImportUseCase {
    pub fn new(normalizer: Box<dyn Normalizer + Send + Sync>) -> Self {
        Self {
            normalizer,
            enricher: None,
            store: None,
        }
    }

    pub fn with_enricher(mut self, enricher: MetadataEnricher) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn with_store(mut self, store: CdStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn store(&self) -> Option<&CdStore> {
        self.store.as_ref()
    }

    pub fn into_store(self) -> Option<CdStore> {
        self.store
    }

    pub async fn run(&mut self, path: &Path, options: &ImportOptions) -> Result<ImportReport> {
        let span = info_span!("import", file = %path.display());
        self.run_inner(path, options).instrument(span).await
    }

    async fn run_inner(&mut self, path: &Path, options: &ImportOptions) -> Result<ImportReport> {
        let mut report = ImportReport::started(path);

        let raw = importer::import_file(path)
            .with_context(|| format!("Failed to import {}", path.display()))?;
        report.imported = raw.len();

        let normalized = self.normalizer.normalize_batch(&raw);
        let validation = validate_records(&normalized);
        report.valid = validation.valid.len();
        report.invalid = validation.invalid;

        if options.validate_only {
            info!("Validation only: {} valid, {} invalid", report.valid, report.invalid.len());
            report.records = validation.valid;
            report.finished_at = Utc::now();
            return Ok(report);
        }

        let records = match &self.enricher {
            Some(enricher) => {
                let outcomes = enricher.enrich_batch(&validation.valid).await;
                report.enrichment = Some(EnrichBatchStats::from_outcomes(&outcomes));
                let enriched: Vec<CdRecord> = outcomes.into_iter().map(|o| o.record).collect();
                merge_records(&validation.valid, &enriched, options.priority)
            }
            None => validation.valid,
        };

        if let Some(store) = self.store.as_mut() {
            match options.mode {
                LoadMode::Insert => {
                    report.inserted = store
                        .insert_cds_batch(&records)
                        .context("Batch insert failed; no records were stored")?;
                }
                LoadMode::Upsert => {
                    for record in &records {
                        match store.upsert_cd(record) {
                            Ok((true, _)) => report.inserted += 1,
                            Ok((false, _)) => report.updated += 1,
                            Err(e) => {
                                warn!("Failed to store {}: {}", record.display_name(), e);
                                report.store_failures += 1;
                            }
                        }
                    }
                }
            }
            info!(
                "Stored {} new and {} updated records ({} failed)",
                report.inserted, report.updated, report.store_failures
            );
        }

        report.records = records;
        report.finished_at = Utc::now();
        Ok(report)
    }
}

/// Write records as newline-delimited JSON, one record per line.
pub fn write_ndjson(path: &Path, records: &[CdRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    info!("Wrote {} records to {}", records.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::{LookupError, MetadataLookupPort, ReleaseCandidate};
    use crate::pipeline::processing::enrich::EnricherConfig;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct FixedLookup;

    #[async_trait]
    impl MetadataLookupPort for FixedLookup {
        async fn search_releases(
            &self,
            artist: &str,
            title: &str,
            _limit: usize,
        ) -> std::result::Result<Vec<ReleaseCandidate>, LookupError> {
            if title == "unknown" {
                return Err(LookupError::Http("status 500".to_string()));
            }
            Ok(vec![ReleaseCandidate {
                id: format!("{}-{}", artist.len(), title.len()),
                title: format!("{} - {}", artist, title),
                year: Some(1979),
                genres: vec!["Rock".to_string()],
                formats: vec!["CD".to_string()],
                ..Default::default()
            }])
        }
    }

    fn enricher() -> MetadataEnricher {
        MetadataEnricher::new(
            Arc::new(FixedLookup),
            EnricherConfig {
                delay: Duration::ZERO,
                ..Default::default()
            },
        )
    }

    fn fixture(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("collection.csv");
        std::fs::write(
            &path,
            "Artist,Title,Year,Genre\n\
             Pink Floyd,The Wall,1979,\n\
             ,Orphan,2001,Pop\n\
             Miles Davis,unknown,1959,jazz\n",
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn test_validate_only_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir);
        let mut use_case = ImportUseCase::default().with_store(CdStore::open_in_memory().unwrap());

        let options = ImportOptions {
            validate_only: true,
            ..Default::default()
        };
        let report = use_case.run(&path, &options).await.unwrap();

        assert_eq!(report.imported, 3);
        assert_eq!(report.valid, 2);
        assert_eq!(report.invalid.len(), 1);
        assert_eq!(report.invalid[0].reasons, vec!["artist is required"]);
        assert_eq!(use_case.store().unwrap().count_cds().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_full_run_enriches_and_upserts() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir);
        let mut use_case = ImportUseCase::default()
            .with_enricher(enricher())
            .with_store(CdStore::open_in_memory().unwrap());

        let report = use_case.run(&path, &ImportOptions::default()).await.unwrap();
        let stats = report.enrichment.clone().unwrap();
        assert_eq!(stats.matched, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(report.inserted, 2);

        let store = use_case.store().unwrap();
        let wall = &store.search_cds_by_title("wall").unwrap()[0];
        assert_eq!(wall.genre.as_deref(), Some("Rock"));
        assert!(wall.discogs_id.is_some());
        let kind = &store.search_cds_by_artist("miles").unwrap()[0];
        assert_eq!(kind.genre.as_deref(), Some("jazz"));

        let again = use_case.run(&path, &ImportOptions::default()).await.unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(again.updated, 2);
        assert_eq!(use_case.store().unwrap().count_cds().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_insert_mode_rejects_duplicates_as_a_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture(&dir);
        let mut use_case = ImportUseCase::default().with_store(CdStore::open_in_memory().unwrap());
        let options = ImportOptions {
            mode: LoadMode::Insert,
            ..Default::default()
        };

        let report = use_case.run(&path, &options).await.unwrap();
        assert_eq!(report.inserted, 2);

        assert!(use_case.run(&path, &options).await.is_err());
        assert_eq!(use_case.store().unwrap().count_cds().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_blank_row_is_reported_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gaps.csv");
        std::fs::write(&path, "artist,title,year\nA,B,1990\n,,\nC,D,\n").unwrap();
        let mut use_case = ImportUseCase::default();

        let report = use_case.run(&path, &ImportOptions::default()).await.unwrap();

        assert_eq!(report.imported, 3);
        assert_eq!(report.valid, 2);
        assert_eq!(report.invalid.len(), 1);
        assert_eq!(
            report.invalid[0].reasons,
            vec!["artist is required", "title is required"]
        );
    }

    #[tokio::test]
    async fn test_missing_file_aborts() {
        let mut use_case = ImportUseCase::default();
        let result = use_case
            .run(Path::new("/nonexistent/cds.csv"), &ImportOptions::default())
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_write_ndjson_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("merged.ndjson");
        let records = vec![
            CdRecord::new("a", "b").with_year(1990),
            CdRecord::new("c", "d"),
        ];

        write_ndjson(&path, &records).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: CdRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first, records[0]);
    }
}
