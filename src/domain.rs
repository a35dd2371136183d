use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One spreadsheet row as read, before any normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub style: Option<String>,
    pub labels: Option<String>,
    pub formats: Option<String>,
    /// Columns outside the known set, keyed by lowercased header
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl RawRecord {
    /// Assign a cell by (lowercased) column name.
    pub fn set(&mut self, column: &str, value: Option<String>) {
        let slot = match column {
            "artist" => &mut self.artist,
            "title" => &mut self.title,
            "year" => &mut self.year,
            "genre" => &mut self.genre,
            "style" => &mut self.style,
            "labels" => &mut self.labels,
            "formats" => &mut self.formats,
            other => {
                if let Some(value) = value {
                    self.extra.insert(other.to_string(), value);
                }
                return;
            }
        };
        *slot = value;
    }
}

/// A candidate CD as it moves through normalize, enrich and merge.
///
/// `None` means the field is absent; the pipeline never stores empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdRecord {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub genre: Option<String>,
    pub style: Option<String>,
    pub labels: Option<String>,
    pub formats: Option<String>,
    pub country: Option<String>,
    pub discogs_id: Option<String>,
}

impl CdRecord {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: Some(artist.into()),
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    /// "artist - title" for log lines.
    pub fn display_name(&self) -> String {
        format!(
            "{} - {}",
            self.artist.as_deref().unwrap_or("?"),
            self.title.as_deref().unwrap_or("?")
        )
    }
}

impl From<&CdRecord> for RawRecord {
    fn from(record: &CdRecord) -> Self {
        Self {
            artist: record.artist.clone(),
            title: record.title.clone(),
            year: record.year.map(|y| y.to_string()),
            genre: record.genre.clone(),
            style: record.style.clone(),
            labels: record.labels.clone(),
            formats: record.formats.clone(),
            extra: BTreeMap::new(),
        }
    }
}

/// A persisted row of the `cd` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cd {
    pub id: i64,
    pub artist: String,
    pub title: String,
    pub year: Option<i32>,
    pub genre: Option<String>,
    pub style: Option<String>,
    pub labels: Option<String>,
    pub formats: Option<String>,
    pub country: Option<String>,
    pub discogs_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
