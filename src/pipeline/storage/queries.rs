use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension};
use tracing::{debug, info};

use super::{row_to_cd, CdStore, SELECT_COLUMNS};
use crate::domain::Cd;
use crate::error::Result;

pub const DEFAULT_FILTER_LIMIT: usize = 100;

const ORDER_BY: &str = "ORDER BY artist COLLATE NOCASE, title COLLATE NOCASE, id";

/// Criteria for [`CdStore::filter_cds`]; every field is optional and the
/// provided ones are combined with AND.
#[derive(Debug, Clone)]
pub struct CdFilter {
    /// Case-insensitive substring of the artist
    pub artist: Option<String>,
    /// Case-insensitive substring of the title
    pub title: Option<String>,
    /// Exact release year
    pub year: Option<i32>,
    /// Case-insensitive substring of the genre
    pub genre: Option<String>,
    pub limit: usize,
}

impl Default for CdFilter {
    fn default() -> Self {
        Self {
            artist: None,
            title: None,
            year: None,
            genre: None,
            limit: DEFAULT_FILTER_LIMIT,
        }
    }
}

/// Totals for the `stats` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStats {
    pub total: usize,
    pub artists: usize,
    /// Most represented artists, largest first
    pub top_artists: Vec<(String, usize)>,
}

fn needle(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

impl CdStore {
    pub fn get_cd_by_id(&self, id: i64) -> Result<Option<Cd>> {
        let cd = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM cd WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                row_to_cd,
            )
            .optional()?;
        Ok(cd)
    }

    pub fn search_cds_by_title(&self, title: &str) -> Result<Vec<Cd>> {
        info!("Searching CDs by title: {}", title);
        self.substring_search("title", title)
    }

    pub fn search_cds_by_artist(&self, artist: &str) -> Result<Vec<Cd>> {
        info!("Searching CDs by artist: {}", artist);
        self.substring_search("artist", artist)
    }

    fn substring_search(&self, column: &str, query: &str) -> Result<Vec<Cd>> {
        let sql = format!(
            "SELECT {} FROM cd WHERE instr(lower({}), ?1) > 0 {}",
            SELECT_COLUMNS, column, ORDER_BY
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![query.trim().to_lowercase()], row_to_cd)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_all_cds(&self) -> Result<Vec<Cd>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {} FROM cd {}", SELECT_COLUMNS, ORDER_BY))?;
        let rows = stmt.query_map([], row_to_cd)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Filter by any combination of artist, title, year and genre.
    pub fn filter_cds(&self, filter: &CdFilter) -> Result<Vec<Cd>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        for (column, value) in [
            ("artist", needle(&filter.artist)),
            ("title", needle(&filter.title)),
            ("genre", needle(&filter.genre)),
        ] {
            if let Some(value) = value {
                values.push(Value::Text(value));
                clauses.push(format!("instr(lower({}), ?{}) > 0", column, values.len()));
            }
        }
        if let Some(year) = filter.year {
            values.push(Value::Integer(i64::from(year)));
            clauses.push(format!("year = ?{}", values.len()));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        values.push(Value::Integer(filter.limit as i64));
        let sql = format!(
            "SELECT {} FROM cd {} {} LIMIT ?{}",
            SELECT_COLUMNS,
            where_clause,
            ORDER_BY,
            values.len()
        );
        debug!("filter_cds: {}", sql);
        info!(
            "Filtering CDs: artist={:?}, title={:?}, year={:?}, genre={:?}",
            filter.artist, filter.title, filter.year, filter.genre
        );

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), row_to_cd)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_cds(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM cd", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Artists with their CD counts, most CDs first (ties by name).
    pub fn artist_counts(&self, limit: usize) -> Result<Vec<(String, usize)>> {
        let mut stmt = self.conn().prepare(
            "SELECT artist, COUNT(*) AS n FROM cd GROUP BY artist \
             ORDER BY n DESC, artist COLLATE NOCASE LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn distinct_artist_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(DISTINCT artist) FROM cd", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn collection_stats(&self, top: usize) -> Result<CollectionStats> {
        Ok(CollectionStats {
            total: self.count_cds()?,
            artists: self.distinct_artist_count()?,
            top_artists: self.artist_counts(top)?,
        })
    }

    pub fn get_cds_by_discogs_ids(&self, discogs_ids: &[String]) -> Result<Vec<Cd>> {
        if discogs_ids.is_empty() {
            return Ok(Vec::new());
        }
        info!("Fetching CDs by {} Discogs IDs", discogs_ids.len());

        let placeholders = (1..=discogs_ids.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM cd WHERE discogs_id IN ({}) {}",
            SELECT_COLUMNS, placeholders, ORDER_BY
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(discogs_ids.iter()), row_to_cd)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
