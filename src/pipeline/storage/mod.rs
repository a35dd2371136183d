//! SQLite persistence for the collection.
//!
//! Every mutating call runs inside its own transaction. A `Transaction` that
//! is dropped without `commit` rolls back, so early returns on error leave the
//! store exactly as it was before the call.

mod export;
pub mod queries;

pub use queries::{CdFilter, CollectionStats};

use chrono::{DateTime, Utc};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension, Row, ToSql};
use std::borrow::Cow;
use std::path::Path;
use tracing::{error, info, warn};

use crate::domain::{Cd, CdRecord};
use crate::error::{CatalogError, Result};
use crate::pipeline::processing::normalize::normalize_string;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS cd (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        artist      TEXT NOT NULL CHECK (artist <> ''),
        title       TEXT NOT NULL CHECK (title <> ''),
        year        INTEGER,
        genre       TEXT,
        style       TEXT,
        labels      TEXT,
        formats     TEXT,
        country     TEXT,
        discogs_id  TEXT,
        created_at  TEXT NOT NULL,
        updated_at  TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_cd_artist_title
        ON cd (artist COLLATE NOCASE, title COLLATE NOCASE);
    CREATE INDEX IF NOT EXISTS idx_cd_discogs_id ON cd (discogs_id);
"#;

pub(crate) const SELECT_COLUMNS: &str = "id, artist, title, year, genre, style, labels, formats, \
     country, discogs_id, created_at, updated_at";

const INSERT_SQL: &str = "INSERT INTO cd (artist, title, year, genre, style, labels, formats, \
     country, discogs_id, created_at, updated_at) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)";

/// How `bulk_delete_by_artist` compares artist names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtistMatch {
    /// Case-insensitive equality
    Exact,
    /// Case-insensitive substring
    Partial,
}

/// The collection store. Readers may open their own `CdStore` on the same
/// file; the database runs in WAL mode.
pub struct CdStore {
    conn: Connection,
}

impl CdStore {
    /// Open (or create) the store at `path`, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening CD store at {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    /// Open a store that must already exist. A missing file is `NotFound`
    /// and nothing is created on disk.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(CatalogError::NotFound(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        register_unicode_lower(&conn)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Insert every record as a new row, all or nothing.
    pub fn insert_cds_batch(&mut self, records: &[CdRecord]) -> Result<usize> {
        let now = Utc::now();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(INSERT_SQL)?;
            for (idx, record) in records.iter().enumerate() {
                let record = canonical(record);
                if let Err(e) = stmt.execute(&insert_params(&record, &now)) {
                    error!(
                        "Batch insert failed at record {} ({}), rolling back: {}",
                        idx,
                        record.display_name(),
                        e
                    );
                    crate::observability::metrics::store::batch_rolled_back();
                    return Err(e.into());
                }
            }
        }
        tx.commit()?;

        crate::observability::metrics::store::rows_inserted(records.len());
        info!("Batch insert: {} records committed", records.len());
        Ok(records.len())
    }

    /// Insert one row. Constraint violations report `false` instead of failing.
    pub fn insert_cd_single(&mut self, record: &CdRecord) -> Result<bool> {
        let record = canonical(record);
        let record: &CdRecord = &record;
        let now = Utc::now();
        let tx = self.conn.transaction()?;
        match tx.execute(INSERT_SQL, &insert_params(record, &now)) {
            Ok(_) => {
                tx.commit()?;
                crate::observability::metrics::store::rows_inserted(1);
                info!("Inserted: {}", record.display_name());
                Ok(true)
            }
            Err(e) if is_constraint_violation(&e) => {
                warn!("Failed to insert {}: {}", record.display_name(), e);
                Ok(false)
            }
            Err(e) => {
                error!("Failed to insert {}: {}", record.display_name(), e);
                Err(e.into())
            }
        }
    }

    /// Insert, or update the row with the same (artist, title).
    ///
    /// Returns `(created, row)`. On update, fields absent from `record` keep
    /// their stored value.
    pub fn upsert_cd(&mut self, record: &CdRecord) -> Result<(bool, Cd)> {
        let record = canonical(record);
        let record: &CdRecord = &record;
        let now = Utc::now();
        let tx = self.conn.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM cd WHERE lower(artist) = ?1 AND lower(title) = ?2",
                params![record.artist, record.title],
                |row| row.get(0),
            )
            .optional()?;

        let (created, id) = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE cd SET artist = ?1, title = ?2, \
                         year = COALESCE(?3, year), genre = COALESCE(?4, genre), \
                         style = COALESCE(?5, style), labels = COALESCE(?6, labels), \
                         formats = COALESCE(?7, formats), country = COALESCE(?8, country), \
                         discogs_id = COALESCE(?9, discogs_id), updated_at = ?10 \
                     WHERE id = ?11",
                    params![
                        record.artist,
                        record.title,
                        record.year,
                        record.genre,
                        record.style,
                        record.labels,
                        record.formats,
                        record.country,
                        record.discogs_id,
                        now,
                        id
                    ],
                )?;
                info!("Updated: {}", record.display_name());
                (false, id)
            }
            None => {
                tx.execute(INSERT_SQL, &insert_params(record, &now))?;
                info!("Inserted: {}", record.display_name());
                (true, tx.last_insert_rowid())
            }
        };

        let cd = tx.query_row(
            &format!("SELECT {} FROM cd WHERE id = ?1", SELECT_COLUMNS),
            params![id],
            row_to_cd,
        )?;
        tx.commit()?;

        crate::observability::metrics::store::upserted(created);
        Ok((created, cd))
    }

    /// Delete by primary key. Returns whether a row was removed.
    pub fn delete_cd(&mut self, id: i64) -> Result<bool> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute("DELETE FROM cd WHERE id = ?1", params![id])?;
        tx.commit()?;

        if removed == 0 {
            warn!("CD {} not found", id);
            return Ok(false);
        }
        crate::observability::metrics::store::rows_deleted(removed);
        info!("Deleted CD {}", id);
        Ok(true)
    }

    /// Delete every CD whose artist matches. Returns the number removed.
    pub fn bulk_delete_by_artist(&mut self, artist: &str, mode: ArtistMatch) -> Result<usize> {
        let needle = normalize_string(artist);
        if needle.is_empty() {
            warn!("Refusing bulk delete with an empty artist pattern");
            return Ok(0);
        }

        let sql = match mode {
            ArtistMatch::Exact => "DELETE FROM cd WHERE lower(artist) = ?1",
            ArtistMatch::Partial => "DELETE FROM cd WHERE instr(lower(artist), ?1) > 0",
        };

        let tx = self.conn.transaction()?;
        let removed = tx.execute(sql, params![needle])?;
        tx.commit()?;

        crate::observability::metrics::store::rows_deleted(removed);
        info!("Deleted {} CDs by artist '{}' ({:?})", removed, artist, mode);
        Ok(removed)
    }
}

fn insert_params<'a>(record: &'a CdRecord, now: &'a DateTime<Utc>) -> [&'a dyn ToSql; 10] {
    [
        &record.artist,
        &record.title,
        &record.year,
        &record.genre,
        &record.style,
        &record.labels,
        &record.formats,
        &record.country,
        &record.discogs_id,
        now,
    ]
}

/// Artist and title are the row identity; store them folded so equality
/// is case-insensitive beyond ASCII.
fn canonical(record: &CdRecord) -> Cow<'_, CdRecord> {
    let fold = |v: &Option<String>| v.as_deref().map(normalize_string);
    let (artist, title) = (fold(&record.artist), fold(&record.title));
    if artist == record.artist && title == record.title {
        return Cow::Borrowed(record);
    }
    Cow::Owned(CdRecord {
        artist,
        title,
        ..record.clone()
    })
}

/// SQLite's built-in `lower()` only folds ASCII. Replace it on every
/// connection so substring and equality matches agree with Rust's casing.
fn register_unicode_lower(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            Ok(match ctx.get_raw(0) {
                ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).to_lowercase()),
                other => Value::from(other),
            })
        },
    )?;
    Ok(())
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

pub(crate) fn row_to_cd(row: &Row<'_>) -> rusqlite::Result<Cd> {
    Ok(Cd {
        id: row.get("id")?,
        artist: row.get("artist")?,
        title: row.get("title")?,
        year: row.get("year")?,
        genre: row.get("genre")?,
        style: row.get("style")?,
        labels: row.get("labels")?,
        formats: row.get("formats")?,
        country: row.get("country")?,
        discogs_id: row.get("discogs_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CdStore {
        CdStore::open_in_memory().unwrap()
    }

    fn records(n: usize) -> Vec<CdRecord> {
        (0..n)
            .map(|i| CdRecord::new(format!("artist {}", i), format!("title {}", i)).with_year(1990))
            .collect()
    }

    #[test]
    fn test_insert_batch_counts() {
        let mut store = store();
        store.insert_cd_single(&CdRecord::new("x", "y")).unwrap();
        let before = store.count_cds().unwrap();

        let inserted = store.insert_cds_batch(&records(5)).unwrap();

        assert_eq!(inserted, 5);
        assert_eq!(store.count_cds().unwrap(), before + 5);
    }

    #[test]
    fn test_insert_batch_rolls_back_on_failure() {
        let mut store = store();
        store.insert_cds_batch(&records(2)).unwrap();

        let mut batch = records(6);
        // record 3 duplicates an existing row
        batch[3] = CdRecord::new("ARTIST 0", "Title 0");
        let err = store.insert_cds_batch(&batch[2..]).unwrap_err();

        assert!(matches!(err, crate::error::CatalogError::Storage(_)));
        assert_eq!(store.count_cds().unwrap(), 2);
    }

    #[test]
    fn test_insert_batch_rolls_back_on_missing_artist() {
        let mut store = store();
        let mut batch = records(3);
        batch[2].artist = None;

        assert!(store.insert_cds_batch(&batch).is_err());
        assert_eq!(store.count_cds().unwrap(), 0);
    }

    #[test]
    fn test_insert_single_reports_duplicate() {
        let mut store = store();
        assert!(store.insert_cd_single(&CdRecord::new("a", "b")).unwrap());
        assert!(!store.insert_cd_single(&CdRecord::new("A", "B")).unwrap());
        assert!(!store.insert_cd_single(&CdRecord::default()).unwrap());
        assert_eq!(store.count_cds().unwrap(), 1);
    }

    #[test]
    fn test_upsert_twice_keeps_one_row_with_latest_year() {
        let mut store = store();

        let (created, first) = store
            .upsert_cd(&CdRecord::new("pink floyd", "the wall").with_year(1979))
            .unwrap();
        assert!(created);

        let (created, second) = store
            .upsert_cd(&CdRecord::new("pink floyd", "the wall").with_year(1980))
            .unwrap();
        assert!(!created);

        assert_eq!(store.count_cds().unwrap(), 1);
        assert_eq!(second.id, first.id);
        assert_eq!(second.year, Some(1980));
        assert_eq!(store.get_cd_by_id(first.id).unwrap().unwrap().year, Some(1980));
    }

    #[test]
    fn test_upsert_keeps_stored_values_for_absent_fields() {
        let mut store = store();
        store
            .upsert_cd(&CdRecord::new("a", "b").with_genre("rock").with_year(2000))
            .unwrap();

        let (_, cd) = store.upsert_cd(&CdRecord::new("A", "B")).unwrap();

        assert_eq!(cd.genre.as_deref(), Some("rock"));
        assert_eq!(cd.year, Some(2000));
        assert_eq!(store.count_cds().unwrap(), 1);
    }

    #[test]
    fn test_upsert_without_artist_fails_and_leaves_store_untouched() {
        let mut store = store();
        let record = CdRecord {
            title: Some("t".to_string()),
            ..Default::default()
        };
        assert!(store.upsert_cd(&record).is_err());
        assert_eq!(store.count_cds().unwrap(), 0);
    }

    #[test]
    fn test_delete_cd() {
        let mut store = store();
        let (_, cd) = store.upsert_cd(&CdRecord::new("a", "b")).unwrap();

        assert!(store.delete_cd(cd.id).unwrap());
        assert!(!store.delete_cd(cd.id).unwrap());
        assert_eq!(store.count_cds().unwrap(), 0);
    }

    #[test]
    fn test_bulk_delete_by_artist() {
        let mut store = store();
        store
            .insert_cds_batch(&[
                CdRecord::new("pink floyd", "the wall"),
                CdRecord::new("pink floyd", "animals"),
                CdRecord::new("pink", "funhouse"),
                CdRecord::new("miles davis", "kind of blue"),
            ])
            .unwrap();

        assert_eq!(store.bulk_delete_by_artist("PINK", ArtistMatch::Exact).unwrap(), 1);
        assert_eq!(store.bulk_delete_by_artist("floyd", ArtistMatch::Partial).unwrap(), 2);
        assert_eq!(store.bulk_delete_by_artist("  ", ArtistMatch::Partial).unwrap(), 0);
        assert_eq!(store.count_cds().unwrap(), 1);
    }

    #[test]
    fn test_identity_folds_non_ascii_case() {
        let mut store = store();
        store
            .upsert_cd(&CdRecord::new("björk", "post").with_genre("Électronique"))
            .unwrap();

        let (created, cd) = store.upsert_cd(&CdRecord::new("BJÖRK", "POST")).unwrap();
        assert!(!created);
        assert_eq!(cd.artist, "björk");
        assert_eq!(store.count_cds().unwrap(), 1);
        assert!(!store.insert_cd_single(&CdRecord::new("Björk", "Post")).unwrap());

        let filter = CdFilter {
            genre: Some("électronique".to_string()),
            ..Default::default()
        };
        assert_eq!(store.filter_cds(&filter).unwrap().len(), 1);
        assert_eq!(store.search_cds_by_artist("JÖR").unwrap().len(), 1);

        assert_eq!(store.bulk_delete_by_artist("BJÖRK", ArtistMatch::Exact).unwrap(), 1);
        assert_eq!(store.count_cds().unwrap(), 0);
    }

    #[test]
    fn test_open_existing_does_not_create_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("cds.db");

        let err = CdStore::open_existing(&path).err().unwrap();
        assert!(matches!(err, CatalogError::NotFound(_)));
        assert!(!path.parent().unwrap().exists());

        CdStore::open(&path)
            .unwrap()
            .insert_cd_single(&CdRecord::new("a", "b"))
            .unwrap();
        let reader = CdStore::open_existing(&path).unwrap();
        assert_eq!(reader.count_cds().unwrap(), 1);
        assert_eq!(reader.search_cds_by_title("B").unwrap().len(), 1);
    }

    #[test]
    fn test_open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cds.db");

        {
            let mut store = CdStore::open(&path).unwrap();
            store.insert_cd_single(&CdRecord::new("a", "b")).unwrap();
        }

        let reopened = CdStore::open(&path).unwrap();
        assert_eq!(reopened.count_cds().unwrap(), 1);
    }
}
