use calamine::{open_workbook_auto, Data, Reader};
use std::path::Path;
use tracing::info;

use crate::domain::RawRecord;
use crate::error::{CatalogError, Result};

/// Columns every input file must carry.
pub const REQUIRED_COLUMNS: [&str; 2] = ["artist", "title"];

const SPREADSHEET_EXTENSIONS: [&str; 5] = ["xlsx", "xls", "xlsm", "xlsb", "ods"];
const DELIMITED_EXTENSIONS: [&str; 3] = ["csv", "tsv", "txt"];

/// Import a spreadsheet or delimited-text file, chosen by extension.
pub fn import_file(path: impl AsRef<Path>) -> Result<Vec<RawRecord>> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if SPREADSHEET_EXTENSIONS.contains(&extension.as_str()) {
        import_excel(path)
    } else if DELIMITED_EXTENSIONS.contains(&extension.as_str()) {
        let delimiter = if extension == "tsv" { b'\t' } else { b',' };
        import_csv(path, delimiter)
    } else {
        ensure_exists(path)?;
        Err(CatalogError::UnsupportedFormat(format!(
            "'{}' (expected one of {:?} or {:?})",
            path.display(),
            SPREADSHEET_EXTENSIONS,
            DELIMITED_EXTENSIONS
        )))
    }
}

/// Import CD rows from a delimited text file with a header row.
pub fn import_csv(path: impl AsRef<Path>, delimiter: u8) -> Result<Vec<RawRecord>> {
    let path = path.as_ref();
    ensure_exists(path)?;
    info!("Reading CSV file: {}", path.display());

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_path(path)?;

    let header = normalize_header(reader.headers()?.iter());
    check_required_columns(&header)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let cells = row.iter().map(|c| non_empty(c.to_string()));
        records.push(build_record(&header, cells));
    }

    crate::observability::metrics::importer::rows_imported(records.len());
    info!("Imported {} records from CSV", records.len());
    Ok(records)
}

/// Import CD rows from the first worksheet of a spreadsheet.
pub fn import_excel(path: impl AsRef<Path>) -> Result<Vec<RawRecord>> {
    let path = path.as_ref();
    ensure_exists(path)?;
    info!("Reading spreadsheet: {}", path.display());

    let mut workbook = open_workbook_auto(path)?;
    let range = match workbook.worksheet_range_at(0) {
        Some(range) => range?,
        None => {
            return Err(CatalogError::Schema {
                missing: REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
                found: Vec::new(),
            })
        }
    };

    let mut rows = range.rows();
    let header = match rows.next() {
        Some(cells) => normalize_header(cells.iter().map(|c| cell_text(c).unwrap_or_default())),
        None => Vec::new(),
    };
    check_required_columns(&header)?;

    let records: Vec<RawRecord> = rows
        .map(|cells| build_record(&header, cells.iter().map(cell_text)))
        .collect();

    crate::observability::metrics::importer::rows_imported(records.len());
    info!("Imported {} records from spreadsheet", records.len());
    Ok(records)
}

fn ensure_exists(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        crate::observability::metrics::importer::file_missing();
        Err(CatalogError::NotFound(path.to_path_buf()))
    }
}

fn normalize_header<I, S>(cells: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    cells
        .into_iter()
        .map(|c| c.as_ref().trim().to_lowercase())
        .collect()
}

fn check_required_columns(header: &[String]) -> Result<()> {
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !header.iter().any(|h| h == *col))
        .map(|col| col.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        crate::observability::metrics::importer::schema_rejected();
        Err(CatalogError::Schema {
            missing,
            found: header.to_vec(),
        })
    }
}

/// Every row becomes a record, blank ones included, so validation can
/// report them.
fn build_record<I>(header: &[String], cells: I) -> RawRecord
where
    I: IntoIterator<Item = Option<String>>,
{
    let mut record = RawRecord::default();
    for (column, value) in header.iter().zip(cells) {
        if !column.is_empty() {
            record.set(column, value);
        }
    }
    record
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => non_empty(s.clone()),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        Data::Float(f) => Some(f.to_string()),
        Data::Int(i) => Some(i.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        other => non_empty(other.to_string()),
    }
}
