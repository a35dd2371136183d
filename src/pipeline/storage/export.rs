use rusqlite::params;
use std::path::Path;
use tracing::info;

use super::{row_to_cd, CdStore, SELECT_COLUMNS};
use crate::error::Result;

impl CdStore {
    /// Write the whole `cd` table to CSV in id order, with a header row.
    ///
    /// Returns the number of rows written. An empty table writes no file.
    pub fn export_csv(&self, path: &Path) -> Result<usize> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {} FROM cd ORDER BY id", SELECT_COLUMNS))?;
        let cds = stmt
            .query_map(params![], row_to_cd)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if cds.is_empty() {
            info!("No rows to export");
            return Ok(0);
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for cd in &cds {
            writer.serialize(cd)?;
        }
        writer.flush()?;

        info!("Exported {} rows to {}", cds.len(), path.display());
        Ok(cds.len())
    }
}
