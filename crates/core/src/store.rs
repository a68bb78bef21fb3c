//! Persisted table storage.
//!
//! Tables are rectangular text tables with a header row, stored by name.
//! [`CsvTableStore`] writes one delimited file per table.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors from loading, saving or decoding persisted tables.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("table '{table}' has no column '{column}'")]
    MissingColumn { table: String, column: String },

    #[error("invalid value '{value}' in column '{column}'")]
    InvalidValue { column: String, value: String },

    #[error("table '{table}' row {row} has {found} fields, header has {expected}")]
    Misaligned {
        table: String,
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// An untyped table: header plus string cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(header: Vec<String>) -> Self {
        Self {
            header,
            rows: Vec::new(),
        }
    }

    /// Index of `column`, or [`StoreError::MissingColumn`].
    pub fn column(&self, table: &str, column: &str) -> Result<usize, StoreError> {
        self.header
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| StoreError::MissingColumn {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    /// Check every row has as many cells as the header.
    pub fn check_aligned(&self, table: &str) -> Result<(), StoreError> {
        let expected = self.header.len();
        for (row, cells) in self.rows.iter().enumerate() {
            if cells.len() != expected {
                return Err(StoreError::Misaligned {
                    table: table.to_string(),
                    row,
                    expected,
                    found: cells.len(),
                });
            }
        }
        Ok(())
    }
}

/// Named table storage.
pub trait TableStore: Send + Sync {
    /// Load `name`, or `None` if it was never saved.
    fn load(&self, name: &str) -> Result<Option<RawTable>, StoreError>;

    /// Replace `name` with `table`.
    fn save(&self, name: &str, table: &RawTable) -> Result<(), StoreError>;
}

/// One `{name}.csv` file per table under a directory.
#[derive(Debug, Clone)]
pub struct CsvTableStore {
    dir: PathBuf,
}

impl CsvTableStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.csv"))
    }
}

impl TableStore for CsvTableStore {
    fn load(&self, name: &str) -> Result<Option<RawTable>, StoreError> {
        let path = self.path(name);
        if !path.exists() {
            debug!(table = name, path = ?path, "Table not found");
            return Ok(None);
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let header = reader.headers()?.iter().map(str::to_string).collect();
        let mut table = RawTable::new(header);
        for record in reader.records() {
            table.rows.push(record?.iter().map(str::to_string).collect());
        }

        debug!(table = name, rows = table.rows.len(), "Table loaded");
        Ok(Some(table))
    }

    fn save(&self, name: &str, table: &RawTable) -> Result<(), StoreError> {
        table.check_aligned(name)?;
        std::fs::create_dir_all(&self.dir)?;

        // Write to a sibling file first so a crash never leaves a torn table
        let path = self.path(name);
        let tmp = self.dir.join(format!(".{name}.csv.tmp"));
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            writer.write_record(&table.header)?;
            for row in &table.rows {
                writer.write_record(row)?;
            }
            writer.flush()?;
        }
        std::fs::rename(&tmp, &path)?;

        debug!(table = name, rows = table.rows.len(), path = ?path, "Table saved");
        Ok(())
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: Mutex<HashMap<String, RawTable>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TableStore for MemoryTableStore {
    fn load(&self, name: &str) -> Result<Option<RawTable>, StoreError> {
        Ok(self.tables.lock().get(name).cloned())
    }

    fn save(&self, name: &str, table: &RawTable) -> Result<(), StoreError> {
        table.check_aligned(name)?;
        self.tables.lock().insert(name.to_string(), table.clone());
        Ok(())
    }
}
