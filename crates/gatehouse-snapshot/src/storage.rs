//! Column-oriented storage the snapshot is written through.
//!
//! A *unit* is a named table of *entries*; each entry maps column names
//! to values, carried as text. [`SqliteStorage`] is the only backend, but
//! the bridge is written against the [`Storage`] trait.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, trace};

use crate::SnapshotError;

// ---------------------------------------------------------------------------
// Entries and columns
// ---------------------------------------------------------------------------

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Text,
}

impl DataType {
    fn sql(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::Text => "TEXT",
        }
    }
}

/// One row: column name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entry {
    values: BTreeMap<String, String>,
}

impl Entry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column, builder style.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(column.into(), value.into());
        self
    }

    /// The value of `column`, if the row has one.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// A generic unit/entry store.
///
/// With autobatch on, `add_entry` only queues; `execute_batch` writes the
/// queue in a single transaction.
pub trait Storage {
    fn connect(&mut self) -> Result<(), SnapshotError>;

    fn create_unit(
        &mut self,
        unit: &str,
        columns: &[(&str, DataType)],
        primary_key: &str,
    ) -> Result<(), SnapshotError>;

    fn set_autobatch(&mut self, enabled: bool);

    fn add_entry(&mut self, unit: &str, entry: Entry) -> Result<(), SnapshotError>;

    /// Writes every queued entry. Returns how many were written.
    fn execute_batch(&mut self) -> Result<usize, SnapshotError>;

    /// Drops queued entries without writing them.
    fn clear_batch(&mut self);

    fn select_entries(
        &mut self,
        unit: &str,
        columns: &[&str],
    ) -> Result<Vec<Entry>, SnapshotError>;

    fn close(&mut self) -> Result<(), SnapshotError>;
}

// ---------------------------------------------------------------------------
// SQLite backend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenMode {
    ReadWrite,
    ReadOnly,
}

/// [`Storage`] backed by a single SQLite file.
///
/// The connection is opened by `connect` and released by `close` or on
/// drop, whichever comes first.
pub struct SqliteStorage {
    path: PathBuf,
    mode: OpenMode,
    conn: Option<Connection>,
    autobatch: bool,
    batch: Vec<(String, Entry)>,
}

impl SqliteStorage {
    /// Storage that creates the file if needed and allows writes.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self::with_mode(path.as_ref(), OpenMode::ReadWrite)
    }

    /// Storage that only reads an existing file.
    pub fn open_read_only(path: impl AsRef<Path>) -> Self {
        Self::with_mode(path.as_ref(), OpenMode::ReadOnly)
    }

    fn with_mode(path: &Path, mode: OpenMode) -> Self {
        Self {
            path: path.to_path_buf(),
            mode,
            conn: None,
            autobatch: false,
            batch: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Entries waiting for `execute_batch`.
    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    fn connection(&mut self) -> Result<&mut Connection, SnapshotError> {
        self.conn.as_mut().ok_or(SnapshotError::NotConnected)
    }
}

impl Storage for SqliteStorage {
    fn connect(&mut self) -> Result<(), SnapshotError> {
        if self.conn.is_some() {
            return Ok(());
        }
        let flags = match self.mode {
            OpenMode::ReadWrite => {
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX
            }
            OpenMode::ReadOnly => {
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
            }
        };
        let conn = Connection::open_with_flags(&self.path, flags)?;
        debug!(path = %self.path.display(), mode = ?self.mode, "storage connected");
        self.conn = Some(conn);
        Ok(())
    }

    fn create_unit(
        &mut self,
        unit: &str,
        columns: &[(&str, DataType)],
        primary_key: &str,
    ) -> Result<(), SnapshotError> {
        check_identifier(unit)?;
        check_identifier(primary_key)?;
        if columns.is_empty() {
            return Err(SnapshotError::InvalidArgument(format!(
                "unit '{unit}' needs at least one column"
            )));
        }
        if !columns.iter().any(|(name, _)| *name == primary_key) {
            return Err(SnapshotError::InvalidArgument(format!(
                "primary key '{primary_key}' is not a column of '{unit}'"
            )));
        }

        let mut defs = Vec::with_capacity(columns.len() + 1);
        for (name, ty) in columns {
            check_identifier(name)?;
            defs.push(format!("\"{name}\" {}", ty.sql()));
        }
        defs.push(format!("PRIMARY KEY (\"{primary_key}\")"));

        let sql = format!("CREATE TABLE IF NOT EXISTS \"{unit}\" ({})", defs.join(", "));
        self.connection()?.execute(&sql, [])?;
        Ok(())
    }

    fn set_autobatch(&mut self, enabled: bool) {
        self.autobatch = enabled;
    }

    fn add_entry(&mut self, unit: &str, entry: Entry) -> Result<(), SnapshotError> {
        check_identifier(unit)?;
        if entry.is_empty() {
            return Err(SnapshotError::InvalidArgument("entry has no columns".into()));
        }
        for column in entry.values.keys() {
            check_identifier(column)?;
        }

        if self.autobatch {
            self.batch.push((unit.to_string(), entry));
            return Ok(());
        }
        insert(self.connection()?, unit, &entry)
    }

    fn execute_batch(&mut self) -> Result<usize, SnapshotError> {
        if self.batch.is_empty() {
            return Ok(0);
        }
        let conn = self.conn.as_mut().ok_or(SnapshotError::NotConnected)?;
        let batch = std::mem::take(&mut self.batch);

        let tx = conn.transaction()?;
        for (unit, entry) in &batch {
            insert(&tx, unit, entry)?;
        }
        tx.commit()?;

        trace!(count = batch.len(), "batch written");
        Ok(batch.len())
    }

    fn clear_batch(&mut self) {
        self.batch.clear();
    }

    fn select_entries(
        &mut self,
        unit: &str,
        columns: &[&str],
    ) -> Result<Vec<Entry>, SnapshotError> {
        check_identifier(unit)?;
        for column in columns {
            check_identifier(column)?;
        }
        if columns.is_empty() {
            return Ok(Vec::new());
        }

        let list = columns
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {list} FROM \"{unit}\"");

        let conn = self.connection()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let mut entry = Entry::new();
            for (i, column) in columns.iter().enumerate() {
                if let Some(value) = value_text(row.get_ref(i)?) {
                    entry = entry.with(*column, value);
                }
            }
            Ok(entry)
        })?;
        let entries = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn close(&mut self) -> Result<(), SnapshotError> {
        self.batch.clear();
        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| e)?;
            debug!(path = %self.path.display(), "storage closed");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Unit and column names are interpolated into SQL, so they are limited
/// to ASCII letters, digits and underscores.
fn check_identifier(name: &str) -> Result<(), SnapshotError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SnapshotError::InvalidArgument(format!(
            "invalid identifier '{name}'"
        )))
    }
}

fn insert(conn: &Connection, unit: &str, entry: &Entry) -> Result<(), SnapshotError> {
    let columns = entry
        .values
        .keys()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=entry.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("INSERT INTO \"{unit}\" ({columns}) VALUES ({placeholders})");
    conn.execute(&sql, rusqlite::params_from_iter(entry.values.values()))?;
    Ok(())
}

/// Column affinity may have turned stored text into a number; read every
/// storage class back as text. NULL means the column is absent.
fn value_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
