//! Table sinks
//!
//! A sink receives finished tables and replaces whatever it previously held
//! under each name. `write_all` replaces a batch of tables together, so a
//! failure leaves every table in the batch as it was. Row and column order are
//! not part of the contract; only the column -> value content of each row is.

use crate::error::SinkError;
use crate::melt::types::Table;
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params_from_iter, types::Value as SqlValue, Connection, Transaction};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

static TABLE_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap()
});

/// Destination for flattened tables
pub trait TableSink {
    /// Replace the contents stored under `table.name` with `table`
    fn write(&mut self, table: &Table) -> Result<(), SinkError>;

    /// Replace every table in `tables` as one unit
    ///
    /// The default writes the tables one at a time and is only as atomic as
    /// `write`; sinks that can do better override it.
    fn write_all(&mut self, tables: &[&Table]) -> Result<(), SinkError> {
        for table in tables {
            self.write(table)?;
        }
        Ok(())
    }
}

fn validate_table_name(name: &str) -> Result<(), SinkError> {
    if TABLE_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(SinkError::InvalidTableName(name.to_string()))
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column names as stored in SQLite
///
/// SQLite compares identifiers ignoring ASCII case, so keys such as `number`
/// and `Number` would collide. Later duplicates get a `_2`, `_3`... suffix.
fn sql_column_names(table: &Table) -> Vec<String> {
    let mut seen = HashSet::new();
    table
        .columns
        .iter()
        .map(|column| {
            let mut name = column.clone();
            let mut suffix = 2;
            while !seen.insert(name.to_ascii_lowercase()) {
                name = format!("{}_{}", column, suffix);
                suffix += 1;
            }
            if &name != column {
                warn!(table = %table.name, column = %column, renamed = %name, "Column name differs only by case, renaming");
            }
            name
        })
        .collect()
}

/// Declared SQLite column type, widened as values are seen
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Integer),
            Value::Number(n) if n.is_i64() => Some(ColumnType::Integer),
            Value::Number(_) => Some(ColumnType::Real),
            Value::String(_) | Value::Array(_) | Value::Object(_) => Some(ColumnType::Text),
        }
    }

    fn sql(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

fn column_type(table: &Table, idx: usize) -> ColumnType {
    table
        .rows
        .iter()
        .filter_map(|row| ColumnType::of(&row[idx]))
        .max()
        .unwrap_or(ColumnType::Text)
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

/// Writes tables into a SQLite database, one SQL table per flat table
pub struct SqliteSink {
    conn: Connection,
}

impl SqliteSink {
    /// Open (or create) the database file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| SinkError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path).map_err(|source| SinkError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(SqliteSink { conn })
    }

    pub fn in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory().map_err(|source| SinkError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Ok(SqliteSink { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Drop, create and fill one table inside `tx`
fn replace_table(tx: &Transaction<'_>, table: &Table) -> Result<(), SinkError> {
    validate_table_name(&table.name)?;
    let db_err = |source| SinkError::Database {
        table: table.name.clone(),
        source,
    };

    let name = quote_identifier(&table.name);
    let columns = sql_column_names(table);
    let column_defs = columns
        .iter()
        .enumerate()
        .map(|(idx, column)| format!("{} {}", quote_identifier(column), column_type(table, idx).sql()))
        .collect::<Vec<_>>()
        .join(", ");
    let column_names = columns
        .iter()
        .map(|column| quote_identifier(column))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; columns.len()].join(", ");

    tx.execute(&format!("DROP TABLE IF EXISTS {}", name), [])
        .map_err(db_err)?;
    tx.execute(&format!("CREATE TABLE {} ({})", name, column_defs), [])
        .map_err(db_err)?;

    let mut stmt = tx
        .prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({})",
            name, column_names, placeholders
        ))
        .map_err(db_err)?;
    for row in &table.rows {
        stmt.execute(params_from_iter(row.iter().map(to_sql_value)))
            .map_err(db_err)?;
    }

    debug!(table = %table.name, rows = table.len(), "Replaced SQLite table");
    Ok(())
}

impl TableSink for SqliteSink {
    fn write(&mut self, table: &Table) -> Result<(), SinkError> {
        self.write_all(&[table])
    }

    fn write_all(&mut self, tables: &[&Table]) -> Result<(), SinkError> {
        let batch_err = |source| SinkError::Database {
            table: tables
                .iter()
                .map(|table| table.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            source,
        };

        // Dropping the transaction without commit rolls every table back
        let tx = self.conn.transaction().map_err(batch_err)?;
        for table in tables {
            replace_table(&tx, table)?;
        }
        tx.commit().map_err(batch_err)?;
        Ok(())
    }
}

/// Writes each table to `<dir>/<table>.jsonl`, one JSON object per row
pub struct JsonlSink {
    output_dir: PathBuf,
}

impl JsonlSink {
    /// Create a sink writing into `output_dir`, creating it if needed
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self, SinkError> {
        let output_dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_dir).map_err(|source| SinkError::CreateDir {
            path: output_dir.clone(),
            source,
        })?;
        Ok(JsonlSink { output_dir })
    }

    pub fn table_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!("{}.jsonl", name))
    }

    fn tmp_path(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!(".{}.jsonl.tmp", name))
    }

    /// Write `table` to its temporary file, removing the file on failure
    fn stage(&self, table: &Table) -> Result<PathBuf, SinkError> {
        validate_table_name(&table.name)?;

        let tmp_path = self.tmp_path(&table.name);
        let file = File::create(&tmp_path).map_err(|source| SinkError::Io {
            table: table.name.clone(),
            source,
        })?;
        if let Err(err) = write_rows(table, BufWriter::new(file)) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(err);
        }
        Ok(tmp_path)
    }
}

fn write_rows<W: Write>(table: &Table, mut writer: W) -> Result<(), SinkError> {
    let io_err = |source| SinkError::Io {
        table: table.name.clone(),
        source,
    };

    for record in table.records() {
        serde_json::to_writer(&mut writer, &record).map_err(|source| SinkError::Serialize {
            table: table.name.clone(),
            source,
        })?;
        writeln!(writer).map_err(io_err)?;
    }
    writer.flush().map_err(io_err)
}

impl TableSink for JsonlSink {
    fn write(&mut self, table: &Table) -> Result<(), SinkError> {
        self.write_all(&[table])
    }

    /// Stage every table before renaming any, so a failed batch replaces nothing
    fn write_all(&mut self, tables: &[&Table]) -> Result<(), SinkError> {
        let mut staged = Vec::with_capacity(tables.len());
        for table in tables {
            match self.stage(table) {
                Ok(tmp_path) => staged.push(tmp_path),
                Err(err) => {
                    for tmp_path in &staged {
                        let _ = std::fs::remove_file(tmp_path);
                    }
                    return Err(err);
                }
            }
        }

        for (done, (table, tmp_path)) in tables.iter().zip(&staged).enumerate() {
            let path = self.table_path(&table.name);
            if let Err(source) = std::fs::rename(tmp_path, &path) {
                for tmp_path in &staged[done..] {
                    let _ = std::fs::remove_file(tmp_path);
                }
                return Err(SinkError::Io {
                    table: table.name.clone(),
                    source,
                });
            }
            debug!(table = %table.name, rows = table.len(), path = %path.display(), "Wrote JSON Lines table");
        }
        Ok(())
    }
}

/// Keeps the last table written under each name in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    tables: BTreeMap<String, Table>,
    writes: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Number of write calls received
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl TableSink for MemorySink {
    fn write(&mut self, table: &Table) -> Result<(), SinkError> {
        self.writes += 1;
        self.tables.insert(table.name.clone(), table.clone());
        Ok(())
    }
}
