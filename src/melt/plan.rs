//! Column planning for food record flattening
//!
//! This is the first of two passes over the input: it walks every record,
//! validates its shape and collects the union of keys for each output table
//! together with whether each key ever carries a non-null value. The second
//! pass (see `extractor`) materializes rows against the resulting column sets.

use crate::error::ShapeError;
use crate::melt::types::{json_type_name, MeltConfig};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Columns discovered for one output table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TablePlan {
    /// Columns in first-seen order
    columns: Vec<String>,

    /// Position of each column in `columns`
    positions: HashMap<String, usize>,

    /// Whether each column holds a non-null value in at least one row
    populated: Vec<bool>,
}

impl TablePlan {
    /// Start a plan whose first column is the always-present key
    pub fn with_key(key: &str) -> Self {
        let mut plan = TablePlan::default();
        plan.declare(key);
        plan.populated[0] = true;
        plan
    }

    /// Add a column without a value; it stays prunable until observed non-null
    pub fn declare(&mut self, column: &str) -> usize {
        if let Some(&pos) = self.positions.get(column) {
            return pos;
        }
        let pos = self.columns.len();
        self.columns.push(column.to_string());
        self.positions.insert(column.to_string(), pos);
        self.populated.push(false);
        pos
    }

    /// Record that `column` appeared with `value` in some row
    pub fn observe(&mut self, column: &str, value: &Value) {
        let pos = self.declare(column);
        if !value.is_null() {
            self.populated[pos] = true;
        }
    }

    pub fn contains(&self, column: &str) -> bool {
        self.positions.contains_key(column)
    }

    /// Every column seen, including all-null ones
    pub fn all_columns(&self) -> &[String] {
        &self.columns
    }

    pub fn is_populated(&self, column: &str) -> bool {
        self.positions
            .get(column)
            .map(|&pos| self.populated[pos])
            .unwrap_or(false)
    }

    /// Columns to materialize, in first-seen order
    pub fn kept_columns(&self, prune: bool) -> Vec<String> {
        self.columns
            .iter()
            .zip(self.populated.iter())
            .filter(|&(_, &populated)| populated || !prune)
            .map(|(column, _)| column.clone())
            .collect()
    }

    /// Columns that are null or absent in every row
    pub fn empty_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .zip(self.populated.iter())
            .filter(|&(_, &populated)| !populated)
            .map(|(column, _)| column.clone())
            .collect()
    }
}

/// Column sets for both output tables
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPlan {
    pub parent: TablePlan,
    pub child: TablePlan,
}

impl ColumnPlan {
    /// Plan both tables by scanning every record
    pub fn from_records(records: &[Value], config: &MeltConfig) -> Result<Self, ShapeError> {
        let mut parent = TablePlan::with_key(&config.index_column);
        let mut child = TablePlan::with_key(&config.index_column);

        if let Some(projection) = &config.parent_columns {
            for column in projection {
                if column != &config.nested_field && !column.eq_ignore_ascii_case(&config.index_column) {
                    parent.declare(column);
                }
            }
        }

        for (index, value) in records.iter().enumerate() {
            let record = as_record(value, index)?;

            for (key, value) in record {
                if key == &config.nested_field {
                    continue;
                }
                if key.eq_ignore_ascii_case(&config.index_column) {
                    return Err(ShapeError::ReservedColumn {
                        index,
                        field: key.clone(),
                    });
                }
                if config.parent_columns.is_some() && !parent.contains(key) {
                    continue;
                }
                parent.observe(key, value);
            }

            for (entry_no, entry) in nested_entries(record, &config.nested_field, index)?
                .iter()
                .enumerate()
            {
                let entry = as_entry(entry, index, entry_no, &config.nested_field)?;
                for (key, value) in entry {
                    if key.eq_ignore_ascii_case(&config.index_column) {
                        return Err(ShapeError::ReservedColumn {
                            index,
                            field: key.clone(),
                        });
                    }
                    child.observe(key, value);
                }
            }
        }

        Ok(ColumnPlan { parent, child })
    }
}

/// View a top-level value as a record
pub(crate) fn as_record(value: &Value, index: usize) -> Result<&Map<String, Value>, ShapeError> {
    value.as_object().ok_or(ShapeError::NotAnObject {
        index,
        found: json_type_name(value),
    })
}

/// The nested list of a record; missing or null counts as empty
pub(crate) fn nested_entries<'a>(
    record: &'a Map<String, Value>,
    field: &str,
    index: usize,
) -> Result<&'a [Value], ShapeError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(&[]),
        Some(Value::Array(entries)) => Ok(entries),
        Some(other) => Err(ShapeError::NestedNotAList {
            index,
            field: field.to_string(),
            found: json_type_name(other),
        }),
    }
}

/// View one nested entry as a mapping
pub(crate) fn as_entry<'a>(
    entry: &'a Value,
    index: usize,
    entry_no: usize,
    field: &str,
) -> Result<&'a Map<String, Value>, ShapeError> {
    entry.as_object().ok_or_else(|| ShapeError::EntryNotAnObject {
        index,
        entry: entry_no,
        field: field.to_string(),
        found: json_type_name(entry),
    })
}
