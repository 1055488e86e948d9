use crate::error::ShapeError;
use crate::melt::plan::{as_entry, as_record, nested_entries, ColumnPlan};
use crate::melt::types::{FlatTables, MeltConfig, MeltSummary, Table};
use serde_json::{Map, Value};
use tracing::debug;

/// Flattens food records into a parent table and a nutrient child table
pub struct FoodMelter {
    config: MeltConfig,
}

impl FoodMelter {
    pub fn new(config: MeltConfig) -> Self {
        FoodMelter { config }
    }

    pub fn config(&self) -> &MeltConfig {
        &self.config
    }

    /// First pass: validate shapes and discover the column sets
    pub fn plan(&self, records: &[Value]) -> Result<ColumnPlan, ShapeError> {
        ColumnPlan::from_records(records, &self.config)
    }

    /// Melt the full record sequence into both tables
    ///
    /// Each record gets its position in `records` as key. Nutrient rows carry
    /// the key of the record they came from and keep record order, then
    /// entry order. No row is produced for a record without nutrients.
    pub fn melt(&self, records: &[Value]) -> Result<FlatTables, ShapeError> {
        let plan = self.plan(records)?;
        let prune = self.config.prune_empty_columns;

        let mut parent = Table::new(self.config.parent_table.clone(), plan.parent.kept_columns(prune));
        let mut child = Table::new(self.config.child_table.clone(), plan.child.kept_columns(prune));

        // Second pass: materialize against the fixed column sets
        for (index, value) in records.iter().enumerate() {
            let record = as_record(value, index)?;
            parent.rows.push(self.materialize(&parent.columns, index, record));

            let field = &self.config.nested_field;
            for (entry_no, entry) in nested_entries(record, field, index)?.iter().enumerate() {
                let entry = as_entry(entry, index, entry_no, field)?;
                child.rows.push(self.materialize(&child.columns, index, entry));
            }
        }

        let summary = MeltSummary {
            records: records.len(),
            parent_rows: parent.len(),
            child_rows: child.len(),
            parent_columns: parent.columns.clone(),
            child_columns: child.columns.clone(),
            pruned_parent_columns: if prune { plan.parent.empty_columns() } else { Vec::new() },
            pruned_child_columns: if prune { plan.child.empty_columns() } else { Vec::new() },
        };

        debug!(
            records = summary.records,
            parent_rows = summary.parent_rows,
            child_rows = summary.child_rows,
            pruned_parent = ?summary.pruned_parent_columns,
            pruned_child = ?summary.pruned_child_columns,
            "Melted food records"
        );

        Ok(FlatTables {
            parent,
            child,
            summary,
        })
    }

    /// Build one row aligned with `columns`, nulls for absent fields
    fn materialize(&self, columns: &[String], index: usize, fields: &Map<String, Value>) -> Vec<Value> {
        columns
            .iter()
            .map(|column| {
                if column == &self.config.index_column {
                    Value::from(index)
                } else {
                    fields.get(column).cloned().unwrap_or(Value::Null)
                }
            })
            .collect()
    }
}

impl Default for FoodMelter {
    fn default() -> Self {
        FoodMelter::new(MeltConfig::default())
    }
}
