use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Table holding one row per food record
pub const FOOD_TABLE: &str = "food";

/// Table holding one row per nutrient entry
pub const FOOD_NUTRIENTS_TABLE: &str = "food_nutrients";

/// Synthetic key linking nutrient rows to their food row
pub const INDEX_COLUMN: &str = "food_index";

/// Field of a food record that holds its nutrient entries
pub const NUTRIENTS_FIELD: &str = "foodNutrients";

/// A flat table - one column list plus rows aligned with it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// The table name, e.g. "food"
    pub name: String,

    /// Column names, key column first
    pub columns: Vec<String>,

    /// Row values, each aligned with `columns`
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Table {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Values of one column in row order, or None if the column does not exist
    pub fn column_values<'a>(&'a self, column: &str) -> Option<impl Iterator<Item = &'a Value> + 'a> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Rows as column -> value mappings
    pub fn records(&self) -> impl Iterator<Item = Map<String, Value>> + '_ {
        self.rows.iter().map(move |row| {
            self.columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect()
        })
    }
}

/// Configuration for flattening food records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeltConfig {
    /// Name of the parent table
    pub parent_table: String,

    /// Name of the child table
    pub child_table: String,

    /// Name of the synthetic key column in both tables
    pub index_column: String,

    /// Record field holding the nested list
    pub nested_field: String,

    /// Restrict parent rows to these fields (all fields when unset)
    pub parent_columns: Option<Vec<String>>,

    /// Drop columns that are null in every row
    pub prune_empty_columns: bool,
}

impl Default for MeltConfig {
    fn default() -> Self {
        MeltConfig {
            parent_table: String::from(FOOD_TABLE),
            child_table: String::from(FOOD_NUTRIENTS_TABLE),
            index_column: String::from(INDEX_COLUMN),
            nested_field: String::from(NUTRIENTS_FIELD),
            parent_columns: None,
            prune_empty_columns: true,
        }
    }
}

/// Counts and column decisions for one flattening run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MeltSummary {
    pub records: usize,
    pub parent_rows: usize,
    pub child_rows: usize,
    pub parent_columns: Vec<String>,
    pub child_columns: Vec<String>,
    pub pruned_parent_columns: Vec<String>,
    pub pruned_child_columns: Vec<String>,
}

/// The two tables produced from one record sequence
#[derive(Debug, Clone, PartialEq)]
pub struct FlatTables {
    pub parent: Table,
    pub child: Table,
    pub summary: MeltSummary,
}

/// Name of a JSON value's type, for error messages
pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_records_pair_columns_with_values() {
        let mut table = Table::new("food", vec!["food_index".to_string(), "fdcId".to_string()]);
        table.rows.push(vec![json!(0), json!(1)]);
        table.rows.push(vec![json!(1), Value::Null]);

        let records: Vec<_> = table.records().collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("fdcId").unwrap(), &json!(1));
        assert_eq!(records[1].get("fdcId").unwrap(), &Value::Null);

        let ids: Vec<_> = table.column_values("food_index").unwrap().cloned().collect();
        assert_eq!(ids, vec![json!(0), json!(1)]);
        assert!(table.column_values("missing").is_none());
    }

    #[test]
    fn test_default_config_targets_food_tables() {
        let config = MeltConfig::default();
        assert_eq!(config.parent_table, "food");
        assert_eq!(config.child_table, "food_nutrients");
        assert_eq!(config.index_column, "food_index");
        assert_eq!(config.nested_field, "foodNutrients");
        assert!(config.prune_empty_columns);
    }
}
