//! Food record melting - flatten nested records into two relational tables
//!
//! Melting runs in two passes. `plan` scans every record, checks its shape
//! and collects the column set of each table; `extractor` then materializes
//! rows against those fixed columns. Finished tables go to a `writer` sink.

pub mod types;
pub mod plan;
pub mod extractor;
pub mod writer;

pub use types::{
    FlatTables, MeltConfig, MeltSummary, Table, FOOD_NUTRIENTS_TABLE, FOOD_TABLE, INDEX_COLUMN,
    NUTRIENTS_FIELD,
};
pub use plan::{ColumnPlan, TablePlan};
pub use extractor::FoodMelter;
pub use writer::{JsonlSink, MemorySink, SqliteSink, TableSink};
