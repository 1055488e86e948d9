//! # nutrimelt - FoodData Central to relational tables
//!
//! Fetches food records from the FoodData Central `/foods/list` API (or a
//! cached snapshot of them) and melts each record's nested `foodNutrients`
//! list into a child table linked to its parent by position.
//!
//! ## Modules
//!
//! - **melt**: two-pass flattening into the `food` and `food_nutrients` tables, plus sinks
//! - **source**: paginated fetching and the raw record cache
//! - **pipeline**: the cache-then-fetch decision and a full melt-and-write run
//! - **config**: layered run settings
//!
//! ## Quick Start
//!
//! ```rust
//! use nutrimelt::melt::{FoodMelter, MemorySink};
//! use nutrimelt::pipeline;
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let records = vec![json!({
//!     "fdcId": 1,
//!     "description": "Apple",
//!     "foodNutrients": [{"nutrientId": 100, "value": 5}]
//! })];
//!
//! let mut sink = MemorySink::new();
//! let summary = pipeline::run(&records, &FoodMelter::default(), &mut sink)?;
//!
//! // food: food_index, fdcId, description
//! // food_nutrients: food_index, nutrientId, value
//! assert_eq!(summary.child_rows, 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod melt;
pub mod pipeline;
pub mod source;

// Re-export commonly used types for convenience
pub use crate::config::{Settings, SinkKind};
pub use error::{CacheError, ConfigError, FetchError, PipelineError, ShapeError, SinkError};
pub use melt::{FlatTables, FoodMelter, MeltConfig, MeltSummary, Table, TableSink};
pub use source::{JsonFileCache, RecordCache, RecordSource};
