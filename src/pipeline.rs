//! Run orchestration: acquire records once, melt them, hand both tables to a sink

use crate::error::{FetchError, PipelineError};
use crate::melt::{FoodMelter, MeltSummary, TableSink};
use crate::source::{RecordCache, RecordSource};
use serde_json::Value;
use tracing::{info, warn};

/// Return cached records when available, otherwise fetch and cache them
///
/// This is the only place that decides between cache and network. A fetch
/// that yields nothing is an error and is never cached.
pub fn acquire_records<C, S>(cache: &C, source: &S) -> Result<Vec<Value>, PipelineError>
where
    C: RecordCache + ?Sized,
    S: RecordSource + ?Sized,
{
    if let Some(records) = cache.load_cached()? {
        info!(records = records.len(), "Loaded records from cache");
        return Ok(records);
    }

    info!("No usable cache, fetching records from upstream");
    let records = source.fetch()?;
    if records.is_empty() {
        warn!("Upstream returned no records, leaving cache untouched");
        return Err(FetchError::NoRecords.into());
    }

    cache.store_cache(&records)?;
    Ok(records)
}

/// Melt `records` and replace the parent and child tables as one batch
///
/// Both tables are built before the sink is touched, so a malformed record
/// leaves it unchanged, and the sink's `write_all` keeps a failed write from
/// pairing a new parent table with a stale child table.
pub fn run<S>(records: &[Value], melter: &FoodMelter, sink: &mut S) -> Result<MeltSummary, PipelineError>
where
    S: TableSink + ?Sized,
{
    let tables = melter.melt(records)?;

    let batch = [&tables.parent, &tables.child];
    for table in batch {
        info!(
            table = %table.name,
            rows = table.len(),
            columns = table.columns.len(),
            "Loading table"
        );
    }
    sink.write_all(&batch)?;

    Ok(tables.summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CacheError, SinkError};
    use crate::melt::{MeltConfig, MemorySink, SqliteSink};
    use serde_json::json;
    use std::cell::{Cell, RefCell};

    #[derive(Default)]
    struct FakeCache {
        cached: Option<Vec<Value>>,
        stored: RefCell<Option<Vec<Value>>>,
    }

    impl RecordCache for FakeCache {
        fn load_cached(&self) -> Result<Option<Vec<Value>>, CacheError> {
            Ok(self.cached.clone())
        }

        fn store_cache(&self, records: &[Value]) -> Result<(), CacheError> {
            *self.stored.borrow_mut() = Some(records.to_vec());
            Ok(())
        }
    }

    struct FakeSource {
        records: Vec<Value>,
        calls: Cell<usize>,
    }

    impl FakeSource {
        fn new(records: Vec<Value>) -> Self {
            FakeSource {
                records,
                calls: Cell::new(0),
            }
        }
    }

    impl RecordSource for FakeSource {
        fn fetch(&self) -> Result<Vec<Value>, FetchError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.records.clone())
        }
    }

    #[test]
    fn test_cache_hit_skips_fetch() {
        let cache = FakeCache {
            cached: Some(vec![json!({"fdcId": 1})]),
            ..FakeCache::default()
        };
        let source = FakeSource::new(vec![json!({"fdcId": 2})]);

        let records = acquire_records(&cache, &source).unwrap();

        assert_eq!(records, vec![json!({"fdcId": 1})]);
        assert_eq!(source.calls.get(), 0);
        assert!(cache.stored.borrow().is_none());
    }

    #[test]
    fn test_cache_miss_fetches_and_stores() {
        let cache = FakeCache::default();
        let source = FakeSource::new(vec![json!({"fdcId": 2}), json!({"fdcId": 3})]);

        let records = acquire_records(&cache, &source).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(source.calls.get(), 1);
        assert_eq!(cache.stored.borrow().as_ref(), Some(&records));
    }

    #[test]
    fn test_empty_fetch_is_not_cached() {
        let cache = FakeCache::default();
        let source = FakeSource::new(Vec::new());

        let err = acquire_records(&cache, &source).unwrap_err();

        assert!(matches!(err, PipelineError::Fetch(FetchError::NoRecords)));
        assert!(cache.stored.borrow().is_none());
    }

    #[test]
    fn test_run_writes_both_tables() {
        let records = vec![
            json!({"fdcId": 1, "description": "Apple", "foodNutrients": [{"nutrientId": 100, "value": 5}]}),
            json!({"fdcId": 2, "description": "Bread", "foodNutrients": []}),
        ];
        let mut sink = MemorySink::new();

        let summary = run(&records, &FoodMelter::default(), &mut sink).unwrap();

        assert_eq!(sink.writes(), 2);
        assert_eq!(sink.table("food").unwrap().len(), 2);
        assert_eq!(sink.table("food_nutrients").unwrap().len(), 1);
        assert_eq!(summary.records, 2);
        assert_eq!(summary.child_rows, 1);
    }

    #[test]
    fn test_shape_error_writes_nothing() {
        let records = vec![
            json!({"fdcId": 1, "foodNutrients": []}),
            json!({"fdcId": 2, "foodNutrients": "none"}),
        ];
        let mut sink = MemorySink::new();

        let err = run(&records, &FoodMelter::default(), &mut sink).unwrap_err();

        assert!(matches!(err, PipelineError::Shape(_)));
        assert_eq!(sink.writes(), 0);
    }

    #[test]
    fn test_failed_child_write_keeps_previous_parent() {
        let first = vec![
            json!({"fdcId": 1, "foodNutrients": [{"number": "203"}]}),
            json!({"fdcId": 2, "foodNutrients": [{"number": "204"}]}),
        ];
        let mut sink = SqliteSink::in_memory().unwrap();
        run(&first, &FoodMelter::default(), &mut sink).unwrap();

        // The child table name is rejected only after the parent was replaced
        let melter = FoodMelter::new(MeltConfig {
            child_table: "food nutrients".to_string(),
            ..MeltConfig::default()
        });
        let second = vec![json!({"fdcId": 9, "foodNutrients": [{"number": "301"}]})];
        let err = run(&second, &melter, &mut sink).unwrap_err();

        assert!(matches!(err, PipelineError::Sink(SinkError::InvalidTableName(_))));
        let conn = sink.connection();
        let fdc_ids: Vec<i64> = conn
            .prepare("SELECT fdcId FROM food ORDER BY food_index")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(fdc_ids, vec![1, 2]);
        let nutrients: i64 = conn
            .query_row("SELECT COUNT(*) FROM food_nutrients", [], |row| row.get(0))
            .unwrap();
        assert_eq!(nutrients, 2);
    }
}
