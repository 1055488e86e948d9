//! Paginated retrieval from the FoodData Central `/foods/list` endpoint

use crate::config::ApiSettings;
use crate::error::FetchError;
use crate::source::RecordSource;
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Something that can serve one page of raw records
pub trait PageSource {
    /// Fetch page `page` (1-based), optionally restricted to one data type
    fn fetch_page(&self, page: u32, data_type: Option<&str>) -> Result<Value, FetchError>;
}

/// Blocking HTTP client for FoodData Central
pub struct FdcClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    page_size: usize,
}

impl FdcClient {
    pub fn new(settings: &ApiSettings) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(FetchError::Client)?;

        Ok(FdcClient {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone().filter(|key| !key.is_empty()),
            page_size: settings.page_size,
        })
    }
}

impl PageSource for FdcClient {
    fn fetch_page(&self, page: u32, data_type: Option<&str>) -> Result<Value, FetchError> {
        let api_key = self.api_key.as_deref().ok_or(FetchError::MissingApiKey)?;

        let mut query = vec![
            ("pageNumber", page.to_string()),
            ("pageSize", self.page_size.to_string()),
            ("api_key", api_key.to_string()),
        ];
        if let Some(data_type) = data_type {
            query.push(("dataType", data_type.to_string()));
        }

        // Error payloads come with non-2xx statuses, so the body is read regardless
        self.client
            .get(format!("{}/foods/list", self.base_url))
            .query(&query)
            .send()
            .and_then(|response| response.json::<Value>())
            .map_err(|source| FetchError::Transport { page, source })
    }
}

/// Pages through one or more data types until each is exhausted or the cap is hit
pub struct Fetcher<P> {
    pages: P,
    page_size: usize,
    page_delay: Duration,
    max_records: Option<usize>,
    data_types: Vec<String>,
}

impl<P: PageSource> Fetcher<P> {
    pub fn new(pages: P, settings: &ApiSettings) -> Self {
        Fetcher {
            pages,
            page_size: settings.page_size,
            page_delay: settings.page_delay(),
            max_records: settings.max_records,
            data_types: settings.data_types.clone(),
        }
    }

    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    /// Fetch every configured data type in order
    ///
    /// A page that fails or returns an error payload ends that data type and
    /// keeps what was collected so far. Only errors that would fail every
    /// request (see [`FetchError::is_fatal`]) are returned.
    pub fn fetch_all(&self) -> Result<Vec<Value>, FetchError> {
        let facets: Vec<Option<&str>> = if self.data_types.is_empty() {
            vec![None]
        } else {
            self.data_types.iter().map(|t| Some(t.as_str())).collect()
        };

        let mut records = Vec::new();
        for facet in facets {
            if self.cap_reached(records.len()) {
                debug!(data_type = facet.unwrap_or("all"), "Record cap reached, skipping data type");
                continue;
            }
            let fetched = self.fetch_facet(facet, &mut records)?;
            info!(data_type = facet.unwrap_or("all"), records = fetched, "Finished data type");
        }

        Ok(records)
    }

    fn fetch_facet(&self, facet: Option<&str>, records: &mut Vec<Value>) -> Result<usize, FetchError> {
        let label = facet.unwrap_or("all");
        let start = records.len();
        let mut page_number = 1;

        loop {
            info!(page = page_number, data_type = label, "Getting page");

            let entries = match self.pages.fetch_page(page_number, facet) {
                Ok(Value::Array(entries)) => entries,
                Ok(payload) => {
                    let err = FetchError::ErrorPayload {
                        page: page_number,
                        payload: payload.to_string(),
                    };
                    warn!(data_type = label, error = %err, "Stopping data type");
                    break;
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(data_type = label, error = %err, "Stopping data type");
                    break;
                }
            };

            // An empty page ends the data type even if the page size is misconfigured
            let full_page = !entries.is_empty() && entries.len() >= self.page_size;
            records.extend(entries);

            if let Some(cap) = self.max_records {
                if records.len() >= cap {
                    records.truncate(cap);
                    break;
                }
            }
            if !full_page {
                break;
            }

            page_number += 1;
            if !self.page_delay.is_zero() {
                std::thread::sleep(self.page_delay);
            }
        }

        Ok(records.len() - start)
    }

    fn cap_reached(&self, collected: usize) -> bool {
        self.max_records.map_or(false, |cap| collected >= cap)
    }
}

impl<P: PageSource> RecordSource for Fetcher<P> {
    fn fetch(&self) -> Result<Vec<Value>, FetchError> {
        self.fetch_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Serves pre-built pages and records every request
    struct FakePages {
        pages: HashMap<(Option<String>, u32), Value>,
        requests: RefCell<Vec<(Option<String>, u32)>>,
    }

    impl FakePages {
        fn new() -> Self {
            FakePages {
                pages: HashMap::new(),
                requests: RefCell::new(Vec::new()),
            }
        }

        fn page(mut self, data_type: Option<&str>, page: u32, value: Value) -> Self {
            self.pages.insert((data_type.map(String::from), page), value);
            self
        }

        fn requests(&self) -> Vec<(Option<String>, u32)> {
            self.requests.borrow().clone()
        }
    }

    impl PageSource for &FakePages {
        fn fetch_page(&self, page: u32, data_type: Option<&str>) -> Result<Value, FetchError> {
            let key = (data_type.map(String::from), page);
            self.requests.borrow_mut().push(key.clone());
            Ok(self.pages.get(&key).cloned().unwrap_or_else(|| json!([])))
        }
    }

    struct NoKey;

    impl PageSource for NoKey {
        fn fetch_page(&self, _page: u32, _data_type: Option<&str>) -> Result<Value, FetchError> {
            Err(FetchError::MissingApiKey)
        }
    }

    fn foods(start: u64, count: u64) -> Value {
        Value::Array(
            (start..start + count)
                .map(|id| json!({"fdcId": id, "foodNutrients": []}))
                .collect(),
        )
    }

    fn settings(page_size: usize) -> ApiSettings {
        ApiSettings {
            page_size,
            page_delay_ms: 0,
            ..ApiSettings::default()
        }
    }

    #[test]
    fn test_stops_on_short_page() {
        let pages = FakePages::new()
            .page(None, 1, foods(0, 3))
            .page(None, 2, foods(3, 3))
            .page(None, 3, foods(6, 1));

        let records = Fetcher::new(&pages, &settings(3)).fetch_all().unwrap();

        assert_eq!(records.len(), 7);
        assert_eq!(records[6]["fdcId"], json!(6));
        assert_eq!(pages.requests(), vec![(None, 1), (None, 2), (None, 3)]);
    }

    #[test]
    fn test_error_payload_keeps_partial_results() {
        let pages = FakePages::new()
            .page(None, 1, foods(0, 2))
            .page(None, 2, json!({"error": {"code": "OVER_RATE_LIMIT"}}));

        let records = Fetcher::new(&pages, &settings(2)).fetch_all().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(pages.requests().len(), 2);
    }

    #[test]
    fn test_iterates_every_data_type() {
        let pages = FakePages::new()
            .page(Some("Foundation"), 1, foods(0, 2))
            .page(Some("Foundation"), 2, foods(2, 1))
            .page(Some("SR Legacy"), 1, foods(100, 1));
        let settings = ApiSettings {
            data_types: vec!["Foundation".to_string(), "SR Legacy".to_string()],
            ..settings(2)
        };

        let records = Fetcher::new(&pages, &settings).fetch_all().unwrap();

        let ids: Vec<_> = records.iter().map(|r| r["fdcId"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![0, 1, 2, 100]);
    }

    #[test]
    fn test_cap_applies_across_data_types() {
        let pages = FakePages::new()
            .page(Some("Foundation"), 1, foods(0, 2))
            .page(Some("Foundation"), 2, foods(2, 1))
            .page(Some("SR Legacy"), 1, foods(100, 2))
            .page(Some("Branded"), 1, foods(200, 2));
        let settings = ApiSettings {
            data_types: vec![
                "Foundation".to_string(),
                "SR Legacy".to_string(),
                "Branded".to_string(),
            ],
            max_records: Some(4),
            ..settings(2)
        };

        let records = Fetcher::new(&pages, &settings).fetch_all().unwrap();

        assert_eq!(records.len(), 4);
        assert_eq!(records[3]["fdcId"], json!(100));
        assert!(!pages
            .requests()
            .iter()
            .any(|(data_type, _)| data_type.as_deref() == Some("Branded")));
    }

    #[test]
    fn test_empty_page_ends_data_type() {
        let pages = FakePages::new().page(None, 1, foods(0, 2));

        let records = Fetcher::new(&pages, &settings(0)).fetch_all().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(pages.requests(), vec![(None, 1), (None, 2)]);
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let err = Fetcher::new(NoKey, &settings(50)).fetch_all().unwrap_err();
        assert!(matches!(err, FetchError::MissingApiKey));
    }

    #[test]
    fn test_client_requires_api_key() {
        let client = FdcClient::new(&ApiSettings::default()).unwrap();
        let err = client.fetch_page(1, None).unwrap_err();
        assert!(matches!(err, FetchError::MissingApiKey));
    }
}
