//! Error types for nutrimelt
//!
//! Shape and sink errors are fatal to a run. Fetch errors raised while paging
//! only end the current category; see [`FetchError::is_fatal`].

use std::path::PathBuf;
use thiserror::Error;

/// A record does not have the food/nutrient shape
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("record {index} is {found}, expected an object")]
    NotAnObject { index: usize, found: &'static str },

    #[error("record {index}: field '{field}' is {found}, expected a list of objects")]
    NestedNotAList {
        index: usize,
        field: String,
        found: &'static str,
    },

    #[error("record {index}: entry {entry} of '{field}' is {found}, expected an object")]
    EntryNotAnObject {
        index: usize,
        entry: usize,
        field: String,
        found: &'static str,
    },

    #[error("record {index} already has a '{field}' field, which is reserved for the generated key")]
    ReservedColumn { index: usize, field: String },
}

/// Retrieving records from the upstream API failed
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("no API key configured. Set api.api_key in the config file or NUTRIMELT__API__API_KEY.")]
    MissingApiKey,

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request for page {page} failed: {source}")]
    Transport {
        page: u32,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream returned an error payload on page {page}: {payload}")]
    ErrorPayload { page: u32, payload: String },

    #[error("upstream returned no records")]
    NoRecords,
}

impl FetchError {
    /// Whether the error should abort the whole fetch rather than one category
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::MissingApiKey | FetchError::Client(_))
    }
}

/// Reading or writing the raw record cache failed
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file {} is not a JSON list of records: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The destination rejected a table
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("invalid table name '{0}': expected letters, digits and underscores")]
    InvalidTableName(String),

    #[error("database error writing table '{table}': {source}")]
    Database {
        table: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to open database {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error writing table '{table}': {source}")]
    Io {
        table: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize a row of table '{table}': {source}")]
    Serialize {
        table: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Configuration is missing or invalid
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration value {key}: {reason}")]
    Invalid { key: &'static str, reason: &'static str },
}

/// Any failure of a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_fetch_errors() {
        assert!(FetchError::MissingApiKey.is_fatal());
        assert!(!FetchError::NoRecords.is_fatal());
        assert!(!FetchError::ErrorPayload {
            page: 3,
            payload: "{}".to_string()
        }
        .is_fatal());
    }

    #[test]
    fn test_shape_error_message_names_record() {
        let err = ShapeError::NestedNotAList {
            index: 4,
            field: "foodNutrients".to_string(),
            found: "a string",
        };
        assert_eq!(
            err.to_string(),
            "record 4: field 'foodNutrients' is a string, expected a list of objects"
        );
    }
}
