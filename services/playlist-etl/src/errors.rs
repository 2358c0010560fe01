//!
//! src/errors.rs
//!
//! Defines enums and methods of error conversion
//! for errors the pipeline uses
//!
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("config error: {0}")]
    Config(String),
    #[error("authentication error: {0}")]
    Authentication(String),
    #[error("fetch error: status {status}: {body}")]
    Fetch { status: u16, body: String },
    #[error("http error: {0}")]
    Http(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("export error: {0}")]
    Export(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl From<reqwest::Error> for EtlError {
    fn from(e: reqwest::Error) -> Self { EtlError::Http(e.to_string()) }
}

impl From<serde_json::Error> for EtlError {
    fn from(e: serde_json::Error) -> Self { EtlError::Parse(e.to_string()) }
}

impl From<sqlx::Error> for EtlError {
    fn from(e: sqlx::Error) -> Self { EtlError::Storage(e.to_string()) }
}

impl From<csv::Error> for EtlError {
    fn from(e: csv::Error) -> Self { EtlError::Export(e.to_string()) }
}
