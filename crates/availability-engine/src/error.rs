//! Error types for availability-engine operations.

use chrono::{DateTime, FixedOffset};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid range: start {start} is not before end {end}")]
    InvalidRange {
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    },

    #[error("Invalid working-hours policy: {0}")]
    InvalidPolicy(String),

    #[error("Invalid interval: start {start} is not before end {end}")]
    InvalidInterval {
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;
