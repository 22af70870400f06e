//! Domain error types
//!
//! Errors raised while constructing or parsing domain values. None of
//! these cross the persistence boundary; they surface only to producers
//! that build invalid telemetry.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A data point violates the metric contract
    #[error("Invalid data point: {0}")]
    InvalidDataPoint(String),

    /// Unknown persistence type name
    #[error("Invalid persistence type: {0}")]
    InvalidPersistenceType(String),

    /// A numeric field holds NaN or an infinity
    #[error("Non-finite value: {0}")]
    NonFiniteValue(String),
}
