//! Priority class of a persisted bundle

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// Determines where a bundle is stored and when the sender sees it.
///
/// Every `HighPriority` bundle is offered before any `Regular` bundle.
/// `FakeCrash` bundles are staged out of band and never offered through
/// `next_path`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceType {
    HighPriority,
    Regular,
    FakeCrash,
}

impl PersistenceType {
    /// All persistence types, in send order.
    pub const ALL: [PersistenceType; 3] = [
        PersistenceType::HighPriority,
        PersistenceType::Regular,
        PersistenceType::FakeCrash,
    ];

    /// Types the sender may pick up, highest priority first.
    pub const SENDABLE: [PersistenceType; 2] =
        [PersistenceType::HighPriority, PersistenceType::Regular];

    /// Name of the directory segment holding bundles of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistenceType::HighPriority => "high_priority",
            PersistenceType::Regular => "regular",
            PersistenceType::FakeCrash => "fake_crash",
        }
    }

    /// Whether a successful save publishes a delivery-readiness event.
    pub fn notifies_sender(&self) -> bool {
        !matches!(self, PersistenceType::FakeCrash)
    }
}

impl fmt::Display for PersistenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersistenceType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high_priority" => Ok(PersistenceType::HighPriority),
            "regular" => Ok(PersistenceType::Regular),
            "fake_crash" => Ok(PersistenceType::FakeCrash),
            other => Err(DomainError::InvalidPersistenceType(other.to_string())),
        }
    }
}
