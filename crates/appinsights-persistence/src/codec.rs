//! Versioned bundle encoding
//!
//! A bundle file is a JSON document:
//!
//! ```json
//! { "schema_version": 1, "items": [ <TelemetryItem>, ... ] }
//! ```
//!
//! Items keep their order. The version header is checked before the items
//! are parsed so a file written by a newer schema is reported as
//! unsupported rather than as garbage. A zero-length or truncated file is a
//! decode error, which keeps it distinct from a legitimately empty bundle.

use appinsights_core::domain::TelemetryItem;
use serde::{Deserialize, Serialize};

use crate::error::{PersistenceError, Result};

/// Current bundle schema version.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize)]
struct BundleFileRef<'a> {
    schema_version: u32,
    items: &'a [TelemetryItem],
}

#[derive(Deserialize)]
struct BundleHeader {
    schema_version: u32,
}

#[derive(Deserialize)]
struct BundleFile {
    items: Vec<TelemetryItem>,
}

/// Serializes `items` into the on-disk bundle form.
///
/// Items that could not be decoded again (non-finite numbers) fail the
/// whole bundle before anything is written.
pub fn encode(items: &[TelemetryItem]) -> Result<Vec<u8>> {
    for (index, item) in items.iter().enumerate() {
        item.validate()
            .map_err(|e| PersistenceError::Encode(format!("item {index}: {e}")))?;
    }
    serde_json::to_vec(&BundleFileRef {
        schema_version: SCHEMA_VERSION,
        items,
    })
    .map_err(|e| PersistenceError::Encode(e.to_string()))
}

/// Parses a bundle file back into its ordered items.
pub fn decode(bytes: &[u8]) -> Result<Vec<TelemetryItem>> {
    let header: BundleHeader =
        serde_json::from_slice(bytes).map_err(|e| PersistenceError::Decode(e.to_string()))?;
    if header.schema_version != SCHEMA_VERSION {
        return Err(PersistenceError::UnsupportedVersion {
            found: header.schema_version,
            expected: SCHEMA_VERSION,
        });
    }

    let file: BundleFile =
        serde_json::from_slice(bytes).map_err(|e| PersistenceError::Decode(e.to_string()))?;
    Ok(file.items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use appinsights_core::domain::TelemetryData;

    fn items() -> Vec<TelemetryItem> {
        vec![
            TelemetryItem::new(TelemetryData::event("first")),
            TelemetryItem::new(TelemetryData::event("second")),
            TelemetryItem::new(TelemetryData::message("third", None)),
        ]
    }

    #[test]
    fn test_round_trip_preserves_order() {
        let original = items();
        let bytes = encode(&original).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_header_written() {
        let bytes = encode(&items()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["schema_version"], SCHEMA_VERSION);
        assert_eq!(value["items"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_non_finite_measurement_is_rejected() {
        let mut event = TelemetryData::event("render");
        if let TelemetryData::Event(data) = &mut event {
            data.measurements.insert("ratio".to_string(), f64::NAN);
        }
        let mut bundle = items();
        bundle.push(TelemetryItem::new(event));

        let err = encode(&bundle).unwrap_err();
        assert!(matches!(err, PersistenceError::Encode(ref msg) if msg.starts_with("item 3")));
    }

    #[test]
    fn test_empty_bundle_is_not_corrupt() {
        let bytes = encode(&[]).unwrap();
        assert!(decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_zero_length_file_is_corrupt() {
        let err = decode(b"").unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let bytes = encode(&items()).unwrap();
        let err = decode(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, PersistenceError::Decode(_)));
    }

    #[test]
    fn test_future_version_is_unsupported() {
        let err = decode(br#"{"schema_version": 2, "items": [{"whatever": true}]}"#).unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::UnsupportedVersion { found: 2, expected: 1 }
        ));
    }
}
