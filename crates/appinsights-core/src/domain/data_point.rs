//! Metric data points
//!
//! A `DataPoint` is either a single measurement or a pre-aggregated
//! series (count/min/max/standard deviation) collected on the client.

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

/// How a data point's value was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataPointType {
    /// A single observed value
    Measurement,
    /// A value aggregated from several observations
    Aggregation,
}

/// A named metric value with optional aggregate statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    name: String,
    kind: DataPointType,
    value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    std_dev: Option<f64>,
}

impl DataPoint {
    /// Creates a single measurement.
    ///
    /// Non-finite values are rejected because they have no durable
    /// representation in a persisted bundle.
    pub fn measurement(name: impl Into<String>, value: f64) -> Result<Self, DomainError> {
        let name = name.into();
        validate_name(&name)?;
        validate_finite("value", value)?;
        Ok(Self {
            name,
            kind: DataPointType::Measurement,
            value,
            count: None,
            min: None,
            max: None,
            std_dev: None,
        })
    }

    /// Creates an aggregated data point.
    pub fn aggregation(
        name: impl Into<String>,
        value: f64,
        count: u32,
        min: f64,
        max: f64,
        std_dev: f64,
    ) -> Result<Self, DomainError> {
        let name = name.into();
        validate_name(&name)?;
        for (field, v) in [("value", value), ("min", min), ("max", max), ("std_dev", std_dev)] {
            validate_finite(field, v)?;
        }
        if count == 0 {
            return Err(DomainError::InvalidDataPoint(format!(
                "{name}: aggregation count must be greater than 0"
            )));
        }
        if min > max {
            return Err(DomainError::InvalidDataPoint(format!(
                "{name}: min ({min}) exceeds max ({max})"
            )));
        }
        if std_dev < 0.0 {
            return Err(DomainError::InvalidDataPoint(format!(
                "{name}: std_dev must not be negative"
            )));
        }
        Ok(Self {
            name,
            kind: DataPointType::Aggregation,
            value,
            count: Some(count),
            min: Some(min),
            max: Some(max),
            std_dev: Some(std_dev),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DataPointType {
        self.kind
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn count(&self) -> Option<u32> {
        self.count
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.std_dev
    }
}

fn validate_name(name: &str) -> Result<(), DomainError> {
    if name.trim().is_empty() {
        return Err(DomainError::InvalidDataPoint("name must not be empty".into()));
    }
    Ok(())
}

fn validate_finite(field: &str, value: f64) -> Result<(), DomainError> {
    if !value.is_finite() {
        return Err(DomainError::InvalidDataPoint(format!(
            "{field} must be finite, got {value}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement() {
        let point = DataPoint::measurement("latency_ms", 12.5).unwrap();
        assert_eq!(point.kind(), DataPointType::Measurement);
        assert_eq!(point.value(), 12.5);
        assert!(point.count().is_none());
    }

    #[test]
    fn test_aggregation() {
        let point = DataPoint::aggregation("latency_ms", 10.0, 4, 2.0, 30.0, 1.5).unwrap();
        assert_eq!(point.kind(), DataPointType::Aggregation);
        assert_eq!(point.count(), Some(4));
        assert_eq!(point.min(), Some(2.0));
        assert_eq!(point.max(), Some(30.0));
    }

    #[test]
    fn test_rejects_non_finite() {
        assert!(DataPoint::measurement("x", f64::NAN).is_err());
        assert!(DataPoint::measurement("x", f64::INFINITY).is_err());
        assert!(DataPoint::aggregation("x", 1.0, 1, f64::NEG_INFINITY, 1.0, 0.0).is_err());
    }

    #[test]
    fn test_rejects_inconsistent_aggregation() {
        assert!(DataPoint::aggregation("x", 1.0, 0, 0.0, 1.0, 0.0).is_err());
        assert!(DataPoint::aggregation("x", 1.0, 2, 5.0, 1.0, 0.0).is_err());
        assert!(DataPoint::aggregation("x", 1.0, 2, 0.0, 1.0, -1.0).is_err());
    }

    #[test]
    fn test_rejects_empty_name() {
        assert!(DataPoint::measurement("  ", 1.0).is_err());
    }

    #[test]
    fn test_measurement_omits_statistics_in_json() {
        let point = DataPoint::measurement("x", 1.0).unwrap();
        let json = serde_json::to_value(&point).unwrap();
        assert!(json.get("count").is_none());
        assert_eq!(json["kind"], "measurement");
    }
}
