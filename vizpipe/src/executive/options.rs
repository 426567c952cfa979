use crate::error::PipelineResult;
use crate::time_steps::DEFAULT_TIME_TOLERANCE;

use serde::{Deserialize, Serialize};

/// Tunables for a [Pipeline](crate::Pipeline).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutiveOptions {
    /// Crop produced data down to the requested extent when the request is
    /// marked exact.
    pub crop_exact_extents: bool,
    /// Check input data kinds against the port constraints before
    /// `request_data`.
    pub check_input_kinds: bool,
    /// Clip requested extents to the producer's whole extent.
    pub clip_update_extent: bool,
    /// Relative tolerance for comparing times.
    pub time_tolerance: f64,
}

impl Default for ExecutiveOptions {
    fn default() -> Self {
        Self {
            crop_exact_extents: true,
            check_input_kinds: true,
            clip_update_extent: true,
            time_tolerance: DEFAULT_TIME_TOLERANCE,
        }
    }
}

impl ExecutiveOptions {
    pub fn from_json(json: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let options = ExecutiveOptions::from_json(r#"{"crop_exact_extents": false}"#).unwrap();
        assert!(!options.crop_exact_extents);
        assert!(options.check_input_kinds);
        assert_eq!(options.time_tolerance, DEFAULT_TIME_TOLERANCE);
    }

    #[test]
    fn malformed_options_are_errors() {
        assert!(ExecutiveOptions::from_json("{ not json").is_err());
    }
}
