//! Wire types exchanged with detection backends.
//!
//! A backend answers with a JSON array of targets, in the order they must be
//! tapped. Field aliases accept the `centerX`/`centerY`/`prob` names emitted
//! by the stock YOLO post-processing script.

use serde::{Deserialize, Serialize};

use crate::error::DetectionError;

/// One object found in a cropped challenge image.
///
/// Offsets are relative to the crop origin, never to the full screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedTarget {
    #[serde(alias = "centerX", alias = "x")]
    pub offset_x: f64,
    #[serde(alias = "centerY", alias = "y")]
    pub offset_y: f64,
    #[serde(alias = "prob")]
    pub confidence: f64,
    #[serde(default)]
    pub label: String,
}

impl DetectedTarget {
    pub fn new(offset_x: f64, offset_y: f64, confidence: f64, label: impl Into<String>) -> Self {
        Self {
            offset_x,
            offset_y,
            confidence,
            label: label.into(),
        }
    }
}

/// Parses a backend answer, keeping the list order.
pub fn parse_targets(raw: &str) -> Result<Vec<DetectedTarget>, DetectionError> {
    let targets: Vec<DetectedTarget> = serde_json::from_str(raw.trim())
        .map_err(|e| DetectionError::Malformed(e.to_string()))?;
    for (index, target) in targets.iter().enumerate() {
        if !(target.offset_x.is_finite() && target.offset_y.is_finite()) {
            return Err(DetectionError::Malformed(format!(
                "target {index} has a non-finite offset"
            )));
        }
        if !(0.0..=1.0).contains(&target.confidence) {
            return Err(DetectionError::Malformed(format!(
                "target {index} confidence {} outside [0, 1]",
                target.confidence
            )));
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yolo_field_names_in_order() {
        let raw = r#"[
            {"centerX": 120.5, "centerY": 88.0, "prob": 0.91, "label": "bell"},
            {"centerX": 40.0, "centerY": 200.0, "prob": 0.77, "label": "cup"}
        ]"#;
        let targets = parse_targets(raw).unwrap();
        assert_eq!(
            targets,
            vec![
                DetectedTarget::new(120.5, 88.0, 0.91, "bell"),
                DetectedTarget::new(40.0, 200.0, 0.77, "cup"),
            ]
        );
    }

    #[test]
    fn empty_array_is_a_valid_answer() {
        assert!(parse_targets("[]\n").unwrap().is_empty());
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let raw = r#"[{"x": 1, "y": 2, "confidence": 1.4}]"#;
        assert!(matches!(parse_targets(raw), Err(DetectionError::Malformed(_))));
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            parse_targets("Traceback (most recent call last)"),
            Err(DetectionError::Malformed(_))
        ));
    }
}
