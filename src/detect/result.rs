use serde::{Deserialize, Serialize};

use super::backend::RawOutput;
use crate::error::PipelineError;
use crate::labels::LabelTable;

/// Values per detection row: x, y, w, h, confidence, class id.
pub const DETECTION_ROW_LEN: usize = 6;

/// Structured result for the top detection of one frame.
///
/// `bbox` holds the first four row values exactly as the model emitted them
/// (model space). Conversion to pixel corners happens at the log boundary,
/// see `BoxConvention`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub class_id: i64,
    pub label: String,
    pub confidence: f64,
    pub bbox: [f32; 4],
}

/// Build a record from row 0 of the detector's first output.
///
/// Only the first row is considered. There is no confidence threshold and
/// no non-max suppression; the model's own ordering decides which object is
/// reported.
pub fn extract(output: &RawOutput, labels: &LabelTable) -> Result<DetectionRecord, PipelineError> {
    let row = output.first_row().ok_or_else(|| {
        PipelineError::Inference(format!("output tensor {:?} has no detection rows", output.shape))
    })?;
    if row.len() < DETECTION_ROW_LEN {
        return Err(PipelineError::Inference(format!(
            "detection row has {} values, expected at least {}",
            row.len(),
            DETECTION_ROW_LEN
        )));
    }
    if row[..DETECTION_ROW_LEN].iter().any(|v| !v.is_finite()) {
        return Err(PipelineError::Inference(
            "detection row contains non-finite values".into(),
        ));
    }

    let (x, y, w, h, confidence, class) = (row[0], row[1], row[2], row[3], row[4], row[5]);
    let class_id = class as i64;
    let label = labels
        .get(class_id)
        .ok_or(PipelineError::LabelLookup {
            class_id,
            len: labels.len(),
        })?
        .to_string();

    Ok(DetectionRecord {
        class_id,
        label,
        confidence: round3(confidence as f64),
        bbox: [x, y, w, h],
    })
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// How the four model-space bbox values are laid out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoxLayout {
    /// `(center_x, center_y, width, height)`
    #[default]
    CenterSize,
    /// `(x1, y1, x2, y2)`
    Corners,
}

/// Conversion from model-space bbox values to integer pixel corners.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxConvention {
    pub layout: BoxLayout,
    pub scale_x: f64,
    pub scale_y: f64,
}

impl Default for BoxConvention {
    /// Normalized center/size boxes in a 640x640 model input.
    fn default() -> Self {
        Self {
            layout: BoxLayout::CenterSize,
            scale_x: 640.0,
            scale_y: 640.0,
        }
    }
}

impl BoxConvention {
    /// Returns `(x1, y1, x2, y2)` in pixels, rounded to the nearest integer.
    pub fn to_corners(&self, bbox: [f32; 4]) -> [i64; 4] {
        let [a, b, c, d] = bbox.map(f64::from);
        let (x1, y1, x2, y2) = match self.layout {
            BoxLayout::CenterSize => (a - c / 2.0, b - d / 2.0, a + c / 2.0, b + d / 2.0),
            BoxLayout::Corners => (a, b, c, d),
        };
        [
            (x1 * self.scale_x).round() as i64,
            (y1 * self.scale_y).round() as i64,
            (x2 * self.scale_x).round() as i64,
            (y2 * self.scale_y).round() as i64,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelTable {
        LabelTable::parse("person\ncar\ndog\n")
    }

    fn output(row: [f32; 6]) -> RawOutput {
        RawOutput {
            shape: vec![1, 1, 6],
            data: row.to_vec(),
        }
    }

    #[test]
    fn extracts_first_row_with_label() {
        let record = extract(&output([0.5, 0.5, 0.2, 0.3, 0.91, 1.0]), &labels()).unwrap();
        assert_eq!(record.class_id, 1);
        assert_eq!(record.label, "car");
        assert_eq!(record.confidence, 0.91);
        assert_eq!(record.bbox, [0.5, 0.5, 0.2, 0.3]);
    }

    #[test]
    fn later_rows_are_ignored() {
        let out = RawOutput {
            shape: vec![1, 2, 6],
            data: vec![0.1, 0.1, 0.1, 0.1, 0.2, 2.0, 0.9, 0.9, 0.9, 0.9, 0.99, 0.0],
        };
        let record = extract(&out, &labels()).unwrap();
        assert_eq!(record.label, "dog");
        assert_eq!(record.confidence, 0.2);
    }

    #[test]
    fn confidence_is_rounded_to_three_decimals() {
        let record = extract(&output([0.0, 0.0, 0.0, 0.0, 0.876_54, 0.0]), &labels()).unwrap();
        assert_eq!(record.confidence, 0.877);
    }

    #[test]
    fn unknown_class_is_a_lookup_error() {
        let err = extract(&output([0.0, 0.0, 0.0, 0.0, 0.5, 3.0]), &labels()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::LabelLookup {
                class_id: 3,
                len: 3
            }
        ));

        let err = extract(&output([0.0, 0.0, 0.0, 0.0, 0.5, -1.0]), &labels()).unwrap_err();
        assert!(matches!(err, PipelineError::LabelLookup { .. }));
    }

    #[test]
    fn short_rows_are_inference_errors() {
        let out = RawOutput {
            shape: vec![1, 1, 4],
            data: vec![0.0; 4],
        };
        assert!(matches!(
            extract(&out, &labels()).unwrap_err(),
            PipelineError::Inference(_)
        ));
    }

    #[test]
    fn center_size_boxes_convert_to_corners() {
        let convention = BoxConvention::default();
        assert_eq!(convention.to_corners([0.5, 0.5, 0.25, 0.5]), [240, 160, 400, 480]);
    }

    #[test]
    fn corner_boxes_are_only_scaled() {
        let convention = BoxConvention {
            layout: BoxLayout::Corners,
            scale_x: 1.0,
            scale_y: 1.0,
        };
        assert_eq!(convention.to_corners([10.4, 20.6, 30.0, 40.0]), [10, 21, 30, 40]);
    }

    #[test]
    fn layout_names_come_from_serde() {
        let layout: BoxLayout = serde_json::from_str(r#""center_size""#).unwrap();
        assert_eq!(layout, BoxLayout::CenterSize);
        assert!(serde_json::from_str::<BoxLayout>(r#""xyxy""#).is_err());
    }
}
