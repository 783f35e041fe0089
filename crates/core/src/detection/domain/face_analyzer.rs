use serde::{Deserialize, Serialize};

use crate::recognition::domain::identity::Descriptor;
use crate::shared::frame::Frame;

/// Axis-aligned face box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn from_corners(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0.0),
            height: (y2 - y1).max(0.0),
        }
    }

    /// Clamps the box to a `width` x `height` frame.
    pub fn clamped(self, width: u32, height: u32) -> Self {
        let x1 = self.x.clamp(0.0, width as f64);
        let y1 = self.y.clamp(0.0, height as f64);
        let x2 = (self.x + self.width).clamp(0.0, width as f64);
        let y2 = (self.y + self.height).clamp(0.0, height as f64);
        Self::from_corners(x1, y1, x2, y2)
    }

    pub fn is_empty(&self) -> bool {
        self.width < 1.0 || self.height < 1.0
    }
}

/// Everything the analyzer reports about one detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceAnalysis {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub descriptor: Descriptor,
    pub age: f32,
    pub gender: String,
    pub gender_probability: f32,
}

/// Locates faces in a frame and describes each one.
///
/// Implementations may be slow and may fail; callers run them off the frame
/// clock's thread.
pub trait FaceAnalyzer: Send {
    fn analyze(&mut self, frame: &Frame) -> Result<Vec<FaceAnalysis>, Box<dyn std::error::Error>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_from_corners_computes_size() {
        let b = BoundingBox::from_corners(10.0, 20.0, 50.0, 80.0);
        assert_relative_eq!(b.width, 40.0);
        assert_relative_eq!(b.height, 60.0);
    }

    #[test]
    fn test_clamped_trims_to_frame() {
        let b = BoundingBox {
            x: -10.0,
            y: 90.0,
            width: 40.0,
            height: 40.0,
        }
        .clamped(100, 100);
        assert_eq!(
            b,
            BoundingBox {
                x: 0.0,
                y: 90.0,
                width: 30.0,
                height: 10.0
            }
        );
    }

    #[test]
    fn test_box_fully_outside_is_empty() {
        let b = BoundingBox::from_corners(120.0, 0.0, 150.0, 30.0).clamped(100, 100);
        assert!(b.is_empty());
    }

    #[test]
    fn test_analysis_wire_format() {
        let json = r#"{
            "box": {"x": 1.0, "y": 2.0, "width": 3.0, "height": 4.0},
            "descriptor": [0.1, 0.2],
            "age": 31.4,
            "gender": "male",
            "genderProbability": 0.93
        }"#;
        let analysis: FaceAnalysis = serde_json::from_str(json).unwrap();
        assert_eq!(analysis.descriptor, vec![0.1, 0.2]);
        assert_eq!(analysis.gender, "male");
        assert_relative_eq!(analysis.gender_probability, 0.93);
        assert_relative_eq!(analysis.bbox.height, 4.0);
    }
}
