use std::time::Duration;

use crate::shared::model_resolver::ModelSpec;

/// Euclidean distance below which a probe counts as a known identity.
/// Calibrated for 128-d descriptors.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.55;

/// Threshold for L2-normalized 512-d ArcFace descriptors; a distance of 1.1
/// is a cosine similarity of about 0.4.
pub const ARCFACE_MATCH_THRESHOLD: f64 = 1.1;

/// Minimum spacing between two registration attempts.
pub const DEFAULT_REGISTRATION_COOLDOWN: Duration = Duration::from_millis(3000);

/// Minimum spacing between two inference dispatches.
pub const DEFAULT_DETECTION_INTERVAL: Duration = Duration::from_millis(200);

/// Observations older than this no longer count toward the scene verdict.
pub const DEFAULT_WINDOW_HORIZON: Duration = Duration::from_millis(2000);

/// Share of the window a category needs to be reported as dominant.
pub const DEFAULT_DOMINANCE_PERCENT: f64 = 50.0;

/// Display refresh rate driving the frame clock.
pub const DEFAULT_FRAME_RATE_HZ: u32 = 60;

/// Well-known name listeners use to find the published scene verdict.
pub const DOMINANT_CATEGORY_CHANNEL: &str = "dominantAgeCategory";

pub const FACE_MODEL: ModelSpec = ModelSpec {
    name: "yolo11n-pose_widerface.onnx",
    url: "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/yolo11n-pose_widerface.onnx",
    recommended_threshold: None,
};

pub const DESCRIPTOR_MODEL: ModelSpec = ModelSpec {
    name: "w600k_r50.onnx",
    url: "https://github.com/neutrinographics/faceguard/releases/download/v0.1.0/w600k_r50.onnx",
    recommended_threshold: Some(ARCFACE_MATCH_THRESHOLD),
};

pub const GENDER_AGE_MODEL: ModelSpec = ModelSpec {
    name: "genderage.onnx",
    url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/genderage.onnx",
    recommended_threshold: None,
};
