use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::detection::domain::face_analyzer::{FaceAnalysis, FaceAnalyzer};
use crate::shared::frame::Frame;

/// Replays recorded analyses by frame index instead of running models.
///
/// The recording is a JSON object mapping frame indices to face lists, e.g.
/// `{"0": [{"box": {...}, "descriptor": [...], "age": 31.0, ...}]}`. Frames
/// without an entry have no faces.
pub struct ReplayFaceAnalyzer {
    recording: HashMap<usize, Vec<FaceAnalysis>>,
}

impl ReplayFaceAnalyzer {
    pub fn new(recording: HashMap<usize, Vec<FaceAnalysis>>) -> Self {
        Self { recording }
    }

    pub fn load(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Cannot read recording {}: {e}", path.display()))?;
        let recording = serde_json::from_str(&contents)
            .map_err(|e| format!("Malformed recording {}: {e}", path.display()))?;
        Ok(Self::new(recording))
    }

    pub fn recorded_frames(&self) -> usize {
        self.recording.len()
    }
}

impl FaceAnalyzer for ReplayFaceAnalyzer {
    fn analyze(&mut self, frame: &Frame) -> Result<Vec<FaceAnalysis>, Box<dyn std::error::Error>> {
        Ok(self.recording.get(&frame.index()).cloned().unwrap_or_default())
    }
}
