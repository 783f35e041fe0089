pub mod face_analyzer;
pub mod frame_source;
pub mod overlay;
