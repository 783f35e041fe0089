pub mod ffmpeg_frame_source;
pub mod inference_worker;
pub mod log_overlay_renderer;
pub mod onnx_face_analyzer;
pub mod replay_face_analyzer;
