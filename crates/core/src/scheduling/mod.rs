pub mod detection_scheduler;
pub mod frame_clock;
pub mod loop_logger;
