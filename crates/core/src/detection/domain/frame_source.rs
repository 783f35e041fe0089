use crate::shared::frame::Frame;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Cannot open video source {input}: {reason}")]
    Open { input: String, reason: String },
    #[error("Video source has no video stream")]
    NoVideoStream,
    #[error("Decoding failed: {0}")]
    Decode(String),
}

/// Whether a source can currently provide frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceReadiness {
    Ready,
    /// Opened but no frame decoded yet.
    Buffering,
    /// End of stream; no further frames will arrive.
    Finished,
    Unavailable(String),
}

impl SourceReadiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, SourceReadiness::Ready)
    }
}

/// A live video feed polled once per clock tick.
pub trait FrameSource {
    fn readiness(&self) -> SourceReadiness;

    /// The newest decoded frame, if any.
    fn latest_frame(&self) -> Option<Frame>;
}
