use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::detection::domain::face_analyzer::{FaceAnalysis, FaceAnalyzer};
use crate::shared::frame::Frame;

type SendError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one analyzed frame, delivered back to the loop thread.
#[derive(Debug)]
pub struct InferenceCompletion {
    pub frame_index: usize,
    pub result: Result<Vec<FaceAnalysis>, SendError>,
    pub elapsed: Duration,
}

/// Runs a [`FaceAnalyzer`] on a dedicated thread so the frame clock never
/// waits on inference.
///
/// Frames are processed in submission order and nothing is ever cancelled.
/// Callers keep at most one frame outstanding.
pub struct InferenceWorker {
    request_tx: Option<Sender<Frame>>,
    completion_rx: Receiver<InferenceCompletion>,
    handle: Option<JoinHandle<()>>,
}

impl InferenceWorker {
    pub fn spawn(analyzer: Box<dyn FaceAnalyzer>) -> Self {
        let (request_tx, request_rx) = crossbeam_channel::unbounded::<Frame>();
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        let handle = spawn_analyzer(analyzer, request_rx, completion_tx);
        Self {
            request_tx: Some(request_tx),
            completion_rx,
            handle: Some(handle),
        }
    }

    pub fn submit(&self, frame: Frame) -> Result<(), SendError> {
        let tx = self
            .request_tx
            .as_ref()
            .ok_or("Inference worker is shut down")?;
        tx.send(frame)
            .map_err(|_| -> SendError { "Inference worker stopped".into() })
    }

    /// Returns a completion if one is ready, without blocking.
    ///
    /// A worker thread that died is reported as a failed completion so the
    /// caller does not wait forever.
    pub fn try_complete(&self) -> Option<InferenceCompletion> {
        match self.completion_rx.try_recv() {
            Ok(completion) => Some(completion),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(stopped_completion()),
        }
    }

    pub fn wait_complete(&self, timeout: Duration) -> Option<InferenceCompletion> {
        match self.completion_rx.recv_timeout(timeout) {
            Ok(completion) => Some(completion),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(stopped_completion()),
        }
    }

    /// Stops accepting frames and waits for the thread to finish its
    /// current frame.
    pub fn shutdown(mut self) {
        self.request_tx = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Inference worker panicked");
            }
        }
    }
}

fn stopped_completion() -> InferenceCompletion {
    InferenceCompletion {
        frame_index: 0,
        result: Err("Inference worker stopped".into()),
        elapsed: Duration::ZERO,
    }
}

fn spawn_analyzer(
    mut analyzer: Box<dyn FaceAnalyzer>,
    request_rx: Receiver<Frame>,
    completion_tx: Sender<InferenceCompletion>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        for frame in request_rx {
            let started = Instant::now();
            let result = analyzer
                .analyze(&frame)
                .map_err(|e| -> SendError { e.to_string().into() });
            let completion = InferenceCompletion {
                frame_index: frame.index(),
                result,
                elapsed: started.elapsed(),
            };
            if completion_tx.send(completion).is_err() {
                break;
            }
        }
    })
}
