use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::detection::domain::frame_source::{FrameSource, SourceError, SourceReadiness};
use crate::shared::frame::Frame;

/// Live frame feed decoded by ffmpeg on a background thread.
///
/// Only the newest frame is kept; a slow consumer skips frames rather than
/// queueing them. File inputs are paced at the stream's native frame rate so
/// they behave like a camera.
pub struct FfmpegFrameSource {
    state: Arc<Mutex<SourceState>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

struct SourceState {
    readiness: SourceReadiness,
    latest: Option<Frame>,
}

impl FfmpegFrameSource {
    /// Starts decoding `input`, a file path or a device name. `format` names
    /// an ffmpeg input device such as `v4l2` or `avfoundation`.
    ///
    /// Failure to open is reported through [`FrameSource::readiness`].
    pub fn open(input: &str, format: Option<&str>) -> Self {
        let state = Arc::new(Mutex::new(SourceState {
            readiness: SourceReadiness::Buffering,
            latest: None,
        }));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = spawn_decoder(
            input.to_string(),
            format.map(str::to_string),
            state.clone(),
            stop.clone(),
        );
        Self {
            state,
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("Video decoder thread panicked");
            }
        }
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

impl FrameSource for FfmpegFrameSource {
    fn readiness(&self) -> SourceReadiness {
        match self.state.lock() {
            Ok(state) => state.readiness.clone(),
            Err(_) => SourceReadiness::Unavailable("Video decoder crashed".into()),
        }
    }

    fn latest_frame(&self) -> Option<Frame> {
        self.state.lock().ok()?.latest.clone()
    }
}

fn spawn_decoder(
    input: String,
    format: Option<String>,
    state: Arc<Mutex<SourceState>>,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let publish = |readiness: SourceReadiness, frame: Option<Frame>| {
            if let Ok(mut s) = state.lock() {
                s.readiness = readiness;
                if frame.is_some() {
                    s.latest = frame;
                }
            }
        };

        let mut decoder = match LiveDecoder::open(&input, format.as_deref()) {
            Ok(decoder) => decoder,
            Err(e) => {
                log::warn!("{e}");
                publish(SourceReadiness::Unavailable(e.to_string()), None);
                return;
            }
        };
        log::info!(
            "Opened {input}: {}x{} @ {:.2} fps",
            decoder.width,
            decoder.height,
            decoder.fps
        );

        let started = Instant::now();
        while !stop.load(Ordering::Relaxed) {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    let due = frame_due(started, frame.index(), decoder.fps);
                    let wait = due.saturating_duration_since(Instant::now());
                    if !wait.is_zero() {
                        std::thread::sleep(wait);
                    }
                    publish(SourceReadiness::Ready, Some(frame));
                }
                Ok(None) => {
                    log::info!("End of stream for {input}");
                    publish(SourceReadiness::Finished, None);
                    return;
                }
                Err(e) => {
                    log::warn!("{e}");
                    publish(SourceReadiness::Unavailable(e.to_string()), None);
                    return;
                }
            }
        }
    })
}

/// When frame `index` should be shown, counted from `started`.
fn frame_due(started: Instant, index: usize, fps: f64) -> Instant {
    if fps <= 0.0 || !fps.is_finite() {
        return started;
    }
    started + Duration::from_secs_f64(index as f64 / fps)
}

/// Owns the demuxer, decoder and RGB scaler for one input.
struct LiveDecoder {
    input: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    stream_index: usize,
    width: u32,
    height: u32,
    fps: f64,
    frame_index: usize,
    eof_sent: bool,
}

impl LiveDecoder {
    fn open(input: &str, format: Option<&str>) -> Result<Self, SourceError> {
        let open_err = |reason: String| SourceError::Open {
            input: input.to_string(),
            reason,
        };
        ffmpeg_next::init().map_err(|e| open_err(e.to_string()))?;

        let ictx = match format {
            Some(name) => {
                ffmpeg_next::device::register_all();
                let device = ffmpeg_next::device::input::video()
                    .find(|f| f.name() == name)
                    .ok_or_else(|| open_err(format!("unknown input device format '{name}'")))?;
                ffmpeg_next::format::open_with(
                    &Path::new(input),
                    &ffmpeg_next::Format::Input(device),
                    ffmpeg_next::Dictionary::new(),
                )
                .map_err(|e| open_err(e.to_string()))?
                .input()
            }
            None => ffmpeg_next::format::input(&Path::new(input))
                .map_err(|e| open_err(e.to_string()))?,
        };

        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or(SourceError::NoVideoStream)?;
        let stream_index = stream.index();
        let rate = stream.rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };
        let decoder = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| SourceError::Decode(e.to_string()))?;

        let width = decoder.width();
        let height = decoder.height();
        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| SourceError::Decode(e.to_string()))?;

        Ok(Self {
            input: ictx,
            decoder,
            scaler,
            stream_index,
            width,
            height,
            fps,
            frame_index: 0,
            eof_sent: false,
        })
    }

    /// Decodes the next frame, or `None` once the stream is drained.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        loop {
            if let Some(frame) = self.receive()? {
                return Ok(Some(frame));
            }
            if self.eof_sent {
                return Ok(None);
            }
            match self.input.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() != self.stream_index {
                        continue;
                    }
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        log::debug!("Skipping undecodable packet: {e}");
                    }
                }
                None => {
                    let _ = self.decoder.send_eof();
                    self.eof_sent = true;
                }
            }
        }
    }

    fn receive(&mut self) -> Result<Option<Frame>, SourceError> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb = ffmpeg_next::util::frame::video::Video::empty();
        self.scaler
            .run(&decoded, &mut rgb)
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        let pixels = packed_rgb(&rgb, self.width, self.height);
        let frame = Frame::new(pixels, self.width, self.height, self.frame_index);
        self.frame_index += 1;
        Ok(Some(frame))
    }
}

/// Strips row padding from an RGB24 ffmpeg frame.
fn packed_rgb(rgb: &ffmpeg_next::util::frame::video::Video, width: u32, height: u32) -> Vec<u8> {
    let stride = rgb.stride(0);
    let data = rgb.data(0);
    let row_bytes = width as usize * Frame::CHANNELS;
    (0..height as usize)
        .flat_map(|row| &data[row * stride..row * stride + row_bytes])
        .copied()
        .collect()
}
