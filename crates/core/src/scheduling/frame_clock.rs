use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::detection::domain::frame_source::{FrameSource, SourceReadiness};
use crate::detection::domain::overlay::OverlayRenderer;
use crate::scheduling::detection_scheduler::DetectionScheduler;

/// How long shutdown waits for the last batch and for registrations.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Fixed-rate tick source standing in for a display refresh callback.
///
/// The clock re-arms once per [`wait`](Self::wait). An overrun skips the
/// missed ticks instead of firing them back to back.
pub struct FrameClock {
    period: Duration,
    next: Option<Instant>,
}

impl FrameClock {
    pub fn new(rate_hz: u32) -> Self {
        Self::from_period(Duration::from_secs_f64(1.0 / rate_hz.max(1) as f64))
    }

    pub fn from_period(period: Duration) -> Self {
        Self { period, next: None }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Sleeps until the next tick and returns its instant.
    pub fn wait(&mut self) -> Instant {
        if let Some(next) = self.next {
            let remaining = next.saturating_duration_since(Instant::now());
            if !remaining.is_zero() {
                std::thread::sleep(remaining);
            }
        }
        let now = Instant::now();
        self.next = Some(self.next_deadline(now));
        now
    }

    fn next_deadline(&self, now: Instant) -> Instant {
        match self.next {
            Some(scheduled) if scheduled + self.period > now => scheduled + self.period,
            _ => now + self.period,
        }
    }
}

/// Why [`run_loop`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    SourceFinished,
    Stopped,
    DeadlineReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopReport {
    pub exit: LoopExit,
    pub ticks: usize,
    pub batches: usize,
}

/// Ticks `scheduler` from `clock` until the source finishes, `stop` is set,
/// or `deadline` passes. Then applies the batch still in flight and waits
/// for background registrations.
pub fn run_loop(
    scheduler: &mut DetectionScheduler,
    source: &dyn FrameSource,
    overlay: &mut dyn OverlayRenderer,
    clock: &mut FrameClock,
    stop: &AtomicBool,
    deadline: Option<Instant>,
) -> LoopReport {
    let mut ticks = 0;
    let mut batches = 0;

    let exit = loop {
        let now = clock.wait();
        if stop.load(Ordering::Relaxed) {
            break LoopExit::Stopped;
        }
        if deadline.is_some_and(|d| now >= d) {
            break LoopExit::DeadlineReached;
        }

        let outcome = scheduler.tick(now, source, overlay);
        ticks += 1;
        batches += outcome.batches_applied;

        if source.readiness() == SourceReadiness::Finished {
            break LoopExit::SourceFinished;
        }
    };

    if scheduler.await_inference(SHUTDOWN_GRACE) {
        batches += 1;
    }
    scheduler.settle_registrations(SHUTDOWN_GRACE);
    log::info!("Detection loop ended ({exit:?}) after {ticks} ticks, {batches} batches");

    LoopReport {
        exit,
        ticks,
        batches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Arc;

    use crate::demographics::domain::category_aggregator::CategoryAggregator;
    use crate::demographics::domain::category_publisher::{CategoryPublisher, CategoryUpdate};
    use crate::detection::domain::face_analyzer::{FaceAnalysis, FaceAnalyzer};
    use crate::detection::domain::overlay::CachedBox;
    use crate::recognition::domain::descriptor_matcher::DescriptorMatcher;
    use crate::recognition::domain::identity::{Descriptor, Identity};
    use crate::recognition::domain::identity_store::{IdentityStore, SaveReceipt, StoreError};
    use crate::recognition::domain::registration_coordinator::RegistrationCoordinator;
    use crate::scheduling::detection_scheduler::SchedulerPhase;
    use crate::shared::frame::Frame;

    struct NoFaces;

    impl FaceAnalyzer for NoFaces {
        fn analyze(&mut self, _: &Frame) -> Result<Vec<FaceAnalysis>, Box<dyn std::error::Error>> {
            Ok(Vec::new())
        }
    }

    struct EmptyStore;

    impl IdentityStore for EmptyStore {
        fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
            Ok(Vec::new())
        }

        fn allocate_identity(&self) -> Result<String, StoreError> {
            Ok("user1".into())
        }

        fn append_descriptor(&self, _: &str, _: &Descriptor) -> Result<SaveReceipt, StoreError> {
            Ok(SaveReceipt {
                ok: true,
                total_identity_count: 1,
            })
        }
    }

    struct Discard;

    impl CategoryPublisher for Discard {
        fn publish(&mut self, _: &CategoryUpdate) {}
    }

    struct NoOverlay;

    impl OverlayRenderer for NoOverlay {
        fn clear(&mut self) {}
        fn draw(&mut self, _: &[CachedBox]) {}
    }

    /// Ready for a fixed number of readiness checks, then finished.
    struct ShortSource {
        remaining: Cell<usize>,
    }

    impl FrameSource for ShortSource {
        fn readiness(&self) -> SourceReadiness {
            let left = self.remaining.get();
            if left == 0 {
                return SourceReadiness::Finished;
            }
            self.remaining.set(left - 1);
            SourceReadiness::Ready
        }

        fn latest_frame(&self) -> Option<Frame> {
            Some(Frame::new(vec![0u8; 2 * 2 * 3], 2, 2, 0))
        }
    }

    fn scheduler() -> DetectionScheduler {
        DetectionScheduler::new(
            Box::new(NoFaces),
            DescriptorMatcher::default(),
            RegistrationCoordinator::new(Arc::new(EmptyStore), Duration::from_secs(3)),
            CategoryAggregator::default(),
            Box::new(Discard),
            Duration::ZERO,
        )
    }

    #[test]
    fn test_clock_period_from_rate() {
        assert_eq!(FrameClock::new(50).period(), Duration::from_millis(20));
        assert_eq!(FrameClock::new(0).period(), Duration::from_secs(1));
    }

    #[test]
    fn test_clock_paces_ticks() {
        let mut clock = FrameClock::from_period(Duration::from_millis(10));
        let first = clock.wait();
        clock.wait();
        let third = clock.wait();
        assert!(third.duration_since(first) >= Duration::from_millis(20));
    }

    #[test]
    fn test_clock_skips_missed_ticks_after_overrun() {
        let mut clock = FrameClock::from_period(Duration::from_millis(5));
        clock.wait();
        std::thread::sleep(Duration::from_millis(30));
        let late = clock.wait();
        let next = clock.wait();
        assert!(next.duration_since(late) >= Duration::from_millis(4));
    }

    #[test]
    fn test_run_loop_stops_when_source_finishes() {
        let mut scheduler = scheduler();
        // Readiness is checked twice per tick, so three ticks see Ready and
        // the fourth sees Finished.
        let source = ShortSource {
            remaining: Cell::new(6),
        };
        let mut clock = FrameClock::from_period(Duration::from_millis(1));

        let report = run_loop(
            &mut scheduler,
            &source,
            &mut NoOverlay,
            &mut clock,
            &AtomicBool::new(false),
            None,
        );

        assert_eq!(report.exit, LoopExit::SourceFinished);
        assert_eq!(report.ticks, 4);
        assert!(report.batches >= 1);
    }

    #[test]
    fn test_run_loop_honours_stop_flag() {
        let mut scheduler = scheduler();
        let source = ShortSource {
            remaining: Cell::new(usize::MAX),
        };

        let report = run_loop(
            &mut scheduler,
            &source,
            &mut NoOverlay,
            &mut FrameClock::new(60),
            &AtomicBool::new(true),
            None,
        );

        assert_eq!(report.exit, LoopExit::Stopped);
        assert_eq!(report.ticks, 0);
    }

    #[test]
    fn test_stop_raised_from_another_thread_drains_work() {
        let mut scheduler = scheduler();
        let source = ShortSource {
            remaining: Cell::new(usize::MAX),
        };
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let signaller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            flag.store(true, Ordering::SeqCst);
        });

        let report = run_loop(
            &mut scheduler,
            &source,
            &mut NoOverlay,
            &mut FrameClock::from_period(Duration::from_millis(2)),
            &stop,
            None,
        );
        signaller.join().unwrap();

        assert_eq!(report.exit, LoopExit::Stopped);
        assert!(report.ticks > 0);
        assert_eq!(scheduler.phase(), SchedulerPhase::Idle);
        assert_eq!(scheduler.coordinator().pending_tasks(), 0);
    }

    #[test]
    fn test_run_loop_honours_deadline() {
        let mut scheduler = scheduler();
        let source = ShortSource {
            remaining: Cell::new(usize::MAX),
        };
        let deadline = Instant::now() + Duration::from_millis(30);

        let report = run_loop(
            &mut scheduler,
            &source,
            &mut NoOverlay,
            &mut FrameClock::from_period(Duration::from_millis(2)),
            &AtomicBool::new(false),
            Some(deadline),
        );

        assert_eq!(report.exit, LoopExit::DeadlineReached);
        assert!(report.ticks > 0);
    }
}
