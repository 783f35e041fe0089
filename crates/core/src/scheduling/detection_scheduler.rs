use std::time::{Duration, Instant};

use crate::demographics::domain::age_category::AgeCategory;
use crate::demographics::domain::category_aggregator::CategoryAggregator;
use crate::demographics::domain::category_publisher::{CategoryPublisher, CategoryUpdate};
use crate::demographics::domain::observation::DetectionObservation;
use crate::detection::domain::face_analyzer::{FaceAnalysis, FaceAnalyzer};
use crate::detection::domain::frame_source::{FrameSource, SourceReadiness};
use crate::detection::domain::overlay::{CachedBox, OverlayRenderer, REGISTERING_LABEL};
use crate::detection::infrastructure::inference_worker::{InferenceCompletion, InferenceWorker};
use crate::recognition::domain::descriptor_matcher::{DescriptorMatcher, Recognition};
use crate::recognition::domain::registration_coordinator::RegistrationCoordinator;
use crate::scheduling::loop_logger::{LoopLogger, NullLoopLogger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    Inferring,
}

/// What a tick did after draining completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// The source cannot provide frames yet; nothing was drawn.
    SourceNotReady,
    /// Cached boxes were redrawn. `busy` is set when inference was still
    /// outstanding, clear when the interval had not elapsed.
    Redrawn { busy: bool },
    /// A new frame was handed to the analyzer.
    Dispatched,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub action: TickAction,
    pub batches_applied: usize,
}

/// User-facing state of the detection loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerStatus {
    WaitingForSource,
    SourceUnavailable(String),
    Active { identities: usize },
    Finished,
}

/// Drives detection from a frame clock without ever waiting on inference.
///
/// Every tick first applies whatever finished in the background (refreshed
/// identity snapshots, then at most one inference batch), then either
/// redraws the boxes of the last completed batch or dispatches a new frame.
/// At most one frame is in the analyzer at a time, and dispatches are spaced
/// by at least `interval`. All state lives on the caller's thread.
pub struct DetectionScheduler {
    worker: InferenceWorker,
    matcher: DescriptorMatcher,
    coordinator: RegistrationCoordinator,
    aggregator: CategoryAggregator,
    publisher: Box<dyn CategoryPublisher>,
    logger: Box<dyn LoopLogger>,
    interval: Duration,
    phase: SchedulerPhase,
    last_started: Option<Instant>,
    cache: Vec<CachedBox>,
    status: SchedulerStatus,
}

impl DetectionScheduler {
    pub fn new(
        analyzer: Box<dyn FaceAnalyzer>,
        matcher: DescriptorMatcher,
        coordinator: RegistrationCoordinator,
        aggregator: CategoryAggregator,
        publisher: Box<dyn CategoryPublisher>,
        interval: Duration,
    ) -> Self {
        Self {
            worker: InferenceWorker::spawn(analyzer),
            matcher,
            coordinator,
            aggregator,
            publisher,
            logger: Box::new(NullLoopLogger),
            interval,
            phase: SchedulerPhase::Idle,
            last_started: None,
            cache: Vec::new(),
            status: SchedulerStatus::WaitingForSource,
        }
    }

    pub fn with_logger(mut self, logger: Box<dyn LoopLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn tick(
        &mut self,
        now: Instant,
        source: &dyn FrameSource,
        overlay: &mut dyn OverlayRenderer,
    ) -> TickOutcome {
        self.logger.tick();
        self.install_registrations();

        let mut batches_applied = 0;
        if self.phase == SchedulerPhase::Inferring {
            if let Some(completion) = self.worker.try_complete() {
                self.apply_completion(completion, now);
                batches_applied += 1;
            }
        }

        let outcome = |action| TickOutcome {
            action,
            batches_applied,
        };

        match source.readiness() {
            SourceReadiness::Ready => {}
            SourceReadiness::Buffering => {
                self.set_status(SchedulerStatus::WaitingForSource);
                return outcome(TickAction::SourceNotReady);
            }
            SourceReadiness::Finished => {
                self.set_status(SchedulerStatus::Finished);
                return outcome(TickAction::SourceNotReady);
            }
            SourceReadiness::Unavailable(reason) => {
                self.set_status(SchedulerStatus::SourceUnavailable(reason));
                return outcome(TickAction::SourceNotReady);
            }
        }
        self.set_status(SchedulerStatus::Active {
            identities: self.matcher.identity_count(),
        });

        let action = if self.phase == SchedulerPhase::Inferring {
            TickAction::Redrawn { busy: true }
        } else if self.within_interval(now) {
            TickAction::Redrawn { busy: false }
        } else {
            match source.latest_frame() {
                Some(frame) => {
                    self.last_started = Some(now);
                    match self.worker.submit(frame) {
                        Ok(()) => self.phase = SchedulerPhase::Inferring,
                        Err(e) => log::warn!("Could not start detection: {e}"),
                    }
                    TickAction::Dispatched
                }
                None => TickAction::Redrawn { busy: false },
            }
        };

        overlay.clear();
        overlay.draw(&self.cache);
        outcome(action)
    }

    /// Blocks up to `timeout` for the outstanding batch and applies it.
    /// Returns whether a batch was applied.
    pub fn await_inference(&mut self, timeout: Duration) -> bool {
        if self.phase != SchedulerPhase::Inferring {
            return false;
        }
        match self.worker.wait_complete(timeout) {
            Some(completion) => {
                self.apply_completion(completion, Instant::now());
                true
            }
            None => {
                log::warn!("Gave up waiting for the detection in flight");
                false
            }
        }
    }

    /// Waits for background registrations and installs the final snapshot.
    pub fn settle_registrations(&mut self, timeout: Duration) {
        if let Some(snapshot) = self.coordinator.settle(timeout) {
            self.matcher.replace_snapshot(snapshot);
        }
    }

    /// Stops the inference thread and logs the loop summary.
    pub fn shutdown(self) {
        self.logger.summary();
        self.worker.shutdown();
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn status(&self) -> &SchedulerStatus {
        &self.status
    }

    pub fn cached_boxes(&self) -> &[CachedBox] {
        &self.cache
    }

    pub fn matcher(&self) -> &DescriptorMatcher {
        &self.matcher
    }

    pub fn coordinator(&self) -> &RegistrationCoordinator {
        &self.coordinator
    }

    pub fn aggregator(&self) -> &CategoryAggregator {
        &self.aggregator
    }

    fn within_interval(&self, now: Instant) -> bool {
        self.last_started
            .is_some_and(|started| now.saturating_duration_since(started) < self.interval)
    }

    fn install_registrations(&mut self) {
        if let Some(snapshot) = self.coordinator.poll() {
            log::debug!("Installing identity snapshot ({} identities)", snapshot.len());
            self.matcher.replace_snapshot(snapshot);
        }
    }

    fn set_status(&mut self, status: SchedulerStatus) {
        if self.status != status {
            match &status {
                SchedulerStatus::SourceUnavailable(reason) => {
                    log::warn!("Video source unavailable: {reason}")
                }
                other => log::info!("Status: {other:?}"),
            }
            self.status = status;
        }
    }

    fn apply_completion(&mut self, completion: InferenceCompletion, now: Instant) {
        self.phase = SchedulerPhase::Idle;
        self.logger
            .timing("inference", completion.elapsed.as_secs_f64() * 1000.0);
        match completion.result {
            Ok(faces) => {
                let started = Instant::now();
                self.apply_batch(faces, now);
                self.logger
                    .timing("apply", started.elapsed().as_secs_f64() * 1000.0);
            }
            Err(e) => log::warn!("Detection failed for frame {}: {e}", completion.frame_index),
        }
    }

    /// Replaces the cache with one box per face, starts registrations for
    /// unmatched faces, and publishes the updated scene verdict.
    fn apply_batch(&mut self, faces: Vec<FaceAnalysis>, now: Instant) {
        let mut boxes = Vec::with_capacity(faces.len());
        let mut observations = Vec::new();

        for face in faces {
            if let Some(observation) = DetectionObservation::from_estimate(face.age, &face.gender, now)
            {
                observations.push(observation);
            }

            let (label, score) = match self.matcher.identify(&face.descriptor) {
                Recognition::Recognized { id, distance } => (id, distance),
                Recognition::Unknown => {
                    self.coordinator.register_unmatched(&face.descriptor, now);
                    (REGISTERING_LABEL.to_string(), 0.0)
                }
            };

            boxes.push(CachedBox {
                bbox: face.bbox,
                label,
                score,
                age: face.age,
                category: AgeCategory::from_estimate(face.age),
                gender: face.gender,
                gender_probability: face.gender_probability,
            });
        }

        self.logger.metric("faces", boxes.len() as f64);
        self.logger
            .metric("identities", self.matcher.identity_count() as f64);
        log::debug!(
            "Applied batch: {} face(s), {} categorised",
            boxes.len(),
            observations.len()
        );
        self.cache = boxes;

        self.aggregator.record(observations);
        let verdict = self.aggregator.aggregate(now);
        self.publisher.publish(&CategoryUpdate::now(verdict));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use crossbeam_channel::{Receiver, Sender};

    use crate::demographics::domain::age_category::Gender;
    use crate::detection::domain::face_analyzer::BoundingBox;
    use crate::recognition::domain::identity::{Descriptor, Identity};
    use crate::recognition::domain::identity_store::{IdentityStore, SaveReceipt, StoreError};
    use crate::shared::frame::Frame;

    const WAIT: Duration = Duration::from_secs(5);
    const INTERVAL: Duration = Duration::from_millis(200);

    // --- Stubs ---

    /// Returns scripted batches in order, optionally waiting for a release
    /// signal before each one.
    struct ScriptedAnalyzer {
        batches: Vec<Result<Vec<FaceAnalysis>, String>>,
        calls: Arc<AtomicUsize>,
        gate: Option<Receiver<()>>,
    }

    impl FaceAnalyzer for ScriptedAnalyzer {
        fn analyze(&mut self, _: &Frame) -> Result<Vec<FaceAnalysis>, Box<dyn std::error::Error>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }
            let batch = &self.batches[call.min(self.batches.len() - 1)];
            batch.clone().map_err(Into::into)
        }
    }

    struct StubSource {
        readiness: SourceReadiness,
    }

    impl FrameSource for StubSource {
        fn readiness(&self) -> SourceReadiness {
            self.readiness.clone()
        }

        fn latest_frame(&self) -> Option<Frame> {
            Some(Frame::new(vec![0u8; 4 * 4 * 3], 4, 4, 0))
        }
    }

    #[derive(Default)]
    struct RecordingOverlay {
        draws: Vec<Vec<CachedBox>>,
    }

    impl OverlayRenderer for RecordingOverlay {
        fn clear(&mut self) {}

        fn draw(&mut self, boxes: &[CachedBox]) {
            self.draws.push(boxes.to_vec());
        }
    }

    #[derive(Clone, Default)]
    struct RecordingPublisher {
        updates: Arc<Mutex<Vec<CategoryUpdate>>>,
    }

    impl CategoryPublisher for RecordingPublisher {
        fn publish(&mut self, update: &CategoryUpdate) {
            self.updates.lock().unwrap().push(*update);
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        identities: Mutex<Vec<Identity>>,
        allocations: AtomicUsize,
        appends: Mutex<Vec<(String, Descriptor)>>,
    }

    impl IdentityStore for MemoryStore {
        fn list_identities(&self) -> Result<Vec<Identity>, StoreError> {
            Ok(self.identities.lock().unwrap().clone())
        }

        fn allocate_identity(&self) -> Result<String, StoreError> {
            self.allocations.fetch_add(1, Ordering::SeqCst);
            let mut identities = self.identities.lock().unwrap();
            let id = format!("user{}", identities.len() + 1);
            identities.push(Identity::new(id.clone(), vec![]));
            Ok(id)
        }

        fn append_descriptor(
            &self,
            id: &str,
            descriptor: &Descriptor,
        ) -> Result<SaveReceipt, StoreError> {
            self.appends
                .lock()
                .unwrap()
                .push((id.to_string(), descriptor.clone()));
            let mut identities = self.identities.lock().unwrap();
            if let Some(identity) = identities.iter_mut().find(|i| i.id == id) {
                identity.descriptors.push(descriptor.clone());
            }
            Ok(SaveReceipt {
                ok: true,
                total_identity_count: identities.len(),
            })
        }
    }

    // --- Helpers ---

    fn face(descriptor: Descriptor, age: f32, gender: &str) -> FaceAnalysis {
        FaceAnalysis {
            bbox: BoundingBox {
                x: 10.0,
                y: 10.0,
                width: 40.0,
                height: 40.0,
            },
            descriptor,
            age,
            gender: gender.to_string(),
            gender_probability: 0.9,
        }
    }

    struct Harness {
        scheduler: DetectionScheduler,
        calls: Arc<AtomicUsize>,
        publisher: RecordingPublisher,
        store: Arc<MemoryStore>,
        gate: Option<Sender<()>>,
    }

    fn harness(
        batches: Vec<Result<Vec<FaceAnalysis>, String>>,
        known: Vec<Identity>,
        gated: bool,
    ) -> Harness {
        let calls = Arc::new(AtomicUsize::new(0));
        let (gate_tx, gate_rx) = if gated {
            let (tx, rx) = crossbeam_channel::unbounded();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let analyzer = ScriptedAnalyzer {
            batches,
            calls: calls.clone(),
            gate: gate_rx,
        };
        let store = Arc::new(MemoryStore::default());
        let dyn_store: Arc<dyn IdentityStore> = store.clone();
        let mut matcher = DescriptorMatcher::new(0.55);
        matcher.replace_snapshot(known);
        let publisher = RecordingPublisher::default();
        let scheduler = DetectionScheduler::new(
            Box::new(analyzer),
            matcher,
            RegistrationCoordinator::new(dyn_store, Duration::from_millis(3000)),
            CategoryAggregator::new(Duration::from_millis(2000), 50.0),
            Box::new(publisher.clone()),
            INTERVAL,
        );
        Harness {
            scheduler,
            calls,
            publisher,
            store,
            gate: gate_tx,
        }
    }

    fn ready() -> StubSource {
        StubSource {
            readiness: SourceReadiness::Ready,
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    // --- Tests ---

    #[test]
    fn test_source_not_ready_skips_everything() {
        let mut h = harness(vec![Ok(vec![])], vec![], false);
        let mut overlay = RecordingOverlay::default();
        let source = StubSource {
            readiness: SourceReadiness::Buffering,
        };

        let outcome = h.scheduler.tick(Instant::now(), &source, &mut overlay);

        assert_eq!(outcome.action, TickAction::SourceNotReady);
        assert_eq!(h.scheduler.status(), &SchedulerStatus::WaitingForSource);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
        assert!(overlay.draws.is_empty());
    }

    #[test]
    fn test_unavailable_source_is_reported() {
        let mut h = harness(vec![Ok(vec![])], vec![], false);
        let source = StubSource {
            readiness: SourceReadiness::Unavailable("no camera".into()),
        };

        h.scheduler
            .tick(Instant::now(), &source, &mut RecordingOverlay::default());

        assert_eq!(
            h.scheduler.status(),
            &SchedulerStatus::SourceUnavailable("no camera".into())
        );
    }

    #[test]
    fn test_overlap_guard_redraws_previous_batch() {
        let known = vec![Identity::new("user1", vec![vec![0.0, 0.0]])];
        let batch_one = vec![face(vec![0.1, 0.0], 30.0, "male")];
        let batch_two = vec![face(vec![0.0, 0.1], 12.0, "female"); 2];
        let mut h = harness(vec![Ok(batch_one), Ok(batch_two)], known, true);
        let gate = h.gate.take().unwrap();
        let mut overlay = RecordingOverlay::default();
        let t0 = Instant::now();

        // Batch 1 completes.
        gate.send(()).unwrap();
        h.scheduler.tick(t0, &ready(), &mut overlay);
        assert!(h.scheduler.await_inference(WAIT));
        let first_boxes = h.scheduler.cached_boxes().to_vec();
        assert_eq!(first_boxes.len(), 1);
        assert_eq!(first_boxes[0].label, "user1");

        // Batch 2 is dispatched and held inside the analyzer.
        let dispatched = h.scheduler.tick(t0 + ms(250), &ready(), &mut overlay);
        assert_eq!(dispatched.action, TickAction::Dispatched);

        let busy = h.scheduler.tick(t0 + ms(500), &ready(), &mut overlay);
        assert_eq!(busy.action, TickAction::Redrawn { busy: true });
        assert_eq!(busy.batches_applied, 0);
        assert_eq!(overlay.draws.last().unwrap(), &first_boxes);

        gate.send(()).unwrap();
        assert!(h.scheduler.await_inference(WAIT));
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.scheduler.cached_boxes().len(), 2);
        assert_eq!(h.scheduler.phase(), SchedulerPhase::Idle);
    }

    #[test]
    fn test_completion_is_applied_on_next_tick() {
        let mut h = harness(vec![Ok(vec![face(vec![1.0], 30.0, "male")])], vec![], false);
        let mut overlay = RecordingOverlay::default();
        let t0 = Instant::now();
        h.scheduler.tick(t0, &ready(), &mut overlay);

        let mut applied = 0;
        let deadline = Instant::now() + WAIT;
        let mut offset = 0;
        while applied == 0 && Instant::now() < deadline {
            offset += 1;
            applied = h.scheduler.tick(t0 + ms(offset), &ready(), &mut overlay).batches_applied;
            std::thread::sleep(ms(1));
        }

        assert_eq!(applied, 1);
        assert_eq!(overlay.draws.last().unwrap().len(), 1);
    }

    #[test]
    fn test_interval_spaces_dispatches() {
        let mut h = harness(vec![Ok(vec![])], vec![], false);
        let mut overlay = RecordingOverlay::default();
        let t0 = Instant::now();

        assert_eq!(
            h.scheduler.tick(t0, &ready(), &mut overlay).action,
            TickAction::Dispatched
        );
        assert!(h.scheduler.await_inference(WAIT));

        assert_eq!(
            h.scheduler.tick(t0 + ms(199), &ready(), &mut overlay).action,
            TickAction::Redrawn { busy: false }
        );
        assert_eq!(
            h.scheduler.tick(t0 + ms(200), &ready(), &mut overlay).action,
            TickAction::Dispatched
        );
        assert!(h.scheduler.await_inference(WAIT));
        assert_eq!(h.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_inference_error_keeps_cache_and_returns_to_idle() {
        let batches = vec![
            Ok(vec![face(vec![1.0], 30.0, "male")]),
            Err("model crashed".to_string()),
        ];
        let mut h = harness(batches, vec![], false);
        let mut overlay = RecordingOverlay::default();
        let t0 = Instant::now();

        h.scheduler.tick(t0, &ready(), &mut overlay);
        h.scheduler.await_inference(WAIT);
        let published = h.publisher.updates.lock().unwrap().len();

        h.scheduler.tick(t0 + ms(300), &ready(), &mut overlay);
        assert!(h.scheduler.await_inference(WAIT));

        assert_eq!(h.scheduler.phase(), SchedulerPhase::Idle);
        assert_eq!(h.scheduler.cached_boxes().len(), 1);
        assert_eq!(h.publisher.updates.lock().unwrap().len(), published);
        assert_eq!(
            h.scheduler.tick(t0 + ms(600), &ready(), &mut overlay).action,
            TickAction::Dispatched
        );
    }

    #[test]
    fn test_every_batch_publishes_even_without_faces() {
        let mut h = harness(vec![Ok(vec![])], vec![], false);
        let mut overlay = RecordingOverlay::default();
        let t0 = Instant::now();

        for step in 0..3 {
            h.scheduler.tick(t0 + ms(step * 300), &ready(), &mut overlay);
            assert!(h.scheduler.await_inference(WAIT));
        }

        let updates = h.publisher.updates.lock().unwrap();
        assert_eq!(updates.len(), 3);
        assert!(updates.iter().all(|u| u.category.is_none() && u.gender.is_none()));
    }

    #[test]
    fn test_batch_publishes_dominant_category() {
        let known = vec![Identity::new("user1", vec![vec![0.0]])];
        let batch = vec![
            face(vec![0.0], 30.0, "female"),
            face(vec![0.0], 28.0, "Female"),
            face(vec![0.0], 70.0, "male"),
        ];
        let mut h = harness(vec![Ok(batch)], known, false);

        h.scheduler
            .tick(Instant::now(), &ready(), &mut RecordingOverlay::default());
        assert!(h.scheduler.await_inference(WAIT));

        let updates = h.publisher.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].category, Some(AgeCategory::Adults));
        assert_eq!(updates[0].gender, Some(Gender::Female));

        let boxes = h.scheduler.cached_boxes();
        assert_eq!(boxes[2].category, None);
        assert_eq!(boxes[2].detail(), "70 years, male");
        assert_eq!(h.scheduler.aggregator().window_len(), 2);
    }

    #[test]
    fn test_unmatched_face_registers_end_to_end() {
        let descriptor = vec![0.25, 0.5, 0.75];
        let batches = vec![Ok(vec![face(descriptor.clone(), 30.0, "male")])];
        let mut h = harness(batches, vec![], false);
        let mut overlay = RecordingOverlay::default();
        let t0 = Instant::now();

        h.scheduler.tick(t0, &ready(), &mut overlay);
        assert!(h.scheduler.await_inference(WAIT));
        assert_eq!(h.scheduler.cached_boxes()[0].label, REGISTERING_LABEL);
        assert_eq!(h.scheduler.cached_boxes()[0].caption(), "registering...");

        h.scheduler.settle_registrations(WAIT);

        assert_eq!(h.store.allocations.load(Ordering::SeqCst), 1);
        assert_eq!(
            *h.store.appends.lock().unwrap(),
            vec![("user1".to_string(), descriptor.clone())]
        );
        assert_eq!(
            h.scheduler.matcher().snapshot(),
            &[Identity::new("user1", vec![descriptor])]
        );

        // The same face is recognized on the next batch.
        h.scheduler.tick(t0 + ms(300), &ready(), &mut overlay);
        assert!(h.scheduler.await_inference(WAIT));
        assert_eq!(h.scheduler.cached_boxes()[0].label, "user1");
        assert_eq!(h.store.allocations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_burst_of_unknown_faces_starts_one_registration() {
        let batch = vec![
            face(vec![1.0, 0.0], 30.0, "male"),
            face(vec![0.0, 1.0], 30.0, "male"),
        ];
        let mut h = harness(vec![Ok(batch)], vec![], false);

        h.scheduler
            .tick(Instant::now(), &ready(), &mut RecordingOverlay::default());
        assert!(h.scheduler.await_inference(WAIT));
        h.scheduler.settle_registrations(WAIT);

        assert_eq!(h.store.allocations.load(Ordering::SeqCst), 1);
        assert_eq!(h.scheduler.matcher().identity_count(), 1);
        assert_eq!(h.scheduler.coordinator().pending_tasks(), 0);
        assert!(h.scheduler.coordinator().in_flight().is_empty());
    }

    #[test]
    fn test_await_without_outstanding_batch_returns_false() {
        let mut h = harness(vec![Ok(vec![])], vec![], false);
        assert!(!h.scheduler.await_inference(ms(10)));
    }
}
