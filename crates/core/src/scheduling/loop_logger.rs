use std::collections::BTreeMap;
use std::time::Instant;

/// Observer for detection-loop events.
///
/// The scheduler reports through this trait so the binary can collect
/// statistics while tests stay silent.
pub trait LoopLogger: Send {
    /// One clock tick was processed.
    fn tick(&mut self);

    /// How long a named stage took, in milliseconds.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// A point-in-time value such as faces per batch.
    fn metric(&mut self, name: &str, value: f64);

    /// End-of-run report. Default: nothing.
    fn summary(&self) {}
}

pub struct NullLoopLogger;

impl LoopLogger for NullLoopLogger {
    fn tick(&mut self) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
}

/// Running aggregate of one timing stage or metric. Constant size, so an
/// unbounded live run does not grow the logger.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunningStat {
    pub count: usize,
    pub sum: f64,
    pub max: f64,
    pub last: f64,
}

impl RunningStat {
    fn push(&mut self, value: f64) {
        self.max = if self.count == 0 { value } else { self.max.max(value) };
        self.count += 1;
        self.sum += value;
        self.last = value;
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Collects per-stage timings and metrics and logs a summary at shutdown.
pub struct SummaryLoopLogger {
    started: Instant,
    ticks: usize,
    timings: BTreeMap<String, RunningStat>,
    metrics: BTreeMap<String, RunningStat>,
}

impl SummaryLoopLogger {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            ticks: 0,
            timings: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn ticks(&self) -> usize {
        self.ticks
    }

    pub fn timings_for(&self, stage: &str) -> Option<&RunningStat> {
        self.timings.get(stage)
    }

    pub fn metrics_for(&self, name: &str) -> Option<&RunningStat> {
        self.metrics.get(name)
    }

    /// Formatted report, or `None` before anything was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.ticks == 0 && self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_s = self.started.elapsed().as_secs_f64();
        let mut lines = vec![format!(
            "Detection summary ({} ticks, {elapsed_s:.1}s):",
            self.ticks
        )];

        for (stage, stat) in &self.timings {
            lines.push(format!(
                "  {stage:10}: {} runs  avg {:6.1}ms  max {:6.1}ms  total {:7.0}ms",
                stat.count,
                stat.mean(),
                stat.max,
                stat.sum
            ));
        }

        for (name, stat) in &self.metrics {
            lines.push(format!(
                "  {name}: avg {:.1}, last {:.0}",
                stat.mean(),
                stat.last
            ));
        }

        if self.ticks > 0 && elapsed_s > 0.0 {
            lines.push(format!(
                "  Clock rate: {:.1} ticks/s",
                self.ticks as f64 / elapsed_s
            ));
        }

        Some(lines.join("\n"))
    }
}

impl Default for SummaryLoopLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopLogger for SummaryLoopLogger {
    fn tick(&mut self) {
        self.ticks += 1;
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        record(&mut self.timings, stage, duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        record(&mut self.metrics, name, value);
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}

fn record(stats: &mut BTreeMap<String, RunningStat>, key: &str, value: f64) {
    match stats.get_mut(key) {
        Some(stat) => stat.push(value),
        None => {
            let mut stat = RunningStat::default();
            stat.push(value);
            stats.insert(key.to_string(), stat);
        }
    }
}
