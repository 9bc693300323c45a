//! Progress reporting.
//!
//! Updates carry an overall percentage (0 to 100, never decreasing within
//! one export) and the stage label. They are delivered over an unbounded
//! channel or a callback, so reporting never blocks the pipeline.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::PipelineStage;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// Overall completion, 0 to 100
    pub percent: f32,
    pub stage: PipelineStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressUpdate {
    pub fn stage_label(&self) -> &'static str {
        self.stage.label()
    }
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;

#[derive(Clone)]
enum Sink {
    Silent,
    Channel(mpsc::UnboundedSender<ProgressUpdate>),
    Callback(ProgressCallback),
}

/// Sends progress updates for one export
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Sink,
    /// Highest percent sent so far, as f32 bits
    high_water: Arc<AtomicU32>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("percent", &self.percent())
            .finish()
    }
}

impl ProgressReporter {
    fn with_sink(sink: Sink) -> Self {
        Self {
            sink,
            high_water: Arc::new(AtomicU32::new(0f32.to_bits())),
        }
    }

    pub fn silent() -> Self {
        Self::with_sink(Sink::Silent)
    }

    pub fn channel(tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self::with_sink(Sink::Channel(tx))
    }

    pub fn callback(callback: ProgressCallback) -> Self {
        Self::with_sink(Sink::Callback(callback))
    }

    /// Highest percent reported so far
    pub fn percent(&self) -> f32 {
        f32::from_bits(self.high_water.load(Ordering::SeqCst))
    }

    /// Reports `percent` for `stage`; lower values than already sent are raised
    pub fn report(&self, stage: PipelineStage, percent: f32, message: Option<String>) {
        let requested = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let previous = self
            .high_water
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some(f32::from_bits(bits).max(requested).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        let percent = f32::from_bits(previous).max(requested);

        let update = ProgressUpdate {
            percent,
            stage,
            message,
        };
        match &self.sink {
            Sink::Silent => {}
            Sink::Channel(tx) => {
                // A dropped receiver means nobody is listening any more.
                let _ = tx.send(update);
            }
            Sink::Callback(callback) => callback(&update),
        }
    }

    /// Reports entry into `stage` at the start of its span
    pub fn enter(&self, stage: PipelineStage) {
        self.report(stage, stage.progress_span().0, None);
    }

    /// Reporter for fractional progress within `stage`
    pub fn stage(&self, stage: PipelineStage) -> StageProgress {
        let (from, to) = stage.progress_span();
        StageProgress {
            reporter: self.clone(),
            stage,
            from,
            to,
        }
    }
}

/// Maps a stage's 0.0..=1.0 progress into its overall span
#[derive(Clone, Debug)]
pub struct StageProgress {
    reporter: ProgressReporter,
    stage: PipelineStage,
    from: f32,
    to: f32,
}

impl StageProgress {
    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn fraction(&self, fraction: f64, message: Option<String>) {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0) as f32
        } else {
            0.0
        };
        self.reporter
            .report(self.stage, self.from + (self.to - self.from) * fraction, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_channel_receives_monotonic_updates() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::channel(tx);

        reporter.enter(PipelineStage::Validating);
        reporter.report(PipelineStage::Resolving, 25.0, None);
        reporter.report(PipelineStage::Resolving, 10.0, Some("late".to_string()));

        let mut seen = Vec::new();
        while let Ok(update) = rx.try_recv() {
            seen.push(update.percent);
        }
        assert_eq!(seen, vec![0.0, 25.0, 25.0]);
    }

    #[test]
    fn test_stage_progress_maps_into_span() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = ProgressReporter::callback(Arc::new(move |u: &ProgressUpdate| {
            sink.lock().unwrap().push((u.stage, u.percent));
        }));

        let rendering = reporter.stage(PipelineStage::Rendering);
        rendering.fraction(0.5, None);
        rendering.fraction(2.0, None);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], (PipelineStage::Rendering, 64.5));
        assert_eq!(seen[1], (PipelineStage::Rendering, 99.0));
    }

    #[test]
    fn test_percent_is_clamped() {
        let reporter = ProgressReporter::silent();
        reporter.report(PipelineStage::Done, 250.0, None);
        assert_eq!(reporter.percent(), 100.0);
        reporter.report(PipelineStage::Done, f32::NAN, None);
        assert_eq!(reporter.percent(), 100.0);
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        ProgressReporter::channel(tx).enter(PipelineStage::Rendering);
    }
}
