//! Pipeline stage machine.
//!
//! ```text
//! Idle → Validating → [Captioning] → Resolving → Rendering → Done
//!            └──────────────┴────────────┴───────────┴──→ Failed
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{CoreError, CoreResult};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipelineStage {
    #[default]
    Idle,
    Validating,
    Captioning,
    Resolving,
    Rendering,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn label(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Validating => "validating",
            PipelineStage::Captioning => "captioning",
            PipelineStage::Resolving => "resolving",
            PipelineStage::Rendering => "rendering",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }

    /// Overall progress range covered by this stage, in percent
    pub fn progress_span(&self) -> (f32, f32) {
        match self {
            PipelineStage::Idle => (0.0, 0.0),
            PipelineStage::Validating => (0.0, 5.0),
            PipelineStage::Captioning => (5.0, 25.0),
            PipelineStage::Resolving => (25.0, 30.0),
            PipelineStage::Rendering => (30.0, 99.0),
            PipelineStage::Done => (100.0, 100.0),
            PipelineStage::Failed => (0.0, 0.0),
        }
    }

    pub fn can_transition_to(&self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, Validating)
            | (Validating, Captioning)
            | (Validating, Resolving)
            | (Captioning, Resolving)
            | (Resolving, Rendering)
            | (Rendering, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Tracks the current stage and the last stage that finished
#[derive(Clone, Debug, Default)]
pub struct StageTracker {
    current: PipelineStage,
    last_completed: PipelineStage,
    history: Vec<PipelineStage>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            history: vec![PipelineStage::Idle],
            ..Default::default()
        }
    }

    pub fn current(&self) -> PipelineStage {
        self.current
    }

    pub fn last_completed(&self) -> PipelineStage {
        self.last_completed
    }

    /// Every stage entered, in order, starting with `Idle`
    pub fn history(&self) -> &[PipelineStage] {
        &self.history
    }

    /// Moves to `next`, marking the current stage complete
    pub fn advance(&mut self, next: PipelineStage) -> CoreResult<()> {
        if !self.current.can_transition_to(next) {
            return Err(CoreError::Internal(format!(
                "illegal pipeline transition {} -> {}",
                self.current, next
            )));
        }
        if next != PipelineStage::Failed {
            self.last_completed = self.current;
        }
        self.current = next;
        self.history.push(next);
        Ok(())
    }

    /// Moves to `Failed` unless already terminal
    pub fn fail(&mut self) {
        if !self.current.is_terminal() {
            self.current = PipelineStage::Failed;
            self.history.push(PipelineStage::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_with_captioning() {
        let mut tracker = StageTracker::new();
        for stage in [
            PipelineStage::Validating,
            PipelineStage::Captioning,
            PipelineStage::Resolving,
            PipelineStage::Rendering,
            PipelineStage::Done,
        ] {
            tracker.advance(stage).unwrap();
        }
        assert_eq!(tracker.current(), PipelineStage::Done);
        assert_eq!(tracker.last_completed(), PipelineStage::Rendering);
        assert_eq!(tracker.history().len(), 6);
    }

    #[test]
    fn test_captioning_is_optional() {
        let mut tracker = StageTracker::new();
        tracker.advance(PipelineStage::Validating).unwrap();
        tracker.advance(PipelineStage::Resolving).unwrap();
        assert_eq!(tracker.last_completed(), PipelineStage::Validating);
    }

    #[test]
    fn test_failed_keeps_last_completed() {
        let mut tracker = StageTracker::new();
        tracker.advance(PipelineStage::Validating).unwrap();
        tracker.advance(PipelineStage::Resolving).unwrap();
        tracker.advance(PipelineStage::Rendering).unwrap();
        tracker.fail();

        assert_eq!(tracker.current(), PipelineStage::Failed);
        assert_eq!(tracker.last_completed(), PipelineStage::Resolving);

        tracker.fail();
        assert_eq!(tracker.history().last(), Some(&PipelineStage::Failed));
        assert_eq!(tracker.history().len(), 5);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut tracker = StageTracker::new();
        assert!(tracker.advance(PipelineStage::Rendering).is_err());
        tracker.advance(PipelineStage::Validating).unwrap();
        assert!(tracker.advance(PipelineStage::Done).is_err());
        assert!(!PipelineStage::Done.can_transition_to(PipelineStage::Failed));
    }

    #[test]
    fn test_stage_display_and_serde() {
        assert_eq!(PipelineStage::Resolving.to_string(), "resolving");
        assert_eq!(
            serde_json::to_string(&PipelineStage::Captioning).unwrap(),
            "\"captioning\""
        );
    }
}
