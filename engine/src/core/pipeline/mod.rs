//! Export Pipeline Module
//!
//! Drives one export from validation to the finished file.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  state.rs         - PipelineStage, StageTracker                 │
//! │  progress.rs      - ProgressReporter, StageProgress             │
//! │  cancel.rs        - CancelToken                                 │
//! │  orchestrator.rs  - ExportPipeline, ExportReport                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod cancel;
mod orchestrator;
mod progress;
mod state;

pub use cancel::CancelToken;
pub use orchestrator::{ExportPipeline, ExportReport, ExportRequest, PipelineWarning};
pub use progress::{ProgressCallback, ProgressReporter, ProgressUpdate, StageProgress};
pub use state::{PipelineStage, StageTracker};
