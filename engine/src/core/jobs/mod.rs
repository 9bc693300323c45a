//! Export Job Service
//!
//! Runs export pipelines as background tasks on the tokio runtime. Callers
//! get an [`ExportHandle`] right away and observe the export through its
//! progress channel; nothing here blocks the caller. The number of exports
//! rendering at once is bounded by a semaphore.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::core::{
    pipeline::{
        CancelToken, ExportPipeline, ExportReport, ExportRequest, PipelineStage,
        ProgressReporter, ProgressUpdate,
    },
    CoreError, CoreResult, JobId,
};

// =============================================================================
// Job Status
// =============================================================================

/// Job status
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobStatus {
    /// Waiting for a free export slot
    #[default]
    Queued,
    /// Currently running
    Running { progress: f32, stage: PipelineStage },
    /// Successfully completed
    #[serde(rename_all = "camelCase")]
    Completed { output_path: PathBuf },
    /// Failed with error
    Failed { error: String },
    /// Cancelled by user
    Cancelled,
}

impl JobStatus {
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed { .. } | JobStatus::Failed { .. } | JobStatus::Cancelled
        )
    }
}

// =============================================================================
// Export Handle
// =============================================================================

/// Handle to a spawned export
pub struct ExportHandle {
    job_id: JobId,
    progress: Option<mpsc::UnboundedReceiver<ProgressUpdate>>,
    cancel: CancelToken,
    join: JoinHandle<CoreResult<ExportReport>>,
}

impl ExportHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Takes the progress receiver; later calls return `None`
    pub fn take_progress(&mut self) -> Option<mpsc::UnboundedReceiver<ProgressUpdate>> {
        self.progress.take()
    }

    /// Requests cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Waits for the export to finish
    pub async fn join(self) -> CoreResult<ExportReport> {
        self.join
            .await
            .map_err(|e| CoreError::Internal(format!("export task failed: {}", e)))?
    }
}

// =============================================================================
// Export Service
// =============================================================================

/// Export service configuration
#[derive(Clone, Debug)]
pub struct ExportServiceConfig {
    /// Exports allowed to run at once
    pub max_concurrent_exports: usize,
}

impl Default for ExportServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_exports: num_cpus::get().max(1),
        }
    }
}

type StatusMap = Arc<Mutex<HashMap<JobId, JobStatus>>>;

fn set_status(jobs: &StatusMap, job_id: &str, status: JobStatus) {
    let mut jobs = jobs.lock().unwrap_or_else(|p| p.into_inner());
    jobs.insert(job_id.to_string(), status);
}

/// Spawns isolated export pipelines sharing one configured [`ExportPipeline`]
#[derive(Clone)]
pub struct ExportService {
    pipeline: Arc<ExportPipeline>,
    permits: Arc<Semaphore>,
    jobs: StatusMap,
}

impl ExportService {
    pub fn new(pipeline: ExportPipeline, config: ExportServiceConfig) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            permits: Arc::new(Semaphore::new(config.max_concurrent_exports.max(1))),
            jobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts an export in the background
    pub fn spawn_export(&self, request: ExportRequest) -> ExportHandle {
        let job_id = ulid::Ulid::new().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancelToken::new();
        set_status(&self.jobs, &job_id, JobStatus::Queued);

        let pipeline = Arc::clone(&self.pipeline);
        let permits = Arc::clone(&self.permits);
        let jobs = Arc::clone(&self.jobs);
        let task_cancel = cancel.clone();
        let task_id = job_id.clone();

        let join = tokio::spawn(async move {
            let permit = tokio::select! {
                permit = permits.acquire_owned() => permit
                    .map_err(|_| CoreError::Internal("export service closed".to_string())),
                _ = task_cancel.cancelled() => Err(CoreError::Cancelled),
            };
            let _permit = match permit {
                Ok(permit) => permit,
                Err(e) => {
                    set_status(&jobs, &task_id, status_for(&e));
                    return Err(e);
                }
            };

            debug!(job_id = %task_id, "Export slot acquired");
            set_status(
                &jobs,
                &task_id,
                JobStatus::Running {
                    progress: 0.0,
                    stage: PipelineStage::Idle,
                },
            );

            let status_jobs = Arc::clone(&jobs);
            let status_id = task_id.clone();
            let reporter = ProgressReporter::callback(Arc::new(move |update: &ProgressUpdate| {
                let _ = tx.send(update.clone());
                if !update.stage.is_terminal() {
                    set_status(
                        &status_jobs,
                        &status_id,
                        JobStatus::Running {
                            progress: update.percent,
                            stage: update.stage,
                        },
                    );
                }
            }));

            let result = pipeline.run(&request, &reporter, &task_cancel).await;
            let status = match &result {
                Ok(report) => JobStatus::Completed {
                    output_path: report.output_path.clone(),
                },
                Err(e) => status_for(e),
            };
            info!(job_id = %task_id, status = ?status, "Export job finished");
            set_status(&jobs, &task_id, status);
            result
        });

        ExportHandle {
            job_id,
            progress: Some(rx),
            cancel,
            join,
        }
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        let jobs = self.jobs.lock().unwrap_or_else(|p| p.into_inner());
        jobs.get(job_id).cloned()
    }

    /// Jobs not yet finished
    pub fn active_jobs(&self) -> Vec<JobId> {
        let jobs = self.jobs.lock().unwrap_or_else(|p| p.into_inner());
        let mut active: Vec<JobId> = jobs
            .iter()
            .filter(|(_, status)| !status.is_done())
            .map(|(id, _)| id.clone())
            .collect();
        active.sort();
        active
    }

    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }
}

fn status_for(error: &CoreError) -> JobStatus {
    match error {
        CoreError::Cancelled => JobStatus::Cancelled,
        other => JobStatus::Failed {
            error: other.to_string(),
        },
    }
}
