use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};
use uuid::Uuid;

use super::store::ResultStore;
use crate::error::SessionError;
use crate::formats::GraspCandidate;
use crate::mining::{GraspMiner, MinerConfig, MiningReport};
use crate::session::{Scene, Session, SessionFactory, with_session};
use crate::telemetry::MiningEvent;

/// One object model to mine, with the seeds to start from
#[derive(Debug, Clone)]
pub struct ModelJob {
    pub model: String,
    pub seeds: Arc<Vec<GraspCandidate>>,
}

impl ModelJob {
    pub fn new(model: impl Into<String>, seeds: Arc<Vec<GraspCandidate>>) -> Self {
        Self {
            model: model.into(),
            seeds,
        }
    }
}

/// How a job ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Completed,
    /// The session was lost mid-search; grasps found before are kept
    Partial(String),
    Failed(String),
}

impl JobStatus {
    pub fn is_failure(&self) -> bool {
        !matches!(self, JobStatus::Completed)
    }
}

/// Result of one job
#[derive(Debug, Clone)]
pub struct JobReport {
    pub model: String,
    pub status: JobStatus,
    /// Best first
    pub grasps: Vec<GraspCandidate>,
    pub evaluations: usize,
    pub failures: usize,
    pub output: Option<PathBuf>,
    pub duration: Duration,
}

impl JobReport {
    pub fn failed(model: &str, reason: impl Into<String>) -> Self {
        Self {
            model: model.to_string(),
            status: JobStatus::Failed(reason.into()),
            grasps: Vec::new(),
            evaluations: 0,
            failures: 0,
            output: None,
            duration: Duration::ZERO,
        }
    }
}

/// Worker that mines models, one simulator session per model
pub struct Worker {
    pub worker_id: String,
    pub factory: Arc<dyn SessionFactory>,
    pub store: Arc<dyn ResultStore>,
    pub miner_config: MinerConfig,
    pub telemetry_tx: mpsc::UnboundedSender<MiningEvent>,
}

impl Worker {
    /// Create a new worker with a random UUID
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        store: Arc<dyn ResultStore>,
        miner_config: MinerConfig,
        telemetry_tx: mpsc::UnboundedSender<MiningEvent>,
    ) -> Self {
        Self {
            worker_id: Uuid::new_v4().to_string(),
            factory,
            store,
            miner_config,
            telemetry_tx,
        }
    }

    /// Run the worker loop until the queue is empty, reporting each job as
    /// it finishes
    pub async fn run(
        &self,
        queue: Arc<Mutex<VecDeque<ModelJob>>>,
        reports_tx: mpsc::UnboundedSender<JobReport>,
    ) {
        loop {
            let next = queue.lock().await.pop_front();
            let Some(job) = next else {
                break;
            };

            let report = self.run_job(job).await;
            if reports_tx.send(report).is_err() {
                warn!("Worker {}: result receiver closed", self.worker_id);
                break;
            }
        }
    }

    /// Mine one model start to finish. Never fails: every error ends up in
    /// the report's status.
    pub async fn run_job(&self, job: ModelJob) -> JobReport {
        let start = Instant::now();
        let _ = self.telemetry_tx.send(MiningEvent::JobStarted);
        info!("Worker {}: mining {}", self.worker_id, job.model);

        let mut report = match self.mine_in_session(&job).await {
            Ok(mined) => {
                let status = match mined.lost {
                    Some(e) => JobStatus::Partial(e.to_string()),
                    None => JobStatus::Completed,
                };
                JobReport {
                    model: job.model.clone(),
                    status,
                    grasps: mined.grasps,
                    evaluations: mined.evaluations,
                    failures: mined.failures,
                    output: None,
                    duration: Duration::ZERO,
                }
            }
            Err(e) => {
                warn!("{}: job failed: {}", job.model, e);
                JobReport::failed(&job.model, e.to_string())
            }
        };

        // A job that failed before mining anything leaves earlier results alone
        let skip_save = matches!(report.status, JobStatus::Failed(_)) && report.grasps.is_empty();
        if !skip_save {
            match self.store.save(&job.model, &report.grasps).await {
                Ok(saved) => report.output = Some(saved.path),
                Err(e) => {
                    warn!("{}: failed to save grasps: {:#}", job.model, e);
                    report.status = JobStatus::Failed(format!("{:#}", e));
                }
            }
        }

        report.duration = start.elapsed();
        let _ = self.telemetry_tx.send(MiningEvent::JobCompleted {
            grasps: report.grasps.len(),
            failed: report.status.is_failure(),
        });

        report
    }

    /// Start a session, mine, and close the session whatever happened
    async fn mine_in_session(&self, job: &ModelJob) -> Result<MiningReport, SessionError> {
        with_session(self.factory.as_ref(), |mut session| async move {
            let result = self.mine(session.as_mut(), job).await;
            (session, result)
        })
        .await?
    }

    async fn mine(
        &self,
        session: &mut dyn Session,
        job: &ModelJob,
    ) -> Result<MiningReport, SessionError> {
        let mut scene = Scene::load(session, &self.miner_config.hand_id, &job.model).await?;
        info!(
            "{}: scene loaded in session {} ({} hand dofs)",
            job.model,
            scene.session_id(),
            scene.info().hand_dofs
        );

        let miner = GraspMiner::new(self.miner_config.clone()).with_telemetry(self.telemetry_tx.clone());
        Ok(miner.mine(&mut scene, &job.seeds).await)
    }
}
