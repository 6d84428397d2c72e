use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};

use super::store::ResultStore;
use super::worker::{JobReport, ModelJob, Worker};
use crate::formats::GraspCandidate;
use crate::mining::MinerConfig;
use crate::session::SessionFactory;
use crate::telemetry::{MiningEvent, ProgressStats};

/// Outcome of mining a set of models
#[derive(Debug)]
pub struct MiningRun {
    /// One report per requested model
    pub reports: BTreeMap<String, JobReport>,
    pub duration: Duration,
}

impl MiningRun {
    /// Grasps per model, best first
    pub fn grasps(&self) -> BTreeMap<&str, &[GraspCandidate]> {
        self.reports
            .iter()
            .map(|(model, report)| (model.as_str(), report.grasps.as_slice()))
            .collect()
    }

    pub fn total_grasps(&self) -> usize {
        self.reports.values().map(|r| r.grasps.len()).sum()
    }

    pub fn failed_jobs(&self) -> usize {
        self.reports
            .values()
            .filter(|r| r.status.is_failure())
            .count()
    }
}

/// The JobCoordinator fans model jobs out to workers and gathers the results.
pub struct JobCoordinator {
    factory: Arc<dyn SessionFactory>,
    store: Arc<dyn ResultStore>,
    miner_config: MinerConfig,
    quiet: bool,
}

impl JobCoordinator {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        store: Arc<dyn ResultStore>,
        miner_config: MinerConfig,
        quiet: bool,
    ) -> Self {
        Self {
            factory,
            store,
            miner_config,
            quiet,
        }
    }

    /// Mine every job.
    ///
    /// With `parallelism <= 1` jobs run one after another in input order on
    /// the calling task. Otherwise up to `parallelism` workers run
    /// concurrently, each starting its own simulator session per job. A
    /// failing job never affects the others, and the result always holds an
    /// entry for every requested model.
    pub async fn run(&self, jobs: Vec<ModelJob>, parallelism: usize) -> MiningRun {
        let start_time = Instant::now();
        let jobs = Self::dedup(jobs);
        let models: Vec<String> = jobs.iter().map(|j| j.model.clone()).collect();

        let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel::<MiningEvent>();
        let prog_jh = self.setup_progress_tracking(jobs.len(), telemetry_rx);

        let reports = if parallelism <= 1 || jobs.len() <= 1 {
            info!("Mining {} models sequentially", jobs.len());
            let worker = self.make_worker(telemetry_tx);
            let mut reports = Vec::with_capacity(jobs.len());
            for job in jobs {
                reports.push(worker.run_job(job).await);
            }
            reports
        } else {
            let reports = self.run_pool(jobs, parallelism, telemetry_tx.clone()).await;
            drop(telemetry_tx);
            reports
        };

        // Wait for the progress bar to finish so we don't collide output
        if let Some(jh) = prog_jh {
            let _ = jh.await;
        }

        let mut by_model: BTreeMap<String, JobReport> = reports
            .into_iter()
            .map(|report| (report.model.clone(), report))
            .collect();

        for model in models {
            by_model.entry(model.clone()).or_insert_with(|| {
                warn!("{}: no result reported, marking as failed", model);
                JobReport::failed(&model, "worker terminated unexpectedly")
            });
        }

        let run = MiningRun {
            reports: by_model,
            duration: start_time.elapsed(),
        };

        info!(
            "Mining complete: {} models, {} grasps, {} failed jobs in {:.2}s",
            run.reports.len(),
            run.total_grasps(),
            run.failed_jobs(),
            run.duration.as_secs_f64()
        );

        run
    }

    /// Drop repeated models, keeping the first occurrence
    fn dedup(jobs: Vec<ModelJob>) -> Vec<ModelJob> {
        let mut seen = HashSet::new();
        jobs.into_iter()
            .filter(|job| {
                let fresh = seen.insert(job.model.clone());
                if !fresh {
                    warn!("{}: listed more than once, mining it once", job.model);
                }
                fresh
            })
            .collect()
    }

    fn make_worker(&self, telemetry_tx: mpsc::UnboundedSender<MiningEvent>) -> Worker {
        Worker::new(
            Arc::clone(&self.factory),
            Arc::clone(&self.store),
            self.miner_config.clone(),
            telemetry_tx,
        )
    }

    /// Spawn a bounded pool of workers sharing one job queue
    async fn run_pool(
        &self,
        jobs: Vec<ModelJob>,
        parallelism: usize,
        telemetry_tx: mpsc::UnboundedSender<MiningEvent>,
    ) -> Vec<JobReport> {
        let worker_count = parallelism.min(jobs.len());
        info!(
            "Spawning {} workers for {} models...",
            worker_count,
            jobs.len()
        );

        let queue = Arc::new(Mutex::new(jobs.into_iter().collect::<VecDeque<_>>()));
        let (reports_tx, mut reports_rx) = mpsc::unbounded_channel::<JobReport>();

        let mut worker_handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let worker = self.make_worker(telemetry_tx.clone());
            let queue = Arc::clone(&queue);
            let reports_tx = reports_tx.clone();
            worker_handles.push(tokio::spawn(async move {
                worker.run(queue, reports_tx).await;
            }));
        }
        drop(reports_tx);

        let worker_results = futures::future::join_all(worker_handles).await;
        for (i, result) in worker_results.iter().enumerate() {
            if let Err(e) = result {
                warn!("Worker {} panicked: {:#}", i, e);
            }
        }

        let mut reports = Vec::new();
        while let Some(report) = reports_rx.recv().await {
            reports.push(report);
        }
        reports
    }

    /// Setup progress tracking with progress bars
    fn setup_progress_tracking(
        &self,
        total_jobs: usize,
        mut telemetry_rx: mpsc::UnboundedReceiver<MiningEvent>,
    ) -> Option<tokio::task::JoinHandle<()>> {
        if self.quiet {
            return None;
        }

        let multi_progress = MultiProgress::new();

        let jobs_bar = multi_progress.add(ProgressBar::new(total_jobs as u64));
        jobs_bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] Models: [{bar:30.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );

        let eval_bar = multi_progress.add(ProgressBar::new_spinner());
        eval_bar.set_style(
            ProgressStyle::default_spinner()
                .template("[{elapsed_precise}] Grasps: {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );

        // Spawn telemetry processing task
        Some(tokio::spawn(async move {
            let mut stats = ProgressStats::new();

            while let Some(event) = telemetry_rx.recv().await {
                stats.update(&event);

                jobs_bar.set_position(stats.jobs_completed as u64);
                jobs_bar.set_message(format!(
                    "{} running, {} failed",
                    stats.jobs_started.saturating_sub(stats.jobs_completed),
                    stats.jobs_failed
                ));

                let (p50, _, p99) = stats.get_percentiles();
                eval_bar.set_message(format!(
                    "{} evaluated, {} stable, {} kept | p50: {}ms, p99: {}ms",
                    stats.evaluations,
                    stats.stable,
                    stats.grasps_kept,
                    p50.unwrap_or(0),
                    p99.unwrap_or(0)
                ));
            }

            jobs_bar.finish_with_message("All models completed");
            eval_bar.finish();
        }))
    }
}
