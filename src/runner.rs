//! High-level runner API for grasp mining.
//!
//! This module hides the setup of simulator launchers, result stores and the
//! job coordinator behind two calls: [`run_mining`] for a mining run and
//! [`replay_grasps`] for visually checking saved results.
//!
//! This is the primary API for external users and for the CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::io::read_models_file;
use crate::session::with_session;

// Building blocks for callers that need more control than `run_mining`
pub use crate::config::REPLAY_DELAY;
pub use crate::coordination::{
    GraspRecord, JobCoordinator, JobReport, JobStatus, LocalResultStore, MiningRun, ModelJob,
    ResultStore, SavedResult,
};
pub use crate::error::{ConfigurationError, FormatError, FormatErrorKind, SessionError};
pub use crate::formats::{
    GraspCandidate, JointConfiguration, Pose, QualityMetrics, pose::quat, predefined,
};
pub use crate::mining::{GraspMiner, MinerConfig, MinerConfigBuilder, MiningReport};
pub use crate::session::{
    DisplayMode, Outcome, ProcessLauncher, Scene, SceneInfo, Session, SessionFactory,
    SimulatorSettings, SimulatorSettingsBuilder,
};

/// What to do when the predefined grasps file cannot be parsed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SeedErrorPolicy {
    /// Report the problem and mine without seeds
    #[default]
    Ignore,
    /// Fail the run before any job starts
    Abort,
}

/// Arguments for running a mining operation
#[derive(Clone)]
pub struct MineArgs {
    // Simulator
    pub simulator: SimulatorSettings,

    // Inputs
    pub models: Vec<String>,
    pub models_file: Option<PathBuf>,
    pub grasps_file: Option<PathBuf>,
    pub seed_errors: SeedErrorPolicy,

    // Output
    pub output_dir: Option<PathBuf>,

    // Search
    pub miner: MinerConfig,
    pub parallelism: usize,

    pub quiet: bool,

    // Test-only: inject a session factory instead of launching processes
    #[cfg(test)]
    pub test_factory: Option<Arc<dyn SessionFactory>>,
}

/// Per-model line of the run summary
#[derive(Debug, Clone)]
pub struct ModelSummary {
    pub model: String,
    pub status: JobStatus,
    pub grasps: Vec<GraspCandidate>,
    pub evaluations: usize,
    /// Evaluations the simulator rejected
    pub failures: usize,
    pub output: Option<PathBuf>,
    pub duration: Duration,
}

/// Result of a completed mining run
#[derive(Debug)]
pub struct MiningSummary {
    /// One entry per requested model, sorted by model name
    pub models: Vec<ModelSummary>,
    pub seeds_loaded: usize,
    pub output_dir: PathBuf,
    pub duration: Duration,
}

impl MiningSummary {
    pub fn total_grasps(&self) -> usize {
        self.models.iter().map(|m| m.grasps.len()).sum()
    }

    pub fn failed_jobs(&self) -> usize {
        self.models.iter().filter(|m| m.status.is_failure()).count()
    }

    pub fn get(&self, model: &str) -> Option<&ModelSummary> {
        self.models.iter().find(|m| m.model == model)
    }
}

/// Run a mining operation with the specified arguments
///
/// Setup problems (missing directories or files, no output directory, no
/// models) are returned before any simulator is started. Once jobs are
/// running, failures stay inside their job and show up in the summary.
///
/// # Example
///
/// ```no_run
/// use grasp_miner::runner::{
///     MineArgs, MinerConfigBuilder, SeedErrorPolicy, SimulatorSettingsBuilder, run_mining,
/// };
///
/// # async fn example() -> anyhow::Result<()> {
/// let args = MineArgs {
///     simulator: SimulatorSettingsBuilder::default()
///         .install_dir("/opt/graspit")
///         .plugin_dir("/opt/graspit/plugins")
///         .build()?,
///     models: vec!["glass".to_string(), "mug".to_string()],
///     models_file: None,
///     grasps_file: None,
///     seed_errors: SeedErrorPolicy::Ignore,
///     output_dir: Some("grasps".into()),
///     miner: MinerConfigBuilder::default().max_steps(70_000usize).build()?,
///     parallelism: 2,
///     quiet: true,
/// };
///
/// let summary = run_mining(args).await?;
/// println!("Found {} grasps", summary.total_grasps());
/// # Ok(())
/// # }
/// ```
pub async fn run_mining(args: MineArgs) -> Result<MiningSummary> {
    args.simulator.validate()?;
    if let Some(ref path) = args.models_file {
        check_file(path)?;
    }
    if let Some(ref path) = args.grasps_file {
        check_file(path)?;
    }

    let seeds = match args.grasps_file {
        Some(ref path) => load_seeds(path, args.seed_errors).await?,
        None => Vec::new(),
    };
    let seeds = Arc::new(seeds);

    let output_dir = args
        .output_dir
        .clone()
        .filter(|dir| !dir.as_os_str().is_empty())
        .ok_or(ConfigurationError::MissingOutputDir)?;

    let store = Arc::new(LocalResultStore::create(&output_dir).await?);

    let models = match args.models_file {
        Some(ref path) => read_models_file(path).await?,
        None => args.models.clone(),
    };
    if models.is_empty() {
        return Err(ConfigurationError::NoModels.into());
    }

    #[cfg(test)]
    let factory: Arc<dyn SessionFactory> = match args.test_factory {
        Some(ref factory) => Arc::clone(factory),
        None => Arc::new(ProcessLauncher::new(args.simulator.clone())?),
    };

    #[cfg(not(test))]
    let factory: Arc<dyn SessionFactory> = Arc::new(ProcessLauncher::new(args.simulator.clone())?);

    let coordinator = JobCoordinator::new(factory, store, args.miner.clone(), args.quiet);
    let jobs = models
        .iter()
        .map(|model| ModelJob::new(model.clone(), Arc::clone(&seeds)))
        .collect();

    let run = coordinator.run(jobs, args.parallelism).await;

    let models = run
        .reports
        .into_values()
        .map(|report| ModelSummary {
            model: report.model,
            status: report.status,
            grasps: report.grasps,
            evaluations: report.evaluations,
            failures: report.failures,
            output: report.output,
            duration: report.duration,
        })
        .collect();

    Ok(MiningSummary {
        models,
        seeds_loaded: seeds.len(),
        output_dir,
        duration: run.duration,
    })
}

fn check_file(path: &Path) -> Result<(), ConfigurationError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConfigurationError::MissingFile {
            path: path.to_path_buf(),
        })
    }
}

async fn load_seeds(path: &Path, policy: SeedErrorPolicy) -> Result<Vec<GraspCandidate>> {
    match predefined::load(path).await {
        Ok(entries) => {
            info!("Loaded {} predefined grasps from {}", entries.len(), path.display());
            Ok(entries
                .into_iter()
                .map(predefined::PredefinedEntry::into_candidate)
                .collect())
        }
        Err(e) => match policy {
            SeedErrorPolicy::Abort => Err(e),
            SeedErrorPolicy::Ignore => {
                warn!("Ignoring predefined grasps: {:#}", e);
                Ok(Vec::new())
            }
        },
    }
}

/// Replay saved grasps in a windowed simulator so they can be inspected.
///
/// Each model gets its own session. Every grasp from `<output_dir>/<base>.json`
/// is applied, held for `delay`, then the hand is reset. Missing result files
/// and failing sessions are reported and skipped.
pub async fn replay_grasps(
    settings: &SimulatorSettings,
    models: &[String],
    output_dir: &Path,
    hand_id: &str,
    delay: Duration,
) -> Result<()> {
    let launcher = ProcessLauncher::new(settings.with_display_mode(DisplayMode::Windowed))?;
    let store = LocalResultStore::new(output_dir);
    replay(&launcher, &store, models, hand_id, delay).await;
    Ok(())
}

/// Returns the number of grasps applied
async fn replay(
    factory: &dyn SessionFactory,
    store: &dyn ResultStore,
    models: &[String],
    hand_id: &str,
    delay: Duration,
) -> usize {
    let mut applied = 0;

    for model in models {
        let grasps = match store.load(model).await {
            Ok(grasps) => grasps,
            Err(e) => {
                warn!("{}: nothing to replay: {:#}", model, e);
                continue;
            }
        };

        let replayed = with_session(factory, |mut session| async move {
            let applied = replay_model(session.as_mut(), hand_id, model, &grasps, delay).await;
            (session, applied)
        })
        .await;

        match replayed {
            Ok(n) => applied += n,
            Err(e) => warn!("{}: {}", model, e),
        }
    }

    applied
}

async fn replay_model(
    session: &mut dyn Session,
    hand_id: &str,
    model: &str,
    grasps: &[GraspCandidate],
    delay: Duration,
) -> usize {
    let mut scene = match Scene::load(session, hand_id, model).await {
        Ok(scene) => scene,
        Err(e) => {
            warn!("{}: {}", model, e);
            return 0;
        }
    };

    info!("{}: replaying {} grasps", model, grasps.len());
    let mut applied = 0;
    for grasp in grasps {
        if let Err(e) = scene.apply(grasp, 1.0).await {
            warn!("{}: {}", model, e);
            if e.is_fatal() {
                break;
            }
            continue;
        }
        applied += 1;
        tokio::time::sleep(delay).await;
        if let Err(e) = scene.reset().await {
            warn!("{}: {}", model, e);
            if e.is_fatal() {
                break;
            }
        }
    }
    applied
}
