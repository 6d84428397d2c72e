use std::time::Instant;

use derive_builder::Builder;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::strategy::{Proposer, job_seed, speed_schedule};
use crate::config::{
    CONVERGENCE_PATIENCE, DEFAULT_HAND, DEFAULT_SEED, DOF_SIGMA, ELITE_SIZE, EXPLORE_RATE,
    ORIENTATION_SIGMA, POSITION_SIGMA, RELAX_PROBABILITY, SPEED_RATIOS,
};
use crate::error::SessionError;
use crate::formats::GraspCandidate;
use crate::session::Scene;
use crate::telemetry::MiningEvent;

/// Search limits and strategy switches
#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct MinerConfig {
    #[builder(setter(into))]
    pub hand_id: String,
    /// Search evaluations per object; 0 runs until convergence
    pub max_steps: usize,
    /// Best grasps kept per object; 0 keeps all
    pub max_grasps: usize,
    /// Randomly relax closed finger joints when refining a grasp
    pub relax_fingers: bool,
    /// Try every ratio in `speed_ratios` for each proposed pose
    pub change_speed: bool,
    pub seed: u64,
    pub position_sigma: f64,
    pub orientation_sigma: f64,
    pub dof_sigma: f64,
    pub relax_probability: f64,
    pub speed_ratios: Vec<f64>,
    /// Evaluations without improvement that end an unbounded search
    pub patience: usize,
    pub explore_rate: f64,
    pub elite_size: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            hand_id: DEFAULT_HAND.to_string(),
            max_steps: 0,
            max_grasps: 0,
            relax_fingers: false,
            change_speed: false,
            seed: DEFAULT_SEED,
            position_sigma: POSITION_SIGMA,
            orientation_sigma: ORIENTATION_SIGMA,
            dof_sigma: DOF_SIGMA,
            relax_probability: RELAX_PROBABILITY,
            speed_ratios: SPEED_RATIOS.to_vec(),
            patience: CONVERGENCE_PATIENCE,
            explore_rate: EXPLORE_RATE,
            elite_size: ELITE_SIZE,
        }
    }
}

/// What one mining run produced
#[derive(Debug, Clone, Default)]
pub struct MiningReport {
    /// Stable grasps, best first
    pub grasps: Vec<GraspCandidate>,
    /// Stable grasps discovered before truncation to `max_grasps`
    pub discovered: usize,
    pub evaluations: usize,
    /// Evaluations the simulator rejected
    pub failures: usize,
    /// Set when the session died and the search was cut short
    pub lost: Option<SessionError>,
}

/// Bookkeeping for a single search
#[derive(Default)]
struct SearchState {
    found: Vec<GraspCandidate>,
    /// Best candidates, highest score first
    elite: Vec<GraspCandidate>,
    best: f64,
    since_improvement: usize,
    evaluations: usize,
    failures: usize,
}

impl SearchState {
    fn new() -> Self {
        Self {
            best: f64::NEG_INFINITY,
            ..Default::default()
        }
    }

    fn record(&mut self, candidate: GraspCandidate, elite_size: usize) {
        let score = candidate.score();
        if score > self.best {
            self.best = score;
            self.since_improvement = 0;
        }

        let pos = self.elite.partition_point(|c| c.score() >= score);
        if pos < elite_size {
            self.elite.insert(pos, candidate.clone());
            self.elite.truncate(elite_size);
        }
        self.found.push(candidate);
    }
}

/// Searches hand configurations for stable grasps of one object
pub struct GraspMiner {
    config: MinerConfig,
    telemetry_tx: Option<mpsc::UnboundedSender<MiningEvent>>,
}

impl GraspMiner {
    pub fn new(config: MinerConfig) -> Self {
        Self {
            config,
            telemetry_tx: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry_tx: mpsc::UnboundedSender<MiningEvent>) -> Self {
        self.telemetry_tx = Some(telemetry_tx);
        self
    }

    pub fn config(&self) -> &MinerConfig {
        &self.config
    }

    /// Mine grasps for the object loaded in `scene`.
    ///
    /// Seeds are evaluated first, at every ratio of the speed schedule, and
    /// do not count against `max_steps`. Only a lost session ends the search
    /// early; rejected evaluations are counted and skipped.
    pub async fn mine(&self, scene: &mut Scene<'_>, seeds: &[GraspCandidate]) -> MiningReport {
        let object_id = scene.object_id().to_string();
        let mut proposer = Proposer::new(job_seed(self.config.seed, &object_id), scene.info());
        let mut state = SearchState::new();
        let speeds = speed_schedule(&self.config);
        let mut lost = None;

        debug!("{}: evaluating {} seed grasps", object_id, seeds.len());
        'seeds: for seed in seeds {
            for &speed in &speeds {
                if let Err(e) = self.evaluate(scene, seed, speed, &mut state).await {
                    lost = Some(e);
                    break 'seeds;
                }
            }
        }

        if lost.is_none() {
            lost = self.search(scene, &mut proposer, &speeds, &mut state).await.err();
        }

        if let Some(ref e) = lost {
            warn!(
                "{}: search aborted after {} evaluations: {}",
                object_id, state.evaluations, e
            );
        }

        let discovered = state.found.len();
        let grasps = self.select(state.found);

        info!(
            "{}: {} evaluations, {} stable grasps, keeping {}",
            object_id,
            state.evaluations,
            discovered,
            grasps.len()
        );

        MiningReport {
            grasps,
            discovered,
            evaluations: state.evaluations,
            failures: state.failures,
            lost,
        }
    }

    async fn search(
        &self,
        scene: &mut Scene<'_>,
        proposer: &mut Proposer,
        speeds: &[f64],
        state: &mut SearchState,
    ) -> Result<(), SessionError> {
        let mut steps = 0usize;

        loop {
            let explore = proposer.explore(self.config.explore_rate);
            let candidate = match proposer.choose(&state.elite) {
                Some(parent) if !explore => proposer.perturb(parent, &self.config),
                _ => proposer.random_approach(),
            };

            for &speed in speeds {
                if self.exhausted(steps, state) {
                    return Ok(());
                }
                steps += 1;
                state.since_improvement += 1;
                self.evaluate(scene, &candidate, speed, state).await?;
            }
        }
    }

    fn exhausted(&self, steps: usize, state: &SearchState) -> bool {
        if self.config.max_steps > 0 {
            steps >= self.config.max_steps
        } else {
            state.since_improvement >= self.config.patience.max(1)
        }
    }

    /// Apply one candidate and record it if stable. Only fatal session
    /// errors are returned.
    async fn evaluate(
        &self,
        scene: &mut Scene<'_>,
        candidate: &GraspCandidate,
        speed: f64,
        state: &mut SearchState,
    ) -> Result<(), SessionError> {
        let start = Instant::now();
        let result = scene.apply(candidate, speed).await;
        let duration_ms = start.elapsed().as_millis() as u64;
        state.evaluations += 1;

        let stable = match result {
            Ok(outcome) => {
                let stable = outcome.stable;
                if stable {
                    state.record(
                        GraspCandidate {
                            pose: candidate.pose,
                            dofs: outcome.dofs.unwrap_or_else(|| candidate.dofs.clone()),
                            quality: outcome.quality,
                        },
                        self.config.elite_size,
                    );
                }
                stable
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                state.failures += 1;
                debug!("{}: candidate discarded: {}", scene.object_id(), e);
                false
            }
        };

        if let Some(ref tx) = self.telemetry_tx {
            let _ = tx.send(MiningEvent::CandidateEvaluated {
                stable,
                duration_ms,
            });
        }

        match scene.reset().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                debug!("{}: reset failed: {}", scene.object_id(), e);
                Ok(())
            }
        }
    }

    /// Best first, earliest discovery wins ties, truncated to `max_grasps`
    fn select(&self, mut found: Vec<GraspCandidate>) -> Vec<GraspCandidate> {
        found.sort_by(|a, b| b.score().total_cmp(&a.score()));
        if self.config.max_grasps > 0 {
            found.truncate(self.config.max_grasps);
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::{Pose, QualityMetrics};
    use crate::session::testing::ScriptedSimulator;

    fn config(max_steps: usize, max_grasps: usize) -> MinerConfig {
        MinerConfigBuilder::default()
            .max_steps(max_steps)
            .max_grasps(max_grasps)
            .build()
            .unwrap()
    }

    async fn mine(
        sim: &ScriptedSimulator,
        object: &str,
        config: MinerConfig,
        seeds: &[GraspCandidate],
    ) -> MiningReport {
        let mut session = sim.session();
        let mut scene = Scene::load(&mut session, "ManoHand", object).await.unwrap();
        GraspMiner::new(config).mine(&mut scene, seeds).await
    }

    fn assert_best_first(grasps: &[GraspCandidate]) {
        for pair in grasps.windows(2) {
            assert!(pair[0].score() >= pair[1].score());
        }
    }

    #[tokio::test]
    async fn test_respects_step_budget_and_grasp_limit() {
        let sim = ScriptedSimulator::default();
        let report = mine(&sim, "glass", config(60, 3), &[]).await;

        assert_eq!(report.evaluations, 60);
        assert!(report.lost.is_none());
        assert!(report.discovered > 3);
        assert_eq!(report.grasps.len(), 3);
        assert_best_first(&report.grasps);

        for grasp in &report.grasps {
            assert_eq!(grasp.pose.to_array().len(), 7);
            assert_eq!(grasp.dofs.len(), sim.hand_dofs);
            assert!(grasp.quality.is_some());
        }
    }

    #[tokio::test]
    async fn test_unlimited_grasps_returns_everything_found() {
        let sim = ScriptedSimulator::default();
        let report = mine(&sim, "glass", config(40, 0), &[]).await;
        assert_eq!(report.grasps.len(), report.discovered);
        assert_best_first(&report.grasps);
    }

    #[tokio::test]
    async fn test_identical_runs_rank_identically() {
        let sim = ScriptedSimulator::default();
        let a = mine(&sim, "mug", config(50, 10), &[]).await;
        let b = mine(&sim, "mug", config(50, 10), &[]).await;
        assert_eq!(a.grasps, b.grasps);

        let other_seed = MinerConfig {
            seed: 1234,
            ..config(50, 10)
        };
        let c = mine(&sim, "mug", other_seed, &[]).await;
        assert_ne!(a.grasps, c.grasps);
    }

    #[tokio::test]
    async fn test_seeds_are_evaluated_outside_budget() {
        let sim = ScriptedSimulator::default();
        let above = GraspCandidate::new(Pose::new([0.0, 0.0, 0.2], [1.0, 0.0, 0.0, 0.0]), vec![0.5; 4]);
        let below = GraspCandidate::new(Pose::new([0.0, 0.0, -0.2], [0.0, 0.0, 0.0, 1.0]), vec![0.5; 4]);

        let report = mine(&sim, "glass", config(10, 0), &[below, above.clone()]).await;
        assert_eq!(report.evaluations, 12);

        // The seed sits at the top of the landscape
        let best = &report.grasps[0];
        assert_eq!(best.pose, above.pose);
        assert_eq!(best.dofs, vec![0.6; 4]);
        assert_eq!(
            best.quality,
            Some(QualityMetrics {
                epsilon: 1.0,
                volume: 1.0
            })
        );
    }

    #[tokio::test]
    async fn test_ties_keep_discovery_order() {
        let sim = ScriptedSimulator::default();
        let seeds: Vec<GraspCandidate> = (0..3)
            .map(|i| {
                GraspCandidate::new(
                    Pose::new([i as f64 * 0.01, 0.0, 0.5], [0.0, 0.0, 0.0, 1.0]),
                    vec![0.0; 4],
                )
            })
            .collect();

        // Every seed saturates the quality at 1.0
        let report = mine(&sim, "glass", config(1, 3), &seeds).await;
        let xs: Vec<f64> = report.grasps.iter().map(|g| g.pose.position[0]).collect();
        assert_eq!(xs, vec![0.0, 0.01, 0.02]);
    }

    #[tokio::test]
    async fn test_unbounded_search_converges() {
        let sim = ScriptedSimulator::default();
        let config = MinerConfig {
            patience: 25,
            ..config(0, 0)
        };
        let report = mine(&sim, "glass", config, &[]).await;
        assert!(report.evaluations >= 25);
        assert!(report.lost.is_none());
    }

    #[tokio::test]
    async fn test_change_speed_spends_steps_per_ratio() {
        let sim = ScriptedSimulator::default();
        let config = MinerConfig {
            change_speed: true,
            speed_ratios: vec![1.0, 2.0],
            ..config(7, 0)
        };
        let report = mine(&sim, "glass", config, &[]).await;
        assert_eq!(report.evaluations, 7);
    }

    #[tokio::test]
    async fn test_change_speed_applies_to_seeds() {
        let sim = ScriptedSimulator::default();
        let seed = GraspCandidate::new(Pose::new([0.0, 0.0, 0.2], [1.0, 0.0, 0.0, 0.0]), vec![0.5; 4]);
        let config = MinerConfig {
            change_speed: true,
            speed_ratios: vec![0.5, 1.0, 2.0],
            ..config(4, 0)
        };
        let report = mine(&sim, "glass", config, &[seed.clone(), seed]).await;
        assert_eq!(report.evaluations, 2 * 3 + 4);
    }

    #[tokio::test]
    async fn test_rejected_evaluations_do_not_stop_search() {
        let sim = ScriptedSimulator {
            reject_every: Some(3),
            ..ScriptedSimulator::default()
        };
        let report = mine(&sim, "glass", config(30, 0), &[]).await;
        assert_eq!(report.evaluations, 30);
        assert_eq!(report.failures, 10);
        assert!(report.lost.is_none());
    }

    #[tokio::test]
    async fn test_lost_session_keeps_earlier_grasps() {
        let sim = ScriptedSimulator::default().lose("bowl", 20);
        let report = mine(&sim, "bowl", config(100, 0), &[]).await;

        assert!(matches!(report.lost, Some(SessionError::Lost(_))));
        assert_eq!(report.evaluations, 21);
        assert!(report.grasps.len() <= 20);
        assert_best_first(&report.grasps);
    }

    #[tokio::test]
    async fn test_telemetry_per_evaluation() {
        let sim = ScriptedSimulator::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = sim.session();
        let mut scene = Scene::load(&mut session, "ManoHand", "glass").await.unwrap();
        let report = GraspMiner::new(config(15, 0))
            .with_telemetry(tx)
            .mine(&mut scene, &[])
            .await;

        let mut events = 0;
        let mut stable = 0;
        while let Ok(MiningEvent::CandidateEvaluated { stable: s, .. }) = rx.try_recv() {
            events += 1;
            stable += s as usize;
        }
        assert_eq!(events, 15);
        assert_eq!(stable, report.discovered);
    }
}
