//! Candidate proposal strategies
use std::f64::consts::TAU;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use super::miner::MinerConfig;
use crate::formats::pose::quat;
use crate::formats::{GraspCandidate, Pose};
use crate::session::SceneInfo;

/// Seed for one object's search, mixing the run seed with the object name so
/// every job gets its own reproducible sequence regardless of scheduling.
pub fn job_seed(seed: u64, object_id: &str) -> u64 {
    // FNV-1a
    let mut hash = 0xcbf2_9ce4_8422_2325_u64 ^ seed;
    for byte in object_id.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Generates grasp proposals for one scene
pub struct Proposer {
    rng: ChaCha8Rng,
    hand_dofs: usize,
    approach_distance: f64,
}

impl Proposer {
    pub fn new(seed: u64, scene: &SceneInfo) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            hand_dofs: scene.hand_dofs,
            approach_distance: scene.approach_distance,
        }
    }

    fn normal(&mut self) -> f64 {
        self.rng.sample(StandardNormal)
    }

    /// Whether the next proposal should explore instead of refining
    pub fn explore(&mut self, rate: f64) -> bool {
        self.rng.gen_bool(rate.clamp(0.0, 1.0))
    }

    /// Open hand on the approach sphere, facing the object origin
    pub fn random_approach(&mut self) -> GraspCandidate {
        let mut dir = [self.normal(), self.normal(), self.normal()];
        let len = (dir[0] * dir[0] + dir[1] * dir[1] + dir[2] * dir[2]).sqrt();
        if len <= f64::EPSILON {
            dir = [0.0, 0.0, 1.0];
        } else {
            dir = [dir[0] / len, dir[1] / len, dir[2] / len];
        }

        let roll = self.rng.gen_range(0.0..TAU);
        let position = [
            dir[0] * self.approach_distance,
            dir[1] * self.approach_distance,
            dir[2] * self.approach_distance,
        ];
        let orientation = quat::looking_along([-dir[0], -dir[1], -dir[2]], roll);

        GraspCandidate::new(Pose::new(position, orientation), vec![0.0; self.hand_dofs])
    }

    /// Pick one of the elite candidates uniformly
    pub fn choose<'a>(&mut self, elite: &'a [GraspCandidate]) -> Option<&'a GraspCandidate> {
        if elite.is_empty() {
            return None;
        }
        let idx = self.rng.gen_range(0..elite.len());
        elite.get(idx)
    }

    /// Candidate near `parent`: jittered pose, and either jittered joints or,
    /// with `relax_fingers`, randomly relaxed closed joints.
    pub fn perturb(&mut self, parent: &GraspCandidate, config: &MinerConfig) -> GraspCandidate {
        let mut position = parent.pose.position;
        for p in &mut position {
            *p += self.normal() * config.position_sigma;
        }

        let axis = [self.normal(), self.normal(), self.normal()];
        let angle = self.normal() * config.orientation_sigma;
        let orientation = quat::normalize(quat::mul(
            quat::from_axis_angle(axis, angle),
            parent.pose.orientation,
        ));

        let mut dofs = parent.dofs.clone();
        for d in &mut dofs {
            if config.relax_fingers && self.rng.gen_bool(config.relax_probability.clamp(0.0, 1.0)) {
                *d *= self.rng.gen_range(0.0..1.0);
            } else {
                *d += self.normal() * config.dof_sigma;
            }
        }

        GraspCandidate::new(Pose::new(position, orientation), dofs)
    }
}

/// Joint speed ratios to try for each proposed pose
pub fn speed_schedule(config: &MinerConfig) -> Vec<f64> {
    if config.change_speed && !config.speed_ratios.is_empty() {
        config.speed_ratios.clone()
    } else {
        vec![1.0]
    }
}
