//! Configuration constants for the grasp miner
//!
//! This module centralizes all tunable parameters and constants used throughout
//! the application.

use std::time::Duration;

// ============================================================================
// Simulator Session Configuration
// ============================================================================

/// Time allowed for a freshly spawned simulator to report that its bridge
/// plugin is ready.
///
/// Set to 60 seconds because the simulator loads its hand and object
/// databases at startup, and under Xvfb the X server has to come up first.
pub const LAUNCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for a single request to a running simulator.
///
/// A request that does not complete in this window leaves the simulator in an
/// unknown state, so the session is treated as lost.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Time given to the simulator to exit after a shutdown request before it is
/// killed.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Screen specification handed to `xvfb-run`.
pub const XVFB_SCREEN: &str = "-screen 0 640x480x24";

/// Simulator executable, relative to the install directory.
pub const SIMULATOR_EXECUTABLE: &str = "bin/graspit_simulator";

/// Name of the bridge plugin loaded into the simulator.
pub const BRIDGE_PLUGIN: &str = "libgraspit_bridge";

// ============================================================================
// Search Configuration
// ============================================================================

pub const DEFAULT_HAND: &str = "ManoHand";

pub const DEFAULT_SEED: u64 = 42;

/// Evaluations without improvement after which an unbounded search stops.
pub const CONVERGENCE_PATIENCE: usize = 200;

/// Probability of proposing a fresh approach pose instead of perturbing an
/// elite candidate.
pub const EXPLORE_RATE: f64 = 0.2;

/// Number of best candidates the search perturbs around.
pub const ELITE_SIZE: usize = 5;

/// Standard deviation of position perturbations, meters.
pub const POSITION_SIGMA: f64 = 0.005;

/// Standard deviation of orientation perturbations, radians.
pub const ORIENTATION_SIGMA: f64 = 0.1;

/// Standard deviation of joint perturbations, radians.
pub const DOF_SIGMA: f64 = 0.05;

/// Probability that a closed finger joint is relaxed when `relax_fingers` is on.
pub const RELAX_PROBABILITY: f64 = 0.5;

/// Joint speed ratios tried per candidate pose when `change_speed` is on.
pub const SPEED_RATIOS: [f64; 4] = [1.0, 0.5, 1.5, 2.0];

// ============================================================================
// Format Configuration
// ============================================================================

/// Allowed deviation of a quaternion's magnitude from 1.
pub const QUATERNION_TOLERANCE: f64 = 1e-3;

/// Millimeters per meter, used when converting predefined grasp positions.
pub const MM_PER_METER: f64 = 1000.0;

// ============================================================================
// Replay Configuration
// ============================================================================

/// Pause between replayed grasps in debug mode.
pub const REPLAY_DELAY: Duration = Duration::from_secs(3);
