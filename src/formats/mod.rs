//! Grasp representations and the predefined grasp file format

pub mod pose;
pub mod predefined;

pub use pose::{GraspCandidate, JointConfiguration, Pose, QualityMetrics};
