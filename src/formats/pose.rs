use serde::{Deserialize, Serialize};

use crate::config::MM_PER_METER;

/// Joint angle/position vector. Its length is fixed by the hand model.
pub type JointConfiguration = Vec<f64>;

/// Hand placement relative to the object
///
/// Position is in meters, orientation is a unit quaternion stored scalar-last
/// (`x, y, z, w`). Serialized as a flat 7-element array in that order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "[f64; 7]", from = "[f64; 7]")]
pub struct Pose {
    pub position: [f64; 3],
    pub orientation: [f64; 4],
}

impl Pose {
    pub fn new(position: [f64; 3], orientation: [f64; 4]) -> Self {
        Self {
            position,
            orientation,
        }
    }

    /// Pose at the origin with identity orientation
    pub fn identity() -> Self {
        Self::new([0.0; 3], quat::IDENTITY)
    }

    pub fn to_array(&self) -> [f64; 7] {
        let [x, y, z] = self.position;
        let [qx, qy, qz, qw] = self.orientation;
        [x, y, z, qx, qy, qz, qw]
    }

    /// Convert a raw predefined-grasp pose into the canonical representation.
    ///
    /// Raw layout is `x y z qw qx qy qz` with the position in millimeters.
    pub fn from_raw_mm_wxyz(raw: [f64; 7]) -> Self {
        let [x, y, z, qw, qx, qy, qz] = raw;
        Self::new(
            [x / MM_PER_METER, y / MM_PER_METER, z / MM_PER_METER],
            [qx, qy, qz, qw],
        )
    }

    /// Inverse of [`Pose::from_raw_mm_wxyz`]
    pub fn to_raw_mm_wxyz(&self) -> [f64; 7] {
        let [x, y, z] = self.position;
        let [qx, qy, qz, qw] = self.orientation;
        [
            x * MM_PER_METER,
            y * MM_PER_METER,
            z * MM_PER_METER,
            qw,
            qx,
            qy,
            qz,
        ]
    }

    pub fn is_normalized(&self, tolerance: f64) -> bool {
        (quat::norm(self.orientation) - 1.0).abs() <= tolerance
    }

    /// Copy of this pose with its quaternion rescaled to unit length
    pub fn normalized(&self) -> Self {
        Self::new(self.position, quat::normalize(self.orientation))
    }
}

impl From<[f64; 7]> for Pose {
    fn from(v: [f64; 7]) -> Self {
        Self::new([v[0], v[1], v[2]], [v[3], v[4], v[5], v[6]])
    }
}

impl From<Pose> for [f64; 7] {
    fn from(pose: Pose) -> Self {
        pose.to_array()
    }
}

/// Grasp quality reported by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Epsilon quality: radius of the largest wrench-space ball
    pub epsilon: f64,
    /// Volume of the grasp wrench space
    pub volume: f64,
}

/// A hand pose plus joint configuration, optionally scored
#[derive(Debug, Clone, PartialEq)]
pub struct GraspCandidate {
    pub pose: Pose,
    pub dofs: JointConfiguration,
    pub quality: Option<QualityMetrics>,
}

impl GraspCandidate {
    pub fn new(pose: Pose, dofs: JointConfiguration) -> Self {
        Self {
            pose,
            dofs,
            quality: None,
        }
    }

    /// Ranking score; unscored candidates rank last
    pub fn score(&self) -> f64 {
        self.quality.map(|q| q.epsilon).unwrap_or(f64::NEG_INFINITY)
    }
}

/// Quaternion helpers, scalar-last `[x, y, z, w]`
pub mod quat {
    pub type Quat = [f64; 4];

    pub const IDENTITY: Quat = [0.0, 0.0, 0.0, 1.0];

    pub fn norm(q: Quat) -> f64 {
        q.iter().map(|c| c * c).sum::<f64>().sqrt()
    }

    pub fn normalize(q: Quat) -> Quat {
        let n = norm(q);
        if n <= f64::EPSILON {
            return IDENTITY;
        }
        [q[0] / n, q[1] / n, q[2] / n, q[3] / n]
    }

    /// Hamilton product `a * b`
    pub fn mul(a: Quat, b: Quat) -> Quat {
        let [ax, ay, az, aw] = a;
        let [bx, by, bz, bw] = b;
        [
            aw * bx + ax * bw + ay * bz - az * by,
            aw * by - ax * bz + ay * bw + az * bx,
            aw * bz + ax * by - ay * bx + az * bw,
            aw * bw - ax * bx - ay * by - az * bz,
        ]
    }

    /// Rotation of `angle` radians about `axis` (need not be unit length)
    pub fn from_axis_angle(axis: [f64; 3], angle: f64) -> Quat {
        let len = (axis[0] * axis[0] + axis[1] * axis[1] + axis[2] * axis[2]).sqrt();
        if len <= f64::EPSILON {
            return IDENTITY;
        }
        let s = (angle / 2.0).sin() / len;
        [axis[0] * s, axis[1] * s, axis[2] * s, (angle / 2.0).cos()]
    }

    /// Rotate vector `v` by unit quaternion `q`
    pub fn rotate(q: Quat, v: [f64; 3]) -> [f64; 3] {
        let p = [v[0], v[1], v[2], 0.0];
        let conj = [-q[0], -q[1], -q[2], q[3]];
        let r = mul(mul(q, p), conj);
        [r[0], r[1], r[2]]
    }

    /// Orientation whose +z axis points along `direction`, rolled by `roll`
    /// radians about that axis.
    pub fn looking_along(direction: [f64; 3], roll: f64) -> Quat {
        let len = (direction[0].powi(2) + direction[1].powi(2) + direction[2].powi(2)).sqrt();
        if len <= f64::EPSILON {
            return from_axis_angle([0.0, 0.0, 1.0], roll);
        }
        let d = [direction[0] / len, direction[1] / len, direction[2] / len];

        // z x d and z . d
        let cross = [-d[1], d[0], 0.0];
        let dot = d[2];
        let align = if dot < -1.0 + 1e-9 {
            [1.0, 0.0, 0.0, 0.0]
        } else {
            normalize([cross[0], cross[1], cross[2], 1.0 + dot])
        };

        normalize(mul(align, from_axis_angle([0.0, 0.0, 1.0], roll)))
    }
}
