//! Predefined grasp database reader
//!
//! The file is a sequence of line pairs. The first line of a pair holds the
//! joint values, the second the hand pose:
//!
//! ```text
//! 5 <dof_1> <dof_2> ... <dof_n>
//! 0 <x_mm> <y_mm> <z_mm> <qw> <qx> <qy> <qz>
//! ```
//!
//! Values are space separated and may use a decimal comma. A trailing line
//! without a partner is ignored.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs;

use super::pose::{GraspCandidate, JointConfiguration, Pose};
use crate::config::QUATERNION_TOLERANCE;
use crate::error::{FormatError, FormatErrorKind};

/// Type code of a joint-values line
pub const POSE_DOF_TYPE: i64 = 5;

/// Type code of a pose line: 3D position followed by a full quaternion
pub const SPACE_COMPLETE_TYPE: i64 = 0;

/// One grasp read from a predefined grasp file, already in canonical units
#[derive(Debug, Clone, PartialEq)]
pub struct PredefinedEntry {
    pub dofs: JointConfiguration,
    pub pose: Pose,
}

impl PredefinedEntry {
    /// Unscored candidate used to seed the search. Quaternions that drifted
    /// off unit length are rescaled.
    pub fn into_candidate(self) -> GraspCandidate {
        let pose = if self.pose.is_normalized(QUATERNION_TOLERANCE) {
            self.pose
        } else {
            self.pose.normalized()
        };
        GraspCandidate::new(pose, self.dofs)
    }
}

/// Parse predefined grasps from text
pub fn parse(text: &str) -> Result<Vec<PredefinedEntry>, FormatError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut entries = Vec::with_capacity(lines.len() / 2);

    for (pair_idx, pair) in lines.chunks_exact(2).enumerate() {
        let dofs_line_no = pair_idx * 2 + 1;
        let pose_line_no = dofs_line_no + 1;

        let dofs = parse_line(pair[0], dofs_line_no, "dofs", POSE_DOF_TYPE)?;
        let values = parse_line(pair[1], pose_line_no, "pose", SPACE_COMPLETE_TYPE)?;

        let raw: [f64; 7] = values
            .as_slice()
            .try_into()
            .map_err(|_| FormatError::new(pose_line_no, FormatErrorKind::PoseArity(values.len())))?;

        entries.push(PredefinedEntry {
            dofs,
            pose: Pose::from_raw_mm_wxyz(raw),
        });
    }

    Ok(entries)
}

/// Read and parse a predefined grasp file
pub async fn load(path: &Path) -> Result<Vec<PredefinedEntry>> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read grasps file {}", path.display()))?;

    let entries = parse(&text)
        .with_context(|| format!("Malformed grasps file {}", path.display()))?;

    Ok(entries)
}

/// Encode a candidate back into the predefined grasp line pair
pub fn encode(candidate: &GraspCandidate) -> String {
    let dofs: Vec<String> = candidate.dofs.iter().map(|v| v.to_string()).collect();
    let pose: Vec<String> = candidate
        .pose
        .to_raw_mm_wxyz()
        .iter()
        .map(|v| v.to_string())
        .collect();

    format!(
        "{} {}\n{} {}\n",
        POSE_DOF_TYPE,
        dofs.join(" "),
        SPACE_COMPLETE_TYPE,
        pose.join(" ")
    )
}

/// Split a line into its type code and values, checking the code
fn parse_line(
    line: &str,
    line_no: usize,
    line_kind: &'static str,
    expected: i64,
) -> Result<Vec<f64>, FormatError> {
    let normalized = line.replace(',', ".");
    let mut tokens = normalized.split_whitespace();

    let code = tokens
        .next()
        .ok_or_else(|| FormatError::new(line_no, FormatErrorKind::EmptyLine))?;

    if code.parse::<i64>().ok() != Some(expected) {
        return Err(FormatError::new(
            line_no,
            FormatErrorKind::WrongTypeCode {
                line_kind,
                expected,
                found: code.to_string(),
            },
        ));
    }

    tokens
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                FormatError::new(line_no, FormatErrorKind::InvalidNumber(token.to_string()))
            })
        })
        .collect()
}
