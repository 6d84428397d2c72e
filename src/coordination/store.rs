use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::formats::{GraspCandidate, JointConfiguration, Pose, QualityMetrics};
use crate::io::model_base_name;

/// One grasp as written to a model's result file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraspRecord {
    pub body: String,
    /// Position in meters followed by the quaternion, scalar last
    pub pose: Pose,
    pub dofs: JointConfiguration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityMetrics>,
}

impl GraspRecord {
    pub fn new(body: &str, grasp: &GraspCandidate) -> Self {
        Self {
            body: body.to_string(),
            pose: grasp.pose,
            dofs: grasp.dofs.clone(),
            quality: grasp.quality,
        }
    }

    pub fn into_candidate(self) -> GraspCandidate {
        GraspCandidate {
            pose: self.pose,
            dofs: self.dofs,
            quality: self.quality,
        }
    }
}

/// Where a model's grasps were written
#[derive(Debug, Clone, PartialEq)]
pub struct SavedResult {
    pub path: PathBuf,
    pub count: usize,
}

/// Trait for persisting mining results
///
/// Each model's grasps are written once, as a whole, after its job finishes.
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    /// Write the grasps of a model, replacing any previous result
    async fn save(&self, model_id: &str, grasps: &[GraspCandidate]) -> Result<SavedResult>;

    /// Read the grasps previously saved for a model
    async fn load(&self, model_id: &str) -> Result<Vec<GraspCandidate>>;
}

/// Local filesystem implementation of ResultStore
///
/// Directory structure:
///   {output_dir}/{model_base_name}.json
pub struct LocalResultStore {
    output_dir: PathBuf,
}

impl LocalResultStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Create the output directory up front and return a store writing into it
    pub async fn create(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(output_dir);
        fs::create_dir_all(&store.output_dir).await.with_context(|| {
            format!(
                "Failed to create output directory {}",
                store.output_dir.display()
            )
        })?;
        Ok(store)
    }

    /// Get the result file path for a model
    pub fn result_path(&self, model_id: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.json", model_base_name(model_id)))
    }
}

#[async_trait::async_trait]
impl ResultStore for LocalResultStore {
    async fn save(&self, model_id: &str, grasps: &[GraspCandidate]) -> Result<SavedResult> {
        fs::create_dir_all(&self.output_dir)
            .await
            .context("Failed to create output directory")?;

        let path = self.result_path(model_id);
        let body = model_base_name(model_id);

        info!(
            "{}: saving {} grasps in {}",
            body,
            grasps.len(),
            path.display()
        );

        let records: Vec<GraspRecord> = grasps.iter().map(|g| GraspRecord::new(&body, g)).collect();
        let json = serde_json::to_string_pretty(&records).context("Failed to serialize grasps")?;

        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write result file {}", path.display()))?;

        Ok(SavedResult {
            path,
            count: grasps.len(),
        })
    }

    async fn load(&self, model_id: &str) -> Result<Vec<GraspCandidate>> {
        let path = self.result_path(model_id);

        let contents = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read result file {}", path.display()))?;

        let records: Vec<GraspRecord> =
            serde_json::from_str(&contents).context("Failed to parse result file")?;

        Ok(records.into_iter().map(GraspRecord::into_candidate).collect())
    }
}
