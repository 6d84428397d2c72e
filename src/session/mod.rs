//! Simulator sessions
//!
//! A [`Session`] is one live connection to a simulator process. Higher layers
//! only see scene manipulation: load a hand and object, apply a grasp, reset.
//! Process management and the wire protocol stay behind [`SessionFactory`].

pub mod bridge;
pub mod process;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::SessionError;
use crate::formats::{GraspCandidate, JointConfiguration, Pose, QualityMetrics};

pub use process::{ProcessLauncher, SimulatorSettings, SimulatorSettingsBuilder};

/// How the simulator is displayed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DisplayMode {
    /// Interactive window
    #[default]
    Windowed,
    /// No display at all
    Headless,
    /// Headless, rendering into an Xvfb virtual framebuffer
    VirtualFramebuffer,
}

impl DisplayMode {
    /// Resolve the CLI flags; the virtual framebuffer wins when both are set
    pub fn from_flags(headless: bool, xvfb: bool) -> Self {
        match (headless, xvfb) {
            (_, true) => DisplayMode::VirtualFramebuffer,
            (true, false) => DisplayMode::Headless,
            (false, false) => DisplayMode::Windowed,
        }
    }
}

/// Description of a loaded hand/object scene
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneInfo {
    /// Length of the hand's joint configuration vector
    pub hand_dofs: usize,
    /// Distance from the object origin at which approach poses start, meters
    pub approach_distance: f64,
}

/// Result of applying a grasp in the simulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub stable: bool,
    #[serde(default)]
    pub quality: Option<QualityMetrics>,
    /// Joint configuration the hand settled in after closing
    #[serde(default)]
    pub dofs: Option<JointConfiguration>,
}

/// One live connection to the simulator
#[async_trait]
pub trait Session: Send {
    fn id(&self) -> &str;

    /// Load a hand and an object into a fresh scene
    async fn load_scene(&mut self, hand_id: &str, object_id: &str)
    -> Result<SceneInfo, SessionError>;

    /// Place the hand, set its joints and close it at the given speed ratio
    async fn apply(
        &mut self,
        pose: &Pose,
        dofs: &[f64],
        speed_ratio: f64,
    ) -> Result<Outcome, SessionError>;

    /// Put the hand back to its initial state
    async fn reset(&mut self) -> Result<(), SessionError>;

    /// Terminate the simulator. Safe to call more than once.
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Starts simulator sessions; one per mining job
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn start(&self) -> Result<Box<dyn Session>, SessionError>;
}

/// Start a session, hand it to `f`, and close it once `f` hands it back.
///
/// Close failures are only logged. If `f` panics or is cancelled the session
/// is dropped, which kills a process-backed simulator.
pub async fn with_session<T, F, Fut>(factory: &dyn SessionFactory, f: F) -> Result<T, SessionError>
where
    F: FnOnce(Box<dyn Session>) -> Fut,
    Fut: Future<Output = (Box<dyn Session>, T)>,
{
    let session = factory.start().await?;
    let (mut session, value) = f(session).await;

    if let Err(e) = session.close().await {
        warn!("Session {}: close failed: {}", session.id(), e);
    }
    Ok(value)
}

/// A hand/object scene loaded in a session
pub struct Scene<'s> {
    session: &'s mut dyn Session,
    info: SceneInfo,
    object_id: String,
}

impl<'s> Scene<'s> {
    pub async fn load(
        session: &'s mut dyn Session,
        hand_id: &str,
        object_id: &str,
    ) -> Result<Self, SessionError> {
        let info = session.load_scene(hand_id, object_id).await?;
        Ok(Self {
            session,
            info,
            object_id: object_id.to_string(),
        })
    }

    pub fn info(&self) -> &SceneInfo {
        &self.info
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    pub fn session_id(&self) -> &str {
        self.session.id()
    }

    pub async fn apply(
        &mut self,
        candidate: &GraspCandidate,
        speed_ratio: f64,
    ) -> Result<Outcome, SessionError> {
        self.session
            .apply(&candidate.pose, &candidate.dofs, speed_ratio)
            .await
    }

    pub async fn reset(&mut self) -> Result<(), SessionError> {
        self.session.reset().await
    }
}
