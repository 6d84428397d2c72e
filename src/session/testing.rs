//! Scripted in-memory simulator for tests
//!
//! Grasps are stable when the hand sits above the object (`z > 0`); the
//! epsilon quality grows with height. Failures can be injected per object.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{Outcome, SceneInfo, Session, SessionFactory};
use crate::error::SessionError;
use crate::formats::{Pose, QualityMetrics};

#[derive(Debug, Clone)]
pub struct ScriptedSimulator {
    pub hand_dofs: usize,
    pub approach_distance: f64,
    /// Objects whose session is lost after this many applies
    pub lose_after: HashMap<String, usize>,
    /// Objects that cannot be loaded
    pub unknown_objects: HashSet<String>,
    /// Every n-th apply of a session fails with an evaluation error
    pub reject_every: Option<usize>,
    /// Number of session starts that fail before launches succeed
    pub failing_launches: Arc<AtomicUsize>,
    pub started: Arc<AtomicUsize>,
    pub closed: Arc<AtomicUsize>,
}

impl Default for ScriptedSimulator {
    fn default() -> Self {
        Self {
            hand_dofs: 4,
            approach_distance: 0.2,
            lose_after: HashMap::new(),
            unknown_objects: HashSet::new(),
            reject_every: None,
            failing_launches: Arc::new(AtomicUsize::new(0)),
            started: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl ScriptedSimulator {
    pub fn lose(mut self, object: &str, after_applies: usize) -> Self {
        self.lose_after.insert(object.to_string(), after_applies);
        self
    }

    pub fn unknown(mut self, object: &str) -> Self {
        self.unknown_objects.insert(object.to_string());
        self
    }

    pub fn fail_launches(self, count: usize) -> Self {
        self.failing_launches.store(count, Ordering::SeqCst);
        self
    }

    /// Quality landscape shared by sessions and assertions
    pub fn evaluate(&self, pose: &Pose) -> Outcome {
        let height = pose.position[2] / self.approach_distance;
        if height <= 0.0 {
            return Outcome {
                stable: false,
                quality: None,
                dofs: None,
            };
        }
        let epsilon = height.min(1.0);
        Outcome {
            stable: true,
            quality: Some(QualityMetrics {
                epsilon,
                volume: epsilon * epsilon,
            }),
            dofs: None,
        }
    }

    /// A session not counted by `started`, for driving the miner directly
    pub fn session(&self) -> ScriptedSession {
        ScriptedSession {
            id: "scripted".to_string(),
            sim: self.clone(),
            object: None,
            applies: 0,
            lost: false,
            closed: false,
        }
    }
}

#[async_trait]
impl SessionFactory for ScriptedSimulator {
    async fn start(&self) -> Result<Box<dyn Session>, SessionError> {
        let failing = self
            .failing_launches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(SessionError::Launch("scripted launch failure".to_string()));
        }

        let n = self.started.fetch_add(1, Ordering::SeqCst);
        let mut session = self.session();
        session.id = format!("scripted-{}", n);
        Ok(Box::new(session))
    }
}

pub struct ScriptedSession {
    id: String,
    sim: ScriptedSimulator,
    object: Option<String>,
    applies: usize,
    lost: bool,
    closed: bool,
}

impl ScriptedSession {
    fn check_alive(&self) -> Result<(), SessionError> {
        if self.lost || self.closed {
            return Err(SessionError::Lost("scripted session is gone".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Session for ScriptedSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn load_scene(&mut self, _hand_id: &str, object_id: &str) -> Result<SceneInfo, SessionError> {
        self.check_alive()?;
        if self.sim.unknown_objects.contains(object_id) {
            return Err(SessionError::Evaluation(format!("unknown object {}", object_id)));
        }
        self.object = Some(object_id.to_string());
        self.applies = 0;
        Ok(SceneInfo {
            hand_dofs: self.sim.hand_dofs,
            approach_distance: self.sim.approach_distance,
        })
    }

    async fn apply(&mut self, pose: &Pose, dofs: &[f64], _speed_ratio: f64) -> Result<Outcome, SessionError> {
        self.check_alive()?;
        let object = self
            .object
            .clone()
            .ok_or_else(|| SessionError::Evaluation("no scene loaded".to_string()))?;

        if let Some(limit) = self.sim.lose_after.get(&object)
            && self.applies >= *limit
        {
            self.lost = true;
            return Err(SessionError::Lost("scripted crash".to_string()));
        }
        self.applies += 1;

        if let Some(every) = self.sim.reject_every
            && self.applies % every == 0
        {
            return Err(SessionError::Evaluation("scripted rejection".to_string()));
        }

        if dofs.len() != self.sim.hand_dofs {
            return Err(SessionError::Evaluation(format!(
                "expected {} dofs, got {}",
                self.sim.hand_dofs,
                dofs.len()
            )));
        }

        let mut outcome = self.sim.evaluate(pose);
        if outcome.stable {
            outcome.dofs = Some(dofs.iter().map(|d| d + 0.1).collect());
        }
        Ok(outcome)
    }

    async fn reset(&mut self) -> Result<(), SessionError> {
        self.check_alive()
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if !self.closed {
            self.closed = true;
            self.sim.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
