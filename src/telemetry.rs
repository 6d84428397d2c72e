use std::collections::BTreeMap;

/// Telemetry events sent from workers to coordinator for progress tracking
#[derive(Debug, Clone)]
pub enum MiningEvent {
    /// Worker started mining a model
    JobStarted,
    /// One grasp was applied in the simulator
    CandidateEvaluated { stable: bool, duration_ms: u64 },
    /// Worker finished a model, successfully or not
    JobCompleted { grasps: usize, failed: bool },
}

/// Statistics aggregated from telemetry events
#[derive(Debug, Default, Clone)]
pub struct ProgressStats {
    pub jobs_started: usize,
    pub jobs_completed: usize,
    pub jobs_failed: usize,
    pub evaluations: u64,
    pub stable: u64,
    pub grasps_kept: u64,
    /// Evaluation count per duration in milliseconds
    pub evaluation_durations_ms: BTreeMap<u64, u64>,
}

impl ProgressStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update stats with a telemetry event
    pub fn update(&mut self, event: &MiningEvent) {
        match event {
            MiningEvent::JobStarted => {
                self.jobs_started += 1;
            }
            MiningEvent::CandidateEvaluated {
                stable,
                duration_ms,
            } => {
                self.evaluations += 1;
                if *stable {
                    self.stable += 1;
                }
                *self.evaluation_durations_ms.entry(*duration_ms).or_insert(0) += 1;
            }
            MiningEvent::JobCompleted { grasps, failed } => {
                self.jobs_completed += 1;
                self.grasps_kept += *grasps as u64;
                if *failed {
                    self.jobs_failed += 1;
                }
            }
        }
    }

    /// Calculate percentile from evaluation durations
    ///
    /// Walks the histogram, so the cost depends on the number of distinct
    /// durations rather than on the number of evaluations.
    pub fn percentile(&self, p: f64) -> Option<u64> {
        if self.evaluation_durations_ms.is_empty() {
            return None;
        }

        let total: u64 = self.evaluation_durations_ms.values().sum();
        let rank = ((p / 100.0) * total as f64).ceil() as u64;
        let rank = rank.clamp(1, total);

        let mut seen = 0;
        for (&duration, &count) in &self.evaluation_durations_ms {
            seen += count;
            if seen >= rank {
                return Some(duration);
            }
        }
        self.evaluation_durations_ms.keys().next_back().copied()
    }

    /// Get p50, p90, p99 percentiles
    pub fn get_percentiles(&self) -> (Option<u64>, Option<u64>, Option<u64>) {
        (
            self.percentile(50.0),
            self.percentile(90.0),
            self.percentile(99.0),
        )
    }
}
