//! Per-patient outcomes and the batch result.

use crate::classify::ErrorClass;
use crate::error::BatchOutcome;
use crate::persist::write_json_atomic;
use chrono::{DateTime, Utc};
use ihe_types::MessageId;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// State of one patient's two-phase workflow.
///
/// ```text
/// Pending -> RegistrationSubmitted -> RegistrationAccepted -> SubmissionSubmitted -> SubmissionAccepted
///                                  \-> RegistrationRejected                       \-> SubmissionRejected
/// ```
///
/// A phase that fails before anything is sent (invalid data, missing document or
/// assertion) moves straight from `Pending` / `RegistrationAccepted` to the rejected state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatientState {
    Pending,
    RegistrationSubmitted,
    RegistrationAccepted,
    RegistrationRejected,
    SubmissionSubmitted,
    SubmissionAccepted,
    SubmissionRejected,
}

impl PatientState {
    pub fn can_transition_to(self, next: PatientState) -> bool {
        use PatientState::*;
        matches!(
            (self, next),
            (Pending, RegistrationSubmitted)
                | (Pending, RegistrationRejected)
                | (RegistrationSubmitted, RegistrationAccepted)
                | (RegistrationSubmitted, RegistrationRejected)
                | (RegistrationAccepted, SubmissionSubmitted)
                | (RegistrationAccepted, SubmissionRejected)
                | (SubmissionSubmitted, SubmissionAccepted)
                | (SubmissionSubmitted, SubmissionRejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::RegistrationRejected | Self::SubmissionAccepted | Self::SubmissionRejected
        )
    }

    /// Done: both phases accepted.
    pub fn is_completed(self) -> bool {
        self == Self::SubmissionAccepted
    }
}

/// Result of one phase that produced a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub message_id: MessageId,
    pub accepted: bool,

    /// Status code of the parsed response, if one was received and parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<String>,

    /// Enterprise id assigned by the registry (registration) or the submitted
    /// document's unique id (submission).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,

    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeError {
    pub class: ErrorClass,
    pub message_id: MessageId,
    pub detail: String,
}

/// What happened to one patient. Immutable once appended to a batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientOutcome {
    pub patient_id: String,
    pub state: PatientState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration: Option<PhaseOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission: Option<PhaseOutcome>,
    pub total_elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
}

impl PatientOutcome {
    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    pub fn is_critical(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.class == ErrorClass::Critical)
    }
}

/// Why a batch stopped before the end of its patient list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HaltReason {
    /// A critical failure while processing the patient at `index`.
    CriticalFailure {
        index: usize,
        patient_id: String,
        message_id: MessageId,
        detail: String,
    },
    /// A periodic checkpoint could not be written.
    CheckpointWrite { detail: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchTermination {
    Completed,
    Halted { reason: HaltReason },
    Cancelled { at_index: usize },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: usize,
    pub total_ms: u64,
    pub mean_ms: f64,
}

impl LatencyStats {
    fn from_samples(samples: impl Iterator<Item = u64>) -> Self {
        let (count, total_ms) = samples.fold((0usize, 0u64), |(n, t), ms| (n + 1, t + ms));
        let mean_ms = if count == 0 {
            0.0
        } else {
            total_ms as f64 / count as f64
        };
        Self {
            count,
            total_ms,
            mean_ms,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub unprocessed: usize,
    /// Patients processed in this run per minute of wall-clock time.
    pub throughput_per_minute: f64,
    pub registration: LatencyStats,
    pub submission: LatencyStats,
}

impl BatchStatistics {
    /// `processed_this_run` excludes outcomes carried over from a resumed checkpoint.
    pub fn compute(
        outcomes: &[PatientOutcome],
        total: usize,
        processed_this_run: usize,
        elapsed_ms: u64,
    ) -> Self {
        let completed = outcomes.iter().filter(|o| o.is_completed()).count();
        let failed = outcomes.len() - completed;
        let throughput_per_minute = if elapsed_ms == 0 {
            0.0
        } else {
            processed_this_run as f64 * 60_000.0 / elapsed_ms as f64
        };
        Self {
            total,
            completed,
            failed,
            unprocessed: total.saturating_sub(outcomes.len()),
            throughput_per_minute,
            registration: LatencyStats::from_samples(
                outcomes
                    .iter()
                    .filter_map(|o| o.registration.as_ref().map(|p| p.elapsed_ms)),
            ),
            submission: LatencyStats::from_samples(
                outcomes
                    .iter()
                    .filter_map(|o| o.submission.as_ref().map(|p| p.elapsed_ms)),
            ),
        }
    }
}

/// The record of one batch run, produced at every termination.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub source_ref: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub termination: BatchTermination,
    pub outcomes: Vec<PatientOutcome>,
    pub unprocessed: usize,
    pub statistics: BatchStatistics,
}

impl BatchResult {
    pub fn is_halted(&self) -> bool {
        matches!(self.termination, BatchTermination::Halted { .. })
    }

    pub fn completed_count(&self) -> usize {
        self.statistics.completed
    }

    pub fn failed_count(&self) -> usize {
        self.statistics.failed
    }

    /// Writes the result as pretty JSON, atomically.
    pub fn save(&self, path: &Path) -> BatchOutcome<()> {
        write_json_atomic(path, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phase(elapsed_ms: u64, accepted: bool) -> PhaseOutcome {
        PhaseOutcome {
            message_id: MessageId::new(),
            accepted,
            response_code: Some(if accepted { "AA" } else { "AR" }.into()),
            identifier: None,
            elapsed_ms,
        }
    }

    fn outcome(id: &str, state: PatientState, reg: Option<u64>, sub: Option<u64>) -> PatientOutcome {
        PatientOutcome {
            patient_id: id.into(),
            state,
            registration: reg.map(|ms| phase(ms, true)),
            submission: sub.map(|ms| phase(ms, true)),
            total_elapsed_ms: reg.unwrap_or(0) + sub.unwrap_or(0),
            error: None,
        }
    }

    #[test]
    fn transitions_follow_the_two_phase_machine() {
        use PatientState::*;
        let happy = [
            Pending,
            RegistrationSubmitted,
            RegistrationAccepted,
            SubmissionSubmitted,
            SubmissionAccepted,
        ];
        for pair in happy.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{pair:?}");
        }
        assert!(RegistrationSubmitted.can_transition_to(RegistrationRejected));
        assert!(SubmissionSubmitted.can_transition_to(SubmissionRejected));

        assert!(!Pending.can_transition_to(SubmissionSubmitted));
        assert!(!RegistrationRejected.can_transition_to(SubmissionSubmitted));
        assert!(!SubmissionAccepted.can_transition_to(Pending));

        assert!(SubmissionAccepted.is_completed());
        assert!(RegistrationRejected.is_terminal());
        assert!(!RegistrationAccepted.is_terminal());
    }

    #[test]
    fn statistics_count_and_average_per_phase() {
        let outcomes = vec![
            outcome("a", PatientState::SubmissionAccepted, Some(100), Some(300)),
            outcome("b", PatientState::RegistrationRejected, Some(200), None),
            outcome("c", PatientState::SubmissionAccepted, Some(300), Some(500)),
        ];
        let stats = BatchStatistics::compute(&outcomes, 5, 3, 60_000);
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.unprocessed, 2);
        assert_eq!(stats.registration.count, 3);
        assert_eq!(stats.registration.total_ms, 600);
        assert!((stats.registration.mean_ms - 200.0).abs() < f64::EPSILON);
        assert_eq!(stats.submission.count, 2);
        assert!((stats.submission.mean_ms - 400.0).abs() < f64::EPSILON);
        assert!((stats.throughput_per_minute - 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_batch_statistics_are_zero() {
        let stats = BatchStatistics::compute(&[], 0, 0, 0);
        assert_eq!(stats, BatchStatistics::default());
    }

    #[test]
    fn termination_serializes_with_tags() {
        let halted = BatchTermination::Halted {
            reason: HaltReason::CheckpointWrite {
                detail: "disk full".into(),
            },
        };
        let json = serde_json::to_value(&halted).expect("serialize");
        assert_eq!(json["status"], "halted");
        assert_eq!(json["reason"]["kind"], "checkpoint_write");
        let back: BatchTermination = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, halted);
    }
}
