//! Batch checkpoints: persisted progress that a later run resumes from.
//!
//! A checkpoint records how many patients of the source list have been processed
//! (`last_processed_index`, which is also the index of the next patient), the ids
//! that completed or failed, and the outcomes recorded so far so that a resumed
//! run can produce a result covering the whole list.

use crate::constants::{CHECKPOINT_FILE_SUFFIX, RESULT_FILE_SUFFIX};
use crate::error::{BatchError, BatchOutcome};
use crate::outcome::PatientOutcome;
use crate::persist::{read_json, write_json_atomic};
use chrono::{DateTime, Utc};
use ihe_wire::PatientRecord;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchCheckpoint {
    pub batch_id: String,
    pub source_ref: String,
    pub last_processed_index: usize,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub outcomes: Vec<PatientOutcome>,
    pub timestamp: DateTime<Utc>,
}

impl BatchCheckpoint {
    /// Snapshot of the outcomes recorded so far.
    pub fn from_outcomes(
        batch_id: &str,
        source_ref: &str,
        outcomes: &[PatientOutcome],
    ) -> Self {
        let (completed, failed): (Vec<&PatientOutcome>, Vec<&PatientOutcome>) =
            outcomes.iter().partition(|o| o.is_completed());
        Self {
            batch_id: batch_id.to_owned(),
            source_ref: source_ref.to_owned(),
            last_processed_index: outcomes.len(),
            completed: completed.iter().map(|o| o.patient_id.clone()).collect(),
            failed: failed.iter().map(|o| o.patient_id.clone()).collect(),
            outcomes: outcomes.to_vec(),
            timestamp: Utc::now(),
        }
    }

    /// `last_processed_index == completed + failed == outcomes`.
    pub fn is_consistent(&self) -> bool {
        self.last_processed_index == self.completed.len() + self.failed.len()
            && self.last_processed_index == self.outcomes.len()
    }

    pub fn save(&self, path: &Path) -> BatchOutcome<()> {
        write_json_atomic(path, self)?;
        tracing::debug!(
            batch_id = %self.batch_id,
            index = self.last_processed_index,
            path = %path.display(),
            "checkpoint written"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> BatchOutcome<Self> {
        read_json(path)
    }

    /// Checks that this checkpoint was taken over `patients` read from `source_ref`.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::CheckpointMismatch`] if the source reference differs, the
    /// index is past the end of the list or breaks the index invariant, or a recorded
    /// outcome names a different patient than the list has at that position.
    pub fn validate_for(&self, source_ref: &str, patients: &[PatientRecord]) -> BatchOutcome<()> {
        if self.source_ref != source_ref {
            return Err(BatchError::CheckpointMismatch(format!(
                "checkpoint source '{}' differs from '{source_ref}'",
                self.source_ref
            )));
        }
        if self.last_processed_index > patients.len() {
            return Err(BatchError::CheckpointMismatch(format!(
                "checkpoint index {} exceeds patient count {}",
                self.last_processed_index,
                patients.len()
            )));
        }
        if !self.is_consistent() {
            return Err(BatchError::CheckpointMismatch(format!(
                "checkpoint index {} does not equal completed ({}) + failed ({}) with {} outcomes",
                self.last_processed_index,
                self.completed.len(),
                self.failed.len(),
                self.outcomes.len()
            )));
        }
        if let Some((index, outcome)) = self
            .outcomes
            .iter()
            .enumerate()
            .find(|(i, o)| o.patient_id != patients[*i].id.trim())
        {
            return Err(BatchError::CheckpointMismatch(format!(
                "outcome {index} is for patient '{}' but the source has '{}'",
                outcome.patient_id,
                patients[index].id.trim()
            )));
        }
        Ok(())
    }
}

pub fn checkpoint_path(dir: &Path, batch_id: &str) -> PathBuf {
    dir.join(format!("{batch_id}{CHECKPOINT_FILE_SUFFIX}"))
}

pub fn result_path(dir: &Path, batch_id: &str) -> PathBuf {
    dir.join(format!("{batch_id}{RESULT_FILE_SUFFIX}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::PatientState;

    fn patient(id: &str) -> PatientRecord {
        PatientRecord {
            id: id.into(),
            id_domain: "1.2.3".into(),
            given: "A".into(),
            family: "B".into(),
            birth_date: None,
            sex: "U".into(),
            street: None,
            city: None,
            state: None,
            postal_code: None,
            country: None,
            phone: None,
        }
    }

    fn outcome(id: &str, state: PatientState) -> PatientOutcome {
        PatientOutcome {
            patient_id: id.into(),
            state,
            registration: None,
            submission: None,
            total_elapsed_ms: 5,
            error: None,
        }
    }

    fn sample() -> BatchCheckpoint {
        BatchCheckpoint::from_outcomes(
            "batch-1",
            "patients.yaml",
            &[
                outcome("P-1", PatientState::SubmissionAccepted),
                outcome("P-2", PatientState::RegistrationRejected),
            ],
        )
    }

    #[test]
    fn from_outcomes_partitions_ids() {
        let cp = sample();
        assert_eq!(cp.last_processed_index, 2);
        assert_eq!(cp.completed, ["P-1"]);
        assert_eq!(cp.failed, ["P-2"]);
        assert!(cp.is_consistent());
    }

    #[test]
    fn write_read_write_is_byte_identical() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let first = dir.path().join("a.json");
        let second = dir.path().join("b.json");

        let cp = sample();
        cp.save(&first).expect("save");
        let loaded = BatchCheckpoint::load(&first).expect("load");
        assert_eq!(loaded, cp);
        loaded.save(&second).expect("save again");

        assert_eq!(
            std::fs::read(&first).expect("read a"),
            std::fs::read(&second).expect("read b")
        );
    }

    #[test]
    fn validate_accepts_matching_source() {
        let patients = vec![patient("P-1"), patient("P-2"), patient("P-3")];
        sample()
            .validate_for("patients.yaml", &patients)
            .expect("valid");
    }

    #[test]
    fn validate_rejects_other_source() {
        let patients = vec![patient("P-1"), patient("P-2")];
        assert!(matches!(
            sample().validate_for("other.yaml", &patients),
            Err(BatchError::CheckpointMismatch(_))
        ));
    }

    #[test]
    fn validate_rejects_index_past_end() {
        let patients = vec![patient("P-1")];
        assert!(matches!(
            sample().validate_for("patients.yaml", &patients),
            Err(BatchError::CheckpointMismatch(_))
        ));
    }

    #[test]
    fn validate_rejects_broken_invariant() {
        let mut cp = sample();
        cp.failed.clear();
        let patients = vec![patient("P-1"), patient("P-2")];
        match cp.validate_for("patients.yaml", &patients) {
            Err(BatchError::CheckpointMismatch(msg)) => assert!(msg.contains("completed")),
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_reordered_source() {
        let patients = vec![patient("P-2"), patient("P-1")];
        assert!(matches!(
            sample().validate_for("patients.yaml", &patients),
            Err(BatchError::CheckpointMismatch(_))
        ));
    }

    #[test]
    fn unknown_fields_are_rejected_on_load() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("cp.json");
        let mut value = serde_json::to_value(sample()).expect("to value");
        value["extra"] = serde_json::json!(1);
        std::fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();
        assert!(matches!(
            BatchCheckpoint::load(&path),
            Err(BatchError::Deserialization { .. })
        ));
    }

    #[test]
    fn paths_use_batch_id() {
        let dir = Path::new("/tmp/cp");
        assert_eq!(
            checkpoint_path(dir, "b1"),
            PathBuf::from("/tmp/cp/b1.checkpoint.json")
        );
        assert_eq!(result_path(dir, "b1"), PathBuf::from("/tmp/cp/b1.result.json"));
    }
}
