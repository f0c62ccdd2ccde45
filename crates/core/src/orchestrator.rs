//! Batch orchestrator: runs each patient's registration and document submission in
//! source order, records outcomes, checkpoints progress and halts on critical failures.

use crate::checkpoint::{checkpoint_path, result_path, BatchCheckpoint};
use crate::classify::{classify, ErrorClass};
use crate::collaborators::{AssertionCache, CollaboratorError, DocumentSource};
use crate::config::EngineConfig;
use crate::engine::{duration_ms, TransportEngine};
use crate::error::{BatchError, BatchOutcome, TransactionError};
use crate::outcome::{
    BatchResult, BatchStatistics, BatchTermination, HaltReason, OutcomeError, PatientOutcome,
    PatientState, PhaseOutcome,
};
use chrono::Utc;
use ihe_types::{MessageId, Oid};
use ihe_wire::{
    build_document_submission, build_registration_request, PatientRecord, SignedAssertion,
    TransactionMessage,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Endpoint URLs for the two transaction types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    pub registration: String,
    pub submission: String,
}

/// Cooperative cancellation, checked before each patient.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Identity and persistence settings for one batch run.
#[derive(Clone, Debug)]
pub struct BatchSettings {
    pub batch_id: String,
    /// Reference to the patient source; a checkpoint only resumes the same source.
    pub source_ref: String,
    pub sender: Oid,
    pub receiver: Oid,
    pub checkpoint_dir: PathBuf,
    pub checkpoint_interval: usize,
    pub assertion_audience: String,
}

impl BatchSettings {
    pub fn from_config(
        config: &EngineConfig,
        batch_id: impl Into<String>,
        source_ref: impl Into<String>,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            source_ref: source_ref.into(),
            sender: config.sender().clone(),
            receiver: config.receiver().clone(),
            checkpoint_dir: config.checkpoint_dir().to_path_buf(),
            checkpoint_interval: config.checkpoint_interval(),
            assertion_audience: config.assertion().audience.clone(),
        }
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        checkpoint_path(&self.checkpoint_dir, &self.batch_id)
    }

    pub fn result_path(&self) -> PathBuf {
        result_path(&self.checkpoint_dir, &self.batch_id)
    }
}

/// Drives one batch. Consumed by [`BatchOrchestrator::run_batch`], which releases the
/// transport and its connections when the batch terminates.
pub struct BatchOrchestrator {
    engine: TransportEngine,
    assertions: AssertionCache,
    documents: Box<dyn DocumentSource>,
    settings: BatchSettings,
    cancel: CancellationToken,
}

struct PhaseRun {
    outcome: Option<PhaseOutcome>,
    error: Option<TransactionError>,
}

impl BatchOrchestrator {
    pub fn new(
        engine: TransportEngine,
        assertions: AssertionCache,
        documents: Box<dyn DocumentSource>,
        settings: BatchSettings,
    ) -> BatchOutcome<Self> {
        if settings.checkpoint_interval == 0 {
            return Err(BatchError::InvalidSettings(
                "checkpoint interval must be at least 1".into(),
            ));
        }
        if settings.batch_id.trim().is_empty() {
            return Err(BatchError::InvalidSettings("batch id is empty".into()));
        }
        Ok(Self {
            engine,
            assertions,
            documents,
            settings,
            cancel: CancellationToken::new(),
        })
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    /// Runs the batch to completion, halt or cancellation.
    ///
    /// With a `checkpoint`, processing resumes at its `last_processed_index` and the
    /// result includes the outcomes it recorded. A checkpoint is written every
    /// `checkpoint_interval` patients and once more at termination; the result file is
    /// written next to it.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::CheckpointMismatch`] if `checkpoint` does not belong to
    /// these patients; nothing is sent in that case.
    ///
    /// Once processing has started a [`BatchResult`] is always returned. Per-patient
    /// failures are recorded in its outcomes; a critical failure or a checkpoint that
    /// cannot be written ends the batch as [`BatchTermination::Halted`].
    pub fn run_batch(
        mut self,
        patients: &[PatientRecord],
        endpoints: &Endpoints,
        checkpoint: Option<BatchCheckpoint>,
    ) -> BatchOutcome<BatchResult> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let batch_id = self.settings.batch_id.clone();

        let mut outcomes = match checkpoint {
            Some(cp) => {
                cp.validate_for(&self.settings.source_ref, patients)?;
                tracing::info!(
                    %batch_id,
                    resumed_from = %cp.batch_id,
                    index = cp.last_processed_index,
                    total = patients.len(),
                    "resuming batch from checkpoint"
                );
                cp.outcomes
            }
            None => Vec::with_capacity(patients.len()),
        };
        let resumed = outcomes.len();

        tracing::info!(%batch_id, total = patients.len(), start = resumed, "batch started");

        let mut termination = BatchTermination::Completed;
        let mut index = resumed;
        while index < patients.len() {
            if self.cancel.is_cancelled() {
                tracing::warn!(%batch_id, index, "batch cancelled");
                termination = BatchTermination::Cancelled { at_index: index };
                break;
            }

            let outcome = self.process_patient(&patients[index], endpoints);
            let halt = outcome.error.as_ref().filter(|e| e.class == ErrorClass::Critical).map(
                |e| HaltReason::CriticalFailure {
                    index,
                    patient_id: outcome.patient_id.clone(),
                    message_id: e.message_id,
                    detail: e.detail.clone(),
                },
            );
            outcomes.push(outcome);
            index += 1;

            if let Some(reason) = halt {
                tracing::error!(%batch_id, index = index - 1, "critical failure, halting batch");
                termination = BatchTermination::Halted { reason };
                break;
            }

            if index % self.settings.checkpoint_interval == 0 && index < patients.len() {
                if let Err(e) = self.write_checkpoint(&outcomes) {
                    tracing::error!(%batch_id, index, "checkpoint write failed, halting batch: {e}");
                    termination = BatchTermination::Halted {
                        reason: HaltReason::CheckpointWrite {
                            detail: e.to_string(),
                        },
                    };
                    break;
                }
            }
        }

        // Final checkpoint on every termination path.
        if let Err(e) = self.write_checkpoint(&outcomes) {
            tracing::error!(%batch_id, index = outcomes.len(), "final checkpoint write failed: {e}");
            if !matches!(termination, BatchTermination::Halted { .. }) {
                termination = BatchTermination::Halted {
                    reason: HaltReason::CheckpointWrite {
                        detail: e.to_string(),
                    },
                };
            }
        }

        let processed_this_run = outcomes.len() - resumed;
        let elapsed_ms = elapsed_ms(clock);
        let statistics =
            BatchStatistics::compute(&outcomes, patients.len(), processed_this_run, elapsed_ms);
        let result = BatchResult {
            batch_id: batch_id.clone(),
            source_ref: self.settings.source_ref.clone(),
            started_at,
            finished_at: Utc::now(),
            termination,
            unprocessed: statistics.unprocessed,
            outcomes,
            statistics,
        };

        let path = self.settings.result_path();
        if let Err(e) = result.save(&path) {
            tracing::error!(%batch_id, path = %path.display(), "failed to write batch result: {e}");
        }

        tracing::info!(
            %batch_id,
            completed = result.statistics.completed,
            failed = result.statistics.failed,
            unprocessed = result.unprocessed,
            halted = result.is_halted(),
            "batch finished"
        );
        Ok(result)
    }

    fn write_checkpoint(&self, outcomes: &[PatientOutcome]) -> BatchOutcome<()> {
        BatchCheckpoint::from_outcomes(&self.settings.batch_id, &self.settings.source_ref, outcomes)
            .save(&self.settings.checkpoint_path())
    }

    fn process_patient(&mut self, patient: &PatientRecord, endpoints: &Endpoints) -> PatientOutcome {
        let clock = Instant::now();
        let patient_id = patient.id.trim().to_owned();
        let span = tracing::info_span!("patient", patient_id = %patient_id);
        let _enter = span.enter();

        let mut state = PatientState::Pending;

        let registration = self.register(patient, &endpoints.registration, &mut state);
        let (registration_outcome, submission_outcome, error) = match registration.error {
            Some(error) => (registration.outcome, None, Some(error)),
            None => {
                let submission = self.submit(patient, &endpoints.submission, &mut state);
                (registration.outcome, submission.outcome, submission.error)
            }
        };

        let error = error.map(|e| {
            let class = classify(&e);
            match class {
                ErrorClass::Critical => tracing::error!(%class, "patient failed: {e}"),
                _ => tracing::warn!(%class, "patient failed: {e}"),
            }
            OutcomeError {
                class,
                message_id: e.message_id(),
                detail: e.to_string(),
            }
        });
        if error.is_none() {
            tracing::info!("patient completed");
        }

        PatientOutcome {
            patient_id,
            state,
            registration: registration_outcome,
            submission: submission_outcome,
            total_elapsed_ms: elapsed_ms(clock),
            error,
        }
    }

    fn register(
        &mut self,
        patient: &PatientRecord,
        endpoint: &str,
        state: &mut PatientState,
    ) -> PhaseRun {
        let request = self.assertion().and_then(|assertion| {
            build_registration_request(
                patient,
                &self.settings.sender,
                &self.settings.receiver,
                &assertion,
            )
            .map_err(|e| TransactionError::from_wire(e, MessageId::new()))
        });
        let request = match request {
            Ok(request) => request,
            Err(error) => {
                transition(state, PatientState::RegistrationRejected);
                return PhaseRun {
                    outcome: None,
                    error: Some(error),
                };
            }
        };

        let domain = request.patient.domain.clone();
        let message = TransactionMessage::from(request);
        transition(state, PatientState::RegistrationSubmitted);
        let run = self.exchange(&message, endpoint, |ack| {
            ack.assigned_identifier(&domain)
                .and_then(|id| id.extension.clone())
        });
        transition(
            state,
            if run.error.is_none() {
                PatientState::RegistrationAccepted
            } else {
                PatientState::RegistrationRejected
            },
        );
        run
    }

    fn submit(
        &mut self,
        patient: &PatientRecord,
        endpoint: &str,
        state: &mut PatientState,
    ) -> PhaseRun {
        let request = self.assertion().and_then(|assertion| {
            let payload =
                self.documents
                    .document_for(patient)
                    .map_err(|source| TransactionError::Collaborator {
                        message_id: MessageId::new(),
                        source,
                    })?;
            build_document_submission(
                &patient.identifier(),
                payload.bytes,
                &payload.metadata,
                &self.settings.sender,
                &self.settings.receiver,
                &assertion,
            )
            .map_err(|e| TransactionError::from_wire(e, MessageId::new()))
        });
        let request = match request {
            Ok(request) => request,
            Err(error) => {
                transition(state, PatientState::SubmissionRejected);
                return PhaseRun {
                    outcome: None,
                    error: Some(error),
                };
            }
        };

        let document_id = request.document_unique_id.clone();
        let message = TransactionMessage::from(request);
        transition(state, PatientState::SubmissionSubmitted);
        let run = self.exchange(&message, endpoint, |_| Some(document_id.clone()));
        transition(
            state,
            if run.error.is_none() {
                PatientState::SubmissionAccepted
            } else {
                PatientState::SubmissionRejected
            },
        );
        run
    }

    /// Executes one exchange and records its phase outcome. The message is dropped
    /// by the caller right after.
    fn exchange(
        &self,
        message: &TransactionMessage,
        endpoint: &str,
        identifier: impl FnOnce(&ihe_wire::AcknowledgmentResult) -> Option<String>,
    ) -> PhaseRun {
        let message_id = message.message_id();
        let clock = Instant::now();
        let result = self.engine.execute(message, endpoint);
        let elapsed_ms = elapsed_ms(clock);

        match result {
            Ok(ack) => {
                tracing::debug!(%message_id, kind = %message.kind(), status = %ack.status, "phase accepted");
                PhaseRun {
                    outcome: Some(PhaseOutcome {
                        message_id,
                        accepted: true,
                        response_code: Some(ack.status.code().to_owned()),
                        identifier: identifier(&ack),
                        elapsed_ms,
                    }),
                    error: None,
                }
            }
            Err(error) => PhaseRun {
                outcome: Some(PhaseOutcome {
                    message_id,
                    accepted: false,
                    response_code: error.acknowledgment().map(|a| a.status.code().to_owned()),
                    identifier: None,
                    elapsed_ms,
                }),
                error: Some(error),
            },
        }
    }

    /// A signed assertion valid now. An expired one is a configuration error.
    fn assertion(&mut self) -> Result<SignedAssertion, TransactionError> {
        let message_id = MessageId::new();
        self.assertions
            .get(&self.settings.assertion_audience, Utc::now())
            .map_err(|source| match source {
                CollaboratorError::AssertionExpired { not_after } => {
                    TransactionError::Configuration {
                        message_id,
                        reason: format!("signed assertion expired at {not_after}"),
                    }
                }
                source => TransactionError::Collaborator { message_id, source },
            })
    }
}

fn elapsed_ms(clock: Instant) -> u64 {
    duration_ms(clock.elapsed())
}

fn transition(state: &mut PatientState, next: PatientState) {
    debug_assert!(
        state.can_transition_to(next),
        "invalid patient transition {state:?} -> {next:?}"
    );
    tracing::trace!(from = ?state, to = ?next, "patient state");
    *state = next;
}
