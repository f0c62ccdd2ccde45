//! # IHE Core
//!
//! Execution side of the IHE test-transaction harness:
//! - failure classification into transient, permanent and critical
//! - the transport engine: one exchange with audit and bounded exponential backoff
//! - the batch orchestrator: sequential two-phase workflow per patient, with
//!   checkpoint/resume and a batch result at every termination
//!
//! **No wire concerns**: building and parsing messages belongs in `ihe-wire`.
//! **No process concerns**: argument parsing, `.env` loading and subscriber set-up
//! belong in the `ihe-run` binary.

pub mod audit;
pub mod checkpoint;
pub mod classify;
pub mod collaborators;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod outcome;
pub mod persist;
pub mod transport;

pub use audit::{
    AuditEntry, AuditLog, AuditRecord, CompositeAuditLog, Direction, FileAuditLog,
    MemoryAuditLog, TracingAuditLog,
};
pub use checkpoint::BatchCheckpoint;
pub use classify::{classify, ErrorClass};
pub use collaborators::{
    AssertionCache, AssertionProvider, CollaboratorError, DocumentPayload, DocumentSource,
    FileAssertionProvider, FileDocumentSource, FilePatientSource, PatientSource,
};
pub use config::{ConfigError, EngineConfig};
pub use engine::{RetryPolicy, Sleeper, ThreadSleeper, Timeouts, TransportEngine};
pub use error::{BatchError, BatchOutcome, TransactionError, TransactionResult};
pub use orchestrator::{BatchOrchestrator, BatchSettings, CancellationToken, Endpoints};
pub use outcome::{
    BatchResult, BatchStatistics, BatchTermination, HaltReason, LatencyStats, OutcomeError,
    PatientOutcome, PatientState, PhaseOutcome,
};
pub use transport::{HttpTransport, RawResponse, Transport, TransportFailure};
