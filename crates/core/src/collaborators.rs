//! External collaborators: patient ingestion, signed assertions and documents.
//!
//! Each collaborator is a trait so the orchestrator can be driven by fakes in tests.
//! The file-backed implementations are what the CLI wires in.

use crate::constants::DEFAULT_ASSERTION_LIFETIME_SECS;
use chrono::{DateTime, Duration, Utc};
use ihe_wire::{DocumentMetadata, PatientRecord, SignedAssertion};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("patient file {} is invalid at {at}: {reason}", path.display())]
    InvalidPatients {
        path: PathBuf,
        at: String,
        reason: String,
    },
    #[error("signed assertion unavailable: {0}")]
    AssertionUnavailable(String),
    #[error("signed assertion expired at {not_after}")]
    AssertionExpired { not_after: DateTime<Utc> },
    #[error("document unavailable for patient {patient_id}: {reason}")]
    DocumentUnavailable { patient_id: String, reason: String },
}

/// Ordered patient rows for one batch.
pub trait PatientSource {
    fn patients(&self) -> Result<Vec<PatientRecord>, CollaboratorError>;

    /// Stable reference to the source data, recorded in checkpoints.
    fn source_ref(&self) -> String;
}

/// Issues signed assertions for a subject and audience.
pub trait AssertionProvider {
    fn signed_assertion(
        &self,
        subject: &str,
        audience: &str,
    ) -> Result<SignedAssertion, CollaboratorError>;
}

/// Document bytes and their descriptive metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentPayload {
    pub bytes: Vec<u8>,
    pub metadata: DocumentMetadata,
}

/// Produces the document submitted for a patient.
pub trait DocumentSource {
    fn document_for(&self, patient: &PatientRecord) -> Result<DocumentPayload, CollaboratorError>;
}

/// Reads patients from a YAML (or JSON) list of records.
#[derive(Clone, Debug)]
pub struct FilePatientSource {
    path: PathBuf,
}

impl FilePatientSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parses a patient list, reporting the failing path on schema errors.
    pub fn parse(path: &Path, text: &str) -> Result<Vec<PatientRecord>, CollaboratorError> {
        let deserializer = serde_yaml::Deserializer::from_str(text);
        serde_path_to_error::deserialize::<_, Vec<PatientRecord>>(deserializer).map_err(|err| {
            let at = err.path().to_string();
            let at = if at.is_empty() { "<root>".to_owned() } else { at };
            CollaboratorError::InvalidPatients {
                path: path.to_path_buf(),
                at,
                reason: err.into_inner().to_string(),
            }
        })
    }
}

impl PatientSource for FilePatientSource {
    fn patients(&self) -> Result<Vec<PatientRecord>, CollaboratorError> {
        let text = std::fs::read_to_string(&self.path).map_err(|source| CollaboratorError::Io {
            path: self.path.clone(),
            source,
        })?;
        Self::parse(&self.path, &text)
    }

    fn source_ref(&self) -> String {
        self.path.display().to_string()
    }
}

/// Loads a pre-signed assertion from disk.
///
/// The token bytes are read fresh on every call, so a token refreshed on disk by an
/// external signer is picked up once the cached one expires.
#[derive(Clone, Debug)]
pub struct FileAssertionProvider {
    path: PathBuf,
    lifetime: Duration,
}

impl FileAssertionProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lifetime: Duration::seconds(DEFAULT_ASSERTION_LIFETIME_SECS as i64),
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }
}

impl AssertionProvider for FileAssertionProvider {
    fn signed_assertion(
        &self,
        subject: &str,
        audience: &str,
    ) -> Result<SignedAssertion, CollaboratorError> {
        let token = std::fs::read(&self.path).map_err(|source| CollaboratorError::Io {
            path: self.path.clone(),
            source,
        })?;
        if token.iter().all(u8::is_ascii_whitespace) {
            return Err(CollaboratorError::AssertionUnavailable(format!(
                "{} is empty",
                self.path.display()
            )));
        }
        tracing::debug!(subject, audience, bytes = token.len(), "loaded signed assertion");
        let now = Utc::now();
        Ok(SignedAssertion::new(token, now, now + self.lifetime))
    }
}

/// Serves the same document file, with fixed metadata, for every patient.
#[derive(Clone, Debug)]
pub struct FileDocumentSource {
    path: PathBuf,
    metadata: DocumentMetadata,
}

impl FileDocumentSource {
    pub fn new(path: impl Into<PathBuf>, metadata: DocumentMetadata) -> Self {
        Self {
            path: path.into(),
            metadata,
        }
    }
}

impl DocumentSource for FileDocumentSource {
    fn document_for(&self, _patient: &PatientRecord) -> Result<DocumentPayload, CollaboratorError> {
        let bytes = std::fs::read(&self.path).map_err(|source| CollaboratorError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(DocumentPayload {
            bytes,
            metadata: self.metadata.clone(),
        })
    }
}

/// Per-audience assertion cache for the duration of one batch.
///
/// A cached assertion is reused while valid and refetched once it expires. A freshly
/// fetched assertion that is already outside its window is an error.
pub struct AssertionCache {
    provider: Box<dyn AssertionProvider>,
    subject: String,
    entries: HashMap<String, SignedAssertion>,
}

impl AssertionCache {
    pub fn new(provider: Box<dyn AssertionProvider>, subject: impl Into<String>) -> Self {
        Self {
            provider,
            subject: subject.into(),
            entries: HashMap::new(),
        }
    }

    pub fn get(
        &mut self,
        audience: &str,
        now: DateTime<Utc>,
    ) -> Result<SignedAssertion, CollaboratorError> {
        if let Some(cached) = self.entries.get(audience) {
            if cached.is_valid_at(now) {
                return Ok(cached.clone());
            }
            tracing::info!(audience, not_after = %cached.not_after(), "signed assertion expired, refetching");
        }

        let fresh = self.provider.signed_assertion(&self.subject, audience)?;
        if !fresh.is_valid_at(now) {
            self.entries.remove(audience);
            return Err(CollaboratorError::AssertionExpired {
                not_after: fresh.not_after(),
            });
        }
        self.entries.insert(audience.to_owned(), fresh.clone());
        Ok(fresh)
    }
}
