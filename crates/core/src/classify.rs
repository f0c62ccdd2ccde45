//! Failure classification: retry, skip the patient, or halt the batch.

use crate::collaborators::CollaboratorError;
use crate::error::TransactionError;
use crate::transport::TransportFailure;
use ihe_wire::ResponseStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What to do about a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Retried by the transport engine while budget remains.
    Transient,
    /// The patient is marked failed and the batch continues.
    Permanent,
    /// The batch halts.
    Critical,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Critical => "critical",
        })
    }
}

/// Classifies a transaction failure.
///
/// Rules, first match wins:
/// 1. connection failure, timeout, HTTP 429/502/503/504: transient
/// 2. other HTTP 4xx: permanent
/// 3. parsed rejection (AE, AR, CE, CR, or a registry failure): permanent
/// 4. certificate/trust failure, configuration missing at call time: critical
/// 5. anything else, including malformed responses: critical
pub fn classify(error: &TransactionError) -> ErrorClass {
    match error {
        TransactionError::Transport { failure, .. } => classify_transport(failure),
        TransactionError::ProtocolRejection { ack, .. } => match ack.status {
            ResponseStatus::Acknowledgment(code) if code.is_success() => ErrorClass::Critical,
            _ => ErrorClass::Permanent,
        },
        // Bad input data fails before any network call and only affects its patient.
        TransactionError::Validation { .. } | TransactionError::Format { .. } => {
            ErrorClass::Permanent
        }
        TransactionError::Collaborator { source, .. } => match source {
            CollaboratorError::DocumentUnavailable { .. } => ErrorClass::Permanent,
            _ => ErrorClass::Critical,
        },
        TransactionError::MalformedResponse { .. } | TransactionError::Configuration { .. } => {
            ErrorClass::Critical
        }
    }
}

fn classify_transport(failure: &TransportFailure) -> ErrorClass {
    match failure {
        TransportFailure::Connect(_) | TransportFailure::Timeout(_) => ErrorClass::Transient,
        TransportFailure::HttpStatus { status, .. } => classify_http_status(*status),
        TransportFailure::Tls(_) | TransportFailure::Other(_) => ErrorClass::Critical,
    }
}

fn classify_http_status(status: u16) -> ErrorClass {
    match status {
        429 | 502 | 503 | 504 => ErrorClass::Transient,
        400..=499 => ErrorClass::Permanent,
        _ => ErrorClass::Critical,
    }
}
