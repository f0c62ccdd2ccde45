//! The outgoing message union and its wire form.

use crate::registration::RegistrationRequest;
use crate::submission::DocumentSubmissionRequest;
use chrono::{DateTime, Utc};
use ihe_types::{MessageId, Oid};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two transaction types the harness drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Registration,
    DocumentSubmission,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Registration => "registration",
            Self::DocumentSubmission => "document_submission",
        })
    }
}

/// Bytes ready to be POSTed, with the headers that describe them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireRequest {
    pub body: Vec<u8>,
    pub content_type: String,
    pub action: &'static str,
}

/// A built transaction message; consumed by one exchange and then dropped.
#[derive(Clone, Debug)]
pub enum TransactionMessage {
    Registration(RegistrationRequest),
    DocumentSubmission(DocumentSubmissionRequest),
}

impl TransactionMessage {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Self::Registration(_) => TransactionKind::Registration,
            Self::DocumentSubmission(_) => TransactionKind::DocumentSubmission,
        }
    }

    pub fn message_id(&self) -> MessageId {
        match self {
            Self::Registration(r) => r.message_id,
            Self::DocumentSubmission(d) => d.message_id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Registration(r) => r.created_at,
            Self::DocumentSubmission(d) => d.created_at,
        }
    }

    pub fn sender(&self) -> &Oid {
        match self {
            Self::Registration(r) => &r.sender,
            Self::DocumentSubmission(d) => &d.sender,
        }
    }

    pub fn receiver(&self) -> &Oid {
        match self {
            Self::Registration(r) => &r.receiver,
            Self::DocumentSubmission(d) => &d.receiver,
        }
    }

    pub fn to_wire(&self) -> WireRequest {
        match self {
            Self::Registration(r) => r.to_wire(),
            Self::DocumentSubmission(d) => d.to_wire(),
        }
    }
}

impl From<RegistrationRequest> for TransactionMessage {
    fn from(value: RegistrationRequest) -> Self {
        Self::Registration(value)
    }
}

impl From<DocumentSubmissionRequest> for TransactionMessage {
    fn from(value: DocumentSubmissionRequest) -> Self {
        Self::DocumentSubmission(value)
    }
}
