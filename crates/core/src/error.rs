use crate::collaborators::CollaboratorError;
use crate::transport::TransportFailure;
use ihe_types::MessageId;
use ihe_wire::{AcknowledgmentResult, WireError};
use std::path::PathBuf;

/// Failure of one transaction, always tied to the message it belongs to.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("validation failed for message {message_id}: {reason}")]
    Validation {
        message_id: MessageId,
        reason: String,
    },
    #[error("format error in message {message_id}: {reason}")]
    Format {
        message_id: MessageId,
        reason: String,
    },
    #[error("malformed response to message {message_id}: {reason}")]
    MalformedResponse {
        message_id: MessageId,
        reason: String,
    },
    #[error("transport failure for message {message_id}: {failure}")]
    Transport {
        message_id: MessageId,
        #[source]
        failure: TransportFailure,
    },
    #[error(
        "message {message_id} rejected with status {}{}",
        ack.status,
        rejection_details(ack)
    )]
    ProtocolRejection {
        message_id: MessageId,
        ack: Box<AcknowledgmentResult>,
    },
    #[error("configuration error for message {message_id}: {reason}")]
    Configuration {
        message_id: MessageId,
        reason: String,
    },
    #[error("collaborator failure for message {message_id}: {source}")]
    Collaborator {
        message_id: MessageId,
        #[source]
        source: CollaboratorError,
    },
}

fn rejection_details(ack: &AcknowledgmentResult) -> String {
    let summary = ack.detail_summary();
    if summary.is_empty() {
        String::new()
    } else {
        format!(" ({summary})")
    }
}

impl TransactionError {
    pub fn message_id(&self) -> MessageId {
        match self {
            Self::Validation { message_id, .. }
            | Self::Format { message_id, .. }
            | Self::MalformedResponse { message_id, .. }
            | Self::Transport { message_id, .. }
            | Self::ProtocolRejection { message_id, .. }
            | Self::Configuration { message_id, .. }
            | Self::Collaborator { message_id, .. } => *message_id,
        }
    }

    /// Lifts a codec error. Build errors carry their own message id; parse errors
    /// take `message_id`, the id of the request the response answers.
    pub fn from_wire(error: WireError, message_id: MessageId) -> Self {
        match error {
            WireError::Validation { message_id, reason } => Self::Validation { message_id, reason },
            WireError::Format { message_id, reason } => Self::Format { message_id, reason },
            WireError::MalformedResponse(reason) => Self::MalformedResponse { message_id, reason },
        }
    }

    /// The parsed acknowledgment of a rejected exchange, if any.
    pub fn acknowledgment(&self) -> Option<&AcknowledgmentResult> {
        match self {
            Self::ProtocolRejection { ack, .. } => Some(ack),
            _ => None,
        }
    }
}

/// Type alias for Results that can fail with a [`TransactionError`].
pub type TransactionResult<T> = std::result::Result<T, TransactionError>;

/// Batch-level failures. Per-patient failures never surface here.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("checkpoint does not match this batch: {0}")]
    CheckpointMismatch(String),
    #[error("failed to read {}: {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize {}: {source}", path.display())]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to deserialize {}: {source}", path.display())]
    Deserialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid batch settings: {0}")]
    InvalidSettings(String),
}

/// Type alias for Results that can fail with a [`BatchError`].
pub type BatchOutcome<T> = std::result::Result<T, BatchError>;
