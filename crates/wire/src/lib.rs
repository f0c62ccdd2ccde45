//! IHE wire codec for the test-transaction harness.
//!
//! This crate provides **wire models** and **build/parse helpers** for the two
//! transactions the harness drives against IHE endpoints:
//! - patient registration (HL7v3 `PRPA_IN201301UV02`, acknowledged by `MCCI_IN000002UV01`)
//! - document submission (ITI-41 Provide and Register Document Set-b, answered by an
//!   ebXML `RegistryResponse`)
//!
//! This crate focuses on:
//! - translation between domain records and wire bytes
//! - strict parsing of acknowledgments into a closed set of status codes
//! - MTOM/XOP packaging that keeps binary documents out of the XML text
//!
//! It performs no I/O. Sending, retrying and auditing belong in `ihe-core`.

pub mod assertion;
pub mod message;
pub mod mtom;
pub mod patient;
pub mod registration;
pub mod soap;
pub mod status;
pub mod submission;
pub mod xml;

pub use assertion::SignedAssertion;
pub use message::{TransactionKind, TransactionMessage, WireRequest};
pub use mtom::{Attachment, MimePart, MtomPackage, XopRootPart};
pub use patient::{PatientIdentifier, PatientRecord};
pub use registration::{
    build_registration_request, parse_registration_acknowledgment, RegistrationRequest,
};
pub use status::{
    AckCode, AckDetail, AcknowledgmentResult, InstanceIdentifier, RegistryStatus, ResponseStatus,
};
pub use submission::{
    build_document_submission, parse_registry_response, CodedValue, DocumentMetadata,
    DocumentSubmissionRequest,
};

pub use ihe_types::{AdministrativeSex, MessageId, NonEmptyText, Oid};

/// Errors returned by the wire codec.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Input data is missing a mandatory value or carries a value outside an accepted set.
    #[error("validation failed for message {message_id}: {reason}")]
    Validation {
        message_id: MessageId,
        reason: String,
    },

    /// A structural field is syntactically malformed (for example an identifier domain
    /// that is not an OID).
    #[error("format error in message {message_id}: {reason}")]
    Format {
        message_id: MessageId,
        reason: String,
    },

    /// Received bytes do not parse as the expected response message.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

/// Type alias for Results that can fail with a [`WireError`].
pub type WireResult<T> = Result<T, WireError>;
