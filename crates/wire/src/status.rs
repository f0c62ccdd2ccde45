//! Acknowledgment status codes and the parsed acknowledgment carrier.
//!
//! Both transaction types are answered with a status drawn from a closed set:
//! HL7v3 acknowledgment type codes for registration, ebXML response status for
//! document submission. They are modelled as enums so an unrecognised status is
//! a parse failure rather than a silent fallthrough.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// HL7v3 acknowledgment type code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckCode {
    /// `AA` Application Accept.
    #[serde(rename = "AA")]
    ApplicationAccept,
    /// `CA` Commit Accept.
    #[serde(rename = "CA")]
    CommitAccept,
    /// `AE` Application Error.
    #[serde(rename = "AE")]
    ApplicationError,
    /// `AR` Application Reject.
    #[serde(rename = "AR")]
    ApplicationReject,
    /// `CE` Commit Error.
    #[serde(rename = "CE")]
    CommitError,
    /// `CR` Commit Reject.
    #[serde(rename = "CR")]
    CommitReject,
}

impl AckCode {
    pub const ALL: [AckCode; 6] = [
        AckCode::ApplicationAccept,
        AckCode::CommitAccept,
        AckCode::ApplicationError,
        AckCode::ApplicationReject,
        AckCode::CommitError,
        AckCode::CommitReject,
    ];

    /// Parses a two-letter code, ignoring case and surrounding whitespace.
    pub fn parse(code: &str) -> Option<Self> {
        match code.trim().to_ascii_uppercase().as_str() {
            "AA" => Some(Self::ApplicationAccept),
            "CA" => Some(Self::CommitAccept),
            "AE" => Some(Self::ApplicationError),
            "AR" => Some(Self::ApplicationReject),
            "CE" => Some(Self::CommitError),
            "CR" => Some(Self::CommitReject),
            _ => None,
        }
    }

    /// Returns the canonical (upper-case) wire code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApplicationAccept => "AA",
            Self::CommitAccept => "CA",
            Self::ApplicationError => "AE",
            Self::ApplicationReject => "AR",
            Self::CommitError => "CE",
            Self::CommitReject => "CR",
        }
    }

    /// Returns the lower-case form, as some registries emit it.
    pub fn as_lowercase(self) -> String {
        self.as_str().to_ascii_lowercase()
    }

    pub fn meaning(self) -> &'static str {
        match self {
            Self::ApplicationAccept => "Application Accept",
            Self::CommitAccept => "Commit Accept",
            Self::ApplicationError => "Application Error",
            Self::ApplicationReject => "Application Reject",
            Self::CommitError => "Commit Error",
            Self::CommitReject => "Commit Reject",
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::ApplicationAccept | Self::CommitAccept)
    }
}

impl fmt::Display for AckCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown acknowledgment code '{s}'"))
    }
}

/// ebXML registry response status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistryStatus {
    Success,
    Failure,
    PartialSuccess,
}

impl RegistryStatus {
    pub const SUCCESS_URN: &'static str =
        "urn:oasis:names:tc:ebxml-regrep:ResponseStatusType:Success";
    pub const FAILURE_URN: &'static str =
        "urn:oasis:names:tc:ebxml-regrep:ResponseStatusType:Failure";
    pub const PARTIAL_SUCCESS_URN: &'static str =
        "urn:ihe:iti:2007:ResponseStatusType:PartialSuccess";

    /// Parses one of the three ebRS status URNs or its bare short name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            Self::SUCCESS_URN | "Success" => Some(Self::Success),
            Self::FAILURE_URN | "Failure" => Some(Self::Failure),
            Self::PARTIAL_SUCCESS_URN | "PartialSuccess" => Some(Self::PartialSuccess),
            _ => None,
        }
    }

    pub fn as_urn(self) -> &'static str {
        match self {
            Self::Success => Self::SUCCESS_URN,
            Self::Failure => Self::FAILURE_URN,
            Self::PartialSuccess => Self::PARTIAL_SUCCESS_URN,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Failure => "Failure",
            Self::PartialSuccess => "PartialSuccess",
        }
    }
}

/// Status carried by a parsed response, tagged by transaction family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum ResponseStatus {
    Acknowledgment(AckCode),
    Registry(RegistryStatus),
}

impl ResponseStatus {
    pub fn is_success(self) -> bool {
        match self {
            Self::Acknowledgment(code) => code.is_success(),
            Self::Registry(status) => status == RegistryStatus::Success,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Acknowledgment(code) => code.as_str(),
            Self::Registry(status) => status.as_str(),
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One detail entry attached to an acknowledgment or registry response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckDetail {
    pub severity: Option<String>,
    pub code: Option<String>,
    pub text: Option<String>,
}

/// An HL7 instance identifier (`root` + optional `extension`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIdentifier {
    pub root: String,
    pub extension: Option<String>,
}

/// Structured result of parsing a raw response.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgmentResult {
    pub status: ResponseStatus,

    /// Identifier of the message this response answers, as echoed by the responder.
    pub correlation_id: Option<String>,

    pub details: Vec<AckDetail>,

    /// Patient identifiers returned by a registration acknowledgment.
    pub identifiers: Vec<InstanceIdentifier>,
}

impl AcknowledgmentResult {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns the first returned identifier outside `submitted_domain`, which is the
    /// enterprise identifier assigned by the registry when it cross-references the patient.
    pub fn assigned_identifier(&self, submitted_domain: &str) -> Option<&InstanceIdentifier> {
        self.identifiers
            .iter()
            .find(|id| id.root != submitted_domain && id.extension.is_some())
    }

    /// Renders the details as one line for logs and outcome records.
    pub fn detail_summary(&self) -> String {
        self.details
            .iter()
            .map(|d| {
                let code = d.code.as_deref().unwrap_or("-");
                match d.text.as_deref() {
                    Some(text) => format!("{code}: {text}"),
                    None => code.to_owned(),
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}
