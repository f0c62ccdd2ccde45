//! Validated primitive types shared by the IHE harness crates.
//!
//! Each type guarantees its invariant once constructed, so code further down the
//! pipeline (message codec, transport engine, batch orchestrator) can rely on it
//! without re-checking.

use std::fmt;
use std::str::FromStr;

pub use uuid::Uuid;

/// Errors that can occur when creating validated primitive types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TypesError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,

    /// The input is not a dot-separated numeric object identifier
    #[error("Invalid OID '{0}': expected dot-separated digit groups starting with a digit")]
    InvalidOid(String),

    /// The input is not one of the accepted administrative-sex codes
    #[error("Invalid administrative sex code '{0}': expected one of M, F, O, U")]
    InvalidSex(String),

    /// The input is not a UUID-backed message identifier
    #[error("Invalid message id '{0}'")]
    InvalidMessageId(String),
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Errors
    ///
    /// Returns `Err(TypesError::Empty)` if the trimmed input is empty.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TypesError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TypesError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// An ISO object identifier (for example `1.3.6.1.4.1.21367.13.20.1000`).
///
/// OIDs name identifier domains (patient-id namespaces) as well as sending and
/// receiving applications. The syntax accepted here is deliberately narrow:
/// the value must start with a digit and consist of dot-separated, non-empty
/// groups of ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Oid(String);

impl Oid {
    /// Validates and wraps an OID string.
    ///
    /// Surrounding whitespace is trimmed before validation.
    ///
    /// # Errors
    ///
    /// Returns [`TypesError::InvalidOid`] if the input is not syntactically an OID.
    pub fn parse(input: &str) -> Result<Self, TypesError> {
        let trimmed = input.trim();
        if Self::is_valid(trimmed) {
            Ok(Self(trimmed.to_owned()))
        } else {
            Err(TypesError::InvalidOid(input.to_owned()))
        }
    }

    /// Returns true if `input` is syntactically an OID.
    pub fn is_valid(input: &str) -> bool {
        !input.is_empty()
            && input
                .split('.')
                .all(|group| !group.is_empty() && group.bytes().all(|b| b.is_ascii_digit()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Oid {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for Oid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Oid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Oid::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// HL7 administrative gender code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdministrativeSex {
    Male,
    Female,
    Other,
    Unknown,
}

impl AdministrativeSex {
    /// Parses one of the four accepted codes (`M`, `F`, `O`, `U`).
    ///
    /// Codes are matched exactly after trimming; lower-case codes are rejected.
    pub fn parse(code: &str) -> Result<Self, TypesError> {
        match code.trim() {
            "M" => Ok(Self::Male),
            "F" => Ok(Self::Female),
            "O" => Ok(Self::Other),
            "U" => Ok(Self::Unknown),
            _ => Err(TypesError::InvalidSex(code.to_owned())),
        }
    }

    /// Returns the wire code for this value.
    pub fn code(self) -> &'static str {
        match self {
            Self::Male => "M",
            Self::Female => "F",
            Self::Other => "O",
            Self::Unknown => "U",
        }
    }
}

/// Unique identifier of one outgoing transaction message.
///
/// The identifier is generated before the message is validated, so every error
/// raised while building, sending or parsing can be correlated with the audit log.
/// It displays as a bare hyphenated UUID; [`MessageId::as_urn`] gives the
/// WS-Addressing form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the `urn:uuid:` form used in SOAP addressing headers.
    pub fn as_urn(&self) -> String {
        format!("urn:uuid:{}", self.0)
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// Returns true if `raw` names this message, with or without the `urn:uuid:` prefix.
    pub fn matches(&self, raw: &str) -> bool {
        let raw = raw.trim();
        let bare = raw
            .strip_prefix("urn:uuid:")
            .or_else(|| raw.strip_prefix("URN:UUID:"))
            .unwrap_or(raw);
        Uuid::parse_str(bare).is_ok_and(|u| u == self.0)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bare = s.trim().strip_prefix("urn:uuid:").unwrap_or(s.trim());
        Uuid::parse_str(bare)
            .map(Self)
            .map_err(|_| TypesError::InvalidMessageId(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_text_trims_and_rejects_blank() {
        assert_eq!(NonEmptyText::new("  abc ").unwrap().as_str(), "abc");
        assert_eq!(NonEmptyText::new("   "), Err(TypesError::Empty));
    }

    #[test]
    fn oid_accepts_dotted_digit_groups() {
        for ok in ["1", "2.16.840.1.113883.1.6", "1.3.6.1.4.1.21367.13.20.1000"] {
            assert!(Oid::parse(ok).is_ok(), "{ok} should be accepted");
        }
    }

    #[test]
    fn oid_rejects_malformed_values() {
        for bad in ["", "a.1.2", "1..2", "1.2.", ".1.2", "1.2a.3", "1,2,3", "urn:oid:1.2"] {
            assert!(
                matches!(Oid::parse(bad), Err(TypesError::InvalidOid(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn oid_deserialisation_validates() {
        let ok: Oid = serde_json::from_str("\"1.2.3\"").expect("valid oid");
        assert_eq!(ok.as_str(), "1.2.3");
        assert!(serde_json::from_str::<Oid>("\"x.y\"").is_err());
    }

    #[test]
    fn administrative_sex_accepts_only_four_codes() {
        assert_eq!(AdministrativeSex::parse("M"), Ok(AdministrativeSex::Male));
        assert_eq!(AdministrativeSex::parse("F"), Ok(AdministrativeSex::Female));
        assert_eq!(AdministrativeSex::parse("O"), Ok(AdministrativeSex::Other));
        assert_eq!(AdministrativeSex::parse("U"), Ok(AdministrativeSex::Unknown));
        for bad in ["", "X", "male", "m", "MF"] {
            assert!(AdministrativeSex::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn message_id_matches_bare_and_urn_forms() {
        let id = MessageId::new();
        assert!(id.matches(&id.to_string()));
        assert!(id.matches(&id.as_urn()));
        assert!(!id.matches(&MessageId::new().to_string()));
        assert!(!id.matches("not-a-uuid"));
    }

    #[test]
    fn message_id_parses_from_urn() {
        let id = MessageId::new();
        let parsed: MessageId = id.as_urn().parse().expect("urn form parses");
        assert_eq!(parsed, id);
    }
}
