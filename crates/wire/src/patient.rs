//! Patient records as handed over by the ingestion collaborator.

use chrono::NaiveDate;
use ihe_types::NonEmptyText;
use serde::{Deserialize, Serialize};

/// One patient row, immutable once read.
///
/// Fields are kept close to the source data: the sex code and identifier domain
/// stay raw strings here and are validated when a message is built, so that a
/// bad row becomes a per-patient failure instead of aborting ingestion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatientRecord {
    /// Patient identifier within `id_domain`.
    pub id: String,

    /// OID of the assigning authority for `id`.
    pub id_domain: String,

    pub given: String,

    pub family: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,

    /// Administrative sex code (`M`, `F`, `O` or `U`).
    pub sex: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl PatientRecord {
    pub fn identifier(&self) -> PatientIdentifier {
        PatientIdentifier {
            id: self.id.clone(),
            domain: self.id_domain.clone(),
        }
    }

    pub fn has_address(&self) -> bool {
        [
            &self.street,
            &self.city,
            &self.state,
            &self.postal_code,
            &self.country,
        ]
        .iter()
        .any(|f| f.as_deref().is_some_and(|v| !v.trim().is_empty()))
    }
}

/// A patient identifier qualified by its assigning authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientIdentifier {
    pub id: String,
    pub domain: String,
}

impl PatientIdentifier {
    /// HL7v2 CX form used by XDS metadata: `id^^^&domain&ISO`.
    pub fn to_cx(&self) -> String {
        format!("{}^^^&{}&ISO", self.id.trim(), self.domain.trim())
    }

    pub fn id_text(&self) -> Option<NonEmptyText> {
        NonEmptyText::new(&self.id).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_patient_yaml_with_optional_fields() {
        let input = r#"id: P-1001
id_domain: 1.3.6.1.4.1.21367.13.20.1000
given: Sarah
family: Williams
birth_date: 1992-03-20
sex: F
city: Leeds
"#;
        let patient: PatientRecord = serde_yaml::from_str(input).expect("parse patient");
        assert_eq!(patient.birth_date, NaiveDate::from_ymd_opt(1992, 3, 20));
        assert_eq!(patient.city.as_deref(), Some("Leeds"));
        assert!(patient.has_address());
        assert!(patient.phone.is_none());
    }

    #[test]
    fn rejects_unknown_keys() {
        let input = "id: P\nid_domain: 1.2.3\ngiven: A\nfamily: B\nsex: M\nnickname: x\n";
        let err = serde_yaml::from_str::<PatientRecord>(input).expect_err("unknown key");
        assert!(err.to_string().contains("nickname"));
    }

    #[test]
    fn identifier_renders_cx() {
        let pid = PatientIdentifier {
            id: "P-1".into(),
            domain: "1.2.3".into(),
        };
        assert_eq!(pid.to_cx(), "P-1^^^&1.2.3&ISO");
    }
}
