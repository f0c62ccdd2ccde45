//! Patient registration: HL7v3 `PRPA_IN201301UV02` request and `MCCI_IN000002UV01`
//! acknowledgment.

use crate::assertion::SignedAssertion;
use crate::message::WireRequest;
use crate::patient::{PatientIdentifier, PatientRecord};
use crate::soap::{self, REGISTRATION_ACTION};
use crate::status::{AckCode, AckDetail, AcknowledgmentResult, InstanceIdentifier, ResponseStatus};
use crate::xml::{self, escape};
use crate::{WireError, WireResult};
use chrono::{DateTime, Utc};
use ihe_types::{AdministrativeSex, MessageId, NonEmptyText, Oid};

/// HL7 interaction-id root.
const HL7_INTERACTION_ROOT: &str = "2.16.840.1.113883.1.6";

/// A built registration message.
#[derive(Clone, Debug)]
pub struct RegistrationRequest {
    pub message_id: MessageId,
    pub created_at: DateTime<Utc>,
    pub sender: Oid,
    pub receiver: Oid,
    pub patient: PatientIdentifier,
    envelope: Vec<u8>,
}

impl RegistrationRequest {
    pub fn envelope(&self) -> &[u8] {
        &self.envelope
    }

    pub fn to_wire(&self) -> WireRequest {
        WireRequest {
            body: self.envelope.clone(),
            content_type: soap::soap_content_type(REGISTRATION_ACTION),
            action: REGISTRATION_ACTION,
        }
    }
}

/// Builds a registration request for `patient`.
///
/// # Errors
///
/// - [`WireError::Validation`] if identifier, identifier domain, name or birth date is
///   missing, or the administrative-sex code is not one of `M`, `F`, `O`, `U`.
/// - [`WireError::Format`] if the identifier domain is not a syntactically valid OID.
///
/// Both carry the message id generated for this request.
pub fn build_registration_request(
    patient: &PatientRecord,
    sender: &Oid,
    receiver: &Oid,
    assertion: &SignedAssertion,
) -> WireResult<RegistrationRequest> {
    let message_id = MessageId::new();
    let invalid = |reason: &str| WireError::Validation {
        message_id,
        reason: reason.to_owned(),
    };

    let id = NonEmptyText::new(&patient.id).map_err(|_| invalid("patient identifier is missing"))?;
    if patient.id_domain.trim().is_empty() {
        return Err(invalid("patient identifier domain is missing"));
    }
    let given = NonEmptyText::new(&patient.given).map_err(|_| invalid("given name is missing"))?;
    let family =
        NonEmptyText::new(&patient.family).map_err(|_| invalid("family name is missing"))?;
    let birth_date = patient
        .birth_date
        .ok_or_else(|| invalid("birth date is missing"))?;
    let sex = AdministrativeSex::parse(&patient.sex).map_err(|e| WireError::Validation {
        message_id,
        reason: e.to_string(),
    })?;
    let domain = Oid::parse(&patient.id_domain).map_err(|e| WireError::Format {
        message_id,
        reason: format!("patient identifier domain: {e}"),
    })?;

    let created_at = Utc::now();
    let person = PersonFields {
        given: &given,
        family: &family,
        sex,
        birth_time: birth_date.format("%Y%m%d").to_string(),
        telecom: patient.phone.as_deref().map(str::trim).filter(|p| !p.is_empty()),
        patient,
    };
    let body = render_body(&message_id, created_at, sender, receiver, &domain, &id, &person);
    let envelope = soap::envelope(REGISTRATION_ACTION, &message_id, assertion, &body);

    tracing::trace!(%message_id, patient_id = %id, "built registration request");

    Ok(RegistrationRequest {
        message_id,
        created_at,
        sender: sender.clone(),
        receiver: receiver.clone(),
        patient: PatientIdentifier {
            id: id.to_string(),
            domain: domain.to_string(),
        },
        envelope,
    })
}

struct PersonFields<'a> {
    given: &'a NonEmptyText,
    family: &'a NonEmptyText,
    sex: AdministrativeSex,
    birth_time: String,
    telecom: Option<&'a str>,
    patient: &'a PatientRecord,
}

fn render_body(
    message_id: &MessageId,
    created_at: DateTime<Utc>,
    sender: &Oid,
    receiver: &Oid,
    domain: &Oid,
    id: &NonEmptyText,
    person: &PersonFields<'_>,
) -> String {
    let telecom = person
        .telecom
        .map(|p| format!(r#"<telecom value="tel:{}" use="HP"/>"#, escape(p)))
        .unwrap_or_default();

    format!(
        concat!(
            r#"<PRPA_IN201301UV02 xmlns="urn:hl7-org:v3" ITSVersion="XML_1.0">"#,
            r#"<id root="{message_id}"/>"#,
            r#"<creationTime value="{creation_time}"/>"#,
            r#"<interactionId root="{interaction_root}" extension="PRPA_IN201301UV02"/>"#,
            r#"<processingCode code="T"/>"#,
            r#"<processingModeCode code="T"/>"#,
            r#"<acceptAckCode code="AL"/>"#,
            r#"<receiver typeCode="RCV"><device classCode="DEV" determinerCode="INSTANCE"><id root="{receiver}"/></device></receiver>"#,
            r#"<sender typeCode="SND"><device classCode="DEV" determinerCode="INSTANCE"><id root="{sender}"/></device></sender>"#,
            r#"<controlActProcess classCode="CACT" moodCode="EVN">"#,
            r#"<code code="PRPA_TE201301UV02" codeSystem="{interaction_root}"/>"#,
            r#"<subject typeCode="SUBJ"><registrationEvent classCode="REG" moodCode="EVN">"#,
            r#"<statusCode code="active"/>"#,
            r#"<subject1 typeCode="SBJ"><patient classCode="PAT">"#,
            r#"<id root="{domain}" extension="{id}"/>"#,
            r#"<statusCode code="active"/>"#,
            r#"<patientPerson>"#,
            r#"<name><given>{given}</given><family>{family}</family></name>"#,
            r#"{telecom}"#,
            r#"<administrativeGenderCode code="{sex}"/>"#,
            r#"<birthTime value="{birth_time}"/>"#,
            r#"{addr}"#,
            r#"</patientPerson>"#,
            r#"</patient></subject1>"#,
            r#"<custodian typeCode="CST"><assignedEntity classCode="ASSIGNED"><id root="{sender}"/></assignedEntity></custodian>"#,
            r#"</registrationEvent></subject>"#,
            r#"</controlActProcess>"#,
            r#"</PRPA_IN201301UV02>"#,
        ),
        message_id = message_id,
        creation_time = created_at.format("%Y%m%d%H%M%S"),
        interaction_root = HL7_INTERACTION_ROOT,
        receiver = receiver,
        sender = sender,
        domain = domain,
        id = escape(id.as_str()),
        given = escape(person.given.as_str()),
        family = escape(person.family.as_str()),
        telecom = telecom,
        sex = person.sex.code(),
        birth_time = person.birth_time,
        addr = render_address(person.patient),
    )
}

fn render_address(patient: &PatientRecord) -> String {
    if !patient.has_address() {
        return String::new();
    }
    let mut addr = String::from("<addr>");
    for (tag, value) in [
        ("streetAddressLine", &patient.street),
        ("city", &patient.city),
        ("state", &patient.state),
        ("postalCode", &patient.postal_code),
        ("country", &patient.country),
    ] {
        if let Some(v) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            addr.push_str(&format!("<{tag}>{}</{tag}>", escape(v)));
        }
    }
    addr.push_str("</addr>");
    addr
}

/// Parses a registration acknowledgment.
///
/// Accepts the raw bytes as received (plain XML, optionally BOM-prefixed, or a
/// multipart body whose root part is the XML).
///
/// # Errors
///
/// Returns [`WireError::MalformedResponse`] if the bytes are not XML, carry a SOAP
/// fault, or lack the acknowledgement status code or its `targetMessage/id/@root`
/// correlation target, or if the status code is not one of the six defined codes.
pub fn parse_registration_acknowledgment(raw: &[u8]) -> WireResult<AcknowledgmentResult> {
    let text = xml::response_text(raw)?;
    let doc = xml::parse_document(text)?;
    xml::ensure_not_fault(&doc)?;

    let ack = xml::descendant(doc.root(), "acknowledgement")
        .ok_or_else(|| malformed("acknowledgement element is missing"))?;

    // Normative schema uses a typeCode element; older senders use an attribute.
    let raw_code = xml::child(ack, "typeCode")
        .and_then(|n| xml::attr(n, "code"))
        .or_else(|| xml::attr(ack, "typeCode"))
        .ok_or_else(|| malformed("acknowledgement status code is missing"))?;
    let code = AckCode::parse(&raw_code)
        .ok_or_else(|| malformed(&format!("unknown acknowledgement code '{raw_code}'")))?;

    let correlation_id = xml::child(ack, "targetMessage")
        .and_then(|t| xml::child(t, "id"))
        .and_then(|id| xml::attr(id, "root"))
        .ok_or_else(|| malformed("acknowledgement targetMessage/id/@root is missing"))?;

    let details = xml::children(ack, "acknowledgementDetail")
        .map(|d| AckDetail {
            severity: xml::attr(d, "typeCode"),
            code: xml::child(d, "code").and_then(|c| xml::attr(c, "code")),
            text: xml::child(d, "text").and_then(xml::text_of),
        })
        .collect();

    let identifiers = doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "patient")
        .flat_map(|p| xml::children(p, "id"))
        .filter_map(|id| {
            xml::attr(id, "root").map(|root| InstanceIdentifier {
                root,
                extension: xml::attr(id, "extension"),
            })
        })
        .collect();

    Ok(AcknowledgmentResult {
        status: ResponseStatus::Acknowledgment(code),
        correlation_id: Some(correlation_id),
        details,
        identifiers,
    })
}

fn malformed(reason: &str) -> WireError {
    WireError::MalformedResponse(reason.to_owned())
}
