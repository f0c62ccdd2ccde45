//! Document submission: ITI-41 Provide and Register Document Set-b request packaged
//! as MTOM/XOP, and the ebXML `RegistryResponse` that answers it.

use crate::assertion::SignedAssertion;
use crate::message::WireRequest;
use crate::mtom::{Attachment, MtomPackage, XopRootPart};
use crate::patient::PatientIdentifier;
use crate::soap::{self, SUBMISSION_ACTION};
use crate::status::{AckDetail, AcknowledgmentResult, RegistryStatus, ResponseStatus};
use crate::xml::{self, escape};
use crate::{WireError, WireResult};
use chrono::{DateTime, Utc};
use ihe_types::{MessageId, NonEmptyText, Oid};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const XDS_CLASS_CODE: &str = "urn:uuid:41a5887f-8865-4c09-adf7-e362475b143a";
const XDS_TYPE_CODE: &str = "urn:uuid:f0306f51-975f-434e-a61c-c59651d33983";
const XDS_FORMAT_CODE: &str = "urn:uuid:a09d5840-386c-46f2-b5ad-9c3699a4309d";
const XDS_DOCUMENT_PATIENT_ID: &str = "urn:uuid:58a6f841-87b3-4a3e-92fd-a8ffeff98427";
const XDS_DOCUMENT_UNIQUE_ID: &str = "urn:uuid:2e82c1f6-a085-4c72-9da3-8640a32e42ab";
const XDS_SUBMISSION_SET: &str = "urn:uuid:a54d6aa5-d40d-43f9-88c5-b4633d873bdd";
const XDS_SUBMISSION_SET_UNIQUE_ID: &str = "urn:uuid:96fdda7c-d067-4183-912e-bf5ee74998a8";
const XDS_SUBMISSION_SET_SOURCE_ID: &str = "urn:uuid:554ac39e-e3fe-47fe-b233-965d2a147832";
const XDS_SUBMISSION_SET_PATIENT_ID: &str = "urn:uuid:6b5aea1a-874d-4603-a4bc-96a0a7b38446";
const STABLE_DOCUMENT_ENTRY: &str = "urn:uuid:7edca82f-054d-47f2-a032-9b2a5b5186c1";

/// A coded classification value (`code` within `scheme`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodedValue {
    pub code: String,
    pub scheme: String,
    #[serde(default)]
    pub display: Option<String>,
}

impl CodedValue {
    pub fn new(code: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            scheme: scheme.into(),
            display: None,
        }
    }

    fn is_complete(&self) -> bool {
        !self.code.trim().is_empty() && !self.scheme.trim().is_empty()
    }
}

/// Descriptive metadata supplied alongside the document bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub class_code: Option<CodedValue>,
    #[serde(default)]
    pub type_code: Option<CodedValue>,
    #[serde(default)]
    pub format_code: Option<CodedValue>,
    pub media_type: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// A built document submission; owns the two-part MTOM package.
#[derive(Clone, Debug)]
pub struct DocumentSubmissionRequest {
    pub message_id: MessageId,
    pub created_at: DateTime<Utc>,
    pub sender: Oid,
    pub receiver: Oid,
    pub patient: PatientIdentifier,

    /// `2.25.<uuid as decimal>` unique id assigned to the document entry.
    pub document_unique_id: String,

    pub package: MtomPackage,
}

impl DocumentSubmissionRequest {
    pub fn to_wire(&self) -> WireRequest {
        WireRequest {
            body: self.package.to_bytes(),
            content_type: self.package.content_type(SUBMISSION_ACTION),
            action: SUBMISSION_ACTION,
        }
    }
}

/// Generates an OID-form unique id under the `2.25` (UUID) arc.
pub fn new_unique_id() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}

/// Builds an ITI-41 submission for `document`.
///
/// The document bytes go into the attachment part; the envelope only carries a
/// `cid:` reference to it.
///
/// # Errors
///
/// - [`WireError::Validation`] if the patient identifier or its domain is missing,
///   the document is empty, the media type is blank, or any of the class, type or
///   format codes is missing or incomplete.
/// - [`WireError::Format`] if the patient identifier domain is not an OID.
pub fn build_document_submission(
    patient: &PatientIdentifier,
    document: Vec<u8>,
    metadata: &DocumentMetadata,
    sender: &Oid,
    receiver: &Oid,
    assertion: &SignedAssertion,
) -> WireResult<DocumentSubmissionRequest> {
    let message_id = MessageId::new();
    let invalid = |reason: String| WireError::Validation { message_id, reason };

    let id = NonEmptyText::new(&patient.id)
        .map_err(|_| invalid("patient identifier is missing".into()))?;
    if patient.domain.trim().is_empty() {
        return Err(invalid("patient identifier domain is missing".into()));
    }
    let class_code = required_code(&metadata.class_code, "class").map_err(&invalid)?;
    let type_code = required_code(&metadata.type_code, "type").map_err(&invalid)?;
    let format_code = required_code(&metadata.format_code, "format").map_err(&invalid)?;
    let media_type = NonEmptyText::new(&metadata.media_type)
        .map_err(|_| invalid("document media type is missing".into()))?;
    if document.is_empty() {
        return Err(invalid("document is empty".into()));
    }
    let domain = Oid::parse(&patient.domain).map_err(|e| WireError::Format {
        message_id,
        reason: format!("patient identifier domain: {e}"),
    })?;

    let patient = PatientIdentifier {
        id: id.to_string(),
        domain: domain.to_string(),
    };
    let created_at = Utc::now();
    let document_unique_id = new_unique_id();
    let attachment = Attachment::new(media_type.as_str(), document);

    let entry = EntryFields {
        patient_cx: patient.to_cx(),
        class_code,
        type_code,
        format_code,
        media_type: media_type.as_str(),
        title: metadata
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("Clinical document"),
        unique_id: &document_unique_id,
    };
    let body = render_body(created_at, sender, receiver, &entry, &attachment.href());
    let envelope = soap::envelope(SUBMISSION_ACTION, &message_id, assertion, &body);
    let package = MtomPackage::new(XopRootPart::new(envelope), attachment);

    tracing::trace!(
        %message_id,
        patient_id = %patient.id,
        document_unique_id = %document_unique_id,
        bytes = package.attachment().bytes.len(),
        "built document submission"
    );

    Ok(DocumentSubmissionRequest {
        message_id,
        created_at,
        sender: sender.clone(),
        receiver: receiver.clone(),
        patient,
        document_unique_id,
        package,
    })
}

fn required_code<'a>(value: &'a Option<CodedValue>, name: &str) -> Result<&'a CodedValue, String> {
    match value {
        Some(code) if code.is_complete() => Ok(code),
        Some(_) => Err(format!("document {name} code is incomplete")),
        None => Err(format!("document {name} code is missing")),
    }
}

struct EntryFields<'a> {
    patient_cx: String,
    class_code: &'a CodedValue,
    type_code: &'a CodedValue,
    format_code: &'a CodedValue,
    media_type: &'a str,
    title: &'a str,
    unique_id: &'a str,
}

fn slot(name: &str, value: &str) -> String {
    format!(
        r#"<rim:Slot name="{name}"><rim:ValueList><rim:Value>{}</rim:Value></rim:ValueList></rim:Slot>"#,
        escape(value)
    )
}

fn classification(id: &str, scheme: &str, object: &str, value: &CodedValue) -> String {
    let display = value.display.as_deref().unwrap_or(&value.code);
    format!(
        concat!(
            r#"<rim:Classification id="{id}" classificationScheme="{scheme}" classifiedObject="{object}" nodeRepresentation="{code}">"#,
            "{slot}",
            r#"<rim:Name><rim:LocalizedString value="{display}"/></rim:Name>"#,
            r#"</rim:Classification>"#,
        ),
        id = id,
        scheme = scheme,
        object = object,
        code = escape(value.code.trim()),
        slot = slot("codingScheme", value.scheme.trim()),
        display = escape(display),
    )
}

fn external_identifier(id: &str, scheme: &str, object: &str, value: &str, name: &str) -> String {
    format!(
        concat!(
            r#"<rim:ExternalIdentifier id="{id}" identificationScheme="{scheme}" registryObject="{object}" value="{value}">"#,
            r#"<rim:Name><rim:LocalizedString value="{name}"/></rim:Name>"#,
            r#"</rim:ExternalIdentifier>"#,
        ),
        id = id,
        scheme = scheme,
        object = object,
        value = escape(value),
        name = name,
    )
}

fn render_body(
    created_at: DateTime<Utc>,
    sender: &Oid,
    receiver: &Oid,
    entry: &EntryFields<'_>,
    href: &str,
) -> String {
    let timestamp = created_at.format("%Y%m%d%H%M%S").to_string();
    let submission_set_id = new_unique_id();

    let mut out = String::with_capacity(4096);
    out.push_str(r#"<xdsb:ProvideAndRegisterDocumentSetRequest xmlns:xdsb="urn:ihe:iti:xds-b:2007">"#);
    out.push_str(r#"<lcm:SubmitObjectsRequest xmlns:lcm="urn:oasis:names:tc:ebxml-regrep:xsd:lcm:3.0">"#);
    out.push_str(r#"<rim:RegistryObjectList xmlns:rim="urn:oasis:names:tc:ebxml-regrep:xsd:rim:3.0">"#);

    out.push_str(&format!(
        r#"<rim:ExtrinsicObject id="Document01" mimeType="{}" objectType="{STABLE_DOCUMENT_ENTRY}">"#,
        escape(entry.media_type)
    ));
    out.push_str(&slot("creationTime", &timestamp));
    out.push_str(&slot("languageCode", "en-GB"));
    out.push_str(&slot("sourcePatientId", &entry.patient_cx));
    out.push_str(&format!(
        r#"<rim:Name><rim:LocalizedString value="{}"/></rim:Name>"#,
        escape(entry.title)
    ));
    out.push_str(&classification("cl01", XDS_CLASS_CODE, "Document01", entry.class_code));
    out.push_str(&classification("cl02", XDS_TYPE_CODE, "Document01", entry.type_code));
    out.push_str(&classification("cl03", XDS_FORMAT_CODE, "Document01", entry.format_code));
    out.push_str(&external_identifier(
        "ei01",
        XDS_DOCUMENT_PATIENT_ID,
        "Document01",
        &entry.patient_cx,
        "XDSDocumentEntry.patientId",
    ));
    out.push_str(&external_identifier(
        "ei02",
        XDS_DOCUMENT_UNIQUE_ID,
        "Document01",
        entry.unique_id,
        "XDSDocumentEntry.uniqueId",
    ));
    out.push_str("</rim:ExtrinsicObject>");

    out.push_str(r#"<rim:RegistryPackage id="SubmissionSet01" objectType="urn:oasis:names:tc:ebxml-regrep:ObjectType:RegistryObject:RegistryPackage">"#);
    out.push_str(&slot("submissionTime", &timestamp));
    out.push_str(&slot("intendedRecipient", receiver.as_str()));
    out.push_str(&external_identifier(
        "ei03",
        XDS_SUBMISSION_SET_UNIQUE_ID,
        "SubmissionSet01",
        &submission_set_id,
        "XDSSubmissionSet.uniqueId",
    ));
    out.push_str(&external_identifier(
        "ei04",
        XDS_SUBMISSION_SET_SOURCE_ID,
        "SubmissionSet01",
        sender.as_str(),
        "XDSSubmissionSet.sourceId",
    ));
    out.push_str(&external_identifier(
        "ei05",
        XDS_SUBMISSION_SET_PATIENT_ID,
        "SubmissionSet01",
        &entry.patient_cx,
        "XDSSubmissionSet.patientId",
    ));
    out.push_str("</rim:RegistryPackage>");
    out.push_str(&format!(
        r#"<rim:Classification id="cl10" classifiedObject="SubmissionSet01" classificationNode="{XDS_SUBMISSION_SET}"/>"#
    ));
    out.push_str(concat!(
        r#"<rim:Association id="as01" associationType="urn:oasis:names:tc:ebxml-regrep:AssociationType:HasMember" sourceObject="SubmissionSet01" targetObject="Document01">"#,
        r#"<rim:Slot name="SubmissionSetStatus"><rim:ValueList><rim:Value>Original</rim:Value></rim:ValueList></rim:Slot>"#,
        r#"</rim:Association>"#,
    ));

    out.push_str("</rim:RegistryObjectList></lcm:SubmitObjectsRequest>");
    out.push_str(&format!(
        r#"<xdsb:Document id="Document01"><xop:Include xmlns:xop="http://www.w3.org/2004/08/xop/include" href="{}"/></xdsb:Document>"#,
        escape(href)
    ));
    out.push_str("</xdsb:ProvideAndRegisterDocumentSetRequest>");
    out
}

/// Parses an ebXML registry response.
///
/// The correlation id is read from the WS-Addressing `RelatesTo` header when present.
///
/// # Errors
///
/// Returns [`WireError::MalformedResponse`] if the bytes are not XML, carry a SOAP
/// fault, have no `RegistryResponse`, or its `status` attribute is missing or unknown.
pub fn parse_registry_response(raw: &[u8]) -> WireResult<AcknowledgmentResult> {
    let text = xml::response_text(raw)?;
    let doc = xml::parse_document(text)?;
    xml::ensure_not_fault(&doc)?;

    let response = xml::descendant(doc.root(), "RegistryResponse")
        .ok_or_else(|| malformed("RegistryResponse element is missing".into()))?;
    let raw_status = xml::attr(response, "status")
        .ok_or_else(|| malformed("RegistryResponse status attribute is missing".into()))?;
    let status = RegistryStatus::parse(&raw_status)
        .ok_or_else(|| malformed(format!("unknown registry status '{raw_status}'")))?;

    let details = response
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "RegistryError")
        .map(|e| AckDetail {
            severity: xml::attr(e, "severity")
                .map(|s| s.rsplit(':').next().unwrap_or_default().to_owned()),
            code: xml::attr(e, "errorCode"),
            text: xml::attr(e, "codeContext").or_else(|| xml::text_of(e)),
        })
        .collect();

    let correlation_id = xml::descendant(doc.root(), "RelatesTo").and_then(xml::text_of);

    Ok(AcknowledgmentResult {
        status: ResponseStatus::Registry(status),
        correlation_id,
        details,
        identifiers: Vec::new(),
    })
}

fn malformed(reason: String) -> WireError {
    WireError::MalformedResponse(reason)
}
