#![allow(dead_code)]

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use ihe_core::{
    AssertionCache, AssertionProvider, BatchOrchestrator, BatchSettings, CancellationToken,
    CollaboratorError, DocumentPayload, DocumentSource, Endpoints, MemoryAuditLog, RawResponse,
    RetryPolicy, Sleeper, Timeouts, Transport, TransportEngine, TransportFailure,
};
use ihe_wire::soap::REGISTRATION_ACTION;
use ihe_wire::{CodedValue, DocumentMetadata, Oid, PatientRecord, RegistryStatus, SignedAssertion, WireRequest};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const REGISTRY: &str = "http://registry.test/pix";
pub const REPOSITORY: &str = "http://repository.test/xdsb";
pub const SOURCE: &str = "patients.yaml";

/// One request as seen by the scripted transport.
#[derive(Clone, Debug)]
pub struct Call {
    pub endpoint: String,
    pub action: &'static str,
    pub message_id: String,
    pub patient_id: String,
    pub body: String,
}

impl Call {
    pub fn parse(endpoint: &str, request: &WireRequest) -> Self {
        let body = String::from_utf8_lossy(&request.body).into_owned();
        let message_id = text_between(&body, "<wsa:MessageID>urn:uuid:", "<")
            .unwrap_or_default()
            .to_owned();
        // Test patient ids are always "P-" followed by three digits.
        let patient_id = body
            .match_indices("P-")
            .filter_map(|(i, _)| body.get(i..i + 5))
            .find(|id| id[2..].bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or_default()
            .to_owned();
        Self {
            endpoint: endpoint.to_owned(),
            action: request.action,
            message_id,
            patient_id,
            body,
        }
    }

    pub fn is_registration(&self) -> bool {
        self.action == REGISTRATION_ACTION
    }
}

fn text_between<'a>(text: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = text.find(start)? + start.len();
    let len = text[from..].find(end)?;
    Some(&text[from..from + len])
}

pub type Reply = Result<RawResponse, TransportFailure>;

/// Transport whose replies are computed by a closure; clones share the call log.
#[derive(Clone)]
pub struct ScriptedTransport {
    responder: Arc<dyn Fn(&Call) -> Reply>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedTransport {
    pub fn new(responder: impl Fn(&Call) -> Reply + 'static) -> Self {
        Self {
            responder: Arc::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, patient_id: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.patient_id == patient_id)
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, endpoint: &str, request: &WireRequest, _timeout: Duration) -> Reply {
        let call = Call::parse(endpoint, request);
        self.calls.lock().unwrap().push(call.clone());
        (self.responder)(&call)
    }
}

#[derive(Clone, Default)]
pub struct RecordingSleeper(Arc<Mutex<Vec<Duration>>>);

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.0.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
    }
}

pub struct StaticAssertions {
    pub lifetime: ChronoDuration,
}

impl AssertionProvider for StaticAssertions {
    fn signed_assertion(
        &self,
        _subject: &str,
        _audience: &str,
    ) -> Result<SignedAssertion, CollaboratorError> {
        let now = Utc::now();
        Ok(SignedAssertion::new(
            b"<saml2:Assertion ID=\"_test\"/>".to_vec(),
            now - ChronoDuration::minutes(1),
            now + self.lifetime,
        ))
    }
}

/// Serves a fixed document, except for the listed patients.
pub struct StaticDocuments {
    pub unavailable_for: Vec<String>,
}

pub const DOCUMENT: &[u8] = b"<ClinicalDocument xmlns=\"urn:hl7-org:v3\"/>";

impl DocumentSource for StaticDocuments {
    fn document_for(&self, patient: &PatientRecord) -> Result<DocumentPayload, CollaboratorError> {
        if self.unavailable_for.iter().any(|id| id == &patient.id) {
            return Err(CollaboratorError::DocumentUnavailable {
                patient_id: patient.id.clone(),
                reason: "no template for patient".into(),
            });
        }
        Ok(DocumentPayload {
            bytes: DOCUMENT.to_vec(),
            metadata: DocumentMetadata {
                class_code: Some(CodedValue::new("34133-9", "2.16.840.1.113883.6.1")),
                type_code: Some(CodedValue::new("60591-5", "2.16.840.1.113883.6.1")),
                format_code: Some(CodedValue::new(
                    "urn:ihe:pcc:xphr:2007",
                    "1.3.6.1.4.1.19376.1.2.3",
                )),
                media_type: "text/xml".into(),
                title: Some("Summary".into()),
            },
        })
    }
}

pub fn ack(call: &Call, code: &str) -> Reply {
    Ok(RawResponse::ok(format!(
        r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body>
<MCCI_IN000002UV01 xmlns="urn:hl7-org:v3">
  <acknowledgement>
    <typeCode code="{code}"/>
    <targetMessage><id root="{id}"/></targetMessage>
  </acknowledgement>
  <controlActProcess><subject><registrationEvent><subject1><patient>
    <id root="9.9.9" extension="EID-{pid}"/>
  </patient></subject1></registrationEvent></subject></controlActProcess>
</MCCI_IN000002UV01></soap:Body></soap:Envelope>"#,
        id = call.message_id,
        pid = call.patient_id,
    )))
}

pub fn registry(call: &Call, status: RegistryStatus) -> Reply {
    let errors = if status == RegistryStatus::Success {
        String::new()
    } else {
        r#"<rs:RegistryErrorList><rs:RegistryError errorCode="XDSRegistryError" codeContext="rejected by test" severity="urn:oasis:names:tc:ebxml-regrep:ErrorSeverityType:Error"/></rs:RegistryErrorList>"#.to_owned()
    };
    Ok(RawResponse::ok(format!(
        r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope" xmlns:wsa="http://www.w3.org/2005/08/addressing">
<soap:Header><wsa:RelatesTo>urn:uuid:{id}</wsa:RelatesTo></soap:Header>
<soap:Body><rs:RegistryResponse xmlns:rs="urn:oasis:names:tc:ebxml-regrep:xsd:rs:3.0" status="{status}">{errors}</rs:RegistryResponse></soap:Body>
</soap:Envelope>"#,
        id = call.message_id,
        status = status.as_urn(),
    )))
}

/// Accepts every registration (AA) and every submission (Success).
pub fn happy(call: &Call) -> Reply {
    if call.is_registration() {
        ack(call, "AA")
    } else {
        registry(call, RegistryStatus::Success)
    }
}

pub fn http(status: u16) -> Reply {
    Ok(RawResponse {
        status,
        content_type: Some("text/plain".into()),
        body: format!("HTTP {status}").into_bytes(),
    })
}

pub fn patient(n: usize) -> PatientRecord {
    PatientRecord {
        id: format!("P-{n:03}"),
        id_domain: "1.3.6.1.4.1.21367.13.20.1000".into(),
        given: format!("Given{n}"),
        family: "Tester".into(),
        birth_date: NaiveDate::from_ymd_opt(1980, 1, 1 + (n % 28) as u32),
        sex: ["M", "F", "O", "U"][n % 4].into(),
        street: None,
        city: Some("Leeds".into()),
        state: None,
        postal_code: None,
        country: Some("GB".into()),
        phone: None,
    }
}

pub fn patients(count: usize) -> Vec<PatientRecord> {
    (1..=count).map(patient).collect()
}

pub fn endpoints() -> Endpoints {
    Endpoints {
        registration: REGISTRY.into(),
        submission: REPOSITORY.into(),
    }
}

pub struct Harness {
    pub transport: ScriptedTransport,
    pub audit: MemoryAuditLog,
    pub sleeper: RecordingSleeper,
    pub cancel: CancellationToken,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(responder: impl Fn(&Call) -> Reply + 'static) -> Self {
        Self::with_token(CancellationToken::new(), responder)
    }

    pub fn with_token(cancel: CancellationToken, responder: impl Fn(&Call) -> Reply + 'static) -> Self {
        Self {
            transport: ScriptedTransport::new(responder),
            audit: MemoryAuditLog::new(),
            sleeper: RecordingSleeper::default(),
            cancel,
            dir: TempDir::new().expect("tempdir"),
        }
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.dir.path().join("checkpoints")
    }

    pub fn settings(&self, batch_id: &str, interval: usize) -> BatchSettings {
        BatchSettings {
            batch_id: batch_id.into(),
            source_ref: SOURCE.into(),
            sender: Oid::parse("1.3.6.1.4.1.21367.2017.2.1.1").unwrap(),
            receiver: Oid::parse("1.3.6.1.4.1.21367.2017.2.1.2").unwrap(),
            checkpoint_dir: self.checkpoint_dir(),
            checkpoint_interval: interval,
            assertion_audience: "urn:test:registry".into(),
        }
    }

    pub fn orchestrator(&self, settings: BatchSettings) -> BatchOrchestrator {
        self.orchestrator_with(
            settings,
            Box::new(StaticAssertions {
                lifetime: ChronoDuration::hours(1),
            }),
            Box::new(StaticDocuments {
                unavailable_for: vec![],
            }),
        )
    }

    pub fn orchestrator_with(
        &self,
        settings: BatchSettings,
        assertions: Box<dyn AssertionProvider>,
        documents: Box<dyn DocumentSource>,
    ) -> BatchOrchestrator {
        let engine = TransportEngine::new(
            Box::new(self.transport.clone()),
            Box::new(self.audit.clone()),
            RetryPolicy::default(),
            Timeouts::default(),
        )
        .with_sleeper(Box::new(self.sleeper.clone()));
        BatchOrchestrator::new(
            engine,
            AssertionCache::new(assertions, "harness"),
            documents,
            settings,
        )
        .expect("valid settings")
        .with_cancellation(self.cancel.clone())
    }
}

pub fn file_exists(path: &Path) -> bool {
    path.is_file()
}
