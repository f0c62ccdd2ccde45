//! Transport engine: one message exchange with classified, bounded retry.

use crate::audit::{AuditEntry, AuditLog, Direction};
use crate::classify::{classify, ErrorClass};
use crate::constants::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_RETRIES, DEFAULT_REGISTRATION_TIMEOUT_SECS,
    DEFAULT_SUBMISSION_TIMEOUT_SECS, HTTP_ERROR_EXCERPT_LEN,
};
use crate::error::{TransactionError, TransactionResult};
use crate::transport::{Transport, TransportFailure};
use chrono::Utc;
use ihe_types::MessageId;
use ihe_wire::{
    parse_registration_acknowledgment, parse_registry_response, AcknowledgmentResult,
    TransactionKind, TransactionMessage, WireRequest,
};
use std::time::Duration;

/// Bounded exponential backoff for transient failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after failed attempt `attempt` (zero-based):
    /// `base_delay * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Per-attempt timeouts, one per transaction type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub registration: Duration,
    pub submission: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            registration: Duration::from_secs(DEFAULT_REGISTRATION_TIMEOUT_SECS),
            submission: Duration::from_secs(DEFAULT_SUBMISSION_TIMEOUT_SECS),
        }
    }
}

impl Timeouts {
    pub fn for_kind(&self, kind: TransactionKind) -> Duration {
        match kind {
            TransactionKind::Registration => self.registration,
            TransactionKind::DocumentSubmission => self.submission,
        }
    }
}

/// Blocking wait between retries; injectable so tests do not sleep.
pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Executes message exchanges over a [`Transport`].
pub struct TransportEngine {
    transport: Box<dyn Transport>,
    audit: Box<dyn AuditLog>,
    sleeper: Box<dyn Sleeper>,
    retry: RetryPolicy,
    timeouts: Timeouts,
}

impl TransportEngine {
    pub fn new(
        transport: Box<dyn Transport>,
        audit: Box<dyn AuditLog>,
        retry: RetryPolicy,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            transport,
            audit,
            sleeper: Box::new(ThreadSleeper),
            retry,
            timeouts,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Sends `message` to `endpoint` and returns the accepted acknowledgment.
    ///
    /// Transient failures are retried after `base_delay * 2^attempt` while retries
    /// remain; permanent and critical failures return immediately. A parsed but
    /// unsuccessful acknowledgment is returned as [`TransactionError::ProtocolRejection`].
    pub fn execute(
        &self,
        message: &TransactionMessage,
        endpoint: &str,
    ) -> TransactionResult<AcknowledgmentResult> {
        let message_id = message.message_id();
        let kind = message.kind();
        let wire = message.to_wire();
        let timeout = self.timeouts.for_kind(kind);

        let mut attempt = 0u32;
        loop {
            let error = match self.attempt(kind, message_id, &wire, endpoint, timeout, attempt) {
                Ok(ack) => {
                    tracing::debug!(%message_id, %kind, attempt, status = %ack.status, "exchange accepted");
                    return Ok(ack);
                }
                Err(error) => error,
            };

            let class = classify(&error);
            if class != ErrorClass::Transient || attempt >= self.retry.max_retries {
                tracing::debug!(%message_id, %kind, attempt, %class, "exchange failed: {error}");
                return Err(error);
            }

            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                %message_id,
                %kind,
                attempt,
                delay_ms = duration_ms(delay),
                "transient failure, retrying: {error}"
            );
            self.sleeper.sleep(delay);
            attempt += 1;
        }
    }

    fn attempt(
        &self,
        kind: TransactionKind,
        message_id: MessageId,
        wire: &WireRequest,
        endpoint: &str,
        timeout: std::time::Duration,
        attempt: u32,
    ) -> TransactionResult<AcknowledgmentResult> {
        self.audit(Direction::Request, message_id, attempt, &wire.body);

        let response = self
            .transport
            .send(endpoint, wire, timeout)
            .map_err(|failure| TransactionError::Transport {
                message_id,
                failure,
            })?;

        self.audit(Direction::Response, message_id, attempt, &response.body);

        if !response.is_success() {
            return Err(TransactionError::Transport {
                message_id,
                failure: TransportFailure::HttpStatus {
                    status: response.status,
                    excerpt: excerpt(&response.body),
                },
            });
        }

        let ack = match kind {
            TransactionKind::Registration => parse_registration_acknowledgment(&response.body),
            TransactionKind::DocumentSubmission => parse_registry_response(&response.body),
        }
        .map_err(|e| TransactionError::from_wire(e, message_id))?;

        if let Some(correlation) = ack.correlation_id.as_deref() {
            if !message_id.matches(correlation) {
                tracing::warn!(%message_id, correlation, "response correlation id does not match request");
            }
        }

        if ack.is_success() {
            Ok(ack)
        } else {
            Err(TransactionError::ProtocolRejection {
                message_id,
                ack: Box::new(ack),
            })
        }
    }

    fn audit(&self, direction: Direction, message_id: MessageId, attempt: u32, bytes: &[u8]) {
        self.audit.record(&AuditEntry {
            direction,
            message_id,
            attempt,
            timestamp: Utc::now(),
            bytes,
        });
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    match trimmed.char_indices().nth(HTTP_ERROR_EXCERPT_LEN) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::transport::RawResponse;
    use chrono::Duration as ChronoDuration;
    use ihe_wire::{build_registration_request, Oid, PatientRecord, SignedAssertion};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    #[test]
    fn duration_ms_saturates_instead_of_truncating() {
        assert_eq!(duration_ms(Duration::from_millis(1_500)), 1_500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }

    type Script = Rc<RefCell<VecDeque<Result<RawResponse, TransportFailure>>>>;

    struct ScriptedTransport {
        script: Script,
        sent: Rc<RefCell<u32>>,
        ack_code: Option<&'static str>,
    }

    impl Transport for ScriptedTransport {
        fn send(
            &self,
            _endpoint: &str,
            request: &WireRequest,
            _timeout: Duration,
        ) -> Result<RawResponse, TransportFailure> {
            *self.sent.borrow_mut() += 1;
            let next = self
                .script
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(TransportFailure::Other("script exhausted".into())));
            // An empty 200 body means "acknowledge this request".
            match (next, self.ack_code) {
                (Ok(r), Some(code)) if r.body.is_empty() => Ok(RawResponse::ok(ack_for(request, code))),
                (other, _) => other,
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSleeper(Rc<RefCell<Vec<Duration>>>);

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, duration: Duration) {
            self.0.borrow_mut().push(duration);
        }
    }

    fn ack_for(request: &WireRequest, code: &str) -> Vec<u8> {
        let text = String::from_utf8_lossy(&request.body);
        let start = text.find("<wsa:MessageID>urn:uuid:").expect("message id header") + 24;
        let id = &text[start..start + 36];
        format!(
            r#"<MCCI_IN000002UV01 xmlns="urn:hl7-org:v3"><acknowledgement><typeCode code="{code}"/><targetMessage><id root="{id}"/></targetMessage></acknowledgement></MCCI_IN000002UV01>"#
        )
        .into_bytes()
    }

    fn message() -> TransactionMessage {
        let now = Utc::now();
        let patient = PatientRecord {
            id: "P-1".into(),
            id_domain: "1.2.3".into(),
            given: "Ada".into(),
            family: "Lovelace".into(),
            birth_date: chrono::NaiveDate::from_ymd_opt(1815, 12, 10),
            sex: "F".into(),
            street: None,
            city: None,
            state: None,
            postal_code: None,
            country: None,
            phone: None,
        };
        build_registration_request(
            &patient,
            &Oid::parse("1.2.3.4").unwrap(),
            &Oid::parse("1.2.3.5").unwrap(),
            &SignedAssertion::new(b"<A/>".to_vec(), now, now + ChronoDuration::minutes(5)),
        )
        .expect("valid")
        .into()
    }

    struct Harness {
        engine: TransportEngine,
        sent: Rc<RefCell<u32>>,
        sleeps: RecordingSleeper,
        audit: MemoryAuditLog,
    }

    fn harness(script: Vec<Result<RawResponse, TransportFailure>>, ack_code: &'static str) -> Harness {
        let sent = Rc::new(RefCell::new(0));
        let sleeps = RecordingSleeper::default();
        let audit = MemoryAuditLog::new();
        let engine = TransportEngine::new(
            Box::new(ScriptedTransport {
                script: Rc::new(RefCell::new(script.into())),
                sent: sent.clone(),
                ack_code: Some(ack_code),
            }),
            Box::new(audit.clone()),
            RetryPolicy::default(),
            Timeouts::default(),
        )
        .with_sleeper(Box::new(sleeps.clone()));
        Harness {
            engine,
            sent,
            sleeps,
            audit,
        }
    }

    fn connect_refused() -> Result<RawResponse, TransportFailure> {
        Err(TransportFailure::Connect("connection refused".into()))
    }

    fn status(code: u16) -> Result<RawResponse, TransportFailure> {
        Ok(RawResponse {
            status: code,
            content_type: None,
            body: format!("HTTP {code}").into_bytes(),
        })
    }

    #[test]
    fn delays_double_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn transient_twice_then_success_takes_three_attempts() {
        let h = harness(vec![connect_refused(), status(503), Ok(RawResponse::ok(""))], "AA");
        let ack = h.engine.execute(&message(), "http://registry").expect("third attempt succeeds");
        assert!(ack.is_success());
        assert_eq!(*h.sent.borrow(), 3);
        assert_eq!(
            *h.sleeps.0.borrow(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
    }

    #[test]
    fn not_found_is_not_retried() {
        let h = harness(vec![status(404)], "AA");
        let err = h.engine.execute(&message(), "http://registry").expect_err("404");
        assert_eq!(classify(&err), ErrorClass::Permanent);
        assert_eq!(*h.sent.borrow(), 1);
        assert!(h.sleeps.0.borrow().is_empty());
    }

    #[test]
    fn critical_failure_is_not_retried() {
        let h = harness(vec![Err(TransportFailure::Tls("UnknownIssuer".into()))], "AA");
        let err = h.engine.execute(&message(), "http://registry").expect_err("tls");
        assert_eq!(classify(&err), ErrorClass::Critical);
        assert_eq!(*h.sent.borrow(), 1);
    }

    #[test]
    fn retries_are_bounded() {
        let h = harness(
            vec![connect_refused(), connect_refused(), connect_refused(), connect_refused(), Ok(RawResponse::ok(""))],
            "AA",
        );
        let err = h.engine.execute(&message(), "http://registry").expect_err("exhausted");
        assert!(matches!(err, TransactionError::Transport { .. }));
        assert_eq!(*h.sent.borrow(), 4);
        assert_eq!(h.sleeps.0.borrow().len(), 3);
    }

    #[test]
    fn rejection_is_permanent_and_carries_ack() {
        let h = harness(vec![Ok(RawResponse::ok(""))], "AR");
        let msg = message();
        let err = h.engine.execute(&msg, "http://registry").expect_err("AR");
        assert_eq!(classify(&err), ErrorClass::Permanent);
        assert_eq!(err.message_id(), msg.message_id());
        assert_eq!(err.acknowledgment().map(|a| a.status.code()), Some("AR"));
        assert_eq!(*h.sent.borrow(), 1);
    }

    #[test]
    fn malformed_response_is_audited_before_failing() {
        let garbage = b"\xff\xfe<soap:Fault>".to_vec();
        let h = harness(vec![Ok(RawResponse::ok(garbage.clone()))], "AA");
        let msg = message();
        let err = h.engine.execute(&msg, "http://registry").expect_err("garbage");
        assert!(matches!(err, TransactionError::MalformedResponse { .. }));
        assert_eq!(classify(&err), ErrorClass::Critical);

        let records = h.audit.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].direction, Direction::Request);
        assert_eq!(records[1].direction, Direction::Response);
        assert_eq!(records[1].bytes, garbage);
        assert!(records.iter().all(|r| r.message_id == msg.message_id()));
    }

    #[test]
    fn every_attempt_is_audited() {
        let h = harness(vec![connect_refused(), Ok(RawResponse::ok(""))], "CA");
        h.engine.execute(&message(), "http://registry").expect("second attempt");
        let records = h.audit.records();
        let legs: Vec<_> = records.iter().map(|r| (r.attempt, r.direction)).collect();
        assert_eq!(
            legs,
            vec![
                (0, Direction::Request),
                (1, Direction::Request),
                (1, Direction::Response)
            ]
        );
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let long = "x".repeat(HTTP_ERROR_EXCERPT_LEN + 10);
        let cut = excerpt(long.as_bytes());
        assert!(cut.ends_with("..."));
        assert_eq!(cut.len(), HTTP_ERROR_EXCERPT_LEN + 3);
    }
}
