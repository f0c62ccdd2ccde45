//! SOAP 1.2 envelope construction with WS-Addressing and WS-Security headers.

use crate::assertion::SignedAssertion;
use crate::xml::escape;
use ihe_types::MessageId;

pub const SOAP_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
pub const WSA_NS: &str = "http://www.w3.org/2005/08/addressing";
pub const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";
pub const WSA_ANONYMOUS: &str = "http://www.w3.org/2005/08/addressing/anonymous";

/// WS-Addressing action of the HL7v3 patient registration (ITI-44 Patient Identity Feed).
pub const REGISTRATION_ACTION: &str = "urn:hl7-org:v3:PRPA_IN201301UV02";

/// WS-Addressing action of ITI-41 Provide and Register Document Set-b.
pub const SUBMISSION_ACTION: &str = "urn:ihe:iti:2007:ProvideAndRegisterDocumentSet-b";

/// Wraps `body` in a SOAP envelope.
///
/// The assertion token is copied byte-for-byte into the security header, which is
/// why the envelope is assembled as bytes rather than as a `String`.
pub fn envelope(
    action: &str,
    message_id: &MessageId,
    assertion: &SignedAssertion,
    body: &str,
) -> Vec<u8> {
    let head = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<soap:Envelope xmlns:soap="{soap}" xmlns:wsa="{wsa}">"#,
            r#"<soap:Header>"#,
            r#"<wsa:Action soap:mustUnderstand="1">{action}</wsa:Action>"#,
            r#"<wsa:MessageID>{message_id}</wsa:MessageID>"#,
            r#"<wsa:ReplyTo><wsa:Address>{anonymous}</wsa:Address></wsa:ReplyTo>"#,
            r#"<wsse:Security xmlns:wsse="{wsse}" soap:mustUnderstand="1">"#,
        ),
        soap = SOAP_ENV_NS,
        wsa = WSA_NS,
        action = escape(action),
        message_id = message_id.as_urn(),
        anonymous = WSA_ANONYMOUS,
        wsse = WSSE_NS,
    );
    let tail = format!("</wsse:Security></soap:Header><soap:Body>{body}</soap:Body></soap:Envelope>");

    let mut out = Vec::with_capacity(head.len() + assertion.token().len() + tail.len());
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(assertion.token());
    out.extend_from_slice(tail.as_bytes());
    out
}

/// `Content-Type` for a plain (non-MTOM) SOAP 1.2 request.
pub fn soap_content_type(action: &str) -> String {
    format!("application/soap+xml; charset=UTF-8; action=\"{action}\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn envelope_embeds_assertion_bytes_unmodified() {
        let token = b"<saml:Assertion ID=\"_a&b\">signed</saml:Assertion>".to_vec();
        let assertion = SignedAssertion::new(token.clone(), Utc::now(), Utc::now());
        let id = MessageId::new();
        let env = envelope(REGISTRATION_ACTION, &id, &assertion, "<x/>");

        assert!(env.windows(token.len()).any(|w| w == token.as_slice()));
        let text = String::from_utf8(env).unwrap();
        assert!(text.contains(&id.as_urn()));
        assert!(text.contains(REGISTRATION_ACTION));
        assert!(text.contains("<soap:Body><x/></soap:Body>"));
    }
}
