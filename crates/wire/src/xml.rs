//! Small XML helpers shared by the builders and parsers.

use crate::mtom;
use crate::{WireError, WireResult};
use roxmltree::{Document, Node};
use std::borrow::Cow;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Escapes the five XML special characters for use in text and attribute values.
pub fn escape(input: &str) -> Cow<'_, str> {
    if !input.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len() + 16);
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

/// Turns raw response bytes into XML text.
///
/// Accepts plain XML (with or without a UTF-8 byte-order mark) and
/// `multipart/related` bodies, in which case the first (root) part is used.
pub fn response_text(raw: &[u8]) -> WireResult<&str> {
    let mut bytes = raw.strip_prefix(UTF8_BOM).unwrap_or(raw);

    if mtom::looks_multipart(bytes) {
        let parts = mtom::split_multipart(bytes)?;
        let root = parts.into_iter().next().ok_or_else(|| {
            WireError::MalformedResponse("multipart response has no parts".into())
        })?;
        bytes = root.body;
        bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    }

    let text = std::str::from_utf8(bytes)
        .map_err(|e| WireError::MalformedResponse(format!("response is not UTF-8: {e}")))?;
    if text.trim().is_empty() {
        return Err(WireError::MalformedResponse("response body is empty".into()));
    }
    Ok(text)
}

/// Parses XML text, mapping parser failures to [`WireError::MalformedResponse`].
pub fn parse_document(text: &str) -> WireResult<Document<'_>> {
    Document::parse(text)
        .map_err(|e| WireError::MalformedResponse(format!("response is not well-formed XML: {e}")))
}

/// Rejects SOAP faults, reporting the fault reason.
pub fn ensure_not_fault(doc: &Document<'_>) -> WireResult<()> {
    let Some(fault) = descendant(doc.root(), "Fault") else {
        return Ok(());
    };
    // SOAP 1.2 carries Reason/Text, SOAP 1.1 carries faultstring.
    let reason = descendant(fault, "Text")
        .or_else(|| descendant(fault, "faultstring"))
        .and_then(|n| n.text())
        .map(str::trim)
        .unwrap_or("no reason given");
    Err(WireError::MalformedResponse(format!("SOAP fault: {reason}")))
}

/// First descendant element (including `node` itself) with the given local name.
pub fn descendant<'a, 'input>(node: Node<'a, 'input>, local: &str) -> Option<Node<'a, 'input>> {
    node.descendants()
        .find(|n| n.is_element() && n.tag_name().name() == local)
}

/// First direct child element with the given local name.
pub fn child<'a, 'input>(node: Node<'a, 'input>, local: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == local)
}

/// All direct child elements with the given local name.
pub fn children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    local: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == local)
}

/// Trimmed, non-empty text content of an element.
pub fn text_of(node: Node<'_, '_>) -> Option<String> {
    node.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

/// Trimmed, non-empty attribute value.
pub fn attr(node: Node<'_, '_>, name: &str) -> Option<String> {
    node.attribute(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}
