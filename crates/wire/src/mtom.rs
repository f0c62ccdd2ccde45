//! MTOM/XOP packaging for document submission.
//!
//! A document submission travels as a `multipart/related` body with exactly two
//! linked parts:
//!
//! ```text
//! --MIMEBoundary_<uuid>
//! Content-Type: application/xop+xml; charset=UTF-8; type="application/soap+xml"
//! Content-ID: <root-cid>
//!
//! <soap:Envelope> ... <xop:Include href="cid:attachment-cid"/> ... </soap:Envelope>
//! --MIMEBoundary_<uuid>
//! Content-Type: text/xml
//! Content-ID: <attachment-cid>
//!
//! <binary document bytes>
//! --MIMEBoundary_<uuid>--
//! ```
//!
//! The envelope only ever holds the cross-reference token; the document bytes
//! stay in [`Attachment`] until [`MtomPackage::to_bytes`] writes the body.

use crate::{WireError, WireResult};
use uuid::Uuid;

const CRLF: &[u8] = b"\r\n";

/// Generates a fresh Content-ID (without angle brackets).
pub fn new_content_id() -> String {
    format!("{}@ihe-harness", Uuid::new_v4().simple())
}

/// The binary part of an MTOM package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub content_id: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            content_id: new_content_id(),
            media_type: media_type.into(),
            bytes,
        }
    }

    /// The cross-reference token placed in `xop:Include/@href`.
    pub fn href(&self) -> String {
        format!("cid:{}", self.content_id)
    }
}

/// The XML root part of an MTOM package.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XopRootPart {
    pub content_id: String,
    pub envelope: Vec<u8>,
}

impl XopRootPart {
    pub fn new(envelope: Vec<u8>) -> Self {
        Self {
            content_id: new_content_id(),
            envelope,
        }
    }
}

/// Two linked parts: the SOAP envelope and the binary document it references.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MtomPackage {
    boundary: String,
    root: XopRootPart,
    attachment: Attachment,
}

impl MtomPackage {
    pub fn new(root: XopRootPart, attachment: Attachment) -> Self {
        Self {
            boundary: format!("MIMEBoundary_{}", Uuid::new_v4().simple()),
            root,
            attachment,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn root(&self) -> &XopRootPart {
        &self.root
    }

    pub fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    /// HTTP `Content-Type` header value for this package.
    pub fn content_type(&self, action: &str) -> String {
        format!(
            "multipart/related; type=\"application/xop+xml\"; boundary=\"{}\"; start=\"<{}>\"; start-info=\"application/soap+xml\"; action=\"{}\"",
            self.boundary, self.root.content_id, action
        )
    }

    /// Serialises both parts into a `multipart/related` body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.root.envelope.len() + self.attachment.bytes.len() + 512,
        );
        let delimiter = format!("--{}", self.boundary);

        out.extend_from_slice(delimiter.as_bytes());
        out.extend_from_slice(CRLF);
        out.extend_from_slice(
            b"Content-Type: application/xop+xml; charset=UTF-8; type=\"application/soap+xml\"\r\n",
        );
        out.extend_from_slice(b"Content-Transfer-Encoding: 8bit\r\n");
        out.extend_from_slice(format!("Content-ID: <{}>\r\n\r\n", self.root.content_id).as_bytes());
        out.extend_from_slice(&self.root.envelope);
        out.extend_from_slice(CRLF);

        out.extend_from_slice(delimiter.as_bytes());
        out.extend_from_slice(CRLF);
        out.extend_from_slice(format!("Content-Type: {}\r\n", self.attachment.media_type).as_bytes());
        out.extend_from_slice(b"Content-Transfer-Encoding: binary\r\n");
        out.extend_from_slice(
            format!("Content-ID: <{}>\r\n\r\n", self.attachment.content_id).as_bytes(),
        );
        out.extend_from_slice(&self.attachment.bytes);
        out.extend_from_slice(CRLF);

        out.extend_from_slice(delimiter.as_bytes());
        out.extend_from_slice(b"--\r\n");
        out
    }
}

/// One part of a parsed `multipart/related` body, borrowing from the raw bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MimePart<'a> {
    pub headers: Vec<(String, String)>,
    pub body: &'a [u8],
}

impl MimePart<'_> {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Content-ID without surrounding angle brackets.
    pub fn content_id(&self) -> Option<&str> {
        self.header("Content-ID")
            .map(|v| v.trim().trim_start_matches('<').trim_end_matches('>'))
    }
}

/// Returns true if `raw` starts (after whitespace) with a MIME boundary delimiter.
pub fn looks_multipart(raw: &[u8]) -> bool {
    skip_whitespace(raw).starts_with(b"--")
}

/// Splits a `multipart/related` body into its parts.
///
/// The boundary is taken from the first delimiter line, so no Content-Type
/// header is needed. A part ends at the next CRLF-prefixed delimiter, which keeps
/// binary bodies containing `--` intact.
pub fn split_multipart(raw: &[u8]) -> WireResult<Vec<MimePart<'_>>> {
    let raw = skip_whitespace(raw);
    let first_line_end = find(raw, b"\n")
        .ok_or_else(|| malformed("multipart body has no delimiter line"))?;
    let boundary = trim_ascii(&raw[..first_line_end])
        .strip_prefix(b"--")
        .ok_or_else(|| malformed("multipart body does not start with a delimiter"))?;
    if boundary.is_empty() {
        return Err(malformed("multipart boundary is empty"));
    }

    let mut delimiter = b"--".to_vec();
    delimiter.extend_from_slice(boundary);
    let mut next_delimiter = b"\n".to_vec();
    next_delimiter.extend_from_slice(&delimiter);

    let mut parts = Vec::new();
    let mut cursor = 0usize;
    loop {
        let after = cursor + delimiter.len();
        if raw[after..].starts_with(b"--") {
            break;
        }
        let line_end = find(&raw[after..], b"\n")
            .ok_or_else(|| malformed("multipart delimiter line is not terminated"))?;
        let part_start = after + line_end + 1;
        let rest = &raw[part_start..];
        let part_len = find(rest, &next_delimiter)
            .ok_or_else(|| malformed("multipart part is not terminated by a delimiter"))?;

        let mut part = &rest[..part_len];
        if let Some(stripped) = part.strip_suffix(b"\r") {
            part = stripped;
        }
        parts.push(parse_part(part)?);
        cursor = part_start + part_len + 1;
    }

    Ok(parts)
}

fn parse_part(part: &[u8]) -> WireResult<MimePart<'_>> {
    let (header_block, body) = if let Some(pos) = find(part, b"\r\n\r\n") {
        (&part[..pos], &part[pos + 4..])
    } else if let Some(pos) = find(part, b"\n\n") {
        (&part[..pos], &part[pos + 2..])
    } else {
        return Err(malformed("multipart part has no header separator"));
    };

    let header_text = std::str::from_utf8(header_block)
        .map_err(|_| malformed("multipart headers are not ASCII"))?;
    let headers = header_text
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .collect();

    Ok(MimePart { headers, body })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn skip_whitespace(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(raw.len());
    &raw[start..]
}

fn trim_ascii(raw: &[u8]) -> &[u8] {
    let start = raw
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(raw.len());
    let end = raw
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &raw[start..end]
}

fn malformed(reason: &str) -> WireError {
    WireError::MalformedResponse(reason.to_owned())
}
