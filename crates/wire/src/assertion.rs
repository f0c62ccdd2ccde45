//! Opaque signed authentication assertion.

use chrono::{DateTime, Utc};

/// A time-bounded, externally signed assertion (for example a SAML token).
///
/// The codec never inspects or re-encodes the token: its bytes are copied
/// unmodified into the WS-Security header of each outgoing message, because any
/// change would break the signature.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedAssertion {
    token: Vec<u8>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl SignedAssertion {
    pub fn new(token: Vec<u8>, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        Self {
            token,
            not_before,
            not_after,
        }
    }

    pub fn token(&self) -> &[u8] {
        &self.token
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn is_valid_at(&self, instant: DateTime<Utc>) -> bool {
        self.not_before <= instant && instant < self.not_after
    }
}

// Token bytes are credentials; keep them out of debug output.
impl std::fmt::Debug for SignedAssertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedAssertion")
            .field("token_len", &self.token.len())
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish()
    }
}
