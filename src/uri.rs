//! Canonical SIP-address handling
//!
//! Contacts and the address index never key on raw address strings: a raw
//! address may carry a display name, dialog parameters after the angle
//! brackets, or a `gr` parameter naming one device instance (RFC 5627).
//! None of those are stable contact identity, so lookup keys are always the
//! canonical form produced here.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, RosterError};

/// A parsed SIP address: optional display name plus the bare URI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SipAddress {
    /// Display name, without surrounding quotes
    pub display_name: Option<String>,
    /// The URI, including any URI parameters (e.g. `user=phone`)
    pub uri: String,
}

impl SipAddress {
    /// Parse a raw address string
    ///
    /// Accepts `sip:a@d`, `<sip:a@d>`, and `"Alice" <sip:a@d>;tag=x` forms.
    /// Parameters after the closing angle bracket are dialog parameters, not
    /// address identity, and are dropped.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RosterError::InvalidAddress("empty address".to_string()));
        }

        let (display_name, uri) = match (raw.find('<'), raw.find('>')) {
            (Some(open), Some(close)) if open < close => {
                let name = raw[..open].trim().trim_matches('"').trim();
                let name = if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                };
                (name, raw[open + 1..close].trim().to_string())
            }
            _ => (None, raw.to_string()),
        };

        let lower = uri.to_ascii_lowercase();
        if !(lower.starts_with("sip:") || lower.starts_with("sips:") || lower.starts_with("pres:"))
        {
            return Err(RosterError::InvalidAddress(format!(
                "unsupported scheme in '{}'",
                raw
            )));
        }

        Ok(Self { display_name, uri })
    }

    /// The canonical lookup key for this address: the URI with the `gr`
    /// instance parameter removed
    pub fn canonical_uri(&self) -> String {
        strip_instance_param(&self.uri)
    }
}

impl fmt::Display for SipAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "\"{}\" <{}>", name, self.uri),
            None => write!(f, "{}", self.uri),
        }
    }
}

/// Parse a raw address and reduce it to its canonical lookup key
pub fn canonical(raw: &str) -> Result<String> {
    Ok(SipAddress::parse(raw)?.canonical_uri())
}

/// Remove the `gr` URI parameter (RFC 5627 GRUU instance identifier)
///
/// The parameter identifies a specific device instance, not a stable contact
/// identity, so it never participates in index keys.
pub fn strip_instance_param(uri: &str) -> String {
    let mut out = String::with_capacity(uri.len());
    for (i, segment) in uri.split(';').enumerate() {
        if i > 0 {
            let name = segment.split('=').next().unwrap_or(segment);
            if name.eq_ignore_ascii_case("gr") {
                continue;
            }
            out.push(';');
        }
        out.push_str(segment);
    }
    out
}
