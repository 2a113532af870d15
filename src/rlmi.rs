//! RLMI notification decoding (RFC 4662)
//!
//! An aggregated subscription delivers `multipart/related` bodies whose
//! first part is an `application/rlmi+xml` document describing the list
//! members, with subsequent `application/pidf+xml` parts referenced by
//! `Content-ID`. [`decode`] turns one such body into a structured
//! [`DecodedNotification`] without touching any contact state, so it can be
//! tested on raw bytes alone.
//!
//! Also hosts the default resource-list document builder handed to the SIP
//! layer when (re)subscribing.

use bytes::Bytes;
use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{Result, RosterError};
use crate::pidf;
use crate::sip::ResourceListCodec;
use crate::types::PresenceModel;

/// MIME type of the outer notification body
const MULTIPART_RELATED: &str = "multipart/related";
/// MIME type of the mandatory first part
const RLMI_XML: &str = "application/rlmi+xml";
/// MIME type of per-resource presence parts
const PIDF_XML: &str = "application/pidf+xml";

/// The structured result of decoding one aggregated notification
#[derive(Debug, Clone)]
pub struct DecodedNotification {
    /// RLMI `version` attribute
    pub version: u32,
    /// RLMI `fullState` attribute
    pub full_state: bool,
    /// Resource URIs with their optional display names, in document order
    pub names: Vec<(String, Option<String>)>,
    /// Per-resource presence: (uri, model, content-id). The model is `None`
    /// when the referenced part is missing or unparsable; that resource's
    /// presence is simply not updated.
    pub presences: Vec<(String, Option<PresenceModel>, String)>,
}

/// One part of a multipart body
struct BodyPart {
    content_type: String,
    content_id: Option<String>,
    body: String,
}

/// Split a content-type header value into its MIME type and parameters
fn parse_content_type(value: &str) -> (String, HashMap<String, String>) {
    let mut segments = value.split(';');
    let mime = segments.next().unwrap_or("").trim().to_ascii_lowercase();
    let mut params = HashMap::new();
    for segment in segments {
        if let Some((key, val)) = segment.split_once('=') {
            params.insert(
                key.trim().to_ascii_lowercase(),
                val.trim().trim_matches('"').to_string(),
            );
        }
    }
    (mime, params)
}

/// Split a multipart payload into its parts
///
/// Tolerates both CRLF and bare-LF section breaks; the preamble before the
/// first boundary and the epilogue after the closing boundary are dropped.
fn split_multipart(body: &str, boundary: &str) -> Vec<BodyPart> {
    let delimiter = format!("--{}", boundary);
    let mut parts = Vec::new();

    for (i, segment) in body.split(delimiter.as_str()).enumerate() {
        if i == 0 {
            continue; // preamble
        }
        if segment.starts_with("--") {
            break; // closing boundary
        }
        let segment = segment
            .trim_start_matches("\r\n")
            .trim_start_matches('\n');

        let (header_block, content) = match segment.split_once("\r\n\r\n") {
            Some(split) => split,
            None => match segment.split_once("\n\n") {
                Some(split) => split,
                None => continue,
            },
        };

        let mut content_type = String::new();
        let mut content_id = None;
        for line in header_block.lines() {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-type") {
                content_type = value.to_string();
            } else if name.eq_ignore_ascii_case("content-id") {
                content_id = Some(value.trim_matches(['<', '>']).to_string());
            }
        }

        parts.push(BodyPart {
            content_type,
            content_id,
            body: content.trim_end_matches(['\r', '\n']).to_string(),
        });
    }
    parts
}

/// Attribute lookup on an RLMI element, namespace prefixes ignored
fn attribute(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Option<String> {
    for attr in e.attributes().flatten() {
        let key = attr.key.as_ref();
        let local = match key.iter().rposition(|&b| b == b':') {
            Some(pos) => &key[pos + 1..],
            None => key,
        };
        if local == name {
            return Some(String::from_utf8_lossy(&attr.value).to_string());
        }
    }
    None
}

/// State of the `<resource>` element currently being read
struct ResourceInProgress {
    uri: String,
    name: Option<String>,
    cid: Option<String>,
}

/// Decode one aggregated notification body
///
/// `expected_version` is only used to report protocol anomalies; version
/// bookkeeping stays with the caller. Missing `version` or `fullState`
/// attributes abort the decode; every other irregularity degrades to a
/// partial result with a warning.
pub fn decode(
    content_type: &str,
    body: &Bytes,
    expected_version: u32,
) -> Result<DecodedNotification> {
    let (mime, params) = parse_content_type(content_type);
    if mime != MULTIPART_RELATED {
        return Err(RosterError::MalformedBody(format!(
            "expected {}, got '{}'",
            MULTIPART_RELATED, mime
        )));
    }
    let boundary = params
        .get("boundary")
        .ok_or_else(|| RosterError::MalformedBody("missing multipart boundary".to_string()))?;

    let text = std::str::from_utf8(body)?;
    let parts = split_multipart(text, boundary);
    let Some(first) = parts.first() else {
        return Err(RosterError::MalformedBody("empty multipart body".to_string()));
    };
    let (first_mime, _) = parse_content_type(&first.content_type);
    if first_mime != RLMI_XML {
        return Err(RosterError::MalformedBody(format!(
            "first part must be {}, got '{}'",
            RLMI_XML, first_mime
        )));
    }

    // Index the presence parts by content-id for resource resolution.
    let mut pidf_parts: HashMap<&str, &BodyPart> = HashMap::new();
    for part in &parts[1..] {
        let (part_mime, _) = parse_content_type(&part.content_type);
        match &part.content_id {
            Some(cid) if part_mime == PIDF_XML => {
                pidf_parts.insert(cid.as_str(), part);
            }
            _ => debug!(
                "ignoring multipart part with type '{}' and no usable content-id",
                part.content_type
            ),
        }
    }

    let mut reader = Reader::from_str(&first.body);
    reader.config_mut().trim_text(true);

    let mut version: Option<u32> = None;
    let mut full_state: Option<bool> = None;
    let mut names: Vec<(String, Option<String>)> = Vec::new();
    let mut presences: Vec<(String, Option<PresenceModel>, String)> = Vec::new();

    let mut current: Option<ResourceInProgress> = None;
    let mut in_name = false;

    let finalize = |resource: ResourceInProgress,
                    names: &mut Vec<(String, Option<String>)>,
                    presences: &mut Vec<(String, Option<PresenceModel>, String)>| {
        names.push((resource.uri.clone(), resource.name));
        if let Some(cid) = resource.cid {
            let model = match pidf_parts.get(cid.as_str()) {
                Some(part) => match pidf::parse(&part.body) {
                    Ok(model) => Some(model),
                    Err(err) => {
                        warn!("unparsable PIDF part '{}': {}", cid, err);
                        None
                    }
                },
                None => {
                    warn!(
                        "resource '{}' references content-id '{}' with no matching part",
                        resource.uri, cid
                    );
                    None
                }
            };
            presences.push((resource.uri, model, cid));
        }
    };

    let mut buf = Vec::new();
    loop {
        let event = reader.read_event_into(&mut buf);
        match event {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let is_empty = matches!(event, Ok(Event::Empty(_)));
                let raw = e.name();
                let local = match raw.as_ref().iter().rposition(|&b| b == b':') {
                    Some(pos) => &raw.as_ref()[pos + 1..],
                    None => raw.as_ref(),
                };
                match local {
                    b"list" => {
                        version = attribute(e, b"version").and_then(|v| v.parse().ok());
                        full_state = attribute(e, b"fullState").map(|v| {
                            matches!(v.to_ascii_lowercase().as_str(), "true" | "1")
                        });
                    }
                    b"resource" => {
                        let uri = attribute(e, b"uri").unwrap_or_default();
                        if uri.is_empty() {
                            debug!("skipping RLMI resource without uri attribute");
                        } else if is_empty {
                            names.push((uri, None));
                        } else {
                            current = Some(ResourceInProgress {
                                uri,
                                name: None,
                                cid: None,
                            });
                        }
                    }
                    b"name" if !is_empty => in_name = true,
                    b"instance" => {
                        if let Some(resource) = current.as_mut() {
                            // The first instance carrying a cid wins; a
                            // contact's presence is one document even when
                            // several device instances exist.
                            if resource.cid.is_none() {
                                resource.cid = attribute(e, b"cid");
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) if in_name => {
                if let Some(resource) = current.as_mut() {
                    let text = e
                        .unescape()
                        .map_err(|err| RosterError::DecodeError(err.to_string()))?
                        .to_string();
                    resource.name = Some(text);
                }
                in_name = false;
            }
            Ok(Event::End(ref e)) => {
                let raw = e.name();
                let local = match raw.as_ref().iter().rposition(|&b| b == b':') {
                    Some(pos) => &raw.as_ref()[pos + 1..],
                    None => raw.as_ref(),
                };
                match local {
                    b"name" => in_name = false,
                    b"resource" => {
                        if let Some(resource) = current.take() {
                            finalize(resource, &mut names, &mut presences);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(RosterError::DecodeError(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let version = version.ok_or_else(|| {
        RosterError::DecodeError("RLMI list without version attribute".to_string())
    })?;
    let full_state = full_state.ok_or_else(|| {
        RosterError::DecodeError("RLMI list without fullState attribute".to_string())
    })?;

    if expected_version == 0 && !full_state {
        warn!("first notification of a dialog is not full-state");
    }
    if version < expected_version && !full_state {
        warn!(
            "stale notification version {} (expected at least {}); applying anyway",
            version, expected_version
        );
    }

    Ok(DecodedNotification {
        version,
        full_state,
        names,
        presences,
    })
}

// ============ Resource-list building ============

/// Default `application/resource-lists+xml` builder (RFC 4826)
///
/// Input is sorted by the caller; consecutive duplicate URIs collapse to a
/// single `<entry>`.
pub struct XmlResourceListCodec;

impl ResourceListCodec for XmlResourceListCodec {
    fn build_resource_list(&self, uris: &[String]) -> Bytes {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(
            "<resource-lists xmlns=\"urn:ietf:params:xml:ns:resource-lists\">\n  <list>\n",
        );
        let mut last: Option<&str> = None;
        for uri in uris {
            if last == Some(uri.as_str()) {
                continue;
            }
            xml.push_str(&format!("    <entry uri=\"{}\"/>\n", escape_attr(uri)));
            last = Some(uri.as_str());
        }
        xml.push_str("  </list>\n</resource-lists>");
        Bytes::from(xml)
    }
}

fn escape_attr(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '<' => "&lt;".to_string(),
            '>' => "&gt;".to_string(),
            '&' => "&amp;".to_string(),
            '"' => "&quot;".to_string(),
            c => c.to_string(),
        })
        .collect()
}
