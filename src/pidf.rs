//! PIDF presence document parsing (RFC 3863, with RPID activities)
//!
//! Parses the `application/pidf+xml` parts of an aggregated notification
//! into [`PresenceModel`] values. Only the subset the engine acts on is
//! extracted: the basic status of the first tuple, RPID activities, the
//! note, and the timestamp.

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::debug;

use crate::error::{Result, RosterError};
use crate::types::{BasicStatus, PresenceActivity, PresenceModel};

/// Element name without its namespace prefix
fn local_name(raw: &[u8]) -> &[u8] {
    match raw.iter().rposition(|&b| b == b':') {
        Some(pos) => &raw[pos + 1..],
        None => raw,
    }
}

/// Parse a PIDF document into a presence model
///
/// A document without any `<basic>` status is rejected; everything else is
/// tolerated and simply left unset.
pub fn parse(xml: &str) -> Result<PresenceModel> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut basic: Option<BasicStatus> = None;
    let mut activities: Vec<PresenceActivity> = Vec::new();
    let mut note: Option<String> = None;
    let mut timestamp: Option<DateTime<Utc>> = None;

    let mut in_basic = false;
    let mut in_note = false;
    let mut in_timestamp = false;
    let mut in_activities = false;

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match local_name(e.name().as_ref()) {
                b"basic" => in_basic = true,
                b"note" => in_note = true,
                b"timestamp" => in_timestamp = true,
                b"activities" => in_activities = true,
                other if in_activities => {
                    let token = String::from_utf8_lossy(other).to_string();
                    activities.push(PresenceActivity::from_token(&token));
                }
                _ => {}
            },
            Ok(Event::Empty(ref e)) if in_activities => {
                let token = String::from_utf8_lossy(local_name(e.name().as_ref())).to_string();
                activities.push(PresenceActivity::from_token(&token));
            }
            Ok(Event::Text(ref e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| RosterError::DecodeError(err.to_string()))?
                    .to_string();
                if in_basic {
                    // The first tuple's status wins; later tuples are
                    // ignored.
                    if basic.is_none() {
                        basic = Some(match text.to_ascii_lowercase().as_str() {
                            "open" => BasicStatus::Open,
                            "closed" => BasicStatus::Closed,
                            other => {
                                return Err(RosterError::DecodeError(format!(
                                    "invalid basic status '{}'",
                                    other
                                )));
                            }
                        });
                    }
                    in_basic = false;
                } else if in_note {
                    if note.is_none() {
                        note = Some(text);
                    }
                    in_note = false;
                } else if in_timestamp {
                    match DateTime::parse_from_rfc3339(&text) {
                        Ok(ts) => timestamp = Some(ts.with_timezone(&Utc)),
                        Err(err) => debug!("ignoring unparsable timestamp '{}': {}", text, err),
                    }
                    in_timestamp = false;
                }
            }
            Ok(Event::End(ref e)) => match local_name(e.name().as_ref()) {
                b"basic" => in_basic = false,
                b"note" => in_note = false,
                b"timestamp" => in_timestamp = false,
                b"activities" => in_activities = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(RosterError::DecodeError(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let basic =
        basic.ok_or_else(|| RosterError::DecodeError("PIDF without basic status".to_string()))?;

    Ok(PresenceModel {
        basic_status: basic,
        activities,
        note,
        timestamp: timestamp.unwrap_or_else(Utc::now),
    })
}
