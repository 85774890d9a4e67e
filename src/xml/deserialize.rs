//! XML deserialization of storage service responses.

use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;

use crate::error::{ErrorCode, StorageError, StorageResult};
use crate::models::{SharedAccessPolicy, SignedIdentifier};

/// Parses a Get Container ACL response body.
pub fn parse_signed_identifiers(xml: &str) -> StorageResult<Vec<SignedIdentifier>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut identifiers = Vec::new();
    let mut buf = Vec::new();
    let mut current_text = String::new();

    let mut current_id = String::new();
    let mut current_start: Option<DateTime<Utc>> = None;
    let mut current_expiry: Option<DateTime<Utc>> = None;
    let mut current_permission = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => {
                current_text.clear();
            }
            Ok(Event::End(e)) => {
                match e.name().as_ref() {
                    b"Id" => current_id = current_text.clone(),
                    b"Start" => current_start = parse_xml_datetime(&current_text),
                    b"Expiry" => current_expiry = parse_xml_datetime(&current_text),
                    b"Permission" => current_permission = current_text.clone(),
                    b"SignedIdentifier" => {
                        identifiers.push(SignedIdentifier {
                            id: std::mem::take(&mut current_id),
                            policy: SharedAccessPolicy {
                                permission: std::mem::take(&mut current_permission),
                                start: current_start.take(),
                                expiry: current_expiry.take(),
                            },
                        });
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Text(e)) => {
                current_text = e
                    .unescape()
                    .map_err(|_| invalid_xml("Malformed text in signed identifiers"))?
                    .to_string();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(invalid_xml(&format!("Invalid signed identifiers: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(identifiers)
}

/// Parses an ISO 8601 timestamp, accepting fractional seconds.
fn parse_xml_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Error body returned by the storage service.
#[derive(Debug, Default, Deserialize)]
pub struct UpstreamErrorBody {
    #[serde(rename = "Code", alias = "code", default)]
    pub code: Option<String>,
    #[serde(rename = "Message", alias = "message", default)]
    pub message: Option<String>,
}

/// Parses a storage error body; malformed or empty bodies yield an empty result.
pub fn parse_upstream_error(xml: &str) -> UpstreamErrorBody {
    quick_xml::de::from_str(xml).unwrap_or_default()
}

/// List Containers response from the storage service.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnumerationResults {
    #[serde(default)]
    pub containers: Option<ContainerEntries>,
    #[serde(default)]
    pub next_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContainerEntries {
    #[serde(rename = "Container", default)]
    pub items: Vec<ContainerEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerEntry {
    pub name: String,
}

impl EnumerationResults {
    /// Returns the continuation marker, if the listing has more pages.
    pub fn next_marker(&self) -> Option<&str> {
        self.next_marker.as_deref().filter(|m| !m.is_empty())
    }
}

/// Parses a List Containers response body.
pub fn parse_container_enumeration(xml: &str) -> StorageResult<EnumerationResults> {
    quick_xml::de::from_str(xml)
        .map_err(|e| invalid_xml(&format!("Invalid container listing: {}", e)))
}

fn invalid_xml(message: &str) -> StorageError {
    StorageError::with_message(ErrorCode::InternalError, message)
}
