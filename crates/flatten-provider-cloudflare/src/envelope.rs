//! Response parsing for the CloudFlare client API
//!
//! Every call answers with the same envelope:
//!
//! ```json
//! { "result": "success" | "error", "msg": "...", "err_code": "...", "response": { ... } }
//! ```
//!
//! Numeric fields come back as strings or numbers depending on the call,
//! so the payload types accept both.

use flatten_core::config::normalize_name;
use flatten_core::traits::RecordEntry;
use flatten_core::{Error, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::net::Ipv4Addr;

/// Error code for rejected credentials
const E_UNAUTH: &str = "E_UNAUTH";

/// Error code for an exhausted API quota
const E_MAXAPI: &str = "E_MAXAPI";

/// `service_mode` value of a record served through the proxy
const SERVICE_MODE_PROXIED: &str = "1";

#[derive(Debug, Deserialize)]
struct Envelope {
    result: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    err_code: Option<String>,
    #[serde(default)]
    response: Option<Value>,
}

/// Parse an envelope and return its `response` payload
///
/// A missing payload on success is returned as `Value::Null`; callers
/// that need one will fail when decoding it.
pub(crate) fn parse(action: &str, body: &str) -> Result<Value> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| Error::protocol(format!("{action}: response is not a valid envelope: {e}")))?;

    match envelope.result.as_deref() {
        Some("success") => Ok(envelope.response.unwrap_or(Value::Null)),
        Some("error") => Err(api_error(
            action,
            envelope.err_code.as_deref(),
            envelope.msg.as_deref().unwrap_or("no message"),
        )),
        Some(other) => Err(Error::protocol(format!(
            "{action}: unexpected result \"{other}\""
        ))),
        None => Err(Error::protocol(format!("{action}: envelope has no result"))),
    }
}

/// Map a well-formed error envelope to an error
fn api_error(action: &str, code: Option<&str>, msg: &str) -> Error {
    match code {
        Some(E_UNAUTH) => Error::auth(format!("{action}: {msg}")),
        Some(E_MAXAPI) => Error::throttled(format!("{action}: {msg}")),
        Some(code) => Error::rejected(code, format!("{action}: {msg}")),
        None => Error::rejected("unknown", format!("{action}: {msg}")),
    }
}

/// Map a non-2xx HTTP status to an error
pub(crate) fn status_error(action: &str, status: u16, body: &str) -> Error {
    let detail: String = body.chars().take(200).collect();
    match status {
        401 | 403 => Error::auth(format!(
            "{action}: credentials rejected (HTTP {status})"
        )),
        429 => Error::throttled(format!("{action}: rate limited (HTTP {status})")),
        500..=599 => Error::transport(format!(
            "{action}: server error (HTTP {status}): {detail}"
        )),
        _ => Error::protocol(format!(
            "{action}: unexpected HTTP status {status}: {detail}"
        )),
    }
}

/// Whether an error from `rec_delete` means the record is already gone
pub(crate) fn is_missing_record(err: &Error) -> bool {
    match err {
        Error::ProviderRejected { message, .. } => {
            let message = message.to_ascii_lowercase();
            [
                "not found",
                "could not be found",
                "does not exist",
                "invalid record id",
                "no such record",
            ]
                .iter()
                .any(|needle| message.contains(needle))
        }
        _ => false,
    }
}

/// A record as the API describes it
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub rec_id: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub rec_tag: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
    pub content: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub ttl: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub service_mode: Option<String>,
}

impl RawRecord {
    /// Whether this is an A record for `domain` (already normalized)
    pub fn is_a_record_for(&self, domain: &str) -> bool {
        self.record_type.eq_ignore_ascii_case("A") && normalize_name(&self.name) == domain
    }

    pub fn to_entry(&self) -> Result<RecordEntry> {
        let address: Ipv4Addr = self.content.trim().parse().map_err(|_| {
            Error::protocol(format!(
                "record {} has A content that is not an IPv4 address: {:?}",
                self.rec_id, self.content
            ))
        })?;

        let mut entry = RecordEntry::new(address, self.rec_id.clone())
            .with_proxied(self.service_mode.as_deref() == Some(SERVICE_MODE_PROXIED));
        if let Some(tag) = &self.rec_tag {
            entry = entry.with_tag(tag.clone());
        }
        if let Some(ttl) = self.ttl.as_deref().and_then(|t| t.parse().ok()) {
            entry = entry.with_ttl(ttl);
        }
        Ok(entry)
    }
}

/// One page of `rec_load_all`
#[derive(Debug, Deserialize)]
pub(crate) struct RecordPage {
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub objs: Vec<RawRecord>,
}

#[derive(Debug, Deserialize)]
struct RecordList {
    recs: RecordPage,
}

#[derive(Debug, Deserialize)]
struct RecordObject {
    obj: RawRecord,
}

#[derive(Debug, Deserialize)]
struct SingleRecord {
    rec: RecordObject,
}

/// Decode the payload of `rec_load_all`
pub(crate) fn record_page(response: Value) -> Result<RecordPage> {
    serde_json::from_value::<RecordList>(response)
        .map(|list| list.recs)
        .map_err(|e| Error::protocol(format!("rec_load_all: unexpected payload: {e}")))
}

/// Decode the payload of `rec_new` / `rec_proxy`
pub(crate) fn single_record(action: &str, response: Value) -> Result<RawRecord> {
    serde_json::from_value::<SingleRecord>(response)
        .map(|single| single.rec.obj)
        .map_err(|e| Error::protocol(format!("{action}: unexpected payload: {e}")))
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn opt_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
