//! Request, Response and Update envelopes.
//!
//! Outbound requests are built from a [`Request`] body merged with
//! `{id, type: "REQ"}`. Inbound frames deserialize into [`Message`], which
//! only accepts `RESP` and `UPDATE` envelopes.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::update::{DiscoveredDevice, ParsedUpdate};

// ============================================================================
// MessageType
// ============================================================================

/// Envelope type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// Command request.
    #[serde(rename = "REQ")]
    Request,
    /// Command response.
    #[serde(rename = "RESP")]
    Response,
    /// Progress or notification.
    #[serde(rename = "UPDATE")]
    Update,
}

// ============================================================================
// Request
// ============================================================================

/// A command body, before an id is assigned.
///
/// # Example
///
/// ```ignore
/// let request = Request::new("gatt.read")
///     .param("address", "aa:bb:cc:dd:ee:ff")
///     .param("characteristic", "2a19");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// Command name.
    pub command: String,

    /// Command parameters (always an object).
    pub params: Value,
}

impl Request {
    /// Creates a request with empty params.
    #[inline]
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: Value::Object(Map::new()),
        }
    }

    /// Creates a request with the given params.
    ///
    /// Non-object params are replaced by an empty object.
    #[must_use]
    pub fn with_params(command: impl Into<String>, params: Value) -> Self {
        let params = if params.is_object() {
            params
        } else {
            Value::Object(Map::new())
        };
        Self {
            command: command.into(),
            params,
        }
    }

    /// Adds one parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.params {
            map.insert(key.into(), value.into());
        }
        self
    }
}

// ============================================================================
// RequestEnvelope
// ============================================================================

/// A request as it goes on the wire.
///
/// # Format
///
/// ```json
/// { "id": 12, "type": "REQ", "command": "scan.start", "params": { ... } }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope {
    /// Correlation id (never `0`).
    pub id: RequestId,

    /// Always [`MessageType::Request`].
    #[serde(rename = "type")]
    pub message_type: MessageType,

    /// Command body.
    #[serde(flatten)]
    pub request: Request,
}

impl RequestEnvelope {
    /// Wraps a request body with its id.
    #[inline]
    #[must_use]
    pub fn new(id: RequestId, request: Request) -> Self {
        Self {
            id,
            message_type: MessageType::Request,
            request,
        }
    }

    /// Serializes the envelope to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if serialization fails.
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

// ============================================================================
// RemoteError
// ============================================================================

/// Error object carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Gateway error code.
    pub eid: i64,

    /// Gateway error message.
    #[serde(default)]
    pub errmsg: String,
}

// ============================================================================
// Response
// ============================================================================

/// A command response.
///
/// # Format
///
/// ```json
/// { "id": 12, "type": "RESP", "error": null, "results": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Matches the request `id`.
    pub id: RequestId,

    /// Error object, if the command failed.
    #[serde(default)]
    pub error: Option<RemoteError>,

    /// Result data.
    #[serde(default)]
    pub results: Value,
}

impl Response {
    /// Returns `true` if the gateway reported an error.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extracts the results, or the gateway error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if the response carries an error object.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(Error::remote(err.eid, err.errmsg)),
            None => Ok(self.results),
        }
    }
}

// ============================================================================
// Update
// ============================================================================

/// A progress update or unsolicited notification.
///
/// # Format
///
/// ```json
/// { "id": 0, "type": "UPDATE", "update": "characteristicChanged", "results": { ... } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Request id, or `0` for unsolicited notifications.
    pub id: RequestId,

    /// Update tag.
    pub update: String,

    /// Update data.
    #[serde(default)]
    pub results: Value,
}

impl Update {
    /// Returns `true` for out-of-band notifications (`id == 0`).
    #[inline]
    #[must_use]
    pub fn is_unsolicited(&self) -> bool {
        self.id.is_unsolicited()
    }

    /// Parses the update into a typed variant.
    #[must_use]
    pub fn parse(&self) -> ParsedUpdate {
        ParsedUpdate::from_update(self)
    }
}

// ============================================================================
// Message
// ============================================================================

/// An inbound envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// `RESP` envelope.
    #[serde(rename = "RESP")]
    Response(Response),

    /// `UPDATE` envelope.
    #[serde(rename = "UPDATE")]
    Update(Update),
}

impl Message {
    /// Tries to interpret a JSON value as an inbound envelope.
    ///
    /// Returns `None` for anything that is not a `RESP` or `UPDATE`.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        Self::deserialize(value).ok()
    }

    /// Returns the correlation id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> RequestId {
        match self {
            Self::Response(response) => response.id,
            Self::Update(update) => update.id,
        }
    }

    /// Returns the envelope type.
    #[inline]
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Response(_) => MessageType::Response,
            Self::Update(_) => MessageType::Update,
        }
    }

    /// Returns the results payload.
    #[inline]
    #[must_use]
    pub fn results(&self) -> &Value {
        match self {
            Self::Response(response) => &response.results,
            Self::Update(update) => &update.results,
        }
    }

    /// Returns the update, if this is one.
    #[inline]
    #[must_use]
    pub fn as_update(&self) -> Option<&Update> {
        match self {
            Self::Update(update) => Some(update),
            Self::Response(_) => None,
        }
    }

    /// Returns the response, if this is one.
    #[inline]
    #[must_use]
    pub fn as_response(&self) -> Option<&Response> {
        match self {
            Self::Response(response) => Some(response),
            Self::Update(_) => None,
        }
    }

    /// Extracts the results, or the gateway error for failed responses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Remote`] if this is a response with an error object.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Self::Response(response) => response.into_result(),
            Self::Update(update) => Ok(update.results),
        }
    }

    /// Returns the device described by a scan result, if any.
    ///
    /// Only `scanResult` updates name a device; responses never do, even
    /// when their results carry an address.
    #[must_use]
    pub fn discovered_device(&self) -> Option<DiscoveredDevice> {
        match self.as_update()?.parse() {
            ParsedUpdate::ScanResult(device) => Some(device),
            _ => None,
        }
    }

    /// Gets a string value from the results.
    ///
    /// Returns `None` if the key is missing or not a string.
    #[inline]
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.results().get(key).and_then(Value::as_str)
    }

    /// Gets a u64 value from the results.
    ///
    /// Returns 0 if the key is missing or not a number.
    #[inline]
    #[must_use]
    pub fn get_u64(&self, key: &str) -> u64 {
        self.results()
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or_default()
    }

    /// Gets a boolean value from the results.
    ///
    /// Returns false if the key is missing or not a boolean.
    #[inline]
    #[must_use]
    pub fn get_bool(&self, key: &str) -> bool {
        self.results()
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or_default()
    }
}

// ============================================================================
// Inbound Parsing
// ============================================================================

/// Parses a raw text frame into a JSON object.
///
/// # Errors
///
/// Returns [`Error::MalformedMessage`] if the text is not JSON or is not an
/// object.
pub fn parse_inbound(text: &str) -> Result<Value> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::malformed(format!("invalid JSON: {e}")))?;

    if !value.is_object() {
        return Err(Error::malformed("payload is not an object"));
    }

    Ok(value)
}

// ============================================================================
// Tests
// ============================================================================
