//! # Event Envelope
//!
//! Every message on the bus carries an [`Envelope`]: who sent it, what schema the
//! payload follows, when it was created, and the correlation id that ties a
//! reply to its request. A [`TypedEvent`] owns exactly one envelope plus a
//! workflow-specific payload.
//!
//! ## Wire shape
//!
//! Messages are JSON objects. Payload fields sit at the top level and the
//! header is nested under `baseEvent`:
//!
//! ```text
//! {
//!   "baseEvent": { "eventId": "...", "eventType": "...", "source": "...",
//!                  "timestamp": "2024-03-01T12:30:00.000Z", "correlationId": "..." },
//!   "userId": "u-1"
//! }
//! ```
//!
//! Producers in the wild also emit the header fields flattened next to the
//! payload. [`RawEvent::decode`] accepts both shapes; [`TypedEvent::encode`]
//! always writes the nested one.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::timestamp::Timestamp;

const BASE_EVENT_KEY: &str = "baseEvent";
const HEADER_KEYS: [&str; 5] = [
    "eventId",
    "eventType",
    "source",
    "timestamp",
    "correlationId",
];

/// Common header attached to every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub event_id: String,
    pub event_type: String,
    pub source: String,
    pub timestamp: Timestamp,
    pub correlation_id: String,
}

impl Envelope {
    pub fn builder() -> EnvelopeBuilder {
        EnvelopeBuilder::new()
    }

    /// Builds the header of a reply to `request`, propagating its correlation id verbatim.
    pub fn reply_to(request: &Envelope, event_type: &str, source: &str) -> EnvelopeResult<Self> {
        Self::builder()
            .event_type(event_type)
            .source(source)
            .correlation_id(&request.correlation_id)
            .build()
    }

    fn validate(&self) -> EnvelopeResult<()> {
        let fields = [
            ("eventId", &self.event_id),
            ("eventType", &self.event_type),
            ("source", &self.source),
            ("correlationId", &self.correlation_id),
        ];
        match fields.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((name, _)) => Err(EnvelopeError::MissingField(name.to_string())),
            None => Ok(()),
        }
    }
}

#[derive(Default, Clone)]
pub struct EnvelopeBuilder {
    event_id: Option<String>,
    event_type: Option<String>,
    source: Option<String>,
    timestamp: Option<Timestamp>,
    correlation_id: Option<String>,
}

impl EnvelopeBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn event_id(mut self, event_id: &str) -> Self {
        self.event_id = Some(event_id.to_string());
        self
    }

    pub fn event_type(mut self, event_type: &str) -> Self {
        self.event_type = Some(event_type.to_string());
        self
    }

    pub fn source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn correlation_id(mut self, correlation_id: &str) -> Self {
        self.correlation_id = Some(correlation_id.to_string());
        self
    }

    /// Builds the envelope. `event_id` defaults to a fresh UUID and `timestamp`
    /// to now; every other field is required and must be non-empty.
    pub fn build(self) -> EnvelopeResult<Envelope> {
        let envelope = Envelope {
            event_id: self
                .event_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            event_type: self
                .event_type
                .ok_or_else(|| EnvelopeError::MissingField("eventType".to_string()))?,
            source: self
                .source
                .ok_or_else(|| EnvelopeError::MissingField("source".to_string()))?,
            timestamp: self.timestamp.unwrap_or_default(),
            correlation_id: self
                .correlation_id
                .ok_or_else(|| EnvelopeError::MissingField("correlationId".to_string()))?,
        };
        envelope.validate()?;
        Ok(envelope)
    }
}

/// Envelope plus a typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedEvent<P> {
    pub envelope: Envelope,
    pub payload: P,
}

impl<P> TypedEvent<P> {
    pub fn new(envelope: Envelope, payload: P) -> Self {
        Self { envelope, payload }
    }

    pub fn correlation_id(&self) -> &str {
        &self.envelope.correlation_id
    }
}

impl<P: Serialize> TypedEvent<P> {
    /// Serializes into the nested `baseEvent` wire shape.
    ///
    /// The payload must serialize to a JSON object (or unit, for empty payloads).
    pub fn encode(&self) -> EnvelopeResult<Vec<u8>> {
        let mut body = match serde_json::to_value(&self.payload)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(EnvelopeError::Encode(format!(
                    "payload must be a JSON object, got {}",
                    json_kind(&other)
                )));
            }
        };
        if body.contains_key(BASE_EVENT_KEY) {
            return Err(EnvelopeError::Encode(format!(
                "payload must not define `{BASE_EVENT_KEY}`"
            )));
        }
        body.insert(
            BASE_EVENT_KEY.to_string(),
            serde_json::to_value(&self.envelope)?,
        );
        Ok(serde_json::to_vec(&Value::Object(body))?)
    }
}

/// Decoded message whose payload has not been bound to a type yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub envelope: Envelope,
    pub payload: Value,
}

impl RawEvent {
    /// Decodes either wire shape. The envelope must be complete; the payload is
    /// whatever fields remain.
    pub fn decode(bytes: &[u8]) -> EnvelopeResult<Self> {
        let mut body = match serde_json::from_slice::<Value>(bytes)? {
            Value::Object(map) => map,
            other => {
                return Err(EnvelopeError::Decode(format!(
                    "expected a JSON object, got {}",
                    json_kind(&other)
                )));
            }
        };

        let envelope: Envelope = match body.remove(BASE_EVENT_KEY) {
            Some(header @ Value::Object(_)) => serde_json::from_value(header)?,
            Some(other) => {
                return Err(EnvelopeError::Decode(format!(
                    "`{BASE_EVENT_KEY}` must be an object, got {}",
                    json_kind(&other)
                )));
            }
            None => {
                let mut header = Map::new();
                for key in HEADER_KEYS {
                    if let Some(value) = body.remove(key) {
                        header.insert(key.to_string(), value);
                    }
                }
                serde_json::from_value(Value::Object(header))?
            }
        };
        envelope.validate()?;

        Ok(Self {
            envelope,
            payload: Value::Object(body),
        })
    }

    pub fn into_typed<P: DeserializeOwned>(self) -> EnvelopeResult<TypedEvent<P>> {
        let payload = serde_json::from_value(self.payload)
            .map_err(|e| EnvelopeError::Payload(e.to_string()))?;
        Ok(TypedEvent {
            envelope: self.envelope,
            payload,
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("envelope field missing or empty: {0}")]
    MissingField(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("payload does not match expected schema: {0}")]
    Payload(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type EnvelopeResult<T> = Result<T, EnvelopeError>;
