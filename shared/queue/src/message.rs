use std::collections::HashMap;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{QueueResult, ValidationError};

/// Number of characters of a rejected payload kept in logs
const PREVIEW_CHARS: usize = 200;

/// Work item carried through the queue
///
/// Numeric fields are plain JSON numbers on the wire, so they are held as `f64`.
/// Integral values are written back as integers (`1`, not `1.0`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    /// Work item category, e.g. `order_created`
    #[serde(rename = "type")]
    pub kind: String,
    /// Order identifier
    #[serde(serialize_with = "serialize_number")]
    pub order_id: f64,
    /// User identifier
    #[serde(serialize_with = "serialize_number")]
    pub user_id: f64,
    /// Display name of the user
    pub user_name: String,
    /// Order total
    #[serde(serialize_with = "serialize_number")]
    pub total: f64,
    /// Producer-assigned timestamp
    pub timestamp: String,
    /// Propagation carrier injected by the producer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_context: Option<HashMap<String, String>>,
}

/// A work item before the producer attaches its trace context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    /// Work item category, e.g. `order_created`
    #[serde(rename = "type")]
    pub kind: String,
    /// Order identifier
    #[serde(serialize_with = "serialize_number")]
    pub order_id: f64,
    /// User identifier
    #[serde(serialize_with = "serialize_number")]
    pub user_id: f64,
    /// Display name of the user
    pub user_name: String,
    /// Order total
    #[serde(serialize_with = "serialize_number")]
    pub total: f64,
    /// Producer-assigned timestamp
    pub timestamp: String,
}

impl From<OrderEvent> for QueueMessage {
    fn from(event: OrderEvent) -> Self {
        Self {
            kind: event.kind,
            order_id: event.order_id,
            user_id: event.user_id,
            user_name: event.user_name,
            total: event.total,
            timestamp: event.timestamp,
            trace_context: None,
        }
    }
}

impl QueueMessage {
    /// Serializes the envelope into its wire format
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Serialization` if the envelope cannot be encoded
    pub fn to_json(&self) -> QueueResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a raw payload taken off a queue, see [`validate`]
    ///
    /// # Errors
    ///
    /// Returns `QueueError::InvalidMessage` if the payload is malformed
    pub fn from_json(raw: &str) -> QueueResult<Self> {
        Ok(validate(raw)?)
    }
}

/// Largest magnitude below which every integral `f64` is exact
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

#[allow(
    clippy::trivially_copy_pass_by_ref,
    clippy::float_cmp,
    clippy::cast_possible_truncation
)]
fn serialize_number<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract() == 0.0 && value.abs() < MAX_SAFE_INTEGER {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

/// Parses and validates a raw payload taken off a queue
///
/// Rules are applied in order: the payload must be JSON, it must be an object,
/// every required field must have its exact type (numbers never come from
/// numeric strings), and `traceContext`, when present, must map strings to
/// strings. Unknown fields are ignored.
///
/// # Errors
///
/// Returns the [`ValidationError`] of the first rule that fails
pub fn validate(raw: &str) -> Result<QueueMessage, ValidationError> {
    let value: Value = serde_json::from_str(raw).map_err(ValidationError::Parse)?;
    let Value::Object(object) = value else {
        return Err(ValidationError::Shape);
    };

    Ok(QueueMessage {
        kind: string_field(&object, "type")?,
        order_id: number_field(&object, "orderId")?,
        user_id: number_field(&object, "userId")?,
        user_name: string_field(&object, "userName")?,
        total: number_field(&object, "total")?,
        timestamp: string_field(&object, "timestamp")?,
        trace_context: trace_context_field(&object)?,
    })
}

/// Truncates a raw payload for logging
#[must_use]
pub fn preview(raw: &str) -> &str {
    raw.char_indices()
        .nth(PREVIEW_CHARS)
        .map_or(raw, |(end, _)| &raw[..end])
}

fn string_field(object: &Map<String, Value>, field: &'static str) -> Result<String, ValidationError> {
    match object.get(field) {
        Some(Value::String(value)) => Ok(value.clone()),
        _ => Err(ValidationError::Field {
            field,
            expected: "string",
        }),
    }
}

fn number_field(object: &Map<String, Value>, field: &'static str) -> Result<f64, ValidationError> {
    object
        .get(field)
        .and_then(Value::as_f64)
        .ok_or(ValidationError::Field {
            field,
            expected: "number",
        })
}

fn trace_context_field(
    object: &Map<String, Value>,
) -> Result<Option<HashMap<String, String>>, ValidationError> {
    match object.get("traceContext") {
        None => Ok(None),
        Some(Value::Object(carrier)) => carrier
            .iter()
            .map(|(key, value)| match value {
                Value::String(value) => Ok((key.clone(), value.clone())),
                _ => Err(ValidationError::TraceContext),
            })
            .collect::<Result<HashMap<_, _>, _>>()
            .map(Some),
        Some(_) => Err(ValidationError::TraceContext),
    }
}
