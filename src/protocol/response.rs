use serde::Serialize;

use super::{ResponseType, Value};
use crate::error::{DriverError, DriverResult};

/// One decoded inbound message: `{type, payload}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub kind: ResponseType,
    pub payload: Value,
}

impl ResponseEnvelope {
    pub fn new(kind: ResponseType, payload: Value) -> Self {
        Self { kind, payload }
    }

    /// Validate the envelope shape. Any deviation is a protocol error.
    pub fn from_value(value: Value) -> DriverResult<Self> {
        let mut map = match value {
            Value::Map(map) => map,
            other => {
                return Err(DriverError::Protocol(format!(
                    "response was expected to be a map, got {:?}",
                    other.data_type()
                )))
            }
        };

        let code = match map.get("type") {
            Some(v) => v.as_u64().ok_or_else(|| {
                DriverError::Protocol(format!(
                    "response 'type' is expected to be an integer, got {:?}",
                    v.data_type()
                ))
            })?,
            None => {
                return Err(DriverError::Protocol(
                    "response is missing the 'type' entry".to_string(),
                ))
            }
        };
        let code = u8::try_from(code).map_err(|_| {
            DriverError::Protocol(format!("unhandled response type with code 0x{:x}", code))
        })?;
        let kind = ResponseType::try_from(code).map_err(|_| {
            DriverError::Protocol(format!("unhandled response type with code 0x{:02x}", code))
        })?;

        let payload = map.remove("payload").ok_or_else(|| {
            DriverError::Protocol("response is missing the 'payload' entry".to_string())
        })?;

        Ok(Self { kind, payload })
    }

    /// The envelope as a map value, as the server writes it.
    pub fn into_value(self) -> Value {
        let mut map = std::collections::BTreeMap::new();
        map.insert("type".to_string(), Value::UInt8(self.kind.code()));
        map.insert("payload".to_string(), self.payload);
        Value::Map(map)
    }
}

/// Server-side identity of a running query, needed to cancel it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPreamble {
    pub worker_index: u32,
    pub cancellation_token: String,
}

impl QueryPreamble {
    pub fn from_payload(payload: &Value) -> DriverResult<Self> {
        let worker_index = payload
            .get("workerIndex")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| {
                DriverError::Protocol("query data is missing a valid 'workerIndex'".to_string())
            })?;
        let cancellation_token = payload
            .get("cancellationToken")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DriverError::Protocol("query data is missing 'cancellationToken'".to_string())
            })?
            .to_string();
        Ok(Self {
            worker_index,
            cancellation_token,
        })
    }
}

/// Message carried by an ERROR payload.
pub fn error_message(payload: &Value) -> String {
    match payload {
        Value::String(message) => message.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:?}", other)),
    }
}

/// `hasNext` flag of a PULL summary; absent means no more records.
pub fn has_next(summary: &Value) -> bool {
    summary
        .get("hasNext")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}
