//! Frame codec: `{CMD}{id};{target};{jsonArgs}` outbound, JSON inbound.

use crate::error::{LinkError, Result};
use crate::settings::JsonReviver;
use serde_json::Value as JsonValue;
use trellis_commons::protocol::{Command, ErrorType};
use trellis_commons::RowSet;

/// Encode one outbound request frame.
pub fn encode_frame(command: Command, id: u64, target: &str, args: &JsonValue) -> String {
    format!("{}{};{};{}", command.as_char(), id, target, args)
}

/// Payload of a correlated response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPayload {
    /// A row-result envelope, rehydrated into an iterable set.
    Rows(RowSet),
    /// Any other JSON result.
    Value(JsonValue),
}

impl ResultPayload {
    pub fn rows(&self) -> Option<&RowSet> {
        match self {
            ResultPayload::Rows(rows) => Some(rows),
            ResultPayload::Value(_) => None,
        }
    }
}

/// One parsed inbound frame.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: Option<u64>,
    pub session: Option<JsonValue>,
    pub result: Option<ResultPayload>,
    pub error: Option<JsonValue>,
    pub error_type: Option<ErrorType>,
}

impl InboundMessage {
    /// The push event tag, when this frame is a server push.
    pub fn event_type(&self) -> Option<&str> {
        match &self.result {
            Some(ResultPayload::Value(value)) => value.get("eventType")?.as_str(),
            _ => None,
        }
    }
}

/// Parse one inbound text frame.
///
/// The configured reviver runs over the raw result value before the row
/// envelope is recognized and rehydrated.
pub fn parse_inbound(text: &str, reviver: Option<&JsonReviver>) -> Result<InboundMessage> {
    let value: JsonValue = serde_json::from_str(text)
        .map_err(|e| LinkError::ProtocolError(format!("malformed inbound frame: {}", e)))?;
    let JsonValue::Object(mut obj) = value else {
        return Err(LinkError::ProtocolError(
            "inbound frame is not a JSON object".to_string(),
        ));
    };

    let id = obj.get("id").and_then(JsonValue::as_u64);
    let session = obj.remove("session");
    let error = obj.remove("error");
    let error_type = match obj.get("errorType").and_then(JsonValue::as_str) {
        Some("ServerError") => Some(ErrorType::ServerError),
        Some("BadResult") => Some(ErrorType::BadResult),
        Some("ValidationError") => Some(ErrorType::ValidationError),
        Some(other) => {
            return Err(LinkError::ProtocolError(format!(
                "unknown errorType {:?}",
                other
            )))
        }
        None => None,
    };

    let result = obj.remove("result").map(|raw| {
        let revived = match reviver {
            Some(reviver) => reviver(raw),
            None => raw,
        };
        match RowSet::from_envelope(&revived) {
            Some(rows) => ResultPayload::Rows(rows),
            None => ResultPayload::Value(revived),
        }
    });

    Ok(InboundMessage {
        id,
        session,
        result,
        error,
        error_type,
    })
}

/// Map an inbound error payload to a [`LinkError`].
///
/// A structured `ValidationError` payload is reconstituted into the same
/// per-field and non-field messages the server raised; everything else maps
/// to a tagged server error.
pub fn error_from_payload(error_type: Option<ErrorType>, payload: &JsonValue) -> LinkError {
    if error_type == Some(ErrorType::ValidationError) {
        if let Ok(errors) = serde_json::from_value(payload.clone()) {
            return LinkError::Validation(errors);
        }
    }
    let message = payload
        .get("message")
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string());
    LinkError::Server {
        kind: error_type.unwrap_or(ErrorType::ServerError),
        message,
    }
}
