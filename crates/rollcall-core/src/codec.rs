//! JSON text-frame codec.
//!
//! Decoding is two-step so that a well-formed envelope with a tag meant for
//! the other direction (`UnknownType`) can be told apart from garbage
//! (`Malformed`). Receivers drop the former quietly and report the latter.

use serde_json::Value;

use crate::errors::CodecError;
use crate::messages::WireMessage;

/// Serialize a message into a text frame.
pub fn encode<M: WireMessage>(message: &M) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

/// Parse a text frame into a message valid for direction `M`.
pub fn decode<M: WireMessage>(text: &str) -> Result<M, CodecError> {
    let value: Value = serde_json::from_str(text)?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingType)?;
    if !M::TYPES.contains(&tag) {
        return Err(CodecError::UnknownType(tag.to_owned()));
    }
    let message: M = serde_json::from_value(value)?;
    message.validate()?;
    Ok(message)
}
