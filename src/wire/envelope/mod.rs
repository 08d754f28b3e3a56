use std::fmt;

use serde_json::{json, Value};

pub const COMMAND_FIELD: &str = "command";
pub const ARGS_FIELD: &str = "args";

/// A decoded request: `{"command": <string>, "args": <any>}`.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandEnvelope {
    pub command: String,
    pub args: Value,
}

#[derive(Debug)]
pub enum EnvelopeError {
    InvalidJson(serde_json::Error),
    MustBeObject { found: &'static str },
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJson(source) => write!(f, "payload is not valid UTF-8 JSON: {source}"),
            Self::MustBeObject { found } => {
                write!(f, "request must be a JSON object, got {found}")
            }
        }
    }
}

impl std::error::Error for EnvelopeError {}

impl CommandEnvelope {
    pub fn new(command: impl Into<String>, args: Value) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Decodes a framed payload.
    ///
    /// A missing `command` becomes the empty name and a non-string one its JSON text;
    /// both then resolve to the unknown-command path. A missing `args` is `null`.
    pub fn decode(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(payload).map_err(EnvelopeError::InvalidJson)?;
        let Value::Object(mut fields) = value else {
            return Err(EnvelopeError::MustBeObject {
                found: json_kind(&value),
            });
        };

        let command = match fields.remove(COMMAND_FIELD) {
            Some(Value::String(name)) => name,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let args = fields.remove(ARGS_FIELD).unwrap_or(Value::Null);

        Ok(Self { command, args })
    }

    pub fn encode(&self) -> Vec<u8> {
        json!({ COMMAND_FIELD: self.command, ARGS_FIELD: self.args }).to_string().into_bytes()
    }
}

pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
