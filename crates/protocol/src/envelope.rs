//! The JSON envelope exchanged over every structured socket.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single protocol frame.
///
/// `command` selects the handler, `requestId` correlates a reply with its
/// request and `error` signals failure. Everything else is command-specific
/// and kept in `payload`, flattened into the top-level JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// A `reply` frame with no payload.
    pub fn reply(request_id: Option<u64>) -> Self {
        Self {
            command: "reply".into(),
            request_id,
            ..Default::default()
        }
    }

    /// A `reply` frame carrying an error message.
    pub fn error_reply(request_id: Option<u64>, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::reply(request_id)
        }
    }

    /// Builder-style payload field setter.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.payload.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn action(&self) -> Option<&str> {
        self.get_str("action")
    }

    pub fn plugin_session_id(&self) -> Option<&str> {
        self.get_str("pluginSessionId").filter(|id| !id.is_empty())
    }

    pub fn set_plugin_session_id(&mut self, id: impl Into<String>) {
        self.set("pluginSessionId", id.into());
    }

    /// `params.provider.path` of a plugin request.
    pub fn provider_path(&self) -> Option<&str> {
        self.payload
            .get("params")?
            .get("provider")?
            .get("path")?
            .as_str()
            .filter(|path| !path.is_empty())
    }

    /// Rewrites `params.provider.path`. No-op when the request has no provider.
    pub fn set_provider_path(&mut self, path: impl Into<String>) {
        if let Some(provider) = self
            .payload
            .get_mut("params")
            .and_then(|params| params.get_mut("provider"))
            .and_then(Value::as_object_mut)
        {
            provider.insert("path".into(), Value::String(path.into()));
        }
    }

    /// Deserialize the payload (everything except command/requestId/error).
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
