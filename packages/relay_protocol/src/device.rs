use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ProtocolError;

/// Opaque routing key shared by one agent and its viewers.
///
/// Issued by the pairing service; the relay only ever compares it for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Which side of a device a connection speaks for.
///
/// Fixed when the connection is established; traffic never changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Produces terminal output, consumes terminal input.
    Agent,
    /// Consumes terminal output, produces terminal input.
    Viewer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Agent => f.write_str("agent"),
            Role::Viewer => f.write_str("viewer"),
        }
    }
}

/// Parameters supplied when a connection is opened (`?device_id=..&token=..`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectParams {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub token: Option<String>,
}

impl ConnectParams {
    pub fn new(device_id: impl Into<String>, token: Option<String>) -> Self {
        Self {
            device_id: device_id.into(),
            token,
        }
    }

    /// A pairing token selects the viewer role; its absence selects the agent.
    /// An empty `token=` counts as absent.
    pub fn role(&self) -> Role {
        match self.token.as_deref() {
            Some(t) if !t.is_empty() => Role::Viewer,
            _ => Role::Agent,
        }
    }

    /// Check the parameters and return the routing key.
    pub fn validate(&self) -> Result<DeviceId, ProtocolError> {
        if self.device_id.is_empty() {
            return Err(ProtocolError::MissingDeviceId);
        }
        Ok(DeviceId::new(self.device_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_selects_viewer() {
        let params = ConnectParams::new("dev1", Some("abc123".into()));
        assert_eq!(params.role(), Role::Viewer);
    }

    #[test]
    fn missing_or_empty_token_selects_agent() {
        assert_eq!(ConnectParams::new("dev1", None).role(), Role::Agent);
        assert_eq!(
            ConnectParams::new("dev1", Some(String::new())).role(),
            Role::Agent
        );
    }

    #[test]
    fn validate_requires_device_id() {
        let err = ConnectParams::new("", None).validate().unwrap_err();
        assert!(matches!(err, ProtocolError::MissingDeviceId));
        assert_eq!(err.to_string(), "device_id required");

        let id = ConnectParams::new("dev1", None).validate().unwrap();
        assert_eq!(id, DeviceId::from("dev1"));
    }

    #[test]
    fn params_deserialize_from_query_shape() {
        let params: ConnectParams =
            serde_json::from_value(serde_json::json!({ "device_id": "dev1" })).unwrap();
        assert_eq!(params.device_id, "dev1");
        assert!(params.token.is_none());
    }

    #[test]
    fn device_id_is_transparent_in_json() {
        let json = serde_json::to_string(&DeviceId::from("dev1")).unwrap();
        assert_eq!(json, "\"dev1\"");
    }
}
