//! Registered backend instances.

use crate::driver::{BackendFamily, ConnectionConfig, ConnectionMetadata};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One configured backend instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConnection {
    /// Unique identifier.
    pub id: String,
    /// Human readable name.
    pub name: String,
    /// Storage technology.
    pub family: BackendFamily,
    /// Driver configuration, opaque to the hub.
    pub config: ConnectionConfig,
    /// Whether this is the active connection. At most one is.
    #[serde(default)]
    pub is_active: bool,
    /// Outcome of the last liveness test.
    #[serde(default)]
    pub is_connected: bool,
    /// When the last successful liveness test ran.
    #[serde(default)]
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Metadata reported by the last successful liveness test.
    #[serde(default)]
    pub metadata: Option<ConnectionMetadata>,
    /// When the connection was registered.
    pub created_at: DateTime<Utc>,
}

impl BackendConnection {
    /// Create an inactive, untested connection.
    pub fn new(name: impl Into<String>, family: BackendFamily, config: ConnectionConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            family,
            config,
            is_active: false,
            is_connected: false,
            last_connected_at: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    /// Set the identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_roundtrips_opaque() {
        let mut config = ConnectionConfig::new();
        config.insert("url".into(), json!("https://db.example.com"));
        config.insert("options".into(), json!({"pool": 4, "tls": [true, "strict"]}));

        let connection = BackendConnection::new("prod", BackendFamily::RelationalHttp, config.clone())
            .with_id("c1");
        let bytes = serde_json::to_vec(&connection).unwrap();
        let decoded: BackendConnection = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(decoded.id, "c1");
        assert_eq!(decoded.config, config);
        assert!(!decoded.is_active);
        assert!(!decoded.is_connected);
    }
}
