//! Persisted server settings (bind address and retention policy).

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_HOST, DEFAULT_PORT};
use crate::error::OrionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSettings {
    pub host: String,
    pub port: String,
    /// Days to keep items before the retention sweep removes them.
    /// `0` keeps everything.
    pub retention_days: i64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT.to_string(),
            retention_days: 0,
        }
    }
}

impl ServerSettings {
    /// Reject settings that must never reach disk.
    pub fn validate(&self) -> Result<(), OrionError> {
        if self.port.trim().is_empty() {
            return Err(OrionError::InvalidSettings("port must not be empty".into()));
        }
        if self.retention_days < 0 {
            return Err(OrionError::InvalidSettings(format!(
                "retentionDays must be >= 0, got {}",
                self.retention_days
            )));
        }
        Ok(())
    }

    /// `host:port` as typed by the user, for binding the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host.trim(), self.port.trim())
    }

    /// Retention window, or `None` when items are kept forever.
    pub fn retention(&self) -> Option<chrono::Duration> {
        (self.retention_days > 0).then(|| chrono::Duration::days(self.retention_days))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = ServerSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.bind_addr(), "0.0.0.0:8000");
        assert!(settings.retention().is_none());
    }

    #[test]
    fn test_empty_port_rejected() {
        let settings = ServerSettings {
            port: "  ".into(),
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(OrionError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_negative_retention_rejected() {
        let settings = ServerSettings {
            retention_days: -1,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_retention_window() {
        let settings = ServerSettings {
            retention_days: 7,
            ..Default::default()
        };
        assert_eq!(settings.retention(), Some(chrono::Duration::days(7)));
    }
}
