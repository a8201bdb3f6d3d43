//! Process configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the relay starts with zero
//! configuration. The bind address normally comes from the persisted
//! settings record; `HTTP_ADDR` overrides it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use orion_shared::constants::{
    DEFAULT_DATA_DIR, MAX_UPLOAD_SIZE, MEDIA_TTL_SECS, PING_PERIOD_SECS, PONG_WAIT_SECS,
    UPLOADS_DIR_NAME, WRITE_TIMEOUT_SECS,
};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory holding `data.json`, `settings.json` and `uploads/`.
    /// Env: `ORION_DATA_DIR`
    /// Default: `./memory`
    pub data_dir: PathBuf,

    /// Overrides the host/port from the settings record.
    /// Env: `HTTP_ADDR`
    pub http_addr: Option<SocketAddr>,

    /// How many successive ports to try when the configured one is busy.
    /// Env: `PORT_ATTEMPTS`
    /// Default: `10`
    pub port_attempts: u16,

    /// Lifetime of a "now playing" status without a refresh.
    /// Env: `MEDIA_TTL_SECS`
    /// Default: 600 s
    pub media_ttl: Duration,

    /// Keepalive ping period.
    /// Env: `PING_PERIOD_SECS`
    /// Default: 54 s
    pub ping_period: Duration,

    /// Read deadline, extended by each pong.
    /// Env: `PONG_WAIT_SECS`
    /// Default: 60 s
    pub pong_wait: Duration,

    /// Per-frame write timeout.
    /// Env: `WRITE_TIMEOUT_SECS`
    /// Default: 10 s
    pub write_timeout: Duration,

    /// Maximum upload size in bytes.
    /// Env: `MAX_UPLOAD_BYTES`
    /// Default: 10 MiB
    pub max_upload_size: usize,

    /// Retention sweep period.
    /// Env: `RETENTION_SWEEP_SECS`
    /// Default: 3600 s
    pub retention_sweep: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            http_addr: None,
            port_attempts: 10,
            media_ttl: Duration::from_secs(MEDIA_TTL_SECS),
            ping_period: Duration::from_secs(PING_PERIOD_SECS),
            pong_wait: Duration::from_secs(PONG_WAIT_SECS),
            write_timeout: Duration::from_secs(WRITE_TIMEOUT_SECS),
            max_upload_size: MAX_UPLOAD_SIZE,
            retention_sweep: Duration::from_secs(3600),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("ORION_DATA_DIR") {
            if !dir.trim().is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = Some(parsed),
                Err(_) => {
                    tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using settings");
                }
            }
        }

        if let Some(n) = parse_var::<u16>(&lookup, "PORT_ATTEMPTS") {
            config.port_attempts = n.max(1);
        }
        if let Some(secs) = parse_var(&lookup, "MEDIA_TTL_SECS") {
            config.media_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "PING_PERIOD_SECS") {
            config.ping_period = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "PONG_WAIT_SECS") {
            config.pong_wait = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "WRITE_TIMEOUT_SECS") {
            config.write_timeout = Duration::from_secs(secs);
        }
        if let Some(bytes) = parse_var(&lookup, "MAX_UPLOAD_BYTES") {
            config.max_upload_size = bytes;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "RETENTION_SWEEP_SECS") {
            config.retention_sweep = Duration::from_secs(secs.max(1));
        }

        // A ping period at or past the read deadline would time out every
        // healthy peer.
        if config.ping_period.is_zero() || config.ping_period >= config.pong_wait {
            let fixed = config.pong_wait * 9 / 10;
            tracing::warn!(
                ping_period = ?config.ping_period,
                pong_wait = ?config.pong_wait,
                using = ?fixed,
                "Ping period must be below pong wait"
            );
            config.ping_period = fixed;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join(UPLOADS_DIR_NAME)
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_with(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("memory"));
        assert_eq!(config.media_ttl, Duration::from_secs(600));
        assert!(config.ping_period < config.pong_wait);
        assert_eq!(config.uploads_dir(), PathBuf::from("memory/uploads"));
    }

    #[test]
    fn test_env_overrides() {
        let config = config_with(&[
            ("ORION_DATA_DIR", "/tmp/orion"),
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("MEDIA_TTL_SECS", "30"),
        ]);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/orion"));
        assert_eq!(config.http_addr, Some(([127, 0, 0, 1], 9000).into()));
        assert_eq!(config.media_ttl, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_values_ignored() {
        let config = config_with(&[("HTTP_ADDR", "nowhere"), ("MEDIA_TTL_SECS", "soon")]);
        assert!(config.http_addr.is_none());
        assert_eq!(config.media_ttl, Duration::from_secs(600));
    }

    #[test]
    fn test_ping_period_clamped_below_pong_wait() {
        let config = config_with(&[("PING_PERIOD_SECS", "90"), ("PONG_WAIT_SECS", "30")]);
        assert_eq!(config.ping_period, Duration::from_secs(27));
    }
}
