/// Application name
pub const APP_NAME: &str = "Orion";

/// Default directory holding the item log, settings and uploads
pub const DEFAULT_DATA_DIR: &str = "memory";

/// File name of the item log inside the data directory
pub const DATA_FILE_NAME: &str = "data.json";

/// File name of the settings record inside the data directory
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Sub-directory of the data directory holding uploaded files
pub const UPLOADS_DIR_NAME: &str = "uploads";

/// Default bind host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default HTTP port
pub const DEFAULT_PORT: &str = "8000";

/// Maximum upload size in bytes (10 MiB)
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// How long a "now playing" status survives without a refresh
pub const MEDIA_TTL_SECS: u64 = 600;

/// Read deadline for a live connection, extended by every pong
pub const PONG_WAIT_SECS: u64 = 60;

/// Keepalive ping period (must stay below the pong wait)
pub const PING_PERIOD_SECS: u64 = PONG_WAIT_SECS * 9 / 10;

/// Per-frame write timeout on a live connection
pub const WRITE_TIMEOUT_SECS: u64 = 10;

/// Separator between display name and stored name in a file item
pub const FILE_REF_SEPARATOR: char = '|';
