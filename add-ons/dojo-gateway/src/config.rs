//! Gateway configuration loaded from `.env` / the environment.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | DOJO_PORT | 8080 | HTTP listen port. |
//! | DOJO_DB_PATH | data/dojo.sqlite3 | SQLite database file. |
//! | DOJO_CHAT_COOLDOWN_MS | 3000 | Minimum interval between chat turns per identity. |
//! | DOJO_WORKSPACE_COOLDOWN_MS | 1000 | Minimum interval for workspace create/delete. |
//! | DOJO_DAILY_MESSAGE_LIMIT | 20 | Messages per rolling 24h window. |
//! | DOJO_CORS_ORIGIN | (unset) | Exact allowed browser origin; unset = permissive dev CORS. |
//! | DOJO_LLM_MODE | mock | `mock` \| `live` (see dojo-core model client env). |

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub chat_cooldown_ms: u64,
    pub workspace_cooldown_ms: u64,
    pub daily_message_limit: i64,
    pub cors_origin: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: PathBuf::from("data/dojo.sqlite3"),
            chat_cooldown_ms: 3000,
            workspace_cooldown_ms: 1000,
            daily_message_limit: 20,
            cors_origin: None,
        }
    }
}

impl GatewayConfig {
    /// Unset or invalid values fall back to the struct defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("DOJO_PORT", defaults.port),
            db_path: std::env::var("DOJO_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            chat_cooldown_ms: env_parse("DOJO_CHAT_COOLDOWN_MS", defaults.chat_cooldown_ms),
            workspace_cooldown_ms: env_parse(
                "DOJO_WORKSPACE_COOLDOWN_MS",
                defaults.workspace_cooldown_ms,
            ),
            daily_message_limit: env_parse("DOJO_DAILY_MESSAGE_LIMIT", defaults.daily_message_limit),
            cors_origin: std::env::var("DOJO_CORS_ORIGIN")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.chat_cooldown_ms, 3000);
        assert_eq!(config.daily_message_limit, 20);
        assert!(config.cors_origin.is_none());
    }
}
