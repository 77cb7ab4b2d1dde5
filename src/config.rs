use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_JWT_SECRET: &str = "your-secret-key-change-in-production";

/// `max_requests` per `window`, per client IP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    pub jwt_secret: String,
    pub public_base_url: Option<String>,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub auth_rate_limit: RateLimit,
    pub paste_rate_limit: RateLimit,
    pub api_rate_limit: RateLimit,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let string = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let rate_limit = |prefix: &str, max: u32, window_secs: u64| RateLimit {
            max_requests: parsed(&lookup, &format!("{prefix}_RATE_LIMIT"), max),
            window: Duration::from_secs(parsed(
                &lookup,
                &format!("{prefix}_RATE_WINDOW_SECS"),
                window_secs,
            )),
        };

        Config {
            host: string("HOST", "127.0.0.1"),
            port: parsed(&lookup, "PORT", 8080),
            db_path: string("DB_PATH", "./data/pastebin.redb"),
            jwt_secret: string("JWT_SECRET", DEFAULT_JWT_SECRET),
            public_base_url: optional("PUBLIC_BASE_URL").map(|url| url.trim_end_matches('/').to_string()),
            admin_username: optional("ADMIN_USERNAME"),
            admin_password: optional("ADMIN_PASSWORD"),
            auth_rate_limit: rate_limit("AUTH", 5, 15 * 60),
            paste_rate_limit: rate_limit("PASTE", 20, 60 * 60),
            api_rate_limit: rate_limit("API", 100, 15 * 60),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn jwt_uses_default(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

fn parsed<T: FromStr + Copy>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Ignoring unparsable config value");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]);
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.db_path, "./data/pastebin.redb");
        assert!(config.jwt_uses_default());
        assert!(config.public_base_url.is_none());
        assert_eq!(
            config.auth_rate_limit,
            RateLimit {
                max_requests: 5,
                window: Duration::from_secs(900)
            }
        );
        assert_eq!(config.paste_rate_limit.max_requests, 20);
        assert_eq!(config.paste_rate_limit.window, Duration::from_secs(3600));
        assert_eq!(config.api_rate_limit.max_requests, 100);
    }

    #[test]
    fn values_are_read_from_lookup() {
        let config = config(&[
            ("PORT", "9000"),
            ("JWT_SECRET", "s3cret"),
            ("PUBLIC_BASE_URL", "https://paste.example.com/"),
            ("ADMIN_USERNAME", "root"),
            ("PASTE_RATE_LIMIT", "3"),
        ]);
        assert_eq!(config.port, 9000);
        assert!(!config.jwt_uses_default());
        assert_eq!(config.public_base_url.as_deref(), Some("https://paste.example.com"));
        assert_eq!(config.admin_username.as_deref(), Some("root"));
        assert!(config.admin_password.is_none());
        assert_eq!(config.paste_rate_limit.max_requests, 3);
    }

    #[test]
    fn bad_numbers_fall_back_to_defaults() {
        let config = config(&[("PORT", "eighty"), ("AUTH_RATE_LIMIT", "-1")]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.auth_rate_limit.max_requests, 5);
    }

    #[test]
    fn blank_optionals_are_none() {
        let config = config(&[("ADMIN_USERNAME", "  ")]);
        assert!(config.admin_username.is_none());
    }
}
