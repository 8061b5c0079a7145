//! Server configuration loaded from the environment

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub run_migrations: bool,
    pub allowed_origins: Vec<String>,
    /// Public URL of the web app, used in email links
    pub app_url: String,

    // Email (Resend)
    pub resend_api_key: Option<String>,
    pub resend_api_url: String,
    pub sender_email: String,

    // LLM chat completions
    pub llm_api_key: Option<String>,
    pub llm_api_url: String,
    pub llm_model: String,

    /// Google sign-in session exchange endpoint
    pub google_session_url: String,

    // Uploads
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,

    // Sessions
    pub cookie_secure: bool,
    pub session_ttl_days: i64,

    /// Organizations that get unlimited seats without a subscription
    pub bootstrapped_org_ids: Vec<String>,
    pub enable_billing: bool,
}

fn var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn var_or(name: &'static str, default: &str) -> String {
    var(name).unwrap_or_else(|| default.to_string())
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { name, value: v }),
        },
    }
}

fn parse_num<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: v }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = var("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            database_url,
            bind_address: var_or("BIND_ADDRESS", "0.0.0.0:8001"),
            run_migrations: parse_bool("RUN_MIGRATIONS", true)?,
            allowed_origins: split_list(&var_or(
                "ALLOWED_ORIGINS",
                "http://localhost:3000,http://127.0.0.1:3000",
            )),
            app_url: var_or("APP_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            resend_api_key: var("RESEND_API_KEY"),
            resend_api_url: var_or("RESEND_API_URL", "https://api.resend.com"),
            sender_email: var_or("SENDER_EMAIL", "onboarding@resend.dev"),
            llm_api_key: var("LLM_API_KEY"),
            llm_api_url: var_or("LLM_API_URL", "https://api.openai.com/v1"),
            llm_model: var_or("LLM_MODEL", "gpt-5.2"),
            google_session_url: var_or(
                "GOOGLE_SESSION_URL",
                "https://demobackend.emergentagent.com/auth/v1/env/oauth/session-data",
            ),
            upload_dir: PathBuf::from(var_or("UPLOAD_DIR", "uploads")),
            max_upload_bytes: parse_num("MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
            cookie_secure: parse_bool("COOKIE_SECURE", true)?,
            session_ttl_days: parse_num("SESSION_TTL_DAYS", 7)?,
            bootstrapped_org_ids: split_list(&var_or("BOOTSTRAPPED_ORG_IDS", "")),
            enable_billing: parse_bool("ENABLE_BILLING", true)?,
        })
    }

    /// Configuration for tests: lazily connected database, no external services
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/mcd_test".to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            run_migrations: false,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            app_url: "http://localhost:3000".to_string(),
            resend_api_key: None,
            resend_api_url: "http://127.0.0.1:9".to_string(),
            sender_email: "noreply@example.com".to_string(),
            llm_api_key: None,
            llm_api_url: "http://127.0.0.1:9".to_string(),
            llm_model: "test-model".to_string(),
            google_session_url: "http://127.0.0.1:9/session-data".to_string(),
            upload_dir: std::env::temp_dir().join("mcd-test-uploads"),
            max_upload_bytes: 1024 * 1024,
            cookie_secure: false,
            session_ttl_days: 7,
            bootstrapped_org_ids: Vec::new(),
            enable_billing: false,
        }
    }

    pub fn email_configured(&self) -> bool {
        self.resend_api_key.is_some()
    }

    pub fn llm_configured(&self) -> bool {
        self.llm_api_key.is_some()
    }

    pub fn is_bootstrapped(&self, org_id: &str) -> bool {
        self.bootstrapped_org_ids.iter().any(|id| id == org_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for name in [
            "DATABASE_URL",
            "BIND_ADDRESS",
            "RUN_MIGRATIONS",
            "ALLOWED_ORIGINS",
            "APP_URL",
            "MAX_UPLOAD_BYTES",
            "COOKIE_SECURE",
            "BOOTSTRAPPED_ORG_IDS",
        ] {
            std::env::remove_var(name);
        }
    }

    #[test]
    #[serial]
    fn test_missing_database_url() {
        clear_env();
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/mcd");
        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8001");
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.session_ttl_days, 7);
        assert!(config.cookie_secure);
        assert!(config.bootstrapped_org_ids.is_empty());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_lists_and_trailing_slash() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/mcd");
        std::env::set_var("APP_URL", "https://app.example.com/");
        std::env::set_var("BOOTSTRAPPED_ORG_IDS", "org_a, org_b,,");
        let config = Config::from_env().unwrap();
        assert_eq!(config.app_url, "https://app.example.com");
        assert_eq!(config.bootstrapped_org_ids, vec!["org_a", "org_b"]);
        assert!(config.is_bootstrapped("org_b"));
        assert!(!config.is_bootstrapped("org_c"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_bool_rejected() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/mcd");
        std::env::set_var("COOKIE_SECURE", "maybe");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Invalid {
                name: "COOKIE_SECURE",
                ..
            })
        ));
        clear_env();
    }
}
