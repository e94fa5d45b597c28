use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::anonymizer::MatchPolicy;

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing or a numeric one does not parse.
#[derive(Debug, Clone)]
pub struct Config {
    pub completion_endpoint: String,
    pub completion_api_key: String,
    pub completion_api_version: String,
    pub completion_model: String,
    pub profile_extractor_capability_id: String,
    pub pii_identifier_capability_id: String,
    pub skills_analyst_capability_id: String,
    pub port: u16,
    pub rust_log: String,
    pub max_file_size_mb: usize,
    pub min_page_count: usize,
    pub max_page_count: usize,
    pub min_text_length: usize,
    pub requests_per_minute: usize,
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown: Duration,
    pub max_retries: u32,
    pub rate_limit_max_wait: Duration,
    pub completion_timeout: Duration,
    pub processing_timeout: Duration,
    pub max_validation_retries: u32,
    pub log_max_text_chars: usize,
    pub audit_retention_sessions: usize,
    pub anonymizer_match_policy: MatchPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            completion_endpoint: require_env("COMPLETION_ENDPOINT")?,
            completion_api_key: require_env("COMPLETION_API_KEY")?,
            completion_api_version: env_or("COMPLETION_API_VERSION", "2024-05-01-preview".to_string())?,
            completion_model: env_or("COMPLETION_MODEL", "gpt-4o-mini".to_string())?,
            profile_extractor_capability_id: require_env("PROFILE_EXTRACTOR_CAPABILITY_ID")?,
            pii_identifier_capability_id: require_env("PII_IDENTIFIER_CAPABILITY_ID")?,
            skills_analyst_capability_id: require_env("SKILLS_ANALYST_CAPABILITY_ID")?,
            port: env_or("PORT", 8080)?,
            rust_log: env_or("RUST_LOG", "info".to_string())?,
            max_file_size_mb: env_or("MAX_FILE_SIZE_MB", 10)?,
            min_page_count: env_or("MIN_PAGE_COUNT", 1)?,
            max_page_count: env_or("MAX_PAGE_COUNT", 10)?,
            min_text_length: env_or("MIN_TEXT_LENGTH", 100)?,
            requests_per_minute: env_or("REQUESTS_PER_MINUTE", 20)?,
            circuit_failure_threshold: env_or("CIRCUIT_FAILURE_THRESHOLD", 5)?,
            circuit_cooldown: Duration::from_secs(env_or("CIRCUIT_COOLDOWN_SECONDS", 60)?),
            max_retries: env_or("MAX_RETRIES", 3)?,
            rate_limit_max_wait: Duration::from_secs(env_or("RATE_LIMIT_MAX_WAIT_SECONDS", 10)?),
            completion_timeout: Duration::from_secs(env_or("COMPLETION_TIMEOUT_SECONDS", 25)?),
            processing_timeout: Duration::from_secs(env_or("PROCESSING_TIMEOUT_SECONDS", 30)?),
            max_validation_retries: env_or("MAX_VALIDATION_RETRIES", 1)?,
            log_max_text_chars: env_or("LOG_MAX_TEXT_CHARS", 10_000)?,
            audit_retention_sessions: env_or("AUDIT_RETENTION_SESSIONS", 500)?,
            anonymizer_match_policy: std::env::var("ANONYMIZER_MATCH_POLICY")
                .ok()
                .map(|raw| MatchPolicy::from_str(&raw).map_err(|e| anyhow!(e)))
                .transpose()
                .context("ANONYMIZER_MATCH_POLICY is invalid")?
                .unwrap_or_default(),
        })
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }

    /// Request body ceiling: the base64 form of the largest accepted file plus slack for
    /// the JSON envelope.
    pub fn request_body_limit(&self) -> usize {
        self.max_file_size_bytes().div_ceil(3) * 4 + 64 * 1024
    }
}

#[cfg(test)]
impl Config {
    /// Defaults with placeholder endpoint and capability ids.
    pub(crate) fn for_tests() -> Self {
        Config {
            completion_endpoint: "http://localhost:9".to_string(),
            completion_api_key: "test-key".to_string(),
            completion_api_version: "2024-05-01-preview".to_string(),
            completion_model: "gpt-4o-mini".to_string(),
            profile_extractor_capability_id: "profile-extractor".to_string(),
            pii_identifier_capability_id: "pii-identifier".to_string(),
            skills_analyst_capability_id: "skills-analyst".to_string(),
            port: 8080,
            rust_log: "info".to_string(),
            max_file_size_mb: 10,
            min_page_count: 1,
            max_page_count: 10,
            min_text_length: 100,
            requests_per_minute: 20,
            circuit_failure_threshold: 5,
            circuit_cooldown: Duration::from_secs(60),
            max_retries: 3,
            rate_limit_max_wait: Duration::from_secs(10),
            completion_timeout: Duration::from_secs(25),
            processing_timeout: Duration::from_secs(30),
            max_validation_retries: 1,
            log_max_text_chars: 10_000,
            audit_retention_sessions: 500,
            anonymizer_match_policy: MatchPolicy::Exact,
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{key} has an invalid value '{raw}': {e}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_uses_default_when_unset() {
        let value: u32 = env_or("CV_ENGINE_TEST_SURELY_UNSET_VAR", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_env_or_names_the_bad_variable() {
        std::env::set_var("CV_ENGINE_TEST_BAD_NUMBER", "twelve");
        let err = env_or::<u32>("CV_ENGINE_TEST_BAD_NUMBER", 1).unwrap_err();
        assert!(err.to_string().contains("CV_ENGINE_TEST_BAD_NUMBER"));
        std::env::remove_var("CV_ENGINE_TEST_BAD_NUMBER");
    }

    #[test]
    fn test_body_limit_covers_base64_expansion() {
        let config = Config::for_tests();
        let max = config.max_file_size_bytes();
        assert_eq!(max, 10 * 1024 * 1024);
        // 4 output chars per 3 input bytes, rounded up, plus the envelope slack
        assert_eq!(config.request_body_limit(), 13_981_016 + 65_536);
        assert!(config.request_body_limit() > max * 4 / 3);
    }
}
