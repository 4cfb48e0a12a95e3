use serde::{Deserialize, Serialize};
use std::fs;

use anyhow::{Context, Result};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub retry: RetrySection,
    /// Per-supplier adapter blocks. Suppliers marked `testing` get the
    /// built-in simulator registered at startup.
    #[serde(default)]
    pub suppliers: Vec<SupplierBlock>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuthConfig {
    pub access_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default)]
    pub audience: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DispatchSection {
    /// 0 = derive from available parallelism.
    #[serde(default)]
    pub workers: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: i64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_reconcile_probes")]
    pub reconcile_probes: u32,
    #[serde(default = "default_reconcile_delay_secs")]
    pub reconcile_delay_secs: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            workers: 0,
            poll_interval_ms: default_poll_interval_ms(),
            ttl_minutes: default_ttl_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
            reconcile_probes: default_reconcile_probes(),
            reconcile_delay_secs: default_reconcile_delay_secs(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_timeout_per_attempt_secs")]
    pub timeout_per_attempt_secs: u64,
    #[serde(default = "default_enable_jitter")]
    pub enable_jitter: bool,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            timeout_per_attempt_secs: default_timeout_per_attempt_secs(),
            enable_jitter: default_enable_jitter(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SupplierBlock {
    pub code: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub testing: bool,
    #[serde(default = "default_supplier_timeout_secs")]
    pub timeout_seconds: u32,
    /// Simulator success probability, only meaningful with `testing: true`.
    #[serde(default = "default_sim_success_ratio")]
    pub sim_success_ratio: f64,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_dir() -> String {
    "./logs".to_string()
}
fn default_log_file() -> String {
    "pulsagate.log".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_max_connections() -> u32 {
    10
}
fn default_token_ttl_hours() -> i64 {
    24
}
fn default_issuer() -> String {
    "pulsagate".to_string()
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_ttl_minutes() -> i64 {
    30
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_reconcile_probes() -> u32 {
    2
}
fn default_reconcile_delay_secs() -> u64 {
    2
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_secs() -> u64 {
    2
}
fn default_max_delay_secs() -> u64 {
    30
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_timeout_per_attempt_secs() -> u64 {
    30
}
fn default_enable_jitter() -> bool {
    true
}
fn default_supplier_timeout_secs() -> u32 {
    30
}
fn default_sim_success_ratio() -> f64 {
    0.9
}

impl AppConfig {
    /// Load config from YAML file based on environment, then apply env
    /// overrides for secrets and the DSN.
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        let mut config: Self =
            serde_yaml::from_str(&content).context("Failed to parse config yaml")?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(secret) = std::env::var("PULSAGATE_JWT_SECRET") {
            self.auth.access_secret = secret;
        }
        if let Ok(level) = std::env::var("PULSAGATE_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    pub fn retry_policy(&self) -> crate::dispatch::RetryPolicy {
        use std::time::Duration;
        crate::dispatch::RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_delay: Duration::from_secs(self.retry.initial_delay_secs),
            max_delay: Duration::from_secs(self.retry.max_delay_secs),
            backoff_multiplier: self.retry.backoff_multiplier,
            timeout_per_attempt: Duration::from_secs(self.retry.timeout_per_attempt_secs),
            enable_jitter: self.retry.enable_jitter,
            ..crate::dispatch::RetryPolicy::default()
        }
    }

    pub fn dispatch_config(&self) -> crate::dispatch::DispatchConfig {
        use std::time::Duration;
        crate::dispatch::DispatchConfig {
            ttl_minutes: self.dispatch.ttl_minutes,
            reconcile_probes: self.dispatch.reconcile_probes,
            reconcile_delay: Duration::from_secs(self.dispatch.reconcile_delay_secs),
            default_attempt_timeout: Duration::from_secs(self.retry.timeout_per_attempt_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_yaml_with_defaults() {
        let yaml = r#"
server:
  host: 0.0.0.0
  port: 8080
database:
  url: postgres://localhost/pulsagate
auth:
  access_secret: changeme
suppliers:
  - code: SUP1
    testing: true
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_secs, 2);
        assert_eq!(config.dispatch.poll_interval_ms, 500);
        assert_eq!(config.auth.token_ttl_hours, 24);
        assert_eq!(config.suppliers.len(), 1);
        assert!(config.suppliers[0].testing);
        assert_eq!(config.suppliers[0].timeout_seconds, 30);
    }

    #[test]
    fn test_retry_policy_mapping() {
        let yaml = r#"
server: { host: 127.0.0.1, port: 8080 }
database: { url: "postgres://localhost/x" }
auth: { access_secret: s }
retry:
  max_attempts: 5
  enable_jitter: false
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert!(!policy.enable_jitter);
        assert_eq!(policy.initial_delay.as_secs(), 2);
    }
}
