//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The Kerberos password comes from the KERBEROS_PASSWORD env var only and is
//! never read from the TOML, so it cannot leak through a committed file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use common::{RetryPolicy, Secret};
use credential::ProviderSettings;
use credential_manager::ManagerConfig;
use serde::Deserialize;
use session::ConnectorConfig;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub kerberos: KerberosConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Credential acquisition and maintenance
#[derive(Debug, Deserialize)]
pub struct KerberosConfig {
    pub principal: String,
    #[serde(default)]
    pub realm: Option<String>,
    #[serde(default)]
    pub kdc: Option<String>,
    /// Existing krb5.conf; wins over realm/kdc rendering
    #[serde(default)]
    pub krb5_conf: Option<PathBuf>,
    #[serde(default)]
    pub keytab_path: Option<PathBuf>,
    #[serde(skip)]
    pub password: Option<Secret<String>>,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_refresh_buffer_ms")]
    pub refresh_buffer_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

/// Broker session settings
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_vpn_name")]
    pub vpn_name: String,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    #[serde(default = "default_max_reconnect_retries")]
    pub max_reconnect_retries: u32,
    /// Defaults to `connection_timeout_ms`
    #[serde(default)]
    pub reconnect_delay_ms: Option<u64>,
    #[serde(default = "default_reconnect_multiplier")]
    pub reconnect_multiplier: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            vpn_name: default_vpn_name(),
            connection_timeout_ms: default_connection_timeout_ms(),
            max_reconnect_retries: default_max_reconnect_retries(),
            reconnect_delay_ms: None,
            reconnect_multiplier: default_reconnect_multiplier(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TelemetryConfig {
    /// Prometheus exporter listener; no exporter when unset
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,
    #[serde(default = "default_health_log_interval_secs")]
    pub health_log_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_addr: None,
            health_log_interval_secs: default_health_log_interval_secs(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/var/lib/ticket-keeper")
}

fn default_refresh_buffer_ms() -> u64 {
    3_600_000
}

fn default_retry_delay_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_shutdown_timeout_ms() -> u64 {
    10_000
}

fn default_host() -> String {
    "tcps://solace-broker:55443".into()
}

fn default_vpn_name() -> String {
    "default".into()
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_max_reconnect_retries() -> u32 {
    3
}

fn default_reconnect_multiplier() -> f64 {
    1.0
}

fn default_health_log_interval_secs() -> u64 {
    60
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// - KERBEROS_USERNAME replaces `kerberos.principal`
    /// - KERBEROS_PASSWORD supplies the password
    ///
    /// Either a password or `keytab_path` is required.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(username) = std::env::var("KERBEROS_USERNAME") {
            if !username.trim().is_empty() {
                config.kerberos.principal = username.trim().to_owned();
            }
        }
        if let Ok(password) = std::env::var("KERBEROS_PASSWORD") {
            let password = Secret::new(password);
            if !password.is_empty() {
                config.kerberos.password = Some(password);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let kerberos = &self.kerberos;
        if kerberos.principal.trim().is_empty() {
            return Err(common::Error::Config("kerberos.principal must not be empty".into()));
        }
        if kerberos.realm.is_some() != kerberos.kdc.is_some() {
            return Err(common::Error::Config(
                "kerberos.realm and kerberos.kdc must be set together".into(),
            ));
        }
        if kerberos.refresh_buffer_ms == 0 {
            return Err(common::Error::Config(
                "refresh_buffer_ms must be greater than 0".into(),
            ));
        }
        if kerberos.max_retries == 0 {
            return Err(common::Error::Config("max_retries must be greater than 0".into()));
        }

        let session = &self.session;
        if session.connection_timeout_ms == 0 {
            return Err(common::Error::Config(
                "connection_timeout_ms must be greater than 0".into(),
            ));
        }
        if session.max_reconnect_retries == 0 {
            return Err(common::Error::Config(
                "max_reconnect_retries must be greater than 0".into(),
            ));
        }
        if session.reconnect_multiplier.is_nan() || session.reconnect_multiplier < 1.0 {
            return Err(common::Error::Config(format!(
                "reconnect_multiplier must be at least 1.0, got: {}",
                session.reconnect_multiplier
            )));
        }

        if self.telemetry.health_log_interval_secs == 0 {
            return Err(common::Error::Config(
                "health_log_interval_secs must be greater than 0".into(),
            ));
        }

        if kerberos.password.is_none() && kerberos.keytab_path.is_none() {
            return Err(common::Error::MissingSecret(
                "set KERBEROS_PASSWORD or kerberos.keytab_path".into(),
            ));
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("ticket-keeper.toml")
    }

    pub fn provider_settings(&self) -> ProviderSettings {
        let kerberos = &self.kerberos;
        let mut settings = ProviderSettings::new(&kerberos.principal, &kerberos.cache_dir);
        settings.realm = kerberos.realm.clone();
        settings.kdc = kerberos.kdc.clone();
        settings.krb5_conf = kerberos.krb5_conf.clone();
        settings.keytab = kerberos.keytab_path.clone();
        settings.password = kerberos.password.clone();
        settings
    }

    pub fn manager_config(&self) -> ManagerConfig {
        let kerberos = &self.kerberos;
        ManagerConfig {
            refresh_buffer: Duration::from_millis(kerberos.refresh_buffer_ms),
            login_retry: RetryPolicy::fixed(
                kerberos.max_retries,
                Duration::from_millis(kerberos.retry_delay_ms),
            ),
            shutdown_timeout: Duration::from_millis(kerberos.shutdown_timeout_ms),
        }
    }

    pub fn connector_config(&self) -> ConnectorConfig {
        let session = &self.session;
        let delay = session
            .reconnect_delay_ms
            .unwrap_or(session.connection_timeout_ms);
        ConnectorConfig {
            connection_timeout: Duration::from_millis(session.connection_timeout_ms),
            retry: RetryPolicy::new(
                session.max_reconnect_retries,
                Duration::from_millis(delay),
                session.reconnect_multiplier,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn clear_secrets() {
        unsafe {
            remove_env("KERBEROS_PASSWORD");
            remove_env("KERBEROS_USERNAME");
        }
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("ticket-keeper.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    const KEYTAB_TOML: &str = r#"
[kerberos]
principal = "svc-trades"
realm = "EXAMPLE.COM"
kdc = "kdc.example.com"
keytab_path = "/etc/svc.keytab"
"#;

    #[test]
    fn test_load_applies_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secrets();
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&write_config(&dir, KEYTAB_TOML)).unwrap();

        assert_eq!(config.kerberos.principal, "svc-trades");
        assert_eq!(config.kerberos.refresh_buffer_ms, 3_600_000);
        assert_eq!(config.kerberos.retry_delay_ms, 10_000);
        assert_eq!(config.kerberos.max_retries, 3);
        assert_eq!(config.session.host, "tcps://solace-broker:55443");
        assert_eq!(config.session.vpn_name, "default");
        assert_eq!(config.session.connection_timeout_ms, 10_000);
        assert!(config.telemetry.metrics_addr.is_none());
        assert_eq!(config.telemetry.health_log_interval_secs, 60);
        assert!(config.kerberos.password.is_none());
    }

    #[test]
    fn test_full_config() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secrets();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[kerberos]
principal = "svc-trades"
keytab_path = "/etc/svc.keytab"
cache_dir = "/tmp/tk"
refresh_buffer_ms = 60000
retry_delay_ms = 500
max_retries = 5
shutdown_timeout_ms = 2000

[session]
host = "tcp://broker.internal:55555"
vpn_name = "trading"
connection_timeout_ms = 3000
max_reconnect_retries = 4
reconnect_delay_ms = 250
reconnect_multiplier = 2.0

[telemetry]
metrics_addr = "127.0.0.1:9100"
health_log_interval_secs = 15
"#,
        );
        let config = Config::load(&path).unwrap();

        let manager = config.manager_config();
        assert_eq!(manager.refresh_buffer, Duration::from_secs(60));
        assert_eq!(manager.login_retry.max_attempts, 5);
        assert_eq!(manager.retry_delay(), Duration::from_millis(500));
        assert_eq!(manager.shutdown_timeout, Duration::from_secs(2));

        let connector = config.connector_config();
        assert_eq!(connector.connection_timeout, Duration::from_secs(3));
        assert_eq!(connector.retry.max_attempts, 4);
        assert_eq!(connector.retry.delay_after(1), Duration::from_millis(250));
        assert_eq!(connector.retry.delay_after(2), Duration::from_millis(500));

        assert_eq!(
            config.telemetry.metrics_addr,
            Some("127.0.0.1:9100".parse().unwrap())
        );
    }

    #[test]
    fn test_reconnect_delay_defaults_to_connection_timeout() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secrets();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
[kerberos]
principal = "svc"
keytab_path = "/etc/svc.keytab"

[session]
connection_timeout_ms = 7000
"#,
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.connector_config().retry.delay_after(1),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn test_password_from_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secrets();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[kerberos]\nprincipal = \"svc\"\n");

        unsafe { set_env("KERBEROS_PASSWORD", "hunter2") };
        let config = Config::load(&path).unwrap();
        clear_secrets();

        assert_eq!(config.kerberos.password.as_ref().unwrap().expose(), "hunter2");
        assert!(!format!("{config:?}").contains("hunter2"), "password must not appear in Debug");
        assert_eq!(
            config.provider_settings().password.unwrap().expose(),
            "hunter2"
        );
    }

    #[test]
    fn test_username_env_overrides_principal() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secrets();
        let dir = tempfile::tempdir().unwrap();
        unsafe { set_env("KERBEROS_USERNAME", "svc-override") };
        let config = Config::load(&write_config(&dir, KEYTAB_TOML)).unwrap();
        clear_secrets();

        assert_eq!(config.kerberos.principal, "svc-override");
        assert_eq!(
            config.provider_settings().qualified_principal(),
            "svc-override@EXAMPLE.COM"
        );
    }

    #[test]
    fn test_missing_secret_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secrets();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[kerberos]\nprincipal = \"svc\"\n");

        let err = Config::load(&path).unwrap_err();
        assert!(
            matches!(err, common::Error::MissingSecret(_)),
            "expected MissingSecret, got: {err}"
        );
    }

    #[test]
    fn test_empty_password_env_is_ignored() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secrets();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[kerberos]\nprincipal = \"svc\"\n");

        unsafe { set_env("KERBEROS_PASSWORD", "") };
        let result = Config::load(&path);
        clear_secrets();
        assert!(result.is_err(), "empty KERBEROS_PASSWORD is not a credential");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_secrets();
        let cases = [
            ("principal = \"  \"", "", "principal"),
            ("realm = \"EXAMPLE.COM\"", "", "realm and kerberos.kdc"),
            ("refresh_buffer_ms = 0", "", "refresh_buffer_ms"),
            ("max_retries = 0", "", "max_retries"),
            ("", "connection_timeout_ms = 0", "connection_timeout_ms"),
            ("", "max_reconnect_retries = 0", "max_reconnect_retries"),
            ("", "reconnect_multiplier = 0.5", "reconnect_multiplier"),
        ];
        for (kerberos_extra, session_extra, expected) in cases {
            let dir = tempfile::tempdir().unwrap();
            let principal = if kerberos_extra.starts_with("principal") {
                String::new()
            } else {
                "principal = \"svc\"\n".to_string()
            };
            let contents = format!(
                "[kerberos]\n{principal}keytab_path = \"/etc/svc.keytab\"\n{kerberos_extra}\n\n[session]\n{session_extra}\n"
            );
            let err = Config::load(&write_config(&dir, &contents)).unwrap_err();
            assert!(
                err.to_string().contains(expected),
                "expected error mentioning {expected:?}, got: {err}"
            );
        }
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(common::Error::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(&write_config(&dir, "not valid {{{{ toml"));
        assert!(matches!(result, Err(common::Error::Toml(_))));
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("ticket-keeper.toml"));
    }

    #[test]
    fn test_resolve_path_cli_overrides_env() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/should-lose.toml") };
        let path = Config::resolve_path(Some("/cli/wins.toml"));
        assert_eq!(
            path,
            PathBuf::from("/cli/wins.toml"),
            "CLI arg must take precedence over CONFIG_PATH env var"
        );
        unsafe { remove_env("CONFIG_PATH") };
    }
}
