use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use system_utils::path::expand_tilde;
use token_gate::GateConfig;

use crate::exec::{ExecError, ExecLimits};

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_STORAGE_ROOT: &str = "~/.deepmd-run/workspaces";
const DEFAULT_BASEDIR: &str = "/workspace/";
const DEFAULT_PUBLIC_KEY_ENV: &str = "DJANGO_JWT_PUBLIC_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ServiceConfig {
    pub(crate) server: ServerConfig,
    pub(crate) storage: StorageConfig,
    pub(crate) auth: AuthConfig,
    pub(crate) limits: LimitsConfig,
    pub(crate) logging: LoggingConfig,
}

impl ServiceConfig {
    pub(crate) fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub(crate) fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: ServiceConfig = toml::from_str(raw)?;
        config.limits.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct ServerConfig {
    pub(crate) listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct StorageConfig {
    pub(crate) root: String,
    pub(crate) default_basedir: String,
    pub(crate) max_upload_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: DEFAULT_STORAGE_ROOT.to_string(),
            default_basedir: DEFAULT_BASEDIR.to_string(),
            max_upload_bytes: 256 * 1024 * 1024,
        }
    }
}

impl StorageConfig {
    pub(crate) fn root_path(&self) -> PathBuf {
        expand_tilde(&self.root)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct AuthConfig {
    /// PEM file with the account service's RS256 public key; takes precedence over the env var.
    pub(crate) public_key_path: Option<String>,
    pub(crate) public_key_env: String,
    #[serde(flatten)]
    pub(crate) gate: GateConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            public_key_path: None,
            public_key_env: DEFAULT_PUBLIC_KEY_ENV.to_string(),
            gate: GateConfig::default(),
        }
    }
}

impl AuthConfig {
    pub(crate) fn load_public_key(&self) -> anyhow::Result<Vec<u8>> {
        if let Some(path) = self.public_key_path.as_deref() {
            let path = expand_tilde(path);
            return std::fs::read(&path)
                .with_context(|| format!("failed to read public key {}", path.display()));
        }
        let pem = std::env::var(&self.public_key_env).with_context(|| {
            format!(
                "no auth.public_key_path configured and {} is not set",
                self.public_key_env
            )
        })?;
        Ok(pem.into_bytes())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct LoggingConfig {
    /// Rolled daily; `--log-dir` takes precedence.
    pub(crate) dir: String,
    pub(crate) file_prefix: String,
    /// Filter used when `RUST_LOG` is unset.
    pub(crate) level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: "logs".to_string(),
            file_prefix: "run-service.log".to_string(),
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub(crate) fn dir_path(&self) -> PathBuf {
        expand_tilde(&self.dir)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct LimitsConfig {
    pub(crate) default_timeout_secs: u64,
    pub(crate) max_timeout_secs: u64,
    pub(crate) job_timeout_secs: u64,
    pub(crate) grace_period_secs: u64,
    pub(crate) max_concurrent_jobs: usize,
    pub(crate) channel_capacity: usize,
    pub(crate) max_chunk_bytes: usize,
    /// How long finished job records stay queryable.
    pub(crate) job_retention_secs: u64,
    pub(crate) sweep_interval_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 20,
            max_timeout_secs: 60 * 60,
            job_timeout_secs: 12 * 60 * 60,
            grace_period_secs: 60,
            max_concurrent_jobs: 4,
            channel_capacity: 64,
            max_chunk_bytes: 8 * 1024,
            job_retention_secs: 24 * 60 * 60,
            sweep_interval_secs: 5 * 60,
        }
    }
}

impl LimitsConfig {
    fn validate(&self) -> anyhow::Result<()> {
        if self.default_timeout_secs == 0 || self.max_timeout_secs == 0 || self.job_timeout_secs == 0
        {
            anyhow::bail!("limits: timeouts must be positive");
        }
        if self.default_timeout_secs > self.max_timeout_secs {
            anyhow::bail!("limits: default_timeout_secs exceeds max_timeout_secs");
        }
        if self.max_concurrent_jobs == 0 || self.channel_capacity == 0 || self.max_chunk_bytes == 0
        {
            anyhow::bail!("limits: max_concurrent_jobs, channel_capacity and max_chunk_bytes must be positive");
        }
        if self.sweep_interval_secs == 0 {
            anyhow::bail!("limits: sweep_interval_secs must be positive");
        }
        Ok(())
    }

    /// Timeout for interactive runs; absent means the default, larger values are clamped.
    pub(crate) fn resolve_timeout(&self, requested: Option<u64>) -> Result<Duration, ExecError> {
        clamp_timeout(requested, self.default_timeout_secs, self.max_timeout_secs)
    }

    pub(crate) fn resolve_job_timeout(&self, requested: Option<u64>) -> Result<Duration, ExecError> {
        clamp_timeout(requested, self.job_timeout_secs, self.job_timeout_secs)
    }

    pub(crate) fn exec_limits(&self) -> ExecLimits {
        ExecLimits {
            grace_period: Duration::from_secs(self.grace_period_secs),
            channel_capacity: self.channel_capacity,
            max_chunk_bytes: self.max_chunk_bytes,
        }
    }

    pub(crate) fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub(crate) fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn clamp_timeout(requested: Option<u64>, default: u64, max: u64) -> Result<Duration, ExecError> {
    match requested {
        Some(0) => Err(ExecError::InvalidTimeout),
        Some(secs) => Ok(Duration::from_secs(secs.min(max))),
        None => Ok(Duration::from_secs(default)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = ServiceConfig::parse("").expect("parse");
        assert_eq!(config.server.listen_addr, DEFAULT_LISTEN_ADDR);
        assert_eq!(config.storage.default_basedir, "/workspace/");
        assert_eq!(config.limits.grace_period_secs, 60);
        assert_eq!(config.auth.public_key_env, "DJANGO_JWT_PUBLIC_KEY");
        assert_eq!(config.auth.gate.anonymous_user, token_gate::ANONYMOUS_USER);
        assert!(config.auth.gate.is_bypass("/health"));
        assert_eq!(config.logging.file_prefix, "run-service.log");
        assert_eq!(config.limits.job_retention(), Duration::from_secs(86_400));
    }

    #[test]
    fn logging_section_overrides_file_and_level() {
        let raw = r#"
            [logging]
            dir = "/var/log/deepmd-run"
            file_prefix = "runner.log"
            level = "debug,hyper=warn"
        "#;
        let config = ServiceConfig::parse(raw).expect("parse");
        assert_eq!(config.logging.dir_path(), PathBuf::from("/var/log/deepmd-run"));
        assert_eq!(config.logging.file_prefix, "runner.log");
        assert_eq!(config.logging.level, "debug,hyper=warn");
    }

    #[test]
    fn sections_override_defaults() {
        let raw = r#"
            [server]
            listen_addr = "0.0.0.0:9000"

            [storage]
            root = "/srv/workspaces"

            [auth]
            public_key_path = "/etc/run/jwt.pub"
            anonymous_user = "guest"
            bypass_paths = ["/health"]

            [limits]
            grace_period_secs = 5
            max_timeout_secs = 120
        "#;
        let config = ServiceConfig::parse(raw).expect("parse");
        assert_eq!(config.server.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.storage.root_path(), PathBuf::from("/srv/workspaces"));
        assert_eq!(config.auth.public_key_path.as_deref(), Some("/etc/run/jwt.pub"));
        assert_eq!(config.auth.gate.anonymous_user, "guest");
        assert!(!config.auth.gate.is_bypass("/docs"));
        assert_eq!(config.auth.gate.cookie_name, "auth_token");
        assert_eq!(
            config.limits.exec_limits().grace_period,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn example_config_matches_defaults() {
        let config = ServiceConfig::parse(include_str!("../config.example.toml")).expect("parse");
        let defaults = LimitsConfig::default();
        assert_eq!(config.limits.max_timeout_secs, defaults.max_timeout_secs);
        assert_eq!(config.limits.job_timeout_secs, defaults.job_timeout_secs);
        assert_eq!(config.limits.job_retention_secs, defaults.job_retention_secs);
        assert_eq!(config.limits.sweep_interval_secs, defaults.sweep_interval_secs);
        assert_eq!(config.logging.level, LoggingConfig::default().level);
        assert_eq!(config.storage.max_upload_bytes, StorageConfig::default().max_upload_bytes);
        assert_eq!(config.auth.gate.header_name, "X-Deepmd-User-Auth-Token");
        assert!(config.auth.public_key_path.is_none());
    }

    #[test]
    fn invalid_limits_are_rejected() {
        assert!(ServiceConfig::parse("[limits]\ngrace_period_secs = 1\nchannel_capacity = 0").is_err());
        assert!(ServiceConfig::parse("[limits]\ndefault_timeout_secs = 500\nmax_timeout_secs = 100").is_err());
        assert!(ServiceConfig::parse("[limits]\nsweep_interval_secs = 0").is_err());
    }

    #[test]
    fn timeouts_default_clamp_and_reject_zero() {
        let limits = LimitsConfig {
            max_timeout_secs: 100,
            ..LimitsConfig::default()
        };
        assert_eq!(limits.resolve_timeout(None).expect("default"), Duration::from_secs(20));
        assert_eq!(
            limits.resolve_timeout(Some(30)).expect("explicit"),
            Duration::from_secs(30)
        );
        assert_eq!(
            limits.resolve_timeout(Some(10_000)).expect("clamped"),
            Duration::from_secs(100)
        );
        assert!(matches!(
            limits.resolve_timeout(Some(0)),
            Err(ExecError::InvalidTimeout)
        ));
        assert_eq!(
            limits.resolve_job_timeout(None).expect("job default"),
            Duration::from_secs(12 * 60 * 60)
        );
    }

    #[test]
    fn public_key_prefers_path() {
        let dir = crate::test_utils::temp_dir("run-service-key");
        let path = dir.join("jwt.pub");
        std::fs::write(&path, "PEM").expect("write key");
        let auth = AuthConfig {
            public_key_path: Some(path.display().to_string()),
            public_key_env: "RUN_SERVICE_TEST_UNSET_KEY".to_string(),
            ..AuthConfig::default()
        };
        assert_eq!(auth.load_public_key().expect("key"), b"PEM".to_vec());

        let missing = AuthConfig {
            public_key_env: "RUN_SERVICE_TEST_UNSET_KEY".to_string(),
            ..AuthConfig::default()
        };
        assert!(missing.load_public_key().is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
