use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::types::AuthenticationInfo;

/// Default connect timeout for new sessions.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default idle connections kept per host.
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;

/// Settings applied to every operation of a session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub connect_timeout_secs: u64,
    /// Overall per-request timeout. `None` means no limit.
    pub request_timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    pub headers: HashMap<String, Vec<String>>,
    pub authentication: Option<AuthenticationInfo>,
    pub pool_max_idle_per_host: usize,
    /// Where download operations place finished files.
    pub download_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: None,
            user_agent: None,
            headers: HashMap::new(),
            authentication: None,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            download_dir: std::env::temp_dir(),
        }
    }
}

impl SessionConfig {
    /// A session that keeps no idle connections between operations.
    pub fn ephemeral() -> Self {
        Self {
            pool_max_idle_per_host: 0,
            ..Self::default()
        }
    }

    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SessionConfig::default(),
        }
    }

    pub fn from_config(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connect_timeout_secs = secs;
        self
    }

    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = Some(secs);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .headers
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_authentication(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.authentication = Some(AuthenticationInfo {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn with_pool_max_idle_per_host(mut self, size: usize) -> Self {
        self.config.pool_max_idle_per_host = size;
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.download_dir = dir.into();
        self
    }

    pub fn build(self) -> SessionConfig {
        self.config
    }
}

impl Default for SessionConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
