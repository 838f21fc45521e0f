//! Client configuration.
//!
//! Two layers live here: process-wide settings (user agent, default proxy)
//! that calls consult, and the file/environment [`Config`] used to build a
//! root context. Settings that define a connection (endpoint, proxy) are
//! captured when the root context is built. The user agent is read on every
//! request.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::DEFAULT_MEMORY_ENTRIES;
use crate::error::{ConfigError, ConfigResult};

/// User agent sent when none has been set
pub const DEFAULT_USER_AGENT: &str = concat!("eveapi-rs/", env!("CARGO_PKG_VERSION"));

/// Endpoint used when none is configured
pub const DEFAULT_URL: &str = "api.eveonline.com";

/// Proxy server requests are routed through
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    /// Whether the proxy itself is reached over TLS
    #[serde(default)]
    pub ssl: bool,
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ssl: false,
        }
    }

    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// Parse `host:port`
    pub fn parse(value: &str) -> Option<Self> {
        let (host, port) = value.trim().rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port.parse().ok()?))
    }

    pub fn url(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

impl fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Default)]
struct GlobalSettings {
    user_agent: Option<String>,
    proxy: Option<ProxyConfig>,
}

static GLOBALS: RwLock<GlobalSettings> = RwLock::new(GlobalSettings {
    user_agent: None,
    proxy: None,
});

fn globals_read() -> RwLockReadGuard<'static, GlobalSettings> {
    match GLOBALS.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(lock_kind = "rwlock.read", "Recovered from poisoned settings lock");
            poisoned.into_inner()
        }
    }
}

fn globals_write() -> RwLockWriteGuard<'static, GlobalSettings> {
    match GLOBALS.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(lock_kind = "rwlock.write", "Recovered from poisoned settings lock");
            poisoned.into_inner()
        }
    }
}

/// Set the user agent sent with every subsequent request. `None` restores
/// [`DEFAULT_USER_AGENT`].
pub fn set_user_agent(user_agent: Option<String>) {
    globals_write().user_agent = user_agent;
}

/// The user agent for a request issued now
pub fn user_agent() -> String {
    globals_read()
        .user_agent
        .clone()
        .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
}

/// Proxy adopted by root contexts built without an explicit one
pub fn set_default_proxy(proxy: Option<ProxyConfig>) {
    globals_write().proxy = proxy;
}

pub fn default_proxy() -> Option<ProxyConfig> {
    globals_read().proxy.clone()
}

/// Trait for abstracting environment variable access
pub trait EnvProvider {
    fn get(&self, key: &str) -> Option<String>;
}

/// System environment variable provider for production use
pub struct SystemEnvProvider;

impl EnvProvider for SystemEnvProvider {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub endpoint: EndpointConfig,
    pub network: NetworkConfig,
    pub proxy: Option<ProxyConfig>,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    /// Root location of the API server; scheme defaults to https
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// HTTP request timeout in seconds
    pub timeout_seconds: u64,
    /// Overrides the process-wide user agent when set
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// On-disk cache directory; memory-only caching when unset
    pub directory: Option<PathBuf>,
    /// Cache on disk under [`CacheConfig::default_directory`] when no
    /// directory is given
    pub disk: bool,
    /// Maximum number of documents held in memory
    pub max_memory_entries: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            user_agent: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: None,
            disk: false,
            max_memory_entries: DEFAULT_MEMORY_ENTRIES,
        }
    }
}

impl CacheConfig {
    /// Conventional per-user cache location
    pub fn default_directory() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("eveapi")
    }

    /// Directory for the on-disk tier, if one is wanted
    pub fn resolved_directory(&self) -> Option<PathBuf> {
        self.directory
            .clone()
            .or_else(|| self.disk.then(Self::default_directory))
    }
}

/// Configuration manager for loading and merging configurations
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration with precedence: defaults -> file -> environment
    pub fn load(path: Option<&Path>) -> ConfigResult<Config> {
        let config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Config::default(),
        };
        Self::apply_environment_overrides(config)
    }

    /// Load configuration from a file (TOML or JSON)
    pub fn load_from_file(path: &Path) -> ConfigResult<Config> {
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Ok(toml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => {
                // Try to parse as TOML first, then JSON
                if let Ok(config) = toml::from_str::<Config>(&content) {
                    Ok(config)
                } else {
                    Ok(serde_json::from_str(&content)?)
                }
            }
        }
    }

    /// Apply environment variable overrides using the system environment
    pub fn apply_environment_overrides(config: Config) -> ConfigResult<Config> {
        Self::apply_environment_overrides_with(&SystemEnvProvider, config)
    }

    /// Apply environment variable overrides with a custom environment provider
    pub fn apply_environment_overrides_with(
        env: &impl EnvProvider,
        mut config: Config,
    ) -> ConfigResult<Config> {
        if let Some(url) = env.get("EVEAPI_URL") {
            config.endpoint.url = url;
        }

        if let Some(timeout) = env.get("EVEAPI_TIMEOUT") {
            config.network.timeout_seconds = timeout.parse().map_err(|_| {
                ConfigError::Environment(format!("Invalid EVEAPI_TIMEOUT value: {}", timeout))
            })?;
        }

        if let Some(user_agent) = env.get("EVEAPI_USER_AGENT") {
            config.network.user_agent = Some(user_agent);
        }

        if let Some(proxy) = env.get("EVEAPI_PROXY") {
            config.proxy = Some(ProxyConfig::parse(&proxy).ok_or_else(|| {
                ConfigError::Environment(format!("Invalid EVEAPI_PROXY value: {}", proxy))
            })?);
        }

        if let Some(ssl) = env.get("EVEAPI_PROXY_SSL") {
            let ssl: bool = ssl.parse().map_err(|_| {
                ConfigError::Environment(format!("Invalid EVEAPI_PROXY_SSL value: {}", ssl))
            })?;
            if let Some(proxy) = config.proxy.as_mut() {
                proxy.ssl = ssl;
            }
        }

        if let Some(cache_dir) = env.get("EVEAPI_CACHE_DIR") {
            config.cache.directory = Some(PathBuf::from(cache_dir));
        }

        if let Some(disk) = env.get("EVEAPI_DISK_CACHE") {
            config.cache.disk = disk.parse().map_err(|_| {
                ConfigError::Environment(format!("Invalid EVEAPI_DISK_CACHE value: {}", disk))
            })?;
        }

        Ok(config)
    }
}
