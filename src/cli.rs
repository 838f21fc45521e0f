use clap::Parser;
use std::path::PathBuf;

use crate::config::{Config, ProxyConfig};
use crate::context::{ParamValue, Params};

/// Call one EVE API function and print the result as JSON
#[derive(Parser, Debug, Clone)]
#[command(name = "eveapi")]
#[command(about = "Query an EVE-style XML API and print the result as JSON")]
#[command(version)]
pub struct Cli {
    /// API function path, e.g. `eve/SkillTree` or `server/ServerStatus`
    #[arg(help = "API function path, e.g. 'server/ServerStatus'")]
    pub path: String,

    /// Extra call parameters
    #[arg(help = "Parameters as name=value pairs")]
    pub params: Vec<String>,

    /// API server root
    #[arg(long = "url")]
    pub url: Option<String>,

    /// API key ID
    #[arg(long = "key-id", requires = "v_code")]
    pub key_id: Option<i64>,

    /// API key verification code
    #[arg(long = "vcode", requires = "key_id")]
    pub v_code: Option<String>,

    /// Character the call is made for; adds the `char` path segment
    #[arg(long = "character-id")]
    pub character_id: Option<i64>,

    /// On-disk cache directory
    #[arg(long = "cache-dir")]
    pub cache_dir: Option<PathBuf>,

    /// Cache on disk in the per-user cache directory
    #[arg(long = "disk-cache")]
    pub disk_cache: bool,

    /// Disable on-disk caching even if configured
    #[arg(
        long = "no-disk-cache",
        conflicts_with_all = ["cache_dir", "disk_cache"]
    )]
    pub no_disk_cache: bool,

    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Proxy as host:port
    #[arg(long = "proxy")]
    pub proxy: Option<String>,

    /// HTTP request timeout in seconds
    #[arg(long = "timeout")]
    pub timeout: Option<u64>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", help = "Enable verbose output")]
    pub verbose: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// `name=value` pairs as call parameters; integers are sent as such
    pub fn get_params(&self) -> Result<Params, String> {
        let mut params = Params::new();
        for pair in &self.params {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("Parameter must be name=value: {}", pair))?;
            if name.is_empty() {
                return Err(format!("Parameter name is empty: {}", pair));
            }
            let value = match value.parse::<i64>() {
                Ok(v) => ParamValue::Integer(v),
                Err(_) => ParamValue::Text(value.to_string()),
            };
            params.insert(name, value);
        }
        Ok(params)
    }

    pub fn get_proxy(&self) -> Result<Option<ProxyConfig>, String> {
        self.proxy
            .as_deref()
            .map(|p| ProxyConfig::parse(p).ok_or_else(|| format!("Invalid proxy: {}", p)))
            .transpose()
    }

    /// Command-line flags layered over a loaded configuration
    pub fn apply_to(&self, mut config: Config) -> Result<Config, String> {
        if let Some(url) = &self.url {
            config.endpoint.url = url.clone();
        }
        if let Some(timeout) = self.timeout {
            config.network.timeout_seconds = timeout;
        }
        if let Some(proxy) = self.get_proxy()? {
            config.proxy = Some(proxy);
        }
        if let Some(dir) = &self.cache_dir {
            config.cache.directory = Some(dir.clone());
        }
        if self.disk_cache {
            config.cache.disk = true;
        }
        if self.no_disk_cache {
            config.cache.directory = None;
            config.cache.disk = false;
        }
        Ok(config)
    }
}
