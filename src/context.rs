//! Request contexts.
//!
//! A [`Context`] is an immutable pair of path segments and parameters. Walking
//! the API (`extend`), pre-seeding parameters (`with_params`, `auth`,
//! `character`) and invoking all produce new values; nothing is shared with
//! the parent except the connection it was built from.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{
    CacheStore, CachedDocument, DiskCache, FileCache, MemoryCache, NullBackend, RequestFingerprint,
};
use crate::config::{self, Config, ProxyConfig};
use crate::error::{ApiError, ConfigError, ConfigResult, Result};
use crate::http_client::{HttpClientConfig, HttpTransport, Transport, TransportRequest};
use crate::response::{self, Document, Response, Scalar, TIMESTAMP_FORMAT};

/// Suffix appended to every API function path
pub const PATH_SUFFIX: &str = ".xml.aspx";

/// A parameter value as passed to an API function
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Sent comma-joined, e.g. a list of IDs
    List(Vec<i64>),
}

impl ParamValue {
    pub fn to_wire(&self) -> String {
        match self {
            ParamValue::Text(v) => v.clone(),
            ParamValue::Integer(v) => v.to_string(),
            ParamValue::Float(v) => v.to_string(),
            ParamValue::Boolean(v) => if *v { "1" } else { "0" }.to_string(),
            ParamValue::List(v) => v
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Integer(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Integer(i64::from(value))
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Integer(i64::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Boolean(value)
    }
}

impl From<Vec<i64>> for ParamValue {
    fn from(value: Vec<i64>) -> Self {
        ParamValue::List(value)
    }
}

impl From<&[i64]> for ParamValue {
    fn from(value: &[i64]) -> Self {
        ParamValue::List(value.to_vec())
    }
}

/// Lets a value read from one response feed the next call
impl From<&Scalar> for ParamValue {
    fn from(value: &Scalar) -> Self {
        match value {
            Scalar::Integer(v) => ParamValue::Integer(*v),
            Scalar::Float(v) => ParamValue::Float(*v),
            Scalar::Boolean(v) => ParamValue::Boolean(*v),
            Scalar::Timestamp(v) => ParamValue::Text(v.format(TIMESTAMP_FORMAT).to_string()),
            Scalar::Text(v) => ParamValue::Text(v.clone()),
        }
    }
}

/// Named parameters, kept sorted by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<ParamValue>,
    ) -> Option<ParamValue> {
        self.0.insert(name.into(), value.into())
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy of `self` with `overrides` applied on top
    pub fn merged(&self, overrides: &Params) -> Params {
        let mut merged = self.clone();
        for (name, value) in &overrides.0 {
            merged.0.insert(name.clone(), value.clone());
        }
        merged
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

impl<K: Into<String>, V: Into<ParamValue>, const N: usize> From<[(K, V); N]> for Params {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// State shared by every context derived from one root
struct Connection {
    scheme: String,
    host: String,
    base_path: String,
    proxy: Option<ProxyConfig>,
    user_agent: Option<String>,
    cache: Option<Arc<dyn CacheStore>>,
    transport: Arc<dyn Transport>,
}

/// A position in the API hierarchy with its accumulated parameters
#[derive(Clone)]
pub struct Context {
    connection: Arc<Connection>,
    path: Vec<String>,
    params: Params,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("scheme", &self.connection.scheme)
            .field("host", &self.connection.host)
            .field("path", &self.path)
            .field("params", &self.params)
            .finish()
    }
}

impl Context {
    /// Root context for `url` with the default memory cache and HTTP transport
    pub fn connect(url: &str) -> ConfigResult<Context> {
        ConnectionBuilder::new().url(url).build()
    }

    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Child context one path segment deeper
    pub fn extend(&self, name: &str) -> Context {
        let mut path = self.path.clone();
        path.push(name.to_string());
        Context {
            connection: self.connection.clone(),
            path,
            params: self.params.clone(),
        }
    }

    /// Child context for a `/`-separated path such as `char/CharacterSheet`
    pub fn resolve(&self, path: &str) -> Context {
        path.split('/')
            .filter(|s| !s.is_empty())
            .fold(self.clone(), |ctx, segment| ctx.extend(segment))
    }

    /// Child context whose descendants all carry `params`
    pub fn with_params(&self, params: Params) -> Context {
        Context {
            connection: self.connection.clone(),
            path: self.path.clone(),
            params: self.params.merged(&params),
        }
    }

    /// Authenticated context: every call carries the key ID and verification code
    pub fn auth(&self, key_id: impl Into<ParamValue>, v_code: impl Into<ParamValue>) -> Context {
        self.with_params(Params::new().with("keyID", key_id).with("vCode", v_code))
    }

    /// Character context: adds `characterID` and descends into `char`
    pub fn character(&self, character_id: impl Into<ParamValue>) -> Context {
        self.with_params(Params::new().with("characterID", character_id))
            .extend("char")
    }

    /// Same context served by a different cache store, or none
    pub fn with_cache_store(&self, cache: Option<Arc<dyn CacheStore>>) -> Context {
        self.with_connection(|c| Connection {
            cache,
            transport: c.transport.clone(),
            ..c.clone_settings()
        })
    }

    /// Same context fetching through a different transport
    pub fn with_transport(&self, transport: Arc<dyn Transport>) -> Context {
        self.with_connection(|c| Connection {
            cache: c.cache.clone(),
            transport,
            ..c.clone_settings()
        })
    }

    fn with_connection(&self, f: impl FnOnce(&Connection) -> Connection) -> Context {
        Context {
            connection: Arc::new(f(&self.connection)),
            path: self.path.clone(),
            params: self.params.clone(),
        }
    }

    pub fn scheme(&self) -> &str {
        &self.connection.scheme
    }

    pub fn host(&self) -> &str {
        &self.connection.host
    }

    pub fn proxy(&self) -> Option<&ProxyConfig> {
        self.connection.proxy.as_ref()
    }

    pub fn cache_store(&self) -> Option<&Arc<dyn CacheStore>> {
        self.connection.cache.as_ref()
    }

    pub fn path_segments(&self) -> &[String] {
        &self.path
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Full request path, e.g. `/char/CharacterSheet.xml.aspx`
    pub fn request_path(&self) -> String {
        format!(
            "{}/{}{}",
            self.connection.base_path,
            self.path.join("/"),
            PATH_SUFFIX
        )
    }

    /// Invoke without further parameters
    pub fn call(&self) -> Result<Response> {
        self.invoke(Params::new())
    }

    /// Call the API function at this path.
    ///
    /// `params` override inherited ones of the same name. A fresh cached
    /// document skips the network; otherwise the fetched document is offered
    /// to the cache when the server grants a positive freshness window. A
    /// cached document that no longer parses is deleted and refetched.
    pub fn invoke(&self, params: Params) -> Result<Response> {
        if self.path.is_empty() {
            return Err(ApiError::request(0, "No API function selected"));
        }

        let params = self.params.merged(&params);
        let path = self.request_path();
        let fingerprint = RequestFingerprint::new(&self.connection.host, &path, &params);

        if let Some(cached) = self.cached_document(&fingerprint) {
            match response::parse(&cached.content) {
                Ok(document) => {
                    return Ok(Response {
                        document,
                        from_cache: true,
                    });
                }
                Err(e) => self.discard_unreadable(&fingerprint, &e),
            }
        }

        let raw = self.fetch(&fingerprint)?;
        let document = response::parse(&raw)?;
        self.offer_to_cache(&fingerprint, raw, &document);

        Ok(Response {
            document,
            from_cache: false,
        })
    }

    fn cached_document(&self, fingerprint: &RequestFingerprint) -> Option<CachedDocument> {
        let cache = self.connection.cache.as_ref()?;
        let path = fingerprint.path();

        match cache.retrieve(fingerprint) {
            Ok(Some(document)) if document.is_fresh_at(Utc::now()) => {
                debug!(path, valid_until = %document.valid_until, "Cache hit");
                Some(document)
            }
            Ok(Some(document)) => {
                debug!(path, valid_until = %document.valid_until, "Discarding stale cache entry");
                if let Err(e) = cache.delete(fingerprint) {
                    warn!(path, error = %e, "Failed to delete stale cache entry");
                }
                None
            }
            Ok(None) => {
                debug!(path, "Cache miss");
                None
            }
            Err(e) => {
                warn!(path, error = %e, "Cache lookup failed; fetching instead");
                None
            }
        }
    }

    /// Unreadable entries are dropped so the next lookup misses
    fn discard_unreadable(&self, fingerprint: &RequestFingerprint, error: &ApiError) {
        let Some(cache) = self.connection.cache.as_ref() else {
            return;
        };
        let path = fingerprint.path();

        warn!(path, error = %error, "Cached document is unreadable; refetching");
        if let Err(e) = cache.delete(fingerprint) {
            warn!(path, error = %e, "Failed to delete unreadable cache entry");
        }
    }

        fn fetch(&self, fingerprint: &RequestFingerprint) -> Result<String> {
        let user_agent = self
            .connection
            .user_agent
            .clone()
            .unwrap_or_else(config::user_agent);

        let request = TransportRequest {
            scheme: self.connection.scheme.clone(),
            host: self.connection.host.clone(),
            path: fingerprint.path().to_string(),
            params: fingerprint.params().to_vec(),
            user_agent,
            proxy: self.connection.proxy.clone(),
        };
        self.connection.transport.fetch(&request)
    }

    fn offer_to_cache(&self, fingerprint: &RequestFingerprint, raw: String, document: &Document) {
        let Some(cache) = self.connection.cache.as_ref() else {
            return;
        };
        let path = fingerprint.path();

        if document.cache_window() <= chrono::Duration::zero() {
            debug!(path, "Server granted no freshness window; not caching");
            return;
        }

        let cached = CachedDocument::new(raw, document.cached_until);
        match cache.store(fingerprint, cached) {
            Ok(()) => debug!(path, valid_until = %document.cached_until, "Cached document"),
            Err(e) => warn!(path, error = %e, "Failed to cache document"),
        }
    }
}

impl Connection {
    /// Settings without the collaborators
    fn clone_settings(&self) -> Connection {
        Connection {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            base_path: self.base_path.clone(),
            proxy: self.proxy.clone(),
            user_agent: self.user_agent.clone(),
            cache: None,
            transport: self.transport.clone(),
        }
    }
}

/// Builds the root [`Context`]
pub struct ConnectionBuilder {
    url: String,
    proxy: Option<ProxyConfig>,
    user_agent: Option<String>,
    timeout_seconds: u64,
    cache: Option<Arc<dyn CacheStore>>,
    transport: Option<Arc<dyn Transport>>,
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionBuilder {
    pub fn new() -> Self {
        Self {
            url: config::DEFAULT_URL.to_string(),
            proxy: None,
            user_agent: None,
            timeout_seconds: HttpClientConfig::default().timeout_seconds,
            cache: Some(Arc::new(MemoryCache::new())),
            transport: None,
        }
    }

    /// Builder seeded from a loaded [`Config`]. The resolved cache directory
    /// is created if missing and backs a [`FileCache`].
    pub fn from_config(config: &Config) -> ConfigResult<Self> {
        let mut builder = Self::new()
            .url(&config.endpoint.url)
            .timeout_seconds(config.network.timeout_seconds);

        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(proxy.clone());
        }
        if let Some(user_agent) = &config.network.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        if let Some(directory) = config.cache.resolved_directory() {
            std::fs::create_dir_all(&directory)?;
            let backend = DiskCache::new(directory)?;
            builder = builder.cache_store(FileCache::with_backend(
                backend,
                config.cache.max_memory_entries,
            ));
        } else {
            builder = builder.cache_store(MemoryCache::with_backend(
                NullBackend,
                config.cache.max_memory_entries,
            ));
        }
        Ok(builder)
    }

    pub fn url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    /// Overrides the process-wide default proxy
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Pins the user agent for this connection instead of reading the
    /// process-wide setting on each request
    pub fn user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = Some(user_agent);
        self
    }

    pub fn timeout_seconds(mut self, timeout_seconds: u64) -> Self {
        self.timeout_seconds = timeout_seconds;
        self
    }

    pub fn cache_store(mut self, cache: impl CacheStore + 'static) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    pub fn shared_cache_store(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> ConfigResult<Context> {
        let (scheme, host, base_path) = normalize_endpoint(&self.url)?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(HttpClientConfig {
                timeout_seconds: self.timeout_seconds,
            })),
        };

        let connection = Connection {
            scheme,
            host,
            base_path,
            proxy: self.proxy.or_else(config::default_proxy),
            user_agent: self.user_agent,
            cache: self.cache,
            transport,
        };

        Ok(Context {
            connection: Arc::new(connection),
            path: Vec::new(),
            params: Params::new(),
        })
    }
}

/// Split an endpoint into scheme, `host[:port]` and a base path without a
/// trailing slash. A missing scheme means https.
fn normalize_endpoint(raw: &str) -> ConfigResult<(String, String, String)> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };
    let parsed = Url::parse(&with_scheme).map_err(|e| invalid(e.to_string()))?;

    let host = parsed
        .host_str()
        .ok_or_else(|| invalid("missing host".to_string()))?;
    let host = match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let base_path = parsed.path().trim_end_matches('/').to_string();

    Ok((parsed.scheme().to_string(), host, base_path))
}
