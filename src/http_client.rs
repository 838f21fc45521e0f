use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::USER_AGENT;
use tracing::debug;

use crate::config::ProxyConfig;
use crate::error::{ApiError, Result};
use crate::response;

/// Everything the transport needs to issue one call
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub scheme: String,
    pub host: String,
    /// Full path including the `.xml.aspx` suffix
    pub path: String,
    /// Wire-encoded parameters, sorted by name
    pub params: Vec<(String, String)>,
    pub user_agent: String,
    pub proxy: Option<ProxyConfig>,
}

impl TransportRequest {
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path)
    }
}

/// Fetches raw documents from the API server.
///
/// Returns the body for successful responses and for error responses whose
/// body is an API error document, so the declared error reaches the caller.
pub trait Transport: Send + Sync {
    fn fetch(&self, request: &TransportRequest) -> Result<String>;
}

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
        }
    }
}

/// Blocking HTTP transport; one client per distinct proxy
pub struct HttpTransport {
    config: HttpClientConfig,
    clients: Mutex<HashMap<Option<ProxyConfig>, Client>>,
}

impl HttpTransport {
    pub fn new(config: HttpClientConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    fn client_for(&self, proxy: Option<&ProxyConfig>) -> Result<Client> {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let key = proxy.cloned();
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_seconds))
            .pool_idle_timeout(Duration::from_secs(30));
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy.url())?);
        }
        let client = builder.build()?;

        clients.insert(key, client.clone());
        Ok(client)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(HttpClientConfig::default())
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, request: &TransportRequest) -> Result<String> {
        let client = self.client_for(request.proxy.as_ref())?;
        let url = request.url();

        let builder = if request.params.is_empty() {
            client.get(&url)
        } else {
            client.post(&url).form(&request.params)
        };

        debug!(
            url = %url,
            params = request.params.len(),
            proxy = ?request.proxy,
            "Sending API request"
        );

        let response = builder
            .header(USER_AGENT, request.user_agent.as_str())
            .send()?;
        let status = response.status();
        let body = response.text()?;

        if !status.is_success() && response::find_error(&body).is_none() {
            return Err(ApiError::from_http_status(
                status.as_u16(),
                &request.path,
                status.canonical_reason().unwrap_or("Unknown"),
            ));
        }

        Ok(body)
    }
}
