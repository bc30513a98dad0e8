//! Realtime client configuration from environment variables.

use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8080/ws/";
pub const DEFAULT_CLIENT_TYPE: &str = "customer";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_BROADCAST_CAPACITY: usize = 64;

/// Certificate trust policy for `wss://` endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TlsPolicy {
    /// Normal certificate and hostname verification.
    #[default]
    Verify,
    /// Accept any certificate, but only when connecting to `host`.
    /// Meant for a pinned development server with a self-signed certificate.
    TrustAnyCertificateFor { host: String },
}

impl TlsPolicy {
    /// Whether verification is skipped for this host.
    pub fn trusts_blindly(&self, host: Option<&str>) -> bool {
        match (self, host) {
            (TlsPolicy::TrustAnyCertificateFor { host: pinned }, Some(host)) => pinned == host,
            _ => false,
        }
    }
}

/// Everything the session needs to know up front.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket endpoint; handshake parameters are appended as a query.
    pub endpoint: Url,
    /// Role tag sent as the `type` handshake parameter.
    pub client_type: String,
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Fixed delay before an automatic reconnect.
    pub reconnect_delay: Duration,
    /// Per-output buffer for lagging listeners.
    pub broadcast_capacity: usize,
    pub tls: TlsPolicy,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid URL"),
            client_type: DEFAULT_CLIENT_TYPE.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            tls: TlsPolicy::Verify,
        }
    }
}

impl RealtimeConfig {
    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `RAPTOR_WS_URL`: WebSocket endpoint (default: `ws://localhost:8080/ws/`)
    /// - `RAPTOR_CLIENT_TYPE`: role tag (default: "customer")
    /// - `RAPTOR_REQUEST_TIMEOUT_SECS`: correlated request timeout (default: 10)
    /// - `RAPTOR_HEARTBEAT_SECS`: ping interval (default: 30)
    /// - `RAPTOR_RECONNECT_DELAY_SECS`: reconnect delay (default: 5)
    /// - `RAPTOR_TRUST_HOST`: host whose certificate is accepted without verification
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`RealtimeConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(endpoint) = lookup("RAPTOR_WS_URL") {
            config = config.with_endpoint(&endpoint)?;
        }
        if let Some(client_type) = lookup("RAPTOR_CLIENT_TYPE").filter(|t| !t.trim().is_empty()) {
            config.client_type = client_type.trim().to_string();
        }
        if let Some(secs) = seconds(&lookup, "RAPTOR_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = secs;
        }
        if let Some(secs) = seconds(&lookup, "RAPTOR_HEARTBEAT_SECS")? {
            config.heartbeat_interval = secs;
        }
        if let Some(secs) = seconds(&lookup, "RAPTOR_RECONNECT_DELAY_SECS")? {
            config.reconnect_delay = secs;
        }
        if let Some(host) = lookup("RAPTOR_TRUST_HOST").filter(|h| !h.trim().is_empty()) {
            config.tls = TlsPolicy::TrustAnyCertificateFor {
                host: host.trim().to_string(),
            };
        }

        Ok(config)
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(endpoint).map_err(|source| ConfigError::InvalidEndpoint {
            value: endpoint.to_string(),
            source,
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConfigError::UnsupportedScheme(url.scheme().to_string()));
        }
        self.endpoint = url;
        Ok(self)
    }

    pub fn with_client_type(mut self, client_type: impl Into<String>) -> Self {
        self.client_type = client_type.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_tls(mut self, tls: TlsPolicy) -> Self {
        self.tls = tls;
        self
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ConfigError::InvalidSeconds { var, value }),
    }
}
