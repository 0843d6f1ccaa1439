//! Client configuration.

use serde::{Deserialize, Serialize};

use ac_types::{config_error, AcResult};

pub const ENV_SERVER_HOST: &str = "AUTOCODE_SERVER_HOST";
pub const ENV_SERVER_PORT: &str = "AUTOCODE_SERVER_PORT";
pub const ENV_CLIENT_HOST: &str = "AUTOCODE_CLIENT_HOST";
pub const ENV_CLIENT_PORT: &str = "AUTOCODE_CLIENT_PORT";
pub const ENV_CLIENT_NAME: &str = "AUTOCODE_CLIENT_NAME";
pub const ENV_BIND_HOST: &str = "AUTOCODE_BIND_HOST";
pub const ENV_MAX_BODY_BYTES: &str = "AUTOCODE_MAX_BODY_BYTES";

/// Where the optimizer lives and how this client advertises itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Optimizer host (e.g. "localhost").
    pub server_host: String,
    pub server_port: u16,

    /// Host the optimizer should use to reach this client.
    pub client_host: String,
    pub client_port: u16,

    /// Name reported to the optimizer.
    pub client_name: String,

    /// Interface the evaluate server binds to. Defaults to `client_host`.
    pub bind_host: Option<String>,

    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_host: "localhost".to_string(),
            server_port: 8000,
            client_host: "localhost".to_string(),
            client_port: 8001,
            client_name: "autocode-client".to_string(),
            bind_host: None,
            max_body_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `AUTOCODE_*` environment variables.
    pub fn from_env() -> AcResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`ClientConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> AcResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(host) = lookup(ENV_SERVER_HOST) {
            config.server_host = host;
        }
        if let Some(port) = lookup(ENV_SERVER_PORT) {
            config.server_port = parse(ENV_SERVER_PORT, &port)?;
        }
        if let Some(host) = lookup(ENV_CLIENT_HOST) {
            config.client_host = host;
        }
        if let Some(port) = lookup(ENV_CLIENT_PORT) {
            config.client_port = parse(ENV_CLIENT_PORT, &port)?;
        }
        if let Some(name) = lookup(ENV_CLIENT_NAME) {
            config.client_name = name;
        }
        if let Some(host) = lookup(ENV_BIND_HOST) {
            config.bind_host = Some(host);
        }
        if let Some(limit) = lookup(ENV_MAX_BODY_BYTES) {
            config.max_body_bytes = parse(ENV_MAX_BODY_BYTES, &limit)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn with_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.server_host = host.into();
        self.server_port = port;
        self
    }

    pub fn with_client(mut self, host: impl Into<String>, port: u16) -> Self {
        self.client_host = host.into();
        self.client_port = port;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = Some(host.into());
        self
    }

    pub fn with_max_body_bytes(mut self, limit: usize) -> Self {
        self.max_body_bytes = limit;
        self
    }

    pub fn validate(&self) -> AcResult<()> {
        if self.server_host.is_empty() {
            return Err(config_error!("server host must not be empty"));
        }
        if self.client_host.is_empty() {
            return Err(config_error!("client host must not be empty"));
        }
        if self.max_body_bytes == 0 {
            return Err(config_error!("max body size must be positive"));
        }
        Ok(())
    }

    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.server_host, self.server_port)
    }

    pub fn client_url(&self) -> String {
        format!("http://{}:{}", self.client_host, self.client_port)
    }

    /// `host:port` the evaluate server listens on.
    pub fn bind_addr(&self) -> String {
        let host = self.bind_host.as_deref().unwrap_or(&self.client_host);
        format!("{}:{}", host, self.client_port)
    }
}

fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> AcResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| config_error!("invalid {key}={raw}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_types::AcError;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.server_url(), "http://localhost:8000");
        assert_eq!(config.client_url(), "http://localhost:8001");
        assert_eq!(config.bind_addr(), "localhost:8001");
    }

    #[test]
    fn environment_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_SERVER_HOST, "optimizer"),
            (ENV_SERVER_PORT, "9000"),
            (ENV_CLIENT_HOST, "worker-3"),
            (ENV_CLIENT_PORT, "9100"),
            (ENV_CLIENT_NAME, "worker"),
            (ENV_BIND_HOST, "0.0.0.0"),
        ]))
        .unwrap();

        assert_eq!(config.server_url(), "http://optimizer:9000");
        assert_eq!(config.client_url(), "http://worker-3:9100");
        assert_eq!(config.client_name, "worker");
        assert_eq!(config.bind_addr(), "0.0.0.0:9100");
    }

    #[test]
    fn invalid_port_is_config_error() {
        let result = ClientConfig::from_lookup(lookup(&[(ENV_CLIENT_PORT, "eighty")]));
        assert!(matches!(result, Err(AcError::Config(_))));
    }

    #[test]
    fn zero_body_limit_rejected() {
        let result = ClientConfig::from_lookup(lookup(&[(ENV_MAX_BODY_BYTES, "0")]));
        assert!(matches!(result, Err(AcError::Config(_))));
    }

    #[test]
    fn builders() {
        let config = ClientConfig::default()
            .with_server("10.0.0.1", 7000)
            .with_client("10.0.0.2", 7001)
            .with_name("bench")
            .with_max_body_bytes(1024);
        assert_eq!(config.server_url(), "http://10.0.0.1:7000");
        assert_eq!(config.client_name, "bench");
        assert_eq!(config.max_body_bytes, 1024);
    }
}
