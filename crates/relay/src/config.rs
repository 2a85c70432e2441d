use realtime::server::ServerConfig;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

const ENV_PREFIX: &str = "RELAY_";

/// Relay configuration, read from `RELAY_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_max_connections_per_channel")]
    pub max_connections_per_channel: usize,

    /// Comma-separated tenants allowed to connect; any tenant when unset
    pub allowed_tenants: Option<String>,

    /// Default `tracing` filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    Env(#[from] envy::Error),
}

impl RelayConfig {
    /// Load from the environment, after reading `relay.env` or `.env` if present.
    pub fn load() -> Result<Self, ConfigError> {
        if std::path::Path::new("relay.env").exists() {
            dotenvy::from_filename("relay.env").ok();
        } else {
            dotenvy::dotenv().ok();
        }

        let config = envy::prefixed(ENV_PREFIX).from_env::<RelayConfig>()?;
        info!("Configuration loaded");
        Ok(config)
    }

    /// Parse from explicit `(key, value)` pairs using the `RELAY_` prefix.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed(ENV_PREFIX).from_iter(pairs)?)
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Allowed tenants, or `None` when every tenant is admitted.
    pub fn tenant_allow_list(&self) -> Option<Vec<String>> {
        let list: Vec<String> = self
            .allowed_tenants
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        (!list.is_empty()).then_some(list)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::with_port(self.port)
            .with_bind_address(self.host.clone())
            .with_max_connections(self.max_connections)
            .with_max_connections_per_channel(self.max_connections_per_channel)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            max_connections_per_channel: default_max_connections_per_channel(),
            allowed_tenants: None,
            log_level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    1000
}

fn default_max_connections_per_channel() -> usize {
    100
}

fn default_log_level() -> String {
    "realtime=info,relay=info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = RelayConfig::from_pairs(Vec::new()).unwrap();
        assert_eq!(config.server_address(), "0.0.0.0:8080");
        assert_eq!(config.max_connections, 1000);
        assert!(config.tenant_allow_list().is_none());
    }

    #[test]
    fn test_prefixed_variables() {
        let config = RelayConfig::from_pairs(pairs(&[
            ("RELAY_HOST", "127.0.0.1"),
            ("RELAY_PORT", "9001"),
            ("RELAY_MAX_CONNECTIONS_PER_CHANNEL", "5"),
            ("RELAY_ALLOWED_TENANTS", "acme, globex,"),
            ("PORT", "1"),
        ]))
        .unwrap();

        assert_eq!(config.server_address(), "127.0.0.1:9001");
        assert_eq!(
            config.tenant_allow_list(),
            Some(vec!["acme".to_string(), "globex".to_string()])
        );

        let server = config.server_config();
        assert_eq!(server.port, 9001);
        assert_eq!(server.max_connections_per_channel, 5);
    }

    #[test]
    fn test_invalid_port() {
        let result = RelayConfig::from_pairs(pairs(&[("RELAY_PORT", "not-a-port")]));
        assert!(matches!(result, Err(ConfigError::Env(_))));
    }
}
