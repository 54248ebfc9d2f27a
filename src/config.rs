use crate::settings::Settings;
use serde::Deserialize;
use std::{fs, net::IpAddr, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Read(#[from] std::io::Error),
    #[error("unable to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("primary_domain must be set")]
    MissingDomain,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Seeds the tenant settings the first time the datastore holds none.
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Domain devices reach this server on. All URLs handed out are built from it.
    pub primary_domain: String,
    /// Usually `enterpriseenrollment.<email domain>`, where Windows looks first.
    pub discovery_domain: Option<String>,
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    /// Only accept requests sent by the Windows enrollment client.
    #[serde(default)]
    pub strict_user_agent: bool,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
}

// Per configuration, we should bind to 127.0.0.1 by default.
fn default_bind_address() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_port() -> u16 {
    8443
}

fn default_provider_id() -> String {
    "WindowsMDMServer".to_string()
}

fn default_max_body_bytes() -> usize {
    8 * 1024 * 1024
}

#[derive(Clone, Debug, Deserialize)]
pub struct StorageConfig {
    pub database_path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    8
}

#[derive(Clone, Debug, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_key_bits")]
    pub key_bits: usize,
}

fn default_key_bits() -> usize {
    4096
}

impl Default for IdentityConfig {
    fn default() -> Self {
        IdentityConfig {
            key_bits: default_key_bits(),
        }
    }
}

/// Used to access options within configuration.
impl Config {
    /// Loads the configuration from the specified path.
    /// Prefer using the config within the shared application state once loaded.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Config::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        if config.service.primary_domain.trim().is_empty() {
            return Err(ConfigError::MissingDomain);
        }
        Ok(config)
    }

    /// Every hostname a request's `To` header may name.
    pub fn enrollment_domains(&self) -> Vec<String> {
        let primary = self.service.primary_domain.to_ascii_lowercase();
        let discovery = match &self.service.discovery_domain {
            Some(domain) => domain.to_ascii_lowercase(),
            None => format!("enterpriseenrollment.{primary}"),
        };
        vec![primary, discovery]
    }

    /// Absolute URL of a path on the primary domain.
    pub fn service_url(&self, path: &str) -> String {
        format!("https://{}{}", self.service.primary_domain, path)
    }
}
