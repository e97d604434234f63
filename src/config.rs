//! Webhook configuration from environment variables
//!
//! | Variable | Default |
//! |---|---|
//! | `KIM_SNATCH_NODE_SELECTOR_VALUE` | required |
//! | `KIM_SNATCH_NODE_SELECTOR_RESOLVED` | `true` |
//! | `KIM_SNATCH_OMITTED_NAMESPACES` | `kube-system` |
//! | `KIM_SNATCH_WEBHOOK_TLS` | `false` |
//! | `KIM_SNATCH_SERVICE_NAME` | `kim-snatch-webhook` |
//! | `KIM_SNATCH_NAMESPACE` | `kyma-system` |
//! | `KIM_SNATCH_WEBHOOK_CONFIGURATION` | `kim-snatch-mutating-webhook-configuration` |
//!
//! Which node pool to target is decided outside this process; the webhook only
//! learns the value and whether it was resolved.

use crate::admission::NodeSelector;
use crate::server::tls::{WebhookTlsConfig, DEFAULT_TLS_SECRET_NAME, DEFAULT_WEBHOOK_CONFIGURATION};
use thiserror::Error;

pub const ENV_NODE_SELECTOR_VALUE: &str = "KIM_SNATCH_NODE_SELECTOR_VALUE";
pub const ENV_NODE_SELECTOR_RESOLVED: &str = "KIM_SNATCH_NODE_SELECTOR_RESOLVED";
pub const ENV_OMITTED_NAMESPACES: &str = "KIM_SNATCH_OMITTED_NAMESPACES";
pub const ENV_WEBHOOK_TLS: &str = "KIM_SNATCH_WEBHOOK_TLS";
pub const ENV_SERVICE_NAME: &str = "KIM_SNATCH_SERVICE_NAME";
pub const ENV_NAMESPACE: &str = "KIM_SNATCH_NAMESPACE";
pub const ENV_WEBHOOK_CONFIGURATION: &str = "KIM_SNATCH_WEBHOOK_CONFIGURATION";

const DEFAULT_OMITTED_NAMESPACES: &str = "kube-system";
const DEFAULT_SERVICE_NAME: &str = "kim-snatch-webhook";
const DEFAULT_NAMESPACE: &str = "kyma-system";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} must be true/false/1/0, got '{value}'")]
    InvalidBool { name: &'static str, value: String },
}

/// Resolved startup configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub node_selector: NodeSelector,
    /// Namespaces never given node affinity, in configured order
    pub omitted_namespaces: Vec<String>,
    pub webhook_tls: bool,
    pub service_name: String,
    pub namespace: String,
    pub webhook_configuration: String,
}

impl Config {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which returns the value of a variable if set
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = lookup(ENV_NODE_SELECTOR_VALUE)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::Missing(ENV_NODE_SELECTOR_VALUE))?;

        let node_selector = if parse_bool(&lookup, ENV_NODE_SELECTOR_RESOLVED, true)? {
            NodeSelector::Resolved(value)
        } else {
            NodeSelector::Unresolved(value)
        };

        let omitted_namespaces = parse_list(
            &lookup(ENV_OMITTED_NAMESPACES).unwrap_or_else(|| DEFAULT_OMITTED_NAMESPACES.to_string()),
        );

        Ok(Self {
            node_selector,
            omitted_namespaces,
            webhook_tls: parse_bool(&lookup, ENV_WEBHOOK_TLS, false)?,
            service_name: lookup(ENV_SERVICE_NAME).unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            namespace: lookup(ENV_NAMESPACE).unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            webhook_configuration: lookup(ENV_WEBHOOK_CONFIGURATION)
                .unwrap_or_else(|| DEFAULT_WEBHOOK_CONFIGURATION.to_string()),
        })
    }

    pub fn tls(&self) -> WebhookTlsConfig {
        WebhookTlsConfig {
            service_name: self.service_name.clone(),
            namespace: self.namespace.clone(),
            secret_name: DEFAULT_TLS_SECRET_NAME.to_string(),
            webhook_configuration: self.webhook_configuration.clone(),
        }
    }
}

fn parse_bool<F>(lookup: &F, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::InvalidBool { name, value }),
        },
    }
}

/// Split a comma-separated list, dropping blanks and keeping order
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
