//! Tests for environment configuration
//!
//! Uses `from_lookup` with a map instead of touching the process environment,
//! which would race between parallel tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use std::collections::HashMap;

fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
    let env: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::from_lookup(|name| env.get(name).cloned())
}

/// Test: Only the node selector value is required
#[test]
fn test_defaults() {
    let config = config_from(&[(ENV_NODE_SELECTOR_VALUE, "pool-a")]).unwrap();

    assert_eq!(config.node_selector, NodeSelector::Resolved("pool-a".to_string()));
    assert_eq!(config.omitted_namespaces, vec!["kube-system".to_string()]);
    assert!(!config.webhook_tls);
    assert_eq!(config.service_name, "kim-snatch-webhook");
    assert_eq!(config.namespace, "kyma-system");
    assert_eq!(
        config.webhook_configuration,
        "kim-snatch-mutating-webhook-configuration"
    );
}

/// Test: Missing or blank node selector value is an error
#[test]
fn test_missing_node_selector_value() {
    assert_eq!(
        config_from(&[]).unwrap_err(),
        ConfigError::Missing(ENV_NODE_SELECTOR_VALUE)
    );
    assert_eq!(
        config_from(&[(ENV_NODE_SELECTOR_VALUE, "  ")]).unwrap_err(),
        ConfigError::Missing(ENV_NODE_SELECTOR_VALUE)
    );
}

/// Test: Unresolved selector selects the fallback input
#[test]
fn test_unresolved_node_selector() {
    let config = config_from(&[
        (ENV_NODE_SELECTOR_VALUE, "pool-a"),
        (ENV_NODE_SELECTOR_RESOLVED, "false"),
    ])
    .unwrap();

    assert_eq!(
        config.node_selector,
        NodeSelector::Unresolved("pool-a".to_string())
    );
}

/// Test: Omitted namespaces keep order and drop blanks
#[test]
fn test_omitted_namespaces_list() {
    let config = config_from(&[
        (ENV_NODE_SELECTOR_VALUE, "pool-a"),
        (ENV_OMITTED_NAMESPACES, " kube-system, ,istio-system,kyma-system ,"),
    ])
    .unwrap();

    assert_eq!(
        config.omitted_namespaces,
        vec!["kube-system", "istio-system", "kyma-system"]
    );
}

/// Test: Empty omitted list disables omission
#[test]
fn test_empty_omitted_namespaces() {
    let config = config_from(&[
        (ENV_NODE_SELECTOR_VALUE, "pool-a"),
        (ENV_OMITTED_NAMESPACES, ""),
    ])
    .unwrap();

    assert!(config.omitted_namespaces.is_empty());
}

/// Test: Booleans accept true/false/1/0 in any case
#[test]
fn test_bool_parsing() {
    for (raw, expected) in [("true", true), ("1", true), ("TRUE", true), ("0", false), ("False", false)] {
        let config = config_from(&[
            (ENV_NODE_SELECTOR_VALUE, "pool-a"),
            (ENV_WEBHOOK_TLS, raw),
        ])
        .unwrap();
        assert_eq!(config.webhook_tls, expected, "input {}", raw);
    }
}

/// Test: Invalid booleans are rejected with the variable name
#[test]
fn test_invalid_bool() {
    let err = config_from(&[
        (ENV_NODE_SELECTOR_VALUE, "pool-a"),
        (ENV_NODE_SELECTOR_RESOLVED, "maybe"),
    ])
    .unwrap_err();

    assert_eq!(
        err.to_string(),
        "KIM_SNATCH_NODE_SELECTOR_RESOLVED must be true/false/1/0, got 'maybe'"
    );
}

/// Test: TLS settings are derived from the service settings
#[test]
fn test_tls_config() {
    let config = config_from(&[
        (ENV_NODE_SELECTOR_VALUE, "pool-a"),
        (ENV_SERVICE_NAME, "snatch"),
        (ENV_NAMESPACE, "kcp-system"),
        (ENV_WEBHOOK_CONFIGURATION, "snatch-webhook"),
    ])
    .unwrap();

    let tls = config.tls();

    assert_eq!(tls.service_name, "snatch");
    assert_eq!(tls.namespace, "kcp-system");
    assert_eq!(tls.secret_name, "kim-snatch-webhook-tls");
    assert_eq!(tls.webhook_configuration, "snatch-webhook");
}
