//! TLS bootstrap for the mutating webhook
//!
//! The API server only calls webhooks over HTTPS and verifies the serving
//! certificate against the `caBundle` of the MutatingWebhookConfiguration.
//! On startup the webhook:
//! 1. Loads its certificates from a `kubernetes.io/tls` Secret, or generates and stores new ones
//! 2. Writes the CA into every webhook entry of the MutatingWebhookConfiguration
//!
//! ## Certificate Chain
//! ```text
//! Self-signed CA (kim-snatch-webhook-ca)
//!     └── Server cert (kim-snatch-webhook.kyma-system.svc)
//! ```

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Validity of the CA certificate (10 years)
pub const CA_VALIDITY_DAYS: u32 = 3650;

/// Validity of the serving certificate (1 year)
pub const SERVER_VALIDITY_DAYS: u32 = 365;

/// Organization written into both certificates
const CERT_ORGANIZATION: &str = "kim-snatch";

pub const SECRET_CA_CERT_KEY: &str = "ca.crt";
pub const SECRET_SERVER_CERT_KEY: &str = "tls.crt";
pub const SECRET_SERVER_KEY_KEY: &str = "tls.key";

/// Default Secret holding the webhook certificates
pub const DEFAULT_TLS_SECRET_NAME: &str = "kim-snatch-webhook-tls";

/// Default MutatingWebhookConfiguration that receives the CA bundle
pub const DEFAULT_WEBHOOK_CONFIGURATION: &str = "kim-snatch-mutating-webhook-configuration";

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Failed to generate certificate: {0}")]
    Generation(#[from] rcgen::Error),

    #[error("Invalid DNS name '{name}': {reason}")]
    InvalidDnsName { name: String, reason: String },

    #[error("Secret {secret} is missing key {key}")]
    MissingSecretKey { secret: String, key: &'static str },

    #[error("Failed to build TLS config: {0}")]
    Config(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Invalid PEM data")]
    InvalidPem,
}

/// PEM-encoded CA and serving certificate
#[derive(Clone)]
pub struct CertificateBundle {
    pub ca_cert_pem: String,
    pub server_cert_pem: String,
    pub server_key_pem: String,
}

/// Where the webhook lives and where its TLS material goes
#[derive(Debug, Clone)]
pub struct WebhookTlsConfig {
    /// Service fronting the webhook
    pub service_name: String,
    /// Namespace of the Service and the Secret
    pub namespace: String,
    pub secret_name: String,
    /// MutatingWebhookConfiguration whose caBundle is updated
    pub webhook_configuration: String,
}

/// DNS names under which the API server may reach the Service
pub fn service_dns_names(service_name: &str, namespace: &str) -> Vec<String> {
    vec![
        service_name.to_string(),
        format!("{}.{}", service_name, namespace),
        format!("{}.{}.svc", service_name, namespace),
        format!("{}.{}.svc.cluster.local", service_name, namespace),
    ]
}

fn validity(params: &mut CertificateParams, days: u32) {
    let now = time::OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + time::Duration::days(days as i64);
}

fn generate_ca() -> Result<(Certificate, KeyPair), TlsError> {
    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, "kim-snatch-webhook-ca");
    params
        .distinguished_name
        .push(DnType::OrganizationName, CERT_ORGANIZATION);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
    validity(&mut params, CA_VALIDITY_DAYS);

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;
    Ok((cert, key_pair))
}

fn generate_server_cert(
    ca_cert: &Certificate,
    ca_key: &KeyPair,
    service_name: &str,
    namespace: &str,
) -> Result<(String, String), TlsError> {
    let mut params = CertificateParams::default();
    params
        .distinguished_name
        .push(DnType::CommonName, service_name);
    params
        .distinguished_name
        .push(DnType::OrganizationName, CERT_ORGANIZATION);

    params.subject_alt_names = service_dns_names(service_name, namespace)
        .into_iter()
        .map(|name| {
            let dns = rcgen::Ia5String::try_from(name.as_str()).map_err(|e| {
                TlsError::InvalidDnsName {
                    name,
                    reason: e.to_string(),
                }
            })?;
            Ok(SanType::DnsName(dns))
        })
        .collect::<Result<Vec<_>, TlsError>>()?;

    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    validity(&mut params, SERVER_VALIDITY_DAYS);

    let key_pair = KeyPair::generate()?;
    let cert = params.signed_by(&key_pair, ca_cert, ca_key)?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}

/// Generate a CA and a serving certificate for `service_name.namespace`
pub fn generate_certificate_bundle(
    service_name: &str,
    namespace: &str,
) -> Result<CertificateBundle, TlsError> {
    let (ca_cert, ca_key) = generate_ca()?;
    let (server_cert_pem, server_key_pem) =
        generate_server_cert(&ca_cert, &ca_key, service_name, namespace)?;

    Ok(CertificateBundle {
        ca_cert_pem: ca_cert.pem(),
        server_cert_pem,
        server_key_pem,
    })
}

impl CertificateBundle {
    /// Read a bundle from Secret data
    pub fn from_secret(secret: &Secret) -> Result<Self, TlsError> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let empty = BTreeMap::new();
        let data = secret.data.as_ref().unwrap_or(&empty);

        let read = |key: &'static str| {
            data.get(key)
                .map(|b| String::from_utf8_lossy(&b.0).into_owned())
                .ok_or_else(|| TlsError::MissingSecretKey {
                    secret: name.clone(),
                    key,
                })
        };

        Ok(Self {
            ca_cert_pem: read(SECRET_CA_CERT_KEY)?,
            server_cert_pem: read(SECRET_SERVER_CERT_KEY)?,
            server_key_pem: read(SECRET_SERVER_KEY_KEY)?,
        })
    }

    /// Build the `kubernetes.io/tls` Secret holding this bundle
    pub fn to_secret(&self, name: &str, namespace: &str) -> Secret {
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

        let data = BTreeMap::from([
            (
                SECRET_CA_CERT_KEY.to_string(),
                ByteString(self.ca_cert_pem.as_bytes().to_vec()),
            ),
            (
                SECRET_SERVER_CERT_KEY.to_string(),
                ByteString(self.server_cert_pem.as_bytes().to_vec()),
            ),
            (
                SECRET_SERVER_KEY_KEY.to_string(),
                ByteString(self.server_key_pem.as_bytes().to_vec()),
            ),
        ]);

        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    "app.kubernetes.io/managed-by".to_string(),
                    CERT_ORGANIZATION.to_string(),
                )])),
                ..Default::default()
            },
            type_: Some("kubernetes.io/tls".to_string()),
            data: Some(data),
            ..Default::default()
        }
    }
}

/// Load the bundle from its Secret, `None` if the Secret does not exist
pub async fn load_from_secret(
    client: &kube::Client,
    namespace: &str,
    secret_name: &str,
) -> Result<Option<CertificateBundle>, TlsError> {
    let secrets: kube::Api<Secret> = kube::Api::namespaced(client.clone(), namespace);

    match secrets.get_opt(secret_name).await? {
        Some(secret) => Ok(Some(CertificateBundle::from_secret(&secret)?)),
        None => Ok(None),
    }
}

/// Create the Secret, or merge-patch it when it already exists
pub async fn save_to_secret(
    client: &kube::Client,
    namespace: &str,
    secret_name: &str,
    bundle: &CertificateBundle,
) -> Result<(), TlsError> {
    use kube::api::{Patch, PatchParams, PostParams};

    let secrets: kube::Api<Secret> = kube::Api::namespaced(client.clone(), namespace);
    let secret = bundle.to_secret(secret_name, namespace);

    match secrets.create(&PostParams::default(), &secret).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 409 => {
            secrets
                .patch(secret_name, &PatchParams::default(), &Patch::Merge(&secret))
                .await?;
            Ok(())
        }
        Err(e) => Err(TlsError::Kube(e)),
    }
}

/// Write the CA into `caBundle` of every webhook in the configuration
pub async fn patch_webhook_ca_bundle(
    client: &kube::Client,
    configuration_name: &str,
    ca_cert_pem: &str,
) -> Result<(), TlsError> {
    use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
    use kube::api::PostParams;

    let configurations: kube::Api<MutatingWebhookConfiguration> =
        kube::Api::all(client.clone());

    let mut configuration = configurations.get(configuration_name).await?;
    for webhook in configuration.webhooks.iter_mut().flatten() {
        webhook.client_config.ca_bundle = Some(ByteString(ca_cert_pem.as_bytes().to_vec()));
    }

    configurations
        .replace(configuration_name, &PostParams::default(), &configuration)
        .await?;

    Ok(())
}

/// Load or create the webhook certificates and publish the CA bundle
///
/// A missing MutatingWebhookConfiguration is not fatal: it may be applied
/// after the webhook starts, and the next restart will patch it.
pub async fn initialize_tls(
    client: &kube::Client,
    config: &WebhookTlsConfig,
) -> Result<CertificateBundle, TlsError> {
    let bundle = match load_from_secret(client, &config.namespace, &config.secret_name).await? {
        Some(bundle) => {
            info!(
                secret = %config.secret_name,
                "Loaded existing TLS certificates from Secret"
            );
            bundle
        }
        None => {
            info!("No existing TLS certificates found, generating new ones");
            let bundle = generate_certificate_bundle(&config.service_name, &config.namespace)?;
            save_to_secret(client, &config.namespace, &config.secret_name, &bundle).await?;
            info!(secret = %config.secret_name, "Saved new TLS certificates to Secret");
            bundle
        }
    };

    match patch_webhook_ca_bundle(client, &config.webhook_configuration, &bundle.ca_cert_pem).await
    {
        Ok(()) => info!(
            configuration = %config.webhook_configuration,
            "Published CA bundle to MutatingWebhookConfiguration"
        ),
        Err(e) => warn!(
            configuration = %config.webhook_configuration,
            error = %e,
            "Failed to publish CA bundle (configuration may not exist yet)"
        ),
    }

    Ok(bundle)
}

/// Build a rustls ServerConfig from the certificate bundle
pub fn build_rustls_config(
    bundle: &CertificateBundle,
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    use rustls::pki_types::CertificateDer;
    use rustls_pemfile::{certs, private_key};
    use std::io::BufReader;

    let cert_chain: Vec<CertificateDer<'static>> =
        certs(&mut BufReader::new(bundle.server_cert_pem.as_bytes()))
            .filter_map(|r| r.ok())
            .collect();
    if cert_chain.is_empty() {
        return Err(TlsError::InvalidPem);
    }

    let key = private_key(&mut BufReader::new(bundle.server_key_pem.as_bytes()))
        .map_err(|e| TlsError::Config(format!("Failed to parse private key: {}", e)))?
        .ok_or(TlsError::InvalidPem)?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| TlsError::Config(e.to_string()))?
    .with_no_client_auth()
    .with_single_cert(cert_chain, key)
    .map_err(|e| TlsError::Config(e.to_string()))?;

    Ok(Arc::new(config))
}
