use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhook, MutatingWebhookConfiguration, RuleWithOperations, ServiceReference,
    WebhookClientConfig,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kim_snatch::server::tls::DEFAULT_WEBHOOK_CONFIGURATION;
use kim_snatch::server::webhook::MUTATE_POD_PATH;

fn main() -> anyhow::Result<()> {
    // Use: cargo run --bin gen-webhook | python3 -c "import sys,json,yaml; print(yaml.dump(json.load(sys.stdin), default_flow_style=False))"
    // to convert to YAML. caBundle is filled in by the webhook at startup.
    let service_name =
        std::env::var("KIM_SNATCH_SERVICE_NAME").unwrap_or_else(|_| "kim-snatch-webhook".to_string());
    let namespace =
        std::env::var("KIM_SNATCH_NAMESPACE").unwrap_or_else(|_| "kyma-system".to_string());

    let configuration = MutatingWebhookConfiguration {
        metadata: ObjectMeta {
            name: Some(DEFAULT_WEBHOOK_CONFIGURATION.to_string()),
            ..Default::default()
        },
        webhooks: Some(vec![MutatingWebhook {
            name: "mpod-v1.kb.io".to_string(),
            admission_review_versions: vec!["v1".to_string()],
            client_config: WebhookClientConfig {
                service: Some(ServiceReference {
                    name: service_name,
                    namespace,
                    path: Some(MUTATE_POD_PATH.to_string()),
                    port: Some(443),
                }),
                ..Default::default()
            },
            failure_policy: Some("Ignore".to_string()),
            match_policy: Some("Exact".to_string()),
            reinvocation_policy: Some("Never".to_string()),
            side_effects: "None".to_string(),
            rules: Some(vec![RuleWithOperations {
                api_groups: Some(vec!["".to_string()]),
                api_versions: Some(vec!["v1".to_string()]),
                operations: Some(vec!["CREATE".to_string()]),
                resources: Some(vec!["pods".to_string()]),
                ..Default::default()
            }]),
            ..Default::default()
        }]),
    };

    println!("{}", serde_json::to_string_pretty(&configuration)?);
    Ok(())
}
