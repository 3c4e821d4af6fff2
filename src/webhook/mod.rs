//! CA bundle injection into admission webhook configurations
//!
//! The API server calls admission webhooks over TLS and validates the
//! serving certificate against `clientConfig.caBundle`. Webhooks that point
//! at an in-cluster Service are served with certificates signed by our CA,
//! so their bundle is ours to manage. Webhooks addressed by `url` trust
//! whatever their operator configured and are never touched.

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration, WebhookClientConfig,
};
use k8s_openapi::ByteString;

/// A webhook configuration whose service-backed entries carry our CA bundle
pub trait CaBundleConsumer {
    /// Client configs of every webhook entry, in declaration order
    fn client_configs_mut(&mut self) -> Vec<&mut WebhookClientConfig>;

    /// Client configs of every webhook entry, read-only
    fn client_configs(&self) -> Vec<&WebhookClientConfig>;

    /// Point every service-backed entry at `ca_bundle`
    ///
    /// Returns true if any entry changed, i.e. whether a write is needed.
    fn inject_ca_bundle(&mut self, ca_bundle: &[u8]) -> bool {
        let mut changed = false;
        for config in self.client_configs_mut() {
            if config.service.is_none() {
                continue;
            }
            if config.ca_bundle.as_ref().map(|b| b.0.as_slice()) != Some(ca_bundle) {
                config.ca_bundle = Some(ByteString(ca_bundle.to_vec()));
                changed = true;
            }
        }
        changed
    }

    /// Whether every service-backed entry already carries `ca_bundle`
    fn ca_bundle_in_sync(&self, ca_bundle: &[u8]) -> bool {
        self.client_configs()
            .into_iter()
            .filter(|config| config.service.is_some())
            .all(|config| config.ca_bundle.as_ref().map(|b| b.0.as_slice()) == Some(ca_bundle))
    }
}

impl CaBundleConsumer for MutatingWebhookConfiguration {
    fn client_configs_mut(&mut self) -> Vec<&mut WebhookClientConfig> {
        self.webhooks
            .iter_mut()
            .flatten()
            .map(|w| &mut w.client_config)
            .collect()
    }

    fn client_configs(&self) -> Vec<&WebhookClientConfig> {
        self.webhooks
            .iter()
            .flatten()
            .map(|w| &w.client_config)
            .collect()
    }
}

impl CaBundleConsumer for ValidatingWebhookConfiguration {
    fn client_configs_mut(&mut self) -> Vec<&mut WebhookClientConfig> {
        self.webhooks
            .iter_mut()
            .flatten()
            .map(|w| &mut w.client_config)
            .collect()
    }

    fn client_configs(&self) -> Vec<&WebhookClientConfig> {
        self.webhooks
            .iter()
            .flatten()
            .map(|w| &w.client_config)
            .collect()
    }
}
