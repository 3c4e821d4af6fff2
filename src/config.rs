//! Controller configuration
//!
//! Every resource name is supplied from outside; the controller never
//! derives one. Flags fall back to environment variables so the same
//! binary can be configured from a Deployment manifest.

use std::time::Duration;

use clap::Args;

use crate::pki::MAX_CA_VALIDITY;
use crate::retry::RetryConfig;
use crate::Error;

/// Default namespace holding the CA and leaf secrets
pub const DEFAULT_NAMESPACE: &str = "webhook-system";

/// Default name of the CA secret
pub const DEFAULT_CA_SECRET_NAME: &str = "webhook-ca";

/// Default name of the leaf TLS secret invalidated on rotation
pub const DEFAULT_TLS_SECRET_NAME: &str = "webhook-tls";

/// Default MutatingWebhookConfiguration name
pub const DEFAULT_MUTATING_WEBHOOK_CONFIGURATION: &str =
    "webhook-ca-mutating-webhook-configuration";

/// Default ValidatingWebhookConfiguration name
pub const DEFAULT_VALIDATING_WEBHOOK_CONFIGURATION: &str =
    "webhook-ca-validating-webhook-configuration";

/// Settings for the CA controller
#[derive(Args, Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Namespace of the CA and leaf TLS secrets
    #[arg(long, env = "WEBHOOK_CA_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Secret holding the CA certificate and key
    #[arg(long, env = "WEBHOOK_CA_SECRET_NAME", default_value = DEFAULT_CA_SECRET_NAME)]
    pub ca_secret_name: String,

    /// Secret holding the webhook serving certificate, emptied whenever the CA rotates
    #[arg(long, env = "WEBHOOK_CA_TLS_SECRET_NAME", default_value = DEFAULT_TLS_SECRET_NAME)]
    pub tls_secret_name: String,

    /// MutatingWebhookConfiguration that receives the CA bundle
    #[arg(
        long,
        env = "WEBHOOK_CA_MUTATING_WEBHOOK_CONFIGURATION",
        default_value = DEFAULT_MUTATING_WEBHOOK_CONFIGURATION
    )]
    pub mutating_webhook_configuration: String,

    /// ValidatingWebhookConfiguration that receives the CA bundle
    #[arg(
        long,
        env = "WEBHOOK_CA_VALIDATING_WEBHOOK_CONFIGURATION",
        default_value = DEFAULT_VALIDATING_WEBHOOK_CONFIGURATION
    )]
    pub validating_webhook_configuration: String,

    /// Common name of generated CAs
    #[arg(long, env = "WEBHOOK_CA_COMMON_NAME", default_value = "webhook-ca")]
    pub ca_common_name: String,

    /// Organization of generated CAs
    #[arg(long, env = "WEBHOOK_CA_ORGANIZATION", default_value = "webhook-ca")]
    pub ca_organization: String,

    /// Validity of generated CAs in days
    #[arg(long, env = "WEBHOOK_CA_VALIDITY_DAYS", default_value_t = 365)]
    pub ca_validity_days: u32,

    /// Attempts per write before a version conflict is reported
    #[arg(long, env = "WEBHOOK_CA_CONFLICT_RETRY_ATTEMPTS", default_value_t = 4)]
    pub conflict_retry_attempts: u32,

    /// Upper bound on the requeue interval in seconds
    #[arg(long, env = "WEBHOOK_CA_MAX_REQUEUE_SECS", default_value_t = 86400)]
    pub max_requeue_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ca_secret_name: DEFAULT_CA_SECRET_NAME.to_string(),
            tls_secret_name: DEFAULT_TLS_SECRET_NAME.to_string(),
            mutating_webhook_configuration: DEFAULT_MUTATING_WEBHOOK_CONFIGURATION.to_string(),
            validating_webhook_configuration: DEFAULT_VALIDATING_WEBHOOK_CONFIGURATION
                .to_string(),
            ca_common_name: "webhook-ca".to_string(),
            ca_organization: "webhook-ca".to_string(),
            ca_validity_days: 365,
            conflict_retry_attempts: 4,
            max_requeue_secs: 86400,
        }
    }
}

impl ControllerConfig {
    /// Reject configurations the controller cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        let names = [
            ("--namespace", &self.namespace),
            ("--ca-secret-name", &self.ca_secret_name),
            ("--tls-secret-name", &self.tls_secret_name),
            (
                "--mutating-webhook-configuration",
                &self.mutating_webhook_configuration,
            ),
            (
                "--validating-webhook-configuration",
                &self.validating_webhook_configuration,
            ),
            ("--ca-common-name", &self.ca_common_name),
        ];
        for (flag, value) in names {
            if value.trim().is_empty() {
                return Err(Error::validation(format!("{} must not be empty", flag)));
            }
        }

        if self.ca_secret_name == self.tls_secret_name {
            return Err(Error::validation(
                "--ca-secret-name and --tls-secret-name must differ",
            ));
        }
        if self.ca_validity_days == 0 {
            return Err(Error::validation("--ca-validity-days must be at least 1"));
        }
        if self.ca_validity() > MAX_CA_VALIDITY {
            return Err(Error::validation(format!(
                "--ca-validity-days must be at most {}",
                MAX_CA_VALIDITY.as_secs() / (24 * 60 * 60)
            )));
        }
        if self.conflict_retry_attempts == 0 {
            return Err(Error::validation(
                "--conflict-retry-attempts must be at least 1",
            ));
        }
        if self.max_requeue_secs == 0 {
            return Err(Error::validation("--max-requeue-secs must be at least 1"));
        }
        Ok(())
    }

    /// Validity period of generated CAs
    pub fn ca_validity(&self) -> Duration {
        Duration::from_secs(u64::from(self.ca_validity_days) * 24 * 60 * 60)
    }

    /// Conflict retry policy shared by every write
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.conflict_retry_attempts,
            ..RetryConfig::on_conflict()
        }
    }

    /// Ceiling on how long the controller sleeps between checks
    pub fn max_requeue(&self) -> Duration {
        Duration::from_secs(self.max_requeue_secs)
    }
}
