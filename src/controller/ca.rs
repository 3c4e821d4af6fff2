//! CA Secret reconciliation
//!
//! One pass evaluates the stored CA, regenerates it when it is missing or
//! expired, pushes its bundle to every webhook configuration, persists it
//! and, on rotation, invalidates the leaf serving certificate.
//!
//! Ordering is propagate-then-persist: if any webhook configuration fails
//! to take the bundle, the CA Secret is not written and the whole pass is
//! retried by the controller's error policy.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use time::OffsetDateTime;
use tracing::{debug, error, info, instrument, warn};

use super::cascade::{invalidate_leaf_secret, LeafInvalidation};
use super::propagate::{
    propagate_ca_bundle, BundleTarget, SyncOutcome, TargetOutcome, WebhookTarget,
};
use crate::config::ControllerConfig;
use crate::pki::{CaGenerator, CertificateAuthority, Clock, RcgenCaGenerator, SystemClock};
use crate::retry::{retry_on_conflict, retry_with_backoff, RetryConfig};
use crate::store::{create_or_update, KubeStore, ObjectStore, OperationResult};
use crate::Error;

/// Why a new CA is being generated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerateReason {
    /// No usable CA in the Secret (absent Secret or empty keys)
    Missing,
    /// The stored CA is at or past its notAfter
    Expired,
}

/// Decision taken on the loaded CA
#[derive(Debug, Clone, PartialEq)]
pub enum CaState {
    /// The stored CA stays in service for `remaining`
    UseExisting {
        /// The stored CA
        ca: CertificateAuthority,
        /// Time left until notAfter
        remaining: Duration,
    },
    /// A fresh CA must be generated
    Regenerate {
        /// What triggered regeneration
        reason: RegenerateReason,
    },
}

/// Decide whether the loaded CA can be kept at `now`
pub fn evaluate(loaded: Option<CertificateAuthority>, now: OffsetDateTime) -> CaState {
    let Some(ca) = loaded else {
        return CaState::Regenerate {
            reason: RegenerateReason::Missing,
        };
    };
    match ca.expires_in(now) {
        Ok(remaining) => CaState::UseExisting { ca, remaining },
        Err(_) => CaState::Regenerate {
            reason: RegenerateReason::Expired,
        },
    }
}

/// Read the CA out of its Secret
///
/// An absent Secret and a Secret without CA keys both yield `None`. Read
/// failures and undecodable material are returned unchanged.
pub async fn load_ca(
    store: &dyn ObjectStore<Secret>,
    name: &str,
) -> Result<Option<CertificateAuthority>, Error> {
    let Some(secret) = store.get(name).await? else {
        return Ok(None);
    };
    Ok(CertificateAuthority::from_secret_data(secret.data.as_ref())?)
}

/// Write the CA into its Secret, retrying version conflicts
pub async fn persist_ca(
    store: &dyn ObjectStore<Secret>,
    name: &str,
    namespace: &str,
    ca: &CertificateAuthority,
    retry: &RetryConfig,
) -> Result<OperationResult, Error> {
    let data = &ca.to_secret_data();
    retry_on_conflict(retry, "persist_ca_secret", move || {
        create_or_update(store, name, Some(namespace), move |secret: &mut Secret| {
            secret.data = Some(data.clone());
            secret.string_data = None;
        })
    })
    .await
}

/// Create an empty CA Secret if none exists
///
/// The controller only watches the CA Secret, so on a fresh cluster there
/// is nothing to trigger the first reconcile. An empty Secret is enough:
/// the first pass fills it. Losing a create race to another replica is
/// fine. Returns whether this call created it.
pub async fn ensure_ca_secret(
    store: &dyn ObjectStore<Secret>,
    name: &str,
    namespace: &str,
    retry: &RetryConfig,
) -> Result<bool, Error> {
    let secret = &Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    let created = retry_with_backoff(retry, "ensure_ca_secret", move || async move {
        match store.get(name).await {
            Ok(Some(_)) => return Ok(false),
            Ok(None) => {}
            Err(e) => return Err(e),
        }
        match store.create(secret).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_conflict() => Ok(false),
            Err(e) => Err(e),
        }
    })
    .await?;

    if created {
        info!(secret = %name, namespace = %namespace, "created empty CA secret");
    } else {
        debug!(secret = %name, "CA secret already exists");
    }
    Ok(created)
}

/// What one reconcile pass did
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    /// Time until the CA in service expires
    pub requeue_after: Duration,
    /// Result of writing the CA Secret
    pub persistence: OperationResult,
    /// Set when a new CA was generated
    pub regenerated: Option<RegenerateReason>,
    /// Set when the CA rotated and the leaf secret was visited
    pub leaf: Option<LeafInvalidation>,
    /// Per-target result of pushing the bundle
    pub propagated: Vec<TargetOutcome>,
}

impl ReconcileOutcome {
    /// Number of webhook configurations rewritten this pass
    pub fn targets_updated(&self) -> usize {
        self.propagated
            .iter()
            .filter(|t| t.outcome == SyncOutcome::Updated)
            .count()
    }
}

/// Controller context shared across reconciles
pub struct Context {
    /// Secrets in the controller namespace (CA and leaf)
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    /// Webhook configurations that receive the CA bundle
    pub bundle_targets: Vec<Arc<dyn BundleTarget>>,
    /// CA generator
    pub generator: Arc<dyn CaGenerator>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Namespace of the CA and leaf secrets
    pub namespace: String,
    /// Name of the CA Secret
    pub ca_secret_name: String,
    /// Name of the leaf TLS Secret
    pub tls_secret_name: String,
    /// Conflict retry policy for every write
    pub retry: RetryConfig,
    /// Ceiling on the requeue interval
    pub max_requeue: Duration,
}

impl Context {
    /// Build a context talking to the API server through `client`
    pub fn from_client(client: Client, config: &ControllerConfig) -> Self {
        let mutating: Arc<dyn ObjectStore<MutatingWebhookConfiguration>> =
            Arc::new(KubeStore::cluster(client.clone()));
        let validating: Arc<dyn ObjectStore<ValidatingWebhookConfiguration>> =
            Arc::new(KubeStore::cluster(client.clone()));
        let bundle_targets: Vec<Arc<dyn BundleTarget>> = vec![
            Arc::new(WebhookTarget::new(
                mutating,
                config.mutating_webhook_configuration.clone(),
            )),
            Arc::new(WebhookTarget::new(
                validating,
                config.validating_webhook_configuration.clone(),
            )),
        ];

        Self {
            secrets: Arc::new(KubeStore::namespaced(client, &config.namespace)),
            bundle_targets,
            generator: Arc::new(RcgenCaGenerator::new(
                config.ca_common_name.clone(),
                config.ca_organization.clone(),
                config.ca_validity(),
            )),
            clock: Arc::new(SystemClock),
            namespace: config.namespace.clone(),
            ca_secret_name: config.ca_secret_name.clone(),
            tls_secret_name: config.tls_secret_name.clone(),
            retry: config.retry_config(),
            max_requeue: config.max_requeue(),
        }
    }
}

/// Run one reconcile pass over the CA Secret
pub async fn reconcile_ca(ctx: &Context) -> Result<ReconcileOutcome, Error> {
    let now = ctx.clock.now();
    let loaded = load_ca(ctx.secrets.as_ref(), &ctx.ca_secret_name).await?;

    let (ca, regenerated, requeue_after) = match evaluate(loaded, now) {
        CaState::UseExisting { ca, remaining } => {
            debug!(
                not_after = %ca.not_after(),
                remaining_secs = remaining.as_secs(),
                "stored CA is valid"
            );
            (ca, None, remaining)
        }
        CaState::Regenerate { reason } => {
            info!(?reason, "generating new CA");
            let ca = ctx.generator.generate(now)?;
            // notBefore is truncated to whole seconds, so measure from it
            let validity = ca.expires_in(ca.not_before())?;
            (ca, Some(reason), validity)
        }
    };

    let propagated = propagate_ca_bundle(&ctx.bundle_targets, ca.ca_bundle(), &ctx.retry).await?;
    for target in &propagated {
        debug!(
            kind = target.kind,
            name = %target.name,
            outcome = ?target.outcome,
            "CA bundle target"
        );
    }

    let persistence = persist_ca(
        ctx.secrets.as_ref(),
        &ctx.ca_secret_name,
        &ctx.namespace,
        &ca,
        &ctx.retry,
    )
    .await?;

    // Only a rewrite of an existing Secret is a rotation; Created is bootstrap
    let leaf = match persistence {
        OperationResult::Updated => Some(
            invalidate_leaf_secret(ctx.secrets.as_ref(), &ctx.tls_secret_name, &ctx.retry)
                .await?,
        ),
        OperationResult::Created | OperationResult::Unchanged => None,
    };

    Ok(ReconcileOutcome {
        requeue_after,
        persistence,
        regenerated,
        leaf,
        propagated,
    })
}

/// Result of the startup CA issuance
#[derive(Debug, Clone, PartialEq)]
pub enum Bootstrap {
    /// The CA Secret already existed; the controller takes it from here
    AlreadyPresent,
    /// A CA was generated, distributed and its Secret created
    Issued(ReconcileOutcome),
    /// Issuance failed; an empty Secret was left for the controller to fill
    Deferred,
}

/// Issue the first CA before the controller starts watching
///
/// The controller only watches the CA Secret, so on a fresh cluster there
/// is no event to start from. Running a full pass here creates the Secret
/// with real material. If that pass fails, an empty Secret is created
/// instead so the controller's retry loop picks the work up.
pub async fn bootstrap_ca(ctx: &Context, retry: &RetryConfig) -> Result<Bootstrap, Error> {
    let store = ctx.secrets.as_ref();
    let name = ctx.ca_secret_name.as_str();

    let present = retry_with_backoff(retry, "read_ca_secret", move || async move {
        match store.get(name).await {
            Ok(secret) => Ok(secret.is_some()),
            Err(e) => Err(e),
        }
    })
    .await?;
    if present {
        debug!(secret = %name, "CA secret already exists");
        return Ok(Bootstrap::AlreadyPresent);
    }

    match reconcile_ca(ctx).await {
        Ok(outcome) => {
            info!(
                secret = %name,
                persistence = ?outcome.persistence,
                targets_updated = outcome.targets_updated(),
                "issued initial CA"
            );
            Ok(Bootstrap::Issued(outcome))
        }
        Err(error) => {
            warn!(
                ?error,
                secret = %name,
                "initial CA issuance failed, deferring to the controller"
            );
            ensure_ca_secret(store, name, &ctx.namespace, retry).await?;
            Ok(Bootstrap::Deferred)
        }
    }
}

/// Reconcile the CA Secret
///
/// Always requeues: the CA has no terminal state, only an expiry to wake
/// up for. The interval is capped at `max_requeue`.
#[instrument(
    skip(secret, ctx),
    fields(secret = %secret.name_any(), namespace = %ctx.namespace)
)]
pub async fn reconcile(secret: Arc<Secret>, ctx: Arc<Context>) -> Result<Action, Error> {
    if secret.name_any() != ctx.ca_secret_name {
        debug!("not the CA secret, ignoring");
        return Ok(Action::await_change());
    }

    let outcome = reconcile_ca(&ctx).await?;
    let requeue = outcome.requeue_after.min(ctx.max_requeue);

    info!(
        persistence = ?outcome.persistence,
        regenerated = ?outcome.regenerated,
        leaf = ?outcome.leaf,
        targets_updated = outcome.targets_updated(),
        expires_in_secs = outcome.requeue_after.as_secs(),
        requeue_secs = requeue.as_secs(),
        "CA reconciled"
    );
    Ok(Action::requeue(requeue))
}

/// Error policy for the CA controller
///
/// Every failure is retried: the reconcile is idempotent and has no
/// terminal error.
pub fn error_policy(secret: Arc<Secret>, error: &Error, _ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        secret = %secret.name_any(),
        "CA reconciliation failed"
    );
    Action::requeue(Duration::from_secs(5))
}
