//! Fan-out of the CA bundle to dependent webhook configurations
//!
//! Each target gets its own task and its own conflict-retry loop. Tasks
//! never observe or cancel one another; a join barrier waits for all of
//! them before the outcome is read. Any failed target fails the whole
//! propagation: a bundle that reached only the mutating or only the
//! validating webhooks must surface loudly, not as partial success.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, Instrument};

use crate::error::PropagationFailure;
use crate::retry::{retry_on_conflict, RetryConfig};
use crate::store::ObjectStore;
use crate::webhook::CaBundleConsumer;
use crate::Error;

/// Result of syncing one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The target was rewritten with the new bundle
    Updated,
    /// The target already carried the bundle; nothing was written
    Unchanged,
}

/// Outcome of one target after its retry loop finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetOutcome {
    /// Kubernetes kind of the target
    pub kind: &'static str,
    /// Name of the target
    pub name: String,
    /// What the last attempt did
    pub outcome: SyncOutcome,
}

/// A dependent object that must carry the current CA bundle
#[async_trait]
pub trait BundleTarget: Send + Sync {
    /// Kubernetes kind, for logs and errors
    fn kind(&self) -> &'static str;

    /// Object name
    fn name(&self) -> &str;

    /// One fetch, apply, commit cycle against the latest version
    async fn sync_once(&self, ca_bundle: &[u8]) -> Result<SyncOutcome, Error>;
}

/// A webhook configuration reached through an [`ObjectStore`]
pub struct WebhookTarget<K> {
    store: Arc<dyn ObjectStore<K>>,
    name: String,
}

impl<K> WebhookTarget<K>
where
    K: CaBundleConsumer + k8s_openapi::Resource + Send + Sync + 'static,
{
    /// Target the configuration called `name`
    pub fn new(store: Arc<dyn ObjectStore<K>>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    async fn fetch(&self) -> Result<K, Error> {
        self.store
            .get(&self.name)
            .await?
            .ok_or_else(|| Error::missing_resource(K::KIND, self.name.clone()))
    }

    async fn commit(&self, config: &K) -> Result<(), Error> {
        self.store.replace(config).await?;
        Ok(())
    }
}

#[async_trait]
impl<K> BundleTarget for WebhookTarget<K>
where
    K: CaBundleConsumer + k8s_openapi::Resource + Send + Sync + 'static,
{
    fn kind(&self) -> &'static str {
        K::KIND
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn sync_once(&self, ca_bundle: &[u8]) -> Result<SyncOutcome, Error> {
        let mut config = self.fetch().await?;
        if !config.inject_ca_bundle(ca_bundle) {
            return Ok(SyncOutcome::Unchanged);
        }
        self.commit(&config).await?;
        Ok(SyncOutcome::Updated)
    }
}

/// Push `ca_bundle` to every target concurrently.
///
/// One task per target, each retrying conflicts independently under the
/// shared `retry` policy. Returns every target's outcome, or
/// [`Error::Propagation`] listing every target that failed.
pub async fn propagate_ca_bundle(
    targets: &[Arc<dyn BundleTarget>],
    ca_bundle: &[u8],
    retry: &RetryConfig,
) -> Result<Vec<TargetOutcome>, Error> {
    let bundle: Arc<[u8]> = Arc::from(ca_bundle);

    let handles: Vec<_> = targets
        .iter()
        .map(|target| {
            let target = Arc::clone(target);
            let bundle = Arc::clone(&bundle);
            let retry = retry.clone();
            let operation = format!("sync_ca_bundle:{}/{}", target.kind(), target.name());
            tokio::spawn(
                async move {
                    retry_on_conflict(&retry, &operation, || target.sync_once(&bundle)).await
                }
                .in_current_span(),
            )
        })
        .collect();

    // Join barrier: every task has finished before any result is read
    let results = join_all(handles).await;

    let mut outcomes = Vec::with_capacity(targets.len());
    let mut failures = Vec::new();
    for (target, joined) in targets.iter().zip(results) {
        let result = joined.map_err(|e| Error::task(e.to_string())).and_then(|r| r);
        match result {
            Ok(outcome) => {
                match outcome {
                    SyncOutcome::Updated => {
                        info!(kind = target.kind(), name = %target.name(), "CA bundle updated")
                    }
                    SyncOutcome::Unchanged => {
                        debug!(kind = target.kind(), name = %target.name(), "CA bundle already current")
                    }
                }
                outcomes.push(TargetOutcome {
                    kind: target.kind(),
                    name: target.name().to_string(),
                    outcome,
                });
            }
            Err(error) => failures.push(PropagationFailure {
                kind: target.kind(),
                name: target.name().to_string(),
                error,
            }),
        }
    }

    if failures.is_empty() {
        Ok(outcomes)
    } else {
        Err(Error::Propagation {
            failures,
            targets: targets.len(),
        })
    }
}
