//! Invalidation of leaf TLS material after a CA rotation
//!
//! The webhook serving certificate is signed by the CA. Once the CA is
//! replaced that certificate no longer chains to the bundle the API server
//! trusts, so its Secret is emptied and the issuing process regenerates it.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use tracing::{debug, info};

use crate::retry::{retry_on_conflict, RetryConfig};
use crate::store::ObjectStore;
use crate::Error;

/// What happened to the leaf secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafInvalidation {
    /// Data was wiped
    Cleared,
    /// Secret existed but held no data
    AlreadyEmpty,
    /// Secret does not exist; nothing to invalidate
    Absent,
}

/// Empty the leaf secret's data, retrying version conflicts.
///
/// A missing secret is a no-op: there is no stale material to remove and
/// the issuing process will create it signed by the new CA. Every other
/// failure, including an exhausted conflict budget, is returned as
/// [`Error::Cascade`].
pub async fn invalidate_leaf_secret(
    store: &dyn ObjectStore<Secret>,
    name: &str,
    retry: &RetryConfig,
) -> Result<LeafInvalidation, Error> {
    retry_on_conflict(retry, "invalidate_leaf_secret", || async move {
        let Some(mut secret) = store.get(name).await? else {
            return Ok(LeafInvalidation::Absent);
        };

        let has_data = secret.data.as_ref().is_some_and(|d| !d.is_empty())
            || secret.string_data.as_ref().is_some_and(|d| !d.is_empty());
        if !has_data {
            return Ok(LeafInvalidation::AlreadyEmpty);
        }

        secret.data = Some(BTreeMap::new());
        secret.string_data = None;
        store.replace(&secret).await?;
        Ok(LeafInvalidation::Cleared)
    })
    .await
    .map(|outcome| {
        match outcome {
            LeafInvalidation::Cleared => info!(secret = %name, "leaf secret invalidated"),
            LeafInvalidation::AlreadyEmpty => debug!(secret = %name, "leaf secret already empty"),
            LeafInvalidation::Absent => info!(secret = %name, "leaf secret absent, nothing to invalidate"),
        }
        outcome
    })
    .map_err(|e| Error::Cascade {
        secret: name.to_string(),
        source: Box::new(e),
    })
}
