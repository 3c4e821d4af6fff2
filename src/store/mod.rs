//! Versioned object store used by the controller
//!
//! All writes are optimistic: [`ObjectStore::replace`] sends the
//! resourceVersion that was read, and the API server rejects it with a 409
//! if someone else wrote in between. Callers wrap read-modify-write cycles
//! in [`crate::retry::retry_on_conflict`].

#[cfg(test)]
pub(crate) mod fake;

use std::fmt::Debug;

use async_trait::async_trait;
use kube::api::{Api, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::Error;

/// Field manager recorded on every write
pub const FIELD_MANAGER: &str = "webhook-ca-controller";

/// Get / create / replace for one resource kind
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// Fetch an object by name, `None` if it does not exist
    async fn get(&self, name: &str) -> Result<Option<K>, Error>;

    /// Create a new object (409 if it already exists)
    async fn create(&self, obj: &K) -> Result<K, Error>;

    /// Replace an existing object, guarded by its resourceVersion
    async fn replace(&self, obj: &K) -> Result<K, Error>;
}

/// [`ObjectStore`] backed by the Kubernetes API
pub struct KubeStore<K> {
    api: Api<K>,
}

impl<K> KubeStore<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    <K as Resource>::DynamicType: Default,
{
    /// Store for a namespaced kind
    pub fn namespaced(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

impl<K> KubeStore<K>
where
    K: Resource,
    <K as Resource>::DynamicType: Default,
{
    /// Store for a cluster-scoped kind
    pub fn cluster(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
    <K as Resource>::DynamicType: Default,
{
    async fn get(&self, name: &str) -> Result<Option<K>, Error> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn create(&self, obj: &K) -> Result<K, Error> {
        Ok(self.api.create(&post_params(), obj).await?)
    }

    async fn replace(&self, obj: &K) -> Result<K, Error> {
        let name = obj
            .meta()
            .name
            .as_deref()
            .ok_or_else(|| Error::validation("cannot replace an object without a name"))?;
        Ok(self.api.replace(name, &post_params(), obj).await?)
    }
}

/// What a create-or-update did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    /// Object did not exist and was created
    Created,
    /// Object existed and the mutation changed it
    Updated,
    /// Object existed and already matched; nothing was written
    Unchanged,
}

/// Create the object if absent, otherwise apply `mutate` and write only on change.
///
/// A single attempt: a concurrent writer surfaces as a 409, so callers run
/// this inside [`crate::retry::retry_on_conflict`].
pub async fn create_or_update<K, F>(
    store: &dyn ObjectStore<K>,
    name: &str,
    namespace: Option<&str>,
    mutate: F,
) -> Result<OperationResult, Error>
where
    K: Resource + Clone + Default + PartialEq + Send + Sync + 'static,
    F: Fn(&mut K),
{
    match store.get(name).await? {
        None => {
            let mut obj = K::default();
            obj.meta_mut().name = Some(name.to_string());
            obj.meta_mut().namespace = namespace.map(str::to_string);
            mutate(&mut obj);
            store.create(&obj).await?;
            info!(name = %name, "created");
            Ok(OperationResult::Created)
        }
        Some(existing) => {
            let mut desired = existing.clone();
            mutate(&mut desired);
            if desired == existing {
                debug!(name = %existing.name_any(), "already up to date");
                return Ok(OperationResult::Unchanged);
            }
            store.replace(&desired).await?;
            info!(name = %name, "updated");
            Ok(OperationResult::Updated)
        }
    }
}
