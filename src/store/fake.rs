//! In-memory [`ObjectStore`] for tests
//!
//! Emulates the API server's optimistic concurrency: every write bumps the
//! resourceVersion and a replace carrying a stale version fails with 409.
//! Failures can be injected to drive retry and error paths.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};

use super::ObjectStore;
use crate::error::api_error;
use crate::Error;

struct State<K> {
    objects: BTreeMap<String, K>,
    next_version: u64,
    pending_conflicts: u32,
    get_failure: Option<u16>,
    write_failure: Option<u16>,
    writes: u32,
    gets: u32,
}

pub(crate) struct FakeStore<K> {
    state: Mutex<State<K>>,
}

impl<K> FakeStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                next_version: 1,
                pending_conflicts: 0,
                get_failure: None,
                write_failure: None,
                writes: 0,
                gets: 0,
            }),
        }
    }

    /// Seed an object without counting it as a write
    pub(crate) fn insert(&self, mut obj: K) {
        let mut state = self.state.lock().unwrap();
        obj.meta_mut().resource_version = Some(state.next_version.to_string());
        state.next_version += 1;
        state.objects.insert(obj.name_any(), obj);
    }

    pub(crate) fn object(&self, name: &str) -> Option<K> {
        self.state.lock().unwrap().objects.get(name).cloned()
    }

    /// Number of successful creates and replaces
    pub(crate) fn writes(&self) -> u32 {
        self.state.lock().unwrap().writes
    }

    pub(crate) fn gets(&self) -> u32 {
        self.state.lock().unwrap().gets
    }

    /// Reject the next `n` writes with 409, as if another writer got there first
    pub(crate) fn conflict_on_next_writes(&self, n: u32) {
        self.state.lock().unwrap().pending_conflicts = n;
    }

    /// Fail every read with the given HTTP status
    pub(crate) fn fail_gets_with(&self, code: u16) {
        self.state.lock().unwrap().get_failure = Some(code);
    }

    /// Fail every write with the given HTTP status
    pub(crate) fn fail_writes_with(&self, code: u16) {
        self.state.lock().unwrap().write_failure = Some(code);
    }

    fn check_write(state: &mut State<K>) -> Result<(), Error> {
        if let Some(code) = state.write_failure {
            return Err(api_error(code, "Injected"));
        }
        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Err(api_error(409, "Conflict"));
        }
        Ok(())
    }
}

#[async_trait]
impl<K> ObjectStore<K> for FakeStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn get(&self, name: &str) -> Result<Option<K>, Error> {
        let mut state = self.state.lock().unwrap();
        state.gets += 1;
        if let Some(code) = state.get_failure {
            return Err(api_error(code, "Injected"));
        }
        Ok(state.objects.get(name).cloned())
    }

    async fn create(&self, obj: &K) -> Result<K, Error> {
        let mut state = self.state.lock().unwrap();
        Self::check_write(&mut state)?;

        let name = obj.name_any();
        if state.objects.contains_key(&name) {
            return Err(api_error(409, "AlreadyExists"));
        }

        let mut created = obj.clone();
        created.meta_mut().resource_version = Some(state.next_version.to_string());
        state.next_version += 1;
        state.writes += 1;
        state.objects.insert(name, created.clone());
        Ok(created)
    }

    async fn replace(&self, obj: &K) -> Result<K, Error> {
        let mut state = self.state.lock().unwrap();
        Self::check_write(&mut state)?;

        let name = obj.name_any();
        let Some(current) = state.objects.get(&name) else {
            return Err(api_error(404, "NotFound"));
        };
        if obj.meta().resource_version != current.meta().resource_version {
            return Err(api_error(409, "Conflict"));
        }

        let mut replaced = obj.clone();
        replaced.meta_mut().resource_version = Some(state.next_version.to_string());
        state.next_version += 1;
        state.writes += 1;
        state.objects.insert(name, replaced.clone());
        Ok(replaced)
    }
}
