//! Object state sources and the watch event feed.
//!
//! Reads go through two traits so the sync path can be exercised without a
//! cluster: [`ObjectLookup`] asks the API server whether an object still
//! exists, [`ObjectCache`] serves the reflector's eventually consistent copy.

use std::collections::{HashMap, HashSet};
use std::pin::pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::key::ObjectKey;
use crate::policy::WorkloadObject;
use crate::queue::WorkQueue;

/// Authoritative existence check.
#[async_trait]
pub trait ObjectLookup: Send + Sync {
    async fn exists(&self, key: &ObjectKey) -> Result<bool, kube::Error>;
}

/// Local, possibly stale, copy of watched objects.
#[async_trait]
pub trait ObjectCache: Send + Sync {
    /// Snapshot of the object, if the cache holds it.
    fn get(&self, key: &ObjectKey) -> Option<WorkloadObject>;

    /// Resolves once the initial list has been loaded.
    async fn wait_until_synced(&self) -> Result<()>;
}

/// [`ObjectLookup`] backed by `GET` on the Deployments API.
#[derive(Clone)]
pub struct ApiLookup {
    client: Client,
}

impl ApiLookup {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectLookup for ApiLookup {
    async fn exists(&self, key: &ObjectKey) -> Result<bool, kube::Error> {
        let api: Api<Deployment> = if key.is_namespaced() {
            Api::namespaced(self.client.clone(), &key.namespace)
        } else {
            Api::all(self.client.clone())
        };
        Ok(api.get_opt(&key.name).await?.is_some())
    }
}

/// [`ObjectCache`] backed by a reflector store.
#[derive(Clone)]
pub struct StoreCache {
    store: Store<Deployment>,
}

impl StoreCache {
    #[must_use]
    pub fn new(store: Store<Deployment>) -> Self {
        Self { store }
    }

    /// Empty cache plus the writer that [`run_watcher`] fills it through.
    #[must_use]
    pub fn pair() -> (Self, reflector::store::Writer<Deployment>) {
        let (store, writer) = reflector::store();
        (Self::new(store), writer)
    }
}

#[async_trait]
impl ObjectCache for StoreCache {
    fn get(&self, key: &ObjectKey) -> Option<WorkloadObject> {
        let mut obj_ref = ObjectRef::<Deployment>::new(&key.name);
        if key.is_namespaced() {
            obj_ref = obj_ref.within(&key.namespace);
        }
        self.store
            .get(&obj_ref)
            .map(|deployment| WorkloadObject::from_deployment(&deployment))
    }

    async fn wait_until_synced(&self) -> Result<()> {
        self.store.wait_until_ready().await.map_err(|_| {
            Error::FatalStartup("object cache writer dropped before initial sync".to_string())
        })
    }
}

/// Queue key for a watch event.
///
/// Applied objects (initial list or later changes) map to their key; deletes
/// and list markers carry nothing to check.
pub fn key_for_event<K: Resource>(event: &watcher::Event<K>) -> Option<ObjectKey> {
    match event {
        watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
            match ObjectKey::from_resource(obj) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(error = %e, "Skipping watch event for object without a key");
                    None
                }
            }
        }
        watcher::Event::Delete(_) | watcher::Event::Init | watcher::Event::InitDone => None,
    }
}

/// Identity of one incarnation of an object at one spec revision.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Revision {
    uid: Option<String>,
    generation: i64,
}

/// Drops events that do not change an object's spec.
///
/// `metadata.generation` only moves on spec changes, so status churn (for
/// example during a rollout) does not re-trigger the check. The uid is part of
/// the revision, so an object recreated under the same name is admitted even
/// when its generation matches the old one. Entries not seen again during a
/// relist belong to objects deleted while the watch was down and are pruned.
#[derive(Debug, Default)]
pub struct GenerationFilter {
    seen: HashMap<ObjectKey, Revision>,
    relisted: Option<HashSet<ObjectKey>>,
}

impl GenerationFilter {
    pub fn admit<K: Resource>(&mut self, event: &watcher::Event<K>) -> bool {
        match event {
            watcher::Event::Apply(obj) | watcher::Event::InitApply(obj) => {
                // Nameless objects pass through so key_for_event can report them
                let Ok(key) = ObjectKey::from_resource(obj) else {
                    return true;
                };
                if let (watcher::Event::InitApply(_), Some(relisted)) = (event, &mut self.relisted) {
                    relisted.insert(key.clone());
                }
                let meta = obj.meta();
                match meta.generation {
                    Some(generation) => {
                        let revision = Revision {
                            uid: meta.uid.clone(),
                            generation,
                        };
                        self.seen.insert(key, revision.clone()).as_ref() != Some(&revision)
                    }
                    None => true,
                }
            }
            watcher::Event::Delete(obj) => {
                if let Ok(key) = ObjectKey::from_resource(obj) {
                    self.seen.remove(&key);
                }
                false
            }
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                false
            }
            watcher::Event::InitDone => {
                if let Some(relisted) = self.relisted.take() {
                    self.seen.retain(|key, _| relisted.contains(key));
                }
                false
            }
        }
    }

    /// Number of objects whose revision is remembered.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Watch Deployments, keep the cache current and enqueue changed objects.
///
/// Runs until `shutdown` is cancelled. Watch errors are retried with the
/// watcher's default backoff.
pub async fn run_watcher(
    api: Api<Deployment>,
    config: watcher::Config,
    writer: reflector::store::Writer<Deployment>,
    queue: Arc<WorkQueue<String>>,
    shutdown: CancellationToken,
) {
    info!("Starting Deployment watcher");

    let mut filter = GenerationFilter::default();
    let mut events = pin!(reflector(writer, watcher(api, config)).default_backoff());

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            next = events.next() => match next {
                Some(Ok(event)) => {
                    if !filter.admit(&event) {
                        trace!("Skipping event without spec change");
                        continue;
                    }
                    if let Some(key) = key_for_event(&event) {
                        debug!(key = %key, "Adding to the queue");
                        queue.add(key.to_string());
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Deployment watch failed, backing off");
                }
                None => {
                    warn!("Deployment watch stream ended");
                    break;
                }
            },
        }
    }

    info!("Deployment watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use kube::runtime::watcher::Event;

    fn deployment(ns: &str, name: &str, generation: i64) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                generation: Some(generation),
                ..ObjectMeta::default()
            },
            ..Deployment::default()
        }
    }

    fn with_uid(mut deployment: Deployment, uid: &str) -> Deployment {
        deployment.metadata.uid = Some(uid.to_string());
        deployment
    }

    #[test]
    fn test_key_for_apply_events() {
        let obj = deployment("prod", "web", 1);
        assert_eq!(
            key_for_event(&Event::Apply(obj.clone())),
            Some(ObjectKey::new("prod", "web"))
        );
        assert_eq!(
            key_for_event(&Event::InitApply(obj)),
            Some(ObjectKey::new("prod", "web"))
        );
    }

    #[test]
    fn test_no_key_for_delete_or_markers() {
        assert_eq!(key_for_event(&Event::Delete(deployment("prod", "web", 1))), None);
        assert_eq!(key_for_event::<Deployment>(&Event::Init), None);
        assert_eq!(key_for_event::<Deployment>(&Event::InitDone), None);
    }

    #[test]
    fn test_generation_filter_skips_status_only_updates() {
        let mut filter = GenerationFilter::default();
        assert!(filter.admit(&Event::InitApply(deployment("prod", "web", 1))));
        assert!(!filter.admit(&Event::Apply(deployment("prod", "web", 1))));
        assert!(filter.admit(&Event::Apply(deployment("prod", "web", 2))));
        assert!(filter.admit(&Event::Apply(deployment("prod", "api", 2))));
    }

    #[test]
    fn test_generation_filter_forgets_deleted_objects() {
        let mut filter = GenerationFilter::default();
        assert!(filter.admit(&Event::Apply(deployment("prod", "web", 3))));
        assert!(!filter.admit(&Event::Delete(deployment("prod", "web", 3))));
        assert!(filter.admit(&Event::Apply(deployment("prod", "web", 3))));
    }

    #[test]
    fn test_generation_filter_admits_object_recreated_during_watch_gap() {
        let mut filter = GenerationFilter::default();
        assert!(filter.admit(&Event::Apply(with_uid(deployment("prod", "web", 1), "uid-old"))));

        // Deleted and recreated while the watch was down: only a relist follows
        assert!(!filter.admit::<Deployment>(&Event::Init));
        assert!(filter.admit(&Event::InitApply(with_uid(deployment("prod", "web", 1), "uid-new"))));
        assert!(!filter.admit::<Deployment>(&Event::InitDone));

        assert!(!filter.admit(&Event::Apply(with_uid(deployment("prod", "web", 1), "uid-new"))));
    }

    #[test]
    fn test_generation_filter_prunes_objects_missing_from_relist() {
        let mut filter = GenerationFilter::default();
        assert!(filter.admit(&Event::Apply(with_uid(deployment("prod", "web", 1), "uid-web"))));
        assert!(filter.admit(&Event::Apply(with_uid(deployment("prod", "api", 1), "uid-api"))));
        assert_eq!(filter.len(), 2);

        filter.admit::<Deployment>(&Event::Init);
        assert!(!filter.admit(&Event::InitApply(with_uid(deployment("prod", "web", 1), "uid-web"))));
        filter.admit::<Deployment>(&Event::InitDone);

        assert_eq!(filter.len(), 1);
        assert!(filter.admit(&Event::Apply(with_uid(deployment("prod", "api", 1), "uid-api"))));
    }

    #[test]
    fn test_nameless_object_yields_no_key() {
        let mut filter = GenerationFilter::default();
        let event = Event::Apply(Deployment::default());
        assert!(filter.admit(&event));
        assert_eq!(key_for_event(&event), None);
        assert!(filter.is_empty());
    }

    #[test]
    fn test_store_cache_reads_applied_objects() {
        let (cache, mut writer) = StoreCache::pair();
        writer.apply_watcher_event(&Event::Apply(deployment("prod", "web", 1)));

        let object = cache.get(&ObjectKey::new("prod", "web")).unwrap();
        assert_eq!(object.key, ObjectKey::new("prod", "web"));
        assert!(cache.get(&ObjectKey::new("prod", "missing")).is_none());
    }
}
