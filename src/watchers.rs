use crate::{
    controller::wait_for_shutdown,
    key::{
        ReconcileKey,
        ResourceKind,
    },
    queue::WorkQueue,
    resources::KubeCache,
};
use futures::{
    Stream,
    StreamExt as _,
};
use k8s_openapi::api::{
    core::v1::Service,
    networking::v1::Ingress,
};
use kube::{
    runtime::{
        reflector,
        watcher,
        WatchStreamExt as _,
    },
    Api,
    Resource,
    ResourceExt as _,
};
use std::collections::HashSet;
use tokio::{
    sync::watch,
    task::JoinHandle,
};

fn key_of<K: Resource>(kind: ResourceKind, obj: &K) -> String {
    let ns = obj.meta().namespace.as_deref().unwrap_or("default");
    ReconcileKey::new(kind, ns, obj.name_any()).to_string()
}

/// Turns watch events into keys to reconcile.
///
/// Objects that vanish while the watch is desynced never produce a `Delete` event. The relist that follows only
/// lists the survivors, so every key known before an `Init` and missing at `InitDone` is emitted as well.
struct KeyTracker {
    kind: ResourceKind,
    known: HashSet<String>,
    relisted: Option<HashSet<String>>,
}

impl KeyTracker {
    fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            known: HashSet::new(),
            relisted: None,
        }
    }

    fn handle<K: Resource>(&mut self, event: watcher::Event<K>) -> Vec<String> {
        match event {
            watcher::Event::Apply(obj) => {
                let key = key_of(self.kind, &obj);
                self.known.insert(key.clone());
                vec![key]
            }
            watcher::Event::Delete(obj) => {
                let key = key_of(self.kind, &obj);
                self.known.remove(&key);
                vec![key]
            }
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                let key = key_of(self.kind, &obj);
                self.relisted.get_or_insert_with(HashSet::new).insert(key.clone());
                vec![key]
            }
            watcher::Event::InitDone => {
                let relisted = self.relisted.take().unwrap_or_default();
                let gone: Vec<_> = self.known.difference(&relisted).cloned().collect();
                if !gone.is_empty() {
                    debug!(kind = %self.kind, count = gone.len(), "objects disappeared during relist");
                }
                self.known = relisted;
                gone
            }
        }
    }
}

/// Keys of every applied or deleted object. Deleted objects are already gone from the store when their key is
/// emitted, so the reconciler sees them as absent.
fn watch_keys<K>(
    api: Api<K>,
    writer: reflector::store::Writer<K>,
    kind: ResourceKind,
) -> impl Stream<Item = String> + Send + 'static
where
    K: Resource<DynamicType = ()> + Clone + std::fmt::Debug + Send + Sync + serde::de::DeserializeOwned + 'static,
{
    let mut tracker = KeyTracker::new(kind);

    watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .map(move |event| match event {
            Ok(event) => tracker.handle(event),
            Err(err) => {
                warn!(%kind, "watch error: {err}");
                Vec::new()
            }
        })
        .flat_map(futures::stream::iter)
}

/// Starts watching Services and Ingresses in all namespaces, feeding their keys into `queue` until `shutdown` flips
/// to true.
pub fn spawn_watchers(
    client: kube::Client,
    queue: WorkQueue<String>,
    shutdown: watch::Receiver<bool>,
) -> (KubeCache, JoinHandle<()>) {
    let (services, services_writer) = reflector::store::<Service>();
    let (ingresses, ingresses_writer) = reflector::store::<Ingress>();

    let service_keys = watch_keys(Api::<Service>::all(client.clone()), services_writer, ResourceKind::Service);
    let ingress_keys = watch_keys(Api::<Ingress>::all(client), ingresses_writer, ResourceKind::Ingress);

    let task = tokio::spawn(async move {
        let events = futures::stream::select(service_keys, ingress_keys).for_each(|key| {
            trace!(%key, "queueing");
            queue.add(key);
            futures::future::ready(())
        });

        tokio::select! {
            _ = events => {}
            _ = wait_for_shutdown(shutdown) => {}
        }

        debug!("watchers stopped");
    });

    (KubeCache { services, ingresses }, task)
}
