//! Change feed backed by Kubernetes watches

use std::fmt::Debug;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::storage::v1::CSIDriver;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::core::DynamicObject;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::{ChangeFeed, EventHandler, NamespaceFilter, Subscription, WatchTarget};
use crate::crd::ResourceKind;
use crate::error::Result;

/// Watches the live cluster
#[derive(Clone)]
pub struct KubeChangeFeed {
    client: Client,
    namespace: String,
}

impl KubeChangeFeed {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    fn filter_for(&self, target: WatchTarget) -> NamespaceFilter {
        if target.namespace_filtered() {
            NamespaceFilter::only(self.namespace.clone())
        } else {
            NamespaceFilter::any()
        }
    }
}

#[async_trait]
impl ChangeFeed for KubeChangeFeed {
    async fn is_installed(&self, kind: ResourceKind) -> Result<bool> {
        let crds: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        Ok(crds.get_opt(&kind.crd_name()).await?.is_some())
    }

    fn subscribe(&self, target: WatchTarget, handler: EventHandler) -> Subscription {
        let (synced_tx, synced_rx) = watch::channel(false);
        let filter = self.filter_for(target);
        let client = self.client.clone();

        let handle = match target {
            WatchTarget::Managed(kind) => {
                let api: Api<DynamicObject> =
                    Api::namespaced_with(client, &self.namespace, &kind.api_resource());
                tokio::spawn(forward(api, target, filter, handler, synced_tx))
            }
            WatchTarget::CsiDrivers => {
                let api: Api<CSIDriver> = Api::all(client);
                tokio::spawn(forward(api, target, filter, handler, synced_tx))
            }
            WatchTarget::DaemonSets => {
                let api: Api<DaemonSet> = Api::all(client);
                tokio::spawn(forward(api, target, filter, handler, synced_tx))
            }
            WatchTarget::Deployments => {
                let api: Api<Deployment> = Api::all(client);
                tokio::spawn(forward(api, target, filter, handler, synced_tx))
            }
        };

        Subscription::new(target, synced_rx, handle)
    }
}

/// Pump watch events into the handler until the task is aborted
async fn forward<K>(
    api: Api<K>,
    target: WatchTarget,
    filter: NamespaceFilter,
    handler: EventHandler,
    synced: watch::Sender<bool>,
) where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    let mut events = event_stream(api).boxed();

    while let Some(event) = events.next().await {
        match event {
            Ok(Event::InitDone) => {
                debug!(watch = %target, "Initial sync done");
                synced.send_replace(true);
            }
            Ok(Event::Init) => {}
            Ok(Event::InitApply(obj)) | Ok(Event::Apply(obj)) | Ok(Event::Delete(obj)) => {
                if filter.accepts(obj.namespace().as_deref()) {
                    handler();
                }
            }
            Err(e) => {
                warn!(watch = %target, error = %e, "Watch error");
            }
        }
    }
}

fn event_stream<K>(api: Api<K>) -> impl futures::Stream<Item = watcher::Result<Event<K>>> + Send
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    watcher::watcher(api, watcher::Config::default()).default_backoff()
}
