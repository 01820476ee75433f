use crate::key::{
    ReconcileKey,
    ResourceKind,
};
use k8s_openapi::api::{
    core::v1::Service,
    networking::v1::Ingress,
};
use kube::runtime::reflector::{
    ObjectRef,
    Store,
};
use std::{
    collections::BTreeMap,
    sync::Arc,
};

/// Annotation domain used when none is configured.
pub const DEFAULT_ANNOTATION_DOMAIN: &str = "cloudflare-dynamic-dns.alpha.kubernetes.io";

/// A watched cluster object. Both kinds expose their annotations the same way, the reconciler never needs more.
#[derive(Clone, Debug)]
pub enum WatchedResource {
    Service(Arc<Service>),
    Ingress(Arc<Ingress>),
}

impl WatchedResource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            WatchedResource::Service(_) => ResourceKind::Service,
            WatchedResource::Ingress(_) => ResourceKind::Ingress,
        }
    }

    pub fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            WatchedResource::Service(svc) => svc.metadata.annotations.as_ref(),
            WatchedResource::Ingress(ingress) => ingress.metadata.annotations.as_ref(),
        }
    }
}

/// The hostname and proxy flag a resource asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DesiredRecordSet {
    pub hostname: String,
    pub proxied: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("annotation {annotation:?} has non-boolean value {value:?}")]
pub struct AnnotationError {
    pub annotation: String,
    pub value: String,
}

/// Annotation keys under a configurable domain, e.g. `<domain>/hostname`.
#[derive(Clone, Debug)]
pub struct Annotations {
    hostname: String,
    proxied: String,
}

impl Default for Annotations {
    fn default() -> Self {
        Self::new(DEFAULT_ANNOTATION_DOMAIN)
    }
}

impl Annotations {
    pub fn new(domain: &str) -> Self {
        let domain = domain.trim_end_matches('/');
        Self {
            hostname: format!("{domain}/hostname"),
            proxied: format!("{domain}/proxied"),
        }
    }

    pub fn hostname_key(&self) -> &str {
        &self.hostname
    }

    pub fn proxied_key(&self) -> &str {
        &self.proxied
    }

    /// Reads the desired DNS state of a resource. `Ok(None)` means the resource is not DNS-managed.
    pub fn desired_record_set(
        &self,
        resource: &WatchedResource,
    ) -> Result<Option<DesiredRecordSet>, AnnotationError> {
        let Some(annotations) = resource.annotations() else {
            return Ok(None);
        };
        let Some(hostname) = annotations.get(&self.hostname) else {
            return Ok(None);
        };

        let proxied = match annotations.get(&self.proxied) {
            None => false,
            Some(value) => parse_bool(value).ok_or_else(|| AnnotationError {
                annotation: self.proxied.clone(),
                value: value.clone(),
            })?,
        };

        Ok(Some(DesiredRecordSet {
            hostname: hostname.clone(),
            proxied,
        }))
    }
}

/// Accepts the usual spellings: 1, t, T, TRUE, true, True and their false counterparts.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to read {key} from the resource cache: {reason}")]
pub struct LookupError {
    pub key: String,
    pub reason: String,
}

/// Read-only view of the locally cached cluster state.
pub trait ResourceCache: Send + Sync {
    fn get(&self, key: &ReconcileKey) -> Result<Option<WatchedResource>, LookupError>;
}

/// Resource cache backed by the reflector stores of the Service and Ingress watchers.
#[derive(Clone)]
pub struct KubeCache {
    pub services: Store<Service>,
    pub ingresses: Store<Ingress>,
}

impl ResourceCache for KubeCache {
    fn get(&self, key: &ReconcileKey) -> Result<Option<WatchedResource>, LookupError> {
        let resource = match key.kind {
            ResourceKind::Service => self
                .services
                .get(&ObjectRef::new(&key.name).within(&key.namespace))
                .map(WatchedResource::Service),
            ResourceKind::Ingress => self
                .ingresses
                .get(&ObjectRef::new(&key.name).within(&key.namespace))
                .map(WatchedResource::Ingress),
        };
        Ok(resource)
    }
}
