//! In-memory stand-ins for the resource cache and the DNS zone.

#![allow(dead_code)]

use cloudflare_dynamic_dns::{
    context::{
        Context,
        Settings,
    },
    dns::{
        ApiMessage,
        DnsError,
        DnsRecord,
        DnsZone,
        NewRecord,
        RecordType,
    },
    key::{
        ReconcileKey,
        ResourceKind,
    },
    public_ip::PublicIp,
    resources::{
        LookupError,
        ResourceCache,
        WatchedResource,
    },
};
use k8s_openapi::api::{
    core::v1::Service,
    networking::v1::Ingress,
};
use kube::api::ObjectMeta;
use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    sync::{
        atomic::{
            AtomicBool,
            AtomicUsize,
            Ordering,
        },
        Arc,
        Mutex,
    },
    time::Duration,
};

pub const HOSTNAME: &str = "cloudflare-dynamic-dns.alpha.kubernetes.io/hostname";
pub const PROXIED: &str = "cloudflare-dynamic-dns.alpha.kubernetes.io/proxied";

#[derive(Default)]
pub struct MemoryCache {
    objects: Mutex<HashMap<ReconcileKey, WatchedResource>>,
    pub fail: AtomicBool,
}

fn meta(ns: &str, name: &str, annotations: &[(&str, &str)]) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(ns.to_string()),
        annotations: Some(
            annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Default::default()
    }
}

impl MemoryCache {
    pub fn put_service(&self, ns: &str, name: &str, annotations: &[(&str, &str)]) {
        let svc = Service {
            metadata: meta(ns, name, annotations),
            ..Default::default()
        };
        self.objects.lock().unwrap().insert(
            ReconcileKey::new(ResourceKind::Service, ns, name),
            WatchedResource::Service(Arc::new(svc)),
        );
    }

    pub fn put_ingress(&self, ns: &str, name: &str, annotations: &[(&str, &str)]) {
        let ingress = Ingress {
            metadata: meta(ns, name, annotations),
            ..Default::default()
        };
        self.objects.lock().unwrap().insert(
            ReconcileKey::new(ResourceKind::Ingress, ns, name),
            WatchedResource::Ingress(Arc::new(ingress)),
        );
    }

    pub fn remove(&self, key: &str) {
        let key: ReconcileKey = key.parse().unwrap();
        self.objects.lock().unwrap().remove(&key);
    }
}

impl ResourceCache for MemoryCache {
    fn get(&self, key: &ReconcileKey) -> Result<Option<WatchedResource>, LookupError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LookupError {
                key: key.to_string(),
                reason: "cache unavailable".to_string(),
            });
        }
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }
}

/// A zone kept in memory. Failures can be switched on per operation.
#[derive(Default)]
pub struct MemoryZone {
    records: Mutex<Vec<DnsRecord>>,
    next_id: AtomicUsize,
    pub fail_list: AtomicBool,
    pub fail_delete: AtomicBool,
    fail_delete_type: Mutex<Option<RecordType>>,
    /// Fail this many upcoming creates of the given type (usize::MAX: forever).
    create_failures: Mutex<HashMap<RecordType, usize>>,
    pub creates: AtomicUsize,
    pub deletes: AtomicUsize,
    /// Slows down every TXT lookup, to widen race windows.
    pub lookup_delay: Mutex<Option<Duration>>,
    in_flight: Mutex<HashMap<String, usize>>,
    pub max_in_flight: AtomicUsize,
}

fn provider_error(status: u16, message: &str) -> DnsError {
    DnsError::Provider {
        status,
        errors: vec![ApiMessage {
            code: 1000,
            message: message.to_string(),
        }],
    }
}

impl MemoryZone {
    pub fn seed(&self, record_type: RecordType, name: &str, content: &str, proxied: bool) -> String {
        let id = format!("rec-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.records.lock().unwrap().push(DnsRecord {
            id: id.clone(),
            name: name.to_string(),
            record_type: record_type.to_string(),
            content: content.to_string(),
            ttl: 1,
            proxied,
            comment: None,
            created_on: None,
            modified_on: None,
        });
        id
    }

    pub fn fail_creates(&self, record_type: RecordType, times: usize) {
        self.create_failures.lock().unwrap().insert(record_type, times);
    }

    /// Fails deletes of records of one type only.
    pub fn fail_deletes_of(&self, record_type: Option<RecordType>) {
        *self.fail_delete_type.lock().unwrap() = record_type;
    }

    pub fn records(&self, record_type: RecordType, name: &str) -> Vec<DnsRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.record_type == record_type.as_str() && r.name == name)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<DnsRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> usize {
        self.creates.load(Ordering::SeqCst) + self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DnsZone for MemoryZone {
    async fn list_records(&self, record_type: RecordType) -> Result<Vec<DnsRecord>, DnsError> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(provider_error(500, "internal error"));
        }
        let records: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.record_type == record_type.as_str())
            .cloned()
            .collect();
        if records.is_empty() {
            return Err(DnsError::NoRecords(record_type));
        }
        Ok(records)
    }

    async fn find_records(&self, record_type: RecordType, name: &str) -> Result<Vec<DnsRecord>, DnsError> {
        if record_type == RecordType::TXT {
            let delay = *self.lookup_delay.lock().unwrap();
            if let Some(delay) = delay {
                let current = {
                    let mut in_flight = self.in_flight.lock().unwrap();
                    let n = in_flight.entry(name.to_string()).or_insert(0);
                    *n += 1;
                    *n
                };
                self.max_in_flight.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                *self.in_flight.lock().unwrap().entry(name.to_string()).or_insert(1) -= 1;
            }
        }
        Ok(self.records(record_type, name))
    }

    async fn create_record(&self, record: NewRecord) -> Result<DnsRecord, DnsError> {
        self.creates.fetch_add(1, Ordering::SeqCst);

        {
            let mut create_failures = self.create_failures.lock().unwrap();
            if let Some(remaining) = create_failures.get_mut(&record.record_type) {
                if *remaining > 0 {
                    if *remaining != usize::MAX {
                        *remaining -= 1;
                    }
                    return Err(provider_error(400, "create rejected"));
                }
            }
        }

        let id = self.seed(record.record_type, &record.name, &record.content, record.proxied);
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .unwrap())
    }

    async fn delete_record_by_id(&self, id: &str) -> Result<(), DnsError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(provider_error(500, "delete failed"));
        }
        let mut records = self.records.lock().unwrap();
        if let Some(record_type) = *self.fail_delete_type.lock().unwrap() {
            if records
                .iter()
                .any(|r| r.id == id && r.record_type == record_type.as_str())
            {
                return Err(provider_error(500, "delete failed"));
            }
        }
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Err(provider_error(404, "record not found"));
        }
        Ok(())
    }
}

pub struct Harness {
    pub cache: Arc<MemoryCache>,
    pub zone: Arc<MemoryZone>,
    pub public_ip: Arc<PublicIp>,
    pub ctx: Arc<Context>,
}

pub fn harness(ip: &str) -> Harness {
    harness_with(ip, Settings::default())
}

pub fn harness_with(ip: &str, settings: Settings) -> Harness {
    let cache = Arc::new(MemoryCache::default());
    let zone = Arc::new(MemoryZone::default());
    let public_ip = Arc::new(PublicIp::new());
    public_ip.set(ip);

    let ctx = Arc::new(Context {
        cache: cache.clone(),
        zone: zone.clone(),
        public_ip: public_ip.clone(),
        settings,
    });

    Harness {
        cache,
        zone,
        public_ip,
        ctx,
    }
}
