use crate::{
    dns::{
        DnsZone,
        AUTOMATIC_TTL,
    },
    public_ip::PublicIp,
    resources::{
        Annotations,
        ResourceCache,
    },
};
use std::sync::Arc;

/// Holds state shared by the reconcile workers. Everything in here is either read-only or synchronizes itself.
pub struct Context {
    pub cache: Arc<dyn ResourceCache>,
    pub zone: Arc<dyn DnsZone>,
    pub public_ip: Arc<PublicIp>,
    pub settings: Settings,
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub annotations: Annotations,
    /// TTL of created records, 1 means automatic.
    pub ttl: i64,
    /// Escalate failures of the deletion sweep to the retry policy instead of only logging them.
    pub strict_cleanup: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            annotations: Annotations::default(),
            ttl: AUTOMATIC_TTL,
            strict_cleanup: false,
        }
    }
}
