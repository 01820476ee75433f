use std::{
    net::IpAddr,
    sync::{
        Arc,
        Mutex,
        PoisonError,
    },
    time::Duration,
};
use tokio::sync::watch;

/// Default service that echoes the caller's address as plain text.
pub const DEFAULT_IP_LOOKUP_URL: &str = "https://api.ipify.org";

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// The last known public IP of the cluster. Empty until the first successful lookup.
#[derive(Debug, Default)]
pub struct PublicIp {
    ip: Mutex<String>,
}

impl PublicIp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> String {
        self.ip.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, ip: impl Into<String>) {
        *self.ip.lock().unwrap_or_else(PoisonError::into_inner) = ip.into();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IpLookupError {
    #[error("ip lookup request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("ip lookup returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("ip lookup returned something that is not an ip address: {0:?}")]
    Invalid(String),
}

/// Resolves the public IP of this process.
#[async_trait::async_trait]
pub trait IpLookup: Send + Sync {
    async fn lookup(&self) -> Result<IpAddr, IpLookupError>;
}

/// Asks an HTTP echo service such as ipify.
#[derive(Clone, Debug)]
pub struct HttpIpLookup {
    client: reqwest::Client,
    url: String,
}

impl HttpIpLookup {
    pub fn new(url: impl Into<String>) -> Result<Self, IpLookupError> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl IpLookup for HttpIpLookup {
    async fn lookup(&self) -> Result<IpAddr, IpLookupError> {
        let res = self.client.get(&self.url).send().await?;
        if !res.status().is_success() {
            return Err(IpLookupError::Status(res.status()));
        }
        let body = res.text().await?;
        let body = body.trim();
        body.parse().map_err(|_| IpLookupError::Invalid(body.to_string()))
    }
}

/// Runs one lookup and updates the tracker if the address changed. Failures keep the previous value.
pub async fn refresh(current: &PublicIp, lookup: &dyn IpLookup) {
    match lookup.lookup().await {
        Ok(ip) => {
            let ip = ip.to_string();
            if current.get() != ip {
                info!(%ip, "public ip changed");
                current.set(ip);
            } else {
                trace!(%ip, "public ip unchanged");
            }
        }
        Err(err) => {
            warn!("could not retrieve public ip, retrying on next check: {err}");
        }
    }
}

/// Refreshes `current` immediately and then on every `interval` tick until `shutdown` flips to true.
pub async fn watch_public_ip(
    current: Arc<PublicIp>,
    lookup: impl IpLookup,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = timer.tick() => refresh(&current, &lookup).await,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!("public ip watcher stopped");
}

/// Blocks until the tracker holds an address. Returns false if `shutdown` fires first.
pub async fn wait_for_public_ip(current: &PublicIp, mut shutdown: watch::Receiver<bool>) -> bool {
    let mut timer = tokio::time::interval(Duration::from_secs(1));
    loop {
        let ip = current.get();
        if !ip.is_empty() {
            info!(%ip, "public ip known");
            return true;
        }
        info!("waiting to get public ip...");

        tokio::select! {
            _ = timer.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return false;
                }
            }
        }
    }
}
