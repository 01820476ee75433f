#[macro_use]
extern crate tracing;

use clap::{
    builder::NonEmptyStringValueParser,
    Parser,
};
use cloudflare_dynamic_dns::{
    context::{
        Context,
        Settings,
    },
    controller::{
        wait_for_shutdown,
        Controller,
    },
    dns::{
        cloudflare::CloudflareApi,
        DnsError,
        DnsRecord,
        DnsZone as _,
        RecordType,
        AUTOMATIC_TTL,
    },
    public_ip::{
        self,
        HttpIpLookup,
        PublicIp,
        DEFAULT_IP_LOOKUP_URL,
    },
    queue::WorkQueue,
    resources::{
        Annotations,
        DEFAULT_ANNOTATION_DOMAIN,
    },
    watchers,
};
use eyre::Result;
use std::{
    sync::Arc,
    time::Duration,
};
use tokio::sync::watch;

#[derive(Parser)]
#[command(version, about)]
enum Args {
    /// Run the controller.
    Controller(ArgsController),
    /// Print the A and TXT records of the zone.
    ListRecords(ArgsCloudflare),
}

#[derive(Parser)]
struct ArgsCloudflare {
    #[clap(long, env = "CF_AUTH_EMAIL", value_parser = NonEmptyStringValueParser::new(), help = "Cloudflare account email")]
    cf_auth_email: String,

    #[clap(
        long,
        env = "CF_AUTH_TOKEN",
        hide_env_values = true,
        value_parser = NonEmptyStringValueParser::new(),
        help = "Cloudflare API key"
    )]
    cf_auth_token: String,

    #[clap(long, env = "CF_ZONE_ID", value_parser = NonEmptyStringValueParser::new(), help = "Cloudflare zone identifier")]
    cf_zone_id: String,
}

impl ArgsCloudflare {
    fn api(self) -> Result<CloudflareApi> {
        Ok(CloudflareApi::new(self.cf_auth_email, self.cf_auth_token, self.cf_zone_id)?)
    }
}

#[derive(Parser)]
struct ArgsController {
    #[clap(flatten)]
    cloudflare: ArgsCloudflare,

    #[clap(long, env = "THREADINESS", default_value_t = 1, help = "Number of reconcile workers")]
    threadiness: usize,

    #[clap(
        long,
        env = "IP_REFRESH_INTERVAL",
        default_value = "30s",
        value_parser = humantime::parse_duration,
        help = "How often to look up the public ip"
    )]
    ip_refresh_interval: Duration,

    #[clap(long, env = "IP_LOOKUP_URL", default_value = DEFAULT_IP_LOOKUP_URL, help = "Service that echoes the public ip")]
    ip_lookup_url: String,

    #[clap(
        long,
        env = "ANNOTATION_DOMAIN",
        default_value = DEFAULT_ANNOTATION_DOMAIN,
        help = "Domain of the hostname and proxied annotations"
    )]
    annotation_domain: String,

    #[clap(long, env = "RECORD_TTL", default_value_t = AUTOMATIC_TTL, help = "TTL of created records, 1 is automatic")]
    ttl: i64,

    #[clap(
        long,
        env = "STRICT_CLEANUP",
        help = "Retry record deletion of removed resources instead of only logging failures"
    )]
    strict_cleanup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match Args::parse() {
        Args::Controller(args) => run_controller(args).await?,
        Args::ListRecords(args) => list_records(args).await?,
    }

    Ok(())
}

async fn run_controller(
    ArgsController {
        cloudflare,
        threadiness,
        ip_refresh_interval,
        ip_lookup_url,
        annotation_domain,
        ttl,
        strict_cleanup,
    }: ArgsController,
) -> Result<()> {
    let client = kube::Client::try_default().await?;
    let zone = cloudflare.api()?;
    info!(zone = zone.zone_id(), "managing cloudflare zone");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let public_ip = Arc::new(PublicIp::new());
    let ip_watcher = tokio::spawn(public_ip::watch_public_ip(
        public_ip.clone(),
        HttpIpLookup::new(ip_lookup_url)?,
        ip_refresh_interval,
        shutdown_rx.clone(),
    ));

    let queue = WorkQueue::default();
    let (cache, watch_task) = watchers::spawn_watchers(client, queue.clone(), shutdown_rx.clone());

    info!("waiting for resource caches to sync");
    tokio::select! {
        synced = async { tokio::try_join!(cache.services.wait_until_ready(), cache.ingresses.wait_until_ready()) } => {
            synced?;
        }
        _ = wait_for_shutdown(shutdown_rx.clone()) => {
            info!("stopped before caches synced");
            return Ok(());
        }
    }

    if !public_ip::wait_for_public_ip(&public_ip, shutdown_rx.clone()).await {
        return Ok(());
    }

    let ctx = Arc::new(Context {
        cache: Arc::new(cache),
        zone: Arc::new(zone),
        public_ip,
        settings: Settings {
            annotations: Annotations::new(&annotation_domain),
            ttl,
            strict_cleanup,
        },
    });

    let controller = Arc::new(Controller::new(ctx, queue));
    controller.run(threadiness, shutdown_rx).await;

    let (ip_result, watch_result) = tokio::join!(ip_watcher, watch_task);
    ip_result?;
    watch_result?;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{
            signal,
            SignalKind,
        };
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!("cannot listen for SIGTERM: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

async fn list_records(args: ArgsCloudflare) -> Result<()> {
    let api = args.api()?;

    for record_type in [RecordType::A, RecordType::TXT] {
        let records = match api.list_records(record_type).await {
            Ok(records) => records,
            Err(DnsError::NoRecords(_)) => Vec::new(),
            Err(err) => return Err(err.into()),
        };

        for record in records {
            let DnsRecord {
                id,
                name,
                record_type,
                content,
                proxied,
                ..
            } = record;
            println!("name={name} type={record_type} content={content} proxied={proxied} id={id}");
        }
    }

    Ok(())
}
