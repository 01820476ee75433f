use crate::{
    context::Context,
    dns::{
        DnsError,
        NewRecord,
        RecordType,
    },
    key::{
        KeyError,
        ReconcileKey,
    },
    resources::{
        DesiredRecordSet,
        LookupError,
        WatchedResource,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Dns(#[from] DnsError),

    #[error("{hostname} is already managed by {owner}")]
    OwnershipConflict { hostname: String, owner: String },

    #[error("public ip is not known yet")]
    PublicIpUnavailable,

    #[error("cleanup of {key} left {failed} record(s) behind")]
    Cleanup { key: String, failed: usize },

    #[error("sync of {key} did not finish: {reason}")]
    Aborted { key: String, reason: String },
}

/// Converges the DNS records of one resource. A key whose resource is gone has its records removed.
#[instrument(level = "debug", skip(ctx))]
pub async fn sync(key: &str, ctx: &Context) -> Result<(), ReconcileError> {
    let key: ReconcileKey = key.parse()?;

    match ctx.cache.get(&key)? {
        None => {
            info!("{key} does not exist anymore");
            cleanup(&key, ctx).await
        }
        Some(resource) => apply(&key, &resource, ctx).await,
    }
}

async fn apply(key: &ReconcileKey, resource: &WatchedResource, ctx: &Context) -> Result<(), ReconcileError> {
    let desired = match ctx.settings.annotations.desired_record_set(resource) {
        Ok(Some(desired)) => desired,
        Ok(None) => {
            debug!("skipping {key}: no hostname annotation");
            return Ok(());
        }
        Err(err) => {
            // retrying cannot fix the value, the next update of the resource will trigger a new sync
            warn!("not syncing {key}: {err}");
            return Ok(());
        }
    };

    let ip = ctx.public_ip.get();
    if ip.is_empty() {
        return Err(ReconcileError::PublicIpUnavailable);
    }

    sync_record_pair(ctx, key, &desired, &ip).await?;

    info!(hostname = %desired.hostname, %ip, proxied = desired.proxied, "sync/add/update {key}");

    Ok(())
}

/// Ensures the TXT marker and then the A record. If the marker is written but the A record fails, the error is
/// returned and the next sync finishes the pair.
async fn sync_record_pair(
    ctx: &Context,
    key: &ReconcileKey,
    desired: &DesiredRecordSet,
    ip: &str,
) -> Result<(), ReconcileError> {
    ensure_marker(ctx, key, &desired.hostname).await?;
    ensure_address(ctx, &desired.hostname, ip, desired.proxied).await
}

async fn ensure_marker(ctx: &Context, key: &ReconcileKey, hostname: &str) -> Result<(), ReconcileError> {
    let owner = key.to_string();
    let markers = ctx.zone.find_records(RecordType::TXT, hostname).await?;

    if markers.iter().any(|record| record.text() == owner) {
        debug!(%hostname, "ownership marker for {owner} present");
        return Ok(());
    }

    // TXT records that are not keys (e.g. spf or site verification) are left alone
    if let Some(other) = markers
        .iter()
        .find(|record| record.text().parse::<ReconcileKey>().is_ok())
    {
        return Err(ReconcileError::OwnershipConflict {
            hostname: hostname.to_string(),
            owner: other.text().to_string(),
        });
    }

    ctx.zone
        .create_record(NewRecord {
            record_type: RecordType::TXT,
            name: hostname.to_string(),
            content: owner,
            ttl: ctx.settings.ttl,
            proxied: false,
        })
        .await?;

    Ok(())
}

async fn ensure_address(ctx: &Context, hostname: &str, ip: &str, proxied: bool) -> Result<(), ReconcileError> {
    let existing = ctx.zone.find_records(RecordType::A, hostname).await?;

    let (mut matching, mut stale): (Vec<_>, Vec<_>) = existing
        .into_iter()
        .partition(|record| record.content == ip && record.proxied == proxied);

    let keep = if matching.is_empty() {
        None
    } else {
        Some(matching.remove(0))
    };
    stale.extend(matching);

    for record in stale {
        warn!(%hostname, id = %record.id, content = %record.content, proxied = record.proxied, "removing outdated A record");
        ctx.zone.delete_record_by_id(&record.id).await?;
    }

    if keep.is_some() {
        debug!(%hostname, %ip, "A record up to date");
        return Ok(());
    }

    ctx.zone
        .create_record(NewRecord {
            record_type: RecordType::A,
            name: hostname.to_string(),
            content: ip.to_string(),
            ttl: ctx.settings.ttl,
            proxied,
        })
        .await?;

    Ok(())
}

/// Deletes every record pair marked with `key`. Best effort: a failing record does not stop the sweep. Failures are
/// only returned in strict mode, which also keeps the marker of a hostname whose A record could not be removed.
async fn cleanup(key: &ReconcileKey, ctx: &Context) -> Result<(), ReconcileError> {
    let owner = key.to_string();
    let strict = ctx.settings.strict_cleanup;

    let markers = match ctx.zone.list_records(RecordType::TXT).await {
        Ok(markers) => markers,
        Err(DnsError::NoRecords(_)) => {
            debug!("no TXT records in zone, nothing to clean up for {owner}");
            return Ok(());
        }
        Err(err) if strict => return Err(err.into()),
        Err(err) => {
            error!("failed to get list of TXT records, not cleaning up {owner}: {err}");
            return Ok(());
        }
    };

    let mut failed = 0;

    for marker in markers.iter().filter(|record| record.text() == owner) {
        let hostname = &marker.name;
        let failed_before = failed;

        match ctx.zone.find_records(RecordType::A, hostname).await {
            Ok(records) => {
                for record in records {
                    if let Err(err) = ctx.zone.delete_record_by_id(&record.id).await {
                        warn!(%hostname, "failed to delete A record: {err}");
                        failed += 1;
                    }
                }
            }
            Err(err) => {
                warn!(%hostname, "failed to look up A record: {err}");
                failed += 1;
            }
        }

        // the marker is what lets a retry find the leftover A record again
        if strict && failed > failed_before {
            warn!(%hostname, "keeping TXT record of {owner} until its A record is gone");
            continue;
        }

        match ctx.zone.delete_record_by_id(&marker.id).await {
            Ok(()) => info!(%hostname, "removed records of {owner}"),
            Err(err) => {
                warn!(%hostname, "failed to delete TXT record: {err}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        if strict {
            return Err(ReconcileError::Cleanup { key: owner, failed });
        }
        error!("{failed} record(s) of {owner} could not be deleted, please do so manually");
    }

    Ok(())
}
