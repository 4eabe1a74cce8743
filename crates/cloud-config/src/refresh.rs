use rasp_common::RaspResult;

use crate::client::ConfigSource;
use crate::store::CloudConfigStore;

/// What one refresh cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Remote version is not newer; nothing was downloaded.
    UpToDate { version: i64 },
    Applied { version: i64 },
    /// The full document turned out not to be newer after all.
    Skipped { remote: i64 },
}

/// Check the remote version and only download the full configuration when it
/// is newer than the stored one. Lists are fetched separately unless the
/// document already embeds them; a failed list fetch keeps the previous lists.
pub async fn refresh(
    store: &CloudConfigStore,
    source: &dyn ConfigSource,
) -> RaspResult<RefreshOutcome> {
    let local = store.version();
    let remote = source.fetch_version().await?;
    if remote <= local {
        tracing::debug!(local, remote, "cloud config up to date");
        return Ok(RefreshOutcome::UpToDate { version: local });
    }

    let mut doc = source.fetch_config().await?;
    if doc.lists.is_none() {
        match source.fetch_lists().await {
            Ok(lists) => doc.lists = Some(lists),
            Err(e) => tracing::warn!(error = %e, "failed to fetch firewall lists, keeping previous"),
        }
    }

    let fetched = doc.config_updated_at;
    match store.ingest_document(doc) {
        Some(snapshot) => Ok(RefreshOutcome::Applied {
            version: snapshot.version(),
        }),
        None => Ok(RefreshOutcome::Skipped { remote: fetched }),
    }
}
