use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::archive::{ArchiveBuilder, ArchiveSink};
use crate::config::ResolvedConfig;
use crate::domain::Locator;
use crate::error::RunaError;
use crate::events::{BridgeEvent, EventBus};
use crate::fetch::AssetFetcher;

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub base_url: Url,
    pub max_concurrent_fetches: usize,
    pub chunk_size: usize,
}

impl DownloadOptions {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            max_concurrent_fetches: config.max_concurrent_fetches,
            chunk_size: config.chunk_size,
        }
    }
}

/// Fetches every locator, assembles one archive, and streams it into
/// `sink`. The sink is closed on success and aborted on any failure, so
/// a partial archive is never delivered. Progress percentages go to the
/// bus after each serialized entry and a final 100 follows the close.
pub async fn download_archive<F, S>(
    fetcher: &F,
    locators: &[Locator],
    mut sink: S,
    options: &DownloadOptions,
    bus: &EventBus,
    cancel: &CancellationToken,
) -> Result<(), RunaError>
where
    F: AssetFetcher + ?Sized,
    S: ArchiveSink,
{
    tracing::info!(total = locators.len(), "download started");
    bus.publish(BridgeEvent::DownloadProgress(0));

    match serialize_entries(fetcher, locators, &mut sink, options, bus, cancel).await {
        Ok(()) => {
            sink.close().await?;
            bus.publish(BridgeEvent::DownloadProgress(100));
            tracing::info!("download complete");
            Ok(())
        }
        Err(err) => {
            sink.abort().await;
            tracing::warn!(error = %err, "download aborted");
            Err(err)
        }
    }
}

// A named async fn rather than an async block in the `map` closure: the
// closure-embedded block trips rustc's "implementation of `FnOnce` is not
// general enough" limitation when the task is Send-checked at spawn.
async fn fetch_entry<F>(
    fetcher: &F,
    entry_name: String,
    resolved: Result<Url, RunaError>,
) -> (String, Result<Bytes, RunaError>)
where
    F: AssetFetcher + ?Sized,
{
    match resolved {
        Ok(url) => (entry_name, fetcher.fetch(&url).await),
        Err(err) => (entry_name, Err(err)),
    }
}

async fn serialize_entries<F, S>(
    fetcher: &F,
    locators: &[Locator],
    sink: &mut S,
    options: &DownloadOptions,
    bus: &EventBus,
    cancel: &CancellationToken,
) -> Result<(), RunaError>
where
    F: AssetFetcher + ?Sized,
    S: ArchiveSink,
{
    let total = locators.len();
    let mut builder = ArchiveBuilder::new(options.chunk_size);

    // Fetches run ahead bounded by the configured limit, but results are
    // consumed in input order, so entry order is deterministic and the
    // earliest failure is the one that surfaces.
    let mut fetched = stream::iter(locators.iter().cloned().map(|locator| {
        let entry_name = locator.entry_name().to_string();
        let resolved = locator.resolve(&options.base_url);
        fetch_entry(fetcher, entry_name, resolved)
    }))
    .buffered(options.max_concurrent_fetches);

    let mut serialized = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunaError::Cancelled),
            next = fetched.next() => next,
        };
        let Some((entry_name, body)) = next else {
            break;
        };
        let body = body?;
        tracing::debug!(entry = %entry_name, bytes = body.len(), "serializing entry");

        builder.begin_entry(&entry_name)?;
        for chunk in builder.drain()? {
            sink.write(chunk).await?;
        }
        builder.write_entry_body(&body)?;

        serialized += 1;
        let percent = (serialized * 100 / total) as u8;
        bus.publish(BridgeEvent::DownloadProgress(percent));
    }

    for chunk in builder.finish()? {
        sink.write(chunk).await?;
    }
    Ok(())
}
