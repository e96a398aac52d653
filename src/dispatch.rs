use std::sync::Arc;

use camino::Utf8PathBuf;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::archive::FileArchiveSink;
use crate::config::ResolvedConfig;
use crate::dom::{ContainerDom, FrameClock};
use crate::domain::{Coordinate, Locator, ViewId};
use crate::error::RunaError;
use crate::events::{BridgeEvent, EventBus};
use crate::fetch::AssetFetcher;
use crate::map::{MapController, MapHandle, MapRuntime, ShowMapRequest};
use crate::messages::PortMessage;
use crate::pipeline::{DownloadOptions, download_archive};
use crate::tokens::TokenSource;

/// Receives UI failure reports and page views.
pub trait DiagnosticsSink: Send + Sync {
    fn report_error(&self, message: &str);
    fn page_view(&self, path: &str);
}

/// Routes diagnostics into the process log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn report_error(&self, message: &str) {
        tracing::error!(source = "ui", "{message}");
    }

    fn page_view(&self, path: &str) {
        tracing::info!(page = %path, "page view");
    }
}

pub trait FullscreenDriver: Send + Sync {
    fn request_fullscreen(&self);
}

/// Stand-in for environments with no presentation shell attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopFullscreen;

impl FullscreenDriver for NopFullscreen {
    fn request_fullscreen(&self) {
        tracing::debug!("fullscreen requested with no shell attached");
    }
}

/// Routes inbound port messages to the download pipeline and the map
/// controller. Holds the only live [`MapHandle`]; map requests queue on
/// the slot lock while downloads are single-flight and reject overlap
/// with a busy error.
pub struct Dispatcher<F, R, D, C, T, X, G>
where
    F: AssetFetcher + 'static,
    R: MapRuntime + 'static,
    D: ContainerDom + 'static,
    C: FrameClock + 'static,
    T: TokenSource + 'static,
    X: DiagnosticsSink,
    G: FullscreenDriver,
{
    fetcher: Arc<F>,
    map: Arc<MapController<R, D, C, T>>,
    map_slot: Arc<Mutex<Option<MapHandle<R::Widget>>>>,
    diagnostics: X,
    fullscreen: G,
    bus: EventBus,
    download_gate: Arc<Semaphore>,
    download_options: DownloadOptions,
    download_dir: Utf8PathBuf,
    archive_name: String,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl<F, R, D, C, T, X, G> Dispatcher<F, R, D, C, T, X, G>
where
    F: AssetFetcher + 'static,
    R: MapRuntime + 'static,
    D: ContainerDom + 'static,
    C: FrameClock + 'static,
    T: TokenSource + 'static,
    X: DiagnosticsSink,
    G: FullscreenDriver,
{
    pub fn new(
        fetcher: F,
        map: MapController<R, D, C, T>,
        diagnostics: X,
        fullscreen: G,
        bus: EventBus,
        config: &ResolvedConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            map: Arc::new(map),
            map_slot: Arc::new(Mutex::new(None)),
            diagnostics,
            fullscreen,
            bus,
            download_gate: Arc::new(Semaphore::new(1)),
            download_options: DownloadOptions::from_config(config),
            download_dir: config.download_dir.clone(),
            archive_name: config.archive_name.clone(),
            cancel,
            tasks: JoinSet::new(),
        }
    }

    pub fn handle(&mut self, message: PortMessage) {
        match message {
            PortMessage::DownloadImages(locators) => self.spawn_download(locators),
            PortMessage::InitMap { view, coordinates } => self.spawn_map(view, coordinates),
            PortMessage::HttpError(message) => self.diagnostics.report_error(&message),
            PortMessage::Analytics(page) => self.diagnostics.page_view(&page),
            PortMessage::RequestFullscreen => self.fullscreen.request_fullscreen(),
        }
    }

    fn spawn_download(&mut self, locators: Vec<Locator>) {
        let permit = match Arc::clone(&self.download_gate).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::debug!("download trigger rejected, one already in flight");
                self.bus
                    .publish(BridgeEvent::Error(RunaError::DownloadBusy.to_string()));
                return;
            }
        };

        let fetcher = Arc::clone(&self.fetcher);
        let bus = self.bus.clone();
        let options = self.download_options.clone();
        let dir = self.download_dir.clone();
        let archive_name = self.archive_name.clone();
        let cancel = self.cancel.child_token();
        self.tasks.spawn(async move {
            let _permit = permit;
            let sink = match FileArchiveSink::create(&dir, &archive_name).await {
                Ok(sink) => sink,
                Err(err) => {
                    bus.publish(BridgeEvent::Error(err.to_string()));
                    return;
                }
            };
            if let Err(err) =
                download_archive(fetcher.as_ref(), &locators, sink, &options, &bus, &cancel).await
            {
                bus.publish(BridgeEvent::Error(err.to_string()));
            }
        });
    }

    fn spawn_map(&mut self, view: ViewId, coordinates: Vec<Coordinate>) {
        let controller = Arc::clone(&self.map);
        let slot = Arc::clone(&self.map_slot);
        let bus = self.bus.clone();
        let cancel = self.cancel.child_token();
        self.tasks.spawn(async move {
            let mut slot = slot.lock().await;
            let prior = slot.take();
            let request = ShowMapRequest { view, coordinates };
            match controller.show_map(prior, request, &cancel).await {
                Ok(handle) => *slot = Some(handle),
                Err(err) => bus.publish(BridgeEvent::Error(err.to_string())),
            }
        });
    }

    /// View of the live map instance, if any.
    pub async fn current_view(&self) -> Option<ViewId> {
        self.map_slot
            .lock()
            .await
            .as_ref()
            .map(|handle| handle.view().clone())
    }

    /// Waits for every spawned task to finish.
    pub async fn settle(&mut self) {
        while self.tasks.join_next().await.is_some() {}
    }

    /// Cancels in-flight work and waits for it to wind down.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        self.settle().await;
    }
}
