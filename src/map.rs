use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::ResolvedConfig;
use crate::dom::{ContainerDom, ElementRef, FrameClock, resolve_element};
use crate::domain::{Bounds, Coordinate, ViewId};
use crate::error::RunaError;
use crate::tokens::{TokenCache, TokenSource};

/// Fixed presentation of the album map panel: a non-interactive overview
/// locked between street and region zoom.
#[derive(Debug, Clone, PartialEq)]
pub struct MapConfig {
    pub style: String,
    pub zoom: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub interactive: bool,
}

impl MapConfig {
    pub fn album_panel(style: &str) -> Self {
        Self {
            style: style.to_string(),
            zoom: 13.0,
            min_zoom: 2.0,
            max_zoom: 10.0,
            interactive: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Padding {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

/// Camera motion for the bounds fit. The top padding leaves room for the
/// album title bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub padding: Padding,
    pub linear: bool,
    pub max_zoom: f64,
}

impl FitOptions {
    pub fn album_panel() -> Self {
        Self {
            padding: Padding {
                top: 65.0,
                bottom: 50.0,
                left: 50.0,
                right: 50.0,
            },
            linear: false,
            max_zoom: 10.0,
        }
    }
}

/// A mounted map instance. Teardown consumes the widget, so a retired
/// instance cannot be touched again.
#[async_trait]
pub trait MapWidget: Send {
    async fn add_marker(&mut self, coordinate: Coordinate) -> Result<(), RunaError>;
    async fn fit_bounds(&mut self, bounds: Bounds, options: FitOptions) -> Result<(), RunaError>;
    async fn teardown(self) -> Result<(), RunaError>;
}

/// Factory boundary for whatever concrete map engine hosts the panel.
#[async_trait]
pub trait MapRuntime: Send + Sync {
    type Widget: MapWidget + 'static;

    /// Class prefix the engine's DOM nodes carry. Used for the
    /// post-teardown sweep that catches nodes the engine failed to
    /// release.
    fn residue_class_prefix(&self) -> &str;

    async fn mount(
        &self,
        element: &ElementRef,
        access_token: &str,
        config: &MapConfig,
    ) -> Result<Self::Widget, RunaError>;
}

/// Live map panel. Not `Clone`: retiring the handle through
/// [`MapController::show_map`] is the only way to mount a successor,
/// which keeps at most one instance alive per bridge.
#[derive(Debug)]
pub struct MapHandle<W: MapWidget> {
    view: ViewId,
    widget: W,
}

impl<W: MapWidget> MapHandle<W> {
    pub fn view(&self) -> &ViewId {
        &self.view
    }
}

#[derive(Debug, Clone)]
pub struct MapOptions {
    pub style: String,
    pub container_wait: Duration,
}

impl MapOptions {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            style: config.map_style.clone(),
            container_wait: config.container_wait,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShowMapRequest {
    pub view: ViewId,
    pub coordinates: Vec<Coordinate>,
}

/// Drives the panel lifecycle: retire the prior instance, wait for the
/// new container, ensure the access token, mount, place markers, fit.
pub struct MapController<R, D, C, T>
where
    R: MapRuntime,
    D: ContainerDom,
    C: FrameClock,
    T: TokenSource,
{
    runtime: R,
    dom: D,
    clock: C,
    tokens: T,
    token_cache: TokenCache,
    options: MapOptions,
}

impl<R, D, C, T> MapController<R, D, C, T>
where
    R: MapRuntime,
    D: ContainerDom,
    C: FrameClock,
    T: TokenSource,
{
    pub fn new(runtime: R, dom: D, clock: C, tokens: T, options: MapOptions) -> Self {
        Self {
            runtime,
            dom,
            clock,
            tokens,
            token_cache: TokenCache::new(),
            options,
        }
    }

    /// Replaces the live panel with one for `request`. The prior handle
    /// is always retired first; on any failure the caller is left with
    /// no live instance rather than a stale one.
    pub async fn show_map(
        &self,
        prior: Option<MapHandle<R::Widget>>,
        request: ShowMapRequest,
        cancel: &CancellationToken,
    ) -> Result<MapHandle<R::Widget>, RunaError> {
        self.retire(prior).await?;

        let container_id = request.view.container_id();
        let element = resolve_element(
            &self.dom,
            &self.clock,
            &container_id,
            self.options.container_wait,
            cancel,
        )
        .await?;

        let token = self.token_cache.ensure(&self.tokens).await?;

        let config = MapConfig::album_panel(&self.options.style);
        let mut widget = self.runtime.mount(&element, &token, &config).await?;

        for coordinate in &request.coordinates {
            widget.add_marker(*coordinate).await?;
        }
        if let Some(bounds) = Bounds::enclosing(&request.coordinates) {
            widget.fit_bounds(bounds, FitOptions::album_panel()).await?;
        }

        tracing::info!(
            view = %request.view,
            markers = request.coordinates.len(),
            "map mounted"
        );
        Ok(MapHandle {
            view: request.view,
            widget,
        })
    }

    /// Awaits teardown of `prior`, then sweeps the document for engine
    /// nodes that survived it. The sweep also runs with no prior handle,
    /// since an earlier crash can strand nodes without one.
    pub async fn retire(&self, prior: Option<MapHandle<R::Widget>>) -> Result<(), RunaError> {
        if let Some(handle) = prior {
            tracing::debug!(view = %handle.view, "tearing down map");
            handle.widget.teardown().await?;
        }
        let swept = self
            .dom
            .detach_class_prefix(self.runtime.residue_class_prefix())
            .await;
        if swept > 0 {
            tracing::warn!(swept, "removed leftover map nodes after teardown");
        }
        Ok(())
    }
}
