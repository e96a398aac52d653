use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::RunaError;

/// Reference to a container element that is attached and ready to host
/// a widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef {
    id: String,
}

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Document surface the bridge can query and prune. The real document
/// lives on the UI side; implementations adapt whatever boundary exists.
#[async_trait]
pub trait ContainerDom: Send + Sync {
    /// Immediate lookup. `None` when the element is not attached yet.
    async fn find_element(&self, id: &str) -> Option<ElementRef>;

    /// Detaches every node whose class name starts with `prefix` and
    /// returns how many were removed.
    async fn detach_class_prefix(&self, prefix: &str) -> usize;
}

/// Animation-frame pacing for readiness polling.
#[async_trait]
pub trait FrameClock: Send + Sync {
    async fn next_frame(&self);
}

/// Production clock: one frame per fixed interval.
#[derive(Debug, Clone)]
pub struct IntervalClock {
    interval: Duration,
}

impl IntervalClock {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl FrameClock for IntervalClock {
    async fn next_frame(&self) {
        tokio::time::sleep(self.interval).await;
    }
}

/// Polls for `id` once per frame until it appears. The wait is bounded:
/// a container that never shows up yields an error instead of pending
/// forever, and cancellation is honored between frames.
pub async fn resolve_element<D, C>(
    dom: &D,
    clock: &C,
    id: &str,
    wait: Duration,
    cancel: &CancellationToken,
) -> Result<ElementRef, RunaError>
where
    D: ContainerDom + ?Sized,
    C: FrameClock + ?Sized,
{
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        if let Some(element) = dom.find_element(id).await {
            return Ok(element);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(RunaError::ContainerUnresolved(id.to_string()));
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunaError::Cancelled),
            _ = clock.next_frame() => {}
        }
    }
}

#[derive(Debug, Default)]
struct DomState {
    nodes: Vec<DomNode>,
}

#[derive(Debug, Clone)]
struct DomNode {
    id: Option<String>,
    class: Option<String>,
}

/// Process-local document model backing the headless runtime and tests.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDom {
    inner: Arc<Mutex<DomState>>,
}

impl InMemoryDom {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, DomState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn attach_container(&self, id: impl Into<String>) {
        self.state().nodes.push(DomNode {
            id: Some(id.into()),
            class: None,
        });
    }

    pub fn attach_classed(&self, class: impl Into<String>) {
        self.state().nodes.push(DomNode {
            id: None,
            class: Some(class.into()),
        });
    }

    pub fn has_container(&self, id: &str) -> bool {
        self.state()
            .nodes
            .iter()
            .any(|node| node.id.as_deref() == Some(id))
    }

    pub fn sweep_class_prefix(&self, prefix: &str) -> usize {
        let mut state = self.state();
        let before = state.nodes.len();
        state.nodes.retain(|node| {
            node.class
                .as_deref()
                .map(|class| !class.starts_with(prefix))
                .unwrap_or(true)
        });
        before - state.nodes.len()
    }

    pub fn classed_count(&self, prefix: &str) -> usize {
        self.state()
            .nodes
            .iter()
            .filter(|node| {
                node.class
                    .as_deref()
                    .map(|class| class.starts_with(prefix))
                    .unwrap_or(false)
            })
            .count()
    }
}

#[async_trait]
impl ContainerDom for InMemoryDom {
    async fn find_element(&self, id: &str) -> Option<ElementRef> {
        self.has_container(id).then(|| ElementRef::new(id))
    }

    async fn detach_class_prefix(&self, prefix: &str) -> usize {
        self.sweep_class_prefix(prefix)
    }
}
