use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::dom::{ElementRef, InMemoryDom};
use crate::domain::{Bounds, Coordinate};
use crate::error::RunaError;
use crate::map::{FitOptions, MapConfig, MapRuntime, MapWidget};

/// Class prefix the headless engine stamps on the nodes it attaches.
pub const HEADLESS_CLASS_PREFIX: &str = "runamap";

/// Everything one mount observed. Kept alive by the runtime so the
/// lifecycle remains inspectable after the widget itself is gone.
#[derive(Debug, Clone)]
pub struct MountRecord {
    pub container: String,
    pub token: String,
    pub config: MapConfig,
    pub markers: Vec<Coordinate>,
    pub fitted: Option<(Bounds, FitOptions)>,
    pub torn_down: bool,
}

/// In-process map engine. Mounts attach class-stamped nodes to the
/// shared [`InMemoryDom`] exactly like a browser engine would, which
/// lets the teardown sweep be observed for real. The `leaky` variant
/// skips its own node cleanup to exercise the sweep fallback.
#[derive(Clone)]
pub struct HeadlessRuntime {
    dom: InMemoryDom,
    leak_on_teardown: bool,
    mounts: Arc<Mutex<Vec<Arc<Mutex<MountRecord>>>>>,
}

impl HeadlessRuntime {
    pub fn new(dom: InMemoryDom) -> Self {
        Self {
            dom,
            leak_on_teardown: false,
            mounts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn leaky(dom: InMemoryDom) -> Self {
        Self {
            leak_on_teardown: true,
            ..Self::new(dom)
        }
    }

    fn mount_list(&self) -> MutexGuard<'_, Vec<Arc<Mutex<MountRecord>>>> {
        match self.mounts.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn mount_count(&self) -> usize {
        self.mount_list().len()
    }

    /// Snapshot of every mount, oldest first.
    pub fn mount_records(&self) -> Vec<MountRecord> {
        self.mount_list()
            .iter()
            .map(|record| lock_record(record).clone())
            .collect()
    }

    pub fn live_mounts(&self) -> usize {
        self.mount_list()
            .iter()
            .filter(|record| !lock_record(record).torn_down)
            .count()
    }
}

fn lock_record(record: &Arc<Mutex<MountRecord>>) -> MutexGuard<'_, MountRecord> {
    match record.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug)]
pub struct HeadlessWidget {
    dom: InMemoryDom,
    record: Arc<Mutex<MountRecord>>,
    leak_on_teardown: bool,
}

#[async_trait]
impl MapRuntime for HeadlessRuntime {
    type Widget = HeadlessWidget;

    fn residue_class_prefix(&self) -> &str {
        HEADLESS_CLASS_PREFIX
    }

    async fn mount(
        &self,
        element: &ElementRef,
        access_token: &str,
        config: &MapConfig,
    ) -> Result<Self::Widget, RunaError> {
        if !self.dom.has_container(element.id()) {
            return Err(RunaError::MapRuntime(format!(
                "container {} is not attached",
                element.id()
            )));
        }

        self.dom
            .attach_classed(format!("{HEADLESS_CLASS_PREFIX}-canvas"));
        let record = Arc::new(Mutex::new(MountRecord {
            container: element.id().to_string(),
            token: access_token.to_string(),
            config: config.clone(),
            markers: Vec::new(),
            fitted: None,
            torn_down: false,
        }));
        self.mount_list().push(Arc::clone(&record));

        Ok(HeadlessWidget {
            dom: self.dom.clone(),
            record,
            leak_on_teardown: self.leak_on_teardown,
        })
    }
}

#[async_trait]
impl MapWidget for HeadlessWidget {
    async fn add_marker(&mut self, coordinate: Coordinate) -> Result<(), RunaError> {
        self.dom
            .attach_classed(format!("{HEADLESS_CLASS_PREFIX}-marker"));
        lock_record(&self.record).markers.push(coordinate);
        Ok(())
    }

    async fn fit_bounds(&mut self, bounds: Bounds, options: FitOptions) -> Result<(), RunaError> {
        lock_record(&self.record).fitted = Some((bounds, options));
        Ok(())
    }

    async fn teardown(self) -> Result<(), RunaError> {
        lock_record(&self.record).torn_down = true;
        if !self.leak_on_teardown {
            self.dom.sweep_class_prefix(HEADLESS_CLASS_PREFIX);
        }
        Ok(())
    }
}
