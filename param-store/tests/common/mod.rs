use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use param_store::{DataInterface, DataInterfaceHandle, ParameterStore, StoreOwner};

static INIT: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
#[allow(dead_code)]
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Color gradient interface used by the integration tests.
#[allow(dead_code)]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GradientInterface {
    pub stops: Vec<[f32; 4]>,
}

impl DataInterface for GradientInterface {
    fn type_name(&self) -> &str {
        "Gradient"
    }

    fn copy_to(&self, dest: &mut dyn DataInterface) -> bool {
        match dest.as_any_mut().downcast_mut::<GradientInterface>() {
            Some(dest) => {
                dest.stops = self.stops.clone();
                true
            }
            None => false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Owner counting how many interfaces it built.
#[allow(dead_code)]
#[derive(Default)]
pub struct GradientOwner {
    pub created: AtomicUsize,
}

impl StoreOwner for GradientOwner {
    fn create_interface(&self, type_name: &str) -> Option<DataInterfaceHandle> {
        if type_name != "Gradient" {
            return None;
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        Some(DataInterfaceHandle::new(GradientInterface::default()))
    }
}

/// Count change notifications on a store.
#[allow(dead_code)]
pub fn count_changes(store: &mut ParameterStore) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let c_hits = hits.clone();
    store.add_on_changed_handler(move || {
        c_hits.fetch_add(1, Ordering::Relaxed);
    });
    hits
}
