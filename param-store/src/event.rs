//! Change notification for stores.
//!
//! Observers get no payload; they re-query the store they subscribed to.

use std::fmt;

use slab::Slab;

/// Callback fired after a layout or value change. Carries no payload;
/// observers re-query the store.
pub type ChangeCallback = Box<dyn Fn() + Send + Sync>;

/// Registration handle returned by [`ChangeNotifier::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(usize);

/// Observer list attached to every store. Empty unless tooling subscribes.
#[derive(Default)]
pub struct ChangeNotifier {
    callbacks: Slab<ChangeCallback>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, callback: F) -> ObserverId
    where
        F: Fn() + Send + Sync + 'static,
    {
        ObserverId(self.callbacks.insert(Box::new(callback)))
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.callbacks.try_remove(id.0).is_some()
    }

    pub fn notify(&self) {
        for (_, callback) in self.callbacks.iter() {
            callback();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("observers", &self.callbacks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribe_notify_unsubscribe() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut notifier = ChangeNotifier::new();
        assert!(notifier.is_empty());

        let c_hits = hits.clone();
        let id = notifier.subscribe(move || {
            c_hits.fetch_add(1, Ordering::Relaxed);
        });
        notifier.notify();
        notifier.notify();
        assert_eq!(hits.load(Ordering::Relaxed), 2);
        assert_eq!(format!("{:?}", notifier), "ChangeNotifier { observers: 1 }");

        assert!(notifier.unsubscribe(id));
        assert!(!notifier.unsubscribe(id));
        notifier.notify();
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }
}
