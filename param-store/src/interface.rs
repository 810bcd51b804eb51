//! Data interface handles and the owner factory.
//!
//! Data interfaces are opaque reference-type objects defined outside this
//! crate. A store only keeps shared handles to them; after propagation the
//! same instance may be referenced by several stores. Their lifetime belongs
//! to whoever created them.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Capability implemented by every data interface type.
pub trait DataInterface: Any + Send + Sync {
    /// Class name, matching [`TypeDef::DataInterface`](crate::types::TypeDef).
    fn type_name(&self) -> &str;

    /// Copy this instance's state into `dest`.
    ///
    /// Returns `false` when `dest` is of an incompatible type.
    fn copy_to(&self, dest: &mut dyn DataInterface) -> bool;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Shared handle to a data interface instance.
#[derive(Clone)]
pub struct DataInterfaceHandle(Arc<RwLock<dyn DataInterface>>);

impl DataInterfaceHandle {
    pub fn new<T: DataInterface>(instance: T) -> Self {
        let shared: Arc<RwLock<dyn DataInterface>> = Arc::new(RwLock::new(instance));
        Self(shared)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, dyn DataInterface> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, dyn DataInterface> {
        self.0.write()
    }

    /// True when both handles reference the same instance.
    pub fn ptr_eq(&self, other: &DataInterfaceHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn type_name(&self) -> String {
        self.read().type_name().to_string()
    }

    /// Copy this instance's state into `dest` through the interface's own
    /// copy operation. Copying an instance onto itself is a no-op.
    pub fn copy_to(&self, dest: &DataInterfaceHandle) -> bool {
        if self.ptr_eq(dest) {
            return true;
        }
        let src = self.read();
        let mut dst = dest.write();
        src.copy_to(&mut *dst)
    }

    /// Run `f` against the concrete instance if it is a `T`.
    pub fn with<T: DataInterface, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.read();
        guard.as_any().downcast_ref::<T>().map(f)
    }

    /// Mutable variant of [`with`](Self::with).
    pub fn with_mut<T: DataInterface, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.write();
        guard.as_any_mut().downcast_mut::<T>().map(f)
    }
}

impl fmt::Debug for DataInterfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataInterfaceHandle")
            .field("type_name", &self.type_name())
            .field("ptr", &Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// The outer object a store belongs to.
///
/// Stores hold only a weak reference to their owner and use it for one
/// thing: building default data interface instances.
pub trait StoreOwner: Send + Sync {
    fn create_interface(&self, type_name: &str) -> Option<DataInterfaceHandle>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Minimal interface used across the crate's unit tests.
    #[derive(Debug, Default, Clone, PartialEq)]
    pub struct CurveInterface {
        pub keys: Vec<f32>,
    }

    impl DataInterface for CurveInterface {
        fn type_name(&self) -> &str {
            "Curve"
        }

        fn copy_to(&self, dest: &mut dyn DataInterface) -> bool {
            match dest.as_any_mut().downcast_mut::<CurveInterface>() {
                Some(dest) => {
                    dest.keys = self.keys.clone();
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

    /// Owner that knows how to build `Curve` interfaces.
    pub struct CurveOwner;

    impl StoreOwner for CurveOwner {
        fn create_interface(&self, type_name: &str) -> Option<DataInterfaceHandle> {
            (type_name == "Curve").then(|| DataInterfaceHandle::new(CurveInterface::default()))
        }
    }
}
