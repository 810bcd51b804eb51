//! Typed accessor for a single parameter on a hot path.

use std::cell::Cell;
use std::marker::PhantomData;

use bytemuck::Pod;

use crate::error::Result;
use crate::graph::{StoreGraph, StoreId};
use crate::store::ParameterStore;
use crate::types::VariableKey;

/// Typed handle to one value parameter of one store.
///
/// The offset is re-resolved from `(store, key)` on every access, so the
/// handle stays correct across add/remove/rename on the store. A parameter
/// that has gone away reads as `None` and ignores writes.
#[derive(Debug)]
pub struct DirectBinding<T> {
    store: StoreId,
    key: VariableKey,
    offset: Cell<Option<usize>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Pod> DirectBinding<T> {
    /// Fails when `T` does not match the key's size or the key is an interface.
    pub fn init(graph: &StoreGraph, store: StoreId, key: VariableKey) -> Result<Self> {
        key.check_size(std::mem::size_of::<T>())?;
        let offset = graph.store(store)?.index_of(&key);
        Ok(Self {
            store,
            key,
            offset: Cell::new(offset),
            _marker: PhantomData,
        })
    }

    fn resolve(&self, store: &ParameterStore) -> Option<usize> {
        let offset = store.index_of(&self.key);
        self.offset.set(offset);
        offset
    }

    pub fn get_value(&self, graph: &StoreGraph) -> Option<T> {
        let store = graph.get(self.store)?;
        let offset = self.resolve(store)?;
        store
            .parameter_data_at(offset, std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
    }

    /// Write through to the store, marking it dirty. Returns whether anything was written.
    pub fn set_value(&self, graph: &mut StoreGraph, value: T) -> bool {
        let Some(store) = graph.get_mut(self.store) else {
            return false;
        };
        let Some(offset) = self.resolve(store) else {
            return false;
        };
        store
            .set_parameter_data(bytemuck::bytes_of(&value), offset)
            .is_ok()
    }

    /// Offset seen by the last resolution.
    pub fn cached_offset(&self) -> Option<usize> {
        self.offset.get()
    }

    pub fn is_bound(&self, graph: &StoreGraph) -> bool {
        graph
            .get(self.store)
            .is_some_and(|store| store.contains(&self.key))
    }

    pub fn store(&self) -> StoreId {
        self.store
    }

    pub fn key(&self) -> &VariableKey {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::types::Variable;

    #[test]
    fn test_init_checks_size() {
        let mut graph = StoreGraph::new();
        let s = graph.create_store("S");
        let pos = VariableKey::vec3("Position");
        graph.add_parameter(s, &pos, false).unwrap();

        assert!(DirectBinding::<[f32; 3]>::init(&graph, s, pos.clone()).is_ok());
        assert!(matches!(
            DirectBinding::<f32>::init(&graph, s, pos),
            Err(StoreError::SizeMismatch { .. })
        ));
        assert!(matches!(
            DirectBinding::<u32>::init(&graph, s, VariableKey::interface("Curve", "c")),
            Err(StoreError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_get_set() {
        let mut graph = StoreGraph::new();
        let s = graph.create_store("S");
        let count = VariableKey::int("Count");
        graph
            .add_parameter(s, Variable::with_value(count.clone(), 7i32).unwrap(), false)
            .unwrap();
        let direct = DirectBinding::<i32>::init(&graph, s, count).unwrap();

        assert_eq!(direct.get_value(&graph), Some(7));
        assert!(direct.set_value(&mut graph, 11));
        assert_eq!(direct.get_value(&graph), Some(11));
        assert!(graph.store(s).unwrap().parameters_dirty());
    }

    #[test]
    fn test_missing_parameter_and_store() {
        let mut graph = StoreGraph::new();
        let s = graph.create_store("S");
        let direct = DirectBinding::<f32>::init(&graph, s, VariableKey::float("Later")).unwrap();
        assert_eq!(direct.cached_offset(), None);
        assert_eq!(direct.get_value(&graph), None);
        assert!(!direct.set_value(&mut graph, 1.0));

        graph.add_parameter(s, direct.key(), false).unwrap();
        assert!(direct.is_bound(&graph));
        assert!(direct.set_value(&mut graph, 2.0));
        assert_eq!(direct.get_value(&graph), Some(2.0));

        graph.destroy_store(s);
        assert!(!direct.is_bound(&graph));
        assert_eq!(direct.get_value(&graph), None);
    }
}
