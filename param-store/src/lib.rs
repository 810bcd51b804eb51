//! Typed parameter stores with cross-store binding propagation.
//!
//! A [`ParameterStore`] packs named values into one contiguous byte buffer
//! plus a table of data interface handles. Stores live in a [`StoreGraph`],
//! where one store can be bound into any number of others; once per tick a
//! dirty source copies the parameters it shares with each destination.
//!
//! ```
//! use param_store::{StoreGraph, Variable, VariableKey};
//!
//! let mut graph = StoreGraph::new();
//! let speed = VariableKey::float("Speed");
//! let system = graph.create_store("system");
//! let emitter = graph.create_store("emitter");
//! graph.add_parameter(system, Variable::with_value(speed.clone(), 3.0f32)?, false)?;
//! graph.add_parameter(emitter, &speed, false)?;
//!
//! graph.bind(system, emitter)?;
//! let value = graph.store(emitter)?.get_parameter_value::<f32>(&speed)?;
//! assert_eq!(value, Some(3.0));
//! # Ok::<(), param_store::StoreError>(())
//! ```

pub mod binding;
pub mod config;
pub mod direct;
pub mod error;
pub mod event;
pub mod graph;
pub mod interface;
pub mod store;
pub mod types;

pub use binding::{Binding, BindingEntry, BindingMismatch, InterfaceBinding, ParameterBinding};
pub use config::{StoreConfig, StoreGraphBuilder};
pub use direct::DirectBinding;
pub use error::{Result, StoreError};
pub use event::ObserverId;
pub use graph::{StoreGraph, StoreId};
pub use interface::{DataInterface, DataInterfaceHandle, StoreOwner};
pub use store::ParameterStore;
pub use types::{Primitive, SlotKind, StoreBool, TypeDef, Variable, VariableKey};

pub trait Builder {
    type Output;
    fn build(self) -> Result<Self::Output>;
}
