//! Compiled copy plans between two stores.
//!
//! A [`Binding`] lives in its source store's binding map, keyed by the
//! destination. Its two tables are a pure function of both stores' current
//! offsets: they are rebuilt from scratch whenever either side's layout
//! changes and never patched in place.

use std::fmt;

use tracing::{debug, error};

use crate::graph::StoreId;
use crate::store::ParameterStore;
use crate::types::{SlotKind, VariableKey};

/// One value copy: `size` bytes from `src_offset` to `dest_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterBinding {
    pub src_offset: usize,
    pub dest_offset: usize,
    pub size: usize,
}

/// One handle copy between interface tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceBinding {
    pub src_index: usize,
    pub dest_index: usize,
}

/// A single compiled entry of either table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingEntry {
    Value(ParameterBinding),
    Interface(InterfaceBinding),
}

impl BindingEntry {
    fn dest_slot(&self) -> (bool, usize) {
        match self {
            BindingEntry::Value(b) => (false, b.dest_offset),
            BindingEntry::Interface(b) => (true, b.dest_index),
        }
    }
}

impl fmt::Display for BindingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingEntry::Value(b) => {
                write!(f, "{} -> {} ({} bytes)", b.src_offset, b.dest_offset, b.size)
            }
            BindingEntry::Interface(b) => write!(f, "#{} -> #{}", b.src_index, b.dest_index),
        }
    }
}

/// Disagreement between a compiled binding and the stores' current layouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingMismatch {
    /// The key exists in both stores but nothing copies it.
    Missing {
        key: VariableKey,
        expected: BindingEntry,
    },
    /// The destination slot is targeted from the wrong place or with the wrong size.
    Mismatched {
        key: VariableKey,
        expected: BindingEntry,
        found: BindingEntry,
    },
    /// A compiled entry that no shared key accounts for.
    Stale { found: BindingEntry },
}

impl fmt::Display for BindingMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingMismatch::Missing { key, expected } => {
                write!(f, "missing entry for {}: expected {}", key, expected)
            }
            BindingMismatch::Mismatched {
                key,
                expected,
                found,
            } => write!(f, "wrong entry for {}: expected {}, found {}", key, expected, found),
            BindingMismatch::Stale { found } => write!(f, "stale entry {}", found),
        }
    }
}

/// Copy plan from one source store into one destination store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    parameter_bindings: Vec<ParameterBinding>,
    interface_bindings: Vec<InterfaceBinding>,
}

/// Entries for every key present in both stores, in destination layout order.
fn shared_entries<'a>(
    dest: &'a ParameterStore,
    src: &'a ParameterStore,
) -> impl Iterator<Item = (&'a VariableKey, BindingEntry)> + 'a {
    dest.parameters().filter_map(move |(key, dest_offset)| {
        let src_offset = src.index_of(key)?;
        let entry = match key.slot_kind() {
            SlotKind::Bytes(size) => BindingEntry::Value(ParameterBinding {
                src_offset,
                dest_offset,
                size,
            }),
            SlotKind::Interface => BindingEntry::Interface(InterfaceBinding {
                src_index: src_offset,
                dest_index: dest_offset,
            }),
        };
        Some((key, entry))
    })
}

impl Binding {
    /// Register `src` as a source of `dest`, compile, and prime `dest`.
    pub(crate) fn initialize(dest: &mut ParameterStore, src: &ParameterStore) -> Binding {
        dest.source_stores.insert(src.id());
        let mut binding = Binding::default();
        binding.bind_parameters(dest, src);
        binding
    }

    /// Recompile both tables from the stores' offsets, then force one tick.
    pub(crate) fn bind_parameters(&mut self, dest: &mut ParameterStore, src: &ParameterStore) {
        self.parameter_bindings.clear();
        self.interface_bindings.clear();

        for (_, entry) in shared_entries(dest, src) {
            match entry {
                BindingEntry::Value(b) => self.parameter_bindings.push(b),
                BindingEntry::Interface(b) => self.interface_bindings.push(b),
            }
        }

        debug!(
            src = %src.id(),
            dest = %dest.id(),
            values = self.parameter_bindings.len(),
            interfaces = self.interface_bindings.len(),
            "compiled binding"
        );

        self.tick(dest, src, true);
    }

    /// Copy from `src` into `dest`.
    ///
    /// The value half runs when `force` is set or `src` has dirty parameters,
    /// the interface half when `force` is set or `src` has dirty interfaces.
    pub(crate) fn tick(&self, dest: &mut ParameterStore, src: &ParameterStore, force: bool) {
        if force || src.parameters_dirty() {
            let mut copied = false;
            for b in &self.parameter_bindings {
                let bytes = src.parameter_data_at(b.src_offset, b.size);
                debug_assert!(
                    bytes.is_some(),
                    "binding source range {}+{} outside store {}",
                    b.src_offset,
                    b.size,
                    src.id()
                );
                let Some(bytes) = bytes else {
                    error!(src = %src.id(), offset = b.src_offset, size = b.size, "binding source range out of bounds");
                    continue;
                };
                let written = dest.write_parameter_data(bytes, b.dest_offset);
                debug_assert!(written.is_ok(), "binding destination range out of bounds");
                match written {
                    Ok(()) => copied = true,
                    Err(e) => error!(dest = %dest.id(), "{}", e),
                }
            }
            dest.mark_parameters_dirty();
            if copied {
                dest.notify_changed();
            }
        }

        if force || src.interfaces_dirty() {
            let mut copied = false;
            for b in &self.interface_bindings {
                let handle = src.interface_slot(b.src_index).cloned();
                debug_assert!(handle.is_some(), "binding source index {} outside store", b.src_index);
                let Some(handle) = handle else {
                    error!(src = %src.id(), index = b.src_index, "binding source index out of bounds");
                    continue;
                };
                let written = dest.write_interface_slot(b.dest_index, handle);
                debug_assert!(written.is_ok(), "binding destination index out of bounds");
                match written {
                    Ok(()) => copied = true,
                    Err(e) => error!(dest = %dest.id(), "{}", e),
                }
            }
            dest.mark_interfaces_dirty();
            if copied {
                dest.notify_changed();
            }
        }
    }

    /// Compare the compiled tables with what the current layouts would produce.
    pub fn verify(&self, dest: &ParameterStore, src: &ParameterStore) -> Vec<BindingMismatch> {
        let compiled: Vec<BindingEntry> = self
            .parameter_bindings
            .iter()
            .copied()
            .map(BindingEntry::Value)
            .chain(self.interface_bindings.iter().copied().map(BindingEntry::Interface))
            .collect();
        let mut matched = vec![false; compiled.len()];
        let mut mismatches = Vec::new();

        for (key, expected) in shared_entries(dest, src) {
            let found = compiled
                .iter()
                .position(|entry| entry.dest_slot() == expected.dest_slot());
            match found {
                Some(i) => {
                    matched[i] = true;
                    if compiled[i] != expected {
                        mismatches.push(BindingMismatch::Mismatched {
                            key: key.clone(),
                            expected,
                            found: compiled[i],
                        });
                    }
                }
                None => mismatches.push(BindingMismatch::Missing {
                    key: key.clone(),
                    expected,
                }),
            }
        }

        mismatches.extend(
            compiled
                .iter()
                .zip(&matched)
                .filter(|(_, matched)| !**matched)
                .map(|(found, _)| BindingMismatch::Stale { found: *found }),
        );
        mismatches
    }

    /// Detach from `dest` and drop both tables.
    pub(crate) fn empty(&mut self, dest: &mut ParameterStore, src: StoreId) {
        dest.source_stores.shift_remove(&src);
        self.parameter_bindings.clear();
        self.interface_bindings.clear();
    }

    pub fn parameter_bindings(&self) -> &[ParameterBinding] {
        &self.parameter_bindings
    }

    pub fn interface_bindings(&self) -> &[InterfaceBinding] {
        &self.interface_bindings
    }

    pub fn is_empty(&self) -> bool {
        self.parameter_bindings.is_empty() && self.interface_bindings.is_empty()
    }
}
