//! Packed parameter storage.
//!
//! `ParameterStore` keeps every value parameter in one contiguous byte buffer
//! and every data interface parameter in a handle table. A name-to-offset
//! index maps each [`VariableKey`] to its byte offset or table index; which of
//! the two is decided by the key's [`SlotKind`].
//!
//! Structural changes (add, remove, rename) are crate-private and reached
//! through [`StoreGraph`](crate::graph::StoreGraph), which recompiles the
//! bindings attached to the store afterwards. Value accessors are public.

use std::fmt::Write as _;
use std::ops::Range;
use std::sync::{Arc, Weak};

use bytemuck::Pod;
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, error, warn};

use crate::binding::Binding;
use crate::error::{Result, StoreError};
use crate::event::{ChangeNotifier, ObserverId};
use crate::graph::StoreId;
use crate::interface::{DataInterfaceHandle, StoreOwner};
use crate::types::{Primitive, SlotKind, TypeDef, Variable, VariableKey};

/// What a [`ParameterStore::copy_parameters_to`] call changed on the destination.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CopyOutcome {
    pub added: bool,
    pub values_written: bool,
    pub interfaces_written: bool,
}

/// Typed parameter store with a packed byte layout.
#[derive(Debug)]
pub struct ParameterStore {
    id: StoreId,
    name: String,
    owner: Option<Weak<dyn StoreOwner>>,
    /// Iteration order equals layout order within each slot kind.
    offsets: IndexMap<VariableKey, usize>,
    data: Vec<u8>,
    interfaces: Vec<Option<DataInterfaceHandle>>,
    /// Outgoing bindings keyed by destination, in creation order.
    pub(crate) bindings: IndexMap<StoreId, Binding>,
    /// Stores holding a binding whose destination is this store.
    pub(crate) source_stores: IndexSet<StoreId>,
    parameters_dirty: bool,
    interfaces_dirty: bool,
    notifier: ChangeNotifier,
}

impl ParameterStore {
    pub(crate) fn new(id: StoreId, name: String, owner: Option<Weak<dyn StoreOwner>>) -> Self {
        Self {
            id,
            name,
            owner,
            offsets: IndexMap::new(),
            data: Vec::new(),
            interfaces: Vec::new(),
            bindings: IndexMap::new(),
            source_stores: IndexSet::new(),
            parameters_dirty: false,
            interfaces_dirty: false,
            notifier: ChangeNotifier::new(),
        }
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owner, if it is still alive.
    pub fn owner(&self) -> Option<Arc<dyn StoreOwner>> {
        self.owner.as_ref()?.upgrade()
    }

    // ── Layout ──────────────────────────────────────────────────────────────

    /// Append a slot for `var`. Returns `false` if the key already exists.
    pub(crate) fn add_parameter(&mut self, var: &Variable, initialize_interface: bool) -> bool {
        if self.offsets.contains_key(&var.key) {
            return false;
        }

        match var.key.slot_kind() {
            SlotKind::Interface => {
                let handle = if initialize_interface {
                    self.create_interface(&var.key)
                } else {
                    None
                };
                let index = self.interfaces.len();
                self.interfaces.push(handle);
                self.offsets.insert(var.key.clone(), index);
            }
            SlotKind::Bytes(size) => {
                let offset = self.data.len();
                self.data.resize(offset + size, 0);
                if let Some(bytes) = var.data() {
                    self.data[offset..offset + size].copy_from_slice(bytes);
                }
                self.offsets.insert(var.key.clone(), offset);
            }
        }
        true
    }

    pub(crate) fn remove_parameter(&mut self, key: &VariableKey) -> bool {
        if !self.offsets.contains_key(key) {
            return false;
        }
        self.retain_parameters(|k| k != key) > 0
    }

    /// Rebuild the layout keeping only the keys accepted by `keep`.
    ///
    /// Remaining slots are re-packed contiguously in their previous relative
    /// order. O(n) in the number of parameters. Returns how many were removed.
    pub(crate) fn retain_parameters(&mut self, keep: impl Fn(&VariableKey) -> bool) -> usize {
        let before = self.offsets.len();
        let old_offsets = std::mem::take(&mut self.offsets);
        let old_data = std::mem::take(&mut self.data);
        let old_interfaces = std::mem::take(&mut self.interfaces);

        let mut last_byte_offset = None;
        let mut last_interface_index = None;
        for (key, offset) in old_offsets {
            let last = match key.slot_kind() {
                SlotKind::Bytes(_) => &mut last_byte_offset,
                SlotKind::Interface => &mut last_interface_index,
            };
            debug_assert!(
                last.is_none_or(|prev| prev < offset),
                "parameter index out of layout order at '{}'",
                key
            );
            *last = Some(offset);

            if !keep(&key) {
                continue;
            }

            match key.slot_kind() {
                SlotKind::Bytes(size) => {
                    let new_offset = self.data.len();
                    self.data.extend_from_slice(&old_data[offset..offset + size]);
                    self.offsets.insert(key, new_offset);
                }
                SlotKind::Interface => {
                    let new_index = self.interfaces.len();
                    self.interfaces.push(old_interfaces[offset].clone());
                    self.offsets.insert(key, new_index);
                }
            }
        }

        before - self.offsets.len()
    }

    /// Move `key`'s slot to `new_name`. Returns `false` if `key` is absent or
    /// the name is unchanged.
    pub(crate) fn rename_parameter(&mut self, key: &VariableKey, new_name: &str) -> bool {
        let Some(old_offset) = self.index_of(key) else {
            return false;
        };
        if key.name() == new_name {
            return false;
        }

        let new_key = key.renamed(new_name);
        self.add_parameter(&Variable::from(&new_key), false);
        let Some(new_offset) = self.index_of(&new_key) else {
            return false;
        };

        match key.slot_kind() {
            SlotKind::Bytes(size) => {
                self.data
                    .copy_within(old_offset..old_offset + size, new_offset);
            }
            SlotKind::Interface => {
                let handle = self.interfaces[old_offset].take();
                self.interfaces[new_offset] = handle;
            }
        }

        self.remove_parameter(key);
        true
    }

    /// Remove every parameter. Returns `false` if the store was already empty.
    pub(crate) fn clear_parameters(&mut self) -> bool {
        if self.offsets.is_empty() {
            return false;
        }
        self.offsets.clear();
        self.data.clear();
        self.interfaces.clear();
        true
    }

    /// Copy every parameter of this store into `dest`.
    ///
    /// Missing keys are added to `dest`; unless `only_add` is set, values are
    /// written as well. Interface state is copied through the interface's own
    /// copy operation into an instance owned by `dest`.
    pub(crate) fn copy_parameters_to(&self, dest: &mut ParameterStore, only_add: bool) -> CopyOutcome {
        let mut outcome = CopyOutcome::default();

        for (key, &offset) in &self.offsets {
            if dest.add_parameter(&Variable::from(key), false) {
                outcome.added = true;
            }
            if only_add {
                continue;
            }
            let Some(dest_offset) = dest.index_of(key) else {
                continue;
            };

            match key.slot_kind() {
                SlotKind::Bytes(size) => {
                    let Some(bytes) = self.parameter_data_at(offset, size) else {
                        error!(store = %self.id, parameter = %key, "parameter slot outside buffer");
                        continue;
                    };
                    if dest.write_parameter_data(bytes, dest_offset).is_ok() {
                        outcome.values_written = true;
                    }
                }
                SlotKind::Interface => {
                    let Some(src_handle) = self.data_interface_at(offset) else {
                        continue;
                    };
                    let dest_handle = match dest.data_interface_at(dest_offset) {
                        Some(handle) => handle.clone(),
                        None => match dest.create_interface(key) {
                            Some(handle) => {
                                dest.interfaces[dest_offset] = Some(handle.clone());
                                handle
                            }
                            None => {
                                warn!(
                                    store = %dest.id,
                                    parameter = %key,
                                    "no owner factory to create data interface copy"
                                );
                                continue;
                            }
                        },
                    };
                    if src_handle.copy_to(&dest_handle) {
                        outcome.interfaces_written = true;
                    } else {
                        warn!(
                            parameter = %key,
                            src = %src_handle.type_name(),
                            dest = %dest_handle.type_name(),
                            "incompatible data interface copy"
                        );
                    }
                }
            }
        }

        if outcome.values_written {
            dest.parameters_dirty = true;
        }
        if outcome.interfaces_written {
            dest.interfaces_dirty = true;
        }
        outcome
    }

    fn create_interface(&self, key: &VariableKey) -> Option<DataInterfaceHandle> {
        let type_name = key.type_def().interface_type_name()?;
        let Some(owner) = self.owner() else {
            debug!(store = %self.id, parameter = %key, "no live owner, interface left unset");
            return None;
        };
        owner.create_interface(type_name)
    }

    // ── Lookup ──────────────────────────────────────────────────────────────

    /// Byte offset (value keys) or table index (interface keys) of `key`.
    pub fn index_of(&self, key: &VariableKey) -> Option<usize> {
        self.offsets.get(key).copied()
    }

    pub fn contains(&self, key: &VariableKey) -> bool {
        self.offsets.contains_key(key)
    }

    pub fn num_parameters(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// All keys with their offsets, in layout order.
    pub fn parameters(&self) -> impl Iterator<Item = (&VariableKey, usize)> + '_ {
        self.offsets.iter().map(|(key, offset)| (key, *offset))
    }

    fn value_range(&self, key: &VariableKey) -> Option<Range<usize>> {
        match key.slot_kind() {
            SlotKind::Bytes(size) => self.offsets.get(key).map(|&offset| offset..offset + size),
            SlotKind::Interface => None,
        }
    }

    /// Bytes of a value parameter.
    pub fn parameter_data(&self, key: &VariableKey) -> Option<&[u8]> {
        self.data.get(self.value_range(key)?)
    }

    /// Checked view of `size` bytes at `offset`.
    pub fn parameter_data_at(&self, offset: usize, size: usize) -> Option<&[u8]> {
        self.data.get(offset..offset.checked_add(size)?)
    }

    pub fn data_interface(&self, key: &VariableKey) -> Option<&DataInterfaceHandle> {
        if !key.is_data_interface() {
            return None;
        }
        self.data_interface_at(self.index_of(key)?)
    }

    pub fn data_interface_at(&self, index: usize) -> Option<&DataInterfaceHandle> {
        self.interfaces.get(index)?.as_ref()
    }

    /// The whole packed buffer, for read-only snapshots.
    pub fn parameter_data_array(&self) -> &[u8] {
        &self.data
    }

    pub fn data_interfaces(&self) -> &[Option<DataInterfaceHandle>] {
        &self.interfaces
    }

    /// Key of the interface parameter currently holding `handle`.
    pub fn find_interface_variable(&self, handle: &DataInterfaceHandle) -> Option<&VariableKey> {
        self.offsets
            .iter()
            .filter(|(key, _)| key.is_data_interface())
            .find(|(_, index)| {
                self.data_interface_at(**index)
                    .is_some_and(|candidate| candidate.ptr_eq(handle))
            })
            .map(|(key, _)| key)
    }

    /// Typed read. `Ok(None)` when the key is absent; an error when
    /// `size_of::<T>()` disagrees with the key.
    pub fn get_parameter_value<T: Pod>(&self, key: &VariableKey) -> Result<Option<T>> {
        key.check_size(std::mem::size_of::<T>())?;
        Ok(self.parameter_data(key).map(bytemuck::pod_read_unaligned))
    }

    // ── Mutation ────────────────────────────────────────────────────────────

    /// Raw write of `bytes` at `offset`, without dirty marking or notification.
    pub(crate) fn write_parameter_data(&mut self, bytes: &[u8], offset: usize) -> Result<()> {
        let len = self.data.len();
        let dest = offset
            .checked_add(bytes.len())
            .and_then(|end| self.data.get_mut(offset..end))
            .ok_or(StoreError::OutOfBounds {
                offset,
                size: bytes.len(),
                len,
            })?;
        dest.copy_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn write_interface_slot(
        &mut self,
        index: usize,
        handle: Option<DataInterfaceHandle>,
    ) -> Result<()> {
        let len = self.interfaces.len();
        let slot = self
            .interfaces
            .get_mut(index)
            .ok_or(StoreError::OutOfBounds {
                offset: index,
                size: 1,
                len,
            })?;
        *slot = handle;
        Ok(())
    }

    pub(crate) fn interface_slot(&self, index: usize) -> Option<&Option<DataInterfaceHandle>> {
        self.interfaces.get(index)
    }

    /// Write raw bytes at a byte offset.
    pub fn set_parameter_data(&mut self, bytes: &[u8], offset: usize) -> Result<()> {
        self.write_parameter_data(bytes, offset)?;
        self.on_parameter_change();
        Ok(())
    }

    /// Write raw bytes into `key`'s slot. `Ok(false)` when the key is absent.
    pub fn set_parameter_data_by_key(&mut self, key: &VariableKey, bytes: &[u8]) -> Result<bool> {
        key.check_size(bytes.len())?;
        let Some(offset) = self.index_of(key) else {
            return Ok(false);
        };
        self.set_parameter_data(bytes, offset)?;
        Ok(true)
    }

    /// Typed write. `Ok(false)` when the key is absent.
    pub fn set_parameter_value<T: Pod>(&mut self, key: &VariableKey, value: T) -> Result<bool> {
        self.set_parameter_data_by_key(key, bytemuck::bytes_of(&value))
    }

    pub fn set_data_interface(
        &mut self,
        handle: Option<DataInterfaceHandle>,
        index: usize,
    ) -> Result<()> {
        self.write_interface_slot(index, handle)?;
        self.on_interface_change();
        Ok(())
    }

    /// Replace the handle stored under `key`. `Ok(false)` when the key is absent.
    pub fn set_data_interface_by_key(
        &mut self,
        key: &VariableKey,
        handle: Option<DataInterfaceHandle>,
    ) -> Result<bool> {
        if !key.is_data_interface() {
            return Err(StoreError::KindMismatch {
                parameter: key.name().to_string(),
                expected: "data interface".to_string(),
            });
        }
        let Some(index) = self.index_of(key) else {
            return Ok(false);
        };
        self.set_data_interface(handle, index)?;
        Ok(true)
    }

    // ── Dirty state and notification ────────────────────────────────────────

    pub fn parameters_dirty(&self) -> bool {
        self.parameters_dirty
    }

    pub fn interfaces_dirty(&self) -> bool {
        self.interfaces_dirty
    }

    pub fn mark_parameters_dirty(&mut self) {
        self.parameters_dirty = true;
    }

    pub fn mark_interfaces_dirty(&mut self) {
        self.interfaces_dirty = true;
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.parameters_dirty = false;
        self.interfaces_dirty = false;
    }

    fn on_parameter_change(&mut self) {
        self.parameters_dirty = true;
        self.notifier.notify();
    }

    fn on_interface_change(&mut self) {
        self.interfaces_dirty = true;
        self.notifier.notify();
    }

    pub(crate) fn notify_changed(&self) {
        self.notifier.notify();
    }

    /// Register a callback fired after every layout or value change.
    pub fn add_on_changed_handler<F>(&mut self, callback: F) -> ObserverId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.notifier.subscribe(callback)
    }

    pub fn remove_on_changed_handler(&mut self, id: ObserverId) -> bool {
        self.notifier.unsubscribe(id)
    }

    // ── Bindings ────────────────────────────────────────────────────────────

    /// Stores currently bound into this one.
    pub fn source_stores(&self) -> impl Iterator<Item = StoreId> + '_ {
        self.source_stores.iter().copied()
    }

    /// Destinations of this store's bindings, in creation order.
    pub fn bound_stores(&self) -> impl Iterator<Item = StoreId> + '_ {
        self.bindings.keys().copied()
    }

    pub fn binding(&self, dest: StoreId) -> Option<&Binding> {
        self.bindings.get(&dest)
    }

    pub fn is_bound_to(&self, dest: StoreId) -> bool {
        self.bindings.contains_key(&dest)
    }

    // ── Debug ───────────────────────────────────────────────────────────────

    /// Human-readable listing of keys, offsets and current values.
    pub fn dump_parameters(&self, dump_bindings: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Store '{}' {}: {} parameters, {} bytes, {} interfaces",
            self.name,
            self.id,
            self.offsets.len(),
            self.data.len(),
            self.interfaces.len()
        );

        for (key, &offset) in &self.offsets {
            match key.slot_kind() {
                SlotKind::Bytes(size) => {
                    let value = self
                        .parameter_data_at(offset, size)
                        .map(|bytes| format_value(key.type_def(), bytes))
                        .unwrap_or_else(|| "<out of bounds>".to_string());
                    let _ = writeln!(out, "  @{:<5} {} = {}", offset, key, value);
                }
                SlotKind::Interface => {
                    let value = self
                        .data_interface_at(offset)
                        .map(|handle| handle.type_name())
                        .unwrap_or_else(|| "null".to_string());
                    let _ = writeln!(out, "  #{:<5} {} -> {}", offset, key, value);
                }
            }
        }

        if dump_bindings {
            for (dest, binding) in &self.bindings {
                let _ = writeln!(
                    out,
                    "  binding -> {}: {} values, {} interfaces",
                    dest,
                    binding.parameter_bindings().len(),
                    binding.interface_bindings().len()
                );
                for entry in binding.parameter_bindings() {
                    let _ = writeln!(
                        out,
                        "    {} -> {} ({} bytes)",
                        entry.src_offset, entry.dest_offset, entry.size
                    );
                }
                for entry in binding.interface_bindings() {
                    let _ = writeln!(out, "    #{} -> #{}", entry.src_index, entry.dest_index);
                }
            }
            for src in &self.source_stores {
                let _ = writeln!(out, "  bound from {}", src);
            }
        }

        out
    }
}

fn format_value(type_def: &TypeDef, bytes: &[u8]) -> String {
    let floats = || {
        bytes
            .chunks_exact(4)
            .map(|c| bytemuck::pod_read_unaligned::<f32>(c).to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    match type_def {
        TypeDef::Primitive(Primitive::Bool) => {
            (bytemuck::pod_read_unaligned::<u32>(bytes) != 0).to_string()
        }
        TypeDef::Primitive(Primitive::Int) => {
            bytemuck::pod_read_unaligned::<i32>(bytes).to_string()
        }
        TypeDef::Primitive(Primitive::Float) => floats(),
        TypeDef::Primitive(_) => format!("({})", floats()),
        _ => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
    }
}
