//! Store arena and the binding graph.
//!
//! Every [`ParameterStore`] lives in a [`StoreGraph`] and is addressed by a
//! [`StoreId`]. All cross-store references (binding keys and source sets) are
//! ids, never pointers, so destroying a store can never leave a dangling
//! reference behind: stale ids simply fail generation validation.
//!
//! ```text
//!   source ──Binding──▶ dest ──Binding──▶ dest'
//!     │  bindings[dest]    │ source_stores ∋ source
//!     └────────────────────┘
//! ```
//!
//! Layout-changing operations go through the graph so that every binding
//! sourced from or targeting the changed store is recompiled before the call
//! returns.

use std::fmt;
use std::sync::{Arc, Weak};

use bytemuck::Pod;
use slab::Slab;
use tracing::{debug, info, warn};

use crate::binding::Binding;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::interface::StoreOwner;
use crate::store::ParameterStore;
use crate::types::{Variable, VariableKey};

/// Generation-checked handle to a store inside a [`StoreGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId {
    index: usize,
    generation: u64,
}

impl StoreId {
    pub(crate) fn new(index: usize, generation: u64) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Arena owning every store and the bindings between them.
#[derive(Debug)]
pub struct StoreGraph {
    stores: Slab<ParameterStore>,
    next_generation: u64,
    config: StoreConfig,
}

impl Default for StoreGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreGraph {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            stores: Slab::with_capacity(config.store_capacity),
            next_generation: 1,
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut StoreConfig {
        &mut self.config
    }

    // ── Store lifecycle ─────────────────────────────────────────────────────

    pub fn create_store(&mut self, name: impl Into<String>) -> StoreId {
        self.insert_store(name.into(), None)
    }

    /// Create a store whose data interfaces are built by `owner`.
    ///
    /// Only a weak reference is kept.
    pub fn create_store_with_owner<O>(&mut self, name: impl Into<String>, owner: &Arc<O>) -> StoreId
    where
        O: StoreOwner + 'static,
    {
        let weak: Weak<dyn StoreOwner> = Arc::downgrade(owner) as Weak<dyn StoreOwner>;
        self.insert_store(name.into(), Some(weak))
    }

    fn insert_store(&mut self, name: String, owner: Option<Weak<dyn StoreOwner>>) -> StoreId {
        let generation = self.next_generation;
        self.next_generation += 1;

        let entry = self.stores.vacant_entry();
        let id = StoreId::new(entry.key(), generation);
        debug!(%id, name = %name, "created parameter store");
        entry.insert(ParameterStore::new(id, name, owner));
        id
    }

    /// Destroy a store, tearing down its bindings in both directions.
    ///
    /// Returns `false` for an already destroyed handle.
    pub fn destroy_store(&mut self, id: StoreId) -> bool {
        if !self.contains(id) {
            return false;
        }
        let mut store = self.stores.remove(id.index);

        // Release bindings sourced from this store.
        for (dest, mut binding) in std::mem::take(&mut store.bindings) {
            if let Some(d) = self.get_mut(dest) {
                binding.empty(d, id);
            }
        }
        // Drop bindings targeting this store from their sources.
        for src in std::mem::take(&mut store.source_stores) {
            if let Some(s) = self.get_mut(src) {
                s.bindings.shift_remove(&id);
            }
        }

        debug!(%id, name = %store.name(), "destroyed parameter store");
        true
    }

    pub fn contains(&self, id: StoreId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: StoreId) -> Option<&ParameterStore> {
        self.stores.get(id.index).filter(|s| s.id() == id)
    }

    pub fn get_mut(&mut self, id: StoreId) -> Option<&mut ParameterStore> {
        self.stores.get_mut(id.index).filter(|s| s.id() == id)
    }

    pub fn store(&self, id: StoreId) -> Result<&ParameterStore> {
        self.get(id).ok_or(StoreError::StoreNotFound(id))
    }

    pub fn store_mut(&mut self, id: StoreId) -> Result<&mut ParameterStore> {
        self.get_mut(id).ok_or(StoreError::StoreNotFound(id))
    }

    /// Two distinct live stores, borrowed mutably at once.
    fn pair_mut(
        &mut self,
        a: StoreId,
        b: StoreId,
    ) -> Result<(&mut ParameterStore, &mut ParameterStore)> {
        if a == b {
            return Err(StoreError::SelfBinding(a));
        }
        self.store(a)?;
        self.store(b)?;
        // Both ids are live and distinct, so their slots differ.
        self.stores
            .get2_mut(a.index, b.index)
            .ok_or(StoreError::StoreNotFound(a))
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = StoreId> + '_ {
        self.stores.iter().map(|(_, store)| store.id())
    }

    // ── Structural operations ───────────────────────────────────────────────

    /// Add a parameter. Returns `Ok(false)` if the key already exists.
    pub fn add_parameter(
        &mut self,
        id: StoreId,
        var: impl Into<Variable>,
        initialize_interface: bool,
    ) -> Result<bool> {
        let var = var.into();
        let added = self.store_mut(id)?.add_parameter(&var, initialize_interface);
        if added {
            self.on_layout_change(id)?;
        }
        Ok(added)
    }

    pub fn remove_parameter(&mut self, id: StoreId, key: &VariableKey) -> Result<bool> {
        let removed = self.store_mut(id)?.remove_parameter(key);
        if removed {
            self.on_layout_change(id)?;
        }
        Ok(removed)
    }

    /// Rename `key` keeping its type and value. A single layout change.
    pub fn rename_parameter(
        &mut self,
        id: StoreId,
        key: &VariableKey,
        new_name: &str,
    ) -> Result<bool> {
        let renamed = self.store_mut(id)?.rename_parameter(key, new_name);
        if renamed {
            debug!(%id, from = %key, to = new_name, "renamed parameter");
            self.on_layout_change(id)?;
        }
        Ok(renamed)
    }

    /// Remove every parameter from the store.
    pub fn reset_parameters(&mut self, id: StoreId) -> Result<bool> {
        let cleared = self.store_mut(id)?.clear_parameters();
        if cleared {
            self.on_layout_change(id)?;
        }
        Ok(cleared)
    }

    /// Typed set that adds `key` first when the store lacks it.
    pub fn set_or_add_parameter_value<T: Pod>(
        &mut self,
        id: StoreId,
        key: &VariableKey,
        value: T,
    ) -> Result<()> {
        key.check_size(std::mem::size_of::<T>())?;
        if !self.store(id)?.contains(key) {
            let var = Variable::with_value(key.clone(), value)?;
            self.store_mut(id)?.add_parameter(&var, false);
            self.on_layout_change(id)?;
        }
        self.store_mut(id)?.set_parameter_value(key, value)?;
        Ok(())
    }

    /// Copy every parameter of `src` into `dest`; see [`ParameterStore`] for
    /// the interface copy rules.
    pub fn copy_parameters_to(&mut self, src: StoreId, dest: StoreId, only_add: bool) -> Result<()> {
        let (s, d) = self.pair_mut(src, dest)?;
        let outcome = s.copy_parameters_to(d, only_add);
        if outcome.added {
            self.on_layout_change(dest)?;
        } else if outcome.values_written || outcome.interfaces_written {
            self.store(dest)?.notify_changed();
        }
        Ok(())
    }

    /// Remove every key of `src` from `dest`.
    pub fn remove_parameters(&mut self, src: StoreId, dest: StoreId) -> Result<bool> {
        let (s, d) = self.pair_mut(src, dest)?;
        let removed = d.retain_parameters(|key| !s.contains(key)) > 0;
        if removed {
            self.on_layout_change(dest)?;
        }
        Ok(removed)
    }

    // ── Bindings ────────────────────────────────────────────────────────────

    /// Bind `src` into `dest` and prime `dest` with one forced copy.
    ///
    /// Binding an already bound pair recompiles in place.
    pub fn bind(&mut self, src: StoreId, dest: StoreId) -> Result<()> {
        let (s, d) = self.pair_mut(src, dest)?;
        let binding = Binding::initialize(d, s);
        let replaced = s.bindings.insert(dest, binding).is_some();
        debug!(%src, %dest, replaced, "bound parameter stores");
        Ok(())
    }

    /// Remove the binding from `src` into `dest`. `Ok(false)` if none existed.
    pub fn unbind(&mut self, src: StoreId, dest: StoreId) -> Result<bool> {
        let Some(mut binding) = self.store_mut(src)?.bindings.shift_remove(&dest) else {
            return Ok(false);
        };
        if let Some(d) = self.get_mut(dest) {
            binding.empty(d, src);
        }
        debug!(%src, %dest, "unbound parameter stores");
        Ok(true)
    }

    /// Release every binding sourced from `src`.
    pub fn unbind_all(&mut self, src: StoreId) -> Result<()> {
        let dests: Vec<StoreId> = self.store(src)?.bound_stores().collect();
        for dest in dests {
            self.unbind(src, dest)?;
        }
        Ok(())
    }

    /// Detach `dest` from every store bound into it.
    pub fn unbind_from_source_stores(&mut self, dest: StoreId) -> Result<()> {
        let sources: Vec<StoreId> = self.store(dest)?.source_stores().collect();
        for src in sources {
            if self.contains(src) {
                self.unbind(src, dest)?;
            } else {
                self.prune_stale_link(src, dest);
            }
        }
        Ok(())
    }

    /// Recompile every binding sourced from `src`.
    pub fn rebind(&mut self, src: StoreId) -> Result<()> {
        let dests: Vec<StoreId> = self.store(src)?.bound_stores().collect();
        for dest in dests {
            self.recompile(src, dest);
        }
        Ok(())
    }

    /// Move every binding of `from` onto `to`.
    ///
    /// A destination equal to `to` is only unbound. `from == to` is rejected.
    pub fn transfer_bindings(&mut self, from: StoreId, to: StoreId) -> Result<()> {
        if from == to {
            return Err(StoreError::SelfBinding(from));
        }
        self.store(to)?;
        let dests: Vec<StoreId> = self.store(from)?.bound_stores().collect();
        for dest in dests {
            if dest != to && self.contains(dest) {
                self.bind(to, dest)?;
            }
            self.unbind(from, dest)?;
        }
        Ok(())
    }

    fn recompile(&mut self, src: StoreId, dest: StoreId) {
        if !self.contains(src) || !self.contains(dest) {
            self.prune_stale_link(src, dest);
            return;
        }
        let Ok((s, d)) = self.pair_mut(src, dest) else {
            return;
        };
        let Some(slot) = s.bindings.get_mut(&dest) else {
            return;
        };
        let mut binding = std::mem::take(slot);
        binding.bind_parameters(d, s);
        if let Some(slot) = s.bindings.get_mut(&dest) {
            *slot = binding;
        }
    }

    fn prune_stale_link(&mut self, src: StoreId, dest: StoreId) {
        warn!(%src, %dest, "pruning binding with a destroyed endpoint");
        if let Some(s) = self.get_mut(src) {
            s.bindings.shift_remove(&dest);
        }
        if let Some(d) = self.get_mut(dest) {
            d.source_stores.shift_remove(&src);
        }
    }

    /// Recompile everything attached to `id` after its layout changed.
    fn on_layout_change(&mut self, id: StoreId) -> Result<()> {
        self.rebind(id)?;
        let sources: Vec<StoreId> = self.store(id)?.source_stores().collect();
        for src in sources {
            self.recompile(src, id);
        }
        self.store(id)?.notify_changed();
        Ok(())
    }

    // ── Propagation ─────────────────────────────────────────────────────────

    /// Push `src`'s dirty values through its bindings, then clear its flags.
    ///
    /// Callers tick upstream stores before downstream ones.
    pub fn tick(&mut self, src: StoreId) -> Result<()> {
        let dests: Vec<StoreId> = self.store(src)?.bound_stores().collect();
        let verify = self.config.verify_on_tick;

        for dest in dests {
            if !self.contains(dest) {
                self.prune_stale_link(src, dest);
                continue;
            }
            let Ok((s, d)) = self.pair_mut(src, dest) else {
                continue;
            };
            let s: &ParameterStore = s;
            let Some(binding) = s.binding(dest) else {
                continue;
            };
            if verify {
                for mismatch in binding.verify(d, s) {
                    warn!(%src, %dest, "binding verification failed: {}", mismatch);
                }
            }
            binding.tick(d, s, false);
        }

        self.store_mut(src)?.clear_dirty();
        Ok(())
    }

    // ── Diagnostics ─────────────────────────────────────────────────────────

    /// Check the compiled binding from `src` into `dest` against the current
    /// layouts. Each mismatch is reported as a `warn` event.
    pub fn verify_binding(&self, src: StoreId, dest: StoreId) -> Result<bool> {
        let s = self.store(src)?;
        let d = self.store(dest)?;
        let Some(binding) = s.binding(dest) else {
            warn!(%src, %dest, "no binding to verify");
            return Ok(false);
        };
        let mismatches = binding.verify(d, s);
        for mismatch in &mismatches {
            warn!(%src, %dest, "binding verification failed: {}", mismatch);
        }
        Ok(mismatches.is_empty())
    }

    /// Log the store's contents when dumping is enabled.
    pub fn dump(&self, id: StoreId) -> Result<Option<String>> {
        let store = self.store(id)?;
        if !self.config.dump_enabled {
            return Ok(None);
        }
        let text = store.dump_parameters(true);
        for line in text.lines() {
            info!(target: "param_store::dump", "{}", line);
        }
        Ok(Some(text))
    }
}
