//! Process-wide group registry
//!
//! Groups are looked up by name. A [`Registry`] is a plain value so tests
//! and embedders can keep isolated instances; [`Registry::global`] offers
//! the conventional process-wide default.
//!
//! Three optional hooks integrate the surrounding transport:
//!
//! - a **server-start** hook, invoked exactly once when the first group is
//!   created
//! - a **new-group** hook, observing every created group
//! - a **peer-picker factory**, consulted lazily by groups built without an
//!   explicit picker
//!
//! Deregistering a group only drops it from the registry; shutting down any
//! peer transport remains the caller's responsibility.

use std::collections::HashMap;
use std::sync::{Arc, Once, OnceLock};

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::group::{Group, GroupBuilder, Loader};
use crate::peers::PeerPicker;

/// Builds a peer picker for a group, given the group's name.
pub type PickerFactory = Arc<dyn Fn(&str) -> Arc<dyn PeerPicker> + Send + Sync>;

/// The registry's factory cell, shared with its groups so factory
/// registration is picked up lazily at a group's first use.
pub(crate) type SharedPickerFactory = Arc<RwLock<Option<PickerFactory>>>;

type GroupHook = Box<dyn Fn(&Arc<Group>) + Send + Sync>;
type ServerStartHook = Box<dyn FnOnce() + Send>;

/// A mapping from group name to [`Group`], plus the lifecycle hooks.
pub struct Registry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
    picker_factory: SharedPickerFactory,
    new_group_hook: RwLock<Option<GroupHook>>,
    server_start: Mutex<Option<ServerStartHook>>,
    server_init: Once,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            groups: RwLock::new(HashMap::new()),
            picker_factory: Arc::new(RwLock::new(None)),
            new_group_hook: RwLock::new(None),
            server_start: Mutex::new(None),
            server_init: Once::new(),
        }
    }

    /// The process-wide default registry.
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Create and register a group. Fails when a group of that name
    /// already exists.
    pub fn new_group<L>(
        &self,
        name: impl Into<String>,
        cache_bytes: i64,
        loader: L,
    ) -> Result<Arc<Group>>
    where
        L: Loader + 'static,
    {
        GroupBuilder::new(name)
            .with_cache_bytes(cache_bytes)
            .with_loader(loader)
            .build(self)
    }

    /// The group registered under `name`, if any.
    pub fn get_group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().get(name).cloned()
    }

    /// Drop `name` from the registry. Any live transport serving the group
    /// is untouched.
    pub fn deregister_group(&self, name: &str) {
        self.groups.write().remove(name);
    }

    /// Install the factory that groups without an explicit picker consult
    /// at first use. Fails when a factory is already registered.
    pub fn set_picker_factory<F>(&self, factory: F) -> Result<()>
    where
        F: Fn(&str) -> Arc<dyn PeerPicker> + Send + Sync + 'static,
    {
        let mut slot = self.picker_factory.write();
        if slot.is_some() {
            return Err(Error::Validation(
                "peer picker factory already registered".into(),
            ));
        }
        *slot = Some(Arc::new(factory));
        Ok(())
    }

    /// Install a hook observing every newly created group. Fails when one
    /// is already registered.
    pub fn set_new_group_hook<F>(&self, hook: F) -> Result<()>
    where
        F: Fn(&Arc<Group>) + Send + Sync + 'static,
    {
        let mut slot = self.new_group_hook.write();
        if slot.is_some() {
            return Err(Error::Validation("new-group hook already registered".into()));
        }
        *slot = Some(Box::new(hook));
        Ok(())
    }

    /// Install the one-shot hook run when the first group is created.
    /// Registered after that point it never runs. Fails when one is
    /// already registered.
    pub fn set_server_start<F>(&self, start: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot = self.server_start.lock();
        if slot.is_some() {
            return Err(Error::Validation(
                "server-start hook already registered".into(),
            ));
        }
        *slot = Some(Box::new(start));
        Ok(())
    }

    pub(crate) fn register(&self, builder: GroupBuilder) -> Result<Arc<Group>> {
        self.server_init.call_once(|| {
            if let Some(start) = self.server_start.lock().take() {
                start();
            }
        });

        let mut groups = self.groups.write();
        if groups.contains_key(&builder.name) {
            return Err(Error::Validation(format!(
                "duplicate registration of group {}",
                builder.name
            )));
        }

        let name = builder.name.clone();
        let group = Arc::new(builder.into_group(Arc::clone(&self.picker_factory))?);
        if let Some(hook) = self.new_group_hook.read().as_ref() {
            hook(&group);
        }
        groups.insert(name.clone(), Arc::clone(&group));
        tracing::debug!(group = %name, "registered cache group");
        Ok(group)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
