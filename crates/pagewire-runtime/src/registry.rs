//! Method registry keyed by qualified name, with identity-checked disposers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use pagewire_protocol::MethodDescriptor;

use crate::errors::RuntimeError;
use crate::method::MethodRegistration;

struct Entry {
    id: u64,
    registration: Arc<MethodRegistration>,
}

#[derive(Default)]
struct Table {
    entries: HashMap<String, Entry>,
    next_id: u64,
}

/// Methods a page currently exposes.
///
/// Every registration gets a fresh id. A [`Disposer`] remembers that id and
/// only removes the entry if the name still maps to it, so tearing down an
/// old registration never evicts a newer one under the same name.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    table: Arc<RwLock<Table>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) `name`.
    pub fn register(
        &self,
        name: impl Into<String>,
        registration: MethodRegistration,
    ) -> Result<Disposer, RuntimeError> {
        let name = name.into();
        validate_name(&name)?;
        let mut table = self.table.write();
        table.next_id += 1;
        let id = table.next_id;
        let _ = table.entries.insert(
            name.clone(),
            Entry {
                id,
                registration: Arc::new(registration),
            },
        );
        Ok(Disposer {
            table: Arc::downgrade(&self.table),
            name,
            id,
            done: AtomicBool::new(false),
        })
    }

    /// Registration currently stored under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<MethodRegistration>> {
        self.table
            .read()
            .entries
            .get(name)
            .map(|e| e.registration.clone())
    }

    /// Remove `name` regardless of which registration holds it.
    pub fn remove(&self, name: &str) -> bool {
        self.table.write().entries.remove(name).is_some()
    }

    /// Remove every method.
    pub fn clear(&self) {
        self.table.write().entries.clear();
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.table.read().entries.contains_key(name)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    /// Whether no method is registered.
    pub fn is_empty(&self) -> bool {
        self.table.read().entries.is_empty()
    }

    /// Descriptors sorted by name, optionally limited to `namespace.` names.
    pub fn descriptors(&self, namespace: Option<&str>) -> Vec<MethodDescriptor> {
        let prefix = namespace.map(|ns| format!("{ns}."));
        let table = self.table.read();
        let mut out: Vec<MethodDescriptor> = table
            .entries
            .iter()
            .filter(|(name, _)| prefix.as_deref().is_none_or(|p| name.starts_with(p)))
            .map(|(name, entry)| entry.registration.descriptor(name))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

/// Reject names that cannot be registered.
pub(crate) fn validate_name(name: &str) -> Result<(), RuntimeError> {
    if name.trim().is_empty() {
        return Err(RuntimeError::InvalidMethodName);
    }
    Ok(())
}

/// Removes one specific registration. Idempotent.
///
/// Dropping a disposer does not unregister anything.
#[derive(Debug)]
pub struct Disposer {
    table: Weak<RwLock<Table>>,
    name: String,
    id: u64,
    done: AtomicBool,
}

impl Disposer {
    /// Name this disposer was issued for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remove the registration if it is still the one stored under its name.
    /// Returns whether anything was removed.
    pub fn dispose(&self) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        let Some(table) = self.table.upgrade() else {
            return false;
        };
        let mut table = table.write();
        if table.entries.get(&self.name).is_some_and(|e| e.id == self.id) {
            let _ = table.entries.remove(&self.name);
            true
        } else {
            false
        }
    }
}

/// Disposes a batch of registrations, each at most once.
#[derive(Debug, Default)]
pub struct CompositeDisposer {
    parts: Vec<Disposer>,
}

impl CompositeDisposer {
    pub(crate) fn new(parts: Vec<Disposer>) -> Self {
        Self { parts }
    }

    /// Dispose every part; returns how many registrations were removed.
    pub fn dispose(&self) -> usize {
        self.parts.iter().filter(|d| d.dispose()).count()
    }

    /// Names covered, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parts.iter().map(Disposer::name)
    }

    /// Number of registrations covered.
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// Whether the batch was empty.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("methods", &self.entries.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
