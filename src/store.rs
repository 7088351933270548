//! The in-memory descriptor index.

use std::collections::HashMap;
use std::sync::Arc;

use crate::descriptor::Descriptor;
use crate::filter::Filter;

/// The descriptor store: an ordered list of every descriptor plus a
/// namespace -> name -> descriptors fast path. The two views always agree
/// on membership; append preserves insertion order.
///
/// All locking is done by the caller.
#[derive(Clone, Default)]
pub(crate) struct DescriptorStore {
    all: Vec<Arc<Descriptor>>,
    by_name: HashMap<String, HashMap<String, Vec<Arc<Descriptor>>>>,
}

impl DescriptorStore {
    pub(crate) fn new() -> DescriptorStore {
        DescriptorStore::default()
    }

    /// Appends a descriptor to the ordered list and its (namespace, name)
    /// bucket.
    pub(crate) fn add(&mut self, descriptor: Arc<Descriptor>) {
        self.all.push(descriptor.clone());

        self.by_name
            .entry(descriptor.namespace().to_string())
            .or_default()
            .entry(descriptor.name().to_string())
            .or_default()
            .push(descriptor);
    }

    /// Removes a descriptor by identity. Returns true iff it was present.
    pub(crate) fn remove(&mut self, descriptor: &Descriptor) -> bool {
        let id = descriptor.id();
        let Some(position) = self.all.iter().position(|d| d.id() == id) else {
            return false;
        };
        self.all.remove(position);

        if let Some(names) = self.by_name.get_mut(descriptor.namespace()) {
            if let Some(bucket) = names.get_mut(descriptor.name()) {
                bucket.retain(|d| d.id() != id);
                if bucket.is_empty() {
                    names.remove(descriptor.name());
                }
            }
            if names.is_empty() {
                self.by_name.remove(descriptor.namespace());
            }
        }

        true
    }

    /// All descriptors, in insertion order.
    pub(crate) fn all(&self) -> &[Arc<Descriptor>] {
        &self.all
    }

    pub(crate) fn len(&self) -> usize {
        self.all.len()
    }

    /// Runs the filter over the store. When the filter declares both a
    /// namespace and a name, only that bucket is consulted and the
    /// predicate never sees descriptors outside it.
    pub(crate) fn lookup(&self, filter: &dyn Filter) -> Vec<Arc<Descriptor>> {
        let namespace = filter.namespace();
        let name = filter.name();

        let candidates: &[Arc<Descriptor>] = if !namespace.is_empty() && !name.is_empty() {
            self.by_name
                .get(namespace)
                .and_then(|names| names.get(name))
                .map(Vec::as_slice)
                .unwrap_or(&[])
        } else {
            &self.all
        };

        candidates
            .iter()
            .filter(|candidate| filter.matches(candidate))
            .cloned()
            .collect()
    }
}
