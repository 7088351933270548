//! Filters select descriptors out of the store.

use std::sync::Arc;

use crate::descriptor::Descriptor;
use crate::error::IocResult;
use crate::key::ServiceKey;

/// A predicate over descriptors, with an optional (namespace, name)
/// fast path.
///
/// When both [`namespace`](Filter::namespace) and [`name`](Filter::name)
/// return non-empty strings, the store narrows candidates to that bucket
/// before running [`matches`](Filter::matches); the predicate is never
/// called on descriptors outside the declared pair. Empty strings disable
/// the fast path and the predicate runs over everything.
pub trait Filter: Send + Sync {
    /// Returns true if the descriptor should be included in the result.
    fn matches(&self, descriptor: &Descriptor) -> bool;

    /// A non-empty string if all results come from one namespace.
    fn namespace(&self) -> &str {
        ""
    }

    /// A non-empty string if all results carry one name. A filter
    /// returning a non-empty name must also return a non-empty namespace.
    fn name(&self) -> &str {
        ""
    }
}

/// Matches every descriptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllFilter;

impl Filter for AllFilter {
    fn matches(&self, _: &Descriptor) -> bool {
        true
    }
}

fn key_matches(key: &ServiceKey, descriptor: &Descriptor) -> bool {
    if descriptor.namespace() != key.namespace() || descriptor.name() != key.name() {
        return false;
    }

    // The descriptor must carry a superset of the key's qualifiers.
    key.qualifiers()
        .iter()
        .all(|qualifier| descriptor.qualifiers().iter().any(|dq| dq == qualifier))
}

/// Matches descriptors against one or more service keys. The fast path is
/// declared only when every key shares the same (namespace, name).
pub struct ServiceKeyFilter {
    namespace: String,
    name: String,
    keys: Vec<ServiceKey>,
}

impl ServiceKeyFilter {
    /// A filter for a single key.
    pub fn new(key: &ServiceKey) -> ServiceKeyFilter {
        ServiceKeyFilter::for_keys(std::slice::from_ref(key))
    }

    /// A filter that requires a descriptor to match every given key.
    pub fn for_keys(keys: &[ServiceKey]) -> ServiceKeyFilter {
        let mut namespace = "";
        let mut name = "";
        if let Some(first) = keys.first() {
            let uniform = keys
                .iter()
                .all(|k| k.namespace() == first.namespace() && k.name() == first.name());
            if uniform {
                namespace = first.namespace();
                name = first.name();
            }
        }

        ServiceKeyFilter {
            namespace: namespace.to_string(),
            name: name.to_string(),
            keys: keys.to_vec(),
        }
    }
}

impl Filter for ServiceKeyFilter {
    fn matches(&self, descriptor: &Descriptor) -> bool {
        self.keys.iter().all(|key| key_matches(key, descriptor))
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Matches exactly the descriptor with the given locator and service ids.
#[derive(Debug, Clone, Copy)]
pub struct IdFilter {
    locator_id: i64,
    service_id: i64,
}

impl IdFilter {
    /// A filter for the descriptor with exactly this identity.
    pub fn new(locator_id: i64, service_id: i64) -> IdFilter {
        IdFilter { locator_id, service_id }
    }
}

impl Filter for IdFilter {
    fn matches(&self, descriptor: &Descriptor) -> bool {
        descriptor.locator_id() == self.locator_id && descriptor.service_id() == self.service_id
    }
}

/// Matches descriptors with the given namespace, name, and qualifiers.
pub struct NamedFilter {
    key: ServiceKey,
}

impl NamedFilter {
    /// A filter for services with this namespace, name, and qualifier set.
    pub fn new<I, S>(namespace: &str, name: &str, qualifiers: I) -> IocResult<NamedFilter>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(NamedFilter {
            key: ServiceKey::new(namespace, name, qualifiers)?,
        })
    }
}

impl Filter for NamedFilter {
    fn matches(&self, descriptor: &Descriptor) -> bool {
        key_matches(&self.key, descriptor)
    }

    fn namespace(&self) -> &str {
        self.key.namespace()
    }

    fn name(&self) -> &str {
        self.key.name()
    }
}

impl<F: Filter + ?Sized> Filter for Arc<F> {
    fn matches(&self, descriptor: &Descriptor) -> bool {
        (**self).matches(descriptor)
    }

    fn namespace(&self) -> &str {
        (**self).namespace()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
