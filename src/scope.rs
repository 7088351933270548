//! Contextual scopes: the lifecycle policies and caches for service
//! instances.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use crate::descriptor::Descriptor;
use crate::error::{panic_message, IocError, IocResult};
use crate::internal::compute_cache::ComputeCache;
use crate::locator::ServiceLocator;
use crate::{ServiceRef, PER_LOOKUP, SINGLETON};

/// The lifecycle strategy for one class of services.
///
/// A scope owns a cache of live instances for the descriptors it manages
/// and decides when instances are created and destroyed. `PerLookup` and
/// `Singleton` are built into every locator; other scopes are regular
/// services bound in the `sys/scope` namespace under the scope's own name,
/// stored as `Arc<dyn ContextualScope>` values.
pub trait ContextualScope: Send + Sync {
    /// The name of this scope, as referenced by descriptors.
    fn scope_name(&self) -> &str;

    /// Returns the instance for the descriptor, creating it if this scope
    /// does not already hold one. `Ok(None)` is only meaningful for scopes
    /// that support nil creation.
    fn find_or_create(
        &self,
        locator: &ServiceLocator,
        descriptor: &Arc<Descriptor>,
    ) -> IocResult<Option<ServiceRef>>;

    /// True if this scope currently caches an instance for the descriptor.
    fn contains(&self, descriptor: &Descriptor) -> bool;

    /// Destroys the cached instance for the descriptor, if any. Absent
    /// instances are not an error.
    fn destroy_one(&self, locator: &ServiceLocator, descriptor: &Arc<Descriptor>) -> IocResult<()>;

    /// True if `find_or_create` may legitimately produce no instance.
    fn supports_nil_creation(&self) -> bool {
        false
    }

    /// True if the scope can currently serve lookups.
    fn is_active(&self) -> bool {
        true
    }

    /// Destroys every instance this scope holds. Called once when the
    /// owning locator shuts down.
    fn shutdown(&self, locator: &ServiceLocator);

    /// Scope-specific surface, used by callers that need the concrete
    /// scope behind the trait object (e.g. context registration).
    fn as_any(&self) -> &dyn Any;
}

/// Runs a descriptor's destroy function over an instance, converting
/// panics into errors.
pub(crate) fn destroy_instance(
    locator: &ServiceLocator,
    descriptor: &Arc<Descriptor>,
    instance: ServiceRef,
) -> IocResult<()> {
    let Some(destroy) = descriptor.destroy_fn() else {
        return Ok(());
    };
    let destroy = destroy.clone();
    match catch_unwind(AssertUnwindSafe(|| destroy(locator, descriptor, instance))) {
        Ok(result) => result,
        Err(payload) => Err(IocError::creation(
            descriptor,
            IocError::invalid(format!("destroy function panicked: {}", panic_message(payload))),
        )),
    }
}

/// Destroys every drained instance, logging failures instead of
/// propagating them. Shutdown keeps going.
pub(crate) fn destroy_all(locator: &ServiceLocator, drained: Vec<(Arc<Descriptor>, ServiceRef)>) {
    for (descriptor, instance) in drained {
        if let Err(err) = destroy_instance(locator, &descriptor, instance) {
            warn!(
                target: "berth",
                descriptor = %descriptor,
                error = %err,
                "destroy function failed during scope teardown"
            );
        }
    }
}

/// The PerLookup scope: no cache, every lookup creates a fresh instance
/// that the caller exclusively owns.
pub(crate) struct PerLookupScope;

impl ContextualScope for PerLookupScope {
    fn scope_name(&self) -> &str {
        PER_LOOKUP
    }

    fn find_or_create(
        &self,
        locator: &ServiceLocator,
        descriptor: &Arc<Descriptor>,
    ) -> IocResult<Option<ServiceRef>> {
        locator.create_from_descriptor(descriptor).map(Some)
    }

    fn contains(&self, _: &Descriptor) -> bool {
        false
    }

    fn destroy_one(&self, _: &ServiceLocator, _: &Arc<Descriptor>) -> IocResult<()> {
        Ok(())
    }

    fn shutdown(&self, _: &ServiceLocator) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// The Singleton scope: one instance per locator, created on first lookup,
/// destroyed in reverse creation order on shutdown. Creation of the same
/// descriptor re-entered from its own creator is a cycle error; concurrent
/// creation from other activations parks until the first finishes.
pub(crate) struct SingletonScope {
    cache: ComputeCache,
}

impl SingletonScope {
    pub(crate) fn new() -> SingletonScope {
        SingletonScope {
            cache: ComputeCache::new(),
        }
    }
}

impl ContextualScope for SingletonScope {
    fn scope_name(&self) -> &str {
        SINGLETON
    }

    fn find_or_create(
        &self,
        locator: &ServiceLocator,
        descriptor: &Arc<Descriptor>,
    ) -> IocResult<Option<ServiceRef>> {
        self.cache
            .compute(descriptor, || locator.create_from_descriptor(descriptor).map(Some))
    }

    fn contains(&self, descriptor: &Descriptor) -> bool {
        self.cache.contains(descriptor)
    }

    fn destroy_one(&self, locator: &ServiceLocator, descriptor: &Arc<Descriptor>) -> IocResult<()> {
        match self.cache.remove(descriptor) {
            Some(instance) => destroy_instance(locator, descriptor, instance),
            None => Ok(()),
        }
    }

    fn shutdown(&self, locator: &ServiceLocator) {
        destroy_all(locator, self.cache.drain_reverse());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
