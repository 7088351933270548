//! The service locator: the registry façade that owns the store, the
//! scopes, and the extension snapshots.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::configuration::{DynamicConfiguration, DynamicConfigurationService};
use crate::descriptor::{Descriptor, WriteableDescriptor};
use crate::error::{panic_message, IocError, IocResult, MultiError};
use crate::extension::{
    ConfigurationListener, ErrorInformation, ErrorService, FailureKind, Operation,
    ValidationInformation, ValidationService,
};
use crate::filter::{Filter, ServiceKeyFilter};
use crate::inject::{resolve_fields, Injectable, InjectionResolver, SystemInjectionResolver};
use crate::internal::activation::{self, ActivationId};
use crate::internal::reentrant::ReentrantLock;
use crate::key::{check_name, ServiceKey};
use crate::scope::{ContextualScope, PerLookupScope, SingletonScope};
use crate::store::DescriptorStore;
use crate::{
    ServiceRef, CONFIGURATION_LISTENER_NAME, CONTEXTUAL_SCOPE_NAMESPACE, DEFAULT_NAMESPACE,
    DYNAMIC_CONFIGURATION_SERVICE_NAME, ERROR_SERVICE_NAME, INJECTION_RESOLVER_NAME, PER_LOOKUP,
    SERVICE_LOCATOR_NAME, SINGLETON, SYSTEM_INJECT_RESOLVER_QUALIFIER, SYSTEM_NAMESPACE,
    USER_SERVICES_NAMESPACE, VALIDATION_SERVICE_NAME,
};

/// Controls what [`new_locator`] does when a locator with the requested
/// name already exists, or does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationPolicy {
    /// Fail if a locator with that name already exists.
    FailIfPresent,
    /// Return the existing locator if found, otherwise create it.
    ReturnExistingOrCreateNew,
    /// Return the existing locator, failing if it does not already exist.
    FailIfNotPresent,
}

/// The lifecycle state of a locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorState {
    /// The locator is open and serving lookups.
    Running,
    /// The locator has been shut down; all operations are refused.
    Shutdown,
}

static LOCATORS: Lazy<Mutex<HashMap<String, ServiceLocator>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));
static NEXT_LOCATOR_ID: AtomicI64 = AtomicI64::new(1);

/// The immutable extension snapshots of one committed state. Swapped
/// atomically by commit; stable for the duration of one operation.
#[derive(Clone, Default)]
pub(crate) struct Extensions {
    pub(crate) error_services: Vec<Arc<dyn ErrorService>>,
    pub(crate) validation_services: Vec<Arc<dyn ValidationService>>,
    pub(crate) listeners: Vec<Arc<dyn ConfigurationListener>>,
    pub(crate) resolvers: Vec<Arc<dyn InjectionResolver>>,
}

/// One committed state of the locator. Lookups clone the Arc and work on
/// it without holding any lock, so they always observe a single commit.
pub(crate) struct Snapshot {
    pub(crate) store: DescriptorStore,
    pub(crate) generation: u64,
    pub(crate) extensions: Extensions,
}

/// A tentative snapshot visible only to the committing activation. Commit
/// installs it while instantiating newly-bound extension services, so
/// their creators can resolve same-commit bindings before anything is
/// published to other activations.
struct PendingSnapshot {
    activation: ActivationId,
    snapshot: Arc<Snapshot>,
}

struct PendingGuard<'a> {
    slot: &'a Mutex<Option<PendingSnapshot>>,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

#[derive(Default)]
struct ChangedExtensions {
    error: bool,
    validation: bool,
    listener: bool,
    resolver: bool,
}

impl ChangedExtensions {
    fn note(&mut self, descriptor: &Descriptor) {
        if descriptor.namespace() != USER_SERVICES_NAMESPACE {
            return;
        }
        match descriptor.name() {
            name if name == ERROR_SERVICE_NAME => self.error = true,
            name if name == VALIDATION_SERVICE_NAME => self.validation = true,
            name if name == CONFIGURATION_LISTENER_NAME => self.listener = true,
            name if name == INJECTION_RESOLVER_NAME => self.resolver = true,
            _ => {}
        }
    }

    fn any(&self) -> bool {
        self.error || self.validation || self.listener || self.resolver
    }
}

fn is_extension_name(name: &str) -> bool {
    name == ERROR_SERVICE_NAME
        || name == VALIDATION_SERVICE_NAME
        || name == CONFIGURATION_LISTENER_NAME
        || name == INJECTION_RESOLVER_NAME
}

pub(crate) struct LocatorInner {
    name: String,
    id: i64,
    running: AtomicBool,
    state: RwLock<Arc<Snapshot>>,
    pending: Mutex<Option<PendingSnapshot>>,
    commit_lock: ReentrantLock,
    next_service_id: AtomicI64,
    per_lookup: Arc<PerLookupScope>,
    singleton: Arc<SingletonScope>,
}

/// A weak handle to a locator, held by providers, extension plumbing, and
/// anything else the locator itself (transitively) owns.
#[derive(Clone)]
pub(crate) struct WeakLocator {
    inner: Weak<LocatorInner>,
    name: String,
}

impl WeakLocator {
    pub(crate) fn upgrade(&self) -> IocResult<ServiceLocator> {
        self.inner
            .upgrade()
            .map(|inner| ServiceLocator { inner })
            .ok_or_else(|| IocError::LocatorShutdown {
                name: self.name.clone(),
            })
    }
}

/// The main registry: stores service descriptors, resolves lookups under
/// rank and qualifier rules, instantiates services inside scopes, and
/// applies dynamic configuration changes under a generation guard.
///
/// Locators are created through [`new_locator`] and identified
/// process-wide by name. The handle is cheaply cloneable; all clones refer
/// to the same locator.
///
/// # Examples
///
/// ```rust
/// use berth::{create_and_bind, ServiceKey};
/// use std::sync::Arc;
///
/// struct Greeter(&'static str);
///
/// let locator = create_and_bind("locator_docs", |binder| {
///     binder.bind_constant("Greeter", Greeter("hello"));
///     Ok(())
/// })
/// .unwrap();
///
/// let greeter: Arc<Greeter> = locator
///     .get_typed(&ServiceKey::in_default_namespace("Greeter").unwrap())
///     .unwrap();
/// assert_eq!(greeter.0, "hello");
/// locator.shutdown();
/// ```
#[derive(Clone)]
pub struct ServiceLocator {
    inner: Arc<LocatorInner>,
}

/// Finds or creates the locator with the given name, according to the
/// policy. Names follow the same character rules as service names.
pub fn new_locator(name: &str, policy: CreationPolicy) -> IocResult<ServiceLocator> {
    check_name(name)?;

    let mut locators = LOCATORS.lock();
    if let Some(existing) = locators.get(name) {
        return match policy {
            CreationPolicy::FailIfPresent => Err(IocError::invalid(format!(
                "creation policy is FailIfPresent and there is a locator named {name}"
            ))),
            _ => Ok(existing.clone()),
        };
    }

    if policy == CreationPolicy::FailIfNotPresent {
        return Err(IocError::invalid(format!(
            "creation policy is FailIfNotPresent and there is no locator named {name}"
        )));
    }

    let id = NEXT_LOCATOR_ID.fetch_add(1, Ordering::SeqCst);
    let inner = Arc::new(LocatorInner {
        name: name.to_string(),
        id,
        running: AtomicBool::new(true),
        state: RwLock::new(Arc::new(Snapshot {
            store: DescriptorStore::new(),
            generation: 0,
            extensions: Extensions::default(),
        })),
        pending: Mutex::new(None),
        commit_lock: ReentrantLock::new(),
        next_service_id: AtomicI64::new(0),
        per_lookup: Arc::new(PerLookupScope),
        singleton: Arc::new(SingletonScope::new()),
    });
    let locator = ServiceLocator { inner };
    locator.seed_system_services()?;

    debug!(target: "berth", locator = name, id, "created service locator");
    locators.insert(name.to_string(), locator.clone());
    Ok(locator)
}

impl ServiceLocator {
    /// The name of this locator.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The process-unique id of this locator.
    pub fn id(&self) -> i64 {
        self.inner.id
    }

    /// The lifecycle state of this locator.
    pub fn state(&self) -> LocatorState {
        if self.inner.running.load(Ordering::SeqCst) {
            LocatorState::Running
        } else {
            LocatorState::Shutdown
        }
    }

    pub(crate) fn downgrade(&self) -> WeakLocator {
        WeakLocator {
            inner: Arc::downgrade(&self.inner),
            name: self.inner.name.clone(),
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<Snapshot> {
        {
            let pending = self.inner.pending.lock();
            if let Some(pending) = pending.as_ref() {
                if pending.activation == activation::current() {
                    return pending.snapshot.clone();
                }
            }
        }
        self.inner.state.read().clone()
    }

    pub(crate) fn next_service_id(&self) -> i64 {
        self.inner.next_service_id.fetch_add(1, Ordering::SeqCst)
    }

    fn ensure_running(&self) -> IocResult<()> {
        if self.inner.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(IocError::LocatorShutdown {
                name: self.inner.name.clone(),
            })
        }
    }

    /// Gets the best service for the key: the highest-ranked descriptor
    /// whose qualifiers cover the key's.
    pub fn get(&self, key: &ServiceKey) -> IocResult<ServiceRef> {
        self.get_for(key, None)
    }

    /// Gets the best service with the given name in the default namespace.
    pub fn get_default(&self, name: &str, qualifiers: &[&str]) -> IocResult<ServiceRef> {
        let key = ServiceKey::new(DEFAULT_NAMESPACE, name, qualifiers.iter().copied())?;
        self.get(&key)
    }

    /// Gets the best service for the key and downcasts it to `T`.
    pub fn get_typed<T: Send + Sync + 'static>(&self, key: &ServiceKey) -> IocResult<Arc<T>> {
        self.get(key)?.downcast::<T>().map_err(|_| {
            IocError::invalid(format!(
                "service {key} is not a {}",
                std::any::type_name::<T>()
            ))
        })
    }

    /// Gets every service matching the key, best first. Creation failures
    /// are aggregated: all successes are abandoned and the combined error
    /// is returned if any instantiation fails.
    pub fn get_all(&self, key: &ServiceKey) -> IocResult<Vec<ServiceRef>> {
        self.get_all_for(key, None)
    }

    pub(crate) fn get_for(
        &self,
        key: &ServiceKey,
        injectee: Option<&Arc<Descriptor>>,
    ) -> IocResult<ServiceRef> {
        let filter = ServiceKeyFilter::new(key);
        let descriptors = self.descriptors_for(&filter, injectee)?;
        let Some(best) = descriptors.first() else {
            trace!(target: "berth", key = %key, "lookup missed");
            return Err(IocError::not_found(key));
        };
        match self.instantiate(best)? {
            Some(service) => Ok(service),
            None => Err(IocError::not_found(key)),
        }
    }

    pub(crate) fn get_all_for(
        &self,
        key: &ServiceKey,
        injectee: Option<&Arc<Descriptor>>,
    ) -> IocResult<Vec<ServiceRef>> {
        let filter = ServiceKeyFilter::new(key);
        let descriptors = self.descriptors_for(&filter, injectee)?;

        let mut services = Vec::with_capacity(descriptors.len());
        let mut errors = MultiError::new();
        for descriptor in &descriptors {
            match self.instantiate(descriptor) {
                Ok(Some(service)) => services.push(service),
                Ok(None) => {}
                Err(err) => errors.push(err),
            }
        }
        errors.into_result()?;
        Ok(services)
    }

    /// Gets the service for this exact descriptor through its scope.
    pub fn get_from_descriptor(&self, descriptor: &Arc<Descriptor>) -> IocResult<ServiceRef> {
        self.ensure_running()?;
        match self.instantiate(descriptor)? {
            Some(service) => Ok(service),
            None => Err(IocError::not_found(descriptor.service_key())),
        }
    }

    /// Invokes the descriptor's create function directly, bypassing every
    /// scope cache. Panics in the creator are converted into errors;
    /// creation failures are broadcast to the error services once.
    pub fn create_from_descriptor(&self, descriptor: &Arc<Descriptor>) -> IocResult<ServiceRef> {
        self.ensure_running()?;
        let create = descriptor.create_fn().clone();
        match catch_unwind(AssertUnwindSafe(|| create(self, descriptor))) {
            Ok(Ok(service)) => Ok(service),
            Ok(Err(err)) => {
                if err.already_reported() {
                    return Err(err);
                }
                let err = IocError::creation(descriptor, err);
                self.report_failure(
                    FailureKind::ServiceCreation,
                    Some(descriptor),
                    None,
                    None,
                    &err,
                );
                Err(err.mark_reported())
            }
            Err(payload) => {
                let err = IocError::creation(
                    descriptor,
                    IocError::invalid(format!(
                        "create function panicked: {}",
                        panic_message(payload)
                    )),
                );
                self.report_failure(
                    FailureKind::ServiceCreation,
                    Some(descriptor),
                    None,
                    None,
                    &err,
                );
                Err(err.mark_reported())
            }
        }
    }

    /// All descriptors passing the filter, ordered by rank descending,
    /// then locator id descending, then service id ascending. Candidates
    /// rejected by a lookup validator are dropped (and reported), not
    /// errors.
    pub fn descriptors(&self, filter: &dyn Filter) -> IocResult<Vec<Arc<Descriptor>>> {
        self.descriptors_for(filter, None)
    }

    /// The best descriptor passing the filter, or None.
    pub fn best_descriptor(&self, filter: &dyn Filter) -> IocResult<Option<Arc<Descriptor>>> {
        Ok(self.descriptors_for(filter, None)?.into_iter().next())
    }

    pub(crate) fn descriptors_for(
        &self,
        filter: &dyn Filter,
        injectee: Option<&Arc<Descriptor>>,
    ) -> IocResult<Vec<Arc<Descriptor>>> {
        self.ensure_running()?;
        let snapshot = self.snapshot();

        let mut found = snapshot.store.lookup(filter);
        found.sort_by(|a, b| {
            b.rank()
                .cmp(&a.rank())
                .then_with(|| b.locator_id().cmp(&a.locator_id()))
                .then_with(|| a.service_id().cmp(&b.service_id()))
        });

        if snapshot.extensions.validation_services.is_empty() {
            return Ok(found);
        }

        let mut kept = Vec::with_capacity(found.len());
        'candidates: for candidate in found {
            for service in &snapshot.extensions.validation_services {
                let applies =
                    catch_unwind(AssertUnwindSafe(|| service.filter().matches(&candidate)))
                        .unwrap_or(false);
                if !applies {
                    continue;
                }

                let info = ValidationInformation::new(
                    Operation::Lookup,
                    &candidate,
                    injectee,
                    Some(filter),
                );
                let outcome =
                    catch_unwind(AssertUnwindSafe(|| service.validator().validate(&info)));
                let failure = match outcome {
                    Ok(Ok(())) => continue,
                    Ok(Err(err)) => err,
                    Err(payload) => IocError::invalid(format!(
                        "lookup validator panicked: {}",
                        panic_message(payload)
                    )),
                };

                let err = IocError::Validation {
                    operation: Operation::Lookup.as_str(),
                    descriptor: candidate.to_string(),
                    reason: Box::new(failure),
                };
                self.report_failure(
                    FailureKind::LookupValidation,
                    Some(&candidate),
                    None,
                    injectee,
                    &err,
                );
                continue 'candidates;
            }
            kept.push(candidate);
        }
        Ok(kept)
    }

    fn instantiate(&self, descriptor: &Arc<Descriptor>) -> IocResult<Option<ServiceRef>> {
        let scope = self.resolve_scope(descriptor.scope_name())?;
        if !scope.is_active() {
            return Err(IocError::scope(format!(
                "scope {} is not active",
                descriptor.scope_name()
            )));
        }
        match scope.find_or_create(self, descriptor)? {
            Some(service) => Ok(Some(service)),
            None if scope.supports_nil_creation() => Ok(None),
            None => Err(IocError::scope(format!(
                "scope {} produced no instance for {descriptor}",
                descriptor.scope_name()
            ))),
        }
    }

    /// Resolves a scope name to its implementation: the two built-ins, or
    /// a service in the `sys/scope` namespace with the scope's name.
    pub(crate) fn resolve_scope(&self, scope_name: &str) -> IocResult<Arc<dyn ContextualScope>> {
        if scope_name == PER_LOOKUP {
            return Ok(self.inner.per_lookup.clone() as Arc<dyn ContextualScope>);
        }
        if scope_name == SINGLETON {
            return Ok(self.inner.singleton.clone() as Arc<dyn ContextualScope>);
        }

        let key = ServiceKey::new(CONTEXTUAL_SCOPE_NAMESPACE, scope_name, [] as [&str; 0])?;
        let service = self.get_for(&key, None).map_err(|err| {
            if err.is_not_found() {
                IocError::scope(format!("could not find a scope named {scope_name}"))
            } else {
                err
            }
        })?;

        service
            .downcast_ref::<Arc<dyn ContextualScope>>()
            .cloned()
            .ok_or_else(|| {
                IocError::scope(format!(
                    "the service registered for scope {scope_name} is not a contextual scope"
                ))
            })
    }

    /// Resolves the injection plan of `target` against this locator's
    /// services, assigning into the supplied value. The initializer is not
    /// run and error services are not notified on this path.
    pub fn inject<T: Injectable>(&self, target: &mut T) -> IocResult<()> {
        self.ensure_running()?;
        resolve_fields(self, None, target)
    }

    /// Creates a fresh [`DynamicConfiguration`] from the locator's
    /// dynamic configuration service.
    pub fn dynamic_configuration(&self) -> IocResult<DynamicConfiguration> {
        let key =
            ServiceKey::new_unchecked(SYSTEM_NAMESPACE, DYNAMIC_CONFIGURATION_SERVICE_NAME, &[]);
        let service = self.get(&key)?;
        let dcs = service
            .downcast_ref::<DynamicConfigurationService>()
            .ok_or_else(|| {
                IocError::invalid("the DynamicConfigurationService has an unexpected type")
            })?;
        dcs.create_configuration()
    }

    pub(crate) fn injection_resolvers(&self) -> Vec<Arc<dyn InjectionResolver>> {
        self.snapshot().extensions.resolvers.clone()
    }

    /// Broadcasts a failure to every error service. Panics and errors from
    /// the services themselves are swallowed.
    pub(crate) fn report_failure(
        &self,
        kind: FailureKind,
        descriptor: Option<&Arc<Descriptor>>,
        injectee_type: Option<&'static str>,
        injectee_descriptor: Option<&Arc<Descriptor>>,
        error: &IocError,
    ) {
        let services = self.snapshot().extensions.error_services.clone();
        if services.is_empty() {
            return;
        }
        let info = ErrorInformation::new(
            kind,
            descriptor.cloned(),
            injectee_type,
            injectee_descriptor.cloned(),
            error.clone(),
        );
        for service in services {
            let _ = catch_unwind(AssertUnwindSafe(|| service.on_failure(&info)));
        }
    }

    /// Reports a service-creation failure once, marking the error so outer
    /// layers do not report it again.
    pub(crate) fn report_creation_failure(
        &self,
        descriptor: &Arc<Descriptor>,
        injectee_type: Option<&'static str>,
        err: IocError,
    ) -> IocError {
        if err.already_reported() {
            return err;
        }
        self.report_failure(
            FailureKind::ServiceCreation,
            Some(descriptor),
            injectee_type,
            None,
            &err,
        );
        err.mark_reported()
    }

    /// Applies a dynamic configuration: the transactional heart.
    pub(crate) fn apply_configuration(
        &self,
        base_generation: u64,
        binds: &[Arc<Descriptor>],
        removers: &[Arc<dyn Filter>],
    ) -> IocResult<()> {
        let _commit = self.inner.commit_lock.lock();
        self.ensure_running()?;

        let snapshot = self.snapshot();
        if snapshot.generation != base_generation {
            return Err(IocError::StaleConfiguration);
        }

        // Removals: every descriptor matched by any remove filter, deduped
        // by identity.
        let mut removed: Vec<Arc<Descriptor>> = Vec::new();
        for remover in removers {
            for descriptor in snapshot.store.lookup(remover) {
                if !removed.iter().any(|r| r.id() == descriptor.id()) {
                    removed.push(descriptor);
                }
            }
        }

        for descriptor in &removed {
            self.validate_configuration_change(Operation::Unbind, descriptor, &snapshot)?;
        }
        for descriptor in binds {
            self.validate_configuration_change(Operation::Bind, descriptor, &snapshot)?;
        }

        // Recognized extension services must live in the Singleton scope.
        for descriptor in removed.iter().chain(binds.iter()) {
            if descriptor.namespace() == USER_SERVICES_NAMESPACE
                && is_extension_name(descriptor.name())
                && descriptor.scope_name() != SINGLETON
            {
                let err = IocError::invalid(format!(
                    "extension service {descriptor} must be in the Singleton scope, not {}",
                    descriptor.scope_name()
                ));
                self.report_failure(
                    FailureKind::DynamicConfiguration,
                    Some(descriptor),
                    None,
                    None,
                    &err,
                );
                return Err(err.mark_reported());
            }
        }

        let mut changed = ChangedExtensions::default();
        let mut store = snapshot.store.clone();
        for descriptor in &removed {
            store.remove(descriptor);
            changed.note(descriptor);
        }
        for descriptor in binds {
            store.add(descriptor.clone());
            changed.note(descriptor);
        }

        let generation = snapshot.generation + 1;
        let store_size = store.len();

        // Eagerly rebuild the changed extension snapshots before anything
        // is published: the rebuild runs against a tentative snapshot only
        // the committing activation can see, so extension creators resolve
        // same-commit bindings while concurrent lookups still observe the
        // pre-commit state. A failed rebuild publishes nothing.
        let extensions = if changed.any() {
            let tentative = Arc::new(Snapshot {
                store: store.clone(),
                generation,
                extensions: snapshot.extensions.clone(),
            });
            *self.inner.pending.lock() = Some(PendingSnapshot {
                activation: activation::current(),
                snapshot: tentative,
            });
            let _pending = PendingGuard {
                slot: &self.inner.pending,
            };

            match self.rebuild_extensions(&changed) {
                Ok(extensions) => extensions,
                Err(err) => {
                    // Singleton instances created for the rejected
                    // extension descriptors are unreachable now; tear
                    // them down.
                    for descriptor in binds {
                        if descriptor.namespace() == USER_SERVICES_NAMESPACE
                            && is_extension_name(descriptor.name())
                        {
                            if let Err(cleanup) =
                                self.inner.singleton.destroy_one(self, descriptor)
                            {
                                warn!(
                                    target: "berth",
                                    descriptor = %descriptor,
                                    error = %cleanup,
                                    "failed to destroy rejected extension service"
                                );
                            }
                        }
                    }
                    self.report_failure(FailureKind::DynamicConfiguration, None, None, None, &err);
                    return Err(err.mark_reported());
                }
            }
        } else {
            snapshot.extensions.clone()
        };

        *self.inner.state.write() = Arc::new(Snapshot {
            store,
            generation,
            extensions,
        });
        debug!(
            target: "berth",
            locator = %self.inner.name,
            generation,
            bound = binds.len(),
            removed = removed.len(),
            store_size,
            "applied dynamic configuration"
        );

        // Cached scopes destroy the instances of unbound descriptors.
        for descriptor in &removed {
            if let Ok(scope) = self.resolve_scope(descriptor.scope_name()) {
                if scope.contains(descriptor) {
                    if let Err(err) = scope.destroy_one(self, descriptor) {
                        warn!(
                            target: "berth",
                            descriptor = %descriptor,
                            error = %err,
                            "failed to destroy unbound service"
                        );
                    }
                }
            }
        }

        let listeners = self.snapshot().extensions.listeners.clone();
        for listener in listeners {
            let _ = catch_unwind(AssertUnwindSafe(|| listener.configuration_changed()));
        }

        Ok(())
    }

    fn validate_configuration_change(
        &self,
        operation: Operation,
        candidate: &Arc<Descriptor>,
        snapshot: &Snapshot,
    ) -> IocResult<()> {
        for service in &snapshot.extensions.validation_services {
            let applies = catch_unwind(AssertUnwindSafe(|| service.filter().matches(candidate)))
                .unwrap_or(false);
            if !applies {
                continue;
            }

            let info = ValidationInformation::new(operation, candidate, None, None);
            let outcome = catch_unwind(AssertUnwindSafe(|| service.validator().validate(&info)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(payload) => IocError::invalid(format!(
                    "validator panicked: {}",
                    panic_message(payload)
                )),
            };

            let err = IocError::Validation {
                operation: operation.as_str(),
                descriptor: candidate.to_string(),
                reason: Box::new(failure),
            };
            self.report_failure(
                FailureKind::DynamicConfiguration,
                Some(candidate),
                None,
                None,
                &err,
            );
            return Err(err.mark_reported());
        }
        Ok(())
    }

    fn rebuild_extensions(&self, changed: &ChangedExtensions) -> IocResult<Extensions> {
        let mut extensions = self.snapshot().extensions.clone();
        if changed.error {
            extensions.error_services = self.collect_extensions::<dyn ErrorService>(ERROR_SERVICE_NAME)?;
        }
        if changed.validation {
            extensions.validation_services =
                self.collect_extensions::<dyn ValidationService>(VALIDATION_SERVICE_NAME)?;
        }
        if changed.listener {
            extensions.listeners =
                self.collect_extensions::<dyn ConfigurationListener>(CONFIGURATION_LISTENER_NAME)?;
        }
        if changed.resolver {
            extensions.resolvers =
                self.collect_extensions::<dyn InjectionResolver>(INJECTION_RESOLVER_NAME)?;
        }
        Ok(extensions)
    }

    /// Instantiates every `user/services` service with the given name, in
    /// lookup order, recovering the typed extension values.
    fn collect_extensions<S: ?Sized + 'static>(&self, name: &'static str) -> IocResult<Vec<Arc<S>>> {
        let key = ServiceKey::new_unchecked(USER_SERVICES_NAMESPACE, name, &[]);
        let filter = ServiceKeyFilter::new(&key);
        let descriptors = self.descriptors_for(&filter, None)?;

        let mut collected = Vec::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            let service = self.instantiate(descriptor)?.ok_or_else(|| {
                IocError::invalid(format!("extension service {descriptor} produced no instance"))
            })?;
            let typed = service.downcast_ref::<Arc<S>>().cloned().ok_or_else(|| {
                IocError::invalid(format!("service {descriptor} does not implement {name}"))
            })?;
            collected.push(typed);
        }
        Ok(collected)
    }

    /// Shuts down every scope (destroying all cached instances), flips the
    /// state to Shutdown, and removes this locator from the process-wide
    /// registry. In-flight lookups either complete or observe the
    /// shutdown. Idempotent.
    pub fn shutdown(&self) {
        let _commit = self.inner.commit_lock.lock();
        if !self.inner.running.load(Ordering::SeqCst) {
            return;
        }

        // Resolve user scopes while lookups still work; order among them
        // is unspecified.
        let snapshot = self.snapshot();
        let mut user_scopes = Vec::new();
        for descriptor in snapshot.store.all() {
            if descriptor.namespace() == CONTEXTUAL_SCOPE_NAMESPACE {
                if let Ok(scope) = self.resolve_scope(descriptor.name()) {
                    user_scopes.push(scope);
                }
            }
        }

        self.inner.running.store(false, Ordering::SeqCst);
        debug!(target: "berth", locator = %self.inner.name, "shutting down service locator");

        for scope in user_scopes {
            scope.shutdown(self);
        }
        self.inner.singleton.shutdown(self);
        self.inner.per_lookup.shutdown(self);

        {
            let generation = self.inner.state.read().generation;
            *self.inner.state.write() = Arc::new(Snapshot {
                store: DescriptorStore::new(),
                generation,
                extensions: Extensions::default(),
            });
        }

        let mut locators = LOCATORS.lock();
        if locators.get(&self.inner.name).map(|l| l.id()) == Some(self.id()) {
            locators.remove(&self.inner.name);
        }
    }

    /// Binds the built-in system services: the locator itself, the dynamic
    /// configuration service, and the system injection resolver.
    fn seed_system_services(&self) -> IocResult<()> {
        let mut store = DescriptorStore::new();

        let self_key = ServiceKey::new_unchecked(SYSTEM_NAMESPACE, SERVICE_LOCATOR_NAME, &[]);
        let weak = self.downgrade();
        let mut self_descriptor = WriteableDescriptor::new();
        self_descriptor
            .set_namespace(self_key.namespace())?
            .set_name(self_key.name())?
            .set_scope(PER_LOOKUP)?
            .set_create_fn(move |_, _| {
                let locator = weak.upgrade()?;
                Ok(Arc::new(locator) as ServiceRef)
            });
        store.add(Arc::new(Descriptor::materialize(
            &self_descriptor,
            self.next_service_id(),
            self.id(),
        )?));

        let dcs_key =
            ServiceKey::new_unchecked(SYSTEM_NAMESPACE, DYNAMIC_CONFIGURATION_SERVICE_NAME, &[]);
        let dcs = WriteableDescriptor::constant(
            &dcs_key,
            DynamicConfigurationService::new(self.downgrade()),
        );
        store.add(Arc::new(Descriptor::materialize(
            &dcs,
            self.next_service_id(),
            self.id(),
        )?));

        let resolver: Arc<dyn InjectionResolver> = Arc::new(SystemInjectionResolver);
        let resolver_key =
            ServiceKey::new_unchecked(USER_SERVICES_NAMESPACE, INJECTION_RESOLVER_NAME, &[]);
        let mut resolver_descriptor = WriteableDescriptor::constant(&resolver_key, resolver.clone());
        resolver_descriptor
            .set_scope(SINGLETON)?
            .add_qualifier(SYSTEM_INJECT_RESOLVER_QUALIFIER)?;
        store.add(Arc::new(Descriptor::materialize(
            &resolver_descriptor,
            self.next_service_id(),
            self.id(),
        )?));

        *self.inner.state.write() = Arc::new(Snapshot {
            store,
            generation: 0,
            extensions: Extensions {
                resolvers: vec![resolver],
                ..Extensions::default()
            },
        });
        Ok(())
    }
}

impl std::fmt::Debug for ServiceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceLocator")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}
