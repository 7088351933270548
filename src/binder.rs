//! The fluent binder: sugar for building descriptors and committing them.

use std::sync::Arc;

use crate::configuration::DynamicConfiguration;
use crate::descriptor::WriteableDescriptor;
use crate::error::{IocError, IocResult};
use crate::extension::{ConfigurationListener, ErrorService, ValidationService};
use crate::filter::ServiceKeyFilter;
use crate::inject::{construct, Injectable, InjectionResolver};
use crate::key::ServiceKey;
use crate::locator::{new_locator, CreationPolicy, ServiceLocator};
use crate::{
    ServiceRef, CONFIGURATION_LISTENER_NAME, ERROR_SERVICE_NAME, INJECTION_RESOLVER_NAME,
    SINGLETON, USER_SERVICES_NAMESPACE, VALIDATION_SERVICE_NAME,
};

/// Builds descriptors fluently. Each `bind*` call starts a new descriptor;
/// the `in_*`/`qualified_by`/`ranked`/`and_destroy_with` calls refine the
/// most recent one. Errors (bad names, refinement before any bind) are
/// remembered and surface when the batch is finished, so call chains stay
/// unconditional.
///
/// # Examples
///
/// ```rust
/// use berth::{create_and_bind, ServiceKey, PER_LOOKUP};
/// use std::sync::Arc;
///
/// struct Dialer;
///
/// let locator = create_and_bind("binder_docs", |binder| {
///     binder
///         .bind_with_creator("Dialer", |_, _| Ok(Arc::new(Dialer) as berth::ServiceRef))
///         .in_scope(PER_LOOKUP)
///         .qualified_by("outbound");
///     Ok(())
/// })
/// .unwrap();
///
/// let key = ServiceKey::new("default", "Dialer", ["outbound"]).unwrap();
/// assert!(locator.get(&key).is_ok());
/// locator.shutdown();
/// ```
pub struct Binder {
    completed: Vec<WriteableDescriptor>,
    current: Option<WriteableDescriptor>,
    error: Option<IocError>,
}

impl Binder {
    fn new() -> Binder {
        Binder {
            completed: Vec::new(),
            current: None,
            error: None,
        }
    }

    fn record<T>(&mut self, result: IocResult<T>) {
        if let Err(err) = result {
            self.error.get_or_insert(err);
        }
    }

    fn finish_current(&mut self) {
        if let Some(descriptor) = self.current.take() {
            self.completed.push(descriptor);
        }
    }

    fn current_mut(&mut self, method: &str) -> Option<&mut WriteableDescriptor> {
        if self.current.is_none() && self.error.is_none() {
            self.error = Some(IocError::invalid(format!(
                "{method} must be preceded by a bind call"
            )));
        }
        self.current.as_mut()
    }

    /// Binds an [`Injectable`] prototype under the given name: instances
    /// are built from `Default`, field-injected per the type's plan, and
    /// initialized. Defaults to the Singleton scope in the default
    /// namespace.
    pub fn bind<T: Injectable>(&mut self, name: &str) -> &mut Self {
        self.finish_current();
        let mut descriptor = WriteableDescriptor::new();
        descriptor.set_create_fn(|locator, descriptor| {
            let value = construct::<T>(locator, descriptor)?;
            Ok(Arc::new(value) as ServiceRef)
        });
        let named = descriptor.set_name(name).map(|_| ());
        self.record(named);
        self.current = Some(descriptor);
        self
    }

    /// Binds a service created by the given function. Defaults to the
    /// Singleton scope in the default namespace.
    pub fn bind_with_creator<F>(&mut self, name: &str, creator: F) -> &mut Self
    where
        F: Fn(&ServiceLocator, &Arc<crate::Descriptor>) -> IocResult<ServiceRef>
            + Send
            + Sync
            + 'static,
    {
        self.finish_current();
        let mut descriptor = WriteableDescriptor::new();
        descriptor.set_create_fn(creator);
        let named = descriptor.set_name(name).map(|_| ());
        self.record(named);
        self.current = Some(descriptor);
        self
    }

    /// Binds a constant: every lookup resolves to exactly this value.
    /// Constants default to the PerLookup scope, which returns the
    /// identical instance without caching.
    pub fn bind_constant<T: Send + Sync + 'static>(&mut self, name: &str, value: T) -> &mut Self {
        self.finish_current();
        match ServiceKey::in_default_namespace(name) {
            Ok(key) => {
                self.current = Some(WriteableDescriptor::constant(&key, value));
            }
            Err(err) => self.record::<()>(Err(err)),
        }
        self
    }

    /// Places the current descriptor in the given scope.
    pub fn in_scope(&mut self, scope: &str) -> &mut Self {
        let result = match self.current_mut("in_scope") {
            Some(descriptor) => descriptor.set_scope(scope).map(|_| ()),
            None => Ok(()),
        };
        self.record(result);
        self
    }

    /// Places the current descriptor in the given namespace.
    pub fn in_namespace(&mut self, namespace: &str) -> &mut Self {
        let result = match self.current_mut("in_namespace") {
            Some(descriptor) => descriptor.set_namespace(namespace).map(|_| ()),
            None => Ok(()),
        };
        self.record(result);
        self
    }

    /// Adds a qualifier to the current descriptor.
    pub fn qualified_by(&mut self, qualifier: &str) -> &mut Self {
        let result = match self.current_mut("qualified_by") {
            Some(descriptor) => descriptor.add_qualifier(qualifier).map(|_| ()),
            None => Ok(()),
        };
        self.record(result);
        self
    }

    /// Sets the rank of the current descriptor.
    pub fn ranked(&mut self, rank: i32) -> &mut Self {
        if let Some(descriptor) = self.current_mut("ranked") {
            descriptor.set_rank(rank);
        }
        self
    }

    /// Attaches a destroy function to the current descriptor.
    pub fn and_destroy_with<F>(&mut self, destroy: F) -> &mut Self
    where
        F: Fn(&ServiceLocator, &Arc<crate::Descriptor>, ServiceRef) -> IocResult<()>
            + Send
            + Sync
            + 'static,
    {
        if let Some(descriptor) = self.current_mut("and_destroy_with") {
            descriptor.set_destroy_fn(destroy);
        }
        self
    }

    /// Binds an error service under `user/services/ErrorService` in the
    /// Singleton scope.
    pub fn bind_error_service<S: ErrorService + 'static>(&mut self, service: S) -> &mut Self {
        let erased: Arc<dyn ErrorService> = Arc::new(service);
        self.bind_extension(ERROR_SERVICE_NAME, erased)
    }

    /// Binds a validation service under `user/services/ValidationService`
    /// in the Singleton scope.
    pub fn bind_validation_service<S: ValidationService + 'static>(
        &mut self,
        service: S,
    ) -> &mut Self {
        let erased: Arc<dyn ValidationService> = Arc::new(service);
        self.bind_extension(VALIDATION_SERVICE_NAME, erased)
    }

    /// Binds a configuration listener under
    /// `user/services/ConfigurationListener` in the Singleton scope.
    pub fn bind_configuration_listener<S: ConfigurationListener + 'static>(
        &mut self,
        service: S,
    ) -> &mut Self {
        let erased: Arc<dyn ConfigurationListener> = Arc::new(service);
        self.bind_extension(CONFIGURATION_LISTENER_NAME, erased)
    }

    /// Binds an injection resolver under `user/services/InjectionResolver`
    /// in the Singleton scope.
    pub fn bind_injection_resolver<S: InjectionResolver + 'static>(
        &mut self,
        service: S,
    ) -> &mut Self {
        let erased: Arc<dyn InjectionResolver> = Arc::new(service);
        self.bind_extension(INJECTION_RESOLVER_NAME, erased)
    }

    fn bind_extension<T: Send + Sync + 'static>(&mut self, name: &'static str, value: T) -> &mut Self {
        self.finish_current();
        let key = ServiceKey::new_unchecked(USER_SERVICES_NAMESPACE, name, &[]);
        let mut descriptor = WriteableDescriptor::constant(&key, value);
        let scoped = descriptor.set_scope(SINGLETON).map(|_| ());
        self.record(scoped);
        self.current = Some(descriptor);
        self
    }

    fn finish(mut self) -> IocResult<Vec<WriteableDescriptor>> {
        self.finish_current();
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.completed),
        }
    }
}

/// Creates a locator with the given name (failing if it exists) and binds
/// the descriptors described by the binder method into it.
pub fn create_and_bind<F>(name: &str, method: F) -> IocResult<ServiceLocator>
where
    F: FnOnce(&mut Binder) -> IocResult<()>,
{
    let locator = new_locator(name, CreationPolicy::FailIfPresent)?;
    bind_into_locator(&locator, method)?;
    Ok(locator)
}

/// Binds the descriptors described by the binder method into an existing
/// locator, committing them as one configuration.
pub fn bind_into_locator<F>(locator: &ServiceLocator, method: F) -> IocResult<()>
where
    F: FnOnce(&mut Binder) -> IocResult<()>,
{
    let mut binder = Binder::new();
    method(&mut binder)?;
    let descriptors = binder.finish()?;

    let configuration: DynamicConfiguration = locator.dynamic_configuration()?;
    for descriptor in &descriptors {
        configuration.bind(descriptor)?;
    }
    configuration.commit()
}

/// Unbinds every service matching any of the given keys.
pub fn unbind_services(locator: &ServiceLocator, keys: &[ServiceKey]) -> IocResult<()> {
    let configuration = locator.dynamic_configuration()?;
    for key in keys {
        configuration.add_remove_filter(Arc::new(ServiceKeyFilter::new(key)))?;
    }
    configuration.commit()
}

/// Unbinds the services with the given names from the default namespace.
pub fn unbind_default(locator: &ServiceLocator, names: &[&str]) -> IocResult<()> {
    let mut keys = Vec::with_capacity(names.len());
    for name in names {
        keys.push(ServiceKey::in_default_namespace(name)?);
    }
    unbind_services(locator, &keys)
}
