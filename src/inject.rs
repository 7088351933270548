//! Structural injection: per-type injection plans, the resolver chain, and
//! the system resolver's annotation grammar.
//!
//! There is no runtime reflection here. A type opts into injection by
//! implementing [`Injectable`] and declaring a plan: one entry per field,
//! carrying the field's annotation and a closure that assigns the resolved
//! value. The annotation grammar is the stable external contract:
//!
//! ```text
//! key    := [namespace '#'] name ('@' qualifier)* (',' option)*
//! option := "optional"
//! ```
//!
//! The namespace defaults to `default` when omitted. Unknown options fail
//! the field. `optional` permits the key to be absent: the assignment is
//! skipped and the field keeps its `Default` value.

use std::any::type_name;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::descriptor::Descriptor;
use crate::error::{panic_message, IocError, IocResult, MultiError};
use crate::key::ServiceKey;
use crate::locator::ServiceLocator;
use crate::provider::Provider;
use crate::{ServiceRef, DEFAULT_NAMESPACE};

/// A value produced by an injection resolver for one field.
pub enum Injected {
    /// A resolved service instance to assign into the field.
    Instance(ServiceRef),
    /// A lazy provider to assign into a provider field.
    Provider(Provider),
    /// The field was consumed but intentionally left at its default value
    /// (an `optional` key that was absent).
    Skip,
}

/// Describes one injection point being considered: the descriptor under
/// construction, the target type, and the annotated field.
pub struct Injectee {
    descriptor: Option<Arc<Descriptor>>,
    target: &'static str,
    field: &'static str,
    annotation: &'static str,
    provider: bool,
}

impl Injectee {
    /// The descriptor being created, or None for `inject(&mut value)`.
    pub fn descriptor(&self) -> Option<&Arc<Descriptor>> {
        self.descriptor.as_ref()
    }

    /// The type name of the structure being injected into.
    pub fn target_type(&self) -> &'static str {
        self.target
    }

    /// The name of the field being considered.
    pub fn field_name(&self) -> &'static str {
        self.field
    }

    /// The raw annotation string on the field.
    pub fn annotation(&self) -> &'static str {
        self.annotation
    }

    /// True if the field expects a [`Provider`] rather than an instance.
    pub fn wants_provider(&self) -> bool {
        self.provider
    }
}

/// A strategy that resolves values for injection points.
///
/// Resolvers are consulted in lookup order until one consumes the field by
/// returning `Ok(Some(_))`. `Ok(None)` passes the field to the next
/// resolver; if nobody consumes it, the field is left uninjected. Errors
/// are collected and fail the construction once every field has been
/// visited.
///
/// Implementations are bound in the Singleton scope under
/// `user/services/InjectionResolver`. The built-in system resolver is
/// always present, qualified with
/// [`SYSTEM_INJECT_RESOLVER_QUALIFIER`](crate::SYSTEM_INJECT_RESOLVER_QUALIFIER)
/// and bound at rank 0, so user resolvers outrank it with any positive
/// rank and may delegate to it through that qualifier.
pub trait InjectionResolver: Send + Sync {
    /// Produces the value for one injection point, or `Ok(None)` to let
    /// the next resolver try.
    fn resolve(&self, locator: &ServiceLocator, injectee: &Injectee) -> IocResult<Option<Injected>>;
}

impl<T: InjectionResolver + ?Sized> InjectionResolver for Arc<T> {
    fn resolve(&self, locator: &ServiceLocator, injectee: &Injectee) -> IocResult<Option<Injected>> {
        (**self).resolve(locator, injectee)
    }
}

/// One field entry of an injection plan.
struct FieldPlan<T: ?Sized> {
    field: &'static str,
    annotation: &'static str,
    provider: bool,
    assign: Box<dyn Fn(&mut T, Injected) -> IocResult<()> + Send + Sync>,
}

/// The injection plan of a type: the ordered list of fields to resolve
/// and assign during construction.
pub struct InjectionPlan<T: ?Sized> {
    fields: Vec<FieldPlan<T>>,
}

impl<T: 'static> InjectionPlan<T> {
    pub(crate) fn new() -> InjectionPlan<T> {
        InjectionPlan { fields: Vec::new() }
    }

    /// Declares a service field. The annotation follows the module-level
    /// grammar; the closure assigns the resolved, downcast instance.
    pub fn field<D, F>(&mut self, field: &'static str, annotation: &'static str, assign: F) -> &mut Self
    where
        D: Send + Sync + 'static,
        F: Fn(&mut T, Arc<D>) + Send + Sync + 'static,
    {
        self.fields.push(FieldPlan {
            field,
            annotation,
            provider: false,
            assign: Box::new(move |target, injected| match injected {
                Injected::Instance(service) => {
                    let typed = service.downcast::<D>().map_err(|_| {
                        IocError::injection(
                            type_name::<T>(),
                            field,
                            format!("resolved service is not a {}", type_name::<D>()),
                        )
                    })?;
                    assign(target, typed);
                    Ok(())
                }
                Injected::Skip => Ok(()),
                Injected::Provider(_) => Err(IocError::injection(
                    type_name::<T>(),
                    field,
                    "a provider was produced for a non-provider field",
                )),
            }),
        });
        self
    }

    /// Declares a provider field: instead of resolving eagerly, the field
    /// receives a [`Provider`] bound to the annotation's key.
    pub fn provider_field<F>(
        &mut self,
        field: &'static str,
        annotation: &'static str,
        assign: F,
    ) -> &mut Self
    where
        F: Fn(&mut T, Provider) + Send + Sync + 'static,
    {
        self.fields.push(FieldPlan {
            field,
            annotation,
            provider: true,
            assign: Box::new(move |target, injected| match injected {
                Injected::Provider(provider) => {
                    assign(target, provider);
                    Ok(())
                }
                Injected::Skip => Ok(()),
                Injected::Instance(_) => Err(IocError::injection(
                    type_name::<T>(),
                    field,
                    "an instance was produced for a provider field",
                )),
            }),
        });
        self
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A type whose instances the locator can build and inject.
///
/// `Default` produces the blank value; the plan describes which fields are
/// injected and how. [`post_construct`](Injectable::post_construct) is the
/// optional initializer: it runs after field assignment for
/// descriptor-driven construction (under a panic guard), and is skipped
/// for [`ServiceLocator::inject`], which only resolves fields into an
/// already-constructed value.
///
/// # Examples
///
/// ```rust
/// use berth::{Injectable, InjectionPlan};
/// use std::sync::Arc;
///
/// #[derive(Default)]
/// struct EchoService;
///
/// impl Injectable for EchoService {}
///
/// #[derive(Default)]
/// struct MusicService {
///     echo: Option<Arc<EchoService>>,
/// }
///
/// impl Injectable for MusicService {
///     fn injection_plan(plan: &mut InjectionPlan<Self>) {
///         plan.field("echo", "EchoService", |music, echo| {
///             music.echo = Some(echo);
///         });
///     }
/// }
/// ```
pub trait Injectable: Default + Send + Sync + 'static {
    /// Declares the fields to inject. The default plan is empty.
    fn injection_plan(_plan: &mut InjectionPlan<Self>) {}

    /// Initializer invoked after field assignment, with the owning
    /// descriptor when construction is descriptor-driven.
    fn post_construct(&mut self, _descriptor: Option<&Descriptor>) -> IocResult<()> {
        Ok(())
    }
}

/// Parses a field annotation into its service key and options.
pub(crate) fn parse_inject_annotation(annotation: &str) -> IocResult<(ServiceKey, bool)> {
    let mut parts = annotation.split(',');
    let key_part = parts.next().unwrap_or("");

    let mut optional = false;
    for option in parts {
        match option {
            "optional" => optional = true,
            unknown => {
                return Err(IocError::invalid(format!(
                    "unknown injection option \"{unknown}\" in \"{annotation}\""
                )))
            }
        }
    }

    let (namespace, rest) = match key_part.split_once('#') {
        Some((namespace, rest)) => (namespace, rest),
        None => (DEFAULT_NAMESPACE, key_part),
    };

    let mut names = rest.split('@');
    let name = names.next().unwrap_or("");
    let qualifiers: Vec<&str> = names.collect();

    let key = ServiceKey::new(namespace, name, qualifiers)?;
    Ok((key, optional))
}

/// The built-in resolver implementing the annotation grammar.
pub(crate) struct SystemInjectionResolver;

impl InjectionResolver for SystemInjectionResolver {
    fn resolve(&self, locator: &ServiceLocator, injectee: &Injectee) -> IocResult<Option<Injected>> {
        let (key, optional) = parse_inject_annotation(injectee.annotation()).map_err(|err| {
            IocError::injection(injectee.target_type(), injectee.field_name(), err.to_string())
        })?;

        if injectee.wants_provider() {
            let provider = Provider::new(locator.downgrade(), key, injectee.descriptor().cloned());
            return Ok(Some(Injected::Provider(provider)));
        }

        match locator.get_for(&key, injectee.descriptor()) {
            Ok(service) => Ok(Some(Injected::Instance(service))),
            Err(err) if optional && err.is_not_found() => Ok(Some(Injected::Skip)),
            Err(err) => Err(err),
        }
    }
}

/// Resolves every field of the plan into `target`. Resolver errors are
/// collected per field; the chain moves on to the next resolver after an
/// error, and a field nobody consumes is left at its default value.
pub(crate) fn resolve_fields<T: Injectable>(
    locator: &ServiceLocator,
    descriptor: Option<&Arc<Descriptor>>,
    target: &mut T,
) -> IocResult<()> {
    let mut plan = InjectionPlan::new();
    T::injection_plan(&mut plan);
    if plan.is_empty() {
        return Ok(());
    }

    let resolvers = locator.injection_resolvers();
    let mut errors = MultiError::new();

    for field in &plan.fields {
        let injectee = Injectee {
            descriptor: descriptor.cloned(),
            target: type_name::<T>(),
            field: field.field,
            annotation: field.annotation,
            provider: field.provider,
        };

        for resolver in &resolvers {
            let outcome = catch_unwind(AssertUnwindSafe(|| resolver.resolve(locator, &injectee)));
            match outcome {
                Ok(Ok(None)) => continue,
                Ok(Ok(Some(injected))) => {
                    if let Err(err) = (field.assign)(target, injected) {
                        errors.push(err);
                    }
                    break;
                }
                Ok(Err(err)) => {
                    errors.push(err);
                }
                Err(payload) => {
                    errors.push(IocError::injection(
                        injectee.target,
                        field.field,
                        format!("injection resolver panicked: {}", panic_message(payload)),
                    ));
                }
            }
        }
    }

    errors.into_result()
}

/// Builds a `T` for the given descriptor: default value, field resolution,
/// then the panic-guarded initializer. Failures are reported to the error
/// services as service-creation failures.
pub(crate) fn construct<T: Injectable>(
    locator: &ServiceLocator,
    descriptor: &Arc<Descriptor>,
) -> IocResult<T> {
    let mut value = T::default();

    if let Err(err) = resolve_fields(locator, Some(descriptor), &mut value) {
        return Err(locator.report_creation_failure(descriptor, Some(type_name::<T>()), err));
    }

    let initialized =
        catch_unwind(AssertUnwindSafe(|| value.post_construct(Some(descriptor.as_ref()))));
    match initialized {
        Ok(Ok(())) => Ok(value),
        Ok(Err(err)) => Err(locator.report_creation_failure(descriptor, Some(type_name::<T>()), err)),
        Err(payload) => Err(locator.report_creation_failure(
            descriptor,
            Some(type_name::<T>()),
            IocError::invalid(format!("initializer panicked: {}", panic_message(payload))),
        )),
    }
}
