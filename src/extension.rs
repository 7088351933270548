//! Extension services: validation, error reporting, and configuration
//! listeners.
//!
//! Implementations are ordinary services bound in the `user/services`
//! namespace under the recognized names, in the Singleton scope, stored
//! type-erased as `Arc<dyn Trait>` values. The locator instantiates them
//! eagerly when a commit changes their set, so they are callable before
//! any user code observes the new configuration.

use std::fmt;
use std::sync::Arc;

use crate::descriptor::Descriptor;
use crate::error::{IocError, IocResult};
use crate::filter::Filter;

/// The operation a validator is being consulted about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// The candidate descriptor is being added to the locator.
    Bind,
    /// The candidate descriptor is being removed from the locator.
    Unbind,
    /// The candidate descriptor is being looked up.
    Lookup,
}

impl Operation {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Operation::Bind => "BIND",
            Operation::Unbind => "UNBIND",
            Operation::Lookup => "LOOKUP",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a validator is shown: the operation, the candidate descriptor,
/// and (for lookups on behalf of an injection point) the descriptor being
/// injected into and the filter driving the lookup.
pub struct ValidationInformation<'a> {
    operation: Operation,
    candidate: &'a Arc<Descriptor>,
    injectee: Option<&'a Arc<Descriptor>>,
    filter: Option<&'a dyn Filter>,
}

impl<'a> ValidationInformation<'a> {
    pub(crate) fn new(
        operation: Operation,
        candidate: &'a Arc<Descriptor>,
        injectee: Option<&'a Arc<Descriptor>>,
        filter: Option<&'a dyn Filter>,
    ) -> ValidationInformation<'a> {
        ValidationInformation {
            operation,
            candidate,
            injectee,
            filter,
        }
    }

    /// The operation being performed.
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// The descriptor being bound, unbound, or looked up.
    pub fn candidate(&self) -> &Arc<Descriptor> {
        self.candidate
    }

    /// The descriptor of the service being injected into, when this is a
    /// lookup on behalf of an injection point. None for direct lookups and
    /// for bind/unbind.
    pub fn injectee_descriptor(&self) -> Option<&Arc<Descriptor>> {
        self.injectee
    }

    /// The filter used for the lookup. None for bind/unbind.
    pub fn filter(&self) -> Option<&dyn Filter> {
        self.filter
    }
}

/// Decides whether an operation on a matching descriptor may proceed.
///
/// A non-Ok return blocks the operation. For lookups the error is not
/// surfaced to the caller: the candidate is silently dropped from the
/// results and the failure is handed to the error services.
pub trait Validator: Send + Sync {
    /// Called for BIND, UNBIND, and LOOKUP of descriptors that passed the
    /// owning service's filter.
    fn validate(&self, info: &ValidationInformation<'_>) -> IocResult<()>;
}

/// A validation extension: a filter narrowing which descriptors are seen,
/// plus the validator invoked for them.
///
/// Implementations must be bound in the Singleton scope under
/// `user/services/ValidationService`; commits enforce this.
pub trait ValidationService: Send + Sync {
    /// Limits the descriptors passed to the validator. Meant purely for
    /// narrowing; no validation decisions should happen here.
    fn filter(&self) -> Arc<dyn Filter>;

    /// The validator run for descriptors that pass the filter.
    fn validator(&self) -> Arc<dyn Validator>;
}

/// The class of failure an error service is being told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A dynamic configuration commit failed.
    DynamicConfiguration,
    /// A service could not be created.
    ServiceCreation,
    /// A lookup validator rejected a candidate.
    LookupValidation,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::DynamicConfiguration => "DYNAMIC_CONFIGURATION_FAILURE",
            FailureKind::ServiceCreation => "SERVICE_CREATION_FAILURE",
            FailureKind::LookupValidation => "LOOKUP_VALIDATION_FAILURE",
        })
    }
}

/// Everything an error service is told about one failure.
pub struct ErrorInformation {
    kind: FailureKind,
    descriptor: Option<Arc<Descriptor>>,
    injectee_type: Option<&'static str>,
    injectee_descriptor: Option<Arc<Descriptor>>,
    error: IocError,
}

impl ErrorInformation {
    pub(crate) fn new(
        kind: FailureKind,
        descriptor: Option<Arc<Descriptor>>,
        injectee_type: Option<&'static str>,
        injectee_descriptor: Option<Arc<Descriptor>>,
        error: IocError,
    ) -> ErrorInformation {
        ErrorInformation {
            kind,
            descriptor,
            injectee_type,
            injectee_descriptor,
            error,
        }
    }

    /// The class of failure.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// The descriptor associated with the failure, if known.
    pub fn descriptor(&self) -> Option<&Arc<Descriptor>> {
        self.descriptor.as_ref()
    }

    /// The type being injected into when a creation failed, if known.
    pub fn injectee_type(&self) -> Option<&'static str> {
        self.injectee_type
    }

    /// The descriptor of the injectee, if known.
    pub fn injectee_descriptor(&self) -> Option<&Arc<Descriptor>> {
        self.injectee_descriptor.as_ref()
    }

    /// The underlying error.
    pub fn error(&self) -> &IocError {
        &self.error
    }
}

impl fmt::Display for ErrorInformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorInformation({}", self.kind)?;
        if let Some(descriptor) = &self.descriptor {
            write!(f, ",{descriptor}")?;
        }
        write!(f, ",{})", self.error)
    }
}

/// Notified when dynamic configuration, creation, or lookup validation
/// fails.
///
/// Returned errors and panics from `on_failure` are swallowed; an error
/// service can never trigger further error reporting. Implementations must
/// be bound in the Singleton scope under `user/services/ErrorService`.
pub trait ErrorService: Send + Sync {
    /// Invoked when a failure happens. The return value is ignored.
    fn on_failure(&self, info: &ErrorInformation) -> IocResult<()>;
}

/// Notified after every successful commit, under the post-commit state,
/// in registration order.
///
/// Implementations must be bound in the Singleton scope under
/// `user/services/ConfigurationListener`.
pub trait ConfigurationListener: Send + Sync {
    /// Called once per successful commit, after the generation bump.
    fn configuration_changed(&self);
}

impl<T: ErrorService + ?Sized> ErrorService for Arc<T> {
    fn on_failure(&self, info: &ErrorInformation) -> IocResult<()> {
        (**self).on_failure(info)
    }
}

impl<T: ValidationService + ?Sized> ValidationService for Arc<T> {
    fn filter(&self) -> Arc<dyn Filter> {
        (**self).filter()
    }

    fn validator(&self) -> Arc<dyn Validator> {
        (**self).validator()
    }
}

impl<T: Validator + ?Sized> Validator for Arc<T> {
    fn validate(&self, info: &ValidationInformation<'_>) -> IocResult<()> {
        (**self).validate(info)
    }
}

impl<T: ConfigurationListener + ?Sized> ConfigurationListener for Arc<T> {
    fn configuration_changed(&self) {
        (**self).configuration_changed()
    }
}
