//! Error types for the service locator.

use std::fmt;

use thiserror::Error;

/// Service locator errors.
///
/// Every fallible operation in berth returns one of these. The variants map
/// one-to-one onto the failure classes of the runtime: malformed input,
/// missed lookups, stale or closed configurations, shut-down locators,
/// creation cycles, scope problems, rejected validations, failed creators,
/// and injection mismatches.
///
/// # Examples
///
/// ```rust
/// use berth::{ServiceKey, new_locator, CreationPolicy};
///
/// let locator = new_locator("error_docs", CreationPolicy::FailIfPresent).unwrap();
/// let key = ServiceKey::in_default_namespace("Missing").unwrap();
/// let err = locator.get(&key).unwrap_err();
/// assert!(err.is_not_found());
/// assert_eq!(err.to_string(), "service was not found: default/Missing");
/// locator.shutdown();
/// ```
#[derive(Debug, Clone, Error)]
pub enum IocError {
    /// Malformed name, namespace, qualifier, visibility, or policy.
    #[error("{0}")]
    Invalid(String),

    /// No descriptor matched the requested key.
    #[error("service was not found: {key}")]
    NotFound {
        /// Display form of the key that missed.
        key: String,
    },

    /// The locator was reconfigured after this configuration was opened.
    #[error("there was an update to the service locator after this dynamic configuration was created")]
    StaleConfiguration,

    /// The configuration was already committed or closed.
    #[error("this dynamic configuration has been committed or closed")]
    ConfigurationClosed,

    /// The locator has been shut down.
    #[error("service locator {name} has been shut down")]
    LocatorShutdown {
        /// Name of the locator that refused the operation.
        name: String,
    },

    /// A creation cycle was detected inside a caching scope.
    #[error("a cycle was detected involving {descriptor}")]
    Cycle {
        /// Display form of the descriptor that re-entered its own creation.
        descriptor: String,
    },

    /// Unknown or inactive scope, or a scope service of the wrong shape.
    #[error("{0}")]
    Scope(String),

    /// A validation service rejected a bind, unbind, or lookup.
    #[error("validation rejected {operation} of {descriptor}: {reason}")]
    Validation {
        /// The operation that was rejected ("BIND", "UNBIND", "LOOKUP").
        operation: &'static str,
        /// Display form of the rejected descriptor.
        descriptor: String,
        /// The error the validator returned.
        reason: Box<IocError>,
    },

    /// A create function returned an error or panicked.
    #[error("could not create service {descriptor}: {reason}")]
    Creation {
        /// Display form of the descriptor whose creator failed.
        descriptor: String,
        /// The underlying failure.
        reason: Box<IocError>,
    },

    /// An injection resolver failed or a resolved value did not fit the field.
    #[error("could not inject field {field} of {target}: {detail}")]
    Injection {
        /// Type name of the structure being injected into.
        target: &'static str,
        /// Name of the field that failed.
        field: &'static str,
        /// What went wrong.
        detail: String,
    },

    /// The context this lookup ran under has been cancelled.
    #[error("context {id} is no longer active")]
    ContextDead {
        /// Identifier of the dead context.
        id: i32,
    },

    /// Several failures rolled into one, preserving every cause.
    #[error(transparent)]
    Multi(MultiError),

    /// Marker wrapper recording that error services already saw this error.
    /// Prevents double-reporting as the error travels up through layers.
    #[error(transparent)]
    Reported(Box<IocError>),
}

impl IocError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        IocError::Invalid(msg.into())
    }

    pub(crate) fn not_found(key: impl fmt::Display) -> Self {
        IocError::NotFound { key: key.to_string() }
    }

    pub(crate) fn scope(msg: impl Into<String>) -> Self {
        IocError::Scope(msg.into())
    }

    pub(crate) fn injection(target: &'static str, field: &'static str, detail: impl Into<String>) -> Self {
        IocError::Injection { target, field, detail: detail.into() }
    }

    pub(crate) fn creation(descriptor: impl fmt::Display, reason: IocError) -> Self {
        IocError::Creation {
            descriptor: descriptor.to_string(),
            reason: Box::new(reason),
        }
    }

    /// Wraps this error in the reported marker, if it is not already marked.
    pub(crate) fn mark_reported(self) -> Self {
        if matches!(self, IocError::Reported(_)) {
            self
        } else {
            IocError::Reported(Box::new(self))
        }
    }

    /// True if error services have already been handed this error.
    pub(crate) fn already_reported(&self) -> bool {
        matches!(self, IocError::Reported(_))
    }

    /// The error with any reported marker peeled off.
    pub fn unwrapped(&self) -> &IocError {
        match self {
            IocError::Reported(inner) => inner.unwrapped(),
            other => other,
        }
    }

    fn matches(&self, pred: &dyn Fn(&IocError) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        match self {
            IocError::Reported(inner) => inner.matches(pred),
            IocError::Creation { reason, .. } => reason.matches(pred),
            IocError::Validation { reason, .. } => reason.matches(pred),
            IocError::Multi(multi) => multi.errors.iter().any(|e| e.matches(pred)),
            _ => false,
        }
    }

    /// True if this error is, or wraps, a missed lookup.
    pub fn is_not_found(&self) -> bool {
        self.matches(&|e| matches!(e, IocError::NotFound { .. }))
    }

    /// True if this error is, or wraps, a creation cycle.
    pub fn is_cycle(&self) -> bool {
        self.matches(&|e| matches!(e, IocError::Cycle { .. }))
    }

    /// True if this error is, or wraps, a stale-configuration failure.
    pub fn is_stale(&self) -> bool {
        self.matches(&|e| matches!(e, IocError::StaleConfiguration))
    }

    /// True if this error is, or wraps, a closed-configuration failure.
    pub fn is_closed(&self) -> bool {
        self.matches(&|e| matches!(e, IocError::ConfigurationClosed))
    }

    /// True if this error is, or wraps, a shut-down-locator failure.
    pub fn is_shutdown(&self) -> bool {
        self.matches(&|e| matches!(e, IocError::LocatorShutdown { .. }))
    }

    /// True if this error is, or wraps, a validation rejection.
    pub fn is_validation(&self) -> bool {
        self.matches(&|e| matches!(e, IocError::Validation { .. }))
    }

    /// True if this error is, or wraps, a scope failure.
    pub fn is_scope(&self) -> bool {
        self.matches(&|e| matches!(e, IocError::Scope(_)))
    }

    /// True if this error is, or wraps, a creation failure.
    pub fn is_creation(&self) -> bool {
        self.matches(&|e| matches!(e, IocError::Creation { .. }))
    }

    /// True if this error is, or wraps, an injection failure.
    pub fn is_injection(&self) -> bool {
        self.matches(&|e| matches!(e, IocError::Injection { .. }))
    }

    /// True if this error is, or wraps, a dead-context failure.
    pub fn is_context_dead(&self) -> bool {
        self.matches(&|e| matches!(e, IocError::ContextDead { .. }))
    }
}

/// Result type for service locator operations.
pub type IocResult<T> = Result<T, IocError>;

/// Aggregates any number of errors while preserving every underlying cause.
///
/// A `MultiError` holding exactly one cause renders as that cause alone;
/// more than one renders as a numbered list, one cause per line.
#[derive(Debug, Clone, Default)]
pub struct MultiError {
    errors: Vec<IocError>,
}

impl MultiError {
    /// Creates an empty aggregator.
    pub fn new() -> Self {
        MultiError::default()
    }

    /// Adds an error. Nested `MultiError`s are flattened.
    pub fn push(&mut self, err: IocError) {
        match err {
            IocError::Multi(multi) => self.errors.extend(multi.errors),
            other => self.errors.push(other),
        }
    }

    /// The collected errors.
    pub fn errors(&self) -> &[IocError] {
        &self.errors
    }

    /// True if at least one error was collected.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// `Ok(())` when empty, otherwise the aggregate as a single error.
    pub fn into_result(self) -> IocResult<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(IocError::Multi(self))
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            0 => write!(f, "there are no errors"),
            1 => write!(f, "{}", self.errors[0]),
            _ => {
                for (index, err) in self.errors.iter().enumerate() {
                    if index > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}. {}", index + 1, err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for MultiError {}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
