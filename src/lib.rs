//! # berth
//!
//! A namespace-keyed service locator and dependency injection runtime:
//! an in-process registry that stores service descriptors under structured
//! keys, resolves lookups under rank/visibility/qualifier rules,
//! instantiates services inside pluggable scopes with cycle detection and
//! destruction, and applies dynamic configuration changes under a
//! generation-based concurrency guard.
//!
//! ## Features
//!
//! - **Structured keys**: services live under `namespace/name@qualifier`
//!   keys, not types; many implementations can share a name and compete by
//!   rank
//! - **Dynamic reconfiguration**: binds and unbinds are transactional
//!   batches, rejected when the locator changed underneath them
//! - **Pluggable scopes**: PerLookup, Singleton, Immediate (started on
//!   bind), Context (per-cancellable-context caches), and user-defined
//!   scopes
//! - **Structural injection**: fields declare their dependencies with a
//!   small annotation grammar; lazy providers and optional dependencies
//!   are built in
//! - **Extension services**: validation, error reporting, configuration
//!   listeners, and custom injection resolvers are themselves services
//!
//! ## Quick Start
//!
//! ```rust
//! use berth::{create_and_bind, Injectable, InjectionPlan, ServiceKey};
//! use std::sync::Arc;
//!
//! #[derive(Default)]
//! struct EchoService;
//!
//! impl EchoService {
//!     fn echo(&self, message: &str) -> String {
//!         message.to_string()
//!     }
//! }
//!
//! impl Injectable for EchoService {}
//!
//! #[derive(Default)]
//! struct MusicService {
//!     echo: Option<Arc<EchoService>>,
//! }
//!
//! impl Injectable for MusicService {
//!     fn injection_plan(plan: &mut InjectionPlan<Self>) {
//!         plan.field("echo", "EchoService", |music, echo| {
//!             music.echo = Some(echo);
//!         });
//!     }
//! }
//!
//! let locator = create_and_bind("quick_start", |binder| {
//!     binder.bind::<EchoService>("EchoService");
//!     binder.bind::<MusicService>("MusicService");
//!     Ok(())
//! })
//! .unwrap();
//!
//! let key = ServiceKey::in_default_namespace("MusicService").unwrap();
//! let music: Arc<MusicService> = locator.get_typed(&key).unwrap();
//! assert_eq!(music.echo.as_ref().unwrap().echo("la"), "la");
//!
//! locator.shutdown();
//! ```
//!
//! ## Scopes
//!
//! Every descriptor names its scope. `Singleton` services are created once
//! per locator and destroyed in reverse creation order on shutdown;
//! `PerLookup` services are created fresh for every lookup and owned by
//! the caller. The `Immediate` and `Context` scopes are enabled per
//! locator with [`enable_immediate_scope`] and [`enable_context_scope`].

use std::any::Any;
use std::sync::Arc;

// Module declarations
pub mod binder;
pub mod cancellation;
pub mod configuration;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod extension;
pub mod filter;
pub mod immediate;
pub mod inject;
pub mod key;
pub mod locator;
pub mod provider;
pub mod scope;

// Internal modules
mod internal;
mod store;

/// A type-erased, shared service instance.
pub type ServiceRef = Arc<dyn Any + Send + Sync>;

/// The default namespace for application services.
pub const DEFAULT_NAMESPACE: &str = "default";

/// The namespace for built-in system services.
pub const SYSTEM_NAMESPACE: &str = "system";

/// The namespace contextual scope implementations are bound into, under
/// the scope's own name.
pub const CONTEXTUAL_SCOPE_NAMESPACE: &str = "sys/scope";

/// The namespace for user-supplied extension services such as the
/// ErrorService or ValidationService.
pub const USER_SERVICES_NAMESPACE: &str = "user/services";

/// The scope in which every lookup creates a new instance.
pub const PER_LOOKUP: &str = "PerLookup";

/// The scope in which an instance is created exactly once per locator.
pub const SINGLETON: &str = "Singleton";

/// The scope in which services are started as soon as they are bound.
pub const IMMEDIATE_SCOPE: &str = "ImmediateScope";

/// The scope in which instances are cached per context.
pub const CONTEXT_SCOPE: &str = "ContextScope";

/// The name of the ServiceLocator service, in the system namespace.
pub const SERVICE_LOCATOR_NAME: &str = "ServiceLocator";

/// The name of the DynamicConfigurationService, in the system namespace.
pub const DYNAMIC_CONFIGURATION_SERVICE_NAME: &str = "DynamicConfigurationService";

/// The name of the context creation service, bound in the Context scope
/// when that scope is enabled.
pub const CONTEXT_CREATION_SERVICE_NAME: &str = "ContextCreationService";

/// The name implementations of ErrorService must have, in the
/// `user/services` namespace.
pub const ERROR_SERVICE_NAME: &str = "ErrorService";

/// The name implementations of ValidationService must have, in the
/// `user/services` namespace.
pub const VALIDATION_SERVICE_NAME: &str = "ValidationService";

/// The name implementations of ConfigurationListener must have, in the
/// `user/services` namespace.
pub const CONFIGURATION_LISTENER_NAME: &str = "ConfigurationListener";

/// The name implementations of InjectionResolver must have, in the
/// `user/services` namespace.
pub const INJECTION_RESOLVER_NAME: &str = "InjectionResolver";

/// The qualifier carried by the built-in system injection resolver, so
/// user resolvers can delegate to it.
pub const SYSTEM_INJECT_RESOLVER_QUALIFIER: &str = "SystemInjectionResolver";

// Re-export core types
pub use binder::{bind_into_locator, create_and_bind, unbind_default, unbind_services, Binder};
pub use cancellation::CancellationToken;
pub use configuration::{DynamicConfiguration, DynamicConfigurationService};
pub use context::{
    current_context, enable_context_scope, ContextCreationService, ContextGuard, LocatorContext,
};
pub use descriptor::{CreateFn, Descriptor, DestroyFn, Visibility, WriteableDescriptor};
pub use error::{IocError, IocResult, MultiError};
pub use extension::{
    ConfigurationListener, ErrorInformation, ErrorService, FailureKind, Operation,
    ValidationInformation, ValidationService, Validator,
};
pub use filter::{AllFilter, Filter, IdFilter, NamedFilter, ServiceKeyFilter};
pub use immediate::enable_immediate_scope;
pub use inject::{Injectable, Injected, Injectee, InjectionPlan, InjectionResolver};
pub use key::ServiceKey;
pub use locator::{new_locator, CreationPolicy, LocatorState, ServiceLocator};
pub use provider::Provider;
pub use scope::ContextualScope;
