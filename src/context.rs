//! The Context scope: per-context instance caches tied to a cancellation
//! primitive.
//!
//! A [`LocatorContext`] is created against a parent [`CancellationToken`].
//! Lookups of context-scoped services discover the active context through
//! a thread-local stack, pushed by [`LocatorContext::enter`] (and by
//! [`LocatorContext::lookup`]) around every creation triggered from within
//! the context. When the parent token fires, every instance created under
//! the context is destroyed exactly once and the context becomes dead:
//! further lookups against it fail.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::binder::bind_into_locator;
use crate::cancellation::CancellationToken;
use crate::descriptor::Descriptor;
use crate::error::{IocError, IocResult};
use crate::filter::ServiceKeyFilter;
use crate::inject::Injectable;
use crate::internal::compute_cache::ComputeCache;
use crate::key::ServiceKey;
use crate::locator::{ServiceLocator, WeakLocator};
use crate::scope::{destroy_all, destroy_instance, ContextualScope};
use crate::{
    ServiceRef, CONTEXTUAL_SCOPE_NAMESPACE, CONTEXT_CREATION_SERVICE_NAME, CONTEXT_SCOPE,
};

static NEXT_CONTEXT_ID: AtomicI32 = AtomicI32::new(1);

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Arc<LocatorContext>>> = const { RefCell::new(Vec::new()) };
}

/// The context at the top of this thread's active-context stack.
pub fn current_context() -> Option<Arc<LocatorContext>> {
    CONTEXT_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Pops the entered context when dropped.
pub struct ContextGuard {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// One live context: an id, a liveness flag, and the scope it registers
/// its instances with.
///
/// # Examples
///
/// ```rust
/// use berth::{create_and_bind, enable_context_scope, CancellationToken, LocatorContext, ServiceKey, CONTEXT_SCOPE};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// #[derive(Default)]
/// struct PerRequest;
/// impl berth::Injectable for PerRequest {}
///
/// let locator = create_and_bind("context_docs", |binder| {
///     binder.bind::<PerRequest>("PerRequest").in_scope(CONTEXT_SCOPE);
///     Ok(())
/// })
/// .unwrap();
/// enable_context_scope(&locator).unwrap();
///
/// let parent = CancellationToken::new();
/// let context = LocatorContext::create(&locator, &parent).unwrap();
///
/// let key = ServiceKey::in_default_namespace("PerRequest").unwrap();
/// let first = context.lookup(&key).unwrap();
/// let second = context.lookup(&key).unwrap();
/// assert!(Arc::ptr_eq(&first, &second));
///
/// parent.cancel();
/// assert!(context.wait_done(Duration::from_secs(1)));
/// assert!(context.lookup(&key).is_err());
/// locator.shutdown();
/// ```
pub struct LocatorContext {
    id: i32,
    alive: AtomicBool,
    done: CancellationToken,
    locator: WeakLocator,
    scope: ContextScopeData,
}

impl std::fmt::Debug for LocatorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocatorContext")
            .field("id", &self.id)
            .field("alive", &self.alive)
            .finish()
    }
}

impl LocatorContext {
    /// Creates a new context whose lifetime is tied to the parent token:
    /// when the token fires, the context's instances are destroyed and the
    /// context becomes unusable.
    pub fn create(
        locator: &ServiceLocator,
        parent: &CancellationToken,
    ) -> IocResult<Arc<LocatorContext>> {
        let key = ServiceKey::contextual_scope(CONTEXT_SCOPE)?;
        let service = locator.get(&key).map_err(|err| {
            if err.is_not_found() {
                IocError::scope(
                    "there is no ContextScope; call enable_context_scope to install one",
                )
            } else {
                err
            }
        })?;
        let erased = service
            .downcast_ref::<Arc<dyn ContextualScope>>()
            .cloned()
            .ok_or_else(|| {
                IocError::scope("the ContextScope service is not a contextual scope")
            })?;
        let scope = erased
            .as_any()
            .downcast_ref::<ContextScopeData>()
            .cloned()
            .ok_or_else(|| {
                IocError::scope("the ContextScope service is not the built-in context scope")
            })?;

        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::SeqCst);
        scope.add_context(id)?;

        let context = Arc::new(LocatorContext {
            id,
            alive: AtomicBool::new(true),
            done: CancellationToken::new(),
            locator: locator.downgrade(),
            scope,
        });

        let teardown = context.clone();
        parent.on_cancel(move || teardown.tear_down());

        Ok(context)
    }

    /// The id of this context.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// True until the parent token fires.
    pub fn is_active(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Makes this the active context on the current thread until the
    /// guard drops. Lookups of context-scoped services inside the guard
    /// resolve against this context's cache.
    pub fn enter(self: &Arc<Self>) -> ContextGuard {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        ContextGuard {
            _not_send: std::marker::PhantomData,
        }
    }

    /// Looks up a service with this context active.
    pub fn lookup(self: &Arc<Self>, key: &ServiceKey) -> IocResult<ServiceRef> {
        let locator = self.locator.upgrade()?;
        let _entered = self.enter();
        locator.get(key)
    }

    /// Looks up a service with this context active and downcasts it.
    pub fn lookup_typed<T: Send + Sync + 'static>(
        self: &Arc<Self>,
        key: &ServiceKey,
    ) -> IocResult<Arc<T>> {
        let locator = self.locator.upgrade()?;
        let _entered = self.enter();
        locator.get_typed(key)
    }

    /// Waits for the context's teardown to finish: all destroy functions
    /// for its instances have run. Returns false on timeout.
    pub fn wait_done(&self, timeout: Duration) -> bool {
        self.done.wait_timeout(timeout)
    }

    fn tear_down(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            debug!(target: "berth", context = self.id, "tearing down context");
            match self.locator.upgrade() {
                Ok(locator) => self.scope.remove_context(Some(&locator), self.id),
                Err(_) => self.scope.remove_context(None, self.id),
            }
            self.done.cancel();
        }
    }
}

struct ContextScopeInner {
    contexts: Mutex<HashMap<i32, Arc<ComputeCache>>>,
}

/// The Context scope implementation: a two-level cache, outer keyed by
/// context id, inner identical to the Singleton cache per context.
#[derive(Clone)]
pub(crate) struct ContextScopeData {
    inner: Arc<ContextScopeInner>,
}

impl ContextScopeData {
    fn new() -> ContextScopeData {
        ContextScopeData {
            inner: Arc::new(ContextScopeInner {
                contexts: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn add_context(&self, id: i32) -> IocResult<()> {
        let mut contexts = self.inner.contexts.lock();
        if contexts.contains_key(&id) {
            return Err(IocError::scope(format!("there is already a context {id}")));
        }
        contexts.insert(id, Arc::new(ComputeCache::new()));
        Ok(())
    }

    fn remove_context(&self, locator: Option<&ServiceLocator>, id: i32) {
        let Some(cache) = self.inner.contexts.lock().remove(&id) else {
            return;
        };
        let drained = cache.drain_reverse();
        if let Some(locator) = locator {
            destroy_all(locator, drained);
        }
    }

    /// The cache of the active context, or why there is none.
    fn active_cache(&self) -> IocResult<Arc<ComputeCache>> {
        let context = current_context().ok_or_else(|| {
            IocError::scope("context-scoped services must be looked up from within a context")
        })?;
        if !context.is_active() {
            return Err(IocError::ContextDead { id: context.id() });
        }
        self.inner
            .contexts
            .lock()
            .get(&context.id())
            .cloned()
            .ok_or(IocError::ContextDead { id: context.id() })
    }
}

impl ContextualScope for ContextScopeData {
    fn scope_name(&self) -> &str {
        CONTEXT_SCOPE
    }

    fn find_or_create(
        &self,
        locator: &ServiceLocator,
        descriptor: &Arc<Descriptor>,
    ) -> IocResult<Option<ServiceRef>> {
        let cache = self.active_cache()?;
        cache.compute(descriptor, || {
            locator.create_from_descriptor(descriptor).map(Some)
        })
    }

    fn contains(&self, descriptor: &Descriptor) -> bool {
        self.active_cache()
            .map(|cache| cache.contains(descriptor))
            .unwrap_or(false)
    }

    fn destroy_one(&self, locator: &ServiceLocator, descriptor: &Arc<Descriptor>) -> IocResult<()> {
        let cache = self.active_cache()?;
        match cache.remove(descriptor) {
            Some(instance) => destroy_instance(locator, descriptor, instance),
            None => Ok(()),
        }
    }

    fn shutdown(&self, locator: &ServiceLocator) {
        let caches: Vec<Arc<ComputeCache>> =
            self.inner.contexts.lock().drain().map(|(_, cache)| cache).collect();
        for cache in caches {
            destroy_all(locator, cache.drain_reverse());
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A service in the Context scope that remembers the context it was
/// created inside. Inject it into other context-scoped services that need
/// their originating context.
#[derive(Default)]
pub struct ContextCreationService {
    context: Option<Arc<LocatorContext>>,
}

impl ContextCreationService {
    /// The context this service was created under.
    pub fn creation_context(&self) -> Option<&Arc<LocatorContext>> {
        self.context.as_ref()
    }
}

impl Injectable for ContextCreationService {
    fn post_construct(&mut self, _descriptor: Option<&Descriptor>) -> IocResult<()> {
        self.context = current_context();
        if self.context.is_none() {
            return Err(IocError::scope(
                "the ContextCreationService must be created from within a context",
            ));
        }
        Ok(())
    }
}

/// Enables the Context scope on the locator, along with the
/// [`ContextCreationService`]. Idempotent.
pub fn enable_context_scope(locator: &ServiceLocator) -> IocResult<()> {
    let key = ServiceKey::contextual_scope(CONTEXT_SCOPE)?;
    if locator
        .best_descriptor(&ServiceKeyFilter::new(&key))?
        .is_some()
    {
        return Ok(());
    }

    let erased: Arc<dyn ContextualScope> = Arc::new(ContextScopeData::new());
    bind_into_locator(locator, move |binder| {
        binder
            .bind_constant(CONTEXT_SCOPE, erased)
            .in_namespace(CONTEXTUAL_SCOPE_NAMESPACE)
            .qualified_by(CONTEXT_SCOPE);
        binder
            .bind::<ContextCreationService>(CONTEXT_CREATION_SERVICE_NAME)
            .in_scope(CONTEXT_SCOPE);
        Ok(())
    })
}
