//! The Immediate scope: services that start when they are bound.
//!
//! The scope itself caches like Singleton. The work of starting services
//! "immediately" is done by a configuration listener that diffs the set of
//! immediate descriptors on every commit and drives creation and
//! destruction through a dedicated worker thread, so user commits never
//! block on service startup.

use std::any::Any;
use std::collections::HashMap;
use std::sync::mpsc::{channel, Sender};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::binder::bind_into_locator;
use crate::descriptor::{Descriptor, DescriptorId};
use crate::error::IocResult;
use crate::extension::ConfigurationListener;
use crate::filter::{Filter, ServiceKeyFilter};
use crate::internal::activation;
use crate::internal::compute_cache::ComputeCache;
use crate::key::ServiceKey;
use crate::locator::{ServiceLocator, WeakLocator};
use crate::scope::{destroy_all, destroy_instance, ContextualScope};
use crate::{ServiceRef, CONTEXTUAL_SCOPE_NAMESPACE, IMMEDIATE_SCOPE};

struct ImmediateFilter;

impl Filter for ImmediateFilter {
    fn matches(&self, descriptor: &Descriptor) -> bool {
        descriptor.scope_name() == IMMEDIATE_SCOPE
    }
}

pub(crate) struct ImmediateScopeData {
    cache: ComputeCache,
}

impl ImmediateScopeData {
    fn new() -> ImmediateScopeData {
        ImmediateScopeData {
            cache: ComputeCache::new(),
        }
    }
}

impl ContextualScope for ImmediateScopeData {
    fn scope_name(&self) -> &str {
        IMMEDIATE_SCOPE
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

enum Job {
    Create(Arc<Descriptor>),
    Destroy(Arc<Descriptor>),
}

struct ListenerState {
    known: HashMap<DescriptorId, Arc<Descriptor>>,
    sender: Sender<Job>,
}

/// Watches commits for immediate descriptors and keeps the started set in
/// sync: newly bound descriptors are started on the worker, unbound ones
/// are destroyed there. Bound under `user/services/ConfigurationListener`
/// by [`enable_immediate_scope`].
struct ImmediateListener {
    locator: WeakLocator,
    state: Mutex<ListenerState>,
}

impl ImmediateListener {
    fn new(locator: WeakLocator, scope: Arc<ImmediateScopeData>) -> ImmediateListener {
        let (sender, receiver) = channel::<Job>();

        let worker_locator = locator.clone();
        thread::spawn(move || {
            // Each job is its own logical chain. The loop ends when the
            // listener (the only sender) is dropped.
            for job in receiver {
                let Ok(locator) = worker_locator.upgrade() else {
                    break;
                };
                activation::enter_fresh(|| match job {
                    Job::Create(descriptor) => {
                        debug!(
                            target: "berth",
                            descriptor = %descriptor,
                            "starting immediate service"
                        );
                        if let Err(err) = locator.get_from_descriptor(&descriptor) {
                            warn!(
                                target: "berth",
                                descriptor = %descriptor,
                                error = %err,
                                "failed to start immediate service"
                            );
                        }
                    }
                    Job::Destroy(descriptor) => {
                        if let Err(err) = scope.destroy_one(&locator, &descriptor) {
                            warn!(
                                target: "berth",
                                descriptor = %descriptor,
                                error = %err,
                                "failed to destroy immediate service"
                            );
                        }
                    }
                });
            }
        });

        ImmediateListener {
            locator,
            state: Mutex::new(ListenerState {
                known: HashMap::new(),
                sender,
            }),
        }
    }
}

impl ConfigurationListener for ImmediateListener {
    fn configuration_changed(&self) {
        let Ok(locator) = self.locator.upgrade() else {
            return;
        };
        let Ok(descriptors) = locator.descriptors(&ImmediateFilter) else {
            return;
        };

        let mut state = self.state.lock();

        let mut next: HashMap<DescriptorId, Arc<Descriptor>> = HashMap::new();
        let mut added = Vec::new();
        for descriptor in descriptors {
            if !state.known.contains_key(&descriptor.id()) {
                added.push(descriptor.clone());
            }
            next.insert(descriptor.id(), descriptor);
        }
        let removed: Vec<Arc<Descriptor>> = state
            .known
            .values()
            .filter(|known| !next.contains_key(&known.id()))
            .cloned()
            .collect();

        state.known = next;

        for descriptor in removed {
            let _ = state.sender.send(Job::Destroy(descriptor));
        }
        for descriptor in added {
            let _ = state.sender.send(Job::Create(descriptor));
        }
    }
}

/// Enables the Immediate scope on the locator: services bound into it are
/// started within bounded time of the binding commit, with no explicit
/// lookup, and destroyed within bounded time of being unbound. Idempotent.
pub fn enable_immediate_scope(locator: &ServiceLocator) -> IocResult<()> {
    let key = ServiceKey::contextual_scope(IMMEDIATE_SCOPE)?;
    if locator
        .best_descriptor(&ServiceKeyFilter::new(&key))?
        .is_some()
    {
        return Ok(());
    }

    let scope = Arc::new(ImmediateScopeData::new());
    let listener = ImmediateListener::new(locator.downgrade(), scope.clone());
    let erased: Arc<dyn ContextualScope> = scope;

    // The commit of this binding fires the listener, which picks up any
    // immediate descriptors bound before the scope was enabled.
    bind_into_locator(locator, move |binder| {
        binder
            .bind_constant(IMMEDIATE_SCOPE, erased)
            .in_namespace(CONTEXTUAL_SCOPE_NAMESPACE)
            .qualified_by(IMMEDIATE_SCOPE);
        binder
            .bind_configuration_listener(listener)
            .qualified_by(IMMEDIATE_SCOPE);
        Ok(())
    })
}
