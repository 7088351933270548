//! A cycle-detecting instance cache.
//!
//! At most one creation is in flight per descriptor identity. Re-entry by
//! the activation that is already computing a key is a creation cycle and
//! fails immediately; other activations park until the first computation
//! settles. Ready entries remember insertion order so shutdown can destroy
//! instances in reverse bind order.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::activation::{self, ActivationId};
use crate::descriptor::{Descriptor, DescriptorId};
use crate::error::{IocError, IocResult};
use crate::ServiceRef;

enum Entry {
    InFlight(ActivationId),
    Ready(Arc<Descriptor>, ServiceRef),
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<DescriptorId, Entry>,
    order: Vec<DescriptorId>,
}

pub(crate) struct ComputeCache {
    state: Mutex<CacheState>,
    settled: Condvar,
}

impl ComputeCache {
    pub(crate) fn new() -> ComputeCache {
        ComputeCache {
            state: Mutex::new(CacheState::default()),
            settled: Condvar::new(),
        }
    }

    /// Returns the cached instance for the descriptor, computing it with
    /// `create` if absent. The creator runs without the cache lock held.
    pub(crate) fn compute<F>(
        &self,
        descriptor: &Arc<Descriptor>,
        create: F,
    ) -> IocResult<Option<ServiceRef>>
    where
        F: FnOnce() -> IocResult<Option<ServiceRef>>,
    {
        let me = activation::current();
        let id = descriptor.id();

        {
            let mut state = self.state.lock();
            loop {
                match state.entries.get(&id) {
                    Some(Entry::Ready(_, value)) => return Ok(Some(value.clone())),
                    Some(Entry::InFlight(owner)) if *owner == me => {
                        return Err(IocError::Cycle {
                            descriptor: descriptor.to_string(),
                        });
                    }
                    Some(Entry::InFlight(_)) => self.settled.wait(&mut state),
                    None => {
                        state.entries.insert(id, Entry::InFlight(me));
                        break;
                    }
                }
            }
        }

        let outcome = create();

        let mut state = self.state.lock();
        match &outcome {
            Ok(Some(value)) => {
                state
                    .entries
                    .insert(id, Entry::Ready(descriptor.clone(), value.clone()));
                state.order.push(id);
            }
            _ => {
                state.entries.remove(&id);
            }
        }
        self.settled.notify_all();
        outcome
    }

    pub(crate) fn contains(&self, descriptor: &Descriptor) -> bool {
        matches!(
            self.state.lock().entries.get(&descriptor.id()),
            Some(Entry::Ready(_, _))
        )
    }

    /// Removes a ready entry, returning the instance if one was cached.
    pub(crate) fn remove(&self, descriptor: &Descriptor) -> Option<ServiceRef> {
        let mut state = self.state.lock();
        let id = descriptor.id();
        match state.entries.get(&id) {
            Some(Entry::Ready(_, _)) => {}
            _ => return None,
        }
        let removed = match state.entries.remove(&id) {
            Some(Entry::Ready(_, value)) => Some(value),
            _ => None,
        };
        state.order.retain(|entry| *entry != id);
        self.settled.notify_all();
        removed
    }

    /// Empties the cache, yielding (descriptor, instance) pairs in reverse
    /// insertion order so late-bound dependents come out first.
    pub(crate) fn drain_reverse(&self) -> Vec<(Arc<Descriptor>, ServiceRef)> {
        let mut state = self.state.lock();
        let order = std::mem::take(&mut state.order);
        let mut drained = Vec::with_capacity(order.len());
        for id in order.into_iter().rev() {
            if let Some(Entry::Ready(descriptor, value)) = state.entries.remove(&id) {
                drained.push((descriptor, value));
            }
        }
        state.entries.clear();
        self.settled.notify_all();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::WriteableDescriptor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn descriptor(name: &str, service_id: i64) -> Arc<Descriptor> {
        let mut wd = WriteableDescriptor::new();
        wd.set_create_fn(|_, _| Ok(Arc::new(()) as ServiceRef));
        wd.set_name(name).unwrap();
        Arc::new(Descriptor::materialize(&wd, service_id, 1).unwrap())
    }

    #[test]
    fn test_compute_caches_first_value() {
        let cache = ComputeCache::new();
        let desc = descriptor("A", 1);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .compute(&desc, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(Arc::new(41usize) as ServiceRef))
                })
                .unwrap()
                .unwrap();
            assert_eq!(*value.downcast_ref::<usize>().unwrap(), 41);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentry_is_a_cycle() {
        let cache = ComputeCache::new();
        let desc = descriptor("Loop", 1);

        let err = cache
            .compute(&desc, || {
                cache.compute(&desc, || Ok(Some(Arc::new(()) as ServiceRef)))
            })
            .unwrap_err();
        assert!(err.is_cycle());

        // The failed computation left nothing behind.
        assert!(!cache.contains(&desc));
    }

    #[test]
    fn test_error_does_not_poison_the_key() {
        let cache = ComputeCache::new();
        let desc = descriptor("Flaky", 1);

        let err = cache
            .compute(&desc, || Err(IocError::invalid("first try fails")))
            .unwrap_err();
        assert!(matches!(err, IocError::Invalid(_)));

        let value = cache
            .compute(&desc, || Ok(Some(Arc::new(7i32) as ServiceRef)))
            .unwrap()
            .unwrap();
        assert_eq!(*value.downcast_ref::<i32>().unwrap(), 7);
    }

    #[test]
    fn test_concurrent_compute_creates_once() {
        let cache = Arc::new(ComputeCache::new());
        let desc = descriptor("Shared", 1);
        let calls = Arc::new(AtomicUsize::new(0));

        crossbeam_utils::thread::scope(|scope| {
            for _ in 0..8 {
                let cache = cache.clone();
                let desc = desc.clone();
                let calls = calls.clone();
                scope.spawn(move |_| {
                    let value = cache
                        .compute(&desc, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(10));
                            Ok(Some(Arc::new(5u8) as ServiceRef))
                        })
                        .unwrap()
                        .unwrap();
                    assert_eq!(*value.downcast_ref::<u8>().unwrap(), 5);
                });
            }
        })
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drain_reverse_order() {
        let cache = ComputeCache::new();
        for (index, name) in ["First", "Second", "Third"].iter().enumerate() {
            let desc = descriptor(name, index as i64);
            cache
                .compute(&desc, || Ok(Some(Arc::new(index) as ServiceRef)))
                .unwrap();
        }

        let drained = cache.drain_reverse();
        let names: Vec<&str> = drained.iter().map(|(d, _)| d.name()).collect();
        assert_eq!(names, ["Third", "Second", "First"]);
    }

    #[test]
    fn test_remove() {
        let cache = ComputeCache::new();
        let desc = descriptor("Gone", 1);
        cache
            .compute(&desc, || Ok(Some(Arc::new(1u8) as ServiceRef)))
            .unwrap();

        assert!(cache.contains(&desc));
        assert!(cache.remove(&desc).is_some());
        assert!(!cache.contains(&desc));
        assert!(cache.remove(&desc).is_none());
    }
}
