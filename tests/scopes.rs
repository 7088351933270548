use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use berth::{
    create_and_bind, ContextualScope, Descriptor, IocResult, ServiceKey, ServiceLocator,
    ServiceRef, CONTEXTUAL_SCOPE_NAMESPACE, PER_LOOKUP, SINGLETON,
};

#[test]
fn test_concurrent_singleton_created_once() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();

    let locator = create_and_bind("scopes_concurrent_singleton", move |binder| {
        binder.bind_with_creator("Shared", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(25));
            Ok(Arc::new(7usize) as ServiceRef)
        });
        Ok(())
    })
    .unwrap();

    let key = ServiceKey::in_default_namespace("Shared").unwrap();
    crossbeam_utils::thread::scope(|scope| {
        let mut handles = Vec::new();
        for _ in 0..8 {
            let locator = locator.clone();
            let key = key.clone();
            handles.push(scope.spawn(move |_| locator.get(&key).unwrap()));
        }

        let services: Vec<ServiceRef> =
            handles.into_iter().map(|handle| handle.join().unwrap()).collect();
        for service in &services {
            assert!(Arc::ptr_eq(service, &services[0]));
        }
    })
    .unwrap();

    assert_eq!(created.load(Ordering::SeqCst), 1);
    locator.shutdown();
}

#[test]
fn test_singleton_cycle_is_an_error_not_a_deadlock() {
    let locator = create_and_bind("scopes_cycle", |binder| {
        binder.bind_with_creator("SelfLoop", |locator, _| locator.get_default("SelfLoop", &[]));
        Ok(())
    })
    .unwrap();

    let err = locator.get_default("SelfLoop", &[]).unwrap_err();
    assert!(err.is_cycle(), "expected a cycle error, got: {err}");

    locator.shutdown();
}

#[test]
fn test_mutual_cycle_between_singletons() {
    let locator = create_and_bind("scopes_mutual_cycle", |binder| {
        binder.bind_with_creator("Ping", |locator, _| locator.get_default("Pong", &[]));
        binder.bind_with_creator("Pong", |locator, _| locator.get_default("Ping", &[]));
        Ok(())
    })
    .unwrap();

    let err = locator.get_default("Ping", &[]).unwrap_err();
    assert!(err.is_cycle(), "expected a cycle error, got: {err}");

    locator.shutdown();
}

#[test]
fn test_unknown_scope_is_a_scope_error() {
    let locator = create_and_bind("scopes_unknown", |binder| {
        binder
            .bind_with_creator("Roamer", |_, _| Ok(Arc::new(()) as ServiceRef))
            .in_scope("Martian");
        Ok(())
    })
    .unwrap();

    let err = locator.get_default("Roamer", &[]).unwrap_err();
    assert!(err.is_scope());
    assert!(err.to_string().contains("Martian"));

    locator.shutdown();
}

struct CountingScope {
    calls: AtomicUsize,
}

impl ContextualScope for CountingScope {
    fn scope_name(&self) -> &str {
        "Counting"
    }

    fn find_or_create(
        &self,
        locator: &ServiceLocator,
        descriptor: &Arc<Descriptor>,
    ) -> IocResult<Option<ServiceRef>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
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

#[test]
fn test_user_defined_scope_is_resolved_through_sys_scope() {
    let scope = Arc::new(CountingScope {
        calls: AtomicUsize::new(0),
    });
    let erased: Arc<dyn ContextualScope> = scope.clone();

    let locator = create_and_bind("scopes_user_defined", move |binder| {
        binder
            .bind_constant("Counting", erased)
            .in_namespace(CONTEXTUAL_SCOPE_NAMESPACE)
            .qualified_by("Counting");
        binder
            .bind_with_creator("Tenant", |_, _| Ok(Arc::new(()) as ServiceRef))
            .in_scope("Counting");
        Ok(())
    })
    .unwrap();

    let key = ServiceKey::in_default_namespace("Tenant").unwrap();
    let first = locator.get(&key).unwrap();
    let second = locator.get(&key).unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(scope.calls.load(Ordering::SeqCst), 2);

    locator.shutdown();
}

struct InactiveScope;

impl ContextualScope for InactiveScope {
    fn scope_name(&self) -> &str {
        "Dormant"
    }

    fn find_or_create(
        &self,
        _: &ServiceLocator,
        _: &Arc<Descriptor>,
    ) -> IocResult<Option<ServiceRef>> {
        Ok(None)
    }

    fn contains(&self, _: &Descriptor) -> bool {
        false
    }

    fn destroy_one(&self, _: &ServiceLocator, _: &Arc<Descriptor>) -> IocResult<()> {
        Ok(())
    }

    fn is_active(&self) -> bool {
        false
    }

    fn shutdown(&self, _: &ServiceLocator) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn test_inactive_scope_refuses_lookups() {
    let erased: Arc<dyn ContextualScope> = Arc::new(InactiveScope);

    let locator = create_and_bind("scopes_inactive", move |binder| {
        binder
            .bind_constant("Dormant", erased)
            .in_namespace(CONTEXTUAL_SCOPE_NAMESPACE);
        binder
            .bind_with_creator("Sleeper", |_, _| Ok(Arc::new(()) as ServiceRef))
            .in_scope("Dormant");
        Ok(())
    })
    .unwrap();

    let err = locator.get_default("Sleeper", &[]).unwrap_err();
    assert!(err.is_scope());
    assert!(err.to_string().contains("not active"));

    locator.shutdown();
}

#[test]
fn test_scope_choice_per_descriptor() {
    let locator = create_and_bind("scopes_mixed", |binder| {
        binder
            .bind_with_creator("Stateless", |_, _| Ok(Arc::new(()) as ServiceRef))
            .in_scope(PER_LOOKUP);
        binder
            .bind_with_creator("Stateful", |_, _| Ok(Arc::new(()) as ServiceRef))
            .in_scope(SINGLETON);
        Ok(())
    })
    .unwrap();

    let stateless = ServiceKey::in_default_namespace("Stateless").unwrap();
    assert!(!Arc::ptr_eq(
        &locator.get(&stateless).unwrap(),
        &locator.get(&stateless).unwrap()
    ));

    let stateful = ServiceKey::in_default_namespace("Stateful").unwrap();
    assert!(Arc::ptr_eq(
        &locator.get(&stateful).unwrap(),
        &locator.get(&stateful).unwrap()
    ));

    locator.shutdown();
}

#[test]
fn test_failed_creation_is_retried_on_next_lookup() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    let locator = create_and_bind("scopes_retry", move |binder| {
        binder.bind_with_creator("Flaky", move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(berth::IocError::Invalid("first attempt fails".into()))
            } else {
                Ok(Arc::new(()) as ServiceRef)
            }
        });
        Ok(())
    })
    .unwrap();

    let key = ServiceKey::in_default_namespace("Flaky").unwrap();
    assert!(locator.get(&key).is_err());
    assert!(locator.get(&key).is_ok());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    locator.shutdown();
}
