use std::sync::{Arc, Mutex};
use std::time::Duration;

use berth::{
    create_and_bind, current_context, enable_context_scope, CancellationToken,
    ContextCreationService, LocatorContext, ServiceKey, ServiceRef, CONTEXT_CREATION_SERVICE_NAME,
    CONTEXT_SCOPE,
};

struct Counter {
    value: usize,
}

fn counted_locator(
    name: &str,
) -> (berth::ServiceLocator, Arc<Mutex<usize>>, Arc<Mutex<Vec<usize>>>) {
    let created = Arc::new(Mutex::new(0));
    let destroyed = Arc::new(Mutex::new(Vec::new()));

    let on_create = created.clone();
    let on_destroy = destroyed.clone();
    let locator = create_and_bind(name, move |binder| {
        binder
            .bind_with_creator("ScopedCounter", move |_, _| {
                let mut created = on_create.lock().unwrap();
                *created += 1;
                Ok(Arc::new(Counter { value: *created }) as ServiceRef)
            })
            .in_scope(CONTEXT_SCOPE)
            .and_destroy_with(move |_, _, instance| {
                let counter = instance.downcast_ref::<Counter>().unwrap();
                on_destroy.lock().unwrap().push(counter.value);
                Ok(())
            });
        Ok(())
    })
    .unwrap();
    enable_context_scope(&locator).unwrap();

    (locator, created, destroyed)
}

#[test]
fn test_context_isolation_and_destruction() {
    let (locator, created, destroyed) = counted_locator("context_isolation");

    let parent1 = CancellationToken::new();
    let parent2 = CancellationToken::new();
    let context1 = LocatorContext::create(&locator, &parent1).unwrap();
    let context2 = LocatorContext::create(&locator, &parent2).unwrap();
    assert_ne!(context1.id(), context2.id());

    let key = ServiceKey::in_default_namespace("ScopedCounter").unwrap();
    let a: Arc<Counter> = context1.lookup_typed(&key).unwrap();
    let b: Arc<Counter> = context2.lookup_typed(&key).unwrap();

    // Distinct instances per context, cached within each context.
    assert_ne!(a.value, b.value);
    let a_again: Arc<Counter> = context1.lookup_typed(&key).unwrap();
    assert!(Arc::ptr_eq(&a, &a_again));
    assert_eq!(*created.lock().unwrap(), 2);

    // Cancelling context1's parent destroys A exactly once.
    parent1.cancel();
    assert!(context1.wait_done(Duration::from_secs(5)));
    assert_eq!(*destroyed.lock().unwrap(), vec![a.value]);
    assert!(!context1.is_active());

    // B is intact and still served from context2.
    let b_again: Arc<Counter> = context2.lookup_typed(&key).unwrap();
    assert!(Arc::ptr_eq(&b, &b_again));

    // The dead context refuses lookups.
    let err = context1.lookup(&key).unwrap_err();
    assert!(err.is_context_dead(), "expected a dead context, got: {err}");

    // A second cancellation does not destroy anything twice.
    parent1.cancel();
    assert_eq!(destroyed.lock().unwrap().len(), 1);

    locator.shutdown();
}

#[test]
fn test_context_lookup_requires_an_active_context() {
    let (locator, _, _) = counted_locator("context_required");

    let key = ServiceKey::in_default_namespace("ScopedCounter").unwrap();
    let err = locator.get(&key).unwrap_err();
    assert!(err.is_scope(), "expected a scope error, got: {err}");

    locator.shutdown();
}

#[test]
fn test_nested_creations_see_the_entered_context() {
    let (locator, _, _) = counted_locator("context_nested");

    let parent = CancellationToken::new();
    let context = LocatorContext::create(&locator, &parent).unwrap();

    // Inside the guard, plain locator lookups resolve against the context.
    let entered = context.enter();
    assert_eq!(current_context().unwrap().id(), context.id());
    let key = ServiceKey::in_default_namespace("ScopedCounter").unwrap();
    let first = locator.get(&key).unwrap();
    let second = locator.get(&key).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    drop(entered);

    assert!(current_context().is_none());
    locator.shutdown();
}

#[test]
fn test_context_creation_service_remembers_its_context() {
    let (locator, _, _) = counted_locator("context_creation_service");

    let parent = CancellationToken::new();
    let context1 = LocatorContext::create(&locator, &parent).unwrap();
    let context2 = LocatorContext::create(&locator, &parent).unwrap();

    let key = ServiceKey::in_default_namespace(CONTEXT_CREATION_SERVICE_NAME).unwrap();
    let service1: Arc<ContextCreationService> = context1.lookup_typed(&key).unwrap();
    let service2: Arc<ContextCreationService> = context2.lookup_typed(&key).unwrap();

    assert_eq!(service1.creation_context().unwrap().id(), context1.id());
    assert_eq!(service2.creation_context().unwrap().id(), context2.id());

    locator.shutdown();
}

#[test]
fn test_shutdown_destroys_all_contexts() {
    let (locator, _, destroyed) = counted_locator("context_shutdown");

    let parent = CancellationToken::new();
    let context1 = LocatorContext::create(&locator, &parent).unwrap();
    let context2 = LocatorContext::create(&locator, &parent).unwrap();

    let key = ServiceKey::in_default_namespace("ScopedCounter").unwrap();
    context1.lookup(&key).unwrap();
    context2.lookup(&key).unwrap();

    locator.shutdown();
    let mut values = destroyed.lock().unwrap().clone();
    values.sort_unstable();
    assert_eq!(values, vec![1, 2]);
}

#[test]
fn test_context_scope_requires_enablement() {
    let locator = create_and_bind("context_not_enabled", |binder| {
        binder
            .bind_with_creator("Orphan", |_, _| Ok(Arc::new(()) as ServiceRef))
            .in_scope(CONTEXT_SCOPE);
        Ok(())
    })
    .unwrap();

    let parent = CancellationToken::new();
    let err = LocatorContext::create(&locator, &parent).unwrap_err();
    assert!(err.is_scope());
    assert!(err.to_string().contains("enable_context_scope"));

    locator.shutdown();
}
