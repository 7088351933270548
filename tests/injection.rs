use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use berth::{
    bind_into_locator, create_and_bind, Descriptor, Injectable, Injected, InjectionPlan,
    InjectionResolver, Injectee, IocResult, Provider, ServiceKey, ServiceLocator, ServiceRef,
    PER_LOOKUP,
};

#[derive(Default)]
struct EchoService;

impl Injectable for EchoService {}

#[derive(Default)]
struct MaybeLogged {
    logger: Option<Arc<String>>,
}

impl Injectable for MaybeLogged {
    fn injection_plan(plan: &mut InjectionPlan<Self>) {
        plan.field("logger", "Logger,optional", |holder, logger| {
            holder.logger = Some(logger);
        });
    }
}

#[test]
fn test_optional_dependency_keeps_default_when_absent() {
    let locator = create_and_bind("injection_optional", |binder| {
        binder.bind::<MaybeLogged>("MaybeLogged").in_scope(PER_LOOKUP);
        Ok(())
    })
    .unwrap();

    let key = ServiceKey::in_default_namespace("MaybeLogged").unwrap();
    let unlogged: Arc<MaybeLogged> = locator.get_typed(&key).unwrap();
    assert!(unlogged.logger.is_none());

    // Bind the dependency and reconstruct: the field fills in.
    bind_into_locator(&locator, |binder| {
        binder.bind_constant("Logger", "file".to_string());
        Ok(())
    })
    .unwrap();

    let logged: Arc<MaybeLogged> = locator.get_typed(&key).unwrap();
    assert_eq!(logged.logger.as_deref(), Some(&"file".to_string()));

    locator.shutdown();
}

#[derive(Default)]
struct NeedsMissing {
    dependency: Option<Arc<String>>,
}

impl Injectable for NeedsMissing {
    fn injection_plan(plan: &mut InjectionPlan<Self>) {
        plan.field("dependency", "NoSuchService", |holder, value| {
            holder.dependency = Some(value);
        });
    }
}

#[test]
fn test_required_dependency_missing_fails_creation() {
    let locator = create_and_bind("injection_required", |binder| {
        binder.bind::<NeedsMissing>("NeedsMissing").in_scope(PER_LOOKUP);
        Ok(())
    })
    .unwrap();

    let err = locator.get_default("NeedsMissing", &[]).unwrap_err();
    assert!(err.is_not_found(), "expected the missing key inside: {err}");

    locator.shutdown();
}

#[derive(Default)]
struct BadOption {
    value: Option<Arc<String>>,
}

impl Injectable for BadOption {
    fn injection_plan(plan: &mut InjectionPlan<Self>) {
        plan.field("value", "Logger,lazy", |holder, value| {
            holder.value = Some(value);
        });
    }
}

#[test]
fn test_unknown_annotation_option_fails_the_field() {
    let locator = create_and_bind("injection_bad_option", |binder| {
        binder.bind::<BadOption>("BadOption").in_scope(PER_LOOKUP);
        Ok(())
    })
    .unwrap();

    let err = locator.get_default("BadOption", &[]).unwrap_err();
    assert!(err.is_injection());
    assert!(err.to_string().contains("lazy"));

    locator.shutdown();
}

#[derive(Default)]
struct Dispatcher {
    line: Option<Provider>,
}

impl Injectable for Dispatcher {
    fn injection_plan(plan: &mut InjectionPlan<Self>) {
        plan.provider_field("line", "Line@primary", |dispatcher, provider| {
            dispatcher.line = Some(provider);
        });
    }
}

#[test]
fn test_provider_field_is_lazy_and_qualifiable() {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();

    let locator = create_and_bind("injection_provider", move |binder| {
        binder.bind::<Dispatcher>("Dispatcher").in_scope(PER_LOOKUP);
        binder
            .bind_with_creator("Line", move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new("primary-line".to_string()) as ServiceRef)
            })
            .in_scope(PER_LOOKUP)
            .qualified_by("primary");
        Ok(())
    })
    .unwrap();

    let dispatcher: Arc<Dispatcher> = locator
        .get_typed(&ServiceKey::in_default_namespace("Dispatcher").unwrap())
        .unwrap();
    let line = dispatcher.line.as_ref().unwrap();

    // Nothing resolved yet.
    assert_eq!(created.load(Ordering::SeqCst), 0);
    assert_eq!(line.key().to_string(), "default/Line@primary");

    let service = line.get().unwrap();
    assert_eq!(service.downcast_ref::<String>().unwrap(), "primary-line");
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(line.get_all().unwrap().len(), 1);

    // Narrowing to a qualifier nothing carries finds nothing.
    let narrowed = line.qualified_by("backup").unwrap();
    assert!(narrowed.get().unwrap_err().is_not_found());

    locator.shutdown();
}

#[test]
fn test_provider_outliving_its_locator_fails_shutdown() {
    let locator = create_and_bind("injection_provider_shutdown", |binder| {
        binder.bind::<Dispatcher>("Dispatcher").in_scope(PER_LOOKUP);
        binder
            .bind_with_creator("Line", |_, _| Ok(Arc::new(()) as ServiceRef))
            .in_scope(PER_LOOKUP)
            .qualified_by("primary");
        Ok(())
    })
    .unwrap();

    let dispatcher: Arc<Dispatcher> = locator
        .get_typed(&ServiceKey::in_default_namespace("Dispatcher").unwrap())
        .unwrap();
    locator.shutdown();
    drop(locator);

    let err = dispatcher.line.as_ref().unwrap().get().unwrap_err();
    assert!(err.is_shutdown());
}

struct FixedResolver;

impl InjectionResolver for FixedResolver {
    fn resolve(&self, _: &ServiceLocator, injectee: &Injectee) -> IocResult<Option<Injected>> {
        if injectee.annotation() == "Fixed" {
            Ok(Some(Injected::Instance(
                Arc::new("from-resolver".to_string()) as ServiceRef,
            )))
        } else {
            Ok(None)
        }
    }
}

#[derive(Default)]
struct MixedSources {
    fixed: Option<Arc<String>>,
    echo: Option<Arc<EchoService>>,
}

impl Injectable for MixedSources {
    fn injection_plan(plan: &mut InjectionPlan<Self>) {
        plan.field("fixed", "Fixed", |mixed, value| {
            mixed.fixed = Some(value);
        });
        plan.field("echo", "EchoService", |mixed, echo| {
            mixed.echo = Some(echo);
        });
    }
}

#[test]
fn test_custom_resolver_wins_fields_it_consumes() {
    let locator = create_and_bind("injection_custom_resolver", |binder| {
        // Outrank the system resolver so the custom one is asked first.
        binder.bind_injection_resolver(FixedResolver).ranked(10);
        binder.bind::<EchoService>("EchoService");
        binder.bind::<MixedSources>("MixedSources").in_scope(PER_LOOKUP);
        Ok(())
    })
    .unwrap();

    let mixed: Arc<MixedSources> = locator
        .get_typed(&ServiceKey::in_default_namespace("MixedSources").unwrap())
        .unwrap();

    // The custom resolver fed one field; the system resolver the other.
    assert_eq!(mixed.fixed.as_deref(), Some(&"from-resolver".to_string()));
    assert!(mixed.echo.is_some());

    locator.shutdown();
}

#[derive(Default)]
struct Standalone {
    echo: Option<Arc<EchoService>>,
}

impl Injectable for Standalone {
    fn injection_plan(plan: &mut InjectionPlan<Self>) {
        plan.field("echo", "EchoService", |standalone, echo| {
            standalone.echo = Some(echo);
        });
    }
}

#[test]
fn test_inject_into_existing_value() {
    let locator = create_and_bind("injection_inject_into", |binder| {
        binder.bind::<EchoService>("EchoService");
        Ok(())
    })
    .unwrap();

    // Standalone is never bound; its fields are injected in place.
    let mut standalone = Standalone::default();
    locator.inject(&mut standalone).unwrap();
    assert!(standalone.echo.is_some());

    locator.shutdown();
}

#[derive(Default)]
struct Initialized {
    ready: bool,
    descriptor_name: String,
}

impl Injectable for Initialized {
    fn post_construct(&mut self, descriptor: Option<&Descriptor>) -> IocResult<()> {
        self.ready = true;
        if let Some(descriptor) = descriptor {
            self.descriptor_name = descriptor.name().to_string();
        }
        Ok(())
    }
}

#[test]
fn test_post_construct_runs_with_owning_descriptor() {
    let locator = create_and_bind("injection_post_construct", |binder| {
        binder.bind::<Initialized>("Initialized").in_scope(PER_LOOKUP);
        Ok(())
    })
    .unwrap();

    let service: Arc<Initialized> = locator
        .get_typed(&ServiceKey::in_default_namespace("Initialized").unwrap())
        .unwrap();
    assert!(service.ready);
    assert_eq!(service.descriptor_name, "Initialized");

    locator.shutdown();
}

#[derive(Default)]
struct ExplodingInit;

impl Injectable for ExplodingInit {
    fn post_construct(&mut self, _: Option<&Descriptor>) -> IocResult<()> {
        panic!("initializer blew up");
    }
}

#[test]
fn test_panicking_initializer_becomes_creation_error() {
    let locator = create_and_bind("injection_panicky_init", |binder| {
        binder.bind::<ExplodingInit>("ExplodingInit").in_scope(PER_LOOKUP);
        Ok(())
    })
    .unwrap();

    let err = locator.get_default("ExplodingInit", &[]).unwrap_err();
    assert!(err.is_creation(), "expected a creation error, got: {err}");

    locator.shutdown();
}

#[derive(Default)]
struct WrongType {
    number: Option<Arc<u32>>,
}

impl Injectable for WrongType {
    fn injection_plan(plan: &mut InjectionPlan<Self>) {
        plan.field("number", "Logger", |wrong, number| {
            wrong.number = Some(number);
        });
    }
}

#[test]
fn test_type_mismatch_is_an_injection_error() {
    let locator = create_and_bind("injection_type_mismatch", |binder| {
        binder.bind_constant("Logger", "not a number".to_string());
        binder.bind::<WrongType>("WrongType").in_scope(PER_LOOKUP);
        Ok(())
    })
    .unwrap();

    let err = locator.get_default("WrongType", &[]).unwrap_err();
    assert!(err.is_injection());

    locator.shutdown();
}
