use std::sync::{Arc, Mutex};

use berth::{
    bind_into_locator, create_and_bind, unbind_default, AllFilter, ErrorInformation, ErrorService,
    FailureKind, Filter, IocError, IocResult, Operation, ServiceKey, ServiceRef,
    ValidationInformation, ValidationService, Validator, PER_LOOKUP,
};

const DO_NOT_BIND: &str = "DoNotBind";
const NEVER_UNBIND: &str = "NeverUnbind";
const HIDDEN: &str = "Hidden";

struct NamePolicyValidator;

impl Validator for NamePolicyValidator {
    fn validate(&self, info: &ValidationInformation<'_>) -> IocResult<()> {
        let name = info.candidate().name();
        match info.operation() {
            Operation::Bind if name == DO_NOT_BIND => {
                Err(IocError::Invalid(format!("we will not bind {}", info.candidate())))
            }
            Operation::Unbind if name == NEVER_UNBIND => {
                Err(IocError::Invalid(format!("we will not unbind {}", info.candidate())))
            }
            Operation::Lookup if name == HIDDEN => {
                Err(IocError::Invalid(format!("{} is hidden", info.candidate())))
            }
            _ => Ok(()),
        }
    }
}

struct NamePolicyValidation;

impl ValidationService for NamePolicyValidation {
    fn filter(&self) -> Arc<dyn Filter> {
        // We check everything.
        Arc::new(AllFilter)
    }

    fn validator(&self) -> Arc<dyn Validator> {
        Arc::new(NamePolicyValidator)
    }
}

#[derive(Clone)]
struct RecordedFailure {
    kind: FailureKind,
    descriptor: String,
}

struct RecordingErrorService {
    seen: Arc<Mutex<Vec<RecordedFailure>>>,
}

impl ErrorService for RecordingErrorService {
    fn on_failure(&self, info: &ErrorInformation) -> IocResult<()> {
        self.seen.lock().unwrap().push(RecordedFailure {
            kind: info.kind(),
            descriptor: info
                .descriptor()
                .map(|descriptor| descriptor.name().to_string())
                .unwrap_or_default(),
        });
        Ok(())
    }
}

fn guarded_locator(name: &str, seen: Arc<Mutex<Vec<RecordedFailure>>>) -> berth::ServiceLocator {
    create_and_bind(name, move |binder| {
        binder.bind_validation_service(NamePolicyValidation);
        binder.bind_error_service(RecordingErrorService { seen });
        Ok(())
    })
    .unwrap()
}

#[test]
fn test_validation_blocks_bind_and_fails_whole_commit() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let locator = guarded_locator("validation_bind", seen.clone());

    let err = bind_into_locator(&locator, |binder| {
        binder
            .bind_with_creator(DO_NOT_BIND, |_, _| Ok(Arc::new(()) as ServiceRef))
            .in_scope(PER_LOOKUP);
        binder
            .bind_with_creator("Simple", |_, _| Ok(Arc::new(()) as ServiceRef))
            .in_scope(PER_LOOKUP);
        Ok(())
    })
    .unwrap_err();
    assert!(err.is_validation(), "expected a validation error, got: {err}");

    // The error service saw a configuration failure naming the offender.
    let events = seen.lock().unwrap();
    assert!(events
        .iter()
        .any(|event| event.kind == FailureKind::DynamicConfiguration
            && event.descriptor == DO_NOT_BIND));
    drop(events);

    // Simple was in the failed batch, so it never arrived.
    assert!(locator.get_default("Simple", &[]).unwrap_err().is_not_found());

    locator.shutdown();
}

#[test]
fn test_validation_blocks_unbind() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let locator = guarded_locator("validation_unbind", seen.clone());

    bind_into_locator(&locator, |binder| {
        binder
            .bind_with_creator(NEVER_UNBIND, |_, _| Ok(Arc::new(()) as ServiceRef))
            .in_scope(PER_LOOKUP);
        Ok(())
    })
    .unwrap();

    let err = unbind_default(&locator, &[NEVER_UNBIND]).unwrap_err();
    assert!(err.is_validation());

    // Still bound, still resolvable.
    assert!(locator.get_default(NEVER_UNBIND, &[]).is_ok());

    locator.shutdown();
}

#[test]
fn test_lookup_validation_drops_candidates_without_failing() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let locator = guarded_locator("validation_lookup", seen.clone());

    bind_into_locator(&locator, |binder| {
        binder
            .bind_with_creator(HIDDEN, |_, _| Ok(Arc::new(()) as ServiceRef))
            .in_scope(PER_LOOKUP);
        binder
            .bind_with_creator("Visible", |_, _| Ok(Arc::new(()) as ServiceRef))
            .in_scope(PER_LOOKUP);
        Ok(())
    })
    .unwrap();

    // The hidden service is filtered out of lookups, not an error.
    assert!(locator.get_default(HIDDEN, &[]).unwrap_err().is_not_found());
    assert!(locator.get_default("Visible", &[]).is_ok());
    assert!(locator
        .get_all(&ServiceKey::in_default_namespace(HIDDEN).unwrap())
        .unwrap()
        .is_empty());

    let events = seen.lock().unwrap();
    assert!(events
        .iter()
        .any(|event| event.kind == FailureKind::LookupValidation && event.descriptor == HIDDEN));

    locator.shutdown();
}

#[test]
fn test_rejected_commit_leaves_locator_bit_identical() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let locator = guarded_locator("validation_rollback", seen);

    bind_into_locator(&locator, |binder| {
        binder.bind_constant("Anchor", "anchored".to_string());
        Ok(())
    })
    .unwrap();

    let before: Vec<String> = locator
        .descriptors(&AllFilter)
        .unwrap()
        .iter()
        .map(|descriptor| descriptor.to_string())
        .collect();

    // One rejected bind poisons the whole batch: additions and removals.
    let configuration = locator.dynamic_configuration().unwrap();
    let key = ServiceKey::in_default_namespace(DO_NOT_BIND).unwrap();
    configuration
        .bind(&berth::WriteableDescriptor::constant(&key, 1u8))
        .unwrap();
    configuration
        .add_remove_filter(Arc::new(berth::ServiceKeyFilter::new(
            &ServiceKey::in_default_namespace("Anchor").unwrap(),
        )))
        .unwrap();
    assert!(configuration.commit().unwrap_err().is_validation());

    let after: Vec<String> = locator
        .descriptors(&AllFilter)
        .unwrap()
        .iter()
        .map(|descriptor| descriptor.to_string())
        .collect();
    assert_eq!(before, after);
    assert!(locator.get_default("Anchor", &[]).is_ok());

    // A fresh configuration against the unchanged generation commits fine.
    bind_into_locator(&locator, |binder| {
        binder.bind_constant("Afterwards", 2u8);
        Ok(())
    })
    .unwrap();

    locator.shutdown();
}

struct PanickyErrorService;

impl ErrorService for PanickyErrorService {
    fn on_failure(&self, _: &ErrorInformation) -> IocResult<()> {
        panic!("error services must not take the locator down");
    }
}

#[test]
fn test_panicking_error_service_is_swallowed() {
    let locator = create_and_bind("validation_panicky_reporter", |binder| {
        binder.bind_validation_service(NamePolicyValidation);
        binder.bind_error_service(PanickyErrorService);
        Ok(())
    })
    .unwrap();

    // The rejection still surfaces cleanly even though the error service
    // panicked while being told about it.
    let err = bind_into_locator(&locator, |binder| {
        binder
            .bind_with_creator(DO_NOT_BIND, |_, _| Ok(Arc::new(()) as ServiceRef))
            .in_scope(PER_LOOKUP);
        Ok(())
    })
    .unwrap_err();
    assert!(err.is_validation());

    locator.shutdown();
}

struct PanickyValidator;

impl Validator for PanickyValidator {
    fn validate(&self, info: &ValidationInformation<'_>) -> IocResult<()> {
        if info.candidate().name() == "Tripwire" {
            panic!("validator blew up");
        }
        Ok(())
    }
}

struct PanickyValidation;

impl ValidationService for PanickyValidation {
    fn filter(&self) -> Arc<dyn Filter> {
        Arc::new(AllFilter)
    }

    fn validator(&self) -> Arc<dyn Validator> {
        Arc::new(PanickyValidator)
    }
}

#[test]
fn test_panicking_validator_becomes_a_validation_error() {
    let locator = create_and_bind("validation_panicky_validator", |binder| {
        binder.bind_validation_service(PanickyValidation);
        Ok(())
    })
    .unwrap();

    let err = bind_into_locator(&locator, |binder| {
        binder
            .bind_with_creator("Tripwire", |_, _| Ok(Arc::new(()) as ServiceRef))
            .in_scope(PER_LOOKUP);
        Ok(())
    })
    .unwrap_err();
    assert!(err.is_validation());

    locator.shutdown();
}
