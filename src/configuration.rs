//! Dynamic configurations: transactional batches of binds and removals.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::descriptor::{Descriptor, WriteableDescriptor};
use crate::error::{IocError, IocResult};
use crate::extension::FailureKind;
use crate::filter::Filter;
use crate::locator::{ServiceLocator, WeakLocator};

/// The service that hands out [`DynamicConfiguration`] instances. Bound
/// into every locator under `system/DynamicConfigurationService`.
pub struct DynamicConfigurationService {
    locator: WeakLocator,
}

impl DynamicConfigurationService {
    pub(crate) fn new(locator: WeakLocator) -> DynamicConfigurationService {
        DynamicConfigurationService { locator }
    }

    /// Opens a new configuration against the locator's current generation.
    pub fn create_configuration(&self) -> IocResult<DynamicConfiguration> {
        let locator = self.locator.upgrade()?;
        Ok(DynamicConfiguration::new(locator))
    }
}

struct ConfigurationState {
    open: bool,
    base_generation: u64,
    binds: Vec<Arc<Descriptor>>,
    removers: Vec<Arc<dyn Filter>>,
}

/// A transactional batch of descriptor additions and remove-filters.
///
/// A configuration snapshots the locator's generation when opened. Commit
/// succeeds only if no other commit happened in between; otherwise it
/// fails with the stale-configuration error. Whatever the outcome, commit
/// closes the configuration and every further operation on it fails.
///
/// # Examples
///
/// ```rust
/// use berth::{new_locator, CreationPolicy, WriteableDescriptor, ServiceKey};
///
/// let locator = new_locator("configuration_docs", CreationPolicy::FailIfPresent).unwrap();
/// let configuration = locator.dynamic_configuration().unwrap();
///
/// let key = ServiceKey::in_default_namespace("Greeting").unwrap();
/// let bound = configuration
///     .bind(&WriteableDescriptor::constant(&key, "hello".to_string()))
///     .unwrap();
/// assert_eq!(bound.locator_id(), locator.id());
///
/// configuration.commit().unwrap();
/// assert_eq!(*locator.get_typed::<String>(&key).unwrap(), "hello");
/// locator.shutdown();
/// ```
pub struct DynamicConfiguration {
    locator: ServiceLocator,
    state: Mutex<ConfigurationState>,
}

impl DynamicConfiguration {
    pub(crate) fn new(locator: ServiceLocator) -> DynamicConfiguration {
        let base_generation = locator.snapshot().generation;
        DynamicConfiguration {
            locator,
            state: Mutex::new(ConfigurationState {
                open: true,
                base_generation,
                binds: Vec::new(),
                removers: Vec::new(),
            }),
        }
    }

    /// Freezes the writeable descriptor, stamps it with this locator's id
    /// and the next service id, and schedules it for addition. Returns the
    /// immutable descriptor that will enter the store if commit succeeds.
    pub fn bind(&self, descriptor: &WriteableDescriptor) -> IocResult<Arc<Descriptor>> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(IocError::ConfigurationClosed);
        }

        let service_id = self.locator.next_service_id();
        let bound = Arc::new(Descriptor::materialize(
            descriptor,
            service_id,
            self.locator.id(),
        )?);
        state.binds.push(bound.clone());
        Ok(bound)
    }

    /// Schedules a remove-filter. On commit it runs over every descriptor
    /// in the store to determine removals.
    pub fn add_remove_filter(&self, filter: Arc<dyn Filter>) -> IocResult<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(IocError::ConfigurationClosed);
        }
        state.removers.push(filter);
        Ok(())
    }

    /// Applies the batch under the locator's commit lock. The
    /// configuration is closed whether or not the commit succeeds. Commit
    /// failures are reported to the error services once.
    pub fn commit(&self) -> IocResult<()> {
        let (base_generation, binds, removers) = {
            let mut state = self.state.lock();
            if !state.open {
                return Err(IocError::ConfigurationClosed);
            }
            state.open = false;
            (
                state.base_generation,
                std::mem::take(&mut state.binds),
                std::mem::take(&mut state.removers),
            )
        };

        match self
            .locator
            .apply_configuration(base_generation, &binds, &removers)
        {
            Ok(()) => Ok(()),
            Err(err) => {
                if err.already_reported() {
                    return Err(err);
                }
                self.locator.report_failure(
                    FailureKind::DynamicConfiguration,
                    None,
                    None,
                    None,
                    &err,
                );
                Err(err.mark_reported())
            }
        }
    }
}
