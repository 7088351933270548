//! Lazy service providers.

use std::sync::Arc;

use crate::descriptor::Descriptor;
use crate::error::{IocError, IocResult};
use crate::key::ServiceKey;
use crate::locator::WeakLocator;
use crate::ServiceRef;

/// A lazy, qualifier-specializable handle to future lookups.
///
/// A provider holds a locator reference and a service key, never an
/// instance: every [`get`](Provider::get) performs a fresh lookup against
/// the locator's current state. Fields of injectable types declared as
/// `Provider` receive one of these instead of an eagerly resolved value,
/// which breaks up dependency chains and defers work until it is needed.
///
/// Providers keep only a weak reference to their locator; using one after
/// the locator shut down fails with the shutdown error.
#[derive(Clone)]
pub struct Provider {
    locator: WeakLocator,
    key: ServiceKey,
    injectee: Option<Arc<Descriptor>>,
}

impl Provider {
    pub(crate) fn new(
        locator: WeakLocator,
        key: ServiceKey,
        injectee: Option<Arc<Descriptor>>,
    ) -> Provider {
        Provider {
            locator,
            key,
            injectee,
        }
    }

    /// Looks up the best service for this provider's key.
    pub fn get(&self) -> IocResult<ServiceRef> {
        let locator = self.locator.upgrade()?;
        locator.get_for(&self.key, self.injectee.as_ref())
    }

    /// Looks up the best service for this provider's key and downcasts it.
    pub fn get_typed<T: Send + Sync + 'static>(&self) -> IocResult<Arc<T>> {
        self.get()?.downcast::<T>().map_err(|_| {
            IocError::invalid(format!(
                "service {} is not a {}",
                self.key,
                std::any::type_name::<T>()
            ))
        })
    }

    /// Looks up every service matching this provider's key.
    pub fn get_all(&self) -> IocResult<Vec<ServiceRef>> {
        let locator = self.locator.upgrade()?;
        locator.get_all_for(&self.key, self.injectee.as_ref())
    }

    /// A new provider whose key carries one more qualifier.
    pub fn qualified_by(&self, qualifier: &str) -> IocResult<Provider> {
        Ok(Provider {
            locator: self.locator.clone(),
            key: self.key.with_qualifier(qualifier)?,
            injectee: self.injectee.clone(),
        })
    }

    /// The key this provider looks up.
    pub fn key(&self) -> &ServiceKey {
        &self.key
    }
}
