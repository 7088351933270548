//! Service descriptors: how one service is created, destroyed, and classified.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::error::{IocError, IocResult};
use crate::key::{check_name, check_namespace, ServiceKey};
use crate::locator::ServiceLocator;
use crate::{ServiceRef, DEFAULT_NAMESPACE, PER_LOOKUP, SINGLETON};

/// Creates one instance of a service.
pub type CreateFn =
    Arc<dyn Fn(&ServiceLocator, &Arc<Descriptor>) -> IocResult<ServiceRef> + Send + Sync>;

/// Destroys one instance of a service.
pub type DestroyFn =
    Arc<dyn Fn(&ServiceLocator, &Arc<Descriptor>, ServiceRef) -> IocResult<()> + Send + Sync>;

/// Whether a descriptor is visible outside its own locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// A normal descriptor, visible to children.
    Normal,
    /// A local descriptor, only visible to its own locator.
    Local,
}

/// Identity of a bound descriptor within the process: the owning locator id
/// plus the service id assigned at bind time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct DescriptorId {
    pub(crate) locator_id: i64,
    pub(crate) service_id: i64,
}

/// An immutable description of one service: identity, classification, and
/// the functions that create and destroy instances.
///
/// Descriptors are produced by freezing a [`WriteableDescriptor`] during
/// [`DynamicConfiguration::bind`](crate::DynamicConfiguration::bind), which
/// stamps them with the owning locator id and a fresh service id. Once
/// bound, only the rank can change.
///
/// The `Display` form, `namespace/name/locatorID/serviceID`, is the stable
/// textual identity used in error messages.
pub struct Descriptor {
    namespace: String,
    name: String,
    scope: String,
    qualifiers: Vec<String>,
    visibility: Visibility,
    metadata: HashMap<String, Vec<String>>,
    rank: AtomicI32,
    service_id: i64,
    locator_id: i64,
    create: CreateFn,
    destroy: Option<DestroyFn>,
}

impl Descriptor {
    /// Freezes a writeable descriptor into a bound, immutable one.
    pub(crate) fn materialize(
        from: &WriteableDescriptor,
        service_id: i64,
        locator_id: i64,
    ) -> IocResult<Descriptor> {
        let create = from
            .create
            .clone()
            .ok_or_else(|| IocError::invalid("descriptor must have a create function"))?;
        if from.name.is_empty() {
            return Err(IocError::invalid("descriptor must have a name"));
        }

        Ok(Descriptor {
            namespace: from.namespace.clone(),
            name: from.name.clone(),
            scope: from.scope.clone(),
            qualifiers: from.qualifiers.clone(),
            visibility: from.visibility,
            metadata: from.metadata.clone(),
            rank: AtomicI32::new(from.rank),
            service_id,
            locator_id,
            create,
            destroy: from.destroy.clone(),
        })
    }

    /// The namespace this service lives in. Never empty.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The name of this service. Never empty.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name of the scope this service is created in.
    pub fn scope_name(&self) -> &str {
        &self.scope
    }

    /// The qualifiers of this service.
    pub fn qualifiers(&self) -> &[String] {
        &self.qualifiers
    }

    /// The visibility of this service.
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// The metadata attached to this service.
    pub fn metadata(&self) -> &HashMap<String, Vec<String>> {
        &self.metadata
    }

    /// The current rank. Higher ranks win lookups.
    pub fn rank(&self) -> i32 {
        self.rank.load(Ordering::SeqCst)
    }

    /// Replaces the rank, returning the previous value. Rank is the only
    /// attribute of a bound descriptor that may change.
    pub fn set_rank(&self, rank: i32) -> i32 {
        self.rank.swap(rank, Ordering::SeqCst)
    }

    /// The service id assigned at bind time, or -1 before binding.
    pub fn service_id(&self) -> i64 {
        self.service_id
    }

    /// The id of the owning locator, or -1 before binding.
    pub fn locator_id(&self) -> i64 {
        self.locator_id
    }

    /// The service key formed by this descriptor's namespace, name, and
    /// qualifiers.
    pub fn service_key(&self) -> ServiceKey {
        let qualifiers: Vec<&str> = self.qualifiers.iter().map(String::as_str).collect();
        ServiceKey::new_unchecked(&self.namespace, &self.name, &qualifiers)
    }

    pub(crate) fn id(&self) -> DescriptorId {
        DescriptorId {
            locator_id: self.locator_id,
            service_id: self.service_id,
        }
    }

    pub(crate) fn create_fn(&self) -> &CreateFn {
        &self.create
    }

    pub(crate) fn destroy_fn(&self) -> Option<&DestroyFn> {
        self.destroy.as_ref()
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.namespace, self.name, self.locator_id, self.service_id
        )
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("qualifiers", &self.qualifiers)
            .field("rank", &self.rank())
            .field("service_id", &self.service_id)
            .field("locator_id", &self.locator_id)
            .finish()
    }
}

/// The mutable builder state of a descriptor, before it is bound.
///
/// Defaults: namespace `default`, scope `Singleton`, normal visibility,
/// rank 0, no qualifiers, no metadata. All name-shaped setters validate
/// their input against the same character sets as [`ServiceKey`].
#[derive(Clone)]
pub struct WriteableDescriptor {
    namespace: String,
    name: String,
    scope: String,
    qualifiers: Vec<String>,
    visibility: Visibility,
    metadata: HashMap<String, Vec<String>>,
    rank: i32,
    create: Option<CreateFn>,
    destroy: Option<DestroyFn>,
}

impl WriteableDescriptor {
    /// Creates an empty writeable descriptor with the documented defaults.
    pub fn new() -> WriteableDescriptor {
        WriteableDescriptor {
            namespace: DEFAULT_NAMESPACE.to_string(),
            name: String::new(),
            scope: SINGLETON.to_string(),
            qualifiers: Vec::new(),
            visibility: Visibility::Normal,
            metadata: HashMap::new(),
            rank: 0,
            create: None,
            destroy: None,
        }
    }

    /// Creates a descriptor that always resolves to exactly the constant
    /// passed in. It is placed in the PerLookup scope by default, so every
    /// lookup returns the identical instance without caching.
    pub fn constant<T: Send + Sync + 'static>(key: &ServiceKey, value: T) -> WriteableDescriptor {
        let shared: ServiceRef = Arc::new(value);
        let mut desc = WriteableDescriptor::new();
        desc.namespace = key.namespace().to_string();
        desc.name = key.name().to_string();
        desc.qualifiers = key.qualifiers().to_vec();
        desc.scope = PER_LOOKUP.to_string();
        desc.create = Some(Arc::new(move |_, _| Ok(shared.clone())));
        desc
    }

    /// Sets the create function.
    pub fn set_create_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&ServiceLocator, &Arc<Descriptor>) -> IocResult<ServiceRef> + Send + Sync + 'static,
    {
        self.create = Some(Arc::new(f));
        self
    }

    /// Sets the destroy function.
    pub fn set_destroy_fn<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&ServiceLocator, &Arc<Descriptor>, ServiceRef) -> IocResult<()> + Send + Sync + 'static,
    {
        self.destroy = Some(Arc::new(f));
        self
    }

    /// Sets the namespace. May not be empty.
    pub fn set_namespace(&mut self, namespace: &str) -> IocResult<&mut Self> {
        check_namespace(namespace)?;
        self.namespace = namespace.to_string();
        Ok(self)
    }

    /// Sets the name. May not be empty.
    pub fn set_name(&mut self, name: &str) -> IocResult<&mut Self> {
        check_name(name)?;
        self.name = name.to_string();
        Ok(self)
    }

    /// Sets the scope name.
    pub fn set_scope(&mut self, scope: &str) -> IocResult<&mut Self> {
        check_name(scope)?;
        self.scope = scope.to_string();
        Ok(self)
    }

    /// Replaces the qualifiers.
    pub fn set_qualifiers<I, S>(&mut self, qualifiers: I) -> IocResult<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut qs = Vec::new();
        for qualifier in qualifiers {
            let qualifier = qualifier.into();
            check_name(&qualifier)?;
            qs.push(qualifier);
        }
        self.qualifiers = qs;
        Ok(self)
    }

    /// Adds one qualifier.
    pub fn add_qualifier(&mut self, qualifier: &str) -> IocResult<&mut Self> {
        check_name(qualifier)?;
        self.qualifiers.push(qualifier.to_string());
        Ok(self)
    }

    /// Sets the visibility.
    pub fn set_visibility(&mut self, visibility: Visibility) -> &mut Self {
        self.visibility = visibility;
        self
    }

    /// Replaces the metadata.
    pub fn set_metadata(&mut self, metadata: HashMap<String, Vec<String>>) -> &mut Self {
        self.metadata = metadata;
        self
    }

    /// Sets the rank.
    pub fn set_rank(&mut self, rank: i32) -> &mut Self {
        self.rank = rank;
        self
    }

    /// The namespace currently set.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The name currently set. Empty until `set_name` is called.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scope currently set.
    pub fn scope_name(&self) -> &str {
        &self.scope
    }

    /// The qualifiers currently set.
    pub fn qualifiers(&self) -> &[String] {
        &self.qualifiers
    }

    /// The rank currently set.
    pub fn rank(&self) -> i32 {
        self.rank
    }
}

impl Default for WriteableDescriptor {
    fn default() -> Self {
        WriteableDescriptor::new()
    }
}
