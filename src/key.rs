//! Service keys: the structural identity of a service.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{IocError, IocResult};
use crate::{CONTEXTUAL_SCOPE_NAMESPACE, DEFAULT_NAMESPACE, SYSTEM_NAMESPACE, USER_SERVICES_NAMESPACE};

static NAMESPACE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z0-9_:/]+$").expect("namespace pattern"));
static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[A-Za-z0-9_]+$").expect("name pattern"));

/// Checks the namespace character set: alphanumerics, underscore, colon, slash.
pub(crate) fn check_namespace(input: &str) -> IocResult<()> {
    if input.is_empty() {
        return Err(IocError::invalid("the namespace may not be empty"));
    }
    if !NAMESPACE_PATTERN.is_match(input) {
        return Err(IocError::invalid(format!(
            "the namespace may only have alphanumeric characters, underscore, colon and slash ({input})"
        )));
    }
    Ok(())
}

/// Checks the name character set: alphanumerics and underscore.
pub(crate) fn check_name(input: &str) -> IocResult<()> {
    if input.is_empty() {
        return Err(IocError::invalid("the name may not be empty"));
    }
    if !NAME_PATTERN.is_match(input) {
        return Err(IocError::invalid(format!(
            "the name may only have alphanumeric characters and underscore ({input})"
        )));
    }
    Ok(())
}

/// The key to a managed service: namespace, name, and an ordered set of
/// qualifiers.
///
/// Keys compare structurally and are immutable once built. A lookup matches
/// a descriptor when namespace and name are equal and the descriptor's
/// qualifier set is a superset of the key's.
///
/// # Examples
///
/// ```rust
/// use berth::ServiceKey;
///
/// let key = ServiceKey::new("user/services", "Translator", ["French"]).unwrap();
/// assert_eq!(key.namespace(), "user/services");
/// assert_eq!(key.name(), "Translator");
/// assert_eq!(key.to_string(), "user/services/Translator@French");
///
/// // Bad characters are rejected up front.
/// assert!(ServiceKey::new("default", "no spaces", [] as [&str; 0]).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    namespace: String,
    name: String,
    qualifiers: Vec<String>,
}

impl ServiceKey {
    /// Creates a key, validating the namespace, name, and every qualifier.
    pub fn new<I, S>(namespace: &str, name: &str, qualifiers: I) -> IocResult<ServiceKey>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        check_namespace(namespace)?;
        check_name(name)?;

        let mut qs = Vec::new();
        for qualifier in qualifiers {
            let qualifier = qualifier.into();
            check_name(&qualifier)?;
            qs.push(qualifier);
        }

        Ok(ServiceKey {
            namespace: namespace.to_string(),
            name: name.to_string(),
            qualifiers: qs,
        })
    }

    /// Creates a key in the `default` namespace.
    pub fn in_default_namespace(name: &str) -> IocResult<ServiceKey> {
        ServiceKey::new(DEFAULT_NAMESPACE, name, [] as [&str; 0])
    }

    /// Creates a key in the `system` namespace.
    pub fn system(name: &str) -> IocResult<ServiceKey> {
        ServiceKey::new(SYSTEM_NAMESPACE, name, [] as [&str; 0])
    }

    /// Creates a key in the `sys/scope` namespace, used to look up
    /// contextual scope implementations.
    pub fn contextual_scope(name: &str) -> IocResult<ServiceKey> {
        ServiceKey::new(CONTEXTUAL_SCOPE_NAMESPACE, name, [] as [&str; 0])
    }

    /// Creates a key in the `user/services` namespace, used for extension
    /// services such as the ErrorService or ValidationService.
    pub fn user_service(name: &str) -> IocResult<ServiceKey> {
        ServiceKey::new(USER_SERVICES_NAMESPACE, name, [] as [&str; 0])
    }

    /// Internal constructor for keys whose parts are already known valid.
    pub(crate) fn new_unchecked(namespace: &str, name: &str, qualifiers: &[&str]) -> ServiceKey {
        ServiceKey {
            namespace: namespace.to_string(),
            name: name.to_string(),
            qualifiers: qualifiers.iter().map(|q| q.to_string()).collect(),
        }
    }

    /// The namespace of this key.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The name of this key.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The qualifiers of this key, in the order they were given.
    pub fn qualifiers(&self) -> &[String] {
        &self.qualifiers
    }

    /// A copy of this key with one more qualifier appended.
    pub fn with_qualifier(&self, qualifier: &str) -> IocResult<ServiceKey> {
        check_name(qualifier)?;
        let mut copy = self.clone();
        copy.qualifiers.push(qualifier.to_string());
        Ok(copy)
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)?;
        for qualifier in &self.qualifiers {
            write!(f, "@{qualifier}")?;
        }
        Ok(())
    }
}
