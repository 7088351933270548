//! Internal plumbing: activation tracking, reentrant locking, and the
//! cycle-detecting instance cache.

pub(crate) mod activation;
pub(crate) mod compute_cache;
pub(crate) mod reentrant;
