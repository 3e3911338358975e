//! Type-erased node values
//!
//! Node functions produce arbitrary payloads. A [`Value`] erases the payload
//! type and carries a content fingerprint so the evaluator can tell whether a
//! rebuilt node actually changed (change pruning).

use std::any::{Any, TypeId};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

trait Payload: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + fmt::Debug + Send + Sync> Payload for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A computed node value
#[derive(Clone)]
pub struct Value {
    payload: Arc<dyn Payload>,
    type_id: TypeId,
    fingerprint: u64,
}

impl Value {
    /// Wrap a payload, fingerprinting its contents
    pub fn new<T>(payload: T) -> Self
    where
        T: Any + fmt::Debug + Hash + Send + Sync,
    {
        Value {
            fingerprint: fingerprint(&payload),
            type_id: TypeId::of::<T>(),
            payload: Arc::new(payload),
        }
    }

    /// Borrow the payload if it has type `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        // Dispatch on the pointee; `Arc<dyn Payload>` is itself a `Payload`.
        (*self.payload).as_any().downcast_ref::<T>()
    }

    /// Content fingerprint used for change detection
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

/// Values are equal when they hold the same type with the same contents.
///
/// Contents are compared by their 64-bit fingerprints. Two different
/// payloads whose fingerprints collide compare equal, so a rebuilt node
/// would keep its old version and its dependents would not be rebuilt.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.fingerprint == other.fingerprint
    }
}

impl Eq for Value {}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.payload, f)
    }
}

fn fingerprint<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}
