//! Recycling of short-lived scratch objects.
//!
//! Renderers borrow their per-call scratch buffers from an injected
//! [`ObjectPool`] and hand them back once the draw is issued, so steady-state
//! frames do not allocate.

use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Default number of idle instances kept per type.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// An object that can be reset to a reusable blank state.
pub trait Recyclable: Default + 'static {
    fn recycle(&mut self);
}

impl<T: 'static> Recyclable for Vec<T> {
    fn recycle(&mut self) {
        self.clear();
    }
}

/// The capability a renderer needs from a recycling pool.
pub trait ObjectPool {
    /// Borrow a recycled instance, or a fresh one if none is idle.
    fn acquire<T: Recyclable>(&mut self) -> T;

    /// Return an instance so later `acquire::<T>()` calls can reuse it.
    fn release<T: Recyclable>(&mut self, item: T);
}

/// A type-keyed pool holding idle instances behind `Box<dyn Any>`.
pub struct Pool {
    idle: HashMap<TypeId, Vec<Box<dyn Any>>>,
    capacity: usize,
}

impl Pool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// Create a pool keeping at most `capacity` idle instances per type.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            idle: HashMap::new(),
            capacity,
        }
    }

    /// Number of idle instances of `T` ready to be acquired.
    pub fn available<T: Recyclable>(&self) -> usize {
        self.idle.get(&TypeId::of::<T>()).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.idle.clear();
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectPool for Pool {
    fn acquire<T: Recyclable>(&mut self) -> T {
        self.idle
            .get_mut(&TypeId::of::<T>())
            .and_then(Vec::pop)
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
            .unwrap_or_default()
    }

    fn release<T: Recyclable>(&mut self, mut item: T) {
        item.recycle();
        let idle = self.idle.entry(TypeId::of::<T>()).or_default();
        if idle.len() < self.capacity {
            idle.push(Box::new(item));
        }
    }
}
