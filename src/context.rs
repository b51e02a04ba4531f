//! Request-scoped context.
//!
//! A behavior that produces something deep in the chain (a span id, an
//! authenticated principal) and a behavior nested inside it that needs to read
//! it share this value, not a side channel. The context rides inside the
//! [`Request`](crate::Request), next to the writer rather than inside it, and
//! is dropped when the request completes.
//!
//! Values are keyed by type:
//!
//! ```rust
//! use mantle::Context;
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct TenantId(u32);
//!
//! let mut cx = Context::new();
//! cx.insert(TenantId(7));
//! assert_eq!(cx.get::<TenantId>(), Some(&TenantId(7)));
//! ```

use http::Extensions;

#[derive(Debug, Default)]
pub struct Context {
    values: Extensions,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, returning the previous value of the same type.
    pub fn insert<T>(&mut self, value: T) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.values.insert(value)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values.get::<T>()
    }

    pub fn get_mut<T: Send + Sync + 'static>(&mut self) -> Option<&mut T> {
        self.values.get_mut::<T>()
    }

    pub fn remove<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.values.remove::<T>()
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.get::<T>().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
