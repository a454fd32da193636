//! Atomic and cell types used by the primitives.
//!
//! Under the `loom` feature these are loom's model-checked types, so the
//! same inbox and ring code runs inside `loom::model` and loom sees every
//! access to slot and node contents, not just the atomics.
//!
//! The std [`UnsafeCell`] wrapper mirrors loom's closure API (`with` /
//! `with_mut`) so call sites are identical under both builds.

#[cfg(feature = "loom")]
pub(crate) use loom::cell::UnsafeCell;
#[cfg(feature = "loom")]
pub(crate) use loom::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[cfg(not(feature = "loom"))]
pub(crate) use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Back off inside a spin loop. Under loom this yields so the model can
/// schedule the thread being waited on.
#[inline]
pub(crate) fn spin_hint() {
    #[cfg(feature = "loom")]
    loom::thread::yield_now();
    #[cfg(not(feature = "loom"))]
    core::hint::spin_loop();
}

/// `core::cell::UnsafeCell` with loom's access API.
#[cfg(not(feature = "loom"))]
#[derive(Debug)]
#[repr(transparent)]
pub(crate) struct UnsafeCell<T>(core::cell::UnsafeCell<T>);

#[cfg(not(feature = "loom"))]
impl<T> UnsafeCell<T> {
    pub(crate) fn new(data: T) -> Self {
        Self(core::cell::UnsafeCell::new(data))
    }

    /// Run `f` with a shared pointer to the contents.
    #[inline]
    pub(crate) fn with<R>(&self, f: impl FnOnce(*const T) -> R) -> R {
        f(self.0.get())
    }

    /// Run `f` with an exclusive pointer to the contents.
    #[inline]
    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
        f(self.0.get())
    }
}
