//! A wrapper around the core::sync::atomic.
//!
//! # Atomic types
//!
//! Atomic types provide primitive shared-memory communication between
//! threads, and are the building blocks of other concurrent types.
//!
//! The wrappers in this module always use [`Ordering::SeqCst`], so kernel
//! code never has to reason about weaker memory orderings. The most common
//! way to share an atomic variable is to put it into an [`Arc`].
//!
//! [`Arc`]: std::sync::Arc
use core::sync::atomic::Ordering;

/// A boolean type which can be safely shared between threads.
#[derive(Default)]
pub struct AtomicBool(core::sync::atomic::AtomicBool);

impl AtomicBool {
    /// Creates a new `AtomicBool`.
    #[inline]
    #[must_use]
    pub const fn new(v: bool) -> AtomicBool {
        Self(core::sync::atomic::AtomicBool::new(v))
    }

    /// Loads a value from the bool.
    #[inline]
    pub fn load(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Stores a value into the bool.
    #[inline]
    pub fn store(&self, val: bool) {
        self.0.store(val, Ordering::SeqCst)
    }
}

impl core::fmt::Debug for AtomicBool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Debug::fmt(&self.load(), f)
    }
}

macro_rules! atomic_int {
    ($int_type:ident $atomic_type:ident) => {
        #[doc = concat!("An integer type which can be safely shared between threads, wrapping [`core::sync::atomic::", stringify!($atomic_type), "`].")]
        #[repr(transparent)]
        #[derive(Default)]
        pub struct $atomic_type(core::sync::atomic::$atomic_type);

        impl core::fmt::Debug for $atomic_type {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Debug::fmt(&self.load(), f)
            }
        }

        impl $atomic_type {
            /// Creates a new atomic integer.
            #[inline]
            #[must_use]
            pub const fn new(v: $int_type) -> Self {
                Self(core::sync::atomic::$atomic_type::new(v))
            }

            /// Loads a value from the atomic integer.
            #[inline]
            pub fn load(&self) -> $int_type {
                self.0.load(Ordering::SeqCst)
            }

            /// Stores a value into the atomic integer.
            #[inline]
            pub fn store(&self, val: $int_type) {
                self.0.store(val, Ordering::SeqCst)
            }

            /// Adds to the current value, returning the previous value.
            ///
            /// This operation wraps around on overflow.
            #[inline]
            pub fn fetch_add(&self, val: $int_type) -> $int_type {
                self.0.fetch_add(val, Ordering::SeqCst)
            }

            /// Subtracts from the current value, returning the previous value.
            ///
            /// This operation wraps around on overflow.
            #[inline]
            pub fn fetch_sub(&self, val: $int_type) -> $int_type {
                self.0.fetch_sub(val, Ordering::SeqCst)
            }

            /// Stores `new` if the current value equals `current`.
            ///
            /// The return value is a result indicating whether the new value
            /// was written and containing the previous value.
            #[inline]
            pub fn compare_exchange(
                &self,
                current: $int_type,
                new: $int_type,
            ) -> Result<$int_type, $int_type> {
                self.0
                    .compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
            }
        }
    };
}

atomic_int!(i32 AtomicI32);
atomic_int!(u64 AtomicU64);
atomic_int!(usize AtomicUsize);
